// harvest - app/mod.rs
//
// Application layer: configuration, per-target pipelines, multi-target
// fan-in, and record output.
// Dependencies: core, client, util.

pub mod config;
pub mod harvester;
pub mod output;
pub mod pipeline;
