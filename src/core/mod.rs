// harvest - core/mod.rs
//
// Core pipeline logic: data model, cancellation, multi-line stitching,
// timestamp extraction, and the parsers that turn lines into records.
// Dependencies: util only.
// Must NOT depend on: client, platform, app.

pub mod cancel;
pub mod model;
pub mod parser;
pub mod stitch;
pub mod timestamp;
