// harvest - client/mod.rs
//
// Session transport layer: shell command text, the per-target `Client`
// state machine, and the line ingestion thread.
// Dependencies: core, platform, util.
// Must NOT depend on: app.

pub mod command;
pub mod ingest;
pub mod session;
