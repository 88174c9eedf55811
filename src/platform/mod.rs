// harvest - platform/mod.rs
//
// Platform abstraction layer: OS processes, remote shells, process groups.
// Dependencies: util, standard library, nix (Unix signals).
// Must NOT depend on: core, client, app.

pub mod shell;
