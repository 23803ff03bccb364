//! Shared setup code for the `loom-server`/`loom-admin`/`loom-paper`
//! binaries. No execution logic lives here — everything real is in
//! `loom-core`; this crate only wires binaries up to it.

pub mod common;
