//! `ltxv-worker` library crate.
//!
//! Holds job-document intake so it can be tested; the binary entrypoint
//! lives in `main.rs`.

pub mod job;
