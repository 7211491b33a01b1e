//! Library wrapper around the `pyasset` CLI implementation.
//!
//! The CLI is exercised through its binary and integration tests; compiling `main.rs` as a
//! module here lets `cargo test -p pyasset-cli --lib` typecheck it without the binary.

#[allow(dead_code)]
#[path = "main.rs"]
mod main_bin;
