//! Userspace harness for the skbguard BPF programs.
//!
//! One program per process lifetime: open the bytecode object, load it
//! into the kernel, resolve the entry point by name, attach it to its
//! hook, block until a termination signal, release everything in
//! reverse acquisition order.

pub mod bpf;
pub mod error;
pub mod hook;
pub mod lifecycle;
pub mod object;
pub mod signal;

pub use error::LoaderError;

pub type Result<T, E = LoaderError> = std::result::Result<T, E>;
