#![no_std]

pub mod filter;

pub use filter::{classify, PacketView, Verdict, BLOCKED_TCP_PORT};
