//! Sinkhole - a blocklist-enforcing DNS server with iterative resolution.
//!
//! This library exposes the codec, blocklist, and resolver for testing and benchmarking.

pub mod dns;
pub mod filter;
pub mod resolver;
pub mod server;
pub mod upstream;
