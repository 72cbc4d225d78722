//! Umbrella crate for Sweeper.
//!
//! This crate is intentionally small: it re-exports the engine and protocol crates
//! so downstream code can depend on a single crate name (`sweeper`).

pub use sweeper_engine as engine;
pub use sweeper_protocol as protocol;
