//! # nuvo-sim: headless LED wall simulator
//!
//! Owns a grid of virtual panel modules, announces them on the bus,
//! and reassembles, decodes and composites every frame addressed to
//! them, exactly as a physical receiver would.
//!
//! ## Modes
//!
//! - **Lenient** (default): shows as much as possible, padding lost
//!   fragments and falling back on mislabelled payloads.
//! - **Strict** (`--strict` or `decode.strict`): refuses any frame that
//!   breaks a protocol invariant.

pub mod config;
pub mod service;
