//! Domain types shared by the upscale proxy crates.
//!
//! Holds the error taxonomy, retry/deadline policy, progress statuses and
//! the injectable random source. Nothing in this crate performs I/O.

pub mod error;
pub mod random;
pub mod upscale;
