//! Common types shared across the teleconsult session crates.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
