//! Shared bootstrap helpers for the vkguard crates.

pub mod logging;
pub mod platform;

pub use logging::init_logging;
