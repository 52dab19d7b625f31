//! State Object Model: one reference-counted record per live Vulkan handle.
//!
//! Dependencies are owning `Arc` edges from the dependent object to the one
//! it needs. The reverse direction is a set of `Weak` child links used only
//! to broadcast invalidation when a parent is destroyed, so the graph never
//! contains an owning cycle.

pub mod base;
pub mod command;
pub mod descriptor;
pub mod image;
pub mod memory;
pub mod pipeline;
pub mod swapchain;
pub mod tracker;

pub use base::{destroy_object, link, StateNode, StateObject, TypedHandle};
pub use tracker::{DeviceState, InstanceState};
