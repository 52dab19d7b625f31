//! Layer-wide plumbing shared by the state tracker, the GPU-assisted
//! subsystem and the dispatch chassis: settings, diagnostics, call-context
//! records and the handle-keyed state map.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handle_map;
pub mod location;

pub use diagnostics::{LogSink, MemorySink, Reporter, Severity, TracingSink};
pub use error::CoreError;
pub use handle_map::StateMap;
pub use location::{ErrorObject, Location, RecordObject};
