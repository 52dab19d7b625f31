//! GPU-assisted validation building blocks that do not depend on the
//! loader: SPIR-V rewriting, the instrumentation cache, descriptor set slot
//! budgeting, the debug descriptor pool manager and output readback.

pub mod allocator;
pub mod budget;
pub mod cache;
pub mod desc_pool;
pub mod error;
pub mod instrument;
pub mod output;
pub mod spirv;

pub use allocator::{GpuAllocator, OutputBuffer};
pub use budget::{BindingBudget, LayoutPlan};
pub use cache::{CachedShader, ContentHash, InstrumentationCache};
pub use desc_pool::{DescriptorBackend, DescriptorSetManager};
pub use error::{AllocError, InstrumentError, PoolError, SetupError, SpirvError};
pub use instrument::{instrument, InstrumentOptions, Instrumented};
pub use output::OutputRecord;
