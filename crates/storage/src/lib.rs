pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::MemoryExecutionStore;
pub use record::{CompletionMetrics, ExecutionRecord, ExecutionStatus, Row};
pub use traits::ExecutionStore;
