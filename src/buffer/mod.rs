pub mod batch;
pub mod scheduler;

pub use batch::{BatchBuffer, BatchConfig};
pub use scheduler::{FlushScheduler, SchedulerState};
