pub mod context;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod message;
pub mod record;

pub use context::{SessionContext, SharedSessionContext};
pub use error::{PayloadKind, TelemetryError};
pub use event::AgentEvent;
pub use lifecycle::{LifecycleSignal, PageLifecycle, PageState};
pub use message::Message;
pub use record::{Record, RecordType};
