use super::{LifecycleSignal, Message, Record};

/// Everything the page controller consumes, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Log(Message),
    Rum(Message),
    /// A RUM event that supersedes any buffered event with the same key.
    RumUpdate { key: String, message: Message },
    Record(Record),
    SessionChanged(Option<String>),
    Lifecycle(LifecycleSignal),
}
