use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Discrete page-lifecycle signals raised by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    ViewCreated { view_id: Option<String> },
    ViewEnded { timestamp: i64 },
    VisibilityHidden,
    VisibilityVisible,
    BeforeUnload,
}

impl LifecycleSignal {
    /// Signals after which the process may be torn down without notice.
    pub fn is_forced_flush(&self) -> bool {
        matches!(
            self,
            LifecycleSignal::VisibilityHidden | LifecycleSignal::BeforeUnload
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PageLifecycle {
    #[default]
    Active = 0,
    Hidden = 1,
    Unloading = 2,
}

impl PageLifecycle {
    /// True when only an unload-safe delivery can be relied upon.
    pub fn is_terminating(self) -> bool {
        matches!(self, PageLifecycle::Hidden | PageLifecycle::Unloading)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => PageLifecycle::Hidden,
            2 => PageLifecycle::Unloading,
            _ => PageLifecycle::Active,
        }
    }
}

/// Page lifecycle cell written by the controller and read by transports at
/// send time.
#[derive(Debug, Clone, Default)]
pub struct PageState {
    inner: Arc<AtomicU8>,
}

impl PageState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PageLifecycle {
        PageLifecycle::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn set(&self, lifecycle: PageLifecycle) {
        self.inner.store(lifecycle as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_state_is_shared_between_clones() {
        let state = PageState::new();
        let reader = state.clone();
        assert_eq!(reader.get(), PageLifecycle::Active);

        state.set(PageLifecycle::Unloading);
        assert_eq!(reader.get(), PageLifecycle::Unloading);
        assert!(reader.get().is_terminating());
    }

    #[test]
    fn test_forced_flush_signals() {
        assert!(LifecycleSignal::BeforeUnload.is_forced_flush());
        assert!(LifecycleSignal::VisibilityHidden.is_forced_flush());
        assert!(!LifecycleSignal::ViewCreated { view_id: None }.is_forced_flush());
        assert!(!LifecycleSignal::ViewEnded { timestamp: 0 }.is_forced_flush());
    }
}
