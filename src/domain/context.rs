use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Attribution of a segment: which application, session and view it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    pub application_id: String,
    pub session_id: String,
    pub view_id: String,
}

#[derive(Debug, Default)]
struct ContextState {
    application_id: String,
    session_id: Option<String>,
    view_id: Option<String>,
}

/// Current session and view, as maintained by the session/view collaborator.
///
/// Polled at flush-decision time. A missing session id means the session is
/// untracked and replay records cannot be attributed.
#[derive(Debug, Clone, Default)]
pub struct SharedSessionContext {
    state: Arc<RwLock<ContextState>>,
}

impl SharedSessionContext {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ContextState {
                application_id: application_id.into(),
                ..ContextState::default()
            })),
        }
    }

    pub fn set_session(&self, session_id: Option<String>) {
        self.state.write().session_id = session_id;
    }

    pub fn set_view(&self, view_id: Option<String>) {
        self.state.write().view_id = view_id;
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.read().session_id.clone()
    }

    /// Snapshot of the current attribution, or `None` when untracked.
    pub fn current(&self) -> Option<SessionContext> {
        let state = self.state.read();
        let session_id = state.session_id.clone()?;
        Some(SessionContext {
            application_id: state.application_id.clone(),
            session_id,
            view_id: state.view_id.clone().unwrap_or_default(),
        })
    }
}
