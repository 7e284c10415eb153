use super::transport::Method;

/// Signals emitted around each dispatch.
///
/// `Start` comes first and `Done` last; `Error` precedes `Done` on failure. A superseded
/// dispatch emits nothing after `Start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start { method: Method, url: String },
    Error { message: String },
    Done,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Start { .. } => "start",
            LifecycleEvent::Error { .. } => "error",
            LifecycleEvent::Done => "done",
        }
    }
}
