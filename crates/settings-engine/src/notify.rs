//! The callback surface an [`crate::Engine`] delivers change notifications
//! through (§9's cyclic-reference note): the engine only ever holds a weak
//! reference to its listener, so a client that drops its engine handle
//! while a notification is in flight on a wire worker thread does not keep
//! the listener alive, and the orphaned notification is just dropped.

/// One change notification, synthesized locally (an optimistic write or a
/// watch-establishment race) or relayed from a writer's `Notify` /
/// `WritabilityNotify` signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    /// The absolute dir or key prefix the change is rooted at.
    pub prefix: String,
    /// Relative suffixes under `prefix` that changed. `[""]` means
    /// `prefix` itself (used when `prefix` is a key, or for a
    /// catch-all "something under here changed" notification).
    pub changes: Vec<String>,
    /// The writer-assigned tag identifying the write that produced this
    /// notification, when one is known.
    pub tag: Option<String>,
    /// Echoed back from the `origin_tag` a caller passed to
    /// [`crate::Engine::change_fast`], so the caller can recognize its own
    /// writes without string-matching `tag`.
    pub origin_tag: Option<String>,
    /// `true` for a writability change rather than a value change.
    pub is_writability: bool,
}

/// Receives notifications from an [`crate::Engine`]. Implementors are
/// expected to be cheap and non-blocking: `on_change` may be invoked from
/// a wire worker thread.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, notification: &ChangeNotification);
}
