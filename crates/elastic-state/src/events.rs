//! Change notifications emitted by the store.

/// A change to a stored policy, identified by its `{namespace}/{name}` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    /// The policy was created or its spec was updated.
    Applied(String),
    /// The policy was removed.
    Deleted(String),
}

impl PolicyEvent {
    /// The key of the policy this event refers to.
    pub fn key(&self) -> &str {
        match self {
            PolicyEvent::Applied(key) | PolicyEvent::Deleted(key) => key,
        }
    }
}
