//! Source of the current user's identity
//!
//! The client never reaches into a global auth session. It asks an injected
//! [`IdentityProvider`] for the current user id each time it connects, so tests
//! can drive it with synthetic identities.

use parking_lot::RwLock;
use std::sync::Arc;

/// Supplies the id of the currently authenticated user
pub trait IdentityProvider: Send + Sync {
    /// Current user id, `None` when nobody is signed in
    fn current_user_id(&self) -> Option<String>;
}

impl<F> IdentityProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_user_id(&self) -> Option<String> {
        self()
    }
}

/// Identity that can be swapped at runtime, e.g. on sign-in/sign-out
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Arc<RwLock<Option<String>>>,
}

impl StaticIdentity {
    /// Identity for a signed-in user
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Arc::new(RwLock::new(Some(user_id.into()))),
        }
    }

    /// Identity with nobody signed in
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Replace the current user
    pub fn set(&self, user_id: Option<String>) {
        *self.user_id.write() = user_id;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }
}

/// Resolve a user id, treating blank ids as absent
pub(crate) fn resolve(provider: &dyn IdentityProvider) -> Option<String> {
    provider
        .current_user_id()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}
