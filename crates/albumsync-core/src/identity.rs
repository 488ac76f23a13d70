//! Identity provider contract
//!
//! The authentication provider itself lives outside this crate; all the core
//! needs is the stable user id of the current session.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{AlbumError, AlbumResult};
use crate::types::UserId;

/// Source of the current session's user id
pub trait IdentityProvider: Send + Sync {
    /// `None` when nobody is signed in
    fn current_user(&self) -> Option<UserId>;
}

/// Resolve the signed-in user or fail with `Unauthorized`.
pub fn require_user(identity: &dyn IdentityProvider) -> AlbumResult<UserId> {
    identity
        .current_user()
        .ok_or_else(|| AlbumError::Unauthorized("no user is signed in".into()))
}

/// Identity provider backed by an in-memory slot
///
/// Cloning shares the slot, so signing in on one clone is visible to all.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    user: Arc<RwLock<Option<UserId>>>,
}

impl SessionIdentity {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self {
            user: Arc::new(RwLock::new(Some(user.into()))),
        }
    }

    pub fn sign_in(&self, user: impl Into<UserId>) {
        *self.user.write() = Some(user.into());
    }

    pub fn sign_out(&self) {
        *self.user.write() = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.user.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_user() {
        let identity = SessionIdentity::signed_out();
        assert!(matches!(
            require_user(&identity),
            Err(AlbumError::Unauthorized(_))
        ));

        identity.sign_in("u1");
        assert_eq!(require_user(&identity).unwrap(), UserId::from("u1"));

        let shared = identity.clone();
        shared.sign_out();
        assert!(identity.current_user().is_none());
    }
}
