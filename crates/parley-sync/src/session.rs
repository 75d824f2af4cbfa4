use std::sync::RwLock;

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
}

/// Identity provider: who is acting, if anyone.
pub trait Session: Send + Sync {
    fn current_user(&self) -> Option<SessionUser>;
}

/// A session whose user can be swapped at runtime (sign in / sign out).
#[derive(Debug, Default)]
pub struct SessionHandle {
    user: RwLock<Option<SessionUser>>,
}

impl SessionHandle {
    pub fn signed_in(user: SessionUser) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: SessionUser) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl Session for SessionHandle {
    fn current_user(&self) -> Option<SessionUser> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
