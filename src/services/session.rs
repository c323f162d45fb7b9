//! Authenticated identity shared by the repository and media code.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: String,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Cloneable handle to the current sign-in state.
#[derive(Clone, Default, Debug)]
pub struct Session {
    user: Arc<RwLock<Option<User>>>,
}

impl Session {
    pub fn new(user: Option<User>) -> Self {
        Self {
            user: Arc::new(RwLock::new(user)),
        }
    }

    pub fn current_user(&self) -> Option<User> {
        self.user
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn log_in(&self, user: User) {
        info!("session signed in as {}", user.id);
        *self
            .user
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(user);
    }

    pub fn log_out(&self) {
        let previous = self
            .user
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(user) = previous {
            info!("session for {} signed out", user.id);
        }
    }
}
