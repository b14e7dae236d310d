//! Session and delegation context.
//!
//! Resolves whose story is being captured. Helpers must pick an active
//! owner first; owners always capture for themselves. The role and the
//! active owner survive restarts through the key-value store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::SessionError;
use crate::cache::KeyValueStore;
use crate::domain::{Role, UserId};

/// Key holding the persisted session
pub const SESSION_STORAGE_KEY: &str = "memoiries.activeOwner";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveOwner {
    pub id: UserId,
    pub name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    active_owner_id: Option<UserId>,
    #[serde(default)]
    active_owner_name: Option<String>,
}

pub struct SessionContext {
    store: Arc<dyn KeyValueStore>,
    role: Option<Role>,
    active_owner: Option<ActiveOwner>,
    hydrated: bool,
}

impl SessionContext {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            role: None,
            active_owner: None,
            hydrated: false,
        }
    }

    /// Load the persisted session. Safe to call repeatedly.
    pub async fn hydrate(&mut self) {
        if self.hydrated {
            return;
        }
        self.hydrated = true;

        let raw = match self.store.get(SESSION_STORAGE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Session hydrate failed");
                return;
            }
        };

        match serde_json::from_str::<StoredSession>(&raw) {
            Ok(stored) => {
                self.role = stored.role;
                self.active_owner = stored.active_owner_id.map(|id| ActiveOwner {
                    id,
                    name: stored.active_owner_name,
                });
            }
            Err(e) => warn!(error = %e, "Ignoring unreadable session"),
        }
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn active_owner(&self) -> Option<&ActiveOwner> {
        self.active_owner.as_ref()
    }

    pub async fn set_role(&mut self, role: Option<Role>) -> Result<(), SessionError> {
        self.role = role;
        self.persist().await
    }

    pub async fn set_active_owner(
        &mut self,
        id: UserId,
        name: Option<String>,
    ) -> Result<(), SessionError> {
        self.active_owner = Some(ActiveOwner { id, name });
        self.persist().await
    }

    pub async fn clear_active_owner(&mut self) -> Result<(), SessionError> {
        self.active_owner = None;
        self.persist().await
    }

    /// Forget role and active owner
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        self.store.remove(SESSION_STORAGE_KEY).await?;
        self.role = None;
        self.active_owner = None;
        Ok(())
    }

    /// Whose story a new draft belongs to
    pub fn resolve_owner(&self, requested: &UserId) -> Result<UserId, SessionError> {
        match self.role {
            Some(Role::Helper) => self
                .active_owner
                .as_ref()
                .map(|owner| owner.id.clone())
                .ok_or(SessionError::NoActiveOwner),
            _ => Ok(requested.clone()),
        }
    }

    async fn persist(&self) -> Result<(), SessionError> {
        let stored = StoredSession {
            role: self.role,
            active_owner_id: self.active_owner.as_ref().map(|o| o.id.clone()),
            active_owner_name: self.active_owner.as_ref().and_then(|o| o.name.clone()),
        };
        let json = serde_json::to_string(&stored).map_err(crate::cache::CacheError::from)?;
        self.store.set(SESSION_STORAGE_KEY, &json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryKeyValueStore;

    fn session() -> (SessionContext, Arc<MemoryKeyValueStore>) {
        let store = Arc::new(MemoryKeyValueStore::new());
        (SessionContext::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_owner_resolves_to_self() {
        let (mut session, _) = session();
        session.set_role(Some(Role::Owner)).await.unwrap();

        let owner = session.resolve_owner(&UserId::from("me")).unwrap();
        assert_eq!(owner, UserId::from("me"));
    }

    #[tokio::test]
    async fn test_helper_without_owner_is_rejected() {
        let (mut session, _) = session();
        session.set_role(Some(Role::Helper)).await.unwrap();

        let err = session.resolve_owner(&UserId::from("helper")).unwrap_err();
        assert!(matches!(err, SessionError::NoActiveOwner));
    }

    #[tokio::test]
    async fn test_helper_resolves_to_active_owner() {
        let (mut session, _) = session();
        session.set_role(Some(Role::Helper)).await.unwrap();
        session
            .set_active_owner(UserId::from("grandma"), Some("Grandma".to_string()))
            .await
            .unwrap();

        let owner = session.resolve_owner(&UserId::from("helper")).unwrap();
        assert_eq!(owner, UserId::from("grandma"));
    }

    #[tokio::test]
    async fn test_session_survives_restart() {
        let (mut session, store) = session();
        session.set_role(Some(Role::Helper)).await.unwrap();
        session
            .set_active_owner(UserId::from("grandma"), Some("Grandma".to_string()))
            .await
            .unwrap();

        let mut restored = SessionContext::new(store);
        restored.hydrate().await;
        restored.hydrate().await;

        assert_eq!(restored.role(), Some(Role::Helper));
        assert_eq!(
            restored.active_owner().map(|o| o.id.clone()),
            Some(UserId::from("grandma"))
        );
    }

    #[tokio::test]
    async fn test_reset_forgets_everything() {
        let (mut session, store) = session();
        session.set_role(Some(Role::Owner)).await.unwrap();
        session.reset().await.unwrap();

        assert!(session.role().is_none());
        assert!(store.get(SESSION_STORAGE_KEY).await.unwrap().is_none());
    }
}
