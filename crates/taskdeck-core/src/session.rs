use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
}

impl Identity {
    pub fn new(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
        }
    }
}

// The consumable end of the identity service: who is signed in right now,
// and a watch channel that fires whenever that changes. Credential
// verification happens upstream; this handle only carries the result.
#[derive(Debug, Clone)]
pub struct Session {
    tx: Arc<watch::Sender<Option<Identity>>>,
}

impl Session {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn signed_in(identity: Identity) -> Self {
        let session = Self::new();
        session.sign_in(identity);
        session
    }

    pub fn sign_in(&self, identity: Identity) {
        info!(user = %identity.id, email = %identity.email, "session signed in");
        self.tx.send_replace(Some(identity));
    }

    pub fn sign_out(&self) {
        info!("session signed out");
        self.tx.send_replace(None);
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_signed_out() {
        let session = Session::new();
        assert!(session.current_user().is_none());
    }

    #[tokio::test]
    async fn subscribers_observe_sign_in_and_out() {
        let session = Session::new();
        let mut rx = session.subscribe();

        let user = Identity::new(Uuid::new_v4(), "ada@example.com");
        session.sign_in(user.clone());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().clone(), Some(user.clone()));
        assert_eq!(session.current_user(), Some(user));

        session.sign_out();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }

    #[test]
    fn clones_share_the_same_session() {
        let session = Session::new();
        let other = session.clone();
        other.sign_in(Identity::new(Uuid::new_v4(), "grace@example.com"));
        assert!(session.current_user().is_some());
    }
}
