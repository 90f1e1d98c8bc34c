//! Session identity resolution.
//!
//! Every payment record is scoped to one external user id: the wallet uid
//! when signed in, otherwise an anonymous session id minted once per device
//! and reused forever. If storage is unavailable the resolver degrades to a
//! fresh id per call; history continuity is lost but nothing fails.

use uuid::Uuid;

use crate::storage::{KeyValueStore, SESSION_ID_KEY};
use crate::wallet::WalletUser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Authenticated { uid: String },
    Anonymous { session_id: String },
}

impl Identity {
    #[must_use]
    pub fn external_user_id(&self) -> &str {
        match self {
            Self::Authenticated { uid } => uid,
            Self::Anonymous { session_id } => session_id,
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Resolve the identity current auth state and device storage imply.
///
/// An authenticated user wins outright; storage is not touched. Anonymous
/// sessions read the persisted id, minting and persisting one on first use.
#[must_use]
pub fn resolve(user: Option<&WalletUser>, kv: &dyn KeyValueStore) -> Identity {
    if let Some(user) = user {
        return Identity::Authenticated {
            uid: user.uid.clone(),
        };
    }
    Identity::Anonymous {
        session_id: get_or_create_session_id(kv),
    }
}

fn get_or_create_session_id(kv: &dyn KeyValueStore) -> String {
    if let Some(existing) = kv.get(SESSION_ID_KEY) {
        return existing;
    }
    let session_id = format!("session_{}", Uuid::new_v4());
    kv.set(SESSION_ID_KEY, &session_id);
    session_id
}
