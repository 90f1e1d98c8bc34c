//! Wallet/payment SDK capability surface.
//!
//! The storefront never talks to the payment network itself; it consumes an
//! injected [`WalletSdk`] capability (the in-browser SDK in production, a
//! double in tests). Only the handshake shapes are modeled here: the
//! authenticate call, the payment checkout with its server-driven callback
//! events, and the incomplete-payment handoff the SDK requires at login.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Scopes requested at login.
pub const AUTH_SCOPES: &[&str] = &["username", "payments", "wallet_address"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletUser {
    pub uid: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAuthResult {
    pub access_token: String,
    pub user: WalletUser,
}

/// A payment the SDK found mid-flight at authenticate time. The handler is
/// expected to hand it to the server-side completion flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompletePayment {
    pub payment_id: String,
    pub amount: f64,
    pub memo: String,
    pub txid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCheckout {
    pub amount: f64,
    pub memo: String,
    pub metadata: serde_json::Value,
}

/// Callback contract of a checkout, in the order the SDK fires them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    ReadyForServerApproval { payment_id: String },
    ReadyForServerCompletion { payment_id: String, txid: String },
    Cancelled { payment_id: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("wallet sdk not available in this environment")]
    Unavailable,
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("payment failed: {0}")]
    Payment(String),
}

pub type IncompletePaymentHandler = Arc<dyn Fn(IncompletePayment) + Send + Sync>;
pub type PaymentEventSink = Arc<dyn Fn(PaymentEvent) + Send + Sync>;

#[async_trait]
pub trait WalletSdk: Send + Sync {
    async fn authenticate(
        &self,
        scopes: &[&str],
        on_incomplete_payment: IncompletePaymentHandler,
    ) -> Result<WalletAuthResult, WalletError>;

    async fn create_payment(
        &self,
        checkout: PaymentCheckout,
        events: PaymentEventSink,
    ) -> Result<(), WalletError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub uid: String,
    pub username: String,
    pub access_token: String,
}

/// Login/logout state over an injected SDK handle.
#[derive(Clone)]
pub struct AuthSession {
    sdk: Arc<dyn WalletSdk>,
    user: Arc<RwLock<Option<AuthenticatedUser>>>,
}

impl AuthSession {
    #[must_use]
    pub fn new(sdk: Arc<dyn WalletSdk>) -> Self {
        Self {
            sdk,
            user: Arc::new(RwLock::new(None)),
        }
    }

    /// Authenticate with the wallet SDK and retain the resulting user.
    ///
    /// Incomplete payments surfaced by the SDK are logged; completing them is
    /// the server callback flow's job, not the session's.
    pub async fn login(&self) -> Result<WalletUser, WalletError> {
        let on_incomplete: IncompletePaymentHandler = Arc::new(|payment: IncompletePayment| {
            tracing::info!(
                target: "veristore.wallet",
                payment_id = %payment.payment_id,
                "incomplete payment found at login",
            );
        });

        let result = self.sdk.authenticate(AUTH_SCOPES, on_incomplete).await?;
        let user = result.user.clone();
        *self.user.write().await = Some(AuthenticatedUser {
            uid: result.user.uid,
            username: result.user.username,
            access_token: result.access_token,
        });
        Ok(user)
    }

    pub async fn logout(&self) {
        *self.user.write().await = None;
    }

    pub async fn current_user(&self) -> Option<AuthenticatedUser> {
        self.user.read().await.clone()
    }
}
