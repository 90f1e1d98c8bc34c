//! Shared client core for the Veristore storefront: wallet authentication,
//! session identity, payment history retrieval, and the unread/pending
//! notification reconciler behind the history badge.

pub mod badge;
pub mod feed;
pub mod history;
pub mod identity;
pub mod reconciler;
pub mod storage;
pub mod tiers;
pub mod wallet;

pub use badge::{BadgeState, PanelEffect, PanelState};
pub use feed::{
    BroadcastChangeFeed, ChangeCallback, ChangeEvent, ChangeFeed, ChangeKind, FeedSubscription,
};
pub use history::{
    HistoryClientError, HistoryRequest, HistoryResponse, HistorySummary, HistoryTransport,
    HttpHistoryClient, Pagination, PaymentRecord, PaymentStatus, StatusSlice,
};
pub use identity::{Identity, resolve};
pub use reconciler::{
    DEFAULT_SCAN_WINDOW, NotificationSnapshot, PaymentNotifications, derive_counts,
};
pub use storage::{KeyValueStore, LAST_VIEWED_KEY, MemoryKeyValueStore, SESSION_ID_KEY};
pub use tiers::{ANNUAL_DISCOUNT, BillingPeriod, PricingTier, catalog};
pub use wallet::{
    AUTH_SCOPES, AuthSession, AuthenticatedUser, IncompletePayment, IncompletePaymentHandler,
    PaymentCheckout, PaymentEvent, PaymentEventSink, WalletAuthResult, WalletError, WalletSdk,
    WalletUser,
};
