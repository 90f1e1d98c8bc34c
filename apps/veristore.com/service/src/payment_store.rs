//! Payment record store.
//!
//! Sole writer of the record set. Records are created when a checkout is
//! submitted, moved through their lifecycle by the server-side callbacks, and
//! never deleted. Every mutation publishes a row-change event on a broadcast
//! channel; the primitive the client change feed subscribes to. State is
//! held in memory and optionally snapshotted to a JSON file with an atomic
//! tmp-and-rename write.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use veristore_client_core::feed::{ChangeEvent, ChangeKind};
use veristore_client_core::history::{
    HistorySummary, Pagination, PaymentRecord, PaymentStatus, StatusSlice,
};

use crate::config::Config;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum PaymentStoreError {
    #[error("payment not found")]
    NotFound,
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{message}")]
    Conflict { message: String },
    #[error("payment is {from} and cannot become {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("{message}")]
    Persistence { message: String },
}

/// A stored row. The wire [`PaymentRecord`] omits the owning identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentRow {
    id: String,
    external_user_id: String,
    payment_id: String,
    amount: f64,
    memo: String,
    status: PaymentStatus,
    txid: Option<String>,
    created_at: DateTime<Utc>,
}

impl PaymentRow {
    fn to_record(&self) -> PaymentRecord {
        PaymentRecord {
            id: self.id.clone(),
            payment_id: self.payment_id.clone(),
            amount: self.amount,
            memo: self.memo.clone(),
            status: self.status,
            txid: self.txid.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PaymentStoreState {
    payments: Vec<PaymentRow>,
}

#[derive(Debug, Clone)]
pub struct SubmitPaymentInput {
    pub external_user_id: String,
    pub payment_id: String,
    pub amount: f64,
    pub memo: String,
}

/// One page of history plus the full-set summary.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub records: Vec<PaymentRecord>,
    pub pagination: Pagination,
    pub summary: HistorySummary,
}

#[derive(Clone)]
pub struct PaymentStore {
    state: Arc<RwLock<PaymentStoreState>>,
    path: Option<PathBuf>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PaymentStore {
    pub fn from_config(config: &Config) -> Self {
        let path = config.payment_store_path.clone();
        let state = Self::load_state(path.as_ref());
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Self {
            state: Arc::new(RwLock::new(state)),
            path,
            changes,
        }
    }

    /// Create a record for a freshly submitted checkout. Status starts at
    /// `pending`; the wallet-issued payment id must be unique.
    pub async fn submit_payment(
        &self,
        input: SubmitPaymentInput,
    ) -> Result<PaymentRecord, PaymentStoreError> {
        let external_user_id = non_empty(&input.external_user_id, "external_user_id")?;
        let payment_id = non_empty(&input.payment_id, "payment_id")?;
        if input.amount < 0.0 || !input.amount.is_finite() {
            return Err(PaymentStoreError::Validation {
                field: "amount",
                message: format!("must be a nonnegative number, got {}", input.amount),
            });
        }

        self.mutate(move |state| {
            if state.payments.iter().any(|row| row.payment_id == payment_id) {
                return Err(PaymentStoreError::Conflict {
                    message: format!("payment {payment_id} already recorded"),
                });
            }

            let row = PaymentRow {
                id: format!("pay_{}", Uuid::new_v4().simple()),
                external_user_id: external_user_id.clone(),
                payment_id,
                amount: input.amount,
                memo: input.memo.trim().to_string(),
                status: PaymentStatus::Pending,
                txid: None,
                created_at: Utc::now(),
            };
            state.payments.push(row.clone());

            Ok((
                row.to_record(),
                ChangeEvent {
                    external_user_id,
                    kind: ChangeKind::Insert,
                },
            ))
        })
        .await
    }

    /// `pending -> approved`, fired by the server approval callback.
    pub async fn approve_payment(
        &self,
        payment_id: &str,
    ) -> Result<PaymentRecord, PaymentStoreError> {
        self.transition(payment_id, PaymentStatus::Approved, None)
            .await
    }

    /// `approved -> completed`, records the settlement transaction.
    pub async fn complete_payment(
        &self,
        payment_id: &str,
        txid: &str,
    ) -> Result<PaymentRecord, PaymentStoreError> {
        let txid = non_empty(txid, "txid")?;
        self.transition(payment_id, PaymentStatus::Completed, Some(txid))
            .await
    }

    /// Cancellation is terminal and only reachable before settlement.
    pub async fn cancel_payment(
        &self,
        payment_id: &str,
    ) -> Result<PaymentRecord, PaymentStoreError> {
        self.transition(payment_id, PaymentStatus::Cancelled, None)
            .await
    }

    /// Mark an unsettled payment as failed.
    pub async fn fail_payment(
        &self,
        payment_id: &str,
    ) -> Result<PaymentRecord, PaymentStoreError> {
        self.transition(payment_id, PaymentStatus::Error, None).await
    }

    /// Summary over every record for the identifier, then the requested
    /// slice ordered newest first. Summary statistics always reflect the
    /// full set, never the page.
    pub async fn history_page(
        &self,
        external_user_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<HistoryPage, PaymentStoreError> {
        let external_user_id = non_empty(external_user_id, "external_user_id")?;
        let page = page.max(1);
        let page_size = page_size.max(1);

        let state = self.state.read().await;
        let mut rows: Vec<&PaymentRow> = state
            .payments
            .iter()
            .filter(|row| row.external_user_id == external_user_id)
            .collect();

        let total_records = rows.len() as u64;
        let total_amount = rows.iter().map(|row| row.amount).sum::<f64>();
        let mut status_breakdown = std::collections::BTreeMap::new();
        for row in &rows {
            let slice = status_breakdown
                .entry(row.status.as_str().to_string())
                .or_insert(StatusSlice {
                    count: 0,
                    amount: 0.0,
                });
            slice.count += 1;
            slice.amount += row.amount;
        }

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = (page - 1).saturating_mul(page_size) as usize;
        let records: Vec<PaymentRecord> = rows
            .iter()
            .skip(offset)
            .take(page_size as usize)
            .map(|row| row.to_record())
            .collect();

        Ok(HistoryPage {
            records,
            pagination: Pagination {
                page,
                page_size,
                total_records,
                total_pages: total_records.div_ceil(page_size),
            },
            summary: HistorySummary {
                total_payments: total_records,
                total_amount,
                status_breakdown,
            },
        })
    }

    /// Row-change notifications, one receiver per live subscription.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// The broadcast sender backing the change feed, for wiring a client
    /// subscriber to this store.
    pub fn change_sender(&self) -> broadcast::Sender<ChangeEvent> {
        self.changes.clone()
    }

    async fn transition(
        &self,
        payment_id: &str,
        to: PaymentStatus,
        txid: Option<String>,
    ) -> Result<PaymentRecord, PaymentStoreError> {
        let payment_id = non_empty(payment_id, "payment_id")?;

        self.mutate(move |state| {
            let row = state
                .payments
                .iter_mut()
                .find(|row| row.payment_id == payment_id)
                .ok_or(PaymentStoreError::NotFound)?;

            let allowed = matches!(
                (row.status, to),
                (PaymentStatus::Pending, PaymentStatus::Approved)
                    | (PaymentStatus::Approved, PaymentStatus::Completed)
                    | (PaymentStatus::Pending, PaymentStatus::Cancelled)
                    | (PaymentStatus::Approved, PaymentStatus::Cancelled)
                    | (PaymentStatus::Pending, PaymentStatus::Error)
                    | (PaymentStatus::Approved, PaymentStatus::Error)
            );
            if !allowed {
                return Err(PaymentStoreError::InvalidTransition {
                    from: row.status.as_str(),
                    to: to.as_str(),
                });
            }

            row.status = to;
            if txid.is_some() {
                row.txid = txid;
            }

            Ok((
                row.to_record(),
                ChangeEvent {
                    external_user_id: row.external_user_id.clone(),
                    kind: ChangeKind::Update,
                },
            ))
        })
        .await
    }

    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut PaymentStoreState) -> Result<(T, ChangeEvent), PaymentStoreError>,
    ) -> Result<T, PaymentStoreError> {
        let mut state = self.state.write().await;
        let (value, event) = apply(&mut state)?;
        self.persist_state(&state).await?;
        drop(state);

        // Receivers may come and go; a send with no listeners is fine.
        let _ = self.changes.send(event);
        Ok(value)
    }

    fn load_state(path: Option<&PathBuf>) -> PaymentStoreState {
        let Some(path) = path else {
            return PaymentStoreState::default();
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return PaymentStoreState::default();
            }
            Err(error) => {
                tracing::warn!(
                    target: "veristore.payment_store",
                    path = %path.display(),
                    error = %error,
                    "failed to read payment store; booting with empty state",
                );
                return PaymentStoreState::default();
            }
        };

        match serde_json::from_str::<PaymentStoreState>(&raw) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(
                    target: "veristore.payment_store",
                    path = %path.display(),
                    error = %error,
                    "failed to parse payment store; booting with empty state",
                );
                PaymentStoreState::default()
            }
        }
    }

    async fn persist_state(&self, snapshot: &PaymentStoreState) -> Result<(), PaymentStoreError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                PaymentStoreError::Persistence {
                    message: format!("failed to prepare payment store directory: {error}"),
                }
            })?;
        }

        let payload =
            serde_json::to_vec(snapshot).map_err(|error| PaymentStoreError::Persistence {
                message: format!("failed to encode payment store payload: {error}"),
            })?;

        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload)
            .await
            .map_err(|error| PaymentStoreError::Persistence {
                message: format!("failed to write payment store payload: {error}"),
            })?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|error| PaymentStoreError::Persistence {
                message: format!("failed to commit payment store payload: {error}"),
            })
    }
}

fn non_empty(value: &str, field: &'static str) -> Result<String, PaymentStoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PaymentStoreError::Validation {
            field,
            message: "must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
