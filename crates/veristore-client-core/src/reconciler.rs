//! Unread/pending payment reconciliation.
//!
//! [`PaymentNotifications`] folds three inputs into one coherent badge state:
//! the last-viewed watermark persisted on the device, the most recent history
//! fetch, and change-feed signals that trigger refetches. Fetches are
//! sequenced with a monotonically increasing request token so the visible
//! counts always reflect the most recently issued fetch; a stale in-flight
//! result resolving late is discarded, never applied.
//!
//! `new_count` is computed over the fetched page only. With the default scan
//! window of 100 it undercounts when more than a window of unseen records
//! exists; that bound is configurable and the approximation is intentional.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::feed::{ChangeCallback, ChangeFeed, FeedSubscription};
use crate::history::{HistoryRequest, HistoryTransport, PaymentRecord, PaymentStatus};
use crate::identity::Identity;
use crate::storage::{KeyValueStore, LAST_VIEWED_KEY};

pub const DEFAULT_SCAN_WINDOW: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSnapshot {
    pub count: u64,
    pub new_count: u64,
    pub has_pending: bool,
    pub has_notification: bool,
    pub is_loading: bool,
}

impl NotificationSnapshot {
    const fn loading() -> Self {
        Self {
            count: 0,
            new_count: 0,
            has_pending: false,
            has_notification: false,
            is_loading: true,
        }
    }
}

/// Derive the unread/pending counts for one fetched page.
///
/// Records strictly newer than the watermark are "new"; with no watermark yet
/// every fetched record is. `total` is the store-reported total, not the page
/// length.
#[must_use]
pub fn derive_counts(
    records: &[PaymentRecord],
    total: u64,
    watermark: Option<DateTime<Utc>>,
) -> NotificationSnapshot {
    let new_count = match watermark {
        Some(mark) => records.iter().filter(|r| r.created_at > mark).count() as u64,
        None => records.len() as u64,
    };
    let has_pending = records.iter().any(|r| r.status == PaymentStatus::Pending);

    NotificationSnapshot {
        count: total,
        new_count,
        has_pending,
        has_notification: new_count > 0 || has_pending,
        is_loading: false,
    }
}

struct ReconcilerState {
    identity: Option<Identity>,
    latest_token: u64,
    snapshot: NotificationSnapshot,
    subscription: Option<FeedSubscription>,
}

/// Handle over the reconciler. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct PaymentNotifications {
    transport: Arc<dyn HistoryTransport>,
    feed: Arc<dyn ChangeFeed>,
    kv: Arc<dyn KeyValueStore>,
    scan_window: u64,
    state: Arc<Mutex<ReconcilerState>>,
}

impl PaymentNotifications {
    #[must_use]
    pub fn new(
        transport: Arc<dyn HistoryTransport>,
        feed: Arc<dyn ChangeFeed>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            transport,
            feed,
            kv,
            scan_window: DEFAULT_SCAN_WINDOW,
            state: Arc::new(Mutex::new(ReconcilerState {
                identity: None,
                latest_token: 0,
                snapshot: NotificationSnapshot::loading(),
                subscription: None,
            })),
        }
    }

    /// Override the fixed page size scanned for "new since watermark".
    #[must_use]
    pub fn with_scan_window(mut self, scan_window: u64) -> Self {
        self.scan_window = scan_window.max(1);
        self
    }

    /// Bind to an identity: open the change feed, fetch, derive counts.
    ///
    /// Rebinding discards the previous identity's counts outright and
    /// invalidates any fetch still in flight for it.
    pub async fn mount(&self, identity: Identity) {
        let external_user_id = identity.external_user_id().to_string();

        {
            let mut state = self.state.lock().await;
            state.identity = Some(identity);
            state.latest_token += 1;
            state.snapshot = NotificationSnapshot::loading();
            // Dropping the old guard closes the previous channel.
            state.subscription = None;
        }

        let handle = self.clone();
        let on_change: ChangeCallback = Arc::new(move || {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle.refresh().await;
            });
        });
        let subscription = self.feed.subscribe(&external_user_id, on_change).await;

        {
            let mut state = self.state.lock().await;
            state.subscription = Some(subscription);
        }

        self.refresh().await;
    }

    /// Re-run the mount sequence for a new identity. Counts never merge.
    pub async fn set_identity(&self, identity: Identity) {
        self.mount(identity).await;
    }

    /// Release the change feed and forget the identity. In-flight fetches
    /// are left to complete and be discarded.
    pub async fn unmount(&self) {
        let mut state = self.state.lock().await;
        state.identity = None;
        state.latest_token += 1;
        state.subscription = None;
    }

    /// Fetch the scan page and recompute counts. Last issued fetch wins.
    pub async fn refresh(&self) {
        let (external_user_id, token) = {
            let mut state = self.state.lock().await;
            let Some(external_user_id) = state
                .identity
                .as_ref()
                .map(|identity| identity.external_user_id().to_string())
            else {
                return;
            };
            state.latest_token += 1;
            (external_user_id, state.latest_token)
        };

        let request = HistoryRequest::new(external_user_id, 1, self.scan_window);
        let result = self.transport.fetch_history(&request).await;

        let mut state = self.state.lock().await;
        if state.latest_token != token {
            // A newer fetch (or an identity switch) superseded this one.
            return;
        }

        match result {
            Ok(response) => {
                let watermark = self.load_watermark();
                state.snapshot = derive_counts(
                    &response.data,
                    response.pagination.total_records,
                    watermark,
                );
            }
            Err(error) => {
                // Fail-soft: keep last-known-good counts, settle loading.
                tracing::warn!(
                    target: "veristore.notifications",
                    error = %error,
                    "payment history fetch failed",
                );
                state.snapshot.is_loading = false;
            }
        }
    }

    /// Persist the watermark at now and zero the unread count optimistically.
    /// Pending payments keep the badge alive; viewing does not resolve them.
    pub async fn mark_as_viewed(&self) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.kv.set(LAST_VIEWED_KEY, &now);

        let mut state = self.state.lock().await;
        state.snapshot.new_count = 0;
        state.snapshot.has_notification = state.snapshot.has_pending;
    }

    pub async fn snapshot(&self) -> NotificationSnapshot {
        self.state.lock().await.snapshot
    }

    fn load_watermark(&self) -> Option<DateTime<Utc>> {
        let raw = self.kv.get(LAST_VIEWED_KEY)?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(parsed) => Some(parsed.with_timezone(&Utc)),
            // An unreadable watermark behaves like none at all.
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{BroadcastChangeFeed, ChangeEvent, ChangeKind};
    use crate::history::{
        HistoryClientError, HistoryResponse, HistorySummary, Pagination, StatusSlice,
    };
    use crate::storage::MemoryKeyValueStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::collections::{BTreeMap, VecDeque};
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc, oneshot};
    use tokio::time::timeout;

    fn record(id: &str, status: PaymentStatus, created_at: DateTime<Utc>) -> PaymentRecord {
        PaymentRecord {
            id: id.to_string(),
            payment_id: format!("wallet-{id}"),
            amount: 1.0,
            memo: "Basic Verification Plan".to_string(),
            status,
            txid: None,
            created_at,
        }
    }

    fn response_for(records: Vec<PaymentRecord>) -> HistoryResponse {
        let total = records.len() as u64;
        HistoryResponse {
            success: true,
            data: records,
            pagination: Pagination {
                page: 1,
                page_size: 100,
                total_records: total,
                total_pages: u64::from(total > 0),
            },
            summary: HistorySummary {
                total_payments: total,
                total_amount: total as f64,
                status_breakdown: BTreeMap::new(),
            },
        }
    }

    /// Serves queued responses in order; repeats the last one when drained.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HistoryResponse, HistoryClientError>>>,
        last: Mutex<Option<HistoryResponse>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<HistoryResponse, HistoryClientError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl HistoryTransport for ScriptedTransport {
        async fn fetch_history(
            &self,
            _request: &HistoryRequest,
        ) -> Result<HistoryResponse, HistoryClientError> {
            let next = self.responses.lock().await.pop_front();
            match next {
                Some(Ok(response)) => {
                    *self.last.lock().await = Some(response.clone());
                    Ok(response)
                }
                Some(Err(error)) => Err(error),
                None => match self.last.lock().await.clone() {
                    Some(response) => Ok(response),
                    None => Err(HistoryClientError::Request {
                        message: "script exhausted".to_string(),
                    }),
                },
            }
        }
    }

    /// Each fetch blocks until its gate fires; announces starts on a channel.
    struct GatedTransport {
        gates: Mutex<VecDeque<(oneshot::Receiver<()>, HistoryResponse)>>,
        started: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl HistoryTransport for GatedTransport {
        async fn fetch_history(
            &self,
            _request: &HistoryRequest,
        ) -> Result<HistoryResponse, HistoryClientError> {
            let gate = self.gates.lock().await.pop_front();
            let _ = self.started.send(());
            match gate {
                Some((release, response)) => {
                    let _ = release.await;
                    Ok(response)
                }
                None => Err(HistoryClientError::Request {
                    message: "no gate queued".to_string(),
                }),
            }
        }
    }

    fn harness(
        responses: Vec<Result<HistoryResponse, HistoryClientError>>,
    ) -> (
        PaymentNotifications,
        broadcast::Sender<ChangeEvent>,
        Arc<MemoryKeyValueStore>,
    ) {
        let (sender, _) = broadcast::channel(16);
        let kv = Arc::new(MemoryKeyValueStore::new());
        let notifications = PaymentNotifications::new(
            Arc::new(ScriptedTransport::new(responses)),
            Arc::new(BroadcastChangeFeed::new(sender.clone())),
            kv.clone(),
        );
        (notifications, sender, kv)
    }

    fn anonymous() -> Identity {
        Identity::Anonymous {
            session_id: "session_test".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_history_settles_with_zero_counts() {
        let (notifications, _sender, _kv) = harness(vec![Ok(response_for(Vec::new()))]);
        notifications.mount(anonymous()).await;

        let snapshot = notifications.snapshot().await;
        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.new_count, 0);
        assert!(!snapshot.has_pending);
        assert!(!snapshot.has_notification);
        assert!(!snapshot.is_loading);
    }

    #[tokio::test]
    async fn first_visit_marks_every_record_new() {
        let now = Utc::now();
        let (notifications, _sender, _kv) = harness(vec![Ok(response_for(vec![
            record("1", PaymentStatus::Completed, now - ChronoDuration::days(3)),
            record("2", PaymentStatus::Pending, now - ChronoDuration::days(2)),
            record("3", PaymentStatus::Completed, now - ChronoDuration::days(1)),
        ]))]);
        notifications.mount(anonymous()).await;

        let snapshot = notifications.snapshot().await;
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.new_count, 3);
        assert!(snapshot.has_pending);
        assert!(snapshot.has_notification);
    }

    #[tokio::test]
    async fn mark_as_viewed_zeroes_new_count_but_not_pending() {
        let now = Utc::now();
        let records = vec![
            record("1", PaymentStatus::Pending, now - ChronoDuration::hours(1)),
            record("2", PaymentStatus::Completed, now - ChronoDuration::hours(2)),
        ];
        let (notifications, _sender, _kv) = harness(vec![
            Ok(response_for(records.clone())),
            Ok(response_for(records)),
        ]);
        notifications.mount(anonymous()).await;
        assert_eq!(notifications.snapshot().await.new_count, 2);

        notifications.mark_as_viewed().await;
        let snapshot = notifications.snapshot().await;
        assert_eq!(snapshot.new_count, 0);
        assert!(snapshot.has_pending);
        assert!(snapshot.has_notification, "pending keeps the badge alive");

        // A refetch with no newer records keeps the unread count at zero.
        notifications.refresh().await;
        assert_eq!(notifications.snapshot().await.new_count, 0);
    }

    #[tokio::test]
    async fn mark_as_viewed_clears_notification_when_nothing_pending() {
        let now = Utc::now();
        let (notifications, _sender, _kv) = harness(vec![Ok(response_for(vec![record(
            "1",
            PaymentStatus::Completed,
            now,
        )]))]);
        notifications.mount(anonymous()).await;
        assert!(notifications.snapshot().await.has_notification);

        notifications.mark_as_viewed().await;
        let snapshot = notifications.snapshot().await;
        assert_eq!(snapshot.new_count, 0);
        assert!(!snapshot.has_notification);
    }

    #[tokio::test]
    async fn mark_as_viewed_is_idempotent_and_advances_the_watermark() {
        let (notifications, _sender, kv) = harness(vec![Ok(response_for(Vec::new()))]);
        notifications.mount(anonymous()).await;

        notifications.mark_as_viewed().await;
        let first = kv.get(LAST_VIEWED_KEY).expect("watermark persisted");
        tokio::time::sleep(Duration::from_millis(5)).await;
        notifications.mark_as_viewed().await;
        let second = kv.get(LAST_VIEWED_KEY).expect("watermark persisted");

        assert_eq!(notifications.snapshot().await.new_count, 0);
        assert!(second > first, "watermark must move forward: {first} -> {second}");
    }

    #[tokio::test]
    async fn records_newer_than_the_watermark_count_again() {
        let now = Utc::now();
        let old = record("1", PaymentStatus::Completed, now - ChronoDuration::hours(2));
        let (notifications, _sender, _kv) = harness(vec![
            Ok(response_for(vec![old.clone()])),
            Ok(response_for(vec![
                record("2", PaymentStatus::Completed, now + ChronoDuration::hours(1)),
                old,
            ])),
        ]);
        notifications.mount(anonymous()).await;
        notifications.mark_as_viewed().await;

        notifications.refresh().await;
        let snapshot = notifications.snapshot().await;
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.new_count, 1, "only the post-watermark record is new");
    }

    #[tokio::test]
    async fn pending_resolution_flips_has_pending_on_next_reconciliation() {
        let now = Utc::now();
        let (notifications, sender, _kv) = harness(vec![
            Ok(response_for(vec![record("1", PaymentStatus::Pending, now)])),
            Ok(response_for(vec![record("1", PaymentStatus::Completed, now)])),
        ]);
        notifications.mount(anonymous()).await;
        assert!(notifications.snapshot().await.has_pending);

        let _ = sender.send(ChangeEvent {
            external_user_id: "session_test".to_string(),
            kind: ChangeKind::Update,
        });

        let settled = timeout(Duration::from_secs(2), async {
            loop {
                if !notifications.snapshot().await.has_pending {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(settled.is_ok(), "feed event must trigger a refetch");
    }

    #[tokio::test]
    async fn fetch_failure_retains_last_known_good_counts() {
        let now = Utc::now();
        let (notifications, _sender, _kv) = harness(vec![
            Ok(response_for(vec![record("1", PaymentStatus::Pending, now)])),
            Err(HistoryClientError::Request {
                message: "connection refused".to_string(),
            }),
        ]);
        notifications.mount(anonymous()).await;
        let before = notifications.snapshot().await;

        notifications.refresh().await;
        let after = notifications.snapshot().await;
        assert_eq!(before, after, "failed fetch must not disturb counts");
        assert!(!after.is_loading);
    }

    #[tokio::test]
    async fn stale_fetch_results_are_discarded() {
        let now = Utc::now();
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (release_first, gate_first) = oneshot::channel();
        let (release_second, gate_second) = oneshot::channel();

        let stale = response_for(vec![record("old", PaymentStatus::Completed, now)]);
        let fresh = response_for(vec![
            record("old", PaymentStatus::Completed, now),
            record("new", PaymentStatus::Pending, now),
        ]);

        let transport = Arc::new(GatedTransport {
            gates: Mutex::new(VecDeque::from([(gate_first, stale), (gate_second, fresh)])),
            started: started_tx,
        });
        let (sender, _) = broadcast::channel(16);
        let kv = Arc::new(MemoryKeyValueStore::new());
        let notifications = PaymentNotifications::new(
            transport,
            Arc::new(BroadcastChangeFeed::new(sender)),
            kv,
        );

        // Seed the identity without fetching through mount's await.
        {
            let mut state = notifications.state.lock().await;
            state.identity = Some(anonymous());
        }

        let first = tokio::spawn({
            let notifications = notifications.clone();
            async move { notifications.refresh().await }
        });
        timeout(Duration::from_secs(1), started_rx.recv())
            .await
            .expect("first fetch issued")
            .expect("channel open");

        let second = tokio::spawn({
            let notifications = notifications.clone();
            async move { notifications.refresh().await }
        });
        timeout(Duration::from_secs(1), started_rx.recv())
            .await
            .expect("second fetch issued")
            .expect("channel open");

        // Newer fetch lands first; the stale one resolves afterwards.
        let _ = release_second.send(());
        second.await.expect("second refresh");
        let _ = release_first.send(());
        first.await.expect("first refresh");

        let snapshot = notifications.snapshot().await;
        assert_eq!(snapshot.count, 2, "stale result must not win");
        assert!(snapshot.has_pending);
    }

    #[tokio::test]
    async fn identity_switch_discards_previous_counts() {
        let now = Utc::now();
        let (notifications, _sender, _kv) = harness(vec![
            Ok(response_for(vec![
                record("1", PaymentStatus::Completed, now),
                record("2", PaymentStatus::Completed, now),
            ])),
            Ok(response_for(Vec::new())),
        ]);
        notifications.mount(anonymous()).await;
        assert_eq!(notifications.snapshot().await.count, 2);

        notifications
            .set_identity(Identity::Authenticated {
                uid: "uid-1".to_string(),
            })
            .await;
        let snapshot = notifications.snapshot().await;
        assert_eq!(snapshot.count, 0, "no merge across identities");
        assert_eq!(snapshot.new_count, 0);
    }

    #[tokio::test]
    async fn unmount_releases_the_feed_subscription() {
        let now = Utc::now();
        let (notifications, sender, _kv) = harness(vec![
            Ok(response_for(Vec::new())),
            Ok(response_for(vec![record("1", PaymentStatus::Pending, now)])),
        ]);
        notifications.mount(anonymous()).await;
        notifications.unmount().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = sender.send(ChangeEvent {
            external_user_id: "session_test".to_string(),
            kind: ChangeKind::Insert,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = notifications.snapshot().await;
        assert_eq!(snapshot.count, 0, "unmounted reconciler must not refetch");
    }

    #[test]
    fn derive_counts_without_watermark_marks_all_new() {
        let now = Utc::now();
        let records = vec![
            record("1", PaymentStatus::Completed, now),
            record("2", PaymentStatus::Completed, now),
        ];
        let snapshot = derive_counts(&records, 7, None);
        assert_eq!(snapshot.count, 7);
        assert_eq!(snapshot.new_count, 2);
        assert!(!snapshot.has_pending);
        assert!(snapshot.has_notification);
    }

    #[test]
    fn derive_counts_uses_strict_ordering_against_the_watermark() {
        let mark = Utc::now();
        let records = vec![
            record("at", PaymentStatus::Completed, mark),
            record("after", PaymentStatus::Completed, mark + ChronoDuration::seconds(1)),
        ];
        let snapshot = derive_counts(&records, 2, Some(mark));
        assert_eq!(snapshot.new_count, 1, "created_at == watermark is seen");
    }
}
