//! Live reconciliation loop.
//!
//! One loop per signed-in session. It holds the four live subscriptions
//! (cases, evidence, status overrides, read-state), re-derives the whole
//! view model on every trigger and publishes it as an immutable
//! [`DashboardView`]. Triggers are source snapshots, officer commands and
//! finished background hashes. Everything runs on a single task, so passes
//! never interleave and each one sees a consistent set of inputs.
//!
//! Teardown cancels the subscriptions and in-flight hashes. Results that
//! arrive afterwards are discarded.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Semaphore};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use super::assembler::{derive, stabilize, HashState, SourceSnapshot};
use super::cancel::CancelFlag;
use super::notifier::{notification_list, Alert, NotificationDiffer, NotificationItem};
use super::status::StatusWriteReport;
use super::writer::{WriteIntent, WriteQueue};
use crate::adapters::store::{CollectionQuery, DocumentStore, SnapshotEvent, Subscription};
use crate::config::{Collections, ResolvedConfig};
use crate::domain::detection::{CaseStatus, Detection};
use crate::domain::records::{ReadStateMap, StatusOverrides};
use crate::domain::session::SessionState;
use crate::error::DashboardError;
use crate::evidence::hashing::{HashResult, HashingService};
use crate::evidence::index::{DuplicateEntry, EvidenceHashIndex, HashKey};

const ALERT_CHANNEL_CAPACITY: usize = 64;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

// ============================================================================
// Sources and connection state
// ============================================================================

/// The four live inputs of a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Cases,
    Evidence,
    Overrides,
    Reads,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Cases,
        SourceKind::Evidence,
        SourceKind::Overrides,
        SourceKind::Reads,
    ];

    pub fn collection<'a>(&self, collections: &'a Collections) -> &'a str {
        match self {
            SourceKind::Cases => &collections.cases,
            SourceKind::Evidence => &collections.evidence,
            SourceKind::Overrides => &collections.case_status,
            SourceKind::Reads => &collections.case_reads,
        }
    }

    fn query(&self, collections: &Collections) -> CollectionQuery {
        let collection = self.collection(collections);
        match self {
            SourceKind::Cases => CollectionQuery::newest_first(collection, "createdAt"),
            SourceKind::Evidence => CollectionQuery::newest_first(collection, "uploadedAt"),
            SourceKind::Overrides | SourceKind::Reads => CollectionQuery::new(collection),
        }
    }
}

/// Connection state of one source, or of the whole view when aggregated
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Offline,
    Error(String),
}

impl ConnectionState {
    /// Error and Offline end a source's stream for this lifetime
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Offline | ConnectionState::Error(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Live"),
            ConnectionState::Offline => write!(f, "Offline"),
            ConnectionState::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// Per-source connection states
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SourceStates {
    pub cases: ConnectionState,
    pub evidence: ConnectionState,
    pub overrides: ConnectionState,
    pub reads: ConnectionState,
}

impl SourceStates {
    pub fn get(&self, kind: SourceKind) -> &ConnectionState {
        match kind {
            SourceKind::Cases => &self.cases,
            SourceKind::Evidence => &self.evidence,
            SourceKind::Overrides => &self.overrides,
            SourceKind::Reads => &self.reads,
        }
    }

    fn get_mut(&mut self, kind: SourceKind) -> &mut ConnectionState {
        match kind {
            SourceKind::Cases => &mut self.cases,
            SourceKind::Evidence => &mut self.evidence,
            SourceKind::Overrides => &mut self.overrides,
            SourceKind::Reads => &mut self.reads,
        }
    }

    /// Error beats Offline beats Connecting; Connected only when all are
    pub fn aggregate(&self) -> ConnectionState {
        let states: Vec<&ConnectionState> = SourceKind::ALL.iter().map(|k| self.get(*k)).collect();

        if let Some(err) = states
            .iter()
            .find(|s| matches!(s, ConnectionState::Error(_)))
        {
            return (*err).clone();
        }
        if states.iter().any(|s| **s == ConnectionState::Offline) {
            return ConnectionState::Offline;
        }
        if states.iter().all(|s| **s == ConnectionState::Connected) {
            return ConnectionState::Connected;
        }
        ConnectionState::Connecting
    }

    /// Every source has delivered or ended
    pub fn all_resolved(&self) -> bool {
        SourceKind::ALL
            .iter()
            .all(|k| *self.get(*k) != ConnectionState::Connecting)
    }
}

// ============================================================================
// Published view
// ============================================================================

/// Immutable result of one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct DashboardView {
    /// Pass counter; 0 is the placeholder published before any snapshot
    pub pass: u64,
    pub detections: Vec<Arc<Detection>>,
    pub index: EvidenceHashIndex,
    pub sources: SourceStates,
    pub hashing_supported: bool,
    pub hashing_in_flight: usize,
    /// Alerts raised this session, newest first
    pub notifications: Vec<NotificationItem>,
    /// Most recent alerts, newest first, capped at the toast limit
    pub toasts: Vec<Alert>,
}

impl DashboardView {
    pub fn connection(&self) -> ConnectionState {
        self.sources.aggregate()
    }

    pub fn detection(&self, case_id: &str) -> Option<&Arc<Detection>> {
        self.detections.iter().find(|d| d.id == case_id)
    }

    /// Every evidence item sharing `hash`, joined with its case
    pub fn duplicate_group(&self, hash: &str) -> Vec<DuplicateEntry> {
        self.index
            .group(hash, |case_id| self.detection(case_id).map(|d| d.as_ref()))
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }

    pub fn has_unread(&self) -> bool {
        self.unread_count() > 0
    }

    /// All sources resolved and no hash outstanding
    pub fn is_settled(&self) -> bool {
        self.sources.all_resolved() && self.hashing_in_flight == 0
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Tunables for one reconciliation lifetime
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub collections: Collections,
    pub max_concurrent_hashes: usize,
    pub toast_limit: usize,
    pub system_alerts: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            collections: Collections::default(),
            max_concurrent_hashes: 4,
            toast_limit: 3,
            system_alerts: true,
        }
    }
}

impl ReconcileOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            collections: config.collections.clone(),
            max_concurrent_hashes: config.hashing.max_concurrent.max(1),
            toast_limit: config.notifications.toast_limit,
            system_alerts: config.notifications.system_alerts,
        }
    }
}

/// Starts reconciliation loops against one store
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    hasher: Arc<HashingService>,
    options: ReconcileOptions,
    clock: Clock,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        hasher: Arc<HashingService>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            hasher,
            options,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock used for missing timestamps and alert times
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Open the four subscriptions and spawn the loop.
    ///
    /// A source that cannot be subscribed is marked Offline or Error and
    /// the others carry on without it.
    #[instrument(skip_all, fields(store = self.store.name()))]
    pub async fn start(&self, session: &SessionState) -> Result<ReconcileHandle, DashboardError> {
        let officer = session
            .session()
            .map(|s| s.officer.clone())
            .ok_or(DashboardError::NotAuthenticated)?;

        let mut states = SourceStates::default();
        let mut subs = Sources::default();

        for kind in SourceKind::ALL {
            let query = kind.query(&self.options.collections);
            let collection = query.collection.clone();
            match self.store.subscribe(query).await {
                Ok(sub) => *subs.slot(kind) = Some(sub),
                Err(e) => {
                    let err = DashboardError::SubscriptionFailure {
                        collection,
                        reason: e.to_string(),
                    };
                    warn!("{}", err);
                    *states.get_mut(kind) = if e.is_unavailable() {
                        ConnectionState::Offline
                    } else {
                        ConnectionState::Error(err.to_string())
                    };
                }
            }
        }

        let initial = DashboardView {
            sources: states.clone(),
            hashing_supported: self.hasher.is_supported(),
            ..DashboardView::default()
        };
        let (view_tx, view_rx) = watch::channel(Arc::new(initial));
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();

        let core = LoopCore {
            hasher: Arc::clone(&self.hasher),
            permits: Arc::new(Semaphore::new(self.options.max_concurrent_hashes.max(1))),
            options: self.options.clone(),
            clock: Arc::clone(&self.clock),
            sources: states,
            server_overrides: StatusOverrides::new(),
            server_reads: ReadStateMap::new(),
            local_status: HashMap::new(),
            local_reads: HashSet::new(),
            snapshot: SourceSnapshot::default(),
            hashes: HashState::default(),
            in_flight: HashMap::new(),
            differ: NotificationDiffer::new(),
            alerts: Vec::new(),
            previous: Vec::new(),
            pass: 0,
            view_tx,
            alert_tx: alert_tx.clone(),
            writer: WriteQueue::spawn(Arc::clone(&self.store), self.options.collections.clone()),
            cancel: cancel.clone(),
        };

        info!(%officer, "Reconciliation started");
        let task = tokio::spawn(run(core, subs, command_rx, cancel.clone()));

        Ok(ReconcileHandle {
            view_rx,
            alert_tx,
            commands: command_tx,
            cancel,
            task: Some(task),
        })
    }
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Debug)]
enum Command {
    SetStatus {
        case_id: String,
        status: Option<CaseStatus>,
        reply: Option<oneshot::Sender<StatusWriteReport>>,
    },
    MarkRead {
        case_id: String,
    },
}

/// Caller's side of a running loop. Dropping it tears the loop down.
pub struct ReconcileHandle {
    view_rx: watch::Receiver<Arc<DashboardView>>,
    alert_tx: broadcast::Sender<Alert>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancelFlag,
    task: Option<JoinHandle<()>>,
}

impl ReconcileHandle {
    /// Latest published view
    pub fn view(&self) -> Arc<DashboardView> {
        Arc::clone(&self.view_rx.borrow())
    }

    pub fn watch(&self) -> watch::Receiver<Arc<DashboardView>> {
        self.view_rx.clone()
    }

    /// Alerts raised from now on
    pub fn alerts(&self) -> broadcast::Receiver<Alert> {
        self.alert_tx.subscribe()
    }

    /// Change a case's status (`None` unsets it). Applied locally at once
    /// and persisted in the background; false once the loop has stopped.
    pub fn set_status(&self, case_id: &str, status: Option<CaseStatus>) -> bool {
        self.commands
            .send(Command::SetStatus {
                case_id: case_id.to_string(),
                status,
                reply: None,
            })
            .is_ok()
    }

    /// Like [`set_status`](Self::set_status), then wait for both writes
    pub async fn set_status_confirmed(
        &self,
        case_id: &str,
        status: Option<CaseStatus>,
    ) -> Option<StatusWriteReport> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SetStatus {
                case_id: case_id.to_string(),
                status,
                reply: Some(reply),
            })
            .ok()?;
        rx.await.ok()
    }

    pub fn mark_read(&self, case_id: &str) -> bool {
        self.commands
            .send(Command::MarkRead {
                case_id: case_id.to_string(),
            })
            .is_ok()
    }

    /// Wait for the first view satisfying `predicate`; `None` if the loop stops first
    pub async fn wait_for(
        &self,
        predicate: impl Fn(&DashboardView) -> bool,
    ) -> Option<Arc<DashboardView>> {
        let mut rx = self.view_rx.clone();
        loop {
            let view = Arc::clone(&rx.borrow_and_update());
            if predicate(&view) {
                return Some(view);
            }
            rx.changed().await.ok()?;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Cancel and wait until subscriptions, hashes and queued writes are done
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Reconciliation task failed: {}", e);
            }
        }
    }
}

impl Drop for ReconcileHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Loop
// ============================================================================

#[derive(Default)]
struct Sources {
    cases: Option<Subscription>,
    evidence: Option<Subscription>,
    overrides: Option<Subscription>,
    reads: Option<Subscription>,
}

impl Sources {
    fn slot(&mut self, kind: SourceKind) -> &mut Option<Subscription> {
        match kind {
            SourceKind::Cases => &mut self.cases,
            SourceKind::Evidence => &mut self.evidence,
            SourceKind::Overrides => &mut self.overrides,
            SourceKind::Reads => &mut self.reads,
        }
    }

    fn cancel_all(&mut self) {
        for kind in SourceKind::ALL {
            if let Some(mut sub) = self.slot(kind).take() {
                sub.cancel();
            }
        }
    }
}

/// Next event of an open subscription; pending forever once it is gone
async fn next_event(sub: &mut Option<Subscription>) -> Option<SnapshotEvent> {
    match sub {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

enum Trigger {
    Source(SourceKind, Option<SnapshotEvent>),
    Command(Command),
    Hashed(Result<(Id, HashResult), JoinError>),
}

async fn run(
    mut core: LoopCore,
    mut subs: Sources,
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancelFlag,
) {
    let mut hashing: JoinSet<HashResult> = JoinSet::new();

    loop {
        let trigger = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => Trigger::Command(command),
                None => break,
            },
            event = next_event(&mut subs.cases) => Trigger::Source(SourceKind::Cases, event),
            event = next_event(&mut subs.evidence) => Trigger::Source(SourceKind::Evidence, event),
            event = next_event(&mut subs.overrides) => Trigger::Source(SourceKind::Overrides, event),
            event = next_event(&mut subs.reads) => Trigger::Source(SourceKind::Reads, event),
            Some(joined) = hashing.join_next_with_id(), if !hashing.is_empty() => Trigger::Hashed(joined),
        };

        if cancel.is_cancelled() {
            break;
        }

        match trigger {
            Trigger::Source(kind, event) => {
                if !core.on_source(kind, event) {
                    *subs.slot(kind) = None;
                }
            }
            Trigger::Command(command) => core.on_command(command),
            Trigger::Hashed(joined) => core.on_hashed(joined),
        }

        core.run_pass(&mut hashing);
    }

    subs.cancel_all();
    hashing.abort_all();
    // Aborted hashes must be gone before teardown returns
    while hashing.join_next().await.is_some() {}
    let passes = core.pass;
    core.writer.close().await;
    info!(passes, "Reconciliation stopped");
}

/// Mutable state owned by the loop task
struct LoopCore {
    hasher: Arc<HashingService>,
    permits: Arc<Semaphore>,
    options: ReconcileOptions,
    clock: Clock,
    sources: SourceStates,

    /// Last snapshots as delivered by the store
    server_overrides: StatusOverrides,
    server_reads: ReadStateMap,

    /// Officer changes not yet reflected in a store snapshot
    local_status: HashMap<String, Option<CaseStatus>>,
    local_reads: HashSet<String>,

    snapshot: SourceSnapshot,
    hashes: HashState,
    /// Running hash tasks and the evidence each one is hashing
    in_flight: HashMap<Id, HashKey>,
    differ: NotificationDiffer,
    /// Oldest first
    alerts: Vec<Alert>,
    previous: Vec<Arc<Detection>>,
    pass: u64,

    view_tx: watch::Sender<Arc<DashboardView>>,
    alert_tx: broadcast::Sender<Alert>,
    writer: WriteQueue,
    cancel: CancelFlag,
}

impl LoopCore {
    /// Apply one source event; false when the subscription is finished
    fn on_source(&mut self, kind: SourceKind, event: Option<SnapshotEvent>) -> bool {
        let collection = kind.collection(&self.options.collections).to_string();

        let docs = match event {
            Some(SnapshotEvent::Snapshot(docs)) => docs,
            Some(SnapshotEvent::Error(reason)) => {
                let err = DashboardError::SubscriptionFailure { collection, reason };
                warn!("{}", err);
                *self.sources.get_mut(kind) = ConnectionState::Error(err.to_string());
                return false;
            }
            None => {
                warn!(%collection, "Subscription closed by the store");
                *self.sources.get_mut(kind) = ConnectionState::Offline;
                return false;
            }
        };

        let state = self.sources.get_mut(kind);
        if *state != ConnectionState::Connected {
            info!(%collection, "Source connected");
            *state = ConnectionState::Connected;
        }

        match kind {
            SourceKind::Cases => self.snapshot.cases = docs,
            SourceKind::Evidence => self.snapshot.evidence = docs,
            SourceKind::Overrides => {
                self.server_overrides = StatusOverrides::from_documents(&docs);
                self.refresh_overrides();
            }
            SourceKind::Reads => {
                self.server_reads = ReadStateMap::from_documents(&docs);
                self.refresh_reads();
            }
        }
        true
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::SetStatus {
                case_id,
                status,
                reply,
            } => {
                debug!(
                    %case_id,
                    status = status.map(|s| s.as_str()).unwrap_or("unset"),
                    "Status changed locally"
                );
                self.local_status.insert(case_id.clone(), status);
                self.refresh_overrides();
                self.writer.submit(WriteIntent::Status {
                    case_id,
                    status,
                    reply,
                });
            }
            Command::MarkRead { case_id } => {
                self.local_reads.insert(case_id.clone());
                self.refresh_reads();
                self.writer.submit(WriteIntent::Read { case_id });
            }
        }
    }

    fn on_hashed(&mut self, joined: Result<(Id, HashResult), JoinError>) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => {
                // Panicked or cancelled; the item counts as failed
                warn!("Hash task failed: {}", e);
                let reason = format!("hash task failed: {}", e);
                if let Some(key) = self.in_flight.remove(&e.id()) {
                    self.hashes.failures.insert(key, reason);
                }
                return;
            }
        };

        let Some(key) = self.in_flight.remove(&id) else {
            return;
        };
        match result {
            Ok(outcome) => {
                self.hashes.computed.insert(key, outcome.hash);
            }
            Err(err) => {
                debug!(evidence_id = ?err.evidence_id(), "{}", err);
                let reason = match err {
                    DashboardError::HashUnavailable { reason, .. } => reason,
                    other => other.to_string(),
                };
                self.hashes.failures.insert(key, reason);
            }
        }
    }

    /// Server overrides with pending officer changes on top. A pending
    /// change is dropped once the store agrees with it.
    fn refresh_overrides(&mut self) {
        let server = &self.server_overrides;
        self.local_status
            .retain(|case_id, status| server.get(case_id) != *status);

        let now = (self.clock)();
        let mut effective = self.server_overrides.clone();
        for (case_id, status) in &self.local_status {
            effective.apply_local(case_id, *status, now);
        }
        self.snapshot.overrides = effective;
    }

    fn refresh_reads(&mut self) {
        let server = &self.server_reads;
        self.local_reads.retain(|case_id| server.is_unread(case_id));

        let mut effective = self.server_reads.clone();
        for case_id in &self.local_reads {
            effective.mark_read(case_id);
        }
        self.snapshot.reads = effective;
    }

    /// Derive, diff, queue hashing and publish
    fn run_pass(&mut self, hashing: &mut JoinSet<HashResult>) {
        let now = (self.clock)();
        let derived = derive(&self.snapshot, &self.hashes, now);
        let detections = stabilize(&self.previous, derived.detections);
        self.pass += 1;

        for detection in self.differ.diff(&detections) {
            let alert = Alert::from_detection(detection, now);
            if self.options.system_alerts {
                info!(case_id = %alert.case_id, "New case: {} at {}", alert.title, alert.location);
            } else {
                debug!(case_id = %alert.case_id, "New case");
            }
            self.writer.submit(WriteIntent::Notification(alert.record()));
            let _ = self.alert_tx.send(alert.clone());
            self.alerts.push(alert);
        }

        for item in derived.unhashed {
            let key = item.hash_key();
            if self.hashes.is_settled(&key) || self.in_flight.values().any(|k| *k == key) {
                continue;
            }
            let task = self
                .hasher
                .spawn_hash(hashing, Arc::clone(&self.permits), item);
            self.in_flight.insert(task.id(), key);
        }

        let view = DashboardView {
            pass: self.pass,
            notifications: notification_list(&self.alerts, &detections, &self.snapshot.reads),
            toasts: self
                .alerts
                .iter()
                .rev()
                .take(self.options.toast_limit)
                .cloned()
                .collect(),
            detections,
            index: derived.index,
            sources: self.sources.clone(),
            hashing_supported: self.hasher.is_supported(),
            hashing_in_flight: self.in_flight.len(),
        };
        self.previous = view.detections.clone();

        debug!(
            pass = self.pass,
            cases = view.detections.len(),
            hashing = view.hashing_in_flight,
            "Reconciliation pass complete"
        );

        if !self.cancel.is_cancelled() {
            self.view_tx.send_replace(Arc::new(view));
        }
    }
}
