use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{Duration, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    core::{
        bootstrap::{DEFAULT_PAGE_SIZE, PageCursor},
        bucket::BucketSpec,
        commit::{CommitOutcome, MirrorChange},
        mirror::{BucketMirror, ConsistencyError, MirrorError},
    },
    fetch::{FetchError, PageSource},
    record::{MirroredRecord, Record},
    transport::{
        events::{Inbound, LinkEvent},
        frame::{CommitPayload, Frame, Opcode, RegisterGuild},
        handle::LinkHandle,
        link::{LinkError, LinkState},
    },
    types::{BucketKey, CommitType, EntityId, PageIndex, ScopeId},
    wire::error::FormatError,
};

use super::events::SyncEvent;

/// Failures seen through [`SyncHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The link refused a frame.
    #[error(transparent)]
    Link(#[from] LinkError),
    /// A bucket already owns this `(scope, commit_type)`.
    #[error("bucket {0} is already registered")]
    DuplicateBucket(BucketKey),
    /// No bucket has this key.
    #[error("unknown bucket {0}")]
    UnknownBucket(BucketKey),
    /// The runtime task stopped.
    #[error("runtime stopped")]
    ChannelClosed,
}

/// Why one bootstrap page failed.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The page could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The page could not be decoded.
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Runtime tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Records requested per bootstrap page.
    pub page_size: u32,
    /// Period of the forced merge of staged entities.
    pub merge_interval_ms: u64,
    /// Capacity of the [`SyncEvent`] broadcast.
    pub event_capacity: usize,
    /// Capacity of the command queue.
    pub command_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            merge_interval_ms: 10_000,
            event_capacity: 1024,
            command_capacity: 256,
        }
    }
}

/// Where a bucket is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketPhase {
    /// Pages are being fetched; commit frames are dropped.
    Bootstrapping,
    /// Commit frames are applied.
    Live,
    /// The last bootstrap failed; content is whatever landed before.
    Failed,
}

/// Point-in-time view of one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketStatus {
    /// Routing key.
    pub key: BucketKey,
    /// Bucket name.
    pub name: String,
    /// Lifecycle phase.
    pub phase: BucketPhase,
    /// Mirrored record count.
    pub len: usize,
    /// Staged entities not yet merged.
    pub pending: usize,
    /// Commit types with a cycle in progress.
    pub open_commits: Vec<CommitType>,
    /// Pages merged by the current bootstrap.
    pub pages: u32,
    /// Records merged by the current bootstrap.
    pub received: usize,
}

/// Cloneable handle to the sync runtime.
pub struct SyncHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<SyncEvent>,
}

impl Clone for SyncHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

enum Command {
    AddBucket {
        scope: ScopeId,
        spec: BucketSpec,
        resp: oneshot::Sender<Result<BucketKey, RuntimeError>>,
    },
    Rebootstrap {
        key: BucketKey,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Records {
        key: BucketKey,
        resp: oneshot::Sender<Result<Vec<MirroredRecord>, RuntimeError>>,
    },
    Get {
        key: BucketKey,
        id: EntityId,
        resp: oneshot::Sender<Result<Option<MirroredRecord>, RuntimeError>>,
    },
    Status {
        key: BucketKey,
        resp: oneshot::Sender<Result<BucketStatus, RuntimeError>>,
    },
    Buckets {
        resp: oneshot::Sender<Vec<BucketStatus>>,
    },
    MergeNow {
        resp: oneshot::Sender<usize>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

struct PageLoaded {
    key: BucketKey,
    generation: u64,
    page: PageIndex,
    result: Result<Vec<Record>, String>,
    last: bool,
}

struct Slot {
    mirror: BucketMirror,
    phase: BucketPhase,
    pages: u32,
    received: usize,
    generation: u64,
    cancel: Arc<AtomicBool>,
}

impl Slot {
    fn status(&self, key: &BucketKey) -> BucketStatus {
        BucketStatus {
            key: key.clone(),
            name: self.mirror.spec().name.clone(),
            phase: self.phase,
            len: self.mirror.len(),
            pending: self.mirror.pending_len(),
            open_commits: self.mirror.open_commit_types(),
            pages: self.pages,
            received: self.received,
        }
    }
}

/// Starts the runtime loop.
///
/// The loop registers itself for the three commit opcodes on `link`, fetches
/// bootstrap pages from `pages`, and stops on [`SyncHandle::shutdown`], when
/// every handle is dropped, or after a consistency fault. It never closes
/// `link`.
pub fn spawn_sync<P: PageSource>(link: LinkHandle, pages: Arc<P>, config: SyncConfig) -> SyncHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(config.command_capacity.max(1));
    let (events_tx, _) = broadcast::channel::<SyncEvent>(config.event_capacity.max(1));
    let (page_tx, page_rx) = mpsc::unbounded_channel::<PageLoaded>();
    let runtime = Runtime {
        config,
        link,
        pages,
        buckets: BTreeMap::new(),
        scopes: Vec::new(),
        link_ready: false,
        events_tx: events_tx.clone(),
        page_tx,
    };
    tokio::spawn(runtime.run(cmd_rx, page_rx));

    SyncHandle { cmd_tx, events_tx }
}

impl SyncHandle {
    /// New receiver for runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    /// Registers a bucket under `scope` and starts its bootstrap.
    pub async fn add_bucket(&self, scope: impl Into<ScopeId>, spec: BucketSpec) -> Result<BucketKey, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::AddBucket {
                scope: scope.into(),
                spec,
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Runs the bootstrap again, merging over current content.
    pub async fn rebootstrap(&self, key: BucketKey) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Rebootstrap { key, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Records of one bucket in insertion order.
    pub async fn records(&self, key: BucketKey) -> Result<Vec<MirroredRecord>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Records { key, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// One record, if mirrored.
    pub async fn get(&self, key: BucketKey, id: impl Into<EntityId>) -> Result<Option<MirroredRecord>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Get {
                key,
                id: id.into(),
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Status of one bucket.
    pub async fn status(&self, key: BucketKey) -> Result<BucketStatus, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Status { key, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Status of every bucket, in key order.
    pub async fn buckets(&self) -> Result<Vec<BucketStatus>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Buckets { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Merges staged entities in every live bucket without waiting for the
    /// timer. Returns how many were merged.
    pub async fn merge_now(&self) -> Result<usize, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::MergeNow { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Stops the runtime. Bootstraps in flight are cancelled.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}

struct Runtime<P> {
    config: SyncConfig,
    link: LinkHandle,
    pages: Arc<P>,
    buckets: BTreeMap<BucketKey, Slot>,
    scopes: Vec<ScopeId>,
    link_ready: bool,
    events_tx: broadcast::Sender<SyncEvent>,
    page_tx: mpsc::UnboundedSender<PageLoaded>,
}

/// Fatal fault: the bucket whose bookkeeping diverged.
struct Fault {
    key: BucketKey,
    error: ConsistencyError,
}

impl<P: PageSource> Runtime<P> {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut page_rx: mpsc::UnboundedReceiver<PageLoaded>,
    ) {
        // Commit frames and link transitions arrive on one queue so a
        // disconnect is never handled ahead of a frame read before it.
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Inbound>();
        for opcode in [Opcode::CommitCreate, Opcode::CommitPutContent, Opcode::CommitFinalize] {
            if let Err(err) = self.link.register(opcode, inbound_tx.clone()).await {
                warn!(opcode = opcode.as_str(), error = %err, "could not register commit handler");
            }
        }
        drop(inbound_tx);
        if let Ok(status) = self.link.status().await {
            self.link_ready = status.state == LinkState::Ready;
        }

        let period = Duration::from_millis(self.config.merge_interval_ms.max(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inbound_alive = true;

        loop {
            let step = tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    match self.handle_command(cmd).await {
                        Some(()) => Ok(()),
                        None => break,
                    }
                }
                inbound = inbound_rx.recv(), if inbound_alive => {
                    match inbound {
                        Some(Inbound::Frame(frame)) => self.on_commit_frame(frame),
                        Some(Inbound::Link(evt)) => {
                            self.on_link_event(evt).await;
                            Ok(())
                        }
                        None => {
                            inbound_alive = false;
                            Ok(())
                        }
                    }
                }
                loaded = page_rx.recv() => {
                    match loaded {
                        Some(loaded) => self.on_page(loaded),
                        None => Ok(()),
                    }
                }
                _ = ticker.tick() => {
                    self.merge_pending();
                    Ok(())
                }
            };

            if let Err(fault) = step {
                error!(bucket = %fault.key, error = %fault.error, "mirror consistency fault, stopping");
                let _ = self.events_tx.send(SyncEvent::Faulted {
                    key: fault.key,
                    reason: fault.error.to_string(),
                });
                break;
            }
        }

        for slot in self.buckets.values() {
            slot.cancel.store(true, Ordering::Relaxed);
        }
        debug!("sync runtime stopped");
    }

    /// Returns `None` when the loop must stop.
    async fn handle_command(&mut self, cmd: Command) -> Option<()> {
        match cmd {
            Command::AddBucket { scope, spec, resp } => {
                let res = self.add_bucket(scope, spec).await;
                let _ = resp.send(res);
            }
            Command::Rebootstrap { key, resp } => {
                let res = if self.buckets.contains_key(&key) {
                    self.start_bootstrap(&key);
                    Ok(())
                } else {
                    Err(RuntimeError::UnknownBucket(key))
                };
                let _ = resp.send(res);
            }
            Command::Records { key, resp } => {
                let res = match self.buckets.get(&key) {
                    Some(slot) => Ok(slot.mirror.records_cloned()),
                    None => Err(RuntimeError::UnknownBucket(key)),
                };
                let _ = resp.send(res);
            }
            Command::Get { key, id, resp } => {
                let res = match self.buckets.get(&key) {
                    Some(slot) => Ok(slot.mirror.get(&id).cloned()),
                    None => Err(RuntimeError::UnknownBucket(key)),
                };
                let _ = resp.send(res);
            }
            Command::Status { key, resp } => {
                let res = match self.buckets.get(&key) {
                    Some(slot) => Ok(slot.status(&key)),
                    None => Err(RuntimeError::UnknownBucket(key)),
                };
                let _ = resp.send(res);
            }
            Command::Buckets { resp } => {
                let out = self.buckets.iter().map(|(key, slot)| slot.status(key)).collect();
                let _ = resp.send(out);
            }
            Command::MergeNow { resp } => {
                let _ = resp.send(self.merge_pending());
            }
            Command::Shutdown { resp } => {
                let _ = resp.send(());
                return None;
            }
        }
        Some(())
    }

    async fn add_bucket(&mut self, scope: ScopeId, spec: BucketSpec) -> Result<BucketKey, RuntimeError> {
        let key = BucketKey::new(scope.clone(), spec.commit_type);
        if self.buckets.contains_key(&key) {
            return Err(RuntimeError::DuplicateBucket(key));
        }

        info!(bucket = %spec.name, key = %key, "adding bucket");
        self.buckets.insert(
            key.clone(),
            Slot {
                mirror: BucketMirror::new(spec),
                phase: BucketPhase::Bootstrapping,
                pages: 0,
                received: 0,
                generation: 0,
                cancel: Arc::new(AtomicBool::new(false)),
            },
        );

        if !self.scopes.contains(&scope) {
            self.scopes.push(scope.clone());
            if self.link_ready {
                self.register_scope(&scope).await?;
            }
        }

        self.start_bootstrap(&key);
        Ok(key)
    }

    async fn register_scope(&self, scope: &str) -> Result<(), RuntimeError> {
        debug!(scope, "registering scope");
        self.link
            .send_payload(
                Opcode::RegisterGuild,
                &RegisterGuild {
                    guild_id: scope.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    fn start_bootstrap(&mut self, key: &BucketKey) {
        let Some(slot) = self.buckets.get_mut(key) else {
            return;
        };
        slot.cancel.store(true, Ordering::Relaxed);
        slot.cancel = Arc::new(AtomicBool::new(false));
        slot.generation += 1;
        slot.phase = BucketPhase::Bootstrapping;
        slot.pages = 0;
        slot.received = 0;

        let pages = Arc::clone(&self.pages);
        let tx = self.page_tx.clone();
        let cancel = Arc::clone(&slot.cancel);
        let spec = slot.mirror.spec().clone();
        let key = key.clone();
        let generation = slot.generation;
        let limit = self.config.page_size;
        debug!(bucket = %spec.name, key = %key, generation, "starting bootstrap");

        tokio::spawn(async move {
            let mut cursor = PageCursor::new(limit);
            while let Some(request) = cursor.next_request() {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let fetched = match pages.fetch_page(&key.scope, &spec, request).await {
                    Ok(bytes) => spec.format.decode(&bytes).map_err(BootstrapError::from),
                    Err(err) => Err(BootstrapError::from(err)),
                };
                let (result, last) = match fetched {
                    Ok(records) => {
                        let more = cursor.record_page(records.len());
                        (Ok(records), !more)
                    }
                    Err(err) => (Err(err.to_string()), true),
                };
                let msg = PageLoaded {
                    key: key.clone(),
                    generation,
                    page: request.page,
                    result,
                    last,
                };
                if tx.send(msg).is_err() || last {
                    break;
                }
            }
        });
    }

    fn on_page(&mut self, loaded: PageLoaded) -> Result<(), Fault> {
        let Some(slot) = self.buckets.get_mut(&loaded.key) else {
            return Ok(());
        };
        if slot.generation != loaded.generation || slot.phase != BucketPhase::Bootstrapping {
            debug!(key = %loaded.key, page = loaded.page, "stale bootstrap page dropped");
            return Ok(());
        }

        let records = match loaded.result {
            Ok(records) => records,
            Err(reason) => {
                fail_bootstrap(slot, &self.events_tx, loaded.key, loaded.page, reason);
                return Ok(());
            }
        };

        let count = records.len();
        let change = match slot.mirror.merge_page(records) {
            Ok(change) => change,
            Err(MirrorError::MissingKey { index, field }) => {
                let reason = format!("record {index} has no usable {field:?} key");
                fail_bootstrap(slot, &self.events_tx, loaded.key, loaded.page, reason);
                return Ok(());
            }
            Err(MirrorError::Consistency(error)) => {
                return Err(Fault {
                    key: loaded.key,
                    error,
                });
            }
        };

        slot.pages += 1;
        slot.received += count;
        debug!(key = %loaded.key, page = loaded.page, count, received = slot.received, "bootstrap page merged");
        let _ = self.events_tx.send(SyncEvent::BootstrapProgress {
            key: loaded.key.clone(),
            page: loaded.page,
            count,
            received: slot.received,
        });
        if !change.is_empty() {
            let _ = self.events_tx.send(SyncEvent::ContentChanged {
                key: loaded.key.clone(),
                change,
            });
        }

        if loaded.last {
            slot.phase = BucketPhase::Live;
            let total = slot.mirror.len();
            info!(key = %loaded.key, total, pages = slot.pages, "bootstrap complete");
            let _ = self.events_tx.send(SyncEvent::BootstrapComplete {
                key: loaded.key,
                total,
            });
        }
        Ok(())
    }

    fn on_commit_frame(&mut self, frame: Frame) -> Result<(), Fault> {
        let Some(phase) = frame.kind().and_then(Opcode::commit_phase) else {
            return Ok(());
        };
        let payload: CommitPayload = match frame.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(opcode = %frame.opcode, error = %err, "malformed commit payload dropped");
                return Ok(());
            }
        };
        let (key, event) = payload.into_event(phase);

        let Some(slot) = self.buckets.get_mut(&key) else {
            debug!(key = %key, "commit for unknown bucket dropped");
            return Ok(());
        };
        if slot.phase != BucketPhase::Live {
            debug!(key = %key, phase = ?slot.phase, "commit before bootstrap finished dropped");
            return Ok(());
        }

        let commit_id = event.commit_id.clone();
        let applied = match slot.mirror.apply_commit(event) {
            Ok(applied) => applied,
            Err(MirrorError::Consistency(error)) => return Err(Fault { key, error }),
            Err(err @ MirrorError::MissingKey { .. }) => {
                warn!(key = %key, error = %err, "commit entity dropped");
                return Ok(());
            }
        };

        match &applied.outcome {
            CommitOutcome::Ignored(reason) => {
                debug!(key = %key, commit = %commit_id, ?reason, "commit event ignored");
            }
            CommitOutcome::Finalized {
                applied: merged,
                updated,
                removed,
            } => {
                let _ = self.events_tx.send(SyncEvent::CommitFinalized {
                    key: key.clone(),
                    commit_id,
                    applied: *merged,
                    updated: *updated,
                    removed: *removed,
                });
            }
            CommitOutcome::Opened { .. } | CommitOutcome::Staged { .. } => {}
        }
        self.emit_change(key, applied.change);
        Ok(())
    }

    async fn on_link_event(&mut self, evt: LinkEvent) {
        match evt {
            LinkEvent::Connected => {
                self.link_ready = true;
                let _ = self.events_tx.send(SyncEvent::LinkUp);
                for scope in self.scopes.clone() {
                    if let Err(err) = self.register_scope(&scope).await {
                        warn!(scope = %scope, error = %err, "could not re-register scope");
                    }
                }
            }
            LinkEvent::Disconnected { .. } => {
                let was_ready = std::mem::replace(&mut self.link_ready, false);
                let discarded: usize = self
                    .buckets
                    .values_mut()
                    .map(|slot| slot.mirror.abandon_open_commits())
                    .sum();
                if was_ready || discarded > 0 {
                    let _ = self.events_tx.send(SyncEvent::LinkDown);
                }
            }
        }
    }

    fn merge_pending(&mut self) -> usize {
        let mut merged = 0;
        let mut changes: Vec<(BucketKey, MirrorChange)> = Vec::new();
        for (key, slot) in self.buckets.iter_mut() {
            if slot.phase != BucketPhase::Live || slot.mirror.pending_len() == 0 {
                continue;
            }
            let change = slot.mirror.apply_pending();
            merged += change.ingested.len();
            changes.push((key.clone(), change));
        }
        if merged > 0 {
            debug!(merged, "periodic merge");
        }
        for (key, change) in changes {
            self.emit_change(key, change);
        }
        merged
    }

    fn emit_change(&self, key: BucketKey, change: MirrorChange) {
        if change.is_empty() {
            return;
        }
        let _ = self.events_tx.send(SyncEvent::ContentChanged { key, change });
    }
}

fn fail_bootstrap(
    slot: &mut Slot,
    events_tx: &broadcast::Sender<SyncEvent>,
    key: BucketKey,
    page: PageIndex,
    reason: String,
) {
    warn!(key = %key, page, reason = %reason, "bootstrap failed");
    slot.phase = BucketPhase::Failed;
    slot.cancel.store(true, Ordering::Relaxed);
    let _ = events_tx.send(SyncEvent::BootstrapFailed { key, page, reason });
}
