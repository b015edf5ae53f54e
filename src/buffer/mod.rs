// Per-peer staging of replicate messages.
//
// BufferData is a value type holding a contiguous run of pending
// replicate messages for one follower, fed either by direct appends from
// the log append path or by reads from the log cache. PeerMessageBuffer
// owns a BufferData behind a try-lock and runs the single-slot handoff
// rendezvous that delivers the staged run to the replication sender.
//
// Locking is strictly non-blocking: contention on the buffer means
// another path is already making progress, and the loser surrenders. The
// rendezvous index and the proxy requirement live outside the lock; the
// index is an atomic exchange, so at most one handoff can be claimed.

use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::oneshot;

use crate::error::{ConsensusError, Result};
use crate::log::{LogCache, OpId, ReadContext, ReplicateRef};

// Rendezvous sentinel: no handoff request is pending.
const NO_HANDOFF: i64 = -1;

/// `last_buffered` value of an empty, unanchored buffer.
pub const UNANCHORED: i64 = -1;

pub const DEFAULT_MAX_BUFFER_FILL_BYTES: i64 = 2 * 1024 * 1024;
pub const DEFAULT_MAX_BATCH_BYTES: i64 = 1024 * 1024;

/// Byte caps applied when filling a peer buffer from the log cache.
#[derive(Debug, Clone)]
pub struct BufferOptions {
    /// Upper cap on bytes pulled from the cache in one read attempt.
    pub max_buffer_fill_bytes: i64,

    /// Per-group RPC batch cap; the buffer never fills past this total.
    pub max_batch_bytes: i64,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            max_buffer_fill_bytes: DEFAULT_MAX_BUFFER_FILL_BYTES,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

/// A contiguous run of staged replicate messages for one follower.
///
/// Indices are strictly increasing with no gaps: when non-empty the run
/// covers `[preceding_id.index + 1, last_buffered]`.
#[derive(Debug)]
pub struct BufferData {
    messages: Vec<ReplicateRef>,
    last_buffered: i64,
    preceding_id: Option<OpId>,
    for_proxying: bool,
    bytes_buffered: i64,
}

impl Default for BufferData {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferData {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            last_buffered: UNANCHORED,
            preceding_id: None,
            for_proxying: false,
            bytes_buffered: 0,
        }
    }

    /// Highest buffered index, or the anchor set by the last reset when
    /// empty. `UNANCHORED` when empty and unanchored.
    pub fn last_buffered(&self) -> i64 {
        self.last_buffered
    }

    /// Id of the entry immediately before the first staged message.
    pub fn preceding_id(&self) -> Option<&OpId> {
        self.preceding_id.as_ref()
    }

    /// Whether the staged run was assembled for proxy routing.
    pub fn for_proxying(&self) -> bool {
        self.for_proxying
    }

    pub fn bytes_buffered(&self) -> i64 {
        self.bytes_buffered
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[ReplicateRef] {
        &self.messages
    }

    /// Discard all staged messages and re-anchor at `last_index` with the
    /// given routing, so the next fill starts at `last_index + 1`.
    pub fn reset(&mut self, for_proxy: bool, last_index: i64) {
        self.messages.clear();
        self.last_buffered = last_index;
        self.preceding_id = None;
        self.for_proxying = for_proxy;
        self.bytes_buffered = 0;
    }

    /// Stage one message from the append path.
    ///
    /// The message must carry an op id (`InvalidArgument` otherwise) and
    /// must directly follow `last_buffered` (`IllegalState` on a gap; the
    /// buffer is left unchanged). The first message appended into an
    /// empty buffer donates its own id as `preceding_id`.
    pub fn append(&mut self, msg: ReplicateRef) -> Result<()> {
        let id = *msg.id().ok_or_else(|| {
            ConsensusError::InvalidArgument("replicate message has no op id".to_string())
        })?;
        if id.index != self.last_buffered + 1 {
            return Err(ConsensusError::IllegalState(format!(
                "non-contiguous append: message index {} after {}",
                id.index, self.last_buffered
            )));
        }
        if self.messages.is_empty() {
            self.preceding_id = Some(id);
        }
        self.bytes_buffered += msg.size_bytes() as i64;
        self.last_buffered = id.index;
        self.messages.push(msg);
        tracing::trace!(index = id.index, "buffered replicate message");
        Ok(())
    }

    /// Pull messages following `last_buffered` from the log cache, bounded
    /// by the remaining batch budget.
    ///
    /// `Incomplete` (the requested op is still pending append) leaves the
    /// buffer untouched; any other failure resets it. A read that stopped
    /// short of the requested fill applies its messages and then surfaces
    /// `Continue`; the caller may simply read again.
    pub fn read_from_cache<C>(
        &mut self,
        ctx: &ReadContext,
        cache: &C,
        options: &BufferOptions,
    ) -> Result<()>
    where
        C: LogCache + ?Sized,
    {
        let fill_size = options
            .max_buffer_fill_bytes
            .min((options.max_batch_bytes - self.bytes_buffered).max(0));
        let was_empty = self.messages.is_empty();

        match cache.read_ops(self.last_buffered, fill_size, ctx) {
            Ok(read) => {
                if !read.messages.is_empty() {
                    let last_index =
                        read.messages.last().and_then(|m| m.index()).ok_or_else(|| {
                            ConsensusError::IllegalState(
                                "log cache returned a message without an op id".to_string(),
                            )
                        })?;
                    self.last_buffered = last_index;
                    self.for_proxying = ctx.route_via_proxy;
                    for msg in &read.messages {
                        self.bytes_buffered += msg.size_bytes() as i64;
                    }
                    if was_empty {
                        self.preceding_id = read.preceding_op;
                    }
                    self.messages.extend(read.messages);
                }
                if read.stopped_early {
                    return Err(ConsensusError::Continue(
                        "cache read stopped short of the requested fill".to_string(),
                    ));
                }
                Ok(())
            }
            Err(e) if e.is_incomplete() => Err(e),
            Err(e) => {
                tracing::warn!(
                    peer_uuid = %ctx.peer_uuid,
                    error = %e,
                    "cache read failed, resetting peer buffer"
                );
                self.reset(false, UNANCHORED);
                Err(e)
            }
        }
    }

    /// Take the staged run for handoff. `last_buffered` and the routing
    /// flag stay put so subsequent appends and fills remain contiguous.
    pub fn move_and_reset(&mut self) -> HandedOffBufferData {
        let handed = HandedOffBufferData {
            messages: std::mem::take(&mut self.messages),
            preceding_id: self.preceding_id.take(),
            for_proxying: self.for_proxying,
        };
        self.bytes_buffered = 0;
        handed
    }
}

/// The staged run carried out of a buffer by a handoff.
#[derive(Debug)]
pub struct HandedOffBufferData {
    pub messages: Vec<ReplicateRef>,
    pub preceding_id: Option<OpId>,
    pub for_proxying: bool,
}

/// What the replication sender receives when its handoff is fulfilled.
#[derive(Debug)]
pub struct BufferHandoff {
    /// OK, or the error from the cache read that produced the run.
    pub status: Result<()>,
    pub data: HandedOffBufferData,
}

/// Per-follower buffer shared between the log append path (producer) and
/// the replication sender (consumer).
///
/// The sender posts a single outstanding request with `request_handoff`
/// and awaits the returned channel. Producers call `try_lock` on any
/// event that might make progress; whoever claims the pending index via
/// `index_for_handoff` owns the rendezvous and must `fulfill` it before
/// releasing the buffer.
pub struct PeerMessageBuffer {
    data: Mutex<BufferData>,
    options: BufferOptions,
    handoff_tx: Mutex<Option<oneshot::Sender<BufferHandoff>>>,
    handoff_initial_index: AtomicI64,
    proxy_ops_needed: AtomicBool,
}

impl PeerMessageBuffer {
    pub fn new(options: BufferOptions) -> Self {
        Self {
            data: Mutex::new(BufferData::new()),
            options,
            handoff_tx: Mutex::new(None),
            handoff_initial_index: AtomicI64::new(NO_HANDOFF),
            proxy_ops_needed: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &BufferOptions {
        &self.options
    }

    /// Try to acquire the buffer. Never blocks; `None` means another path
    /// holds it and the caller should surrender and retry later.
    pub fn try_lock(&self) -> Option<LockedBuffer<'_>> {
        self.data
            .try_lock()
            .map(|data| LockedBuffer { owner: self, data })
    }

    /// Post a handoff request for ops from `index` and return the channel
    /// the fulfilling producer resolves.
    ///
    /// At most one handoff may be outstanding per peer; a second request
    /// before the first fulfill is a programming error and panics.
    pub fn request_handoff(
        &self,
        index: i64,
        proxy_ops_needed: bool,
    ) -> oneshot::Receiver<BufferHandoff> {
        debug_assert!(index >= 0, "handoff index {index} must be non-negative");
        let (tx, rx) = oneshot::channel();
        *self.handoff_tx.lock() = Some(tx);
        self.proxy_ops_needed
            .store(proxy_ops_needed, Ordering::Release);
        let previous = self.handoff_initial_index.swap(index, Ordering::AcqRel);
        assert_eq!(
            previous, NO_HANDOFF,
            "a replicate handoff is already outstanding for this peer"
        );
        tracing::trace!(index, proxy_ops_needed, "posted replicate handoff request");
        rx
    }
}

/// Exclusive access to a peer buffer, released on drop.
pub struct LockedBuffer<'a> {
    owner: &'a PeerMessageBuffer,
    data: MutexGuard<'a, BufferData>,
}

impl LockedBuffer<'_> {
    /// Claim the pending handoff request, if any: atomically swaps the
    /// rendezvous index out and returns it. The claimant owns the
    /// rendezvous and must `fulfill` it before releasing the buffer.
    pub fn index_for_handoff(&self) -> Option<i64> {
        match self
            .owner
            .handoff_initial_index
            .swap(NO_HANDOFF, Ordering::AcqRel)
        {
            NO_HANDOFF => None,
            index => Some(index),
        }
    }

    /// Whether the buffered run matches the routing the pending request
    /// asked for.
    pub fn proxy_requirement_satisfied(&self) -> bool {
        self.owner.proxy_ops_needed.load(Ordering::Acquire) == self.data.for_proxying
    }

    /// Fill from the log cache using the buffer's configured byte caps.
    pub fn read_from_cache<C>(&mut self, ctx: &ReadContext, cache: &C) -> Result<()>
    where
        C: LogCache + ?Sized,
    {
        self.data.read_from_cache(ctx, cache, &self.owner.options)
    }

    /// Resolve the outstanding handoff with the staged run and the given
    /// status. Consumes the handle; the buffer keeps its anchor so the
    /// next handoff resumes where this one left off.
    ///
    /// A consumer that stopped waiting is tolerated: the run is dropped.
    pub fn fulfill(mut self, status: Result<()>) {
        let data = self.data.move_and_reset();
        let sender = self.owner.handoff_tx.lock().take();
        match sender {
            Some(tx) => {
                tracing::trace!(
                    messages = data.messages.len(),
                    for_proxying = data.for_proxying,
                    "fulfilling replicate handoff"
                );
                if tx.send(BufferHandoff { status, data }).is_err() {
                    tracing::trace!("handoff receiver dropped before fulfillment");
                }
            }
            None => {
                tracing::trace!("no handoff posted; discarding staged run");
            }
        }
    }
}

impl Deref for LockedBuffer<'_> {
    type Target = BufferData;

    fn deref(&self) -> &BufferData {
        &self.data
    }
}

impl DerefMut for LockedBuffer<'_> {
    fn deref_mut(&mut self) -> &mut BufferData {
        &mut self.data
    }
}
