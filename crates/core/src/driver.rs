//! The block-file driver.
//!
//! Files are sequences of fixed-size blocks stored on remote nodes. The
//! driver keeps, per path, the list of (block, node) pairs making up the
//! file, and turns file operations into protocol exchanges:
//!
//! ```text
//! read  ──► cache hit? ──yes──► copy slot
//!              │no
//!              ▼
//!          OBTAIN_BLOCK ──► registry ──► cache ──► copy slot
//!
//! write at end of file ──► CREATE_BLOCK ──► block list, registry, cache
//! write inside file    ──► (cache | OBTAIN_BLOCK) ──► merge ──► UPDATE_BLOCK
//! ```
//!
//! # Endpoint lifecycle
//!
//! The endpoint is initialized lazily by the first `open`: the driver sends
//! INIT_ENDPOINT to learn its local node id and allocates the sequence
//! registry, block cache and file table. `shutdown` releases them, sends
//! STOP_ENDPOINT, and closes the cache. A shut-down driver rejects every
//! further call.
//!
//! # Sequencing
//!
//! Every request carries the driver's own sender sequence, which advances
//! once per encoded request. Requests about an existing block carry the
//! receiver sequence last reported by that node plus one; creation requests
//! carry the unknown sequence and learn the node's sequence from the reply.
//!
//! # Alignment
//!
//! Reads and in-place writes address one block at a time, starting at one of
//! the four slot offsets (0, 256, 512, 768) and not crossing the block end.
//! Appends write 1..=BLOCK_SIZE bytes into a fresh zero-filled block.
//!
//! # Failure
//!
//! Nothing is retried. An operation that fails part way leaves the file's
//! block list, size and position as they were. A completed OBTAIN inside a
//! failed write still commits the node's receiver sequence. The cache is
//! only filled once UPDATE succeeds.

use crate::cache::{BlockCache, CacheStats};
use crate::error::{Error, HandleError, PacketError, PositionError, Result};
use crate::file_table::{BlockLocation, FileHandle, FileStat, FileTable};
use crate::metrics::DriverMetrics;
use crate::packet::{
    zeroed_block, Block, NodeId, Operation, Packet, SeqNum, BLOCK_SIZE, BLOCK_UNKNOWN,
    INITIAL_SEQ, NODE_UNKNOWN, SEQ_UNKNOWN,
};
use crate::sequence::SequenceRegistry;
use crate::transport::Transport;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Granularity of intra-block offsets
pub const SLOT_SIZE: usize = 256;

/// Default number of cached blocks
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Number of blocks the cache holds (0 disables caching)
    pub cache_capacity: usize,

    /// Sender sequence of the INIT_ENDPOINT request
    pub initial_seq: SeqNum,
}

impl DriverConfig {
    pub fn with_cache_capacity(cache_capacity: usize) -> Self {
        Self {
            cache_capacity,
            ..Self::default()
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            initial_seq: INITIAL_SEQ,
        }
    }
}

/// What `shutdown` released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Files known to the file table
    pub files: usize,

    /// Blocks referenced by those files
    pub blocks: usize,

    /// Remote nodes tracked by the sequence registry
    pub nodes: usize,

    /// Final cache counters
    pub cache: CacheStats,
}

/// State that exists between endpoint initialization and shutdown.
#[derive(Debug)]
struct Endpoint {
    local_node: NodeId,
    local_seq: SeqNum,
    registry: SequenceRegistry,
    cache: BlockCache,
    files: FileTable,
}

#[derive(Debug)]
enum State {
    Uninitialized,
    Initialized(Box<Endpoint>),
    Shutdown,
}

/// A block-file driver talking to one block service through `T`.
pub struct Driver<T: Transport> {
    transport: T,
    config: DriverConfig,
    metrics: DriverMetrics,
    state: State,
}

// The transport is usually a closure, so it is left out.
impl<T: Transport> fmt::Debug for Driver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Driver<T> {
    /// Create a driver with the default configuration.
    ///
    /// No exchange happens until the first `open`.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, DriverConfig::default())
    }

    pub fn with_config(transport: T, config: DriverConfig) -> Self {
        Self {
            transport,
            config,
            metrics: DriverMetrics::new(),
            state: State::Uninitialized,
        }
    }

    /// Open `path` for reading and writing.
    ///
    /// The first call initializes the endpoint. Opening a known path returns
    /// its existing handle with the position reset to 0; the contents are
    /// kept.
    pub fn open(&mut self, path: &str) -> Result<FileHandle> {
        if let State::Uninitialized = self.state {
            self.init()?;
        }

        let endpoint = match &mut self.state {
            State::Initialized(endpoint) => endpoint,
            _ => return Err(Error::Shutdown),
        };

        let handle = endpoint.files.open(path);
        self.metrics.opens += 1;
        debug!(path, %handle, "opened file");
        Ok(handle)
    }

    /// Read `len` bytes at the current position.
    pub fn read(&mut self, handle: FileHandle, len: usize) -> Result<Vec<u8>> {
        let (endpoint, transport, metrics) = self.parts(handle)?;

        let entry = endpoint.files.get(handle)?;
        let (position, size) = (entry.position, entry.size);
        if position >= size {
            return Err(PositionError::ReadPastEnd { position, size }.into());
        }
        let offset = slot_offset(position, len)?;
        let location = entry
            .block_at(position)
            .ok_or(PositionError::ReadPastEnd { position, size })?;

        let block = endpoint.load_block(transport, metrics, location)?;
        let bytes = block[offset..offset + len].to_vec();

        endpoint.files.get_mut(handle)?.position += len;
        metrics.reads += 1;
        metrics.bytes_read += len as u64;
        Ok(bytes)
    }

    /// Write `data` at the current position.
    ///
    /// At the end of the file this appends a new block; inside the file it
    /// rewrites one slot-aligned range of an existing block.
    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize> {
        let (endpoint, transport, metrics) = self.parts(handle)?;

        let entry = endpoint.files.get(handle)?;
        let (position, size) = (entry.position, entry.size);
        let len = data.len();

        if position > size {
            return Err(PositionError::WriteBeyondEnd { position, size }.into());
        }

        if position == size {
            if len == 0 || len > BLOCK_SIZE {
                return Err(Error::Alignment { offset: 0, len });
            }

            let mut block = zeroed_block();
            block[..len].copy_from_slice(data);
            let location = endpoint.create_block(transport, metrics, block)?;
            endpoint.files.get_mut(handle)?.push_block(location);
        } else {
            let offset = slot_offset(position, len)?;
            let location = entry
                .block_at(position)
                .ok_or(PositionError::WriteBeyondEnd { position, size })?;

            // The merged block reaches the cache only once UPDATE succeeds
            let cached = endpoint
                .cache
                .get(location.node, location.block_id)
                .map(|data| Box::new(*data));
            let mut block = match cached {
                Some(block) => block,
                None => endpoint.fetch_block(transport, metrics, location)?,
            };
            block[offset..offset + len].copy_from_slice(data);
            endpoint.update_block(transport, metrics, location, block)?;
        }

        endpoint.files.get_mut(handle)?.position += len;
        metrics.writes += 1;
        metrics.bytes_written += len as u64;
        Ok(len)
    }

    /// Move the position to `offset`, which must be inside the file.
    pub fn seek(&mut self, handle: FileHandle, offset: usize) -> Result<usize> {
        let (endpoint, _, metrics) = self.parts(handle)?;

        let entry = endpoint.files.get_mut(handle)?;
        if offset >= entry.size {
            warn!(%handle, offset, size = entry.size, "seek past end of file");
            return Err(PositionError::SeekPastEnd {
                offset,
                size: entry.size,
            }
            .into());
        }

        entry.position = offset;
        metrics.seeks += 1;
        Ok(offset)
    }

    /// Close the file. Its blocks stay known for a later reopen.
    pub fn close(&mut self, handle: FileHandle) -> Result<()> {
        let (endpoint, _, metrics) = self.parts(handle)?;
        endpoint.files.close(handle)?;
        metrics.closes += 1;
        debug!(%handle, "closed file");
        Ok(())
    }

    /// Release all state, stop the endpoint, and close the cache.
    pub fn shutdown(&mut self) -> Result<ShutdownReport> {
        let endpoint = match std::mem::replace(&mut self.state, State::Shutdown) {
            State::Initialized(endpoint) => endpoint,
            State::Uninitialized => {
                self.metrics.complete();
                info!("shut down driver that was never initialized");
                return Ok(ShutdownReport::default());
            }
            State::Shutdown => return Err(Error::Shutdown),
        };

        let Endpoint {
            local_node,
            local_seq,
            registry,
            cache,
            files,
        } = *endpoint;

        let file_count = files.len();
        let block_count = files.total_blocks();
        drop(files);
        info!("closed file table, deleting {file_count} files ({block_count} blocks)");

        let node_count = registry.len();
        for entry in registry.iter() {
            debug!(node = entry.node, last_seq = entry.last_seq, "releasing node sequence");
        }
        drop(registry);
        info!("closed node-sequence map, deleting {node_count} nodes");

        let request = Packet::new(
            local_node,
            NODE_UNKNOWN,
            BLOCK_UNKNOWN,
            Operation::StopEndpoint,
            local_seq,
            SEQ_UNKNOWN,
        );
        let stopped = request
            .encode()
            .map_err(Error::from)
            .and_then(|bytes| post(&mut self.transport, &mut self.metrics, &request, &bytes));

        let cache_stats = cache.close();
        self.metrics.cache = Some(cache_stats);
        self.metrics.complete();

        if let Err(err) = stopped {
            error!(%err, "failed to stop endpoint");
            return Err(err);
        }

        info!(local_node, "shut down scatter/gather driver");
        Ok(ShutdownReport {
            files: file_count,
            blocks: block_count,
            nodes: node_count,
            cache: cache_stats,
        })
    }

    /// Size, position and block count of a known file (open or closed).
    pub fn stat(&mut self, handle: FileHandle) -> Result<FileStat> {
        let (endpoint, _, _) = self.parts(handle)?;
        Ok(endpoint.files.lookup(handle)?.stat())
    }

    /// Local node id assigned by the service, once initialized.
    pub fn local_node(&self) -> Option<NodeId> {
        match &self.state {
            State::Initialized(endpoint) => Some(endpoint.local_node),
            _ => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, State::Initialized(_))
    }

    pub fn is_shut_down(&self) -> bool {
        matches!(self.state, State::Shutdown)
    }

    /// Last sequence recorded for `node` (0 if unknown or not initialized).
    pub fn sequence_of(&self, node: NodeId) -> SeqNum {
        match &self.state {
            State::Initialized(endpoint) => endpoint.registry.lookup(node),
            _ => 0,
        }
    }

    /// Current cache counters, while initialized.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        match &self.state {
            State::Initialized(endpoint) => Some(endpoint.cache.stats()),
            _ => None,
        }
    }

    /// Whether a block is cached, without touching its recency.
    pub fn is_cached(&self, location: BlockLocation) -> bool {
        match &self.state {
            State::Initialized(endpoint) => {
                endpoint.cache.contains(location.node, location.block_id)
            }
            _ => false,
        }
    }

    /// Location of the block holding byte `offset` of a known file.
    pub fn block_location(
        &mut self,
        handle: FileHandle,
        offset: usize,
    ) -> Result<Option<BlockLocation>> {
        let (endpoint, _, _) = self.parts(handle)?;
        Ok(endpoint.files.lookup(handle)?.block_at(offset))
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn metrics(&self) -> &DriverMetrics {
        &self.metrics
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// INIT_ENDPOINT exchange and allocation of the per-endpoint state.
    fn init(&mut self) -> Result<()> {
        info!("initializing local endpoint");

        let request = Packet::new(
            NODE_UNKNOWN,
            NODE_UNKNOWN,
            BLOCK_UNKNOWN,
            Operation::InitEndpoint,
            self.config.initial_seq,
            SEQ_UNKNOWN,
        );

        let response = request
            .encode()
            .map_err(Error::from)
            .and_then(|bytes| post(&mut self.transport, &mut self.metrics, &request, &bytes))
            .map_err(|err| {
                error!(%err, "endpoint initialization failed");
                Error::Init(Box::new(err))
            })?;

        if response.local_node == NODE_UNKNOWN {
            error!("service returned the unknown node id as local id");
            return Err(Error::Init(Box::new(PacketError::BadLocalId.into())));
        }

        let endpoint = Endpoint {
            local_node: response.local_node,
            local_seq: next_seq(self.config.initial_seq),
            registry: SequenceRegistry::new(),
            cache: BlockCache::new(self.config.cache_capacity),
            files: FileTable::new(),
        };
        info!(local_node = endpoint.local_node, "completed endpoint initialization");

        self.state = State::Initialized(Box::new(endpoint));
        Ok(())
    }

    /// Split borrows of the endpoint, transport and metrics.
    fn parts(
        &mut self,
        handle: FileHandle,
    ) -> Result<(&mut Endpoint, &mut T, &mut DriverMetrics)> {
        match &mut self.state {
            State::Initialized(endpoint) => {
                Ok((&mut **endpoint, &mut self.transport, &mut self.metrics))
            }
            State::Uninitialized => Err(HandleError::Invalid(handle.index()).into()),
            State::Shutdown => Err(Error::Shutdown),
        }
    }
}

impl Endpoint {
    /// Encode, advance the sender sequence, and post.
    fn exchange<T: Transport>(
        &mut self,
        transport: &mut T,
        metrics: &mut DriverMetrics,
        request: &Packet,
    ) -> Result<Packet> {
        let bytes = request.encode()?;
        self.local_seq = next_seq(self.local_seq);
        post(transport, metrics, request, &bytes)
    }

    /// Block contents from the cache, or from the service on a miss.
    fn load_block<T: Transport>(
        &mut self,
        transport: &mut T,
        metrics: &mut DriverMetrics,
        location: BlockLocation,
    ) -> Result<Box<Block>> {
        if let Some(data) = self.cache.get(location.node, location.block_id) {
            return Ok(Box::new(*data));
        }
        self.obtain_block(transport, metrics, location)
    }

    fn obtain_block<T: Transport>(
        &mut self,
        transport: &mut T,
        metrics: &mut DriverMetrics,
        location: BlockLocation,
    ) -> Result<Box<Block>> {
        let data = self.fetch_block(transport, metrics, location)?;
        self.cache.put(location.node, location.block_id, &data);
        Ok(data)
    }

    /// OBTAIN exchange without touching the cache.
    ///
    /// A completed exchange commits the receiver sequence even if the caller
    /// fails later.
    fn fetch_block<T: Transport>(
        &mut self,
        transport: &mut T,
        metrics: &mut DriverMetrics,
        location: BlockLocation,
    ) -> Result<Box<Block>> {
        let request = Packet::new(
            self.local_node,
            location.node,
            location.block_id,
            Operation::ObtainBlock,
            self.local_seq,
            self.registry.next_for(location.node),
        );

        let response = self.exchange(transport, metrics, &request)?;
        let data = match response.data {
            Some(data) => data,
            None => {
                metrics.bad_responses += 1;
                return Err(PacketError::BadBlockData.into());
            }
        };

        self.registry.record(location.node, response.receiver_seq);
        metrics.blocks_obtained += 1;
        Ok(data)
    }

    fn create_block<T: Transport>(
        &mut self,
        transport: &mut T,
        metrics: &mut DriverMetrics,
        data: Box<Block>,
    ) -> Result<BlockLocation> {
        let request = Packet::new(
            self.local_node,
            NODE_UNKNOWN,
            BLOCK_UNKNOWN,
            Operation::CreateBlock,
            self.local_seq,
            SEQ_UNKNOWN,
        )
        .with_data(data);

        let response = self.exchange(transport, metrics, &request)?;
        if response.remote_node == NODE_UNKNOWN {
            metrics.bad_responses += 1;
            return Err(PacketError::BadRemoteId.into());
        }
        if response.block_id == BLOCK_UNKNOWN {
            metrics.bad_responses += 1;
            return Err(PacketError::BadBlockId.into());
        }

        let location = BlockLocation {
            block_id: response.block_id,
            node: response.remote_node,
        };
        self.registry.record(location.node, response.receiver_seq);
        if let Some(data) = &request.data {
            self.cache.put(location.node, location.block_id, data);
        }
        metrics.blocks_created += 1;
        debug!(
            node = location.node,
            block_id = location.block_id,
            "created block"
        );
        Ok(location)
    }

    fn update_block<T: Transport>(
        &mut self,
        transport: &mut T,
        metrics: &mut DriverMetrics,
        location: BlockLocation,
        data: Box<Block>,
    ) -> Result<()> {
        let request = Packet::new(
            self.local_node,
            location.node,
            location.block_id,
            Operation::UpdateBlock,
            self.local_seq,
            self.registry.next_for(location.node),
        )
        .with_data(data);

        let response = self.exchange(transport, metrics, &request)?;

        self.registry.update(location.node, response.receiver_seq);
        if let Some(data) = &request.data {
            self.cache.put(location.node, location.block_id, data);
        }
        metrics.blocks_updated += 1;
        Ok(())
    }
}

/// Post encoded `bytes` and decode the reply to `request`.
fn post<T: Transport>(
    transport: &mut T,
    metrics: &mut DriverMetrics,
    request: &Packet,
    bytes: &[u8],
) -> Result<Packet> {
    metrics.packets_sent += 1;
    debug!(
        op = %request.operation,
        remote = request.remote_node,
        block = request.block_id,
        sender_seq = request.sender_seq,
        receiver_seq = request.receiver_seq,
        "posting request"
    );

    let reply = transport.post(bytes).map_err(|err| {
        metrics.transport_failures += 1;
        error!(op = %request.operation, %err, "failed packet post");
        err
    })?;

    let response = Packet::decode(&reply).map_err(|err| {
        metrics.bad_responses += 1;
        warn!(op = %request.operation, %err, code = err.code(), "failed to decode response");
        err
    })?;

    if response.operation != request.operation {
        metrics.bad_responses += 1;
        return Err(Error::UnexpectedResponse {
            expected: request.operation,
            actual: response.operation,
        });
    }

    metrics.packets_received += 1;
    Ok(response)
}

/// Next sender sequence; 0 is reserved and skipped.
fn next_seq(seq: SeqNum) -> SeqNum {
    match seq.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

/// Offset of `position` within its block, if a `len`-byte access there is
/// slot aligned and stays inside the block.
fn slot_offset(position: usize, len: usize) -> Result<usize> {
    let offset = position % BLOCK_SIZE;
    if offset % SLOT_SIZE != 0 || len == 0 || offset + len > BLOCK_SIZE {
        return Err(Error::Alignment { offset, len });
    }
    Ok(offset)
}
