//! In-process block service for tests and the simulator.
//!
//! The service stores blocks for a fixed set of remote nodes and answers the
//! block protocol the way a real one would, including its sequence checks.
//! Requests travel through the same encoded byte format the driver uses, so
//! codec problems show up here as rejected posts.
//!
//! # Sequencing
//!
//! Each client must send strictly increasing sender sequences. For every
//! (client, node) pair the service keeps a conversation sequence: CREATE
//! advances it by one and reports the new value; the other block requests
//! must name exactly the next value.
//!
//! # Determinism
//!
//! All randomness (node ids, block ids, placement, injected failures) comes
//! from a seeded ChaCha8 RNG. Given the same seed and inputs, replies are
//! identical.

use crate::error::TransportError;
use crate::packet::{
    Block, BlockId, NodeId, Operation, Packet, SeqNum, BLOCK_UNKNOWN, NODE_UNKNOWN, SEQ_UNKNOWN,
};
use crate::transport::Transport;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Configuration for the simulated service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceConfig {
    /// Number of storage nodes blocks are spread over
    pub nodes: usize,

    /// Probability [0.0, 1.0] that a post is dropped
    pub failure_rate: f64,

    /// Random seed for determinism
    pub seed: u64,
}

impl ServiceConfig {
    /// A service that never drops a request.
    pub fn perfect(seed: u64) -> Self {
        Self {
            nodes: 4,
            failure_rate: 0.0,
            seed,
        }
    }

    /// A larger service with occasional dropped requests.
    pub fn default_with_seed(seed: u64) -> Self {
        Self {
            nodes: 8,
            failure_rate: 0.01,
            seed,
        }
    }
}

/// Counters kept by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceStats {
    /// Posts received, including dropped and rejected ones
    pub requests: u64,

    /// Posts dropped by failure injection
    pub failures: u64,

    /// Posts refused (undecodable, unknown client, bad sequence, missing block)
    pub rejected: u64,

    /// Registered clients
    pub clients: usize,

    pub blocks_stored: usize,
}

#[derive(Debug, Default)]
struct Client {
    last_sender_seq: SeqNum,

    /// Conversation sequence per storage node
    conversations: HashMap<NodeId, SeqNum>,
}

/// Simulated block service.
pub struct BlockService {
    config: ServiceConfig,
    rng: ChaCha8Rng,
    nodes: Vec<NodeId>,
    clients: HashMap<NodeId, Client>,
    blocks: HashMap<(NodeId, BlockId), Box<Block>>,

    // Statistics
    requests: u64,
    failures: u64,
    rejected: u64,
}

impl BlockService {
    /// Create a service with `config.nodes` storage nodes (at least one).
    pub fn new(config: ServiceConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let mut nodes = Vec::with_capacity(config.nodes.max(1));
        while nodes.len() < config.nodes.max(1) {
            let id = random_id(&mut rng);
            if !nodes.contains(&id) {
                nodes.push(id);
            }
        }
        info!(nodes = nodes.len(), seed = config.seed, "started block service");

        Self {
            config,
            rng,
            nodes,
            clients: HashMap::new(),
            blocks: HashMap::new(),
            requests: 0,
            failures: 0,
            rejected: 0,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Ids of the storage nodes.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Stored contents of a block.
    pub fn block(&self, node: NodeId, block_id: BlockId) -> Option<&Block> {
        self.blocks.get(&(node, block_id)).map(|data| &**data)
    }

    /// Replace a stored block behind every client's back.
    ///
    /// Returns false if the block does not exist.
    pub fn overwrite_block(&mut self, node: NodeId, block_id: BlockId, data: &Block) -> bool {
        match self.blocks.get_mut(&(node, block_id)) {
            Some(stored) => {
                stored.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Change the drop probability for subsequent posts.
    pub fn set_failure_rate(&mut self, failure_rate: f64) {
        self.config.failure_rate = failure_rate;
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            requests: self.requests,
            failures: self.failures,
            rejected: self.rejected,
            clients: self.clients.len(),
            blocks_stored: self.blocks.len(),
        }
    }

    /// Handle one encoded request and return the encoded reply.
    pub fn handle(&mut self, bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.requests += 1;

        if self.config.failure_rate > 0.0 && self.rng.gen::<f64>() < self.config.failure_rate {
            self.failures += 1;
            debug!(request = self.requests, "dropping request");
            return Err(TransportError::Dropped);
        }

        let reply = Packet::decode(bytes)
            .map_err(|err| format!("undecodable request: {err}"))
            .and_then(|request| self.dispatch(&request))
            .and_then(|reply| {
                reply
                    .encode()
                    .map_err(|err| format!("unencodable reply: {err}"))
            });

        reply.map_err(|reason| {
            self.rejected += 1;
            warn!(%reason, "rejected request");
            TransportError::Rejected(reason)
        })
    }

    fn dispatch(&mut self, request: &Packet) -> Result<Packet, String> {
        if request.operation != Operation::InitEndpoint {
            self.check_sender(request)?;
        }

        match request.operation {
            Operation::InitEndpoint => Ok(self.register(request)),
            Operation::StopEndpoint => {
                self.clients.remove(&request.local_node);
                info!(client = request.local_node, "client stopped");
                Ok(Packet::new(
                    request.local_node,
                    NODE_UNKNOWN,
                    BLOCK_UNKNOWN,
                    Operation::StopEndpoint,
                    request.sender_seq,
                    SEQ_UNKNOWN,
                ))
            }
            Operation::CreateBlock => self.create(request),
            Operation::UpdateBlock | Operation::ObtainBlock | Operation::DeleteBlock => {
                self.access(request)
            }
        }
    }

    /// INIT_ENDPOINT: allocate a client id.
    fn register(&mut self, request: &Packet) -> Packet {
        let client = loop {
            let id = random_id(&mut self.rng);
            if !self.nodes.contains(&id) && !self.clients.contains_key(&id) {
                break id;
            }
        };

        self.clients.insert(
            client,
            Client {
                last_sender_seq: request.sender_seq,
                conversations: HashMap::new(),
            },
        );
        info!(client, "registered client");

        Packet::new(
            client,
            NODE_UNKNOWN,
            BLOCK_UNKNOWN,
            Operation::InitEndpoint,
            request.sender_seq,
            SEQ_UNKNOWN,
        )
    }

    /// Known client with a fresh sender sequence.
    fn check_sender(&mut self, request: &Packet) -> Result<(), String> {
        let client = self
            .clients
            .get_mut(&request.local_node)
            .ok_or_else(|| format!("unknown client {}", request.local_node))?;

        // Serial-number comparison, so the sequence may wrap
        if (request.sender_seq.wrapping_sub(client.last_sender_seq) as i16) <= 0 {
            return Err(format!(
                "stale sender sequence {} (last {})",
                request.sender_seq, client.last_sender_seq
            ));
        }
        client.last_sender_seq = request.sender_seq;
        Ok(())
    }

    /// CREATE_BLOCK: place the payload on a random node.
    fn create(&mut self, request: &Packet) -> Result<Packet, String> {
        let data = request
            .data
            .clone()
            .ok_or_else(|| "create without payload".to_string())?;

        let node = self.nodes[self.rng.gen_range(0..self.nodes.len())];
        let block_id = loop {
            let id = random_id(&mut self.rng);
            if !self.blocks.contains_key(&(node, id)) {
                break id;
            }
        };

        // First contact with a node starts its conversation at a random point
        let start: SeqNum = self.rng.gen_range(1..1000);
        let client = self
            .clients
            .get_mut(&request.local_node)
            .ok_or_else(|| format!("unknown client {}", request.local_node))?;
        let seq = client
            .conversations
            .entry(node)
            .and_modify(|seq| *seq = seq.wrapping_add(1))
            .or_insert(start);
        let seq = *seq;

        self.blocks.insert((node, block_id), data);
        debug!(client = request.local_node, node, block_id, seq, "stored block");

        Ok(Packet::new(
            request.local_node,
            node,
            block_id,
            Operation::CreateBlock,
            request.sender_seq,
            seq,
        ))
    }

    /// UPDATE_BLOCK, OBTAIN_BLOCK and DELETE_BLOCK on an existing block.
    fn access(&mut self, request: &Packet) -> Result<Packet, String> {
        let key = (request.remote_node, request.block_id);
        if !self.blocks.contains_key(&key) {
            return Err(format!(
                "no block {} on node {}",
                request.block_id, request.remote_node
            ));
        }

        let client = self
            .clients
            .get_mut(&request.local_node)
            .ok_or_else(|| format!("unknown client {}", request.local_node))?;
        let last = client
            .conversations
            .get_mut(&request.remote_node)
            .ok_or_else(|| format!("no conversation with node {}", request.remote_node))?;
        let expected = last.wrapping_add(1);
        if request.receiver_seq != expected {
            return Err(format!(
                "receiver sequence {} out of order (expected {expected})",
                request.receiver_seq
            ));
        }
        *last = expected;

        let mut reply = Packet::new(
            request.local_node,
            request.remote_node,
            request.block_id,
            request.operation,
            request.sender_seq,
            expected,
        );

        match request.operation {
            Operation::UpdateBlock => {
                let data = request
                    .data
                    .as_ref()
                    .ok_or_else(|| "update without payload".to_string())?;
                if let Some(stored) = self.blocks.get_mut(&key) {
                    stored.copy_from_slice(&data[..]);
                }
            }
            Operation::ObtainBlock => {
                if let Some(stored) = self.blocks.get(&key) {
                    reply = reply.with_data(stored.clone());
                }
            }
            _ => {
                self.blocks.remove(&key);
            }
        }

        Ok(reply)
    }
}

impl Transport for BlockService {
    fn post(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.handle(request)
    }
}

/// Random id that is neither 0 nor the unknown sentinel.
fn random_id(rng: &mut ChaCha8Rng) -> u64 {
    rng.gen_range(1..NODE_UNKNOWN)
}
