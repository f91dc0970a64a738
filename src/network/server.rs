// The P2P node. One thread per peer connection, a dispatcher accepting
// new connections, and an optional miner thread. Chain mutations all go
// through the chain manager; this layer only moves messages.
//
// Connections are persistent and duplex: the handshake runs first under
// its own timeout, then both sides exchange frames on the same stream.
// Announcements are inventory-only; full blocks and transactions are
// sent on request.

use crate::config::GLOBAL_CONFIG;
use crate::core::difficulty::TARGET_DIMENSION;
use crate::core::{Block, Blockchain, FractalPow, Transaction};
use crate::error::{ChainError, Result};
use crate::network::peers::{PeerRegistry, PeerState};
use crate::network::protocol::{
    read_frame, read_frame_idle_aware, write_frame, Frame, Message, RateLimiter,
    PROTOCOL_VERSION,
};
use crate::storage::BlockInTransit;
use log::{error, info, warn};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const MAX_CONNECTIONS: usize = 8;
const HANDSHAKE_TIMEOUT_SECS: u64 = 10;
const READ_IDLE_TIMEOUT_SECS: u64 = 60;
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Headers requested per sync round
const SYNC_BATCH: u64 = 500;
/// Validation failures tolerated before a peer is dropped
const MAX_VALIDATION_STRIKES: u32 = 3;

pub struct Server {
    blockchain: Blockchain,
    listen_addr: String,
    mining_address: Option<String>,
    peers: Arc<PeerRegistry>,
    transit: Arc<BlockInTransit>,
    shutdown: Arc<AtomicBool>,
    mining_cancel: Arc<AtomicBool>,
}

impl Server {
    /// A node bound to `listen_addr`. With a mining address the node
    /// also runs a miner thread.
    pub fn new(blockchain: Blockchain, listen_addr: &str, mining_address: Option<String>) -> Self {
        Self {
            blockchain,
            listen_addr: listen_addr.to_string(),
            mining_address,
            peers: Arc::new(PeerRegistry::new(MAX_CONNECTIONS)),
            transit: Arc::new(BlockInTransit::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            mining_cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token observed by every loop in this layer; setting it drains
    /// the node within one read timeout.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Stop the node: abandons outstanding mining work and lets every
    /// peer loop drain.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.mining_cancel.store(true, Ordering::Relaxed);
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// Bind, connect to bootstrap peers, start mining if configured,
    /// and accept connections until shutdown.
    pub fn run(&self) -> Result<()> {
        let addr = self.listen_addr.as_str();
        let listener = TcpListener::bind(addr)
            .map_err(|e| ChainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| ChainError::Network(format!("Failed to set non-blocking: {e}")))?;

        info!("Node listening on {addr}");

        for peer_addr in GLOBAL_CONFIG.get_bootstrap_peers() {
            if peer_addr != addr {
                self.connect(&peer_addr);
            }
        }

        if let Some(mining_addr) = self.mining_address.clone() {
            self.spawn_miner(mining_addr);
        }

        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    let ip = peer_addr.ip().to_string();
                    if self.peers.is_blacklisted(&ip) {
                        warn!("Rejecting blacklisted {ip}");
                        let _ = stream.shutdown(Shutdown::Both);
                        continue;
                    }
                    if !self.peers.should_accept_connection() {
                        warn!("Rejecting {peer_addr}: connection limit reached");
                        let _ = stream.shutdown(Shutdown::Both);
                        continue;
                    }
                    self.spawn_session(stream, false);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }

        info!("Node on {addr} shut down");
        Ok(())
    }

    /// Dial a peer and run the session in a background thread.
    pub fn connect(&self, peer_addr: &str) {
        let peer_addr = peer_addr.to_string();
        let server = self.clone_parts();
        thread::spawn(move || {
            let socket_addr = match peer_addr.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    error!("Invalid bootstrap address {peer_addr}: {e}");
                    return;
                }
            };
            match TcpStream::connect_timeout(&socket_addr, Duration::from_secs(CONNECT_TIMEOUT_SECS))
            {
                Ok(stream) => {
                    if let Err(e) = server.run_session(stream, true) {
                        warn!("Session with {peer_addr} ended: {e}");
                    }
                }
                Err(e) => warn!("Failed to connect to bootstrap peer {peer_addr}: {e}"),
            }
        });
    }

    fn spawn_session(&self, stream: TcpStream, initiated: bool) {
        let server = self.clone_parts();
        thread::spawn(move || {
            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            if let Err(e) = server.run_session(stream, initiated) {
                warn!("Session with {peer} ended: {e}");
            }
        });
    }

    fn clone_parts(&self) -> Server {
        Server {
            blockchain: self.blockchain.clone(),
            listen_addr: self.listen_addr.clone(),
            mining_address: self.mining_address.clone(),
            peers: self.peers.clone(),
            transit: self.transit.clone(),
            shutdown: self.shutdown.clone(),
            mining_cancel: self.mining_cancel.clone(),
        }
    }

    /// Drive one peer connection from handshake to close.
    fn run_session(&self, mut stream: TcpStream, initiated: bool) -> Result<()> {
        // Sockets accepted from the non-blocking listener must read in
        // blocking mode for the timeout discipline to work
        stream
            .set_nonblocking(false)
            .map_err(|e| ChainError::Network(format!("Failed to set blocking mode: {e}")))?;
        stream
            .set_read_timeout(Some(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS)))
            .map_err(|e| ChainError::Network(format!("Failed to set read timeout: {e}")))?;

        let peer_addr = self.handshake(&mut stream, initiated)?;

        stream
            .set_read_timeout(Some(Duration::from_secs(READ_IDLE_TIMEOUT_SECS)))
            .map_err(|e| ChainError::Network(format!("Failed to set read timeout: {e}")))?;

        let result = self.session_loop(&mut stream, &peer_addr);

        self.peers.set_state(&peer_addr, PeerState::Closed);
        self.peers.remove(&peer_addr);
        let _ = stream.shutdown(Shutdown::Both);
        result
    }

    /// Exchange handshakes. The initiator sends first. Returns the
    /// peer's listening address, which keys the registry.
    fn handshake(&self, stream: &mut TcpStream, initiated: bool) -> Result<String> {
        if initiated {
            write_frame(stream, &self.handshake_frame()?)?;
        }

        let frame = read_frame(stream)?;
        if frame.version != PROTOCOL_VERSION {
            return Err(ChainError::Network(format!(
                "Unsupported protocol version {}",
                frame.version
            )));
        }

        let (network_id, node_id, height, addr_from) = match frame.message {
            Message::Handshake {
                network_id,
                node_id,
                height,
                addr_from,
            } => (network_id, node_id, height, addr_from),
            other => {
                return Err(ChainError::Network(format!(
                    "Expected handshake, got {other:?}"
                )))
            }
        };

        if network_id != GLOBAL_CONFIG.get_network_id() {
            return Err(ChainError::Network(format!(
                "Network id mismatch: {network_id}"
            )));
        }

        if !initiated {
            write_frame(stream, &self.handshake_frame()?)?;
        }

        let writer = stream
            .try_clone()
            .map_err(|e| ChainError::Network(format!("Failed to clone stream: {e}")))?;
        self.peers.register(&addr_from, &node_id, height, writer)?;

        // Behind the peer: pull headers. Caught up: go live.
        let local_height = self.blockchain.height()?;
        if height > local_height {
            self.start_sync(&addr_from)?;
        } else {
            self.peers.set_state(&addr_from, PeerState::Live);
        }

        Ok(addr_from)
    }

    fn handshake_frame(&self) -> Result<Frame> {
        let node_id = self
            .listen_addr
            .split(':')
            .next_back()
            .unwrap_or("default")
            .to_string();
        Ok(Frame::new(Message::Handshake {
            network_id: GLOBAL_CONFIG.get_network_id(),
            node_id,
            height: self.blockchain.height()?,
            addr_from: self.listen_addr.clone(),
        }))
    }

    fn session_loop(&self, stream: &mut TcpStream, peer_addr: &str) -> Result<()> {
        let mut limiter = RateLimiter::default();
        let mut strikes: u32 = 0;
        let mut idle_pings: u32 = 0;

        while !self.shutdown.load(Ordering::Relaxed) {
            let frame = match read_frame_idle_aware(stream)? {
                Some(frame) => {
                    idle_pings = 0;
                    frame
                }
                None => {
                    // Idle: probe once, close on the second silence
                    idle_pings += 1;
                    if idle_pings > 1 {
                        return Err(ChainError::Network(format!(
                            "Peer {peer_addr} idle too long"
                        )));
                    }
                    self.send_to(peer_addr, Message::Ping {
                        nonce: rand::random::<u64>(),
                    })?;
                    continue;
                }
            };

            if !limiter.allow() {
                self.peers.blacklist(peer_addr);
                return Err(ChainError::Network(format!(
                    "Peer {peer_addr} exceeded the rate limit"
                )));
            }

            match self.handle_message(peer_addr, frame.message) {
                Ok(()) => {}
                Err(e @ (ChainError::InvalidBlock(_) | ChainError::Transaction(_) | ChainError::Format(_))) => {
                    // Validation failures never mutate state; repeated
                    // offenses drop the peer
                    strikes += 1;
                    warn!("Peer {peer_addr} sent invalid payload ({strikes} strikes): {e}");
                    if strikes >= MAX_VALIDATION_STRIKES {
                        self.peers.blacklist(peer_addr);
                        return Err(ChainError::Network(format!(
                            "Peer {peer_addr} struck out"
                        )));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn handle_message(&self, peer_addr: &str, message: Message) -> Result<()> {
        match message {
            Message::Handshake { .. } => {
                // Duplicate handshake after session start is a protocol
                // violation, but harmless
                warn!("Ignoring repeated handshake from {peer_addr}");
                Ok(())
            }
            Message::Ping { nonce } => self.send_to(peer_addr, Message::Pong { nonce }),
            Message::Pong { .. } => Ok(()),
            Message::InvBlock { hash, height } => self.handle_inv_block(peer_addr, hash, height),
            Message::GetBlock { hash } => self.handle_get_block(peer_addr, &hash),
            Message::Block { block } => self.handle_block(peer_addr, &block),
            Message::InvTx { txid } => self.handle_inv_tx(peer_addr, &txid),
            Message::GetTx { txid } => self.handle_get_tx(peer_addr, &txid),
            Message::Tx { transaction } => self.handle_tx(&transaction),
            Message::GetHeaders { from_height, count } => {
                let headers = self.blockchain.get_headers(from_height, count)?;
                self.send_to(peer_addr, Message::Headers { headers })
            }
            Message::Headers { headers } => self.handle_headers(peer_addr, headers),
        }
    }

    fn handle_inv_block(&self, peer_addr: &str, hash: String, height: u64) -> Result<()> {
        self.peers.set_height(peer_addr, height);
        if self.blockchain.block_exists(&hash)? {
            return Ok(());
        }

        // A gap of more than one block means we missed announcements;
        // fall back to header sync instead of fetching out of order
        if height > self.blockchain.height()? + 1 {
            self.start_sync(peer_addr)
        } else {
            self.send_to(peer_addr, Message::GetBlock { hash })
        }
    }

    fn handle_get_block(&self, peer_addr: &str, hash: &str) -> Result<()> {
        match self.blockchain.get_block_by_hash(hash)? {
            Some(block) => self.send_to(peer_addr, Message::Block {
                block: block.serialize()?,
            }),
            None => {
                info!("Peer {peer_addr} requested unknown block {hash}");
                Ok(())
            }
        }
    }

    fn handle_block(&self, peer_addr: &str, block_bytes: &[u8]) -> Result<()> {
        let block = Block::deserialize(block_bytes)
            .map_err(|e| ChainError::Format(format!("Undecodable block: {e}")))?;
        let hash = block.get_hash().to_string();

        // Two peers may race to deliver the same block
        if self.blockchain.block_exists(&hash)? {
            self.transit.remove(&hash);
            return Ok(());
        }

        self.blockchain.add_block(&block)?;

        // Drop any in-flight candidate building on the old tip
        self.mining_cancel.store(true, Ordering::Relaxed);
        self.transit.remove(&hash);

        self.peers.broadcast(&Frame::new(Message::InvBlock {
            hash,
            height: block.get_index(),
        }));

        // Keep pulling until the backfill queue drains, then check
        // whether the peer is exhausted
        if let Some(next) = self.transit.first() {
            self.send_to(peer_addr, Message::GetBlock { hash: next })?;
        } else if let Some(peer) = self.peers.get(peer_addr) {
            let local_height = self.blockchain.height()?;
            if peer.height > local_height {
                self.start_sync(peer_addr)?;
            } else {
                self.peers.set_state(peer_addr, PeerState::Live);
            }
        }
        Ok(())
    }

    fn handle_inv_tx(&self, peer_addr: &str, txid: &str) -> Result<()> {
        if !self.blockchain.mempool().contains(txid)
            && self.blockchain.get_transaction(txid)?.is_none()
        {
            self.send_to(peer_addr, Message::GetTx {
                txid: txid.to_string(),
            })?;
        }
        Ok(())
    }

    fn handle_get_tx(&self, peer_addr: &str, txid: &str) -> Result<()> {
        if let Some(tx) = self.blockchain.mempool().get(txid) {
            self.send_to(peer_addr, Message::Tx {
                transaction: tx.serialize()?,
            })?;
        }
        Ok(())
    }

    fn handle_tx(&self, tx_bytes: &[u8]) -> Result<()> {
        let tx = Transaction::deserialize(tx_bytes)
            .map_err(|e| ChainError::Format(format!("Undecodable transaction: {e}")))?;
        let txid = tx.get_txid().to_string();

        self.blockchain.submit_transaction(tx)?;
        self.peers.broadcast(&Frame::new(Message::InvTx { txid }));
        Ok(())
    }

    fn handle_headers(&self, peer_addr: &str, headers: Vec<crate::core::BlockHeader>) -> Result<()> {
        let mut missing = Vec::new();
        for header in headers {
            if !self.blockchain.block_exists(&header.hash)? {
                missing.push(header.hash);
            }
        }

        if missing.is_empty() {
            self.peers.set_state(peer_addr, PeerState::Live);
            return Ok(());
        }

        self.transit.add_blocks(&missing);
        if let Some(first) = self.transit.first() {
            self.send_to(peer_addr, Message::GetBlock { hash: first })?;
        }
        Ok(())
    }

    fn start_sync(&self, peer_addr: &str) -> Result<()> {
        self.peers.set_state(peer_addr, PeerState::Syncing);
        let from_height = self.blockchain.height()? + 1;
        self.send_to(peer_addr, Message::GetHeaders {
            from_height,
            count: SYNC_BATCH,
        })
    }

    fn send_to(&self, peer_addr: &str, message: Message) -> Result<()> {
        match self.peers.get(peer_addr) {
            Some(peer) => peer.send(&Frame::new(message)),
            None => Err(ChainError::Network(format!(
                "No registered peer at {peer_addr}"
            ))),
        }
    }

    /// Continuous mining: assemble, grind, apply, announce. The cancel
    /// flag is flipped whenever a network block advances the tip, which
    /// restarts the loop on a fresh parent.
    fn spawn_miner(&self, mining_address: String) {
        let server = self.clone_parts();
        info!("Mining enabled, rewards to {mining_address}");

        thread::spawn(move || {
            while !server.shutdown.load(Ordering::Relaxed) {
                server.mining_cancel.store(false, Ordering::Relaxed);

                let result = server.mine_one(&mining_address);
                match result {
                    Ok(Some(block)) => {
                        info!("Mined and applied block {}", block.get_index());
                        server.peers.broadcast(&Frame::new(Message::InvBlock {
                            hash: block.get_hash().to_string(),
                            height: block.get_index(),
                        }));
                    }
                    Ok(None) => {
                        // Cancelled; loop re-assembles on the new tip
                    }
                    Err(e) => {
                        error!("Mining attempt failed: {e}");
                        thread::sleep(Duration::from_secs(1));
                    }
                }
            }
        });
    }

    fn mine_one(&self, mining_address: &str) -> Result<Option<Block>> {
        let mut candidate = self.blockchain.assemble_candidate(mining_address)?;
        let state = self.blockchain.next_difficulty_state()?;
        let pow = FractalPow::new(state.header_bits, TARGET_DIMENSION, state.epsilon);

        // Shutdown must also stop the grind
        let cancel = self.mining_cancel.clone();
        if self.shutdown.load(Ordering::Relaxed) {
            return Ok(None);
        }
        if !pow.mine(&mut candidate, &cancel)? {
            return Ok(None);
        }

        match self.blockchain.add_block(&candidate) {
            Ok(()) => Ok(Some(candidate)),
            Err(ChainError::InvalidBlock(reason)) => {
                // The tip advanced while we were grinding
                info!("Discarding stale mined block: {reason}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
