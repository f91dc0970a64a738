use crate::error::{ChainError, Result};
use crate::network::protocol::{write_frame, Frame, BLACKLIST_COOLDOWN_SECS};
use log::{info, warn};
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Per-peer lifecycle. A peer advances Connecting -> Handshaking ->
/// Syncing -> Live and ends Closed; a peer that is already at our
/// height skips Syncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Handshaking,
    Syncing,
    Live,
    Closed,
}

#[derive(Clone)]
pub struct PeerHandle {
    pub addr: String, // the peer's listening address
    pub node_id: String,
    pub state: PeerState,
    pub height: u64,
    writer: Arc<Mutex<TcpStream>>,
}

impl PeerHandle {
    /// Push a frame to this peer over its persistent connection.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        let mut stream = self
            .writer
            .lock()
            .map_err(|_| ChainError::Network("Peer writer lock poisoned".to_string()))?;
        write_frame(&mut *stream, frame)
    }
}

/// Registry of connected peers plus the rate-limit blacklist. Owned by
/// the network dispatcher; everything else goes through message passing
/// or these synchronized accessors.
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, PeerHandle>>,
    blacklist: RwLock<HashMap<String, Instant>>,
    max_connections: usize,
}

impl PeerRegistry {
    pub fn new(max_connections: usize) -> PeerRegistry {
        PeerRegistry {
            peers: RwLock::new(HashMap::new()),
            blacklist: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    pub fn register(
        &self,
        addr: &str,
        node_id: &str,
        height: u64,
        stream: TcpStream,
    ) -> Result<()> {
        let mut peers = self
            .peers
            .write()
            .map_err(|_| ChainError::Network("Peer registry lock poisoned".to_string()))?;
        peers.insert(
            addr.to_string(),
            PeerHandle {
                addr: addr.to_string(),
                node_id: node_id.to_string(),
                state: PeerState::Handshaking,
                height,
                writer: Arc::new(Mutex::new(stream)),
            },
        );
        info!("Registered peer {addr} ({node_id}) at height {height}");
        Ok(())
    }

    pub fn set_state(&self, addr: &str, state: PeerState) {
        if let Ok(mut peers) = self.peers.write() {
            if let Some(peer) = peers.get_mut(addr) {
                peer.state = state;
            }
        }
    }

    pub fn set_height(&self, addr: &str, height: u64) {
        if let Ok(mut peers) = self.peers.write() {
            if let Some(peer) = peers.get_mut(addr) {
                peer.height = height;
            }
        }
    }

    pub fn get(&self, addr: &str) -> Option<PeerHandle> {
        self.peers.read().ok()?.get(addr).cloned()
    }

    pub fn remove(&self, addr: &str) {
        if let Ok(mut peers) = self.peers.write() {
            if peers.remove(addr).is_some() {
                info!("Removed peer {addr}");
            }
        }
    }

    pub fn is_known(&self, addr: &str) -> bool {
        self.peers
            .read()
            .map(|peers| peers.contains_key(addr))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.peers.read().map(|peers| peers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn should_accept_connection(&self) -> bool {
        self.len() < self.max_connections
    }

    /// Peers in the Live state, the broadcast audience.
    pub fn live_peers(&self) -> Vec<PeerHandle> {
        self.peers
            .read()
            .map(|peers| {
                peers
                    .values()
                    .filter(|p| p.state == PeerState::Live)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Broadcast a frame to every Live peer, dropping any that fail.
    pub fn broadcast(&self, frame: &Frame) {
        for peer in self.live_peers() {
            if let Err(e) = peer.send(frame) {
                warn!("Broadcast to {} failed: {e}", peer.addr);
                self.set_state(&peer.addr, PeerState::Closed);
            }
        }
    }

    /// Put a peer on the cool-down blacklist (rate violations,
    /// repeated invalid payloads). The blacklist is keyed by host so
    /// reconnects from ephemeral ports stay blocked.
    pub fn blacklist(&self, addr: &str) {
        let host = host_of(addr);
        if let Ok(mut blacklist) = self.blacklist.write() {
            blacklist.insert(host, Instant::now());
            warn!("Blacklisted {addr} for {BLACKLIST_COOLDOWN_SECS}s");
        }
        self.remove(addr);
    }

    pub fn is_blacklisted(&self, addr: &str) -> bool {
        let host = host_of(addr);
        let mut blacklist = match self.blacklist.write() {
            Ok(blacklist) => blacklist,
            Err(_) => return false,
        };
        match blacklist.get(&host) {
            Some(since) => {
                if since.elapsed() >= Duration::from_secs(BLACKLIST_COOLDOWN_SECS) {
                    blacklist.remove(&host);
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }
}

fn host_of(addr: &str) -> String {
    addr.split(':').next().unwrap_or(addr).to_string()
}
