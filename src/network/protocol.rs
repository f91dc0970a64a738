// Wire protocol: length-prefixed JSON frames. Every frame is a 4-byte
// big-endian payload length followed by a JSON object of the shape
// { "type": ..., "version": ..., "payload": { ... } }.

use crate::core::BlockHeader;
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::Instant;

pub const PROTOCOL_VERSION: u32 = 1;

/// Frames above this size are rejected at the boundary (2 MB)
pub const MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;

/// Token bucket defaults: 100 messages per 10 seconds
pub const RATE_LIMIT_MESSAGES: u32 = 100;
pub const RATE_LIMIT_WINDOW_SECS: u64 = 10;

/// Cool-down for peers disconnected over rate violations
pub const BLACKLIST_COOLDOWN_SECS: u64 = 60;

/// The tagged message sum. Serialized as {"type": "...", "payload": {...}}.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Handshake {
        network_id: String,
        node_id: String,
        height: u64,
        /// The sender's listening address, for reverse connections
        addr_from: String,
    },
    Ping {
        nonce: u64,
    },
    Pong {
        nonce: u64,
    },
    InvBlock {
        hash: String,
        height: u64,
    },
    GetBlock {
        hash: String,
    },
    Block {
        /// Serialized block blob
        block: Vec<u8>,
    },
    InvTx {
        txid: String,
    },
    GetTx {
        txid: String,
    },
    Tx {
        /// Serialized transaction blob
        transaction: Vec<u8>,
    },
    GetHeaders {
        from_height: u64,
        count: u64,
    },
    Headers {
        headers: Vec<BlockHeader>,
    },
}

/// One wire frame: protocol version plus the tagged message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub version: u32,
    #[serde(flatten)]
    pub message: Message,
}

impl Frame {
    pub fn new(message: Message) -> Frame {
        Frame {
            version: PROTOCOL_VERSION,
            message,
        }
    }
}

/// Write a length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    let payload = serde_json::to_vec(frame)
        .map_err(|e| ChainError::Network(format!("Failed to encode frame: {e}")))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(ChainError::Network(format!(
            "Outgoing frame of {} bytes exceeds the cap",
            payload.len()
        )));
    }

    let len = (payload.len() as u32).to_be_bytes();
    writer
        .write_all(&len)
        .and_then(|_| writer.write_all(&payload))
        .and_then(|_| writer.flush())
        .map_err(|e| ChainError::Network(format!("Failed to write frame: {e}")))?;
    Ok(())
}

/// Like [`read_frame`], but a read timeout while waiting for the next
/// frame yields `Ok(None)` instead of an error. A timeout in the middle
/// of a frame is still an error.
pub fn read_frame_idle_aware<R: Read>(reader: &mut R) -> Result<Option<Frame>> {
    let mut len_bytes = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_bytes) {
        return match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Ok(None),
            _ => Err(ChainError::Network(format!(
                "Failed to read frame length: {e}"
            ))),
        };
    }
    read_frame_body(reader, len_bytes).map(Some)
}

/// Read a length-prefixed frame. Oversize lengths are a format error
/// charged against the peer.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| ChainError::Network(format!("Failed to read frame length: {e}")))?;
    read_frame_body(reader, len_bytes)
}

fn read_frame_body<R: Read>(reader: &mut R, len_bytes: [u8; 4]) -> Result<Frame> {
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ChainError::Format(format!(
            "Incoming frame of {len} bytes exceeds the cap"
        )));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| ChainError::Network(format!("Failed to read frame payload: {e}")))?;

    serde_json::from_slice(&payload)
        .map_err(|e| ChainError::Format(format!("Malformed frame: {e}")))
}

/// Per-peer token bucket. Each message costs one token; the bucket
/// refills continuously at capacity-per-window rate.
pub struct RateLimiter {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, window_secs: u64) -> RateLimiter {
        RateLimiter {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec: capacity as f64 / window_secs as f64,
            last_refill: Instant::now(),
        }
    }

    /// Take one token. False means the peer is over its budget.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_MESSAGES, RATE_LIMIT_WINDOW_SECS)
    }
}
