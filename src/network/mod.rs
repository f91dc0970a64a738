mod peers;
mod protocol;
mod server;

pub use peers::{PeerHandle, PeerRegistry, PeerState};
pub use protocol::{
    read_frame, read_frame_idle_aware, write_frame, Frame, Message, RateLimiter,
    BLACKLIST_COOLDOWN_SECS, MAX_FRAME_BYTES, PROTOCOL_VERSION, RATE_LIMIT_MESSAGES,
    RATE_LIMIT_WINDOW_SECS,
};
pub use server::Server;
