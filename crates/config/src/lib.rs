use std::env;
use std::time::Duration;

/// Piece granularity for hashing and transfer, in bytes.
pub const PIECE_SIZE: usize = 524_288;

/// Parallel piece fetches per download batch.
pub const MAX_SIM_PIECES: usize = 8;

/// Upper bound on a single framed payload.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Peer listener ports are picked at random from
/// [PEER_PORT_BASE, PEER_PORT_BASE + PEER_PORT_SPAN).
pub const PEER_PORT_BASE: u16 = 20_000;
pub const PEER_PORT_SPAN: u16 = 15_000;

/// Sequential ports probed before giving up on a peer listener.
pub const PEER_BIND_TRIES: u16 = 40;

/// Client -> tracker request timeout.
pub const TRACKER_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracker -> tracker replication timeout (connect, send and receive).
pub const SYNC_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-attempt piece fetch timeout (connect, send and receive).
pub const PIECE_IO_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-tracker snapshot directory is DATA_DIR_PREFIX + index.
pub const DATA_DIR_PREFIX: &str = "tracker_data_";

pub const DEFAULT_ADVERTISE_HOST: &str = "127.0.0.1";

/// Host embedded in every endpoint this peer advertises to trackers.
/// Overridable so peers on different machines stay reachable.
pub fn advertised_host() -> String {
    env::var("GSHARE_ADVERTISE_HOST").unwrap_or_else(|_| DEFAULT_ADVERTISE_HOST.to_string())
}

/// Debug logging is off unless the variable is set to a non-empty value.
pub fn debug_enabled() -> bool {
    env::var("GSHARE_DEBUG").map(|v| !v.is_empty()).unwrap_or(false)
}
