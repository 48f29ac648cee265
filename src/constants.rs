use std::time::Duration;

use libp2p::StreamProtocol;

pub const TRANSACTION_PROTOCOL: StreamProtocol = StreamProtocol::new("/transaction/1.0.0");
pub const BLOCK_PROTOCOL: StreamProtocol = StreamProtocol::new("/block/1.0.0");
pub const BLOCKCHAIN_PROTOCOL: StreamProtocol = StreamProtocol::new("/blockchain/1.0.0");
pub const KAD_PROTOCOL: StreamProtocol = StreamProtocol::new("/powchain/kad/1.0.0");
pub const IDENTIFY_PROTOCOL: &str = "/powchain/1.0.0";

/// Seconds a block is expected to take to mine.
pub const TARGET_DURATION: f64 = 60.0;
pub const MIN_DIFFICULTY: usize = 1;
pub const DEFAULT_DIFFICULTY: usize = 5;
/// A hex SHA-256 digest has no more leading zeros than this.
pub const MAX_DIFFICULTY: usize = 64;

/// Time given to mdns before the first chain-snapshot round.
pub const BOOTSTRAP_DELAY: Duration = Duration::from_secs(3);
/// A snapshot round that has not finished after this long is closed anyway.
pub const RESYNC_GRACE: Duration = Duration::from_secs(5);
pub const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_LISTEN_ADDR: &str = "/ip4/0.0.0.0/tcp/0";
pub const ACTOR_WARMUP: Duration = Duration::from_secs(2);
pub const DEFAULT_ACTOR_INTERVAL_MS: u64 = 200;
