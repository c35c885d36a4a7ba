use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_EXPIRY_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_AOF_PATH: &str = "dump.aof";

/// Everything the core needs from the outside world; the CLI is a thin
/// layer that fills this in.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Upper bound on bytes pulled from a socket per read.
    pub buffer_size: usize,
    /// Pause between background expiry sampling cycles.
    pub expiry_interval: Duration,
    /// Where mutating commands are appended.
    pub aof_path: PathBuf,
    /// Replay the append-only file before accepting connections.
    pub load_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            expiry_interval: Duration::from_secs(DEFAULT_EXPIRY_INTERVAL_SECONDS),
            aof_path: PathBuf::from(DEFAULT_AOF_PATH),
            load_on_start: false,
        }
    }
}
