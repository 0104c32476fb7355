pub const LOGGER_ENV: &'static str = "RUST_LOG";
pub const CONFIG_ENV: &'static str = "RUST_CONFIG";
pub const LOGS_ENV: &'static str = "LOGS_FOLDER";

pub const JOBCAST_VERSION: &'static str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_WS_PATH: &'static str = "/ws";
pub const DEFAULT_HEARTBEAT: std::time::Duration = std::time::Duration::from_secs(30);
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_TOKEN_TTL: u64 = 3600;

/// Deadline for the Close frame a socket task sends on exit
pub const CLOSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
/// How long shutdown waits for socket tasks to say goodbye
pub const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(3);

/// Longest job id accepted from clients and producers
pub const MAX_JOB_ID_LEN: usize = 256;
