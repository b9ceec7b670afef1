//! Workspace-wide constants.

/// Separator between path elements (`root.device.variable`).
pub const PATH_SEPARATOR: char = '.';

/// Reserved remote path that returns the root node description instead of
/// an attribute lookup.
pub const ROOT_PATH_SENTINEL: &str = "__ROOT__";

/// Sequence key that requests a blocking pause, value in microseconds.
pub const SLEEP_STEP_KEY: &str = "usleep";

/// Default remote request/reply port.
pub const DEFAULT_SERVER_PORT: u16 = 9099;

/// Default line-oriented control adapter port.
pub const DEFAULT_STRING_PORT: u16 = 9100;

/// Default bound on the client connection handshake.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Delay between handshake attempts.
pub const CONNECT_RETRY_INTERVAL_MS: u64 = 100;

/// Largest frame accepted by the framed TCP transport.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Default largest single transaction a memory transport accepts.
pub const DEFAULT_MAX_ACCESS: usize = 4096;

/// Default register word width.
pub const DEFAULT_WORD_BITS: u32 = 32;

/// Default byte spacing between register words.
pub const DEFAULT_STRIDE: usize = 4;

/// Default emulated memory size in bytes.
pub const DEFAULT_EMULATOR_SIZE: u64 = 0x1_0000;
