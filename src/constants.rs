pub const API_VERSION: &str = "v1";

/// Session ids are 16 random bytes, hex encoded (32 chars).
pub const SESSION_ID_BYTES: usize = 16;

/// Invite codes are minted at creation time at the exact width the
/// escrow contract expects (31 bytes fits a Starknet short string),
/// never derived by truncating the session id.
pub const INVITE_CODE_BYTES: usize = 31;

pub const DEFAULT_RECONCILER_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 60;
pub const RECONCILER_BATCH_LIMIT: i64 = 25;

/// Bounded re-read-and-retry on optimistic-concurrency conflicts
/// before surfacing the conflict to the caller.
pub const MAX_TRANSITION_ATTEMPTS: u32 = 3;

pub const SESSION_SCHEMA_VERSION: i32 = 1;
