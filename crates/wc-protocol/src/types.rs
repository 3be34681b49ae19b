/// Shared constants and small helpers used across the protocol layer.
use std::time::{SystemTime, UNIX_EPOCH};

/// Protocol name used in pairing URIs and storage keys.
pub const PROTOCOL: &str = "wc";
/// Protocol version used in pairing URIs and storage keys.
pub const VERSION: u32 = 2;

/// Storage context for core state (keychain).
pub const CORE_CONTEXT: &str = "core";
/// Storage context for client state (records, history, expirations).
pub const CLIENT_CONTEXT: &str = "client";

// ── Durations (seconds) ──────────────────────────────────────────────

pub const THIRTY_SECONDS: u64 = 30;
pub const FIVE_MINUTES: u64 = 5 * 60;
pub const SIX_HOURS: u64 = 6 * 60 * 60;
pub const ONE_DAY: u64 = 24 * 60 * 60;
pub const SEVEN_DAYS: u64 = 7 * ONE_DAY;
pub const THIRTY_DAYS: u64 = 30 * ONE_DAY;

/// Current time in seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Absolute expiry `ttl` seconds from now.
pub fn calc_expiry(ttl: u64) -> u64 {
    now_secs() + ttl
}

pub fn is_expired(expiry: u64) -> bool {
    now_secs() >= expiry
}

/// Persisted store key: `{protocol}@{version}:{context}//{name}`.
pub fn storage_key(context: &str, name: &str) -> String {
    format!("{PROTOCOL}@{VERSION}:{context}//{name}")
}
