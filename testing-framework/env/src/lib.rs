use std::{env, path::PathBuf};

#[must_use]
pub fn slow_test_env() -> bool {
    env::var("SLOW_TEST_ENV").is_ok_and(|s| s == "true")
}

#[must_use]
pub fn rust_log() -> Option<String> {
    env::var("RUST_LOG").ok()
}

#[must_use]
pub fn harness_config_path() -> Option<PathBuf> {
    env::var("HARNESS_CONFIG").ok().map(PathBuf::from)
}

#[must_use]
pub fn harness_network() -> Option<String> {
    env::var("HARNESS_NETWORK").ok()
}

#[must_use]
pub fn harness_export_format() -> Option<String> {
    env::var("HARNESS_EXPORT_FORMAT").ok()
}

#[must_use]
pub fn harness_export_path() -> Option<PathBuf> {
    env::var("HARNESS_EXPORT_PATH").ok().map(PathBuf::from)
}

#[must_use]
pub fn harness_retry_attempts() -> Option<u32> {
    env::var("HARNESS_RETRY_ATTEMPTS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
}

#[must_use]
pub fn harness_retry_wait_secs() -> Option<u64> {
    env::var("HARNESS_RETRY_WAIT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
}

/// `0` disables the ceiling and waits for the next epoch indefinitely.
#[must_use]
pub fn harness_epoch_wait_ceiling_secs() -> Option<u64> {
    env::var("HARNESS_EPOCH_WAIT_CEILING_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
}

#[must_use]
pub fn harness_verbose() -> bool {
    env::var("HARNESS_VERBOSE").is_ok_and(|val| val.eq_ignore_ascii_case("true"))
}
