use std::{env, path::PathBuf, time::Duration};

// Runtime/server constants (not level tuning).

pub fn http_port() -> u16 {
    env::var("SESSION_SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3001)
}

pub fn tick_interval() -> Duration {
    let millis = env::var("SESSION_TICK_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        // A zero period would make the tick interval panic.
        .filter(|millis| *millis > 0)
        .unwrap_or(1000 / 60);
    Duration::from_millis(millis)
}

pub fn join_timeout() -> Duration {
    let millis = env::var("JOIN_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(2000);
    Duration::from_millis(millis)
}

// Unset means the built-in level.
pub fn level_config_path() -> Option<PathBuf> {
    env::var_os("LEVEL_CONFIG_PATH")
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
pub const UPDATE_BROADCAST_CAPACITY: usize = 256;

pub const DEFAULT_SESSION_ID: &str = "default";
