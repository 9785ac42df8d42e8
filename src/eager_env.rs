use std::env;
use std::sync::LazyLock;

use crate::identity::{GossipSource, UnreachablePolicy};

macro_rules! define_env_vars {
    ($(($name:ident, $env_name:expr, $type:ty)),* $(,)?) => {
        $(
            pub static $name: LazyLock<$type> = LazyLock::new(|| {
                let val = env::var($env_name).unwrap_or_else(|_| {
                    panic!("Missing required environment variable: {}", $env_name)
                });
                val.parse::<$type>().unwrap_or_else(|_| {
                    panic!(
                        "Failed to parse environment variable {} with value '{}' as {}",
                        $env_name,
                        val,
                        stringify!($type)
                    )
                })
            });
        )*

        /// Force initialization of all environment variables at startup
        /// Call this early in main() to fail fast if any env vars are missing
        pub fn check_env() {
            $(
                let _ = *$name;
            )*
        }
    };
}

define_env_vars!(
    (PORT, "PORT", u16),
    (DATABASE_NODE_URLS, "DATABASE_NODE_URLS", String),
    (DATABASE_KEYSPACE, "DATABASE_KEYSPACE", String),
    (APP_NAME, "APP_NAME", String),
    (INSTANCE_ID, "INSTANCE_ID", String),
    (HOSTNAME, "HOSTNAME", String),
    (RACK, "RACK", String),
    (REGION, "REGION", String),
    (RACKS, "RACKS", String),
    (NODES_PER_RACK, "NODES_PER_RACK", u32),
    (
        HEARTBEAT_INTERVAL_SECONDS,
        "HEARTBEAT_INTERVAL_SECONDS",
        u64
    ),
    (GOSSIP_STATUS_PORT, "GOSSIP_STATUS_PORT", u16),
    (GOSSIP_STATUS_PATH, "GOSSIP_STATUS_PATH", String),
    (GOSSIP_TIMEOUT_SECONDS, "GOSSIP_TIMEOUT_SECONDS", u64),
    (GOSSIP_MAX_ATTEMPTS, "GOSSIP_MAX_ATTEMPTS", u32),
    (GOSSIP_RETRY_DELAY_MILLIS, "GOSSIP_RETRY_DELAY_MILLIS", u64),
    (GOSSIP_SOURCE, "GOSSIP_SOURCE", GossipSource),
    (UNREACHABLE_POLICY, "UNREACHABLE_POLICY", UnreachablePolicy),
    (PURGE_LIVE_ORPHANS, "PURGE_LIVE_ORPHANS", bool),
);

/// Splits a comma-separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
