mod database;
mod eager_env;
mod identity;
mod server;
mod utils;

use crate::{
    database::{connect_db, parse_database_urls},
    eager_env::{check_env, parse_list},
    identity::{
        IdentityResolver, LocalNode, ReplacementPolicy, get_first_network_address,
        allocation::TokenAllocator,
        gossip::{HttpGossipProbe, check_status_endpoint},
        heartbeat::HeartbeatManager,
        registry::ScyllaSlotRegistry,
        replacement::TokenReplacer,
        sleeper::TokioSleeper,
    },
    server::{AppStateInner, start_server},
};
use log::info;
use std::{net::TcpListener, sync::Arc, time::Duration};

#[tokio::main]
async fn main() {
    env_logger::builder()
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();
    check_env();

    let node_urls = parse_database_urls(&eager_env::DATABASE_NODE_URLS);
    let database = connect_db(&node_urls, &eager_env::DATABASE_KEYSPACE)
        .await
        .expect("failed to connect to the database");
    let database = Arc::new(database);

    check_status_endpoint(*eager_env::PORT, *eager_env::GOSSIP_STATUS_PORT)
        .expect("invalid gossip status endpoint");

    let host_ip = get_first_network_address().expect("no private network address found");

    let node = LocalNode {
        app_name: eager_env::APP_NAME.clone(),
        instance_id: eager_env::INSTANCE_ID.clone(),
        hostname: eager_env::HOSTNAME.clone(),
        host_ip,
        rack: eager_env::RACK.clone(),
        region: eager_env::REGION.clone(),
    };
    info!(
        "Starting {} on {} ({}) in {}",
        node.instance_id, node.hostname, node.host_ip, node.rack
    );

    let registry = Arc::new(
        ScyllaSlotRegistry::new(database.clone())
            .await
            .expect("failed to prepare registry queries"),
    );

    let heartbeat = HeartbeatManager::new(
        node.app_name.clone(),
        node.rack.clone(),
        node.instance_id.clone(),
        Duration::from_secs(*eager_env::HEARTBEAT_INTERVAL_SECONDS),
        database.clone(),
    )
    .await
    .expect("failed to prepare heartbeat queries");
    let heartbeat = Arc::new(heartbeat);

    let policy = ReplacementPolicy {
        max_probe_attempts: *eager_env::GOSSIP_MAX_ATTEMPTS,
        retry_delay: Duration::from_millis(*eager_env::GOSSIP_RETRY_DELAY_MILLIS),
        gossip_source: *eager_env::GOSSIP_SOURCE,
        unreachable: *eager_env::UNREACHABLE_POLICY,
        purge_live_orphans: *eager_env::PURGE_LIVE_ORPHANS,
    };

    let replacer = TokenReplacer::new(
        node.clone(),
        policy,
        registry.clone(),
        heartbeat.clone(),
        Arc::new(HttpGossipProbe::new(
            *eager_env::GOSSIP_STATUS_PORT,
            eager_env::GOSSIP_STATUS_PATH.as_str(),
            Duration::from_secs(*eager_env::GOSSIP_TIMEOUT_SECONDS),
        )),
        Arc::new(TokioSleeper),
    );

    let allocator = TokenAllocator::new(parse_list(&eager_env::RACKS), *eager_env::NODES_PER_RACK)
        .expect("invalid RACKS/NODES_PER_RACK layout");

    // Beat before claiming, or the claimed slot looks dead to other booting nodes
    heartbeat.start().await;

    let identity = IdentityResolver::new(node, registry, replacer, allocator)
        .resolve()
        .await
        .expect("failed to resolve the node's slot");

    match identity.replaced_ip {
        Some(ip) => info!("Token {} replaces {ip}", identity.slot.token),
        None => info!("Token {} ({})", identity.slot.token, identity.origin),
    }

    let state = Arc::new(AppStateInner { identity });
    let listener =
        TcpListener::bind(format!("0.0.0.0:{}", *eager_env::PORT)).expect("Failed to bind PORT");

    info!(
        "Listening on {}",
        listener.local_addr().expect("Failed to get local address")
    );

    start_server(state, listener)
        .await
        .expect("error while running server");

    heartbeat.stop().await;
}
