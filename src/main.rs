use cachecow::cache::LocalStore;
use cachecow::cache::monitor::spawn_eviction_monitor;
use cachecow::cluster::launcher::ProcessLauncher;
use cachecow::cluster::registry::NodeRegistry;
use cachecow::cluster::router::DistributedCache;
use cachecow::cluster::scaling::ScaleCoordinator;
use cachecow::config::{DEFAULT_PORT, NodeConfig, load_node_list};
use cachecow::hashing::distributor::KeyDistributor;
use cachecow::hashing::hasher::NodeHasher;
use cachecow::transport::sender::HttpSender;
use cachecow::transport::server::router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Flags that describe one node rather than the cluster; not passed on to launched nodes.
const NODE_FLAGS: [&str; 4] = ["--id", "--port", "--host", "--nodes"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("{}", NodeConfig::usage(&args[0]));
        eprintln!("Example: {} --id 0 --port 7070 --nodes nodes.txt", args[0]);
        std::process::exit(1);
    }

    let config = NodeConfig::from_args(&args)?;
    let node_id = config.node_id;

    // 1. Node list:
    let mut hosts = load_node_list(&config.node_list_path)?;
    if config.new_node {
        // Anything from our own id on is re-registered by the join.
        hosts.truncate(node_id.0);
        if hosts.len() != node_id.0 {
            anyhow::bail!(
                "New node {} needs {} existing nodes, node list has {}",
                node_id,
                node_id.0,
                hosts.len()
            );
        }
    } else if node_id.0 >= hosts.len() {
        anyhow::bail!("Node {} is not in the node list ({} entries)", node_id, hosts.len());
    }

    let host_name = config
        .host
        .clone()
        .or_else(|| hosts.get(node_id.0).cloned())
        .unwrap_or_else(|| format!("localhost:{}", config.port));
    tracing::info!("Starting node {} as {}", node_id, host_name);

    // 2. Ring and local cache:
    let ring_nodes = hosts.len();
    let registry = Arc::new(NodeRegistry::with_file(
        hosts,
        config.node_list_path.clone(),
    ));
    let distributor = Arc::new(KeyDistributor::new(NodeHasher::new(), ring_nodes)?);
    let store = Arc::new(LocalStore::new(&config.cache, NodeHasher::new()));
    tracing::info!(
        "Local cache: {:?}, {} entries, {} bytes",
        config.cache.strategy,
        config.cache.max_entries,
        config.cache.max_bytes
    );

    // 3. Router and scale-out:
    let sender = Arc::new(HttpSender::new(node_id, Arc::clone(&registry), &config.scaling));
    let cache = Arc::new(DistributedCache::new(
        node_id,
        host_name,
        registry,
        distributor,
        Arc::clone(&store),
        sender,
    ));

    let base_port = u16::try_from(node_id.0)
        .ok()
        .and_then(|offset| config.port.checked_sub(offset))
        .unwrap_or(DEFAULT_PORT);
    let launcher = ProcessLauncher::new(config.node_list_path.clone(), inherited_args(&args))?
        .with_base_port(base_port);
    let coordinator = ScaleCoordinator::new(
        Arc::clone(&cache),
        Arc::new(launcher),
        config.scaling.clone(),
    );

    if config.new_node {
        coordinator.join()?;
    }

    // 4. Spawn eviction monitor:
    let monitor = spawn_eviction_monitor(Arc::clone(&store), config.cache.monitor_interval);

    // 5. Spawn stats reporter:
    let stats_cache = Arc::clone(&cache);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            interval.tick().await;
            let info = stats_cache.system_info();
            tracing::info!(
                "Node stats: {} keys, {} bytes, {} nodes on ring, scaling={}",
                info.cache_info.total_keys,
                info.cache_info.kv_bytes,
                stats_cache.distributor().node_count(),
                info.scale_in_progress
            );
        }
    });

    // 6. Start HTTP server:
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = router(Arc::clone(&cache), Arc::clone(&coordinator));

    if config.new_node {
        // The listener is bound, so peers can already queue their copies.
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            match coordinator.announce_ready().await {
                Ok(()) => tracing::info!("Announced readiness to every node"),
                Err(e) => tracing::error!("Failed to announce readiness: {}", e),
            }
        });
    }

    tracing::info!("HTTP server listening on {}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor.abort();
    tracing::info!("Node {} stopped", node_id);

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Cache and scaling flags to hand down to nodes this one launches.
fn inherited_args(args: &[String]) -> Vec<String> {
    let mut inherited = Vec::new();
    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        if NODE_FLAGS.contains(&flag) {
            i += 2;
        } else if flag == "--new-node" {
            i += 1;
        } else {
            inherited.push(args[i].clone());
            i += 1;
        }
    }
    inherited
}
