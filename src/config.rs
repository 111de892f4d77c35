//! Node Configuration
//!
//! Defaults for every tunable, overridden by command-line flags. The node list itself
//! lives in a text file (one `host:port` per line) shared by the whole cluster.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::time::Duration;

use crate::cluster::types::NodeId;

pub const DEFAULT_PORT: u16 = 7070;
pub const DEFAULT_NODE_LIST: &str = "nodes.txt";

/// Which local cache implementation a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Single recency list, strict LRU.
    Lru,
    /// Generational tables, whole-table eviction.
    MultiTable,
}

/// What `store` does when the cache is at its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPolicy {
    /// Insert and evict least recently used entries inline.
    Evict,
    /// Refuse the store with `CacheFull`.
    Reject,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub strategy: CacheStrategy,
    /// Entry-count ceiling for the whole local cache.
    pub max_entries: usize,
    /// Ceiling on estimated entry bytes for the whole local cache.
    pub max_bytes: usize,
    pub full_policy: FullPolicy,
    /// Number of generations for the multi-table strategy.
    pub table_count: usize,
    pub monitor_interval: Duration,
    /// Utilization at which the monitor starts evicting.
    pub high_water: f64,
    /// Utilization the monitor evicts down to.
    pub low_water: f64,
    /// Resident-memory ceiling for the whole process, if enforced.
    pub process_memory_limit: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::Lru,
            max_entries: 10_000,
            max_bytes: 64 * 1024 * 1024,
            full_policy: FullPolicy::Evict,
            table_count: 3,
            monitor_interval: Duration::from_secs(2),
            high_water: 0.8,
            low_water: 0.6,
            process_memory_limit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScalingConfig {
    /// Key-value pairs per bulk-copy request.
    pub batch_size: usize,
    /// How long a launch intent waits for a lower-id competitor.
    pub launch_delay: Duration,
    /// Attempts per peer RPC before giving up.
    pub rpc_attempts: usize,
    pub rpc_timeout: Duration,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            launch_delay: Duration::from_secs(2),
            rpc_attempts: 3,
            rpc_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: NodeId,
    /// Address peers use to reach this node; defaults to the node list entry.
    pub host: Option<String>,
    pub port: u16,
    pub node_list_path: PathBuf,
    /// Node was launched by a scale-out and must announce itself.
    pub new_node: bool,
    pub cache: CacheConfig,
    pub scaling: ScalingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(0),
            host: None,
            port: DEFAULT_PORT,
            node_list_path: PathBuf::from(DEFAULT_NODE_LIST),
            new_node: false,
            cache: CacheConfig::default(),
            scaling: ScalingConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn usage(program: &str) -> String {
        format!(
            "Usage: {program} --id <n> --port <port> [--host <host:port>] [--nodes <file>] [--new-node]\n\
             \x20      [--strategy lru|multi-table] [--max-entries <n>] [--max-bytes <n>] [--tables <n>]\n\
             \x20      [--reject-when-full] [--memory-limit <bytes>] [--batch-size <n>]"
        )
    }

    /// Parses flags on top of the defaults. `args[0]` is the program name.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = NodeConfig::default();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--new-node" => {
                    config.new_node = true;
                    i += 1;
                    continue;
                }
                "--reject-when-full" => {
                    config.cache.full_policy = FullPolicy::Reject;
                    i += 1;
                    continue;
                }
                _ => {}
            }

            let value = args
                .get(i + 1)
                .with_context(|| format!("Missing value for {}", flag))?;

            match flag {
                "--id" => config.node_id = NodeId(value.parse()?),
                "--port" => config.port = value.parse()?,
                "--host" => config.host = Some(value.clone()),
                "--nodes" => config.node_list_path = PathBuf::from(value),
                "--strategy" => {
                    config.cache.strategy = match value.as_str() {
                        "lru" => CacheStrategy::Lru,
                        "multi-table" => CacheStrategy::MultiTable,
                        other => bail!("Unknown cache strategy: {}", other),
                    }
                }
                "--max-entries" => config.cache.max_entries = value.parse()?,
                "--max-bytes" => config.cache.max_bytes = value.parse()?,
                "--tables" => config.cache.table_count = value.parse()?,
                "--memory-limit" => config.cache.process_memory_limit = Some(value.parse()?),
                "--batch-size" => config.scaling.batch_size = value.parse()?,
                other => {
                    tracing::warn!("Ignoring unknown flag {}", other);
                }
            }
            i += 2;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 || self.cache.max_bytes == 0 {
            bail!("Cache ceilings must be positive");
        }
        if self.cache.table_count < 2 {
            bail!("Multi-table cache needs at least two tables");
        }
        if self.scaling.batch_size == 0 {
            bail!("Batch size must be positive");
        }
        if !(0.0 < self.cache.low_water && self.cache.low_water < self.cache.high_water)
            || self.cache.high_water > 1.0
        {
            bail!("Watermarks must satisfy 0 < low < high <= 1");
        }
        Ok(())
    }
}

/// Reads the node list file, skipping blank lines.
pub fn load_node_list(path: &std::path::Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read node list {}", path.display()))?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
