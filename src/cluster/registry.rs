use parking_lot::RwLock;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::types::NodeId;
use crate::error::{CacheError, CacheResult};

/// Ordered `host:port` list; the index of an entry is the node's id.
pub struct NodeRegistry {
    hosts: RwLock<Vec<String>>,
    path: Option<PathBuf>,
}

impl NodeRegistry {
    /// In-memory registry, never written back.
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts: RwLock::new(hosts),
            path: None,
        }
    }

    /// Registry backed by the node list file; appends are persisted to it.
    pub fn with_file(hosts: Vec<String>, path: PathBuf) -> Self {
        Self {
            hosts: RwLock::new(hosts),
            path: Some(path),
        }
    }

    pub fn host(&self, node_id: NodeId) -> Option<String> {
        self.hosts.read().get(node_id.0).cloned()
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        node_id.0 < self.len()
    }

    /// Every node except `self_id`.
    pub fn peers(&self, self_id: NodeId) -> Vec<NodeId> {
        (0..self.len())
            .map(NodeId)
            .filter(|node| *node != self_id)
            .collect()
    }

    /// Registers `host` as the next node id. A host that is already registered keeps
    /// its id. The node list file is only written if it lacks the host, so nodes sharing
    /// one file do not duplicate lines.
    pub fn append(&self, host: &str) -> CacheResult<NodeId> {
        let mut hosts = self.hosts.write();
        if let Some(index) = hosts.iter().position(|known| known == host) {
            return Ok(NodeId(index));
        }

        if let Some(path) = &self.path {
            persist_host(path, host).map_err(|e| {
                CacheError::Configuration(format!(
                    "Failed to append {} to {}: {}",
                    host,
                    path.display(),
                    e
                ))
            })?;
        }

        hosts.push(host.to_string());
        let node_id = NodeId(hosts.len() - 1);
        tracing::info!("Registered node {} at {}", node_id, host);
        Ok(node_id)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.read().clone()
    }
}

fn persist_host(path: &Path, host: &str) -> std::io::Result<()> {
    let existing = std::fs::read_to_string(path).unwrap_or_default();
    if existing.lines().any(|line| line.trim() == host) {
        return Ok(());
    }

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{}", host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peers_exclude_self() {
        let registry = NodeRegistry::new(vec!["a:1".into(), "b:2".into(), "c:3".into()]);

        assert_eq!(registry.peers(NodeId(1)), vec![NodeId(0), NodeId(2)]);
        assert_eq!(registry.host(NodeId(2)), Some("c:3".to_string()));
        assert_eq!(registry.host(NodeId(3)), None);
    }

    #[test]
    fn test_shared_file_is_not_duplicated() {
        let path = std::env::temp_dir().join(format!("cachecow-shared-{}.txt", std::process::id()));
        std::fs::write(&path, "a:1\nb:2\n").unwrap();
        let registry = NodeRegistry::with_file(vec!["a:1".into()], path.clone());

        assert_eq!(registry.append("b:2").unwrap(), NodeId(1));

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(contents, "a:1\nb:2\n");
    }

    #[test]
    fn test_append_assigns_next_id_and_persists() {
        let path = std::env::temp_dir().join(format!("cachecow-registry-{}.txt", std::process::id()));
        std::fs::write(&path, "a:1\n").unwrap();
        let registry = NodeRegistry::with_file(vec!["a:1".into()], path.clone());

        assert_eq!(registry.append("b:2").unwrap(), NodeId(1));
        assert_eq!(registry.append("b:2").unwrap(), NodeId(1), "Repeat append is a no-op");
        assert_eq!(registry.append("a:1").unwrap(), NodeId(0));

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(contents, "a:1\nb:2\n");
        assert_eq!(registry.len(), 2);
    }
}
