use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::types::NodeId;
use crate::config::DEFAULT_PORT;

/// Starts the process (or machine) for a new node.
pub trait NodeLauncher: Send + Sync {
    fn launch(&self, node_id: NodeId) -> Result<()>;
}

/// Launches new nodes on this host by re-running the current binary.
///
/// Node `n` listens on `base_port + n` and writes its output to `node-{n}.log`.
pub struct ProcessLauncher {
    program: PathBuf,
    base_port: u16,
    node_list: PathBuf,
    extra_args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(node_list: PathBuf, extra_args: Vec<String>) -> Result<Self> {
        let program = std::env::current_exe().context("Cannot locate current executable")?;
        Ok(Self {
            program,
            base_port: DEFAULT_PORT,
            node_list,
            extra_args,
        })
    }

    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    fn args(&self, node_id: NodeId) -> Result<Vec<String>> {
        let offset = u16::try_from(node_id.0).context("Node id out of port range")?;
        let port = self
            .base_port
            .checked_add(offset)
            .context("Node id out of port range")?;

        let mut args = vec![
            "--id".to_string(),
            node_id.0.to_string(),
            "--port".to_string(),
            port.to_string(),
            "--host".to_string(),
            format!("localhost:{}", port),
            "--nodes".to_string(),
            self.node_list.display().to_string(),
            "--new-node".to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        Ok(args)
    }
}

impl NodeLauncher for ProcessLauncher {
    fn launch(&self, node_id: NodeId) -> Result<()> {
        let args = self.args(node_id)?;
        let log = std::fs::File::create(format!("node-{}.log", node_id.0))
            .context("Failed to create node log file")?;

        let child = Command::new(&self.program)
            .args(&args)
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()
            .with_context(|| format!("Failed to spawn node {}", node_id))?;

        tracing::info!(
            "Launched node {} as process {} with {:?}",
            node_id,
            child.id(),
            args
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_arguments() {
        let launcher = ProcessLauncher {
            program: PathBuf::from("cachecow"),
            base_port: 7070,
            node_list: PathBuf::from("nodes.txt"),
            extra_args: vec!["--strategy".into(), "lru".into()],
        };

        let args = launcher.args(NodeId(3)).unwrap();

        assert_eq!(
            args,
            vec![
                "--id", "3", "--port", "7073", "--host", "localhost:7073", "--nodes",
                "nodes.txt", "--new-node", "--strategy", "lru"
            ]
        );
    }

    #[test]
    fn test_port_overflow_is_an_error() {
        let launcher = ProcessLauncher {
            program: PathBuf::from("cachecow"),
            base_port: u16::MAX,
            node_list: PathBuf::from("nodes.txt"),
            extra_args: vec![],
        };

        assert!(launcher.args(NodeId(1)).is_err());
    }
}
