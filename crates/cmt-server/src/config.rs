use std::net::SocketAddr;
use std::path::Path;

use cmt_ingest::ProgramIds;
use cmt_store::StoreConfig;
use cmt_sync::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Withhold node proofs that do not recompute to the stored root.
    pub verify_proofs: bool,
    /// Depth of the live ingest queue.
    pub ingest_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8899)),
            verify_proofs: true,
            ingest_queue: 1024,
        }
    }
}

/// Everything the mirror service needs, loaded from one TOML file.
///
/// ```toml
/// [server]
/// bind_addr = "0.0.0.0:8899"
///
/// [store]
/// path = "/var/lib/cmt/nodes.journal"
///
/// [sync]
/// trees = ["3e3e...3e"]
/// poll_interval_ms = 2000
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub programs: ProgramIds,
}

impl MirrorConfig {
    pub fn from_toml_str(s: &str) -> ServerResult<Self> {
        toml::from_str(s).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks that only matter once the reconciler is about to run.
    pub fn validate_for_sync(&self) -> ServerResult<()> {
        if self.sync.trees.is_empty() {
            return Err(ServerError::Config("sync.trees must name at least one tree".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmt_store::SyncMode;
    use cmt_types::AccountId;

    #[test]
    fn default_config() {
        let c = MirrorConfig::default();
        assert_eq!(c.server.bind_addr, "127.0.0.1:8899".parse::<SocketAddr>().unwrap());
        assert!(c.server.verify_proofs);
        assert!(c.store.path.is_none());
        assert!(c.sync.trees.is_empty());
        assert_eq!(c.programs, ProgramIds::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let tree = AccountId::new([0x3e; 32]);
        let text = format!(
            r#"
[server]
bind_addr = "0.0.0.0:9000"

[store]
path = "nodes.journal"
sync = "every_write"

[sync]
trees = ["{}"]
poll_interval_ms = 250
"#,
            tree.to_hex()
        );
        let c = MirrorConfig::from_toml_str(&text).unwrap();
        assert_eq!(c.server.bind_addr.port(), 9000);
        assert_eq!(c.server.ingest_queue, 1024);
        assert_eq!(c.store.sync, SyncMode::EveryWrite);
        assert_eq!(c.sync.trees, vec![tree]);
        assert_eq!(c.sync.validation_retries, 3);
        c.validate_for_sync().unwrap();
    }

    #[test]
    fn rejects_bad_toml_and_empty_tree_list() {
        assert!(matches!(MirrorConfig::from_toml_str("server = 3"), Err(ServerError::Config(_))));
        assert!(matches!(
            MirrorConfig::default().validate_for_sync(),
            Err(ServerError::Config(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.toml");
        std::fs::write(&path, "[server]\nverify_proofs = false\n").unwrap();
        let c = MirrorConfig::load(&path).unwrap();
        assert!(!c.server.verify_proofs);
        assert!(matches!(
            MirrorConfig::load(&dir.path().join("missing.toml")),
            Err(ServerError::Io(_))
        ));
    }
}
