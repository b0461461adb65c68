use crate::components::bgp::bgp_peers::{PeerInfo, PeerRegistry, PeerRole};
use crate::components::bgp::bgp_selector::{MedComparison, PathSelectionMode};
use crate::components::bgp::table::TableKey;
use crate::components::route::{PeerId, RouterId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

struct Defaults {}

impl Defaults {
    fn channel_bound() -> usize {
        64
    }

    fn tables() -> Vec<TableConfig> {
        vec![TableConfig {
            table: TableKey::IPV4_UNICAST,
            add_path: false,
            path_selection: PathSelectionMode::Best,
        }]
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Local AS must not be 0")]
    ZeroLocalAs,
    #[error("Table {0} configured more than once")]
    DuplicateTable(TableKey),
    #[error("Peer {0} configured more than once")]
    DuplicatePeer(PeerId),
    #[error("Table {0} selects zero paths per destination")]
    NoPathsSelected(TableKey),
    #[error("Peer {peer} uses table {table} which is not configured")]
    UnknownTable { peer: PeerId, table: TableKey },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub table: TableKey,
    #[serde(default)]
    pub add_path: bool,
    /// Ignored unless `add_path` is set.
    #[serde(default)]
    pub path_selection: PathSelectionMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub address: PeerId,
    pub role: PeerRole,
    #[serde(default)]
    pub remote_as: Option<u32>,
    /// Tables exchanged with the peer, every configured table when absent.
    #[serde(default)]
    pub tables: Option<Vec<TableKey>>,
}

/// Settings of the RIB host, read from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RibConfig {
    pub local_as: u32,
    pub router_id: Ipv4Addr,
    /// Route-reflector cluster id, the router id when absent.
    #[serde(default)]
    pub cluster_id: Option<Ipv4Addr>,
    #[serde(default)]
    pub med_comparison: MedComparison,
    /// Capacity of every worker channel.
    #[serde(default = "Defaults::channel_bound")]
    pub channel_bound: usize,
    #[serde(default = "Defaults::tables")]
    pub tables: Vec<TableConfig>,
    #[serde(default = "Vec::new")]
    pub peers: Vec<PeerConfig>,
}

impl RibConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_as == 0 {
            return Err(ConfigError::ZeroLocalAs);
        }
        let mut tables = HashSet::new();
        for table in &self.tables {
            if !tables.insert(table.table) {
                return Err(ConfigError::DuplicateTable(table.table));
            }
            if table.path_selection == PathSelectionMode::NPaths(0) {
                return Err(ConfigError::NoPathsSelected(table.table));
            }
        }
        let mut peers = HashSet::new();
        for peer in &self.peers {
            if !peers.insert(peer.address) {
                return Err(ConfigError::DuplicatePeer(peer.address));
            }
            for table in peer.tables.iter().flatten() {
                if !tables.contains(table) {
                    return Err(ConfigError::UnknownTable {
                        peer: peer.address,
                        table: *table,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn cluster_id(&self) -> RouterId {
        RouterId::from(self.cluster_id.unwrap_or(self.router_id))
    }

    pub fn peer_registry(&self) -> PeerRegistry {
        let mut registry = PeerRegistry::new(self.local_as, self.cluster_id());
        for peer in &self.peers {
            let tables: BTreeSet<TableKey> = match &peer.tables {
                Some(tables) => tables.iter().copied().collect(),
                None => self.tables.iter().map(|table| table.table).collect(),
            };
            registry.add_peer(
                peer.address,
                PeerInfo {
                    role: peer.role,
                    remote_as: peer.remote_as,
                    tables,
                },
            );
        }
        registry
    }
}

impl FromStr for RibConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: RibConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::bgp::bgp_peers::PeerTracker;
    use crate::components::bgp::table::{Afi, Safi};

    const CONFIG: &str = r#"{
        "local_as": 65000,
        "router_id": "192.0.2.1",
        "med_comparison": "always",
        "tables": [
            { "table": "ipv4 unicast" },
            { "table": "l2vpn evpn", "add_path": true, "path_selection": { "n_paths": 2 } }
        ],
        "peers": [
            { "address": "10.0.0.1", "role": "ebgp", "remote_as": 64512 },
            { "address": "bgp://10.0.0.2", "role": "rr_client", "tables": ["ipv4 unicast"] }
        ]
    }"#;

    #[test]
    fn test_parse_config() {
        let config: RibConfig = CONFIG.parse().unwrap();
        assert_eq!(config.local_as, 65000);
        assert_eq!(config.med_comparison, MedComparison::Always);
        assert_eq!(config.channel_bound, 64);
        assert_eq!(config.cluster_id(), RouterId::from(Ipv4Addr::new(192, 0, 2, 1)));
        assert_eq!(config.tables[1].table, TableKey::new(Afi::L2vpn, Safi::Evpn));
        assert!(config.tables[1].add_path);
        assert_eq!(config.tables[1].path_selection, PathSelectionMode::NPaths(2));
        assert_eq!(config.tables[0].path_selection, PathSelectionMode::Best);
        assert_eq!(config.peers[1].address, PeerId::from(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn test_defaults() {
        let config: RibConfig = r#"{"local_as": 1, "router_id": "1.1.1.1"}"#.parse().unwrap();
        assert_eq!(config.tables, Defaults::tables());
        assert!(config.peers.is_empty());
        assert_eq!(config.med_comparison, MedComparison::SameNeighborAs);
    }

    #[test]
    fn test_peer_registry() {
        let config: RibConfig = CONFIG.parse().unwrap();
        let registry = config.peer_registry();
        let first = PeerId::from(Ipv4Addr::new(10, 0, 0, 1));
        let second = PeerId::from(Ipv4Addr::new(10, 0, 0, 2));
        let evpn = TableKey::new(Afi::L2vpn, Safi::Evpn);

        assert_eq!(registry.role_of(first), Some(PeerRole::Ebgp));
        assert!(registry.is_table_supported(first, evpn));
        assert!(!registry.is_table_supported(second, evpn));
        assert_eq!(registry.peer(first).unwrap().remote_as, Some(64512));
    }

    #[test]
    fn test_validation_errors() {
        let zero = r#"{"local_as": 0, "router_id": "1.1.1.1"}"#.parse::<RibConfig>();
        assert!(matches!(zero, Err(ConfigError::ZeroLocalAs)));

        let duplicate_table = r#"{"local_as": 1, "router_id": "1.1.1.1",
            "tables": [{"table": "ipv4 unicast"}, {"table": "ipv4 unicast", "add_path": true}]}"#
            .parse::<RibConfig>();
        assert!(matches!(duplicate_table, Err(ConfigError::DuplicateTable(_))));

        let duplicate_peer = r#"{"local_as": 1, "router_id": "1.1.1.1", "peers": [
            {"address": "10.0.0.1", "role": "ibgp"}, {"address": "bgp://10.0.0.1", "role": "ebgp"}]}"#
            .parse::<RibConfig>();
        assert!(matches!(duplicate_peer, Err(ConfigError::DuplicatePeer(_))));

        let unknown_table = r#"{"local_as": 1, "router_id": "1.1.1.1", "peers": [
            {"address": "10.0.0.1", "role": "ibgp", "tables": ["ipv6 unicast"]}]}"#
            .parse::<RibConfig>();
        assert!(matches!(unknown_table, Err(ConfigError::UnknownTable { .. })));

        let no_paths = r#"{"local_as": 1, "router_id": "1.1.1.1",
            "tables": [{"table": "ipv4 unicast", "add_path": true, "path_selection": {"n_paths": 0}}]}"#
            .parse::<RibConfig>();
        assert!(matches!(no_paths, Err(ConfigError::NoPathsSelected(_))));

        let garbage = "{".parse::<RibConfig>();
        assert!(matches!(garbage, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("rib-config-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, CONFIG).unwrap();
        let config = RibConfig::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.peers.len(), 2);

        assert!(matches!(RibConfig::from_file(&path), Err(ConfigError::Io(_))));
    }
}
