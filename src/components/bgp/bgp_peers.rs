use crate::components::bgp::table::TableKey;
use crate::components::filters::{export_filter, ExportCandidate, Filter};
use crate::components::route::{PathAttributes, PeerId, RouterId};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

/// Relationship of a peer to this speaker, which decides the export policy
/// applied to routes sent to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Ebgp,
    Ibgp,
    RrClient,
    /// Local applications feeding the RIB. Never an export destination.
    Internal,
}

impl PeerRole {
    pub const ALL: [PeerRole; 4] = [
        PeerRole::Ebgp,
        PeerRole::Ibgp,
        PeerRole::RrClient,
        PeerRole::Internal,
    ];
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PeerRole::Ebgp => write!(f, "ebgp"),
            PeerRole::Ibgp => write!(f, "ibgp"),
            PeerRole::RrClient => write!(f, "rr-client"),
            PeerRole::Internal => write!(f, "internal"),
        }
    }
}

/// Peers sharing a role, and the export policy they share.
pub struct PeerExportGroup {
    role: PeerRole,
    filter: Box<dyn Filter<ExportCandidate>>,
    peers: Vec<PeerId>,
}

impl PeerExportGroup {
    pub fn new(role: PeerRole, filter: Box<dyn Filter<ExportCandidate>>, peers: Vec<PeerId>) -> Self {
        Self { role, filter, peers }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn peers(&self) -> &[PeerId] {
        &self.peers
    }

    /// Attributes every member of the group receives for a path learned from
    /// `source`, or `None` when the policy rejects the export.
    pub fn effective_attributes(
        &self,
        source_role: PeerRole,
        source: RouterId,
        attributes: &Arc<PathAttributes>,
    ) -> Option<Arc<PathAttributes>> {
        let mut candidate = ExportCandidate {
            source_role,
            source,
            attributes: PathAttributes::clone(attributes),
        };
        if !self.filter.filter(&mut candidate) {
            return None;
        }
        if candidate.attributes == **attributes {
            Some(attributes.clone())
        } else {
            Some(Arc::new(candidate.attributes))
        }
    }
}

impl fmt::Debug for PeerExportGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PeerExportGroup")
            .field("role", &self.role)
            .field("filter", &self.filter.filter_type())
            .field("peers", &self.peers)
            .finish()
    }
}

/// What the propagation code needs to know about the peers of the speaker.
pub trait PeerTracker: Send + Sync {
    fn peer_group(&self, role: PeerRole) -> Option<&PeerExportGroup>;

    fn role_of(&self, peer: PeerId) -> Option<PeerRole>;

    fn is_table_supported(&self, peer: PeerId, table: TableKey) -> bool;

    fn is_peer_disconnected(&self, peer: PeerId) -> bool;

    /// AS of an eBGP peer, when known.
    fn remote_as(&self, peer: PeerId) -> Option<u32>;

    /// Whether a route learned from a `from` peer may ever be exported to a
    /// `to` peer.
    fn is_export_permitted(&self, from: PeerRole, to: PeerRole) -> bool {
        !matches!(
            (from, to),
            (_, PeerRole::Internal) | (PeerRole::Ibgp, PeerRole::Ibgp)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub role: PeerRole,
    pub remote_as: Option<u32>,
    pub tables: BTreeSet<TableKey>,
}

/// Peer tracker backed by the configured peer set plus a cache of peers
/// whose session is currently down.
#[derive(Debug)]
pub struct PeerRegistry {
    local_as: u32,
    cluster_id: RouterId,
    peers: BTreeMap<PeerId, PeerInfo>,
    groups: BTreeMap<PeerRole, PeerExportGroup>,
    disconnected: HashSet<PeerId>,
}

impl PeerRegistry {
    pub fn new(local_as: u32, cluster_id: RouterId) -> Self {
        Self {
            local_as,
            cluster_id,
            peers: BTreeMap::new(),
            groups: BTreeMap::new(),
            disconnected: HashSet::new(),
        }
    }

    pub fn local_as(&self) -> u32 {
        self.local_as
    }

    pub fn cluster_id(&self) -> RouterId {
        self.cluster_id
    }

    pub fn add_peer(&mut self, peer: PeerId, info: PeerInfo) {
        info!("Adding {} peer {}", info.role, peer);
        let role = info.role;
        if let Some(previous) = self.peers.insert(peer, info) {
            self.rebuild_group(previous.role);
        }
        self.rebuild_group(role);
    }

    pub fn remove_peer(&mut self, peer: PeerId) -> Option<PeerInfo> {
        let info = self.peers.remove(&peer)?;
        info!("Removing {} peer {}", info.role, peer);
        self.disconnected.remove(&peer);
        self.rebuild_group(info.role);
        Some(info)
    }

    pub fn peer(&self, peer: PeerId) -> Option<&PeerInfo> {
        self.peers.get(&peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = (&PeerId, &PeerInfo)> {
        self.peers.iter()
    }

    /// Returns true when the table was newly added for the peer.
    pub fn add_table(&mut self, peer: PeerId, table: TableKey) -> bool {
        self.peers
            .get_mut(&peer)
            .map(|info| info.tables.insert(table))
            .unwrap_or(false)
    }

    pub fn set_disconnected(&mut self, peer: PeerId) {
        debug!("Peer {} disconnected", peer);
        self.disconnected.insert(peer);
    }

    pub fn set_connected(&mut self, peer: PeerId) {
        debug!("Peer {} connected", peer);
        self.disconnected.remove(&peer);
    }

    fn rebuild_group(&mut self, role: PeerRole) {
        let members: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, info)| info.role == role)
            .map(|(peer, _)| *peer)
            .collect();
        match export_filter(role, self.local_as, self.cluster_id) {
            Some(filter) if !members.is_empty() => {
                self.groups
                    .insert(role, PeerExportGroup::new(role, filter, members));
            }
            _ => {
                self.groups.remove(&role);
            }
        }
    }
}

impl PeerTracker for PeerRegistry {
    fn peer_group(&self, role: PeerRole) -> Option<&PeerExportGroup> {
        self.groups.get(&role)
    }

    fn role_of(&self, peer: PeerId) -> Option<PeerRole> {
        self.peers.get(&peer).map(|info| info.role)
    }

    fn is_table_supported(&self, peer: PeerId, table: TableKey) -> bool {
        self.peers
            .get(&peer)
            .map(|info| info.tables.contains(&table))
            .unwrap_or(false)
    }

    fn is_peer_disconnected(&self, peer: PeerId) -> bool {
        self.disconnected.contains(&peer)
    }

    fn remote_as(&self, peer: PeerId) -> Option<u32> {
        self.peers.get(&peer)?.remote_as
    }
}
