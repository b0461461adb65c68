use crate::components::route::{Origin, PathAttributes, PathId, PeerId, PeerType, RouterId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Attribute values the decision process compares, resolved once per path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BestPathState {
    pub local_pref: u32,
    /// Missing MED is treated as 0.
    pub multi_exit_disc: u32,
    pub origin: Origin,
    pub peer_as: u32,
    pub as_path_len: usize,
    pub depreferenced: bool,
}

impl BestPathState {
    pub fn resolve(attributes: &PathAttributes) -> Self {
        Self {
            local_pref: attributes.local_pref_or_default(),
            multi_exit_disc: attributes.multi_exit_disc.unwrap_or(0),
            origin: attributes.origin,
            peer_as: attributes.neighbor_as(),
            as_path_len: attributes.as_path_len(),
            depreferenced: attributes.is_depreferenced(),
        }
    }
}

/// Winner of one selection pass. Only the selector creates these, and two of
/// them are the same best path when all fields are equal.
///
/// `path_id` is the identifier the contributing router sent, `local_path_id`
/// the one this speaker advertises the path under in add-path tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestPath {
    router_id: RouterId,
    peer_id: PeerId,
    path_id: PathId,
    local_path_id: PathId,
    peer_type: PeerType,
    attributes: Arc<PathAttributes>,
    state: BestPathState,
}

impl BestPath {
    pub(crate) fn new(
        router_id: RouterId,
        path_id: PathId,
        local_path_id: PathId,
        peer_type: PeerType,
        attributes: Arc<PathAttributes>,
        state: BestPathState,
    ) -> Self {
        Self {
            router_id,
            peer_id: PeerId::from(router_id),
            path_id,
            local_path_id,
            peer_type,
            attributes,
            state,
        }
    }

    pub fn router_id(&self) -> RouterId {
        self.router_id
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn path_id(&self) -> PathId {
        self.path_id
    }

    pub fn local_path_id(&self) -> PathId {
        self.local_path_id
    }

    /// Same contributing path, whatever its attributes are now.
    pub fn is_same_path(&self, other: &BestPath) -> bool {
        self.router_id == other.router_id && self.local_path_id == other.local_path_id
    }

    pub fn peer_type(&self) -> PeerType {
        self.peer_type
    }

    pub fn attributes(&self) -> &Arc<PathAttributes> {
        &self.attributes
    }

    pub fn state(&self) -> &BestPathState {
        &self.state
    }

    pub fn is_depreferenced(&self) -> bool {
        self.state.depreferenced
    }
}

impl fmt::Display for BestPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} path {} (local-pref {}, as-path {}, med {})",
            self.peer_id,
            self.path_id,
            self.state.local_pref,
            self.state.as_path_len,
            self.state.multi_exit_disc
        )
    }
}
