use crate::components::bgp::bgp_peers::{PeerRole, PeerTracker};
use crate::components::bgp::table::TableKey;
use crate::components::route::{PathAttributes, PeerId, RouterId};
use log::trace;

pub trait Filter<T>: 'static + Send + Sync
where
    T: 'static + Send + Sync,
    T: Clone,
{
    fn filter(&self, element: &mut T) -> bool;
    fn filter_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A best path on its way out to one peer group. Filters rewrite the
/// attributes in place and return false to reject the export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportCandidate {
    pub source_role: PeerRole,
    pub source: RouterId,
    pub attributes: PathAttributes,
}

/// Export towards eBGP peers: prepend the local AS, drop iBGP-only
/// attributes.
pub struct FilterToEbgp {
    local_as: u32,
}
impl FilterToEbgp {
    pub fn new(local_as: u32) -> Self {
        Self { local_as }
    }
}
impl Filter<ExportCandidate> for FilterToEbgp {
    fn filter(&self, candidate: &mut ExportCandidate) -> bool {
        let attributes = &mut candidate.attributes;
        attributes.prepend_as(self.local_as);
        attributes.local_pref = None;
        attributes.originator_id = None;
        attributes.cluster_list.clear();
        true
    }
}

/// Export towards non-client iBGP peers. Client routes are reflected. Whether
/// an iBGP-learned route reaches this group at all is up to
/// [`PeerTracker::is_export_permitted`].
pub struct FilterToIbgp {
    cluster_id: RouterId,
}
impl FilterToIbgp {
    pub fn new(cluster_id: RouterId) -> Self {
        Self { cluster_id }
    }
}
impl Filter<ExportCandidate> for FilterToIbgp {
    fn filter(&self, candidate: &mut ExportCandidate) -> bool {
        if candidate.source_role == PeerRole::RrClient {
            reflect(candidate, self.cluster_id);
        }
        true
    }
}

/// Export towards route-reflector clients: everything goes, iBGP-learned
/// routes are reflected.
pub struct FilterToRrClient {
    cluster_id: RouterId,
}
impl FilterToRrClient {
    pub fn new(cluster_id: RouterId) -> Self {
        Self { cluster_id }
    }
}
impl Filter<ExportCandidate> for FilterToRrClient {
    fn filter(&self, candidate: &mut ExportCandidate) -> bool {
        match candidate.source_role {
            PeerRole::Ebgp | PeerRole::Internal => {}
            PeerRole::Ibgp | PeerRole::RrClient => reflect(candidate, self.cluster_id),
        }
        true
    }
}

fn reflect(candidate: &mut ExportCandidate, cluster_id: RouterId) {
    let attributes = &mut candidate.attributes;
    if attributes.originator_id.is_none() {
        attributes.originator_id = Some(candidate.source);
    }
    attributes.cluster_list.insert(0, cluster_id);
}

/// Export filter for a destination role. The internal role never receives
/// routes through the adj-rib-out.
pub fn export_filter(
    role: PeerRole,
    local_as: u32,
    cluster_id: RouterId,
) -> Option<Box<dyn Filter<ExportCandidate>>> {
    match role {
        PeerRole::Ebgp => Some(Box::new(FilterToEbgp::new(local_as))),
        PeerRole::Ibgp => Some(Box::new(FilterToIbgp::new(cluster_id))),
        PeerRole::RrClient => Some(Box::new(FilterToRrClient::new(cluster_id))),
        PeerRole::Internal => None,
    }
}

/// Decides whether a path learned from `source` may be sent to
/// `destination` at all.
pub fn filter_routes(
    destination: PeerId,
    source: PeerId,
    table: TableKey,
    tracker: &dyn PeerTracker,
) -> bool {
    if destination == source {
        return false;
    }
    if !tracker.is_table_supported(destination, table) {
        trace!(
            "Route rejected, peer {} does not support this table type {}",
            destination,
            table
        );
        return false;
    }
    if tracker.is_peer_disconnected(destination) {
        trace!("Route rejected, peer {} is disconnected", destination);
        return false;
    }
    true
}
