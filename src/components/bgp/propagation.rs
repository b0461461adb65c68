use crate::components::bgp::bgp_bestroute::BestPath;
use crate::components::bgp::bgp_peers::{PeerExportGroup, PeerRole, PeerTracker};
use crate::components::bgp::bgp_rib_entry::{EntryPayload, RouteEntry};
use crate::components::bgp::outbound::{OutboundSink, SinkError, Target};
use crate::components::bgp::rib_support::RibSupport;
use crate::components::bgp::table::TableKey;
use crate::components::filters::filter_routes;
use crate::components::route::{PathAttributes, PeerId, Route, RouteKey};
use log::{debug, trace};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropagationError {
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Export attributes of one best path, computed at most once per role.
struct EffectiveAttributes<'a> {
    path: &'a BestPath,
    source_role: PeerRole,
    tracker: &'a dyn PeerTracker,
    by_role: BTreeMap<PeerRole, Option<Arc<PathAttributes>>>,
}

impl<'a> EffectiveAttributes<'a> {
    fn new(path: &'a BestPath, source_role: PeerRole, tracker: &'a dyn PeerTracker) -> Self {
        Self {
            path,
            source_role,
            tracker,
            by_role: BTreeMap::new(),
        }
    }

    fn for_group(&mut self, group: &PeerExportGroup) -> Option<Arc<PathAttributes>> {
        let path = self.path;
        let source_role = self.source_role;
        let tracker = self.tracker;
        self.by_role
            .entry(group.role())
            .or_insert_with(|| {
                if !tracker.is_export_permitted(source_role, group.role()) {
                    trace!("Export of {} from {} to {} not permitted", path, source_role, group.role());
                    return None;
                }
                group.effective_attributes(source_role, path.router_id(), path.attributes())
            })
            .clone()
    }
}

/// Writes the outcome of a selection pass into the loc-rib and the
/// adj-rib-outs of the peers allowed to see it.
pub struct Propagation<'a> {
    table: TableKey,
    support: &'a dyn RibSupport,
    tracker: &'a dyn PeerTracker,
}

impl<'a> Propagation<'a> {
    pub fn new(support: &'a dyn RibSupport, tracker: &'a dyn PeerTracker) -> Self {
        Self {
            table: support.table_key(),
            support,
            tracker,
        }
    }

    /// Propagates an entry whose `select_best` reported a change: withdraws
    /// the paths that left the selection, then advertises the new and changed
    /// ones.
    pub fn update_route<P: EntryPayload>(
        &self,
        key: &RouteKey,
        entry: &mut RouteEntry<P>,
        sink: &mut dyn OutboundSink,
    ) -> Result<(), PropagationError> {
        for removed in entry.take_removed_best_paths() {
            self.remove_path(key, &removed, sink)?;
        }
        for path in entry.take_new_best_paths() {
            self.add_path(key, &path, sink)?;
        }
        Ok(())
    }

    /// Sends the selected paths of an entry to a peer that just started
    /// carrying the table. Returns the number of routes written.
    pub fn initialize_peer<P: EntryPayload>(
        &self,
        peer: PeerId,
        key: &RouteKey,
        entry: &RouteEntry<P>,
        sink: &mut dyn OutboundSink,
    ) -> Result<usize, PropagationError> {
        let Some(group) = self
            .tracker
            .role_of(peer)
            .and_then(|role| self.tracker.peer_group(role))
        else {
            return Ok(0);
        };

        let mut written = 0;
        for path in entry.best_paths() {
            if !filter_routes(peer, path.peer_id(), self.table, self.tracker) {
                continue;
            }
            let mut effective = EffectiveAttributes::new(path, self.source_role(path), self.tracker);
            let Some(attributes) = effective.for_group(group) else {
                continue;
            };
            if self.loops_back(group, peer, &attributes) {
                continue;
            }
            let route = self.route_with(key, path, &attributes);
            let route_path = self.support.route_list_key(path.local_path_id(), key);
            debug!("Write route {} to peer AdjRibsOut {}", route_path, peer);
            sink.write(Target::AdjRibOut(peer), route_path, attributes, route)?;
            written += 1;
        }
        Ok(written)
    }

    fn source_role(&self, path: &BestPath) -> PeerRole {
        // Paths from peers the tracker does not know are locally originated.
        self.tracker
            .role_of(path.peer_id())
            .unwrap_or(PeerRole::Internal)
    }

    fn route_with(&self, key: &RouteKey, path: &BestPath, attributes: &Arc<PathAttributes>) -> Route {
        self.support.create_route(key, path.local_path_id(), attributes)
    }

    /// An eBGP peer never receives a path that already crossed its AS.
    fn loops_back(&self, group: &PeerExportGroup, peer: PeerId, attributes: &PathAttributes) -> bool {
        if group.role() != PeerRole::Ebgp {
            return false;
        }
        match self.tracker.remote_as(peer) {
            Some(asn) if attributes.contains_as(asn) => {
                trace!("Route rejected, AS {} of peer {} is on the path", asn, peer);
                true
            }
            _ => false,
        }
    }

    fn export_groups(&self) -> impl Iterator<Item = &'a PeerExportGroup> + 'a {
        let tracker = self.tracker;
        PeerRole::ALL
            .into_iter()
            .filter(|role| *role != PeerRole::Internal)
            .filter_map(move |role| tracker.peer_group(role))
    }

    fn remove_path(
        &self,
        key: &RouteKey,
        path: &BestPath,
        sink: &mut dyn OutboundSink,
    ) -> Result<(), PropagationError> {
        trace!("Best path removed {}", path);
        let route_path = self.support.route_list_key(path.local_path_id(), key);
        debug!("Delete route from LocRib {}", route_path);
        sink.delete(Target::LocRib, route_path.clone())?;

        for group in self.export_groups() {
            for peer in group.peers() {
                if filter_routes(*peer, path.peer_id(), self.table, self.tracker) {
                    trace!("Removing {} from transaction for peer {}", route_path, peer);
                    sink.delete(Target::AdjRibOut(*peer), route_path.clone())?;
                }
            }
        }
        Ok(())
    }

    fn add_path(
        &self,
        key: &RouteKey,
        path: &BestPath,
        sink: &mut dyn OutboundSink,
    ) -> Result<(), PropagationError> {
        let route_path = self.support.route_list_key(path.local_path_id(), key);
        let route = self.route_with(key, path, path.attributes());
        debug!("Write route to LocRib {} from {}", route_path, path);
        sink.write(Target::LocRib, route_path.clone(), path.attributes().clone(), route)?;

        let mut effective = EffectiveAttributes::new(path, self.source_role(path), self.tracker);
        for group in self.export_groups() {
            let attributes = effective.for_group(group);
            let route = attributes
                .as_ref()
                .map(|attributes| self.route_with(key, path, attributes));
            for peer in group.peers() {
                if !filter_routes(*peer, path.peer_id(), self.table, self.tracker) {
                    continue;
                }
                let target = Target::AdjRibOut(*peer);
                match (&attributes, &route) {
                    (Some(attributes), Some(route)) if !self.loops_back(group, *peer, attributes) => {
                        debug!("Write route {} to peer AdjRibsOut {}", route_path, peer);
                        sink.write(target, route_path.clone(), attributes.clone(), route.clone())?;
                    }
                    _ => {
                        trace!("Removing {} from transaction for peer {}", route_path, peer);
                        sink.delete(target, route_path.clone())?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::bgp::bgp_peers::{PeerInfo, PeerRegistry};
    use crate::components::bgp::bgp_rib_entry::{ComplexRouteEntry, SimpleRouteEntry};
    use crate::components::bgp::bgp_selector::{BestPathSelector, PathSelectionMode};
    use crate::components::bgp::outbound::{OutboundStore, RoutePath};
    use crate::components::bgp::rib_support::UnicastRibSupport;
    use crate::components::route::{PathElement, PathId, RouterId, NON_PATH_ID};
    use ip_network::IpNetwork;
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;

    const LOCAL_AS: u32 = 65000;
    const CLUSTER_ID: RouterId = RouterId(0x0a00_00ff);

    fn router(last: u8) -> RouterId {
        RouterId::from(Ipv4Addr::new(10, 0, 0, last))
    }

    fn peer(last: u8) -> PeerId {
        PeerId::from(router(last))
    }

    fn key() -> RouteKey {
        RouteKey::from(IpNetwork::from_str_truncate("172.16.0.0/12").unwrap())
    }

    fn route_path() -> RoutePath {
        UnicastRibSupport::ipv4().route_list_key(NON_PATH_ID, &key())
    }

    fn registry(roles: &[(u8, PeerRole)]) -> PeerRegistry {
        let mut registry = PeerRegistry::new(LOCAL_AS, CLUSTER_ID);
        for (last, role) in roles {
            registry.add_peer(
                peer(*last),
                PeerInfo {
                    role: *role,
                    remote_as: None,
                    tables: BTreeSet::from([TableKey::IPV4_UNICAST]),
                },
            );
        }
        registry
    }

    fn route(local_pref: u32) -> Route {
        Route::new(
            key(),
            PathAttributes {
                as_path: vec![PathElement::ASN(100)],
                local_pref: Some(local_pref),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_split_horizon_for_rr_client() -> Result<(), PropagationError> {
        let support = UnicastRibSupport::ipv4();
        let tracker = registry(&[
            (1, PeerRole::RrClient),
            (2, PeerRole::RrClient),
            (3, PeerRole::Ibgp),
        ]);
        let mut store = OutboundStore::new();
        let mut entry = SimpleRouteEntry::new();
        entry.add_route(router(1), NON_PATH_ID, route(100));
        assert!(entry.select_best(LOCAL_AS, &support));

        Propagation::new(&support, &tracker).update_route(&key(), &mut entry, &mut store)?;

        assert!(store.get(Target::LocRib, &route_path()).is_some());
        assert!(store.get(Target::AdjRibOut(peer(1)), &route_path()).is_none());

        let reflected = store.get(Target::AdjRibOut(peer(2)), &route_path()).unwrap();
        assert_eq!(reflected.attributes.originator_id, Some(router(1)));
        assert_eq!(reflected.attributes.cluster_list, vec![CLUSTER_ID]);

        let to_ibgp = store.get(Target::AdjRibOut(peer(3)), &route_path()).unwrap();
        assert_eq!(to_ibgp.attributes.cluster_list, vec![CLUSTER_ID]);
        Ok(())
    }

    #[test]
    fn test_ibgp_route_not_sent_to_ibgp() -> Result<(), PropagationError> {
        let support = UnicastRibSupport::ipv4();
        let tracker = registry(&[
            (1, PeerRole::Ibgp),
            (2, PeerRole::Ibgp),
            (3, PeerRole::Ebgp),
        ]);
        let mut store = OutboundStore::new();
        let mut entry = SimpleRouteEntry::new();
        entry.add_route(router(1), NON_PATH_ID, route(100));
        entry.select_best(LOCAL_AS, &support);

        Propagation::new(&support, &tracker).update_route(&key(), &mut entry, &mut store)?;

        assert!(store.get(Target::AdjRibOut(peer(2)), &route_path()).is_none());
        let to_ebgp = store.get(Target::AdjRibOut(peer(3)), &route_path()).unwrap();
        assert_eq!(to_ebgp.attributes.neighbor_as(), LOCAL_AS);
        assert_eq!(to_ebgp.attributes.local_pref, None);
        assert_eq!(to_ebgp.route.attributes.as_ref(), Some(&to_ebgp.attributes));
        Ok(())
    }

    #[test]
    fn test_replacing_best_path() -> Result<(), PropagationError> {
        let support = UnicastRibSupport::ipv4();
        let tracker = registry(&[(1, PeerRole::Ebgp), (2, PeerRole::Ebgp), (3, PeerRole::Ebgp)]);
        let propagation = Propagation::new(&support, &tracker);
        let mut store = OutboundStore::new();
        let mut entry = SimpleRouteEntry::new();

        entry.add_route(router(1), NON_PATH_ID, route(200));
        entry.add_route(router(2), NON_PATH_ID, route(100));
        entry.select_best(LOCAL_AS, &support);
        propagation.update_route(&key(), &mut entry, &mut store)?;
        assert!(store.get(Target::AdjRibOut(peer(1)), &route_path()).is_none());
        assert!(store.get(Target::AdjRibOut(peer(2)), &route_path()).is_some());

        // peer 1 withdraws, peer 2 takes over
        entry.remove_route(router(1), NON_PATH_ID);
        assert!(entry.select_best(LOCAL_AS, &support));
        propagation.update_route(&key(), &mut entry, &mut store)?;
        assert!(store.get(Target::AdjRibOut(peer(1)), &route_path()).is_some());
        assert!(store.get(Target::AdjRibOut(peer(2)), &route_path()).is_none());
        assert!(store.get(Target::AdjRibOut(peer(3)), &route_path()).is_some());

        // last one gone
        entry.remove_route(router(2), NON_PATH_ID);
        assert!(entry.select_best(LOCAL_AS, &support));
        propagation.update_route(&key(), &mut entry, &mut store)?;
        assert_eq!(store.len(Target::LocRib), 0);
        assert!(store.targets().is_empty());
        Ok(())
    }

    #[test]
    fn test_disconnected_peer_skipped() -> Result<(), PropagationError> {
        let support = UnicastRibSupport::ipv4();
        let mut tracker = registry(&[(1, PeerRole::Ebgp), (2, PeerRole::Ebgp)]);
        tracker.set_disconnected(peer(2));
        let mut store = OutboundStore::new();
        let mut entry = SimpleRouteEntry::new();
        entry.add_route(router(1), NON_PATH_ID, route(100));
        entry.select_best(LOCAL_AS, &support);

        Propagation::new(&support, &tracker).update_route(&key(), &mut entry, &mut store)?;
        assert_eq!(store.len(Target::AdjRibOut(peer(2))), 0);

        tracker.set_connected(peer(2));
        let propagation = Propagation::new(&support, &tracker);
        assert_eq!(propagation.initialize_peer(peer(2), &key(), &entry, &mut store)?, 1);
        assert_eq!(store.len(Target::AdjRibOut(peer(2))), 1);
        // never back to the source
        assert_eq!(propagation.initialize_peer(peer(1), &key(), &entry, &mut store)?, 0);
        Ok(())
    }

    #[test]
    fn test_sink_error_is_surfaced() {
        let support = UnicastRibSupport::ipv4();
        let tracker = registry(&[(1, PeerRole::Ebgp), (2, PeerRole::Ebgp)]);
        let mut store = OutboundStore::new();
        store.set_rejecting(peer(2), true);
        let mut entry = SimpleRouteEntry::new();
        entry.add_route(router(1), NON_PATH_ID, route(100));
        entry.select_best(LOCAL_AS, &support);

        let result = Propagation::new(&support, &tracker).update_route(&key(), &mut entry, &mut store);
        assert!(matches!(
            result,
            Err(PropagationError::Sink(SinkError::Rejected { .. }))
        ));
    }

    #[test]
    fn test_locally_originated_path() -> Result<(), PropagationError> {
        let support = UnicastRibSupport::ipv4();
        let tracker = registry(&[(2, PeerRole::Ibgp)]);
        let mut store = OutboundStore::new();
        let mut entry = SimpleRouteEntry::new();
        entry.add_route(router(200), NON_PATH_ID, route(100));
        entry.select_best(LOCAL_AS, &support);

        Propagation::new(&support, &tracker).update_route(&key(), &mut entry, &mut store)?;
        let sent = store.get(Target::AdjRibOut(peer(2)), &route_path()).unwrap();
        assert_eq!(sent.attributes.originator_id, None);
        Ok(())
    }

    #[test]
    fn test_ebgp_peer_never_sees_its_own_as() -> Result<(), PropagationError> {
        let support = UnicastRibSupport::ipv4();
        let mut tracker = registry(&[(1, PeerRole::Ebgp), (3, PeerRole::Ebgp)]);
        for (last, remote_as) in [(2, 100), (3, 64503)] {
            tracker.add_peer(
                peer(last),
                PeerInfo {
                    role: PeerRole::Ebgp,
                    remote_as: Some(remote_as),
                    tables: BTreeSet::from([TableKey::IPV4_UNICAST]),
                },
            );
        }
        let propagation = Propagation::new(&support, &tracker);
        let mut store = OutboundStore::new();
        let mut entry = SimpleRouteEntry::new();
        entry.add_route(router(1), NON_PATH_ID, route(100));
        entry.select_best(LOCAL_AS, &support);

        propagation.update_route(&key(), &mut entry, &mut store)?;
        // AS 100 is on the path
        assert!(store.get(Target::AdjRibOut(peer(2)), &route_path()).is_none());
        assert!(store.get(Target::AdjRibOut(peer(3)), &route_path()).is_some());

        assert_eq!(propagation.initialize_peer(peer(2), &key(), &entry, &mut store)?, 0);
        assert_eq!(propagation.initialize_peer(peer(3), &key(), &entry, &mut store)?, 1);
        Ok(())
    }

    /// Registry that lets iBGP routes flow between iBGP peers.
    struct FullMeshOff(PeerRegistry);

    impl PeerTracker for FullMeshOff {
        fn peer_group(&self, role: PeerRole) -> Option<&PeerExportGroup> {
            self.0.peer_group(role)
        }

        fn role_of(&self, peer: PeerId) -> Option<PeerRole> {
            self.0.role_of(peer)
        }

        fn is_table_supported(&self, peer: PeerId, table: TableKey) -> bool {
            self.0.is_table_supported(peer, table)
        }

        fn is_peer_disconnected(&self, peer: PeerId) -> bool {
            self.0.is_peer_disconnected(peer)
        }

        fn remote_as(&self, peer: PeerId) -> Option<u32> {
            self.0.remote_as(peer)
        }

        fn is_export_permitted(&self, _from: PeerRole, to: PeerRole) -> bool {
            to != PeerRole::Internal
        }
    }

    #[test]
    fn test_export_rule_comes_from_tracker() -> Result<(), PropagationError> {
        let support = UnicastRibSupport::ipv4();
        let tracker = FullMeshOff(registry(&[(1, PeerRole::Ibgp), (2, PeerRole::Ibgp)]));
        let propagation = Propagation::new(&support, &tracker);
        let mut store = OutboundStore::new();
        let mut entry = SimpleRouteEntry::new();
        entry.add_route(router(1), NON_PATH_ID, route(100));
        entry.select_best(LOCAL_AS, &support);

        propagation.update_route(&key(), &mut entry, &mut store)?;
        assert!(store.get(Target::AdjRibOut(peer(2)), &route_path()).is_some());
        Ok(())
    }

    fn add_path_key(local_path_id: PathId) -> RoutePath {
        UnicastRibSupport::ipv4()
            .with_add_path(true)
            .route_list_key(local_path_id, &key())
    }

    #[test]
    fn test_all_paths_are_advertised_under_local_ids() -> Result<(), PropagationError> {
        let support = UnicastRibSupport::ipv4().with_add_path(true);
        let tracker = registry(&[(1, PeerRole::Ibgp), (2, PeerRole::Ibgp), (3, PeerRole::Ebgp)]);
        let propagation = Propagation::new(&support, &tracker);
        let all_paths = || BestPathSelector::new(LOCAL_AS).with_path_selection(PathSelectionMode::AllPaths);
        let mut store = OutboundStore::new();
        let mut entry = ComplexRouteEntry::new();
        entry.add_route(router(1), 5, route(200).with_path_id(5));
        entry.add_route(router(2), 5, route(100).with_path_id(5));
        assert!(entry.select_best_with(all_paths(), &support));
        propagation.update_route(&key(), &mut entry, &mut store)?;

        assert_eq!(store.len(Target::LocRib), 2);
        assert_eq!(store.len(Target::AdjRibOut(peer(3))), 2);
        let second = store.get(Target::LocRib, &add_path_key(2)).unwrap();
        assert_eq!(second.route.path_id, 2);
        assert_eq!(second.attributes.local_pref, Some(100));

        // Only the withdrawn path leaves
        entry.remove_route(router(1), 5);
        assert!(entry.select_best_with(all_paths(), &support));
        propagation.update_route(&key(), &mut entry, &mut store)?;
        assert!(store.get(Target::LocRib, &add_path_key(1)).is_none());
        assert!(store.get(Target::LocRib, &add_path_key(2)).is_some());
        assert_eq!(store.len(Target::AdjRibOut(peer(3))), 1);

        assert_eq!(propagation.initialize_peer(peer(3), &key(), &entry, &mut store)?, 1);
        Ok(())
    }
}
