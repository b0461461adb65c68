use crate::components::bgp::outbound::RoutePath;
use crate::components::bgp::table::{Afi, TableKey};
use crate::components::route::{PathAttributes, PathId, Route, RouteKey, NON_PATH_ID};
use log::info;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Per-family knowledge the RIB needs without understanding the family's
/// encoding.
pub trait RibSupport: Send + Sync + fmt::Debug {
    fn table_key(&self) -> TableKey;

    /// True when entries keep several paths per router (add-path).
    fn is_complex(&self) -> bool;

    /// Whether `key` is a destination of this table.
    fn accepts(&self, key: &RouteKey) -> bool;

    fn extract_attributes(&self, route: &Route) -> Option<Arc<PathAttributes>> {
        route.attributes.clone()
    }

    /// Builds the route value stored for a selected path.
    fn create_route(&self, key: &RouteKey, path_id: PathId, attributes: &Arc<PathAttributes>) -> Route {
        Route {
            key: key.clone(),
            path_id: self.route_list_key(path_id, key).path_id,
            attributes: Some(attributes.clone()),
            peer_type: Default::default(),
            igp_cost: 0,
        }
    }

    /// Identifies a path of `key` inside the loc-rib and adj-rib-outs.
    fn route_list_key(&self, path_id: PathId, key: &RouteKey) -> RoutePath {
        RoutePath {
            table: self.table_key(),
            key: key.clone(),
            path_id: if self.is_complex() { path_id } else { NON_PATH_ID },
        }
    }
}

/// IPv4 or IPv6 unicast, keyed by prefix.
#[derive(Debug, Clone)]
pub struct UnicastRibSupport {
    table: TableKey,
    add_path: bool,
}

impl UnicastRibSupport {
    pub fn ipv4() -> Self {
        Self {
            table: TableKey::IPV4_UNICAST,
            add_path: false,
        }
    }

    pub fn ipv6() -> Self {
        Self {
            table: TableKey::IPV6_UNICAST,
            add_path: false,
        }
    }

    pub fn with_add_path(mut self, add_path: bool) -> Self {
        self.add_path = add_path;
        self
    }
}

impl RibSupport for UnicastRibSupport {
    fn table_key(&self) -> TableKey {
        self.table
    }

    fn is_complex(&self) -> bool {
        self.add_path
    }

    fn accepts(&self, key: &RouteKey) -> bool {
        match (key, self.table.afi) {
            (RouteKey::Prefix(prefix), Afi::Ipv4) => prefix.is_ipv4(),
            (RouteKey::Prefix(prefix), Afi::Ipv6) => prefix.is_ipv6(),
            _ => false,
        }
    }
}

/// Any family whose NLRI the core keeps as opaque bytes.
#[derive(Debug, Clone)]
pub struct OpaqueRibSupport {
    table: TableKey,
    add_path: bool,
}

impl OpaqueRibSupport {
    pub fn new(table: TableKey, add_path: bool) -> Self {
        Self { table, add_path }
    }
}

impl RibSupport for OpaqueRibSupport {
    fn table_key(&self) -> TableKey {
        self.table
    }

    fn is_complex(&self) -> bool {
        self.add_path
    }

    fn accepts(&self, key: &RouteKey) -> bool {
        matches!(key, RouteKey::Opaque(_))
    }
}

/// Supports for the tables this speaker carries.
#[derive(Debug, Default)]
pub struct RibSupportRegistry {
    supports: BTreeMap<TableKey, Arc<dyn RibSupport>>,
}

impl RibSupportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks the support matching `table`: prefixes for IP unicast, opaque
    /// keys for everything else.
    pub fn support_for(table: TableKey, add_path: bool) -> Arc<dyn RibSupport> {
        if table == TableKey::IPV4_UNICAST {
            Arc::new(UnicastRibSupport::ipv4().with_add_path(add_path))
        } else if table == TableKey::IPV6_UNICAST {
            Arc::new(UnicastRibSupport::ipv6().with_add_path(add_path))
        } else {
            Arc::new(OpaqueRibSupport::new(table, add_path))
        }
    }

    pub fn register(&mut self, support: Arc<dyn RibSupport>) -> Option<Arc<dyn RibSupport>> {
        info!(
            "Registering RIB support for {} (add-path: {})",
            support.table_key(),
            support.is_complex()
        );
        self.supports.insert(support.table_key(), support)
    }

    pub fn get(&self, table: TableKey) -> Option<Arc<dyn RibSupport>> {
        self.supports.get(&table).cloned()
    }

    pub fn tables(&self) -> impl Iterator<Item = TableKey> + '_ {
        self.supports.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.supports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::bgp::table::Safi;
    use bytes::Bytes;
    use ip_network::IpNetwork;

    fn v4() -> RouteKey {
        RouteKey::from(IpNetwork::from_str_truncate("192.168.0.0/16").unwrap())
    }

    fn v6() -> RouteKey {
        RouteKey::from(IpNetwork::from_str_truncate("2001:db8::/32").unwrap())
    }

    #[test]
    fn test_unicast_accepts_its_family() {
        let ipv4 = UnicastRibSupport::ipv4();
        assert!(ipv4.accepts(&v4()));
        assert!(!ipv4.accepts(&v6()));
        assert!(!ipv4.accepts(&RouteKey::Opaque(Bytes::from_static(b"\x01"))));
        assert!(UnicastRibSupport::ipv6().accepts(&v6()));
    }

    #[test]
    fn test_route_list_key() {
        let simple = UnicastRibSupport::ipv4();
        assert_eq!(simple.route_list_key(7, &v4()).path_id, NON_PATH_ID);

        let evpn = TableKey::new(Afi::L2vpn, Safi::Evpn);
        let complex = OpaqueRibSupport::new(evpn, true);
        let key = RouteKey::Opaque(Bytes::from_static(b"\x02\x00"));
        let path = complex.route_list_key(7, &key);
        assert_eq!(path.path_id, 7);
        assert_eq!(path.table, evpn);
    }

    #[test]
    fn test_create_route() {
        let support = UnicastRibSupport::ipv4();
        let attributes = Arc::new(PathAttributes {
            local_pref: Some(300),
            ..Default::default()
        });
        let route = support.create_route(&v4(), 4, &attributes);
        assert_eq!(route.key, v4());
        assert_eq!(route.path_id, NON_PATH_ID);
        assert_eq!(support.extract_attributes(&route), Some(attributes));
    }

    #[test]
    fn test_registry() {
        let mut registry = RibSupportRegistry::new();
        registry.register(RibSupportRegistry::support_for(TableKey::IPV4_UNICAST, false));
        registry.register(RibSupportRegistry::support_for(
            TableKey::new(Afi::L2vpn, Safi::Evpn),
            true,
        ));
        assert_eq!(registry.len(), 2);
        assert!(!registry.get(TableKey::IPV4_UNICAST).unwrap().is_complex());
        assert!(registry
            .get(TableKey::new(Afi::L2vpn, Safi::Evpn))
            .unwrap()
            .is_complex());
        assert!(registry.get(TableKey::IPV6_UNICAST).is_none());
    }
}
