use bytes::Bytes;
use ip_network::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{AddrParseError, IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;

/// Add-path identifier as carried in the NLRI.
pub type PathId = u32;

/// Path identifier used by tables without add-path support.
pub const NON_PATH_ID: PathId = 0;

/// Local preference assumed for routes that do not carry the attribute.
pub const DEFAULT_LOCAL_PREF: u32 = 100;

/// Well-known LLGR_STALE community (RFC 9494).
pub const LLGR_STALE: u32 = 0xFFFF_0006;

/// 32-bit identity of a contributing peer, usually its BGP identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RouterId(pub u32);

impl From<Ipv4Addr> for RouterId {
    fn from(addr: Ipv4Addr) -> Self {
        Self(u32::from(addr))
    }
}

impl From<RouterId> for Ipv4Addr {
    fn from(id: RouterId) -> Self {
        Ipv4Addr::from(id.0)
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", Ipv4Addr::from(*self))
    }
}

impl FromStr for RouterId {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(Ipv4Addr::from_str(s)?))
    }
}

/// Peer identity derived from a [`RouterId`], displayed as `bgp://a.b.c.d`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(RouterId);

impl PeerId {
    const SCHEME: &'static str = "bgp://";

    pub fn router_id(&self) -> RouterId {
        self.0
    }
}

impl From<RouterId> for PeerId {
    fn from(id: RouterId) -> Self {
        Self(id)
    }
}

impl From<Ipv4Addr> for PeerId {
    fn from(addr: Ipv4Addr) -> Self {
        Self(RouterId::from(addr))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", Self::SCHEME, self.0)
    }
}

impl FromStr for PeerId {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = s.strip_prefix(Self::SCHEME).unwrap_or(s);
        Ok(Self(RouterId::from_str(address)?))
    }
}

impl TryFrom<String> for PeerId {
    type Error = AddrParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

impl From<PeerId> for String {
    fn from(peer: PeerId) -> Self {
        peer.to_string()
    }
}

/// Kind of session a route was learned over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PeerType {
    #[default]
    Internal,
    External,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Origin {
    #[default]
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathElement {
    ASN(u32),
    ASSet(Vec<u32>),
}

/// Decoded path attributes of one route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PathAttributes {
    pub origin: Origin,
    pub as_path: Vec<PathElement>,
    pub next_hop: Option<IpAddr>,
    pub local_pref: Option<u32>,
    pub multi_exit_disc: Option<u32>,
    pub communities: Vec<u32>,
    pub originator_id: Option<RouterId>,
    pub cluster_list: Vec<RouterId>,
}

impl PathAttributes {
    /// Number of ASes on the path. An AS_SET counts as one, and only the
    /// first one is counted.
    pub fn as_path_len(&self) -> usize {
        let mut set_seen = false;
        self.as_path
            .iter()
            .filter(|element| match element {
                PathElement::ASN(_) => true,
                PathElement::ASSet(_) => !std::mem::replace(&mut set_seen, true),
            })
            .count()
    }

    /// AS of the neighbour that advertised the path, 0 when the path does not
    /// start with a sequence element.
    pub fn neighbor_as(&self) -> u32 {
        match self.as_path.first() {
            Some(PathElement::ASN(asn)) => *asn,
            _ => 0,
        }
    }

    pub fn local_pref_or_default(&self) -> u32 {
        self.local_pref.unwrap_or(DEFAULT_LOCAL_PREF)
    }

    pub fn is_depreferenced(&self) -> bool {
        self.communities.contains(&LLGR_STALE)
    }

    /// Whether `asn` appears anywhere on the path, sets included.
    pub fn contains_as(&self, asn: u32) -> bool {
        self.as_path.iter().any(|element| match element {
            PathElement::ASN(hop) => *hop == asn,
            PathElement::ASSet(set) => set.contains(&asn),
        })
    }

    pub fn prepend_as(&mut self, asn: u32) {
        self.as_path.insert(0, PathElement::ASN(asn));
    }
}

/// Identifies a destination inside one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteKey {
    Prefix(IpNetwork),
    /// Encoded NLRI of a family this core does not decode.
    Opaque(Bytes),
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RouteKey::Prefix(prefix) => write!(f, "{}", prefix),
            RouteKey::Opaque(bytes) => {
                write!(f, "0x")?;
                for byte in bytes.iter() {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<IpNetwork> for RouteKey {
    fn from(prefix: IpNetwork) -> Self {
        RouteKey::Prefix(prefix)
    }
}

/// Per-peer route payload as handed over by the inbound decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub key: RouteKey,
    pub path_id: PathId,
    /// `None` marks a slot whose route was withdrawn but not yet removed.
    pub attributes: Option<Arc<PathAttributes>>,
    pub peer_type: PeerType,
    /// Interior cost to reach the next hop.
    pub igp_cost: u32,
}

impl Route {
    pub fn new(key: impl Into<RouteKey>, attributes: PathAttributes) -> Self {
        Self {
            key: key.into(),
            path_id: NON_PATH_ID,
            attributes: Some(Arc::new(attributes)),
            peer_type: PeerType::default(),
            igp_cost: 0,
        }
    }

    pub fn with_path_id(mut self, path_id: PathId) -> Self {
        self.path_id = path_id;
        self
    }

    pub fn with_peer_type(mut self, peer_type: PeerType) -> Self {
        self.peer_type = peer_type;
        self
    }

    pub fn with_igp_cost(mut self, igp_cost: u32) -> Self {
        self.igp_cost = igp_cost;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_id_display_roundtrip() {
        let id = RouterId::from(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(id.to_string(), "10.0.0.1");
        assert_eq!("10.0.0.1".parse::<RouterId>().unwrap(), id);
        assert!(RouterId(1) < RouterId(2));
    }

    #[test]
    fn peer_id_from_router_id() {
        let peer = PeerId::from(RouterId::from(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(peer.to_string(), "bgp://127.0.0.1");
        assert_eq!("bgp://127.0.0.1".parse::<PeerId>().unwrap(), peer);
        assert_eq!("127.0.0.1".parse::<PeerId>().unwrap(), peer);
        assert_eq!(peer.router_id(), RouterId(0x7f00_0001));
    }

    #[test]
    fn as_path_length_counts_first_set_once() {
        let attributes = PathAttributes {
            as_path: vec![
                PathElement::ASN(1),
                PathElement::ASN(2),
                PathElement::ASSet(vec![10, 11]),
                PathElement::ASSet(vec![12]),
            ],
            ..Default::default()
        };
        assert_eq!(attributes.as_path_len(), 3);
        assert_eq!(attributes.neighbor_as(), 1);
    }

    #[test]
    fn neighbor_as_of_set_led_path() {
        let attributes = PathAttributes {
            as_path: vec![PathElement::ASSet(vec![10, 11]), PathElement::ASN(3)],
            ..Default::default()
        };
        assert_eq!(attributes.neighbor_as(), 0);
        assert_eq!(PathAttributes::default().neighbor_as(), 0);
    }

    #[test]
    fn contains_as_looks_into_sets() {
        let attributes = PathAttributes {
            as_path: vec![PathElement::ASN(1), PathElement::ASSet(vec![10, 11])],
            ..Default::default()
        };
        assert!(attributes.contains_as(1));
        assert!(attributes.contains_as(11));
        assert!(!attributes.contains_as(2));
    }

    #[test]
    fn llgr_stale_depreferences() {
        let mut attributes = PathAttributes::default();
        assert!(!attributes.is_depreferenced());
        attributes.communities.push(LLGR_STALE);
        assert!(attributes.is_depreferenced());
    }

    #[test]
    fn opaque_key_display() {
        let key = RouteKey::Opaque(Bytes::from_static(&[0x01, 0xab]));
        assert_eq!(key.to_string(), "0x01ab");
    }
}
