use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Afi {
    Ipv4,
    Ipv6,
    L2vpn,
    Other(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Safi {
    Unicast,
    Multicast,
    Evpn,
    Flowspec,
    Other(u8),
}

impl From<u16> for Afi {
    fn from(value: u16) -> Self {
        match value {
            1 => Afi::Ipv4,
            2 => Afi::Ipv6,
            25 => Afi::L2vpn,
            other => Afi::Other(other),
        }
    }
}

impl From<Afi> for u16 {
    fn from(afi: Afi) -> Self {
        match afi {
            Afi::Ipv4 => 1,
            Afi::Ipv6 => 2,
            Afi::L2vpn => 25,
            Afi::Other(other) => other,
        }
    }
}

impl From<u8> for Safi {
    fn from(value: u8) -> Self {
        match value {
            1 => Safi::Unicast,
            2 => Safi::Multicast,
            70 => Safi::Evpn,
            133 => Safi::Flowspec,
            other => Safi::Other(other),
        }
    }
}

impl From<Safi> for u8 {
    fn from(safi: Safi) -> Self {
        match safi {
            Safi::Unicast => 1,
            Safi::Multicast => 2,
            Safi::Evpn => 70,
            Safi::Flowspec => 133,
            Safi::Other(other) => other,
        }
    }
}

impl fmt::Display for Afi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Afi::Ipv4 => write!(f, "ipv4"),
            Afi::Ipv6 => write!(f, "ipv6"),
            Afi::L2vpn => write!(f, "l2vpn"),
            Afi::Other(value) => write!(f, "afi-{}", value),
        }
    }
}

impl fmt::Display for Safi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Safi::Unicast => write!(f, "unicast"),
            Safi::Multicast => write!(f, "multicast"),
            Safi::Evpn => write!(f, "evpn"),
            Safi::Flowspec => write!(f, "flow"),
            Safi::Other(value) => write!(f, "safi-{}", value),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TableKeyError {
    #[error("Incorrect table format: '{0}'")]
    Format(String),
    #[error("Unsupported AFI: '{0}'")]
    Afi(String),
    #[error("Unsupported SAFI: '{0}'")]
    Safi(String),
}

impl FromStr for Afi {
    type Err = TableKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipv4" => Ok(Afi::Ipv4),
            "ipv6" => Ok(Afi::Ipv6),
            "l2vpn" => Ok(Afi::L2vpn),
            other => other
                .strip_prefix("afi-")
                .and_then(|value| value.parse::<u16>().ok())
                .map(Afi::from)
                .ok_or_else(|| TableKeyError::Afi(other.to_string())),
        }
    }
}

impl FromStr for Safi {
    type Err = TableKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unicast" => Ok(Safi::Unicast),
            "multicast" => Ok(Safi::Multicast),
            "evpn" => Ok(Safi::Evpn),
            "flow" => Ok(Safi::Flowspec),
            other => other
                .strip_prefix("safi-")
                .and_then(|value| value.parse::<u8>().ok())
                .map(Safi::from)
                .ok_or_else(|| TableKeyError::Safi(other.to_string())),
        }
    }
}

/// Identity of one RIB table. Entries of different tables never interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableKey {
    pub afi: Afi,
    pub safi: Safi,
}

impl TableKey {
    pub const IPV4_UNICAST: TableKey = TableKey::new(Afi::Ipv4, Safi::Unicast);
    pub const IPV6_UNICAST: TableKey = TableKey::new(Afi::Ipv6, Safi::Unicast);

    pub const fn new(afi: Afi, safi: Safi) -> Self {
        Self { afi, safi }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.afi, self.safi)
    }
}

impl FromStr for TableKey {
    type Err = TableKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != 2 {
            return Err(TableKeyError::Format(s.to_string()));
        }
        Ok(TableKey::new(parts[0].parse()?, parts[1].parse()?))
    }
}

impl From<(u16, u8)> for TableKey {
    fn from((afi, safi): (u16, u8)) -> Self {
        TableKey::new(Afi::from(afi), Safi::from(safi))
    }
}

impl Serialize for TableKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TableKey {
    fn deserialize<D>(deserializer: D) -> Result<TableKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
