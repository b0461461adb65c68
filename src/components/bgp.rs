pub mod bgp_bestroute;
pub mod bgp_config;
pub mod bgp_peers;
pub mod bgp_rib;
pub mod bgp_rib_entry;
pub mod bgp_selector;
pub mod outbound;
pub mod propagation;
pub mod rib_support;
pub mod table;
