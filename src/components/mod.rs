pub mod bgp;
pub mod filters;
pub mod route;
