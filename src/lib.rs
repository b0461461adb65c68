pub mod components;
pub mod modules;
pub mod utils;

pub use components::bgp;
pub use components::bgp::bgp_config::RibConfig;
pub use components::bgp::bgp_rib::{LocRib, RibTable, RouteUpdate};
pub use components::route::{PeerId, Route, RouteKey, RouterId};
pub use modules::rib_worker::{Rib, RibCommand, RibWorker};
pub use utils::message_bus::MessageBus;
pub use utils::thread_manager::ThreadManager;
