pub mod message_bus;
pub mod mutex_utils;
pub mod offset_table;
pub mod offset_values;
pub mod pretty_prints;
pub mod thread_manager;
