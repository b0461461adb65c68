pub mod rib_worker;
