// Library for tests to access modules

pub mod aggregation_worker;
pub mod config;
pub mod history_reader;
pub mod history_repo;
pub mod models;
pub mod readout;
pub mod routes;
pub mod service;
pub mod sysinfo_repo;
pub mod tier;
pub mod units;
pub mod worker;
