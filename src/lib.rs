pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod ocpp;
pub mod registry;
pub mod server;
pub mod store;
pub mod telemetry;
