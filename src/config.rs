use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub protocol: ProtocolConfig,
    pub reconcile: ReconcileConfig,
    pub bus: BusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Elastic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    pub index: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    pub heartbeat_interval_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub interval_seconds: u64,
    pub grace_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub command_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("OCC__").split("__"));
        Ok(figment.extract()?)
    }
}
