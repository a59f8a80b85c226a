//! Agent configuration (spec.md §6).

use std::net::SocketAddr;
use std::time::Duration;

/// A configured SMP/notification/XFTP relay (spec.md §3 `ProtocolServer`).
#[derive(Debug, Clone)]
pub struct ProtocolServer {
    pub scheme: String,
    pub hosts: Vec<String>,
    pub port: u16,
    pub key_hash: [u8; 32],
}

impl ProtocolServer {
    pub fn primary_addr(&self) -> Option<(&str, u16)> {
        self.hosts.first().map(|h| (h.as_str(), self.port))
    }
}

/// Outbound network path.
#[derive(Debug, Clone)]
pub enum Network {
    Direct,
    Socks(SocketAddr),
}

/// Session multiplexing granularity (spec.md §3 "Transport session key").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    User,
    Entity,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub tcp_port: u16,
    pub smp_servers: Vec<ProtocolServer>,
    pub ntf_servers: Vec<ProtocolServer>,
    pub xftp_servers: Vec<ProtocolServer>,
    pub rsa_key_size: usize,
    pub conn_id_bytes: usize,
    pub tbq_size: usize,
    pub reconnect_interval: Duration,
    pub ntf_worker_throttle: Duration,
    pub ntf_sub_check_interval: Duration,
    pub max_worker_restarts_per_minute: u32,
    pub max_subscription_timeouts: u32,
    pub session_mode: SessionMode,
    pub network: Network,
}

impl Config {
    /// Defaults matching the relay wire protocol's fixed block size
    /// (spec.md §6, "e.g., 16,384 bytes").
    pub fn new(smp_servers: Vec<ProtocolServer>) -> Result<Self, &'static str> {
        if smp_servers.is_empty() {
            return Err("smp_servers must be non-empty");
        }
        Ok(Self {
            tcp_port: 5223,
            smp_servers,
            ntf_servers: Vec::new(),
            xftp_servers: Vec::new(),
            rsa_key_size: 2048,
            conn_id_bytes: 16,
            tbq_size: 4096,
            reconnect_interval: Duration::from_secs(2),
            ntf_worker_throttle: Duration::from_millis(100),
            ntf_sub_check_interval: Duration::from_secs(60),
            max_worker_restarts_per_minute: 10,
            max_subscription_timeouts: 3,
            session_mode: SessionMode::User,
            network: Network::Direct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_server_list() {
        assert!(Config::new(Vec::new()).is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let srv = ProtocolServer { scheme: "smp".into(), hosts: vec!["relay.example.org".into()], port: 5223, key_hash: [0u8; 32] };
        let cfg = Config::new(vec![srv]).unwrap();
        assert_eq!(cfg.session_mode, SessionMode::User);
        assert!(cfg.max_worker_restarts_per_minute > 0);
    }
}
