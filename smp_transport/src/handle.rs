//! Transport handle (spec.md §4.3, C4): the fixed parameters negotiated once
//! per TCP+TLS connection and shared by every queue multiplexed over it.

/// TLS-layer parameters fixed at handshake time.
#[derive(Debug, Clone)]
pub struct ThParams {
    /// SHA-256 of the server's identity certificate — pins the connection
    /// (spec.md §3 `ProtocolServer.key_hash`).
    pub key_hash: [u8; 32],
    /// Channel-binding session identifier, included in every pre-handshake
    /// authorization. Derived from TLS exporter keying material rather than
    /// `tls-unique`, since TLS 1.3 has no renegotiation Finished message to
    /// bind to (see DESIGN.md).
    pub session_id: Vec<u8>,
}

/// `{session_id, block_size, batch_enabled, version, thParams}` (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct TransportHandle {
    pub session_id: Vec<u8>,
    pub block_size: usize,
    pub batch_enabled: bool,
    pub version: u16,
    pub th_params: ThParams,
}

impl TransportHandle {
    pub fn new(block_size: usize, batch_enabled: bool, version: u16, th_params: ThParams) -> Self {
        Self { session_id: th_params.session_id.clone(), block_size, batch_enabled, version, th_params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_carries_session_id_from_th_params() {
        let params = ThParams { key_hash: [1u8; 32], session_id: vec![9, 9, 9] };
        let handle = TransportHandle::new(16384, true, 2, params);
        assert_eq!(handle.session_id, vec![9, 9, 9]);
    }
}
