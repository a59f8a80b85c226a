//! Framed block I/O over a pinned TLS connection (spec.md §4.1/§4.3/§6).
//!
//! Read side returns a non-empty sequence of parsed transmissions per block
//! (batched or single); write side accepts a sequence of transmissions and
//! repeatedly fills blocks until the input is exhausted, splitting across
//! blocks when the batch count or byte budget is exceeded.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use smp_proto::codec::{self, Transmission};

use crate::error::TransportError;
use crate::handle::{ThParams, TransportHandle};
use crate::tls::pinned_client_config;

/// A live client connection to one SMP relay, multiplexing all queues that
/// share the same transport session key (spec.md §3).
pub struct SmpClient {
    stream: TlsStream<TcpStream>,
    pub handle: TransportHandle,
}

impl SmpClient {
    /// Open TLS to `addr`, pin the server certificate by `key_hash`, and
    /// negotiate the handshake described in spec.md §6. `host` is used only
    /// for the `ServerName` required by the TLS API; it is never validated
    /// against the certificate (pinning replaces PKI).
    pub async fn connect(
        host: &str,
        addr: SocketAddr,
        key_hash: [u8; 32],
        block_size: usize,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let tcp = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout { host: host.to_string() })?
            .map_err(|e| TransportError::Network { host: host.to_string(), detail: e.to_string() })?;

        let config = pinned_client_config(key_hash);
        let connector = TlsConnector::from(config);
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TransportError::Host { host: host.to_string() })?;

        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| TransportError::Transport { host: host.to_string(), detail: e.to_string() })?;

        let session_id = exporter_session_id(&stream, host)?;
        let th_params = ThParams { key_hash, session_id };
        let version = 2u16;
        let handle = TransportHandle::new(block_size, true, version, th_params);

        debug!(host, block_size, "smp transport connected");
        Ok(Self { stream, handle })
    }

    /// Read one fixed-size block and decode its transmissions.
    pub async fn read_transmissions(&mut self) -> Result<Vec<Transmission>, TransportError> {
        let mut block = vec![0u8; self.handle.block_size];
        self.stream
            .read_exact(&mut block)
            .await
            .map_err(|e| TransportError::Network { host: "relay".into(), detail: e.to_string() })?;
        codec::decode_batch(&block).map_err(|e| {
            warn!(error = %e, "unparseable transport block");
            TransportError::BadBlock
        })
    }

    /// Encode `transmissions` into one or more blocks and write them all.
    pub async fn write_transmissions(&mut self, transmissions: &[Transmission]) -> Result<(), TransportError> {
        let blocks = codec::encode_batch(transmissions, self.handle.block_size)
            .map_err(|_| TransportError::BadBlock)?;
        for block in blocks {
            self.stream
                .write_all(&block)
                .await
                .map_err(|e| TransportError::Network { host: "relay".into(), detail: e.to_string() })?;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| TransportError::Network { host: "relay".into(), detail: e.to_string() })
    }
}

/// Derive a channel-binding session identifier from TLS exporter keying
/// material. Used in place of `tls-unique`, which has no equivalent in
/// TLS 1.3's handshake (see DESIGN.md).
fn exporter_session_id(stream: &TlsStream<TcpStream>, host: &str) -> Result<Vec<u8>, TransportError> {
    let (_, conn) = stream.get_ref();
    let mut out = vec![0u8; 32];
    conn.export_keying_material(&mut out, b"smp-transport-session", None)
        .map_err(|e| TransportError::Transport { host: host.to_string(), detail: e.to_string() })?;
    Ok(out)
}
