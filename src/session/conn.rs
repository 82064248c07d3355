// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telnet transport connection: TLS-first, falling back once to plain TCP
//! on an SSL-shaped error (spec §4.3). Grounded on the reference repo's
//! `upstream::bridge::run_loop`, which owns a single long-lived upstream
//! connection behind a cancellable connect attempt — generalized here from
//! a WS client connect to a TLS-then-TCP telnet connect.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

const CONNECT_DEADLINE: Duration = Duration::from_secs(10);

/// Why a connect attempt failed, so the caller can decide whether to fall
/// back to plain TCP (SSL-shaped error) or give up (e.g. DNS failure,
/// connection refused on the TCP layer itself).
#[derive(Debug)]
pub enum ConnectError {
    Timeout,
    Io(std::io::Error),
    Tls(String),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("connect timed out"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Tls(e) => write!(f, "tls error: {e}"),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<std::io::Error> for ConnectError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl ConnectError {
    /// Whether this error looks like a TLS/SSL handshake failure rather
    /// than a network-layer failure, per spec §4.3's substring list.
    pub fn looks_like_tls_failure(&self) -> bool {
        let text = self.to_string().to_lowercase();
        const MARKERS: &[&str] = &["tls", "ssl", "certificate", "wrong version number", "packet length"];
        MARKERS.iter().any(|m| text.contains(m))
    }

    /// Whether this error is a connection-reset/refused failure — also
    /// named in spec §4.3's fallback trigger list, alongside TLS-shaped
    /// errors (a server offering plain telnet on a TLS-expecting client can
    /// surface either, depending on how it rejects the handshake).
    pub fn looks_like_network_failure(&self) -> bool {
        let text = self.to_string().to_lowercase();
        text.contains("connection reset") || text.contains("connection refused")
    }
}

/// A live telnet transport, either TLS-wrapped or plain TCP.
pub enum TelnetConn {
    Tls(Box<TlsStream<TcpStream>>),
    Plain(TcpStream),
}

impl AsyncRead for TelnetConn {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TelnetConn::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            TelnetConn::Plain(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TelnetConn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            TelnetConn::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            TelnetConn::Plain(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TelnetConn::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            TelnetConn::Plain(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TelnetConn::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            TelnetConn::Plain(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

fn tls_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Connect to `host:port`, trying TLS first and falling back to plain TCP
/// exactly once if the TLS attempt fails with an SSL-shaped or
/// connection-reset/refused error (spec §4.3's fallback list). Any other
/// failure (DNS, timeout) is returned directly without a fallback attempt,
/// since it would fail identically over plain TCP.
pub async fn connect_with_fallback(host: &str, port: u16) -> Result<TelnetConn, ConnectError> {
    match tokio::time::timeout(CONNECT_DEADLINE, connect_tls(host, port)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(err)) if err.looks_like_tls_failure() || err.looks_like_network_failure() => {
            tracing::debug!(%host, port, %err, "tls connect failed, falling back to plain tcp");
            tokio::time::timeout(CONNECT_DEADLINE, connect_plain(host, port))
                .await
                .map_err(|_| ConnectError::Timeout)?
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(ConnectError::Timeout),
    }
}

async fn connect_tls(host: &str, port: u16) -> Result<TelnetConn, ConnectError> {
    let tcp = TcpStream::connect((host, port)).await?;
    let server_name =
        ServerName::try_from(host.to_owned()).map_err(|e| ConnectError::Tls(e.to_string()))?;
    let stream =
        tls_connector().connect(server_name, tcp).await.map_err(|e| ConnectError::Tls(e.to_string()))?;
    Ok(TelnetConn::Tls(Box::new(stream)))
}

async fn connect_plain(host: &str, port: u16) -> Result<TelnetConn, ConnectError> {
    let tcp = TcpStream::connect((host, port)).await?;
    Ok(TelnetConn::Plain(tcp))
}
