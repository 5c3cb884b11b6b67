//! TCP dialer for pooled sessions.
//!
//! Provides a [`TcpDialer`] that implements [`Dialer`] over plain tokio TCP
//! streams. The dialer performs **no protocol handshake**; a session is a
//! connected socket to `host:port`. Failures are classified for failover:
//!
//! ```text
//! TcpDialer::dial(host)
//!   → TcpStream::connect(host:port) within connect_timeout
//!     → Ok(stream)                       → TcpSession
//!     → refused / reset / DNS / timeout  → DialError::Connectivity
//!     → malformed address                → DialError::Application
//! ```
//!
//! Liveness checks never wait: `ping` peeks once at whatever the reactor
//! already knows about the socket. A quiet socket is alive; EOF or a socket
//! error is dead.

use std::io::ErrorKind;
use std::net::{Ipv6Addr, SocketAddr};
use std::task::{Context, Poll, Waker};

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::DialError;
use crate::factory::Dialer;
use crate::hosts::Host;
use crate::settings::PoolSettings;

// ── TcpSession ───────────────────────────────────────────────────────

/// A connected TCP session.
#[derive(Debug)]
pub struct TcpSession {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpSession {
    /// Address the session is connected to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

// ── TcpDialer ────────────────────────────────────────────────────────

/// A [`Dialer`] that opens plain TCP sessions.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer;

impl TcpDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Connection = TcpSession;

    async fn dial(&self, host: &Host, settings: &PoolSettings) -> Result<TcpSession, DialError> {
        let connect_timeout = settings
            .connect_timeout()
            .map_err(|e| DialError::Application(e.to_string()))?;
        let target = target_addr(host.name(), settings.port);

        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&target)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(classify(&target, e)),
            Err(_) => {
                return Err(DialError::Connectivity(format!(
                    "connect to {target} timed out after {connect_timeout:?}"
                )));
            }
        };

        let _ = stream.set_nodelay(true);
        let peer = stream
            .peer_addr()
            .map_err(|e| DialError::Connectivity(format!("{target}: {e}")))?;

        debug!(host = %host, %peer, "tcp session established");
        Ok(TcpSession { stream, peer })
    }

    async fn ping(&self, host: &Host, conn: &mut TcpSession) -> bool {
        let mut peek_buf = [0u8; 1];
        let mut buf = ReadBuf::new(&mut peek_buf);
        let mut cx = Context::from_waker(Waker::noop());
        let alive = match conn.stream.poll_peek(&mut cx, &mut buf) {
            Poll::Ready(Ok(0)) => false, // EOF: peer closed the connection
            Poll::Ready(Ok(_)) => true,
            Poll::Ready(Err(_)) => false,
            // Nothing readable yet: the socket is quiet but open.
            Poll::Pending => true,
        };
        if !alive {
            debug!(host = %host, peer = %conn.peer, "tcp session is dead");
        }
        alive
    }

    async fn close(&self, _host: &Host, mut conn: TcpSession) {
        let _ = conn.stream.shutdown().await;
    }
}

/// `host:port`, bracketing bare IPv6 literals.
fn target_addr(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn classify(target: &str, e: std::io::Error) -> DialError {
    match e.kind() {
        ErrorKind::InvalidInput => DialError::Application(format!("invalid address {target}: {e}")),
        _ => DialError::Connectivity(format!("{target}: {e}")),
    }
}
