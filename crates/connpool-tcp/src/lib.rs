//! TCP connection factory for [`connpool`].
//!
//! [`TcpConnector`] dials a fixed address and hands the raw stream to the
//! pool. It performs no handshake; whatever protocol runs over the stream is
//! the work units' business.
//!
//! ```ignore
//! let pool = Pool::new(PoolConfig::default(), TcpConnector::new("127.0.0.1:6379"));
//! ```

use std::io;

use connpool::{ConnectFuture, ConnectionFactory, Context};
use tokio::net::TcpStream;

/// Opens TCP connections to one address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    nodelay: bool,
}

impl TcpConnector {
    /// Dial `addr` (`host:port`) with Nagle's algorithm disabled.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            nodelay: true,
        }
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn dial(&self, ctx: &Context) -> io::Result<TcpStream> {
        let stream = tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            result = TcpStream::connect(self.addr.as_str()) => result.map_err(|e| {
                io::Error::new(e.kind(), format!("tcp connect to {}: {e}", self.addr))
            })?,
        };

        if self.nodelay {
            stream.set_nodelay(true)?;
        }

        tracing::debug!(
            addr = %self.addr,
            local = ?stream.local_addr().ok(),
            nodelay = self.nodelay,
            "established tcp connection"
        );
        Ok(stream)
    }
}

impl ConnectionFactory<TcpStream> for TcpConnector {
    fn connect<'a>(&'a self, ctx: &'a Context) -> ConnectFuture<'a, TcpStream> {
        Box::pin(self.dial(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = TcpConnector::new(addr.to_string());

        let ctx = Context::with_timeout(Duration::from_secs(2));
        let stream = connector.connect(&ctx).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn nodelay_can_be_left_off() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let connector = TcpConnector::new(listener.local_addr().unwrap().to_string()).nodelay(false);

        let stream = connector.connect(&Context::background()).await.unwrap();
        assert!(!stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn refused_connection_names_address() {
        // Bind then drop to get a port with nothing listening.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let connector = TcpConnector::new(addr.to_string());

        let err = connector.connect(&Context::background()).await.unwrap_err();
        assert!(err.to_string().contains(&addr.to_string()), "got: {err}");
    }

    #[tokio::test]
    async fn cancelled_context_stops_dial() {
        let connector = TcpConnector::new("127.0.0.1:1");
        let ctx = Context::background();
        ctx.cancel();

        let err = connector.connect(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
