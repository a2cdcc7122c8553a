//! TCP listener whose accept loop survives transient failures

use crate::error::{Result, TransportError};
use crate::retry::RetryPolicy;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

pub struct LineListener {
    listener: TcpListener,
    retry: RetryPolicy,
}

impl LineListener {
    pub async fn bind(addr: &str, retry: RetryPolicy) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            TransportError::connection_with_source(format!("failed to bind {}", addr), None, e)
        })?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self { listener, retry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the next connection, backing off between failed attempts
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let result = self
            .retry
            .run("accept", |_| async move {
                self.listener.accept().await.map_err(TransportError::from)
            })
            .await;

        match result {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                }
                Ok((stream, addr))
            }
            Err(e) => Err(TransportError::RetryExhausted {
                operation: "accept".to_string(),
                attempts: self.retry.max_attempts(),
                last_error: e.to_string(),
            }),
        }
    }
}
