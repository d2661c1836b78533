//! TCP accept loop.
//!
//! One supervised task per accepted connection. A panicking session is
//! logged and contained; it never takes the listener down.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use mbguard_core::error::{MbGuardError, Result};

use crate::app_state::AppState;

use super::relay;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct ProxyServer {
    app: AppState,
    listener: TcpListener,
}

impl ProxyServer {
    pub async fn bind(app: AppState, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(%addr, error = %e, "proxy bind failed");
            MbGuardError::Io(e)
        })?;
        Ok(Self { app, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until shutdown is signalled. Sessions already running are
    /// cancelled by the same signal.
    pub async fn serve(self) -> Result<()> {
        let Self { app, listener } = self;
        let mut shutdown = app.subscribe_shutdown();
        tracing::info!(listen = %listener.local_addr()?, "proxy accepting");

        loop {
            let accepted = tokio::select! {
                r = listener.accept() => r,
                _ = shutdown.recv() => break,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    // EMFILE and friends: back off instead of spinning.
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            if app.is_draining() {
                drop(stream);
                continue;
            }

            let session_app = app.clone();
            tokio::spawn(async move {
                let handle = tokio::spawn(relay::run_session(session_app, stream, peer));
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        tracing::error!(%peer, "session task panicked");
                    }
                }
            });
        }

        tracing::info!("proxy stopped accepting");
        Ok(())
    }
}
