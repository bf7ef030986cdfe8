//! A connected live session: transport, correlator, listener and query
//! engine with one owner and an explicit shutdown.

use std::sync::Arc;
use std::time::Duration;

use stageconf::OscSettings;
use tracing::info;

use crate::commands::LiveCommand;
use crate::correlator::Correlator;
use crate::query::QueryEngine;
use crate::transport::{Listener, Transport, TransportError, UdpTransport};

pub struct LiveSession {
    transport: Arc<dyn Transport>,
    engine: Arc<QueryEngine>,
    listener: Listener,
}

impl LiveSession {
    /// Bind the reply port, start listening and get ready to send.
    pub async fn connect(settings: &OscSettings) -> Result<Self, TransportError> {
        let transport: Arc<dyn Transport> =
            Arc::new(UdpTransport::connect(&settings.host, settings.send_port).await?);
        let bind_addr = format!("{}:{}", bind_host(&settings.host), settings.recv_port);

        let session = Self::with_transport(
            transport,
            &bind_addr,
            Duration::from_millis(settings.query_timeout_ms),
        )
        .await?;

        info!(
            host = %settings.host,
            send_port = settings.send_port,
            recv_port = session.listener.local_addr().port(),
            "session connected"
        );
        Ok(session)
    }

    /// Assemble a session around any transport, listening on `bind_addr`.
    pub async fn with_transport(
        transport: Arc<dyn Transport>,
        bind_addr: &str,
        query_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let correlator = Arc::new(Correlator::new());
        let listener = Listener::spawn(bind_addr, correlator.clone()).await?;
        let engine = Arc::new(QueryEngine::new(
            Arc::clone(&transport),
            correlator,
            query_timeout,
        ));

        Ok(Self {
            transport,
            engine,
            listener,
        })
    }

    pub fn query_engine(&self) -> Arc<QueryEngine> {
        Arc::clone(&self.engine)
    }

    pub fn listener_addr(&self) -> std::net::SocketAddr {
        self.listener.local_addr()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub async fn send(&self, command: LiveCommand) -> Result<(), TransportError> {
        self.transport.send_command(&command).await
    }

    /// Stop the listener and wait for it.
    pub async fn shutdown(self) -> Result<(), TransportError> {
        self.listener.shutdown().await
    }
}

/// Replies come back to the host we talk to; listen on loopback for a local
/// session and on every interface otherwise.
fn bind_host(target: &str) -> &'static str {
    match target {
        "127.0.0.1" | "localhost" => "127.0.0.1",
        "::1" => "[::1]",
        _ => "0.0.0.0",
    }
}
