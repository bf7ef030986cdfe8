//! UDP transport: fire-and-forget sends plus one background listener.
//!
//! Neither side promises delivery, ordering or deduplication. Callers that
//! need an answer go through the correlator with a deadline.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::LiveCommand;
use crate::osc::{decode_packet, OscArg, OscMessage};

/// Largest datagram the listener accepts
const MAX_DATAGRAM: usize = 65_536;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to resolve {target}")]
    Resolve { target: String },
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("Failed to send {topic} to {target}: {source}")]
    Send {
        topic: String,
        target: SocketAddr,
        source: std::io::Error,
    },
    #[error("Listener task failed: {0}")]
    Join(String),
}

/// Outbound half: send one request, no reply expected at this layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, topic: &str, args: &[OscArg]) -> Result<(), TransportError>;

    async fn send_command(&self, command: &LiveCommand) -> Result<(), TransportError> {
        self.send(command.topic(), &command.args()).await
    }
}

/// Inbound half: invoked for every decoded message, in arrival order.
pub trait InboundHandler: Send + Sync {
    fn on_message(&self, message: OscMessage);
}

/// OSC over UDP to a single target.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransport {
    /// Resolve `host:port` once and bind an ephemeral local socket.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let target_str = format!("{}:{}", host, port);
        let target = lookup_host(&target_str)
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| TransportError::Resolve {
                target: target_str.clone(),
            })?;

        let local = if target.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| TransportError::Bind {
                addr: local.to_string(),
                source,
            })?;

        debug!(%target, "udp transport ready");
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, topic: &str, args: &[OscArg]) -> Result<(), TransportError> {
        let packet = OscMessage::new(topic, args.to_vec()).encode();
        self.socket
            .send_to(&packet, self.target)
            .await
            .map_err(|source| TransportError::Send {
                topic: topic.to_string(),
                target: self.target,
                source,
            })?;
        debug!(topic, ?args, "sent");
        Ok(())
    }
}

/// Handle to the background receive task.
///
/// Dropping the handle cancels the task; [`Listener::shutdown`] also waits
/// for it to finish.
pub struct Listener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Listener {
    /// Bind `bind_addr` and dispatch every inbound message to `handler`.
    pub async fn spawn(
        bind_addr: &str,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| TransportError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(socket, handler, cancel.clone()));

        info!(%local_addr, "listener started");
        Ok(Self {
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop receiving and wait for the task to exit.
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| TransportError::Join(e.to_string()))?;
        }
        info!(local_addr = %self.local_addr, "listener stopped");
        Ok(())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(
    socket: UdpSocket,
    handler: Arc<dyn InboundHandler>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(r) => r,
                Err(e) => {
                    // ICMP port-unreachable from an earlier send shows up here on some platforms
                    debug!(error = %e, "recv failed");
                    continue;
                }
            },
        };

        match decode_packet(&buf[..len]) {
            Ok(messages) => {
                for message in messages {
                    debug!(%from, address = %message.address, args = ?message.args, "received");
                    handler.on_message(message);
                }
            }
            Err(e) => warn!(%from, error = %e, "skipping undecodable datagram"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect(Mutex<Vec<OscMessage>>);

    impl InboundHandler for Collect {
        fn on_message(&self, message: OscMessage) {
            self.0.lock().unwrap().push(message);
        }
    }

    #[tokio::test]
    async fn listener_dispatches_and_survives_garbage() {
        let collected = Arc::new(Collect::default());
        let listener = Listener::spawn("127.0.0.1:0", collected.clone())
            .await
            .unwrap();
        let port = listener.local_addr().port();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"not osc at all", ("127.0.0.1", port))
            .await
            .unwrap();

        let transport = UdpTransport::connect("127.0.0.1", port).await.unwrap();
        transport
            .send("/live/song/get/tempo", &[OscArg::Float(98.0)])
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while collected.0.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let messages = collected.0.lock().unwrap().clone();
        assert_eq!(
            messages,
            vec![OscMessage::new("/live/song/get/tempo", vec![OscArg::Float(98.0)])]
        );

        listener.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_releases_the_port() {
        let listener = Listener::spawn("127.0.0.1:0", Arc::new(Collect::default()))
            .await
            .unwrap();
        let addr = listener.local_addr();
        listener.shutdown().await.unwrap();

        let rebound = UdpSocket::bind(addr).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn unresolvable_host_is_an_error() {
        let err = UdpTransport::connect("host.invalid", 11000).await.unwrap_err();
        assert!(matches!(err, TransportError::Resolve { .. }));
    }
}
