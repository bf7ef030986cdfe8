//! Carabiner client: Ableton Link tempo and transport over TCP.
//!
//! Carabiner takes one newline-terminated command per line and answers with
//! an EDN-ish line such as `status { :peers 1 :bpm 120.000000 :start 0 }`.
//! Each command here opens its own short connection.

use std::time::Duration;

use async_trait::async_trait;
use stageconf::LinkSettings;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::tempo::{valid_bpm, TempoSource};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Carabiner not reachable at {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("Carabiner at {addr} did not answer within {timeout:?}")]
    Timeout { addr: String, timeout: Duration },
    #[error("Carabiner I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct LinkClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl LinkClient {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    pub fn from_settings(settings: &LinkSettings) -> Self {
        Self::new(
            settings.host.clone(),
            settings.port,
            Duration::from_millis(settings.timeout_ms),
        )
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Send one command and return the trimmed reply line.
    pub async fn request(&self, command: &str) -> Result<String, LinkError> {
        let addr = self.addr();
        let elapsed = || LinkError::Timeout {
            addr: addr.clone(),
            timeout: self.timeout,
        };

        let mut stream = timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| elapsed())?
            .map_err(|source| LinkError::Connect {
                addr: addr.clone(),
                source,
            })?;

        stream.write_all(format!("{}\n", command).as_bytes()).await?;

        let mut buf = vec![0u8; 4096];
        let n = timeout(self.timeout, stream.read(&mut buf))
            .await
            .map_err(|_| elapsed())??;

        let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        debug!(command, reply = %reply, "carabiner");
        Ok(reply)
    }

    /// Raw status text, or a note that Carabiner is not running.
    pub async fn status(&self) -> String {
        match self.request("status").await {
            Ok(reply) if !reply.is_empty() => reply,
            Ok(_) => format!("Carabiner not running on {}", self.addr()),
            Err(e) => {
                debug!(error = %e, "carabiner status failed");
                format!("Carabiner not running on {}", self.addr())
            }
        }
    }

    pub async fn get_bpm(&self) -> Option<f64> {
        match self.request("status").await {
            Ok(reply) => parse_bpm(&reply),
            Err(e) => {
                debug!(error = %e, "carabiner unavailable");
                None
            }
        }
    }

    pub async fn set_tempo(&self, bpm: f64) -> Result<(), LinkError> {
        self.request(&format!("bpm {}", bpm)).await.map(|_| ())
    }

    /// Enable start/stop sync, then start the Link transport.
    pub async fn start(&self) -> Result<(), LinkError> {
        self.request("enable-start-stop-sync").await?;
        self.request("start-playing").await.map(|_| ())
    }

    pub async fn stop(&self) -> Result<(), LinkError> {
        self.request("stop-playing").await.map(|_| ())
    }
}

#[async_trait]
impl TempoSource for LinkClient {
    async fn get_bpm(&self) -> Option<f64> {
        LinkClient::get_bpm(self).await
    }

    fn name(&self) -> &'static str {
        "link"
    }
}

/// Pull the value following `:bpm` out of a status line.
pub fn parse_bpm(status: &str) -> Option<f64> {
    let rest = &status[status.find(":bpm")? + ":bpm".len()..];
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    rest[..end].parse::<f64>().ok().filter(|bpm| valid_bpm(*bpm))
}
