//! Malware scanning through a clamd daemon.
//!
//! Payloads are streamed with the `INSTREAM` command, so any storage
//! backend can be scanned without staging a local copy.

use crate::{config::ScannerConfig, storage::ByteStream};
use async_trait::async_trait;
use futures::StreamExt;
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};

/// clamd refuses INSTREAM chunks above its StreamMaxLength; stay well below.
const INSTREAM_CHUNK: usize = 64 * 1024;
const MAX_REPLY: usize = 8 * 1024;
const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of scanning one payload. Never fatal to an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean(String),
    Infected(String),
    Error(String),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid clamd address `{0}`")]
    InvalidAddress(String),
    #[error("clamd connection failed: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected clamd reply `{0}`")]
    UnexpectedReply(String),
}

#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan a payload stream to completion.
    async fn scan(&self, body: ByteStream) -> ScanVerdict;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClamdAddress {
    Tcp(String),
    Unix(PathBuf),
}

impl ClamdAddress {
    /// Accepts `tcp://host:port`, `host:port`, `unix:///path` or an absolute socket path.
    pub fn parse(raw: &str) -> Result<Self, ScanError> {
        let raw = raw.trim();
        if let Some(path) = raw.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(ScanError::InvalidAddress(raw.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if raw.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(raw)));
        }
        let host_port = raw.strip_prefix("tcp://").unwrap_or(raw);
        match host_port.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(host_port.to_string()))
            }
            _ => Err(ScanError::InvalidAddress(raw.to_string())),
        }
    }
}

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// Minimal clamd client speaking the null-terminated `z` command variants.
#[derive(Debug, Clone)]
pub struct ClamdScanner {
    address: ClamdAddress,
    timeout: Duration,
}

impl ClamdScanner {
    pub fn new(address: ClamdAddress) -> Self {
        Self {
            address,
            timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }

    /// Bound a whole scan; an expired scan yields [`ScanVerdict::Error`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from configuration, waiting for clamd to answer `PING`.
    ///
    /// Returns `Ok(None)` when no address is configured.
    pub async fn connect(config: &ScannerConfig) -> Result<Option<Self>, ScanError> {
        let Some(raw) = config.clamd_address.as_deref() else {
            tracing::warn!("no clamd address configured, uploads will not be scanned");
            return Ok(None);
        };
        let scanner = Self::new(ClamdAddress::parse(raw)?).with_timeout(config.scan_timeout);
        let attempts = config.connect_retries.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match scanner.ping().await {
                Ok(()) => {
                    tracing::info!(address = raw, attempt, "connected to clamd");
                    return Ok(Some(scanner));
                }
                Err(err) => {
                    tracing::warn!(address = raw, attempt, attempts, error = %err, "clamd not reachable");
                    last_err = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(config.retry_delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ScanError::UnexpectedReply("no attempt made".into())))
    }

    async fn open(&self) -> io::Result<Box<dyn Connection>> {
        match &self.address {
            ClamdAddress::Tcp(addr) => Ok(Box::new(TcpStream::connect(addr).await?)),
            #[cfg(unix)]
            ClamdAddress::Unix(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
            #[cfg(not(unix))]
            ClamdAddress::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }

    pub async fn ping(&self) -> Result<(), ScanError> {
        let mut conn = tokio::time::timeout(Duration::from_secs(5), self.open())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        conn.write_all(b"zPING\0").await?;
        let reply = read_reply(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(ScanError::UnexpectedReply(reply))
        }
    }

    async fn instream(&self, mut body: ByteStream) -> Result<String, ScanError> {
        let mut conn = self.open().await?;
        conn.write_all(b"zINSTREAM\0").await?;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for piece in chunk.chunks(INSTREAM_CHUNK) {
                conn.write_all(&(piece.len() as u32).to_be_bytes()).await?;
                conn.write_all(piece).await?;
            }
        }
        conn.write_all(&0u32.to_be_bytes()).await?;
        conn.flush().await?;
        Ok(read_reply(&mut conn).await?)
    }
}

#[async_trait]
impl Scanner for ClamdScanner {
    async fn scan(&self, body: ByteStream) -> ScanVerdict {
        let Ok(outcome) = tokio::time::timeout(self.timeout, self.instream(body)).await else {
            tracing::error!(component = "clamd", timeout = ?self.timeout, "scan timed out");
            return ScanVerdict::Error("scan timed out".into());
        };
        match outcome {
            Ok(reply) => {
                let verdict = parse_reply(&reply);
                match &verdict {
                    ScanVerdict::Infected(name) => {
                        tracing::warn!(component = "clamd", virus = %name, "malware detected")
                    }
                    ScanVerdict::Error(detail) => {
                        tracing::error!(component = "clamd", detail = %detail, "clamd reported an error")
                    }
                    ScanVerdict::Clean(_) => tracing::debug!(component = "clamd", "scan clean"),
                }
                verdict
            }
            Err(err) => {
                tracing::error!(component = "clamd", error = %err, "scan communication failed");
                ScanVerdict::Error("clamd communication failed".into())
            }
        }
    }
}

async fn read_reply<C: AsyncRead + Unpin + ?Sized>(conn: &mut C) -> io::Result<String> {
    let mut reply = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        let n = conn.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        reply.extend_from_slice(&buf[..n]);
        if reply.contains(&0) || reply.len() >= MAX_REPLY {
            break;
        }
    }
    let end = reply.iter().position(|b| *b == 0).unwrap_or(reply.len());
    Ok(String::from_utf8_lossy(&reply[..end]).trim().to_string())
}

/// Interpret a clamd INSTREAM reply such as `stream: Eicar-Signature FOUND`.
pub fn parse_reply(reply: &str) -> ScanVerdict {
    let body = reply
        .split_once(": ")
        .map(|(_, rest)| rest)
        .unwrap_or(reply)
        .trim();
    if body == "OK" {
        ScanVerdict::Clean("no threats found".into())
    } else if let Some(name) = body.strip_suffix(" FOUND") {
        ScanVerdict::Infected(name.trim().to_string())
    } else if let Some(detail) = body.strip_suffix(" ERROR") {
        ScanVerdict::Error(detail.trim().to_string())
    } else {
        ScanVerdict::Error(format!("unrecognized reply: {}", reply))
    }
}
