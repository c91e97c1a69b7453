//! Connection targets: HTTP(S), WebSocket, or a local IPC socket path.

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{RpcError, TransportKind};

/// Environment variable consulted by [`Endpoint::from_env_or_default`].
pub const PROVIDER_URI_ENV: &str = "CHAINWIRE_PROVIDER_URI";

/// Endpoint used when nothing else is configured.
pub const DEFAULT_HTTP_ENDPOINT: &str = "http://localhost:8545";

/// A validated, immutable connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Http(Url),
    WebSocket(Url),
    Ipc(PathBuf),
}

impl Endpoint {
    /// Parse a URI or socket path.
    ///
    /// `http`/`https` → HTTP, `ws`/`wss` → WebSocket, `ipc://<path>` or a
    /// filesystem path (absolute, `./`-relative, or ending in `.ipc`) → IPC.
    pub fn parse(raw: &str) -> Result<Self, RpcError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RpcError::invalid_endpoint(raw, "empty endpoint"));
        }
        if let Some(path) = raw.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(RpcError::invalid_endpoint(raw, "missing socket path"));
            }
            return Ok(Self::Ipc(PathBuf::from(path)));
        }
        if looks_like_path(raw) {
            return Ok(Self::Ipc(PathBuf::from(raw)));
        }

        let url = Url::parse(raw).map_err(|e| RpcError::invalid_endpoint(raw, e.to_string()))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(RpcError::invalid_endpoint(raw, "missing host"));
        }
        match url.scheme() {
            "http" | "https" => Ok(Self::Http(url)),
            "ws" | "wss" => Ok(Self::WebSocket(url)),
            other => Err(RpcError::invalid_endpoint(
                raw,
                format!("unsupported scheme '{other}'"),
            )),
        }
    }

    /// `$CHAINWIRE_PROVIDER_URI`, or [`DEFAULT_HTTP_ENDPOINT`] when unset.
    pub fn from_env_or_default() -> Result<Self, RpcError> {
        match std::env::var(PROVIDER_URI_ENV) {
            Ok(uri) if !uri.trim().is_empty() => Self::parse(&uri),
            _ => Self::parse(DEFAULT_HTTP_ENDPOINT),
        }
    }

    /// The transport variant this endpoint requires.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Http(_) => TransportKind::Http,
            Self::WebSocket(_) => TransportKind::WebSocket,
            Self::Ipc(_) => TransportKind::Ipc,
        }
    }

    pub fn as_url(&self) -> Option<&Url> {
        match self {
            Self::Http(u) | Self::WebSocket(u) => Some(u),
            Self::Ipc(_) => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Ipc(p) => Some(p),
            _ => None,
        }
    }

    /// Fail unless this endpoint matches `expected`.
    pub fn expect_kind(&self, expected: TransportKind) -> Result<(), RpcError> {
        if self.kind() == expected {
            Ok(())
        } else {
            Err(RpcError::invalid_endpoint(
                self.to_string(),
                format!("{expected} transport cannot serve a {} endpoint", self.kind()),
            ))
        }
    }
}

fn looks_like_path(raw: &str) -> bool {
    raw.starts_with('/') || raw.starts_with("./") || raw.starts_with("../") || raw.ends_with(".ipc")
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(u) | Self::WebSocket(u) => write!(f, "{u}"),
            Self::Ipc(p) => {
                let path = p.to_string_lossy();
                if looks_like_path(&path) {
                    f.write_str(&path)
                } else {
                    write!(f, "ipc://{path}")
                }
            }
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
