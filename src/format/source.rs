//! Input locators
//!
//! - `tcp://host:port` connects to a pushing encoder
//! - `pipe:0` or `-` reads standard input
//! - `file:PATH` or a bare path opens a file

use std::pin::Pin;

use tokio::io::AsyncRead;
use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Boxed byte source
pub type BoxedSource = Pin<Box<dyn AsyncRead + Send>>;

/// Open the byte stream behind an input locator
pub async fn open_source(url: &str) -> Result<BoxedSource> {
    if let Some(addr) = url.strip_prefix("tcp://") {
        let addr = addr.trim_end_matches('/');
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::OpenFailed(format!("{}: {}", url, e)))?;
        stream.set_nodelay(true).ok();
        tracing::debug!(addr = %addr, "Connected to upstream");
        return Ok(Box::pin(stream));
    }

    if url == "-" || url == "pipe:0" {
        return Ok(Box::pin(tokio::io::stdin()));
    }

    let path = url.strip_prefix("file:").unwrap_or(url);
    if path.is_empty() {
        return Err(Error::OpenFailed("empty input locator".into()));
    }
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::OpenFailed(format!("{}: {}", path, e)))?;
    Ok(Box::pin(file))
}
