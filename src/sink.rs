//! Output sinks
//!
//! An output session writes into any `AsyncWrite`. HTTP clients get the
//! write half of an in-memory pipe; recordings use [`open_sink`].

use tokio::io::AsyncWrite;

use crate::error::{Error, Result};

/// Boxed byte sink owned by an output session
pub type BoxedSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Open a sink from a locator.
///
/// - `pipe:1` or `-` writes to standard output
/// - `pipe:2` writes to standard error
/// - `file:PATH` or a bare path creates (or truncates) a file
pub async fn open_sink(locator: &str) -> Result<BoxedSink> {
    match locator {
        "-" | "pipe:1" => return Ok(Box::new(tokio::io::stdout())),
        "pipe:2" => return Ok(Box::new(tokio::io::stderr())),
        _ => {}
    }

    if let Some(fd) = locator.strip_prefix("pipe:") {
        return Err(Error::OpenFailed(format!("unsupported pipe '{}'", fd)));
    }

    let path = locator.strip_prefix("file:").unwrap_or(locator);
    if path.is_empty() {
        return Err(Error::OpenFailed("empty output locator".into()));
    }

    let file = tokio::fs::File::create(path)
        .await
        .map_err(|e| Error::OpenFailed(format!("{}: {}", path, e)))?;
    Ok(Box::new(file))
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn test_file_sink_truncates() {
        let path = std::env::temp_dir().join(format!("fanmux-sink-{}.mp4", std::process::id()));
        tokio::fs::write(&path, b"previous contents").await.unwrap();

        let locator = format!("file:{}", path.display());
        let mut sink = open_sink(&locator).await.unwrap();
        sink.write_all(b"new").await.unwrap();
        sink.shutdown().await.unwrap();
        drop(sink);

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"new");
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_locators() {
        assert!(matches!(open_sink("pipe:7").await, Err(Error::OpenFailed(_))));
        assert!(matches!(open_sink("file:").await, Err(Error::OpenFailed(_))));
        assert!(open_sink("/definitely/not/a/dir/out.mp4").await.is_err());
    }

    #[tokio::test]
    async fn test_stdout_sink() {
        assert!(open_sink("pipe:1").await.is_ok());
        assert!(open_sink("-").await.is_ok());
    }
}
