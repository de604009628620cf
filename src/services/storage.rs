use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Progress callback, invoked with the running byte count after each chunk
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Writes a byte stream to a destination path and forces it to stable storage.
///
/// Implementations must not buffer the whole stream in memory. A failure on
/// either the source or the destination stops both and is reported as one
/// error; the caller owns removal of whatever landed at `destination`.
#[async_trait]
pub trait DurableWriter: Send + Sync {
    async fn write<'a>(
        &'a self,
        source: Pin<Box<dyn AsyncRead + Send + 'a>>,
        destination: &'a Path,
        on_progress: Option<ProgressFn<'a>>,
    ) -> std::io::Result<u64>;
}

/// Local filesystem writer: chunked copy, flush, then fdatasync.
pub struct FsyncWriter {
    chunk_size: usize,
}

impl FsyncWriter {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl DurableWriter for FsyncWriter {
    async fn write<'a>(
        &'a self,
        mut source: Pin<Box<dyn AsyncRead + Send + 'a>>,
        destination: &'a Path,
        on_progress: Option<ProgressFn<'a>>,
    ) -> std::io::Result<u64> {
        let mut file = File::create(destination).await.map_err(|e| {
            tracing::error!("Failed to open {} for writing: {}", destination.display(), e);
            e
        })?;

        let mut buffer = vec![0u8; self.chunk_size];
        let mut bytes_written: u64 = 0;

        // One loop drives both ends, so an error on either side drops both handles.
        loop {
            let n = source.read(&mut buffer).await.map_err(|e| {
                tracing::warn!("Read stream error while writing {}: {}", destination.display(), e);
                e
            })?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n]).await.map_err(|e| {
                tracing::error!("Write stream error on {}: {}", destination.display(), e);
                e
            })?;
            bytes_written += n as u64;
            if let Some(progress) = on_progress {
                progress(bytes_written);
            }
        }

        file.flush().await?;

        // Durability is best-effort: some filesystems reject fdatasync.
        if let Err(e) = file.sync_data().await {
            tracing::warn!(
                "fdatasync failed for {} (continuing anyway): {}",
                destination.display(),
                e
            );
        }

        tracing::debug!(
            "Stream write completed: {} ({} bytes)",
            destination.display(),
            bytes_written
        );
        Ok(bytes_written)
    }
}

/// Best-effort fsync of a directory so a rename into it survives a crash
pub async fn sync_dir(dir: &Path) {
    let result = async { File::open(dir).await?.sync_all().await }.await;
    if let Err(e) = result {
        tracing::debug!("Directory sync skipped for {}: {}", dir.display(), e);
    }
}

/// Creates a directory tree if absent. Safe to call concurrently.
pub async fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Yields `good` bytes then fails, like a connection reset mid-upload
    struct BrokenReader {
        good: usize,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.good == 0 {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "client went away",
                )));
            }
            let n = self.good.min(buf.remaining());
            buf.put_slice(&vec![0xAB; n]);
            self.good -= n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_reports_bytes_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();

        let seen = Mutex::new(Vec::new());
        let progress = |n: u64| seen.lock().unwrap().push(n);

        let writer = FsyncWriter::new(4096);
        let written = writer
            .write(Box::pin(&data[..]), &dest, Some(&progress))
            .await
            .unwrap();

        assert_eq!(written, 10_000);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, vec![4096, 8192, 10_000]);
    }

    #[tokio::test]
    async fn test_write_empty_source() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("empty");
        let written = FsyncWriter::new(1024)
            .write(Box::pin(&b""[..]), &dest, None)
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(tokio::fs::metadata(&dest).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_source_error_surfaces_as_single_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("partial");
        let err = FsyncWriter::new(16)
            .write(Box::pin(BrokenReader { good: 40 }), &dest, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("no-such-dir").join("file");
        let err = FsyncWriter::new(16)
            .write(Box::pin(&b"abc"[..]), &dest, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_ensure_dir_is_idempotent_under_races() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b");
        let (x, y, z) = tokio::join!(ensure_dir(&target), ensure_dir(&target), ensure_dir(&target));
        assert!(x.is_ok() && y.is_ok() && z.is_ok());
        assert!(target.is_dir());
    }
}
