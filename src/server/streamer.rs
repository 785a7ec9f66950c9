// Integrity-verified file streaming

use super::container::{self, ContainerKind, Invalid};
use super::governor::{DownloadPermit, ResourceGovernor};
use crate::constants::CHUNK_SIZE;
use log::warn;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A mirrored file that passed validation on this request
#[derive(Debug)]
pub struct ServedFile {
    pub path: PathBuf,
    pub kind: ContainerKind,
    pub len: u64,
}

#[derive(Debug)]
pub enum ServeOutcome {
    NotFound,
    /// Failed validation and was deleted from disk
    Corrupted(Invalid),
    Ready(ServedFile),
}

/// Check a resolved path on disk before it is streamed
///
/// Validation is repeated on every call. A file that fails is removed so
/// that the next sync fetches it again.
pub fn prepare(path: &Path) -> ServeOutcome {
    if !path.is_file() {
        return ServeOutcome::NotFound;
    }

    match container::validate(path) {
        Ok(kind) => match std::fs::metadata(path) {
            Ok(meta) => ServeOutcome::Ready(ServedFile {
                path: path.to_path_buf(),
                kind,
                len: meta.len(),
            }),
            Err(_) => ServeOutcome::NotFound,
        },
        Err(reason) => {
            warn!(
                "Corrupted artifact {}: {}; deleting",
                path.display(),
                reason
            );
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to delete {}: {}", path.display(), e);
            }
            ServeOutcome::Corrupted(reason)
        }
    }
}

/// Reader that paces a download to the governor's current per-download rate
///
/// The rate is looked up again before every chunk, so downloads speed up
/// or slow down as others start and finish. The permit is held for as long
/// as the reader lives, which is as long as the response is being written;
/// a client disconnect ends the write, drops the reader and frees the slot.
pub struct ThrottledReader<R> {
    inner: R,
    governor: Arc<ResourceGovernor>,
    pause: Option<Duration>,
    _permit: Option<DownloadPermit>,
}

impl<R: Read> ThrottledReader<R> {
    pub fn new(inner: R, governor: Arc<ResourceGovernor>, permit: Option<DownloadPermit>) -> Self {
        Self {
            inner,
            governor,
            pause: None,
            _permit: permit,
        }
    }
}

impl ThrottledReader<File> {
    pub fn open(
        file: &ServedFile,
        governor: Arc<ResourceGovernor>,
        permit: Option<DownloadPermit>,
    ) -> io::Result<Self> {
        Ok(Self::new(File::open(&file.path)?, governor, permit))
    }
}

impl<R: Read> Read for ThrottledReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.governor.download_speed_limit();
        if limit == 0 {
            self.pause = None;
            return self.inner.read(buf);
        }

        if let Some(pause) = self.pause.take() {
            std::thread::sleep(pause);
        }

        let want = buf.len().min(CHUNK_SIZE);
        let n = self.inner.read(&mut buf[..want])?;
        if n > 0 {
            self.pause = Some(Duration::from_secs_f64(n as f64 / limit as f64));
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use std::time::Instant;
    use tempfile::TempDir;

    fn governor(dir: &TempDir, limit: u64) -> Arc<ResourceGovernor> {
        let config = ResourceConfig {
            enabled: true,
            max_concurrent_downloads: 2,
            max_requests_per_minute: 60,
            download_speed_limit: limit,
            state_file: dir.path().join("state.json"),
        };
        Arc::new(ResourceGovernor::open(&config))
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(prepare(&dir.path().join("nope.zip")), ServeOutcome::NotFound));
        assert!(matches!(prepare(dir.path()), ServeOutcome::NotFound));
    }

    #[test]
    fn test_corrupted_file_is_deleted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.tar.gz");
        std::fs::write(&path, b"<html>oops</html>").unwrap();

        assert!(matches!(prepare(&path), ServeOutcome::Corrupted(_)));
        assert!(!path.exists());
        assert!(matches!(prepare(&path), ServeOutcome::NotFound));
    }

    #[test]
    fn test_valid_file_is_ready() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"release notes").unwrap();

        match prepare(&path) {
            ServeOutcome::Ready(file) => {
                assert_eq!(file.kind, ContainerKind::Generic);
                assert_eq!(file.len, 13);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_unthrottled_reads_everything() {
        let dir = TempDir::new().unwrap();
        let data = vec![7u8; 64 * 1024];
        let mut reader = ThrottledReader::new(&data[..], governor(&dir, 0), None);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_throttled_reads_are_paced() {
        let dir = TempDir::new().unwrap();
        // 4 chunks at 64KB/s: three pauses of 125ms between them
        let data = vec![1u8; 4 * CHUNK_SIZE];
        let mut reader = ThrottledReader::new(&data[..], governor(&dir, 64 * 1024), None);

        let started = Instant::now();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out.len(), data.len());
        assert!(started.elapsed() >= Duration::from_millis(350));
    }

    #[test]
    fn test_chunks_are_bounded() {
        let dir = TempDir::new().unwrap();
        let data = vec![1u8; 3 * CHUNK_SIZE];
        let mut reader = ThrottledReader::new(&data[..], governor(&dir, u64::MAX), None);
        let mut buf = vec![0u8; 3 * CHUNK_SIZE];
        assert_eq!(reader.read(&mut buf).unwrap(), CHUNK_SIZE);
    }

    #[test]
    fn test_reader_holds_permit_until_dropped() {
        let dir = TempDir::new().unwrap();
        let governor = governor(&dir, 0);
        let permit = governor.try_acquire_download();
        let reader = ThrottledReader::new(&b"abc"[..], Arc::clone(&governor), permit);
        assert_eq!(governor.active_downloads(), 1);
        drop(reader);
        assert_eq!(governor.active_downloads(), 0);
    }
}
