// Container-format checks for mirrored artifacts
//
// Mirrored files are re-validated on every request. A file that fails its
// check is never served: upstream error pages saved under an archive name
// and truncated downloads are the usual culprits.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Gzip files smaller than this are treated as truncated
pub const MIN_GZIP_SIZE: u64 = 1024;

/// Bytes the gzip probe must be able to inflate (or reach EOF before)
const GZIP_PROBE_BYTES: usize = 8 * 1024;

/// Leading bytes inspected for generic files
const GENERIC_SNIFF_BYTES: usize = 1024;

/// Offset of the `ustar` magic inside a tar header
const TAR_MAGIC_OFFSET: usize = 257;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZIP_MAGIC: &[u8] = b"PK";
const TAR_MAGIC: &[u8] = b"ustar";

/// Phrases that mark a saved error page rather than real content
const ERROR_PHRASES: &[&str] = &["not found", "403", "forbidden"];

/// Archive format claimed by a file's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Gzip,
    Tar,
    Zip,
    Phar,
    Generic,
}

impl ContainerKind {
    /// Infer the container kind from a file name
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".gz") {
            ContainerKind::Gzip
        } else if name.ends_with(".tar") {
            ContainerKind::Tar
        } else if name.ends_with(".zip") {
            ContainerKind::Zip
        } else if name.ends_with(".phar") {
            ContainerKind::Phar
        } else {
            ContainerKind::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Gzip => "gzip",
            ContainerKind::Tar => "tar",
            ContainerKind::Zip => "zip",
            ContainerKind::Phar => "phar",
            ContainerKind::Generic => "generic",
        }
    }

    /// Content type sent when the file is streamed
    pub fn content_type(&self) -> &'static str {
        match self {
            ContainerKind::Gzip => "application/gzip",
            ContainerKind::Tar => "application/x-tar",
            ContainerKind::Zip => "application/zip",
            ContainerKind::Phar => "application/octet-stream",
            ContainerKind::Generic => "application/octet-stream",
        }
    }
}

/// Why a file failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalid(pub String);

impl std::fmt::Display for Invalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn invalid<T>(reason: impl Into<String>) -> Result<T, Invalid> {
    Err(Invalid(reason.into()))
}

fn io_invalid(e: io::Error) -> Invalid {
    Invalid(format!("unreadable: {}", e))
}

/// Read up to `n` leading bytes
fn read_head(file: &mut File, n: usize) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(n);
    file.by_ref().take(n as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// Validate a file against the container kind its name claims
pub fn validate(path: &Path) -> Result<ContainerKind, Invalid> {
    let kind = ContainerKind::from_path(path);
    validate_as(path, kind).map(|_| kind)
}

/// Validate a file as `kind`, whatever its name (used for `.part` downloads)
pub fn validate_as(path: &Path, kind: ContainerKind) -> Result<(), Invalid> {
    let mut file = File::open(path).map_err(io_invalid)?;
    let size = file.metadata().map_err(io_invalid)?.len();

    match kind {
        ContainerKind::Gzip => check_gzip(&mut file, size)?,
        ContainerKind::Tar => check_tar(&mut file)?,
        ContainerKind::Zip => check_zip(&mut file)?,
        ContainerKind::Phar => check_phar(&mut file)?,
        ContainerKind::Generic => check_generic(&mut file, size)?,
    }
    Ok(())
}

fn check_gzip(file: &mut File, size: u64) -> Result<(), Invalid> {
    if size < MIN_GZIP_SIZE {
        return invalid(format!("gzip too small ({} bytes)", size));
    }

    let head = read_head(file, GZIP_MAGIC.len()).map_err(io_invalid)?;
    if head != GZIP_MAGIC {
        return invalid("missing gzip magic");
    }

    file.seek(SeekFrom::Start(0)).map_err(io_invalid)?;
    let mut decoder = MultiGzDecoder::new(file.by_ref());
    let mut probe = vec![0u8; GZIP_PROBE_BYTES];
    let mut filled = 0;
    while filled < GZIP_PROBE_BYTES {
        match decoder.read(&mut probe[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return invalid(format!("gzip stream is corrupt: {}", e)),
        }
    }
    if filled == 0 {
        return invalid("gzip stream inflates to nothing");
    }
    Ok(())
}

fn check_tar(file: &mut File) -> Result<(), Invalid> {
    let head = read_head(file, TAR_MAGIC_OFFSET + TAR_MAGIC.len()).map_err(io_invalid)?;
    if head.len() < TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        || &head[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] != TAR_MAGIC
    {
        return invalid("missing ustar marker");
    }
    Ok(())
}

fn check_zip(file: &mut File) -> Result<(), Invalid> {
    let head = read_head(file, ZIP_MAGIC.len()).map_err(io_invalid)?;
    if head != ZIP_MAGIC {
        return invalid("missing zip magic");
    }

    file.seek(SeekFrom::Start(0)).map_err(io_invalid)?;
    zip::ZipArchive::new(file.by_ref())
        .map(|_| ())
        .map_err(|e| Invalid(format!("zip central directory unreadable: {}", e)))
}

/// Phar archives come as zip, tar, or a PHP stub script
fn check_phar(file: &mut File) -> Result<(), Invalid> {
    let head = read_head(file, TAR_MAGIC_OFFSET + TAR_MAGIC.len()).map_err(io_invalid)?;

    if head.starts_with(ZIP_MAGIC) {
        file.seek(SeekFrom::Start(0)).map_err(io_invalid)?;
        return check_zip(file);
    }
    if head.starts_with(b"<?php") || head.starts_with(b"#!") {
        return Ok(());
    }
    if head.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &head[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
    {
        return Ok(());
    }
    invalid("phar is neither a zip, tar nor php stub")
}

fn check_generic(file: &mut File, size: u64) -> Result<(), Invalid> {
    if size == 0 {
        return invalid("empty file");
    }

    let head = read_head(file, GENERIC_SNIFF_BYTES).map_err(io_invalid)?;
    let text = String::from_utf8_lossy(&head).to_lowercase();
    let trimmed = text.trim_start();

    if trimmed.starts_with("<!doctype html") || trimmed.starts_with("<html") {
        return invalid("looks like an html page");
    }
    if let Some(phrase) = ERROR_PHRASES.iter().find(|p| text.contains(*p)) {
        return invalid(format!("contains error phrase '{}'", phrase));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    /// Deterministic bytes that do not compress well
    fn noise(len: usize) -> Vec<u8> {
        let mut state: u32 = 0x1234_5678;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect()
    }

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn tar_header() -> Vec<u8> {
        let mut block = vec![0u8; 512];
        block[..8].copy_from_slice(b"file.txt");
        block[257..262].copy_from_slice(b"ustar");
        block
    }

    fn zip_bytes() -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::FileOptions::<()>::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file("hello.txt", options).unwrap();
            writer.write_all(b"hello").unwrap();
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(ContainerKind::from_path(Path::new("php-8.3.1.tar.gz")), ContainerKind::Gzip);
        assert_eq!(ContainerKind::from_path(Path::new("redis-6.0.2.TGZ")), ContainerKind::Gzip);
        assert_eq!(ContainerKind::from_path(Path::new("x.tar")), ContainerKind::Tar);
        assert_eq!(ContainerKind::from_path(Path::new("x.zip")), ContainerKind::Zip);
        assert_eq!(ContainerKind::from_path(Path::new("composer.phar")), ContainerKind::Phar);
        assert_eq!(ContainerKind::from_path(Path::new("README")), ContainerKind::Generic);
    }

    #[test]
    fn test_tiny_gzip_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "x.tar.gz", &[0x1f, 0x8b, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(validate(&path).is_err());
    }

    #[test]
    fn test_well_formed_gzip_is_accepted() {
        let dir = TempDir::new().unwrap();
        let bytes = gzip(&noise(32 * 1024));
        assert!(bytes.len() >= 1024);
        let path = write(&dir, "x.tar.gz", &bytes);
        assert_eq!(validate(&path), Ok(ContainerKind::Gzip));
    }

    #[test]
    fn test_gzip_without_magic_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "x.tgz", &noise(4096));
        assert_eq!(validate(&path), Err(Invalid("missing gzip magic".into())));
    }

    #[test]
    fn test_corrupt_gzip_body_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut bytes = gzip(&noise(32 * 1024));
        for b in bytes.iter_mut().skip(20).take(2000) {
            *b = 0xff;
        }
        let path = write(&dir, "x.tar.gz", &bytes);
        assert!(validate(&path).is_err());
    }

    #[test]
    fn test_tar_requires_ustar_marker() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "good.tar", &tar_header());
        assert_eq!(validate(&good), Ok(ContainerKind::Tar));

        let zip_named_tar = write(&dir, "x.tar", &zip_bytes());
        assert!(validate(&zip_named_tar).is_err());
    }

    #[test]
    fn test_zip_checks() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "good.zip", &zip_bytes());
        assert_eq!(validate(&good), Ok(ContainerKind::Zip));

        let truncated = write(&dir, "bad.zip", b"PK\x03\x04 truncated");
        assert!(validate(&truncated).is_err());

        let html = write(&dir, "html.zip", b"<html>404</html>");
        assert!(validate(&html).is_err());
    }

    #[test]
    fn test_phar_variants() {
        let dir = TempDir::new().unwrap();
        let stub = write(&dir, "stub.phar", b"#!/usr/bin/env php\n<?php __HALT_COMPILER();");
        assert!(validate(&stub).is_ok());

        let php = write(&dir, "php.phar", b"<?php echo 1;");
        assert!(validate(&php).is_ok());

        let zipped = write(&dir, "zipped.phar", &zip_bytes());
        assert!(validate(&zipped).is_ok());

        let tarred = write(&dir, "tarred.phar", &tar_header());
        assert!(validate(&tarred).is_ok());

        let page = write(&dir, "page.phar", b"<!DOCTYPE html><title>Oops</title>");
        assert!(validate(&page).is_err());
    }

    #[test]
    fn test_generic_error_pages_are_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(validate(&write(&dir, "a.txt", b"<!DOCTYPE html><html></html>")).is_err());
        assert!(validate(&write(&dir, "b.txt", b"  <HTML><body>hi</body>")).is_err());
        assert!(validate(&write(&dir, "c.txt", b"Error: Not Found")).is_err());
        assert!(validate(&write(&dir, "d.txt", b"403 Forbidden")).is_err());
        assert!(validate(&write(&dir, "e.txt", b"")).is_err());
        assert!(validate(&write(&dir, "f.sha256", b"abc123  php-8.3.1.tar.gz\n")).is_ok());
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        assert!(validate(&dir.path().join("nope.tar.gz")).is_err());
    }
}
