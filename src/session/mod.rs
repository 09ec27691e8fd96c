//! Archive session lifecycle.
//!
//! A [`SecureTar`] value holds the configuration surface of one
//! archive file (path, optional key, gzip, buffer size) and opens it
//! for writing or reading. The session owns its file handle and its
//! cipher state; a nested session borrows the enclosing session's
//! sink instead and never closes it.

mod reader;
mod writer;

pub use reader::{ReadStack, SecureTarReader};
pub use writer::{SecureTarWriter, WriteStack};

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::crypto::round_to_block;
use crate::key::{Key, KeyError};
use crate::DEFAULT_BUFSIZE;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("nested archive requires an uncompressed, unencrypted, file backed outer archive")]
    NotSeekable,
}

/// Configuration for one archive file.
///
/// No key disables encryption entirely; a key of 16, 24 or 32 bytes
/// selects AES-128/192/256. `gzip` defaults to on, `bufsize` is the
/// I/O chunk size hint (rounded up to a cipher block multiple).
pub struct SecureTar {
    pub(crate) path: PathBuf,
    pub(crate) key: Option<Key>,
    pub(crate) gzip: bool,
    pub(crate) bufsize: usize,
}

impl SecureTar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SecureTar {
            path: path.into(),
            key: None,
            gzip: true,
            bufsize: DEFAULT_BUFSIZE,
        }
    }

    pub fn key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn bufsize(mut self, bufsize: usize) -> Self {
        self.bufsize = round_to_block(bufsize);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// On disk size in MiB, rounded to two decimals. Zero when the
    /// file does not exist.
    pub fn size_mb(&self) -> f64 {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => (meta.len() as f64 / 1_048_576.0 * 100.0).round() / 100.0,
            _ => 0.0,
        }
    }

    /// Open for writing. Creates (or truncates) the target file; with
    /// a key the fresh salt block is written before anything else.
    pub fn create(&self) -> Result<SecureTarWriter<'static>, SessionError> {
        SecureTarWriter::create(self)
    }

    /// Open for reading. With a key the salt block is read back and
    /// the cipher context derived from it.
    pub fn open(&self) -> Result<SecureTarReader, SessionError> {
        SecureTarReader::open(self)
    }

    /// Open for reading from an already opened byte stream instead of
    /// the path, e.g. a member of an enclosing archive streamed in
    /// place. Salt handling is the same as [`SecureTar::open`]; the
    /// configured path is ignored.
    pub fn open_from<R: Read>(&self, source: R) -> Result<SecureTarReader<R>, SessionError> {
        SecureTarReader::with_source(source, self)
    }
}

#[cfg(test)]
mod test_options {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn size_of_missing_file_is_zero() {
        let tmp = tempdir().unwrap();
        let opts = SecureTar::new(tmp.path().join("nope.tar"));
        assert_eq!(opts.size_mb(), 0.0);
    }

    #[test]
    fn size_rounds_to_two_decimals() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("some.tar");

        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&vec![0u8; 1_572_864]).unwrap(); // 1.5 MiB
        drop(file);

        assert_eq!(SecureTar::new(&path).size_mb(), 1.5);

        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&vec![0u8; 123_456]).unwrap();
        drop(file);

        assert_eq!(SecureTar::new(&path).size_mb(), 0.12);
    }

    #[test]
    fn bufsize_rounds_to_cipher_block() {
        let opts = SecureTar::new("x.tar").bufsize(1000);
        assert_eq!(opts.bufsize, 1008);
    }
}
