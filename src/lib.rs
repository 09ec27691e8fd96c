//! Streaming encrypted tar archives
//!
//! This crate wraps the `tar` container format with a transparent
//! AES-CBC layer so that backups can be written and read as a stream,
//! without ever holding an archive in memory. It also supports
//! embedding a complete inner tar archive as a single member of an
//! outer archive, filtering unsafe member paths on extraction, and
//! recursively archiving a directory tree with glob exclusions.
//!
//! # On disk format
//!
//! With a key the file layout is:
//!
//! | Type      | Name       | Description |
//! | --------: | ---------- | ----------- |
//! | [u8; 16]  | salt       | Random per-file salt, stored in cleartext |
//! | [u8; N]   | ciphertext | The (optionally gzipped) tar stream, AES-CBC encrypted |
//!
//! The IV is derived from `key || salt` (see [`key::derive_iv`]), so
//! nothing besides the caller supplied key is needed to open a file.
//! Key length selects the AES variant: 16 bytes is AES-128, 24 is
//! AES-192, 32 is AES-256.
//!
//! Each logical write into the cipher layer is padded independently to
//! the 16 byte cipher block (PKCS#7 when unaligned, no pad block when
//! already aligned). The session layer re-blocks the tar stream into
//! `bufsize` chunks so that only the very last flush is unaligned and
//! all padding lands at the tail of the file, where the tar end marker
//! (or the gzip decoder) ignores it. Decryption performs no unpadding
//! and no integrity check: a wrong key produces garbage that fails in
//! the container parser, not here.
//!
//! Without a key the file is a plain (optionally gzipped) tar.
//!
//! # Nested archives
//!
//! [`session::SecureTarWriter::inner_tar`] reserves a zero filled
//! header block in the outer archive, streams a complete inner
//! archive (with its own key and compression choice) directly into
//! the shared file, then seeks back and patches the real header in
//! once the inner size is known. The outer archive must be an
//! uncompressed, unencrypted tar for this to work, since the
//! backpatch needs a seekable byte-addressed sink.

pub mod archiver;
pub mod crypto;
pub mod filter;
pub mod key;
pub mod session;

/// AES cipher block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Tar header/record block size in bytes.
pub const TAR_BLOCK_SIZE: u64 = 512;

/// Default I/O chunk size for the re-blocking layer. Multiple of
/// [`BLOCK_SIZE`], matches the historical default of the format.
pub const DEFAULT_BUFSIZE: usize = 10240;

pub use filter::{secure_entries, ExcludeFilter};
pub use key::Key;
pub use session::{SecureTar, SecureTarReader, SecureTarWriter, SessionError};
