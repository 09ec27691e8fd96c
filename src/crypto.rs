use std::cmp;
use std::io::{Error, ErrorKind, Read, Write};

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};

use crate::key::Key;
use crate::BLOCK_SIZE;

/// CBC encryption state, dispatched on key strength. Chaining state
/// carries across calls so the whole stream is one CBC chain.
enum CbcEnc {
    Aes128(cbc::Encryptor<Aes128>),
    Aes192(cbc::Encryptor<Aes192>),
    Aes256(cbc::Encryptor<Aes256>),
}

enum CbcDec {
    Aes128(cbc::Decryptor<Aes128>),
    Aes192(cbc::Decryptor<Aes192>),
    Aes256(cbc::Decryptor<Aes256>),
}

impl CbcEnc {
    fn new(key: &Key, iv: &[u8; BLOCK_SIZE]) -> Self {
        match key {
            Key::Aes128(k) => CbcEnc::Aes128(cbc::Encryptor::new(
                GenericArray::from_slice(k),
                GenericArray::from_slice(iv),
            )),
            Key::Aes192(k) => CbcEnc::Aes192(cbc::Encryptor::new(
                GenericArray::from_slice(k),
                GenericArray::from_slice(iv),
            )),
            Key::Aes256(k) => CbcEnc::Aes256(cbc::Encryptor::new(
                GenericArray::from_slice(k),
                GenericArray::from_slice(iv),
            )),
        }
    }

    // data must be block aligned
    fn encrypt_blocks(&mut self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % BLOCK_SIZE, 0);
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                CbcEnc::Aes128(e) => e.encrypt_block_mut(block),
                CbcEnc::Aes192(e) => e.encrypt_block_mut(block),
                CbcEnc::Aes256(e) => e.encrypt_block_mut(block),
            }
        }
    }
}

impl CbcDec {
    fn new(key: &Key, iv: &[u8; BLOCK_SIZE]) -> Self {
        match key {
            Key::Aes128(k) => CbcDec::Aes128(cbc::Decryptor::new(
                GenericArray::from_slice(k),
                GenericArray::from_slice(iv),
            )),
            Key::Aes192(k) => CbcDec::Aes192(cbc::Decryptor::new(
                GenericArray::from_slice(k),
                GenericArray::from_slice(iv),
            )),
            Key::Aes256(k) => CbcDec::Aes256(cbc::Decryptor::new(
                GenericArray::from_slice(k),
                GenericArray::from_slice(iv),
            )),
        }
    }

    fn decrypt_blocks(&mut self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % BLOCK_SIZE, 0);
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                CbcDec::Aes128(d) => d.decrypt_block_mut(block),
                CbcDec::Aes192(d) => d.decrypt_block_mut(block),
                CbcDec::Aes256(d) => d.decrypt_block_mut(block),
            }
        }
    }
}

/// Encrypting write adapter.
///
/// Every `write` call is padded independently: an unaligned chunk
/// gets a PKCS#7 tail, an aligned chunk is encrypted as-is with no
/// pad block. Callers must therefore only hand over block aligned
/// chunks except for one final short flush, which is exactly how the
/// re-blocking layer above drives this. This per-call behavior is
/// part of the on-disk format, do not fold the padding into a final
/// flush.
pub struct CbcWriter<W: Write> {
    inner: W,
    engine: CbcEnc,
    // scratch for pad + in-place encrypt per call
    buf: Vec<u8>,
}

impl<W: Write> CbcWriter<W> {
    pub fn new(inner: W, key: &Key, iv: &[u8; BLOCK_SIZE]) -> Self {
        CbcWriter {
            inner,
            engine: CbcEnc::new(key, iv),
            buf: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CbcWriter<W> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        // Zero length writes never trigger padding
        if data.is_empty() {
            return Ok(0);
        }

        self.buf.clear();
        self.buf.extend_from_slice(data);

        let partial = self.buf.len() % BLOCK_SIZE;
        if partial != 0 {
            let pad = BLOCK_SIZE - partial;
            self.buf.resize(self.buf.len() + pad, pad as u8);
        }

        self.engine.encrypt_blocks(&mut self.buf);
        self.inner.write_all(&self.buf)?;

        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting read adapter.
///
/// Ciphertext is pulled in `bufsize` chunks, decrypted in place in the
/// pending buffer and served from there across calls. No unpadding
/// and no integrity check happen here: decrypting with the wrong key
/// hands garbage to the container parser, which is where it fails.
pub struct CbcReader<R: Read> {
    inner: R,
    engine: CbcDec,
    // Decrypted bytes not yet handed out live at pending[served..]
    pending: Vec<u8>,
    served: usize,
    eof: bool,
    bufsize: usize,
}

impl<R: Read> CbcReader<R> {
    pub fn new(inner: R, key: &Key, iv: &[u8; BLOCK_SIZE], bufsize: usize) -> Self {
        CbcReader {
            inner,
            engine: CbcDec::new(key, iv),
            pending: Vec::new(),
            served: 0,
            eof: false,
            bufsize: round_to_block(bufsize),
        }
    }

    /// Pull the next ciphertext chunk and decrypt it in place. A
    /// short final chunk is fine as long as it stays block aligned,
    /// anything else is a truncated stream.
    fn refill(&mut self) -> std::io::Result<()> {
        self.pending.resize(self.bufsize, 0);
        self.served = 0;

        let mut filled = 0;
        while filled < self.pending.len() {
            match self.inner.read(&mut self.pending[filled..])? {
                0 => {
                    self.eof = true;
                    break;
                }
                n => filled += n,
            }
        }
        self.pending.truncate(filled);

        if filled % BLOCK_SIZE != 0 {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "ciphertext ends mid cipher block",
            ));
        }

        self.engine.decrypt_blocks(&mut self.pending);
        Ok(())
    }
}

impl<R: Read> Read for CbcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.served == self.pending.len() {
            if self.eof {
                return Ok(0);
            }
            self.refill()?;
            if self.pending.is_empty() {
                return Ok(0);
            }
        }

        let take = cmp::min(self.pending.len() - self.served, buf.len());
        buf[..take].copy_from_slice(&self.pending[self.served..self.served + take]);
        self.served += take;
        Ok(take)
    }
}

/// Re-blocks arbitrary upstream writes into fixed `chunk_size` writes
/// so only the final flush at [`ChunkWriter::finish`] is unaligned.
/// This keeps all cipher padding at the tail of the stream, past the
/// tar end marker, where readers never look.
pub struct ChunkWriter<W: Write> {
    inner: Option<W>,
    buf: Vec<u8>,
    chunk_size: usize,
}

impl<W: Write> ChunkWriter<W> {
    pub fn new(inner: W, chunk_size: usize) -> Self {
        ChunkWriter {
            inner: Some(inner),
            buf: Vec::with_capacity(chunk_size),
            chunk_size: round_to_block(chunk_size),
        }
    }

    /// Write out the unaligned tail and hand the inner writer back.
    pub fn finish(mut self) -> std::io::Result<W> {
        match self.inner.take() {
            Some(mut inner) => {
                if !self.buf.is_empty() {
                    inner.write_all(&self.buf)?;
                    self.buf.clear();
                }
                inner.flush()?;
                Ok(inner)
            }
            None => Err(Error::new(ErrorKind::Other, "chunk writer already finished")),
        }
    }
}

impl<W: Write> Write for ChunkWriter<W> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => {
                return Err(Error::new(ErrorKind::Other, "write after finish"));
            }
        };

        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.chunk_size {
            inner.write_all(&self.buf[..self.chunk_size])?;
            self.buf.drain(..self.chunk_size);
        }

        Ok(data.len())
    }

    // Deliberately does not force out the partial tail, that would
    // insert a mid-stream pad block. The tail only moves on finish.
    fn flush(&mut self) -> std::io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for ChunkWriter<W> {
    fn drop(&mut self) {
        // Best effort tail flush when close() was skipped
        if let Some(inner) = self.inner.as_mut() {
            if !self.buf.is_empty() {
                let _ = inner.write_all(&self.buf);
            }
            let _ = inner.flush();
        }
    }
}

pub(crate) fn round_to_block(size: usize) -> usize {
    let size = size.max(BLOCK_SIZE);
    match size % BLOCK_SIZE {
        0 => size,
        partial => size + (BLOCK_SIZE - partial),
    }
}

#[cfg(test)]
mod test_cbc_roundtrip {
    use super::*;
    use crate::key::derive_iv;
    use std::io::Cursor;

    fn test_key() -> Key {
        Key::new(&[0x42; 16]).unwrap()
    }

    fn test_iv(key: &Key) -> [u8; BLOCK_SIZE] {
        derive_iv(key, &[0x13; BLOCK_SIZE])
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(7))
            .collect()
    }

    #[test]
    fn aligned_roundtrip() {
        let key = test_key();
        let iv = test_iv(&key);
        let data = pattern(4096);

        let mut enc = CbcWriter::new(Vec::new(), &key, &iv);
        enc.write_all(&data).unwrap();
        let ciphertext = enc.into_inner();

        // Aligned write, no pad block
        assert_eq!(ciphertext.len(), data.len());
        assert_ne!(ciphertext, data);

        let mut dec = CbcReader::new(Cursor::new(ciphertext), &key, &iv, 1024);
        let mut plain = Vec::new();
        dec.read_to_end(&mut plain).unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn unaligned_write_pads_per_call() {
        let key = test_key();
        let iv = test_iv(&key);
        let data = pattern(5000);

        let mut enc = CbcWriter::new(Vec::new(), &key, &iv);
        enc.write_all(&data).unwrap();
        let ciphertext = enc.into_inner();

        // 5000 -> padded to 5008 with 8 bytes of 0x08
        assert_eq!(ciphertext.len(), 5008);

        let mut dec = CbcReader::new(Cursor::new(ciphertext), &key, &iv, 1024);
        let mut plain = Vec::new();
        dec.read_to_end(&mut plain).unwrap();

        assert_eq!(&plain[..5000], &data[..]);
        assert_eq!(&plain[5000..], &[8u8; 8]);
    }

    #[test]
    fn empty_write_is_noop() {
        let key = test_key();
        let iv = test_iv(&key);

        let mut enc = CbcWriter::new(Vec::new(), &key, &iv);
        assert_eq!(enc.write(&[]).unwrap(), 0);
        assert!(enc.into_inner().is_empty());
    }

    #[test]
    fn wrong_key_yields_garbage_not_error() {
        let key = test_key();
        let iv = test_iv(&key);
        let data = pattern(1024);

        let mut enc = CbcWriter::new(Vec::new(), &key, &iv);
        enc.write_all(&data).unwrap();
        let ciphertext = enc.into_inner();

        let bad_key = Key::new(&[0x43; 16]).unwrap();
        let bad_iv = test_iv(&bad_key);
        let mut dec = CbcReader::new(Cursor::new(ciphertext), &bad_key, &bad_iv, 1024);
        let mut plain = Vec::new();
        dec.read_to_end(&mut plain).unwrap();

        // Silently wrong, never an error at this layer
        assert_eq!(plain.len(), data.len());
        assert_ne!(plain, data);
    }

    #[test]
    fn truncated_ciphertext_is_unexpected_eof() {
        let key = test_key();
        let iv = test_iv(&key);
        let data = pattern(256);

        let mut enc = CbcWriter::new(Vec::new(), &key, &iv);
        enc.write_all(&data).unwrap();
        let mut ciphertext = enc.into_inner();
        ciphertext.truncate(250);

        let mut dec = CbcReader::new(Cursor::new(ciphertext), &key, &iv, 1024);
        let mut plain = Vec::new();
        let err = dec.read_to_end(&mut plain).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn small_reads_across_chunk_boundary() {
        let key = test_key();
        let iv = test_iv(&key);
        let data = pattern(2048);

        let mut enc = CbcWriter::new(Vec::new(), &key, &iv);
        enc.write_all(&data).unwrap();
        let ciphertext = enc.into_inner();

        // Tiny internal buffer, awkward caller reads
        let mut dec = CbcReader::new(Cursor::new(ciphertext), &key, &iv, 32);
        let mut plain = Vec::new();
        let mut chunk = [0u8; 7];
        loop {
            match dec.read(&mut chunk).unwrap() {
                0 => break,
                n => plain.extend_from_slice(&chunk[..n]),
            }
        }
        assert_eq!(plain, data);
    }

    #[test]
    fn read_serves_at_most_one_chunk_per_call() {
        let key = test_key();
        let iv = test_iv(&key);
        let data = pattern(128);

        let mut enc = CbcWriter::new(Vec::new(), &key, &iv);
        enc.write_all(&data).unwrap();
        let ciphertext = enc.into_inner();

        // Oversized destination, the reader still hands out one
        // decrypted chunk at a time
        let mut dec = CbcReader::new(Cursor::new(ciphertext), &key, &iv, 32);
        let mut buf = [0u8; 1024];
        assert_eq!(dec.read(&mut buf).unwrap(), 32);
        assert_eq!(&buf[..32], &data[..32]);

        let mut rest = Vec::new();
        dec.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, &data[32..]);
    }

    #[test]
    fn zero_length_destination_reads_nothing() {
        let key = test_key();
        let iv = test_iv(&key);
        let data = pattern(64);

        let mut enc = CbcWriter::new(Vec::new(), &key, &iv);
        enc.write_all(&data).unwrap();

        let mut dec = CbcReader::new(Cursor::new(enc.into_inner()), &key, &iv, 32);
        let mut first = [0u8; 16];
        dec.read_exact(&mut first).unwrap();

        // An empty destination consumes nothing from the pending buffer
        assert_eq!(dec.read(&mut []).unwrap(), 0);

        let mut rest = Vec::new();
        dec.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, &data[16..]);
    }

    #[test]
    fn separate_calls_keep_one_cbc_chain() {
        let key = test_key();
        let iv = test_iv(&key);
        let data = pattern(1024);

        // One call vs two aligned calls must produce identical bytes
        let mut one = CbcWriter::new(Vec::new(), &key, &iv);
        one.write_all(&data).unwrap();

        let mut two = CbcWriter::new(Vec::new(), &key, &iv);
        two.write_all(&data[..512]).unwrap();
        two.write_all(&data[512..]).unwrap();

        assert_eq!(one.into_inner(), two.into_inner());
    }
}
