use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;

use crate::crypto::CbcReader;
use crate::filter::secure_entries;
use crate::key::derive_iv;
use crate::session::{SecureTar, SessionError};
use crate::BLOCK_SIZE;

/// The reader stack between the byte source and the tar container,
/// the mirror of the write side.
pub struct ReadStack<R: Read>(Layers<R>);

enum Layers<R: Read> {
    Plain(R),
    Gz(GzDecoder<R>),
    Crypt(CbcReader<R>),
    GzCrypt(GzDecoder<CbcReader<R>>),
}

impl<R: Read> Read for ReadStack<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.0 {
            Layers::Plain(r) => r.read(buf),
            Layers::Gz(r) => r.read(buf),
            Layers::Crypt(r) => r.read(buf),
            Layers::GzCrypt(r) => r.read(buf),
        }
    }
}

/// An open read session around a tar container. The source is a file
/// opened by path, or any other byte stream handed in whole, such as
/// a member of an enclosing archive.
pub struct SecureTarReader<R: Read = File> {
    archive: Archive<ReadStack<R>>,
}

impl SecureTarReader<File> {
    pub(crate) fn open(opts: &SecureTar) -> Result<Self, SessionError> {
        Self::with_source(File::open(&opts.path)?, opts)
    }
}

impl<R: Read> SecureTarReader<R> {
    pub(crate) fn with_source(mut source: R, opts: &SecureTar) -> Result<Self, SessionError> {
        let layers = match &opts.key {
            Some(key) => {
                // The salt block leads the stream in cleartext
                let mut salt = [0u8; BLOCK_SIZE];
                source.read_exact(&mut salt)?;
                let iv = derive_iv(key, &salt);

                let crypt = CbcReader::new(source, key, &iv, opts.bufsize);
                if opts.gzip {
                    Layers::GzCrypt(GzDecoder::new(crypt))
                } else {
                    Layers::Crypt(crypt)
                }
            }
            None if opts.gzip => Layers::Gz(GzDecoder::new(source)),
            None => Layers::Plain(source),
        };

        Ok(SecureTarReader {
            archive: Archive::new(ReadStack(layers)),
        })
    }

    /// The underlying container, for walking members by hand. An
    /// archive over a stream can be iterated once.
    pub fn archive(&mut self) -> &mut Archive<ReadStack<R>> {
        &mut self.archive
    }

    /// Unpack every member with a safe path under `dst`, creating it
    /// first. Members with absolute or `..` carrying paths are skipped
    /// with a warning, never extracted.
    pub fn extract_to(&mut self, dst: &Path) -> Result<(), SessionError> {
        fs::create_dir_all(dst)?;
        for entry in secure_entries(self.archive.entries()?) {
            entry?.unpack_in(dst)?;
        }
        Ok(())
    }
}
