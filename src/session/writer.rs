use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, EntryType, Header};

use crate::archiver;
use crate::crypto::{CbcWriter, ChunkWriter};
use crate::filter::ExcludeFilter;
use crate::key::{derive_iv, gen_salt, Key};
use crate::session::{SecureTar, SessionError};
use crate::TAR_BLOCK_SIZE;

const GZIP_LEVEL: u32 = 6;
const HEADER_BLOCK: usize = TAR_BLOCK_SIZE as usize;

/// The raw byte sink under a write session: a file the session owns,
/// or one borrowed from an enclosing session (nested case). A
/// borrowed sink is never closed here, dropping the borrow hands it
/// back to the outer session.
pub(crate) enum Sink<'a> {
    Owned(File),
    Shared(&'a mut File),
}

impl Sink<'_> {
    fn file_mut(&mut self) -> &mut File {
        match self {
            Sink::Owned(file) => file,
            Sink::Shared(file) => file,
        }
    }
}

impl Write for Sink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file_mut().flush()
    }
}

/// The writer stack between the tar container and the sink,
/// assembled at session open from the key/gzip configuration.
pub struct WriteStack<'a>(Layers<'a>);

enum Layers<'a> {
    Plain(Sink<'a>),
    Gz(GzEncoder<Sink<'a>>),
    Crypt(ChunkWriter<CbcWriter<Sink<'a>>>),
    GzCrypt(GzEncoder<ChunkWriter<CbcWriter<Sink<'a>>>>),
}

impl Write for WriteStack<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.0 {
            Layers::Plain(w) => w.write(buf),
            Layers::Gz(w) => w.write(buf),
            Layers::Crypt(w) => w.write(buf),
            Layers::GzCrypt(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.0 {
            Layers::Plain(w) => w.flush(),
            Layers::Gz(w) => w.flush(),
            Layers::Crypt(w) => w.flush(),
            Layers::GzCrypt(w) => w.flush(),
        }
    }
}

impl WriteStack<'_> {
    /// Tear the stack down layer by layer: gzip trailer, cipher tail
    /// (with its final pad block), then flush the sink.
    fn finish(self) -> io::Result<()> {
        match self.0 {
            Layers::Plain(mut sink) => sink.flush(),
            Layers::Gz(gz) => gz.finish()?.flush(),
            Layers::Crypt(chunked) => {
                let mut sink = chunked.finish()?.into_inner();
                sink.flush()
            }
            Layers::GzCrypt(gz) => {
                let mut sink = gz.finish()?.finish()?.into_inner();
                sink.flush()
            }
        }
    }

    // Nested embedding needs the bare file: only an uncompressed,
    // unencrypted stack exposes one.
    fn plain_file(&mut self) -> Option<&mut File> {
        match &mut self.0 {
            Layers::Plain(sink) => Some(sink.file_mut()),
            _ => None,
        }
    }
}

/// An open write session around a tar container.
pub struct SecureTarWriter<'a> {
    tar: Builder<WriteStack<'a>>,
    bufsize: usize,
}

impl SecureTarWriter<'static> {
    pub(crate) fn create(opts: &SecureTar) -> Result<Self, SessionError> {
        let file = File::create(&opts.path)?;
        Self::with_sink(Sink::Owned(file), opts.key.as_ref(), opts.gzip, opts.bufsize)
    }
}

impl<'a> SecureTarWriter<'a> {
    fn with_sink(
        mut sink: Sink<'a>,
        key: Option<&Key>,
        gzip: bool,
        bufsize: usize,
    ) -> Result<Self, SessionError> {
        let layers = match key {
            Some(key) => {
                // Salt block goes first, in cleartext
                let salt = gen_salt();
                sink.write_all(&salt)?;
                let iv = derive_iv(key, &salt);

                let chunked = ChunkWriter::new(CbcWriter::new(sink, key, &iv), bufsize);
                if gzip {
                    Layers::GzCrypt(GzEncoder::new(chunked, Compression::new(GZIP_LEVEL)))
                } else {
                    Layers::Crypt(chunked)
                }
            }
            None if gzip => Layers::Gz(GzEncoder::new(sink, Compression::new(GZIP_LEVEL))),
            None => Layers::Plain(sink),
        };

        let mut tar = Builder::new(WriteStack(layers));
        tar.follow_symlinks(false);

        Ok(SecureTarWriter { tar, bufsize })
    }

    /// The underlying container builder, for direct appends.
    pub fn builder(&mut self) -> &mut Builder<WriteStack<'a>> {
        &mut self.tar
    }

    /// Recursively archive `origin` under the alias `arcname`,
    /// honoring the exclusion filter. See [`archiver::add_dir_contents`].
    pub fn add_dir_contents(
        &mut self,
        origin: &Path,
        arcname: &Path,
        excludes: &ExcludeFilter,
    ) -> io::Result<()> {
        archiver::add_dir_contents(&mut self.tar, origin, arcname, excludes)
    }

    /// Embed a complete inner archive as the single member `name` of
    /// this archive, streaming straight into the shared file.
    ///
    /// The inner archive picks its own key and compression. Because
    /// the member size is only known once the inner session closes, a
    /// zero filled header block is reserved up front and backpatched
    /// afterwards; the declared size is the exact byte count the
    /// inner session put on the sink, before the zero padding that
    /// realigns the outer archive to its block granularity.
    ///
    /// Only an uncompressed, unencrypted, file backed outer session
    /// can host this, anything else cannot seek back to the
    /// placeholder and fails fast with [`SessionError::NotSeekable`].
    pub fn inner_tar<F>(
        &mut self,
        name: &str,
        key: Option<&Key>,
        gzip: bool,
        add: F,
    ) -> Result<(), SessionError>
    where
        F: FnOnce(&mut SecureTarWriter<'_>) -> Result<(), SessionError>,
    {
        let bufsize = self.bufsize;

        let file = match self.tar.get_mut().plain_file() {
            Some(file) => file,
            None => return Err(SessionError::NotSeekable),
        };

        // Reserve the header slot
        let header_pos = file.stream_position()?;
        file.write_all(&[0u8; HEADER_BLOCK])?;
        let body_pos = header_pos + TAR_BLOCK_SIZE;

        // The inner session borrows our sink for its whole life; the
        // borrow ends at close, which also restores our exclusive
        // access. Close runs on the error path too.
        let mut inner = SecureTarWriter::with_sink(Sink::Shared(file), key, gzip, bufsize)?;
        let added = add(&mut inner);
        let closed = inner.close();
        added?;
        closed?;

        let file = match self.tar.get_mut().plain_file() {
            Some(file) => file,
            None => return Err(SessionError::NotSeekable),
        };
        let end_pos = file.stream_position()?;
        let size = end_pos - body_pos;

        // Zero pad the member body out to the container block size
        let remainder = size % TAR_BLOCK_SIZE;
        if remainder > 0 {
            file.write_all(&vec![0u8; (TAR_BLOCK_SIZE - remainder) as usize])?;
        }
        let padded_end = file.stream_position()?;

        // Backpatch the real header, declaring the unpadded size
        let mut header = Header::new_ustar();
        header.set_path(name)?;
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();

        file.seek(SeekFrom::Start(header_pos))?;
        file.write_all(header.as_bytes())?;
        file.seek(SeekFrom::Start(padded_end))?;

        Ok(())
    }

    /// Close the container and every stack layer underneath it,
    /// surfacing errors. Dropping the writer finalizes too, but
    /// swallows them.
    pub fn close(self) -> Result<(), SessionError> {
        // into_inner writes the end-of-archive marker
        let stack = self.tar.into_inner()?;
        stack.finish()?;
        Ok(())
    }
}
