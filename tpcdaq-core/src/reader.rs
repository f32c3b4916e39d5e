//! Word-level access to DAQ byte streams.
//!
//! [`WordReader`] pulls native-endian words from any buffered source and
//! tracks how many bytes have been consumed. Files can be opened through a
//! transparent gzip filter.

use crate::error::{DecodeError, Result};
use byteorder::{NativeEndian, ReadBytesExt};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use tracing::{debug, error};

/// Leading bytes of a gzip member.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compression applied to an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    /// Selects gzip for file names ending in `.gz`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some("gz") => Self::Gzip,
            _ => Self::None,
        }
    }

    /// Selects gzip if the file starts with the gzip magic bytes.
    pub fn sniff<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut magic = [0u8; 2];
        let mut file = File::open(path)?;
        let n = file.read(&mut magic)?;
        if n == GZIP_MAGIC.len() && magic == GZIP_MAGIC {
            Ok(Self::Gzip)
        } else {
            Ok(Self::None)
        }
    }
}

/// Reads fixed size words from a byte source.
///
/// Words are decoded in the byte order of the machine running the decoder;
/// no byte swapping is attempted. Reads only move forward.
pub struct WordReader<R: BufRead> {
    inner: R,
    offset: u64,
}

impl WordReader<Box<dyn BufRead>> {
    /// Opens a file, optionally through a gzip filter.
    pub fn open<P: AsRef<Path>>(path: P, compression: Compression) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        debug!(path = %path.display(), ?compression, "opening input");
        let inner: Box<dyn BufRead> = match compression {
            Compression::None => Box::new(BufReader::new(file)),
            Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        };
        Ok(Self::new(inner))
    }
}

impl<R: BufRead> WordReader<R> {
    /// Wraps a buffered source.
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Number of bytes consumed so far.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns true when no further bytes are available.
    ///
    /// A failing source is reported as truncation at the current offset
    /// rather than as a clean end of stream.
    pub fn at_end(&mut self) -> Result<bool> {
        let empty = self.inner.fill_buf().map(|buf| buf.is_empty());
        empty.map_err(|err| self.truncated(err, 1))
    }

    /// Reads one 16-bit word.
    pub fn read_word(&mut self) -> Result<u16> {
        let word = self.inner.read_u16::<NativeEndian>();
        self.advance(word, 2)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = self.inner.read_u8();
        self.advance(byte, 1)
    }

    /// Reads one 32-bit word.
    pub fn read_u32(&mut self) -> Result<u32> {
        let word = self.inner.read_u32::<NativeEndian>();
        self.advance(word, 4)
    }

    /// Copies the next `len` bytes out of the stream.
    ///
    /// The buffer grows with the data actually read, so a corrupt length
    /// cannot force a large allocation up front.
    pub fn read_span(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut span = Vec::new();
        let result = (&mut self.inner).take(len as u64).read_to_end(&mut span);
        let read = result.map_err(|err| self.truncated(err, len))?;
        self.offset += read as u64;
        if read < len {
            return Err(DecodeError::TruncatedStream {
                offset: self.offset,
                needed: len - read,
            });
        }
        Ok(span)
    }

    /// Consumes the reader, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn advance<T>(&mut self, value: io::Result<T>, width: usize) -> Result<T> {
        match value {
            Ok(value) => {
                self.offset += width as u64;
                Ok(value)
            }
            Err(err) => Err(self.truncated(err, width)),
        }
    }

    fn truncated(&self, err: io::Error, needed: usize) -> DecodeError {
        if err.kind() != io::ErrorKind::UnexpectedEof {
            error!(offset = self.offset, %err, "source read error");
        }
        DecodeError::TruncatedStream {
            offset: self.offset,
            needed,
        }
    }
}
