//! Compression Operations

use crate::Compression;
use crate::error::{ErrorKind, Result};
use bzip2::{Compression as BzCompression, read::MultiBzDecoder, write::BzEncoder};
use exn::ResultExt;
use flate2::{Compression as GzCompression, read::MultiGzDecoder, write::GzEncoder};
use std::io::{self, Read, Write};
use tracing::instrument;

// Use the highest compression level available for the formats; snapshots are
// written once and then sit on disk for weeks.
const BZIP2_LEVEL: BzCompression = BzCompression::best();
const GZIP_LEVEL: GzCompression = GzCompression::best();

impl Compression {
    /// Compress a byte slice in memory.
    ///
    /// # Examples
    ///
    /// ```
    /// use gymvault_compress::Compression;
    ///
    /// let data = b"Hello, world!";
    /// let compressed = Compression::Gzip.compress(data).unwrap();
    /// assert_ne!(compressed, data);
    /// ```
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let (_, output) = self.compress_stream(input, Vec::new())?;
        Ok(output)
    }

    /// Decompress a byte slice in memory.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use gymvault_compress::Compression;
    ///
    /// let original = b"Hello, world!";
    /// let compressed = Compression::Bzip2.compress(original).unwrap();
    /// let decompressed = Compression::Bzip2.decompress(&compressed).unwrap();
    /// assert_eq!(decompressed, original);
    /// ```
    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.decompress_stream(input, &mut output)?;
        Ok(output)
    }

    /// Wrap a reader with the appropriate decompression layer.
    ///
    /// Truncated or malformed input surfaces as an I/O error from the
    /// returned reader, not from this constructor.
    pub fn wrap_reader<'a, R: Read + 'a>(&self, reader: R) -> Box<dyn Read + 'a> {
        match self {
            Compression::None => Box::new(reader),
            Compression::Bzip2 => Box::new(MultiBzDecoder::new(reader)),
            Compression::Gzip => Box::new(MultiGzDecoder::new(reader)),
        }
    }

    /// Compress from a reader into a writer.
    ///
    /// Unlike a boxed encoder that finishes on drop (and swallows any error
    /// while doing so), the encoder is finished explicitly here and the inner
    /// writer is handed back, so the caller knows the compressed stream is
    /// complete before acting on it. Returns the number of uncompressed bytes
    /// read alongside the writer.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::io::Cursor;
    /// use gymvault_compress::Compression;
    ///
    /// let input = Cursor::new(b"Hello, world!");
    /// let (bytes, output) = Compression::Gzip.compress_stream(input, Vec::new()).unwrap();
    /// assert_eq!(bytes, 13);
    /// assert!(!output.is_empty());
    /// ```
    #[instrument(level = "debug", skip_all, fields(format = %self, input_size))]
    pub fn compress_stream<R: Read, W: Write>(&self, mut reader: R, writer: W) -> Result<(u64, W)> {
        let (size, writer) = match self {
            Compression::None => {
                let mut writer = writer;
                let size = io::copy(&mut reader, &mut writer).or_raise(|| ErrorKind::Io)?;
                (size, writer)
            },
            Compression::Bzip2 => {
                let mut encoder = BzEncoder::new(writer, BZIP2_LEVEL);
                let size = io::copy(&mut reader, &mut encoder).or_raise(|| ErrorKind::Io)?;
                (size, encoder.finish().or_raise(|| ErrorKind::Io)?)
            },
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(writer, GZIP_LEVEL);
                let size = io::copy(&mut reader, &mut encoder).or_raise(|| ErrorKind::Io)?;
                (size, encoder.finish().or_raise(|| ErrorKind::Io)?)
            },
        };
        tracing::Span::current().record("input_size", size);
        Ok((size, writer))
    }

    /// Decompress from a reader to a writer, returning bytes written.
    ///
    /// Errors while reading are reported as [`ErrorKind::InvalidData`]
    /// (corrupt or truncated input); errors while writing as
    /// [`ErrorKind::Io`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::io::Cursor;
    /// use gymvault_compress::Compression;
    ///
    /// let original = b"Hello, world!";
    /// let compressed = Compression::Gzip.compress(original).unwrap();
    ///
    /// let mut output = Vec::new();
    /// let bytes = Compression::Gzip.decompress_stream(Cursor::new(compressed), &mut output).unwrap();
    /// assert_eq!(output, original);
    /// assert_eq!(bytes, original.len() as u64);
    /// ```
    #[instrument(level = "debug", skip_all, fields(format = %self, output_size))]
    pub fn decompress_stream<R: Read, W: Write>(&self, reader: R, mut writer: W) -> Result<u64> {
        let mut reader = self.wrap_reader(reader);
        let mut buffer = vec![0; 64 * 1024];
        let mut size = 0u64;
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).or_raise(|| ErrorKind::InvalidData),
            };
            writer.write_all(&buffer[..read]).or_raise(|| ErrorKind::Io)?;
            size += read as u64;
        }
        writer.flush().or_raise(|| ErrorKind::Io)?;
        tracing::Span::current().record("output_size", size);
        Ok(size)
    }
}
