//! # Source Loading
//!
//! This module normalizes any supported input — file path, in-memory bytes,
//! or byte stream — into a contiguous read-only buffer the parser can index
//! into for the lifetime of the result.
//!
//! ## Design
//!
//! File paths are memory-mapped read-only when the caller allows it (the
//! default), falling back to nothing: a failed map is an error, not a silent
//! slow path. All other inputs are read fully into an owned buffer. The
//! buffer variant is hidden behind [`SourceBuffer`], which derefs to `[u8]`.
//!
//! After loading, two adjustments produce the effective data window:
//!
//! - a leading UTF-8 byte-order mark advances the start offset
//! - a non-zero footer-skip scans backward from the end, respecting quoting,
//!   to exclude the last k rows
//!
//! ## Platform Behavior
//!
//! On Unix the mapped region is advised `MADV_SEQUENTIAL`, since the parse
//! phase touches pages front to back. The advice is a hint; failure is
//! ignored.

use std::fs::File as FsFile;
use std::io::Read;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memchr::memrchr;
use memmap2::Mmap;

use crate::config::{MAX_BUFFER_LEN, UTF8_BOM};
use crate::options::ReaderOptions;

/// A parse input.
pub enum Source {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Reader(Box<dyn Read + Send>),
    /// A sub-process whose stdout is the input.
    Command(std::process::Command),
}

impl Source {
    pub fn path<P: AsRef<Path>>(path: P) -> Source {
        Source::Path(path.as_ref().to_path_buf())
    }

    pub fn bytes<B: Into<Vec<u8>>>(bytes: B) -> Source {
        Source::Bytes(bytes.into())
    }

    pub fn reader<R: Read + Send + 'static>(reader: R) -> Source {
        Source::Reader(Box::new(reader))
    }

    pub fn command(command: std::process::Command) -> Source {
        Source::Command(command)
    }

    /// A display name for diagnostics and `File::name()`.
    pub(crate) fn display_name(&self) -> String {
        match self {
            Source::Path(p) => p.display().to_string(),
            Source::Bytes(_) => "<bytes>".to_string(),
            Source::Reader(_) => "<reader>".to_string(),
            Source::Command(c) => format!("<{}>", c.get_program().to_string_lossy()),
        }
    }

    /// The path extension, used for delimiter presets (`.tsv`, `.wsv`).
    pub(crate) fn extension(&self) -> Option<String> {
        match self {
            Source::Path(p) => p.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()),
            _ => None,
        }
    }
}

impl From<&Path> for Source {
    fn from(p: &Path) -> Source {
        Source::path(p)
    }
}

impl From<PathBuf> for Source {
    fn from(p: PathBuf) -> Source {
        Source::Path(p)
    }
}

impl From<Vec<u8>> for Source {
    fn from(b: Vec<u8>) -> Source {
        Source::Bytes(b)
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Source {
        Source::Bytes(s.as_bytes().to_vec())
    }
}

/// The retained input buffer: either a read-only map or owned bytes.
#[derive(Debug)]
pub(crate) enum SourceBuffer {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for SourceBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            SourceBuffer::Mapped(m) => m,
            SourceBuffer::Owned(v) => v,
        }
    }
}

/// A loaded input: the retained buffer plus the effective data window.
#[derive(Debug)]
pub(crate) struct LoadedSource {
    pub buffer: SourceBuffer,
    /// First byte of data (past any BOM).
    pub start: usize,
    /// One past the last data byte (before any skipped footer).
    pub end: usize,
    pub name: String,
    pub extension: Option<String>,
}

/// Loads a source into memory and applies BOM and footer adjustments.
pub(crate) fn load(source: Source, opts: &ReaderOptions) -> Result<LoadedSource> {
    let name = source.display_name();
    let extension = source.extension();

    let buffer = match source {
        Source::Path(path) => {
            let file = FsFile::open(&path)
                .wrap_err_with(|| format!("invalid source: failed to open '{}'", path.display()))?;
            if opts.use_mmap {
                // SAFETY: Mmap::map is unsafe because the underlying file can
                // be modified externally while mapped, which would let the
                // buffer change under us. This is accepted here because:
                // 1. The map is read-only; this process never writes it
                // 2. The parse result borrows positions into the map, so the
                //    map lives exactly as long as the returned file
                // 3. Concurrent external modification of an input being
                //    parsed is outside the reader's contract
                let map = unsafe {
                    Mmap::map(&file).wrap_err_with(|| {
                        format!("invalid source: failed to memory-map '{}'", path.display())
                    })?
                };
                advise_sequential(&map);
                SourceBuffer::Mapped(map)
            } else {
                let mut buf = Vec::new();
                let mut file = file;
                file.read_to_end(&mut buf)
                    .wrap_err_with(|| format!("invalid source: failed to read '{}'", path.display()))?;
                SourceBuffer::Owned(buf)
            }
        }
        Source::Bytes(bytes) => SourceBuffer::Owned(bytes),
        Source::Reader(mut reader) => {
            let mut buf = Vec::new();
            reader
                .read_to_end(&mut buf)
                .wrap_err("invalid source: failed to read byte stream")?;
            SourceBuffer::Owned(buf)
        }
        Source::Command(mut command) => {
            let output = command
                .output()
                .wrap_err_with(|| {
                    format!(
                        "invalid source: failed to run '{}'",
                        command.get_program().to_string_lossy()
                    )
                })?;
            ensure!(
                output.status.success(),
                "invalid source: '{}' exited with {}",
                command.get_program().to_string_lossy(),
                output.status
            );
            SourceBuffer::Owned(output.stdout)
        }
    };

    ensure!(
        buffer.len() as u64 <= MAX_BUFFER_LEN,
        "invalid source: input of {} bytes exceeds the {} byte addressing limit",
        buffer.len(),
        MAX_BUFFER_LEN
    );

    let start = if buffer.starts_with(&UTF8_BOM) { UTF8_BOM.len() } else { 0 };

    let mut end = buffer.len();
    if opts.footer_skip > 0 {
        end = skip_footer(&buffer[start..end], opts) + start;
    }

    Ok(LoadedSource { buffer, start, end, name, extension })
}

#[cfg(unix)]
fn advise_sequential(map: &Mmap) {
    if map.is_empty() {
        return;
    }
    // SAFETY: madvise is a kernel hint and cannot cause undefined behavior
    // for a valid region. The pointer and length describe exactly the live
    // mapping owned by `map`.
    unsafe {
        libc::madvise(map.as_ptr() as *mut libc::c_void, map.len(), libc::MADV_SEQUENTIAL);
    }
}

#[cfg(not(unix))]
fn advise_sequential(_map: &Mmap) {}

/// Returns the buffer length that excludes the last `opts.footer_skip` rows.
///
/// Scans backward over newlines. A newline is only a row boundary when the
/// quote count between it and the end of the buffer is even; an odd count
/// means the newline sits inside an open quoted region and is part of a
/// field. A trailing newline at EOF terminates the last row rather than
/// opening an empty footer row.
fn skip_footer(buf: &[u8], opts: &ReaderOptions) -> usize {
    let mut end = buf.len();
    if end == 0 {
        return 0;
    }

    // Quote parity from `pos` to the original end, maintained incrementally.
    let mut quotes_after = 0usize;
    let mut scan_end = end;
    if buf[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && buf[end - 1] == b'\r' {
            end -= 1;
        }
        scan_end = end;
    }

    let mut remaining = opts.footer_skip;
    while remaining > 0 {
        match memrchr(b'\n', &buf[..scan_end]) {
            Some(pos) => {
                quotes_after += count_quotes(&buf[pos..scan_end], opts);
                scan_end = pos;
                if quotes_after % 2 == 0 {
                    end = if pos > 0 && buf[pos - 1] == b'\r' { pos - 1 } else { pos };
                    remaining -= 1;
                }
            }
            None => return 0,
        }
    }

    // Keep the terminator of the new last row.
    if end < buf.len() {
        end = if buf[end..].starts_with(b"\r\n") { end + 2 } else { end + 1 };
    }
    end
}

fn count_quotes(slice: &[u8], opts: &ReaderOptions) -> usize {
    slice.iter().filter(|&&b| b == opts.open_quote || b == opts.close_quote).count()
        / if opts.open_quote == opts.close_quote { 1 } else { 2 }
}
