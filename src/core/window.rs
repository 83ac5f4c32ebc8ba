// Sliding read-only mmap window over a file that another process may still be appending to.
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::options::{TailPolicy, WindowOptions};

/// Windowed mapped reader.
///
/// Holds one mapping of `window_size` bytes starting at `base_offset`. The
/// consumer reads from [`WindowView::remaining`] and reports progress with
/// [`WindowedReader::advance`]. Once more than `elasticity` bytes have been
/// consumed from the current window, the next call to
/// [`WindowedReader::current_view`] drops the mapping and maps a new window
/// starting exactly at the first unconsumed byte.
///
/// All operations take `&mut self`; wrap the reader in a single owner if more
/// than one thread needs it.
#[derive(Debug)]
pub struct WindowedReader {
    path: PathBuf,
    options: WindowOptions,
    state: State,
    base_offset: u64,
    cursor: usize,
    remaps: u64,
}

#[derive(Debug)]
enum State {
    Open(Mapping),
    Closed,
    Failed,
}

#[derive(Debug)]
struct Mapping {
    file: File,
    map: Option<Mmap>,
    mapped_len: usize,
    file_len: u64,
}

/// Borrowed view of the current window.
///
/// Borrows the reader, so window bytes cannot outlive the next remap.
#[derive(Clone, Copy, Debug)]
pub struct WindowView<'a> {
    bytes: &'a [u8],
    base_offset: u64,
    cursor: usize,
    window_len: usize,
}

impl<'a> WindowView<'a> {
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Logical window length; always the configured `window_size`.
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Bytes of the window currently backed by file data.
    pub fn readable_len(&self) -> usize {
        self.bytes.len()
    }

    /// Readable prefix of the window, including bytes already consumed.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Readable bytes from the cursor on. Empty when the writer has not caught up.
    pub fn remaining(&self) -> &'a [u8] {
        self.bytes.get(self.cursor..).unwrap_or(&[])
    }

    pub fn file_offset(&self) -> u64 {
        self.base_offset + self.cursor as u64
    }
}

impl WindowedReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with(path, WindowOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: WindowOptions) -> Result<Self, Error> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|err| Error::unavailable(&path, err))?;
        let file_len = current_len(&file, &path)?;
        let mapped_len = window_len_for(&options, 0, file_len);
        let map = map_window(&file, &path, 0, mapped_len)?;

        debug!(
            path = %path.display(),
            window_size = options.window_size,
            elasticity = options.elasticity,
            file_len,
            mapped_len,
            "opened window"
        );

        Ok(Self {
            path,
            options,
            state: State::Open(Mapping {
                file,
                map,
                mapped_len,
                file_len,
            }),
            base_offset: 0,
            cursor: 0,
            remaps: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> WindowOptions {
        self.options
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remap_count(&self) -> u64 {
        self.remaps
    }

    /// True once `close` has run. A reader left unusable by a failed remap is not closed
    /// until `close` is called, but it rejects every operation just the same.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Runs the remap check, then returns the window and cursor.
    ///
    /// A failed remap leaves the reader unusable; every later call fails with
    /// `SourceUnavailable`.
    pub fn current_view(&mut self) -> Result<WindowView<'_>, Error> {
        self.refresh()?;
        let mapping = match &self.state {
            State::Open(mapping) => mapping,
            State::Closed => return Err(closed_error(&self.path)),
            State::Failed => return Err(failed_error(&self.path)),
        };

        let available = mapping.file_len.saturating_sub(self.base_offset);
        let readable = usize::try_from(available)
            .unwrap_or(usize::MAX)
            .min(mapping.mapped_len);
        let bytes: &[u8] = match &mapping.map {
            Some(map) => &map[..readable],
            None => &[],
        };

        Ok(WindowView {
            bytes,
            base_offset: self.base_offset,
            cursor: self.cursor,
            window_len: self.options.window_size,
        })
    }

    /// Moves the cursor forward by `by` consumed bytes.
    pub fn advance(&mut self, by: usize) -> Result<(), Error> {
        match self.state {
            State::Open(_) => {}
            State::Closed => return Err(closed_error(&self.path)),
            State::Failed => return Err(failed_error(&self.path)),
        }
        let room = self.options.window_size - self.cursor;
        if by > room {
            return Err(Error::new(ErrorKind::InvalidAdvance)
                .with_message(format!(
                    "advance by {by} exceeds the {room} bytes left in the window"
                ))
                .with_path(&self.path)
                .with_offset(self.base_offset + self.cursor as u64));
        }
        self.cursor += by;
        Ok(())
    }

    /// Views the window, lets `consume` report how many bytes it used, and advances by that much.
    pub fn consume_with<F>(&mut self, consume: F) -> Result<usize, Error>
    where
        F: FnOnce(&WindowView<'_>) -> usize,
    {
        let consumed = {
            let view = self.current_view()?;
            consume(&view)
        };
        self.advance(consumed)?;
        Ok(consumed)
    }

    /// Drops the mapping and the file handle. Calling it again does nothing.
    pub fn close(&mut self) {
        if let State::Open(_) = std::mem::replace(&mut self.state, State::Closed) {
            debug!(
                path = %self.path.display(),
                base_offset = self.base_offset,
                remaps = self.remaps,
                "closed window"
            );
        }
    }

    fn refresh(&mut self) -> Result<(), Error> {
        let mapping = match &mut self.state {
            State::Open(mapping) => mapping,
            State::Closed => return Err(closed_error(&self.path)),
            State::Failed => return Err(failed_error(&self.path)),
        };
        let file_len = current_len(&mapping.file, &self.path)?;
        let read_position = self.base_offset + self.cursor as u64;
        if file_len < read_position {
            let err = Error::new(ErrorKind::SourceUnavailable)
                .with_message(format!(
                    "file truncated below read position (length {file_len})"
                ))
                .with_path(&self.path)
                .with_offset(read_position);
            return Err(self.fail(err, "file truncated"));
        }
        mapping.file_len = file_len;

        let consumed = self.cursor;
        if consumed > self.options.elasticity {
            let next_base = self.base_offset + consumed as u64;
            let mapped_len = window_len_for(&self.options, next_base, file_len);
            // Unmap before mapping again so only one window is ever held.
            mapping.map = None;
            match map_window(&mapping.file, &self.path, next_base, mapped_len) {
                Ok(map) => {
                    mapping.map = map;
                    mapping.mapped_len = mapped_len;
                }
                Err(err) => return Err(self.fail(err, "remap failed")),
            }
            self.base_offset = next_base;
            self.cursor = 0;
            self.remaps += 1;
            debug!(
                base_offset = next_base,
                consumed,
                remaps = self.remaps,
                "remapped window"
            );
            return Ok(());
        }

        if self.options.tail_policy == TailPolicy::MapAvailable
            && mapping.mapped_len < self.options.window_size
        {
            let grown = window_len_for(&self.options, self.base_offset, file_len);
            if grown > mapping.mapped_len {
                mapping.map = None;
                match map_window(&mapping.file, &self.path, self.base_offset, grown) {
                    Ok(map) => {
                        mapping.map = map;
                        mapping.mapped_len = grown;
                    }
                    Err(err) => return Err(self.fail(err, "tail extension failed")),
                }
                debug!(
                    base_offset = self.base_offset,
                    mapped_len = grown,
                    "extended window tail"
                );
            }
        }
        Ok(())
    }

    // Drops the file and mapping; every later call reports `failed_error`.
    fn fail(&mut self, err: Error, what: &'static str) -> Error {
        warn!(
            path = %self.path.display(),
            base_offset = self.base_offset,
            cursor = self.cursor,
            error = %err,
            "{what}"
        );
        self.state = State::Failed;
        err
    }
}

impl Read for WindowedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let copied = self.consume_with(|view| {
            let src = view.remaining();
            let len = src.len().min(buf.len());
            buf[..len].copy_from_slice(&src[..len]);
            len
        })?;
        Ok(copied)
    }
}

impl fmt::Display for WindowedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WindowedReader{{file={}}}", self.path.display())
    }
}

fn window_len_for(options: &WindowOptions, base_offset: u64, file_len: u64) -> usize {
    match options.tail_policy {
        TailPolicy::MapFull => options.window_size,
        TailPolicy::MapAvailable => {
            let available = file_len.saturating_sub(base_offset);
            usize::try_from(available)
                .unwrap_or(usize::MAX)
                .min(options.window_size)
        }
    }
}

fn map_window(file: &File, path: &Path, offset: u64, len: usize) -> Result<Option<Mmap>, Error> {
    if len == 0 {
        return Ok(None);
    }
    // SAFETY: the mapping is read-only and only the prefix backed by file data
    // (checked against the file length on every view) is handed out. Truncation
    // by another process while a view is held is not guarded against.
    let map = unsafe {
        MmapOptions::new()
            .offset(offset)
            .len(len)
            .map(file)
            .map_err(|err| Error::unavailable(path, err).with_offset(offset))?
    };
    Ok(Some(map))
}

fn current_len(file: &File, path: &Path) -> Result<u64, Error> {
    file.metadata()
        .map(|meta| meta.len())
        .map_err(|err| Error::unavailable(path, err))
}

fn closed_error(path: &Path) -> Error {
    Error::new(ErrorKind::SourceUnavailable)
        .with_message("reader is closed")
        .with_path(path)
}

fn failed_error(path: &Path) -> Error {
    Error::new(ErrorKind::SourceUnavailable)
        .with_message("reader is unusable after a failed remap")
        .with_hint("Open a new reader.")
        .with_path(path)
}
