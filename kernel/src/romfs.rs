// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read-only filesystem over an immutable byte image
//!
//! A tree is a closed sum of directories and files rather than a
//! function-pointer table: an [`Entry`] names either [`EntryKind::Dir`] or
//! [`EntryKind::File`] plus an index into the image's directory or file
//! table, so there is never an indirect call through memory the image
//! doesn't own. Everything here is `'static` data, built at compile time by
//! a board (or, for tests, inline in a test module) and never mutated.
//!
//! Path resolution never allocates: it walks `path` segment by segment
//! against `&'static` byte slices, comparing through [`Hal::pgm_read_byte`]
//! so a real port can route the read through whatever instruction its MCU
//! needs to fetch a byte of program memory.

use abi::{Error, Result};

use crate::hal::Hal;

/// What an [`Entry`] names: a directory or a file, each identified by its
/// index into the owning [`Image`]'s directory or file table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    Dir(usize),
    File(usize),
}

/// One named entry in a [`Directory`].
#[derive(Copy, Clone, Debug)]
pub struct Entry {
    pub name: &'static [u8],
    pub kind: EntryKind,
}

/// A directory: a flat list of entries, compared linearly at each level
/// against the current path segment.
#[derive(Copy, Clone, Debug)]
pub struct Directory {
    pub entries: &'static [Entry],
}

/// A file: a byte slice into the ROM image's file table.
#[derive(Copy, Clone, Debug)]
pub struct File {
    pub data: &'static [u8],
}

/// An immutable directory tree over program memory.
///
/// Built once (typically as a `'static` const), shared by every `open`
/// call; there is no per-open state beyond the returned [`Handle`].
pub struct Image {
    dirs: &'static [Directory],
    files: &'static [File],
    root: usize,
}

impl Image {
    pub const fn new(dirs: &'static [Directory], files: &'static [File], root: usize) -> Self {
        Image { dirs, files, root }
    }

    /// Resolves `path` to an open file handle, walking segment by segment
    /// from the root. `path` may have a leading `/`; empty segments
    /// (`//`, trailing `/`) are skipped. Fails with `NotFound` if any
    /// segment is missing, or if the path names a directory rather than a
    /// file.
    pub fn open<H: Hal>(&self, hal: &H, path: &[u8]) -> Result<Handle> {
        let mut segments = path
            .split(|&b| b == b'/')
            .filter(|s| !s.is_empty())
            .peekable();
        let mut dir = self.root;
        loop {
            let Some(name) = segments.next() else {
                // Path resolved to a directory (including the empty path,
                // the root itself): ROMFS only hands out file handles.
                return Err(Error::NotFound);
            };
            let entry = self
                .dirs
                .get(dir)
                .and_then(|d| d.entries.iter().find(|e| rom_name_eq(hal, e.name, name)))
                .copied()
                .ok_or(Error::NotFound)?;
            match entry.kind {
                EntryKind::Dir(idx) => dir = idx,
                EntryKind::File(idx) => {
                    if segments.peek().is_some() {
                        // Trailing segments past a file: e.g. `/a/file/b`.
                        return Err(Error::NotFound);
                    }
                    return Ok(Handle { file: idx });
                }
            }
        }
    }

    /// Resolves `path` to a directory index, for [`crate::vfs`]'s `list`.
    /// The empty path resolves to the root directory.
    pub fn open_dir<H: Hal>(&self, hal: &H, path: &[u8]) -> Result<usize> {
        let mut dir = self.root;
        for name in path.split(|&b| b == b'/').filter(|s| !s.is_empty()) {
            let entry = self
                .dirs
                .get(dir)
                .and_then(|d| d.entries.iter().find(|e| rom_name_eq(hal, e.name, name)))
                .copied()
                .ok_or(Error::NotFound)?;
            match entry.kind {
                EntryKind::Dir(idx) => dir = idx,
                EntryKind::File(_) => return Err(Error::NotFound),
            }
        }
        Ok(dir)
    }

    /// Entries of the directory at `dir_idx` (as returned by
    /// [`Self::open_dir`]), for directory listing.
    pub fn list(&self, dir_idx: usize) -> Result<&'static [Entry]> {
        self.dirs.get(dir_idx).map(|d| d.entries).ok_or(Error::NotFound)
    }

    /// Reads up to `buf.len()` bytes starting at `offset` into `buf`,
    /// copying from ROM via the HAL. Returns the number of bytes copied:
    /// `min(buf.len(), size - offset)`, `0` at or past end-of-file. Never
    /// writes.
    pub fn read<H: Hal>(&self, hal: &H, handle: Handle, offset: usize, buf: &mut [u8]) -> usize {
        let Some(file) = self.files.get(handle.file) else {
            return 0;
        };
        if offset >= file.data.len() {
            return 0;
        }
        let available = file.data.len() - offset;
        let n = available.min(buf.len());
        hal.memcpy_from_rom(&mut buf[..n], &file.data[offset] as *const u8);
        n
    }

    /// Size, in bytes, of the file named by `handle`.
    pub fn size(&self, handle: Handle) -> usize {
        self.files.get(handle.file).map_or(0, |f| f.data.len())
    }
}

/// An open ROMFS file. Carries no offset of its own; the backing is
/// stateless beyond identifying which file table entry this is —
/// [`crate::vfs`]'s descriptor table owns the current read offset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Handle {
    file: usize,
}

/// Compares a ROM-resident name against a RAM-resident path segment, one
/// byte at a time through [`Hal::pgm_read_byte`]. On `hal::sim` this is an
/// ordinary dereference (see that module's doc comment); a real port's
/// `pgm_read_byte` issues whatever instruction its MCU needs to fetch a
/// byte of program memory.
fn rom_name_eq<H: Hal>(hal: &H, rom_name: &'static [u8], segment: &[u8]) -> bool {
    if rom_name.len() != segment.len() {
        return false;
    }
    rom_name
        .iter()
        .zip(segment.iter())
        .all(|(r, &s)| hal.pgm_read_byte(r as *const u8) == s)
}
