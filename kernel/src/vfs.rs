// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual filesystem dispatch layer
//!
//! `Vfs` is a dispatcher, not a filesystem: a bounded mount table and a
//! bounded open-descriptor table, both resolved by longest-prefix path
//! match and then handed off to one of the two backings this kernel ships
//! ([`crate::romfs`] and [`crate::eepfs`]). Backings are a closed
//! [`Backing`] enum rather than a vtable of function pointers built at
//! image time — adding a third backing means adding a variant here, not
//! wiring up new indirect calls.
//!
//! `open`/`read`/`write`/`close` return `Result<Fd, Error>`, the same
//! typed-value idiom `TaskId`/`Priority` already use elsewhere in this
//! crate, rather than a small integer with negative values encoding a typed
//! error — an fd is a `Fd(u8)` newtype, never a bare integer a caller could
//! confuse with a byte count or an error code. See DESIGN.md.

use abi::{Error, FsTag, Result};

use crate::config;
use crate::eepfs;
use crate::hal::Hal;
use crate::romfs;

/// A small non-negative file descriptor, distinct from a byte count or
/// error code.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Fd(u8);

/// Which concrete filesystem a mount resolves to, tagged by `FsTag`.
/// EEPROM mounts have no directory tree of their own; `open` treats the
/// path remainder after the mount point as a decimal key, since there is
/// no natural mapping from a byte-oriented VFS path onto a key-value log.
/// See DESIGN.md.
pub enum Backing {
    Romfs(&'static romfs::Image),
    Eepfs,
}

impl Backing {
    fn tag(&self) -> FsTag {
        match self {
            Backing::Romfs(_) => FsTag::Romfs,
            Backing::Eepfs => FsTag::Eepfs,
        }
    }
}

struct Mount {
    /// Mount path with any leading `/` already stripped; empty for the
    /// root mount.
    path: &'static [u8],
    backing: Backing,
}

/// Which backing an open descriptor's handle belongs to, and that
/// backing's own handle.
enum BackingHandle {
    Romfs(romfs::Handle),
    /// The EEPROM key this descriptor was opened against.
    EepfsKey(u16),
}

struct OpenFile {
    mount: usize,
    handle: BackingHandle,
    offset: usize,
}

/// The dispatch layer itself. Generic over the HAL so it can drive whichever
/// backing a given fd names without a trait object: `romfs` needs
/// `pgm_read_byte`/`memcpy_from_rom`, `eepfs` needs the EEPROM byte
/// primitives, and both get them through the same `&H` this struct is
/// parameterized on.
pub struct Vfs<const MOUNTS: usize, const FDS: usize> {
    mounts: [Option<Mount>; MOUNTS],
    fds: [Option<OpenFile>; FDS],
}

impl<const MOUNTS: usize, const FDS: usize> Vfs<MOUNTS, FDS> {
    pub fn new() -> Self {
        Vfs {
            mounts: core::array::from_fn(|_| None),
            fds: core::array::from_fn(|_| None),
        }
    }

    /// Resets the mount and descriptor tables. Call once, before any
    /// `mount`/`open`.
    pub fn init(&mut self) {
        self.mounts = core::array::from_fn(|_| None);
        self.fds = core::array::from_fn(|_| None);
    }

    /// Mounts `backing` at `path`. The root mount (`path == b"/"` or
    /// `b""`) is allowed; mount paths must otherwise be non-empty and
    /// unique. Mounts aren't physically kept sorted — dispatch instead
    /// scans the whole table and picks the longest match, which is
    /// observably identical to a descending-length sort and simpler to keep
    /// correct in a fixed-capacity array.
    pub fn mount(&mut self, path: &'static [u8], backing: Backing) -> Result<()> {
        let norm = strip_leading_slash(path);
        if self.mounts.iter().flatten().any(|m| m.path == norm) {
            return Err(Error::InvalidArg);
        }
        let slot = self
            .mounts
            .iter_mut()
            .find(|m| m.is_none())
            .ok_or(Error::NoSpace)?;
        *slot = Some(Mount { path: norm, backing });
        Ok(())
    }

    /// Resolves `path` against the mount table by longest-prefix match.
    /// Returns the winning mount's index and the unmatched
    /// suffix to hand to that backing.
    fn resolve<'p>(&self, path: &'p [u8]) -> Result<(usize, &'p [u8])> {
        let path = strip_leading_slash(path);
        let mut best: Option<(usize, usize)> = None;
        for (idx, mount) in self.mounts.iter().enumerate() {
            let Some(mount) = mount else { continue };
            if !path_has_prefix(path, mount.path) {
                continue;
            }
            let better = match best {
                Some((_, len)) => mount.path.len() > len,
                None => true,
            };
            if better {
                best = Some((idx, mount.path.len()));
            }
        }
        let (idx, prefix_len) = best.ok_or(Error::BadPath)?;
        Ok((idx, strip_leading_slash(&path[prefix_len..])))
    }

    /// Opens `path`, dispatching to whichever mount's longest prefix
    /// matches it.
    pub fn open<H: Hal>(&mut self, hal: &H, path: &[u8]) -> Result<Fd> {
        let (mount_idx, suffix) = self.resolve(path)?;
        let handle = match &self.mounts[mount_idx].as_ref().unwrap().backing {
            Backing::Romfs(image) => BackingHandle::Romfs(image.open(hal, suffix)?),
            Backing::Eepfs => BackingHandle::EepfsKey(parse_decimal_key(suffix)?),
        };

        let slot_idx = self
            .fds
            .iter()
            .position(|f| f.is_none())
            .ok_or(Error::NoSpace)?;
        self.fds[slot_idx] = Some(OpenFile {
            mount: mount_idx,
            handle,
            offset: 0,
        });
        Ok(Fd(slot_idx as u8))
    }

    /// Reads into `buf` at the descriptor's current offset, advancing it by
    /// the number of bytes actually read.
    pub fn read<H: Hal>(&mut self, hal: &H, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let file = self.fds.get_mut(fd.0 as usize).and_then(Option::as_mut).ok_or(Error::NotFound)?;
        let n = match (&self.mounts[file.mount].as_ref().unwrap().backing, &file.handle) {
            (Backing::Romfs(image), BackingHandle::Romfs(h)) => {
                image.read(hal, *h, file.offset, buf)
            }
            (Backing::Eepfs, BackingHandle::EepfsKey(key)) => {
                if file.offset > 0 || buf.is_empty() {
                    0
                } else {
                    match eepfs::get(hal, *key) {
                        Ok(v) => {
                            buf[0] = v;
                            1
                        }
                        Err(Error::NotFound) => 0,
                        Err(e) => return Err(e),
                    }
                }
            }
            _ => unreachable!("fd's handle kind always matches its mount's backing"),
        };
        file.offset += n;
        Ok(n)
    }

    /// Writes `buf` at the descriptor's current offset. ROMFS mounts are
    /// read-only and always fail with `Error::ReadOnly`; an EEPROM mount
    /// treats `buf[0]` as the value to `put` at the descriptor's key.
    pub fn write<H: Hal>(&mut self, hal: &H, fd: Fd, buf: &[u8]) -> Result<usize> {
        let file = self.fds.get_mut(fd.0 as usize).and_then(Option::as_mut).ok_or(Error::NotFound)?;
        match (&self.mounts[file.mount].as_ref().unwrap().backing, &file.handle) {
            (Backing::Romfs(_), _) => Err(Error::ReadOnly),
            (Backing::Eepfs, BackingHandle::EepfsKey(key)) => {
                let Some(&value) = buf.first() else {
                    return Ok(0);
                };
                eepfs::put(hal, *key, value)?;
                file.offset += 1;
                Ok(1)
            }
            _ => unreachable!("fd's handle kind always matches its mount's backing"),
        }
    }

    /// Repositions the descriptor's offset to an absolute byte position.
    pub fn lseek(&mut self, fd: Fd, offset: usize) -> Result<usize> {
        let file = self.fds.get_mut(fd.0 as usize).and_then(Option::as_mut).ok_or(Error::NotFound)?;
        file.offset = offset;
        Ok(offset)
    }

    /// Closes `fd`. Closing an fd that isn't open is an error, not a
    /// silent no-op.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let slot = self.fds.get_mut(fd.0 as usize).ok_or(Error::NotFound)?;
        if slot.take().is_none() {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Lists the directory at `path`. Only meaningful for `Romfs` mounts;
    /// an `Eepfs` mount has no directory structure, per this port's
    /// decision to model it as a flat key space (see `Backing`'s doc
    /// comment), so `list` on one reports `Unsupported`.
    pub fn list<H: Hal>(&self, hal: &H, path: &[u8]) -> Result<&'static [romfs::Entry]> {
        let (mount_idx, suffix) = self.resolve(path)?;
        match &self.mounts[mount_idx].as_ref().unwrap().backing {
            Backing::Romfs(image) => {
                let dir = image.open_dir(hal, suffix)?;
                image.list(dir)
            }
            Backing::Eepfs => Err(Error::Unsupported),
        }
    }

    /// Which backing tag a mount was registered with, for diagnostics.
    pub fn mount_tag(&self, path: &[u8]) -> Result<FsTag> {
        let (idx, _) = self.resolve(path)?;
        Ok(self.mounts[idx].as_ref().unwrap().backing.tag())
    }
}

impl<const MOUNTS: usize, const FDS: usize> Default for Vfs<MOUNTS, FDS> {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_leading_slash(path: &[u8]) -> &[u8] {
    path.strip_prefix(b"/").unwrap_or(path)
}

/// Whether `path` is exactly `prefix` or continues with a `/` separator
/// right after it — so a mount at `etc` matches `etc/motd` but not
/// `etcetera`.
fn path_has_prefix(path: &[u8], prefix: &[u8]) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path.len() >= prefix.len()
        && &path[..prefix.len()] == prefix
        && (path.len() == prefix.len() || path[prefix.len()] == b'/')
}

fn parse_decimal_key(bytes: &[u8]) -> Result<u16> {
    if bytes.is_empty() || bytes.len() > 5 {
        return Err(Error::BadPath);
    }
    let mut key: u32 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return Err(Error::BadPath);
        }
        key = key * 10 + u32::from(b - b'0');
    }
    u16::try_from(key).map_err(|_| Error::BadPath)
}

/// The kernel's one process-wide VFS, mounted by board startup code via
/// [`Vfs::mount`].
pub type KernelVfs = Vfs<{ config::VFS_MAX_MOUNTS }, { config::VFS_MAX_FDS }>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimHal;

    static FILES: [romfs::File; 1] = [romfs::File { data: b"1.0\n" }];
    static CONFIG_ENTRIES: [romfs::Entry; 1] = [romfs::Entry {
        name: b"version.txt",
        kind: romfs::EntryKind::File(0),
    }];
    static DIRS: [romfs::Directory; 1] = [romfs::Directory {
        entries: &CONFIG_ENTRIES,
    }];
    static IMAGE: romfs::Image = romfs::Image::new(&DIRS, &FILES, 0);

    #[test]
    fn open_read_close_round_trips_through_romfs() {
        let hal = SimHal::new();
        let mut vfs = KernelVfs::new();
        vfs.init();
        vfs.mount(b"/etc", Backing::Romfs(&IMAGE)).unwrap();

        let fd = vfs.open(&hal, b"/etc/version.txt").unwrap();
        let mut buf = [0u8; 8];
        let n = vfs.read(&hal, fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"1.0\n");
        vfs.close(fd).unwrap();
    }

    #[test]
    fn close_of_unknown_fd_is_an_error() {
        let mut vfs = KernelVfs::new();
        vfs.init();
        assert_eq!(vfs.close(Fd(0)), Err(Error::NotFound));
    }

    #[test]
    fn double_close_is_an_error() {
        let hal = SimHal::new();
        let mut vfs = KernelVfs::new();
        vfs.init();
        vfs.mount(b"/etc", Backing::Romfs(&IMAGE)).unwrap();
        let fd = vfs.open(&hal, b"/etc/version.txt").unwrap();
        vfs.close(fd).unwrap();
        assert_eq!(vfs.close(fd), Err(Error::NotFound));
    }

    #[test]
    fn write_to_romfs_is_read_only() {
        let hal = SimHal::new();
        let mut vfs = KernelVfs::new();
        vfs.init();
        vfs.mount(b"/etc", Backing::Romfs(&IMAGE)).unwrap();
        let fd = vfs.open(&hal, b"/etc/version.txt").unwrap();
        assert_eq!(vfs.write(&hal, fd, b"x"), Err(Error::ReadOnly));
    }

    #[test]
    fn root_mount_matches_everything_but_loses_to_a_longer_prefix() {
        let hal = SimHal::new();
        let mut vfs = KernelVfs::new();
        vfs.init();
        vfs.mount(b"/", Backing::Eepfs).unwrap();
        vfs.mount(b"/etc", Backing::Romfs(&IMAGE)).unwrap();

        // `/etc/...` resolves through the longer `etc` mount, not root.
        let fd = vfs.open(&hal, b"/etc/version.txt").unwrap();
        assert_eq!(vfs.mount_tag(b"/etc/version.txt"), Ok(FsTag::Romfs));
        vfs.close(fd).unwrap();

        // Anything else falls through to the root mount.
        assert_eq!(vfs.mount_tag(b"/nvram/42"), Ok(FsTag::Eepfs));
    }

    #[test]
    fn eepfs_mount_put_then_get_round_trips_through_vfs() {
        let hal = SimHal::new();
        eepfs::init(&hal);
        let mut vfs = KernelVfs::new();
        vfs.init();
        vfs.mount(b"/nvram", Backing::Eepfs).unwrap();

        let fd = vfs.open(&hal, b"/nvram/42").unwrap();
        assert_eq!(vfs.write(&hal, fd, &[7]).unwrap(), 1);
        vfs.lseek(fd, 0).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(vfs.read(&hal, fd, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], 7);
    }

    #[test]
    fn mount_rejects_duplicate_paths() {
        let mut vfs = KernelVfs::new();
        vfs.init();
        vfs.mount(b"/etc", Backing::Romfs(&IMAGE)).unwrap();
        assert_eq!(
            vfs.mount(b"/etc", Backing::Romfs(&IMAGE)),
            Err(Error::InvalidArg)
        );
    }

    #[test]
    fn open_with_no_matching_mount_is_bad_path() {
        let hal = SimHal::new();
        let mut vfs = KernelVfs::new();
        vfs.init();
        assert_eq!(vfs.open(&hal, b"/nope").unwrap_err(), Error::BadPath);
    }

    #[test]
    fn fd_table_exhaustion_reports_no_space() {
        let hal = SimHal::new();
        let mut vfs: Vfs<4, 1> = Vfs::new();
        vfs.init();
        vfs.mount(b"/etc", Backing::Romfs(&IMAGE)).unwrap();
        let _fd = vfs.open(&hal, b"/etc/version.txt").unwrap();
        assert_eq!(
            vfs.open(&hal, b"/etc/version.txt").unwrap_err(),
            Error::NoSpace
        );
    }

    #[test]
    fn list_romfs_directory() {
        let hal = SimHal::new();
        let mut vfs = KernelVfs::new();
        vfs.init();
        vfs.mount(b"/etc", Backing::Romfs(&IMAGE)).unwrap();
        let entries = vfs.list(&hal, b"/etc").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, b"version.txt");
    }

    #[test]
    fn list_on_eepfs_mount_is_unsupported() {
        let hal = SimHal::new();
        let mut vfs = KernelVfs::new();
        vfs.init();
        vfs.mount(b"/nvram", Backing::Eepfs).unwrap();
        assert_eq!(vfs.list(&hal, b"/nvram").unwrap_err(), Error::Unsupported);
    }
}
