// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TinyLog-4: a wear-leveled key-value log over EEPROM
//!
//! Layout: `EEPROM_ROWS` rows of `EEPROM_ROW_SIZE`
//! bytes; each row holds `EEPROM_BLOCKS_PER_ROW` four-byte data blocks
//! followed by a two-byte trailer `(sequence, EEPROM_TAG_ROW)`. A data block
//! is `(tag, d0, d1, crc8)`: `tag` is `EEPROM_TAG_PUT` or `EEPROM_TAG_DEL`,
//! `(d0, d1)` pack an 11-bit key in the top bits and a 5-bit value in the
//! low bits, and `crc8` is the Dallas/Maxim CRC-8 (shared with the Door
//! RPC's trailer, `abi::crc8_maxim`) over `(tag, d0, d1)`.
//!
//! The "current row" and its write cursor are not stored anywhere; `init`
//! reconstructs both by scanning row trailers on mount, following the same
//! greatest-valid-sequence algorithm every call site below implements.

use abi::{crc8_maxim, Error, Result};

use crate::config;
use crate::hal::Hal;

/// One packed data block: `(tag, d0, d1, crc8)`.
type RawBlock = [u8; config::EEPROM_BLOCK_SIZE];

fn pack(tag: u8, key: u16, value: u8) -> RawBlock {
    let d0 = (key >> 3) as u8;
    let d1 = ((key & 0x7) as u8) << 5 | (value & 0x1F);
    let crc = crc8_maxim(&[tag, d0, d1]);
    [tag, d0, d1, crc]
}

fn unpack_key_value(block: RawBlock) -> (u16, u8) {
    let key = (u16::from(block[1]) << 3) | u16::from(block[2] >> 5);
    let value = block[2] & 0x1F;
    (key, value)
}

fn block_crc_ok(block: RawBlock) -> bool {
    crc8_maxim(&block[..3]) == block[3]
}

/// A single row's on-disk trailer: `(sequence, tag)`.
#[derive(Copy, Clone, Debug)]
struct Trailer {
    sequence: u8,
    tag: u8,
}

impl Trailer {
    fn is_valid(self) -> bool {
        self.tag == config::EEPROM_TAG_ROW
    }
}

/// Wear-leveled key-value log. Generic over the byte offset
/// where its region begins within the HAL's EEPROM address space, so a
/// board could in principle place more than one log; this kernel mounts
/// exactly one, at offset 0, as the static [`EEPFS`] singleton.
pub struct Log {
    base: u32,
    /// Index, in `0..EEPROM_ROWS`, of the row currently being written.
    current_row: core::cell::Cell<usize>,
    /// Index, in `0..=EEPROM_BLOCKS_PER_ROW`, of the next free block slot in
    /// `current_row`.
    cursor: core::cell::Cell<usize>,
}

impl Log {
    pub const fn new(base: u32) -> Self {
        Log {
            base,
            current_row: core::cell::Cell::new(0),
            cursor: core::cell::Cell::new(0),
        }
    }

    fn row_offset(&self, row: usize) -> u32 {
        self.base + (row * config::EEPROM_ROW_SIZE) as u32
    }

    fn block_offset(&self, row: usize, block: usize) -> u32 {
        self.row_offset(row) + (block * config::EEPROM_BLOCK_SIZE) as u32
    }

    fn trailer_offset(&self, row: usize) -> u32 {
        self.row_offset(row) + (config::EEPROM_ROW_SIZE - 2) as u32
    }

    fn read_block<H: Hal>(&self, hal: &H, row: usize, block: usize) -> RawBlock {
        let off = self.block_offset(row, block);
        core::array::from_fn(|i| hal.eeprom_read_byte(off + i as u32))
    }

    fn write_block<H: Hal>(&self, hal: &H, row: usize, block: usize, raw: RawBlock) {
        let off = self.block_offset(row, block);
        for (i, b) in raw.iter().enumerate() {
            hal.eeprom_update_byte(off + i as u32, *b);
        }
    }

    fn read_trailer<H: Hal>(&self, hal: &H, row: usize) -> Trailer {
        let off = self.trailer_offset(row);
        Trailer {
            sequence: hal.eeprom_read_byte(off),
            tag: hal.eeprom_read_byte(off + 1),
        }
    }

    fn write_trailer<H: Hal>(&self, hal: &H, row: usize, sequence: u8) {
        let off = self.trailer_offset(row);
        hal.eeprom_update_byte(off, sequence);
        hal.eeprom_update_byte(off + 1, config::EEPROM_TAG_ROW);
    }

    fn erase_row<H: Hal>(&self, hal: &H, row: usize) {
        let base = self.row_offset(row);
        for i in 0..config::EEPROM_ROW_SIZE as u32 {
            hal.eeprom_update_byte(base + i, 0xFF);
        }
    }

    /// Reconstructs mount state by scanning row trailers: the current row
    /// is the valid trailer with the greatest sequence number in signed
    /// circular order (max modulo-256); its cursor is the first block whose
    /// CRC doesn't check out. If no row has a valid trailer at all (a
    /// freshly-erased device), row 0 becomes current at sequence 0.
    pub fn init<H: Hal>(&self, hal: &H) {
        if !hal.eeprom_available() {
            return;
        }
        let mut best: Option<(usize, u8)> = None;
        for row in 0..config::EEPROM_ROWS {
            let t = self.read_trailer(hal, row);
            if !t.is_valid() {
                continue;
            }
            best = Some(match best {
                None => (row, t.sequence),
                Some((best_row, best_seq)) => {
                    if circular_gt(t.sequence, best_seq) {
                        (row, t.sequence)
                    } else {
                        (best_row, best_seq)
                    }
                }
            });
        }

        let (row, _) = match best {
            Some(found) => found,
            None => {
                self.write_trailer(hal, 0, 0);
                (0, 0u8)
            }
        };

        let mut cursor = 0;
        while cursor < config::EEPROM_BLOCKS_PER_ROW {
            let block = self.read_block(hal, row, cursor);
            if !block_crc_ok(block) {
                break;
            }
            cursor += 1;
        }

        self.current_row.set(row);
        self.cursor.set(cursor);
    }

    /// Rolls over to the next row: erases it, writes a trailer whose
    /// sequence is one past the outgoing row's, and resets the cursor.
    /// Spreads wear across all rows rather than reusing one until it fails.
    fn roll_row<H: Hal>(&self, hal: &H) {
        let prev_row = self.current_row.get();
        let prev_seq = self.read_trailer(hal, prev_row).sequence;
        let next_row = (prev_row + 1) % config::EEPROM_ROWS;

        self.erase_row(hal, next_row);
        self.write_trailer(hal, next_row, prev_seq.wrapping_add(1));

        self.current_row.set(next_row);
        self.cursor.set(0);
    }

    fn append<H: Hal>(&self, hal: &H, raw: RawBlock) -> Result<()> {
        if self.cursor.get() >= config::EEPROM_BLOCKS_PER_ROW {
            self.roll_row(hal);
        }
        let row = self.current_row.get();
        let slot = self.cursor.get();
        self.write_block(hal, row, slot, raw);

        // Verify the write by reading the block back and checking its CRC.
        // A mismatch leaves the cursor unadvanced: the cursor stays
        // consistent either way.
        let readback = self.read_block(hal, row, slot);
        if readback != raw {
            return Err(Error::IoError);
        }

        self.cursor.set(slot + 1);
        Ok(())
    }

    /// Stores `value` for `key`. `key` must be `< EEPROM_MAX_KEY` and
    /// `value` must be `< EEPROM_MAX_VALUE`.
    pub fn put<H: Hal>(&self, hal: &H, key: u16, value: u8) -> Result<()> {
        if key >= config::EEPROM_MAX_KEY || value >= config::EEPROM_MAX_VALUE {
            return Err(Error::InvalidArg);
        }
        self.append(hal, pack(config::EEPROM_TAG_PUT, key, value))
    }

    /// Appends a tombstone for `key`; a subsequent `get` reports `NotFound`.
    pub fn del<H: Hal>(&self, hal: &H, key: u16) -> Result<()> {
        if key >= config::EEPROM_MAX_KEY {
            return Err(Error::InvalidArg);
        }
        self.append(hal, pack(config::EEPROM_TAG_DEL, key, 0))
    }

    /// Looks up the most recently written value for `key`, walking backward
    /// from the cursor across all rows in reverse sequence order. Stops at
    /// the first invalid CRC, or after one full revolution of the log.
    pub fn get<H: Hal>(&self, hal: &H, key: u16) -> Result<u8> {
        let rows = self.rows_newest_first(hal);
        for row in rows {
            let limit = if row == self.current_row.get() {
                self.cursor.get()
            } else {
                config::EEPROM_BLOCKS_PER_ROW
            };
            for slot in (0..limit).rev() {
                let block = self.read_block(hal, row, slot);
                if !block_crc_ok(block) {
                    return Err(Error::NotFound);
                }
                let (k, v) = unpack_key_value(block);
                if k != key {
                    continue;
                }
                return match block[0] {
                    t if t == config::EEPROM_TAG_PUT => Ok(v),
                    _ => Err(Error::NotFound),
                };
            }
        }
        Err(Error::NotFound)
    }

    /// Rows in most-recently-rolled-first order, starting at `current_row`
    /// and walking backward through the ring, for a backward-in-time scan.
    fn rows_newest_first<H: Hal>(&self, hal: &H) -> [usize; config::EEPROM_ROWS] {
        let _ = hal;
        let start = self.current_row.get();
        core::array::from_fn(|i| (start + config::EEPROM_ROWS - i) % config::EEPROM_ROWS)
    }

    /// Compacts stale rows. Ships as a deliberate placeholder: ordinary row
    /// rollover during `put`/`del` already reclaims the prior row's space
    /// once it fills, so there is nothing across *live* rows left to
    /// compact without first observing real wear data that justifies
    /// moving keys between rows. See DESIGN.md.
    pub fn gc<H: Hal>(&self, _hal: &H) {}
}

/// The process-wide TinyLog-4 instance this kernel mounts. The `eepfs`
/// free-function surface below delegates to it, and `vfs::mount` wires a
/// `FsTag::Eepfs` entry to this singleton the same way `mem::HEAP` is the
/// kernel's one heap arena.
pub static EEPFS: Log = Log::new(0);

/// Mounts [`EEPFS`] by scanning the backing EEPROM for its current row.
pub fn init<H: Hal>(hal: &H) {
    EEPFS.init(hal);
}

pub fn put<H: Hal>(hal: &H, key: u16, value: u8) -> Result<()> {
    EEPFS.put(hal, key, value)
}

pub fn del<H: Hal>(hal: &H, key: u16) -> Result<()> {
    EEPFS.del(hal, key)
}

pub fn get<H: Hal>(hal: &H, key: u16) -> Result<u8> {
    EEPFS.get(hal, key)
}

pub fn gc<H: Hal>(hal: &H) {
    EEPFS.gc(hal)
}

/// `true` if `a` is "after" `b` in modulo-256 circular order, i.e. the
/// signed difference `a - b` (wrapped into `i8`) is positive. A sequence
/// counter that has wrapped around is still "newer" than one that hasn't,
/// as long as it hasn't wrapped all the way back past it.
fn circular_gt(a: u8, b: u8) -> bool {
    (a.wrapping_sub(b) as i8) > 0
}
