//! Endianness-normalized word reads
//!
//! Data words are 16-bit, read little-endian. When the block header's
//! `data_endian` flag is set the words were written by opposite-endian
//! hardware and each one gets a byte swap followed by a full bit reversal,
//! in that order, before the grammar sees it.

use std::io::Read;

use crate::bitops::{bit_reverse16, byte_swap16};
use crate::decoder::block::{map_truncation, BlockHeader};
use crate::error::MidasResult;

/// Reads 16-bit and 8-bit words from one block's payload
pub struct WordReader<'a, R: Read> {
    reader: &'a mut R,
    swap: bool,
    block: u64,
    bytes_read: u64,
}

impl<'a, R: Read> WordReader<'a, R> {
    /// Create a reader for one block's payload
    pub fn new(reader: &'a mut R, header: &BlockHeader, block: u64) -> Self {
        Self {
            reader,
            swap: header.data_swapped(),
            block,
            bytes_read: 0,
        }
    }

    /// Read one 16-bit word, applying the endianness transform if the
    /// block header declared swapped data.
    ///
    /// Fails with `StreamTruncated` on short read; the current block is
    /// abandoned and the caller may resynchronize on the next one.
    pub fn read_word(&mut self) -> MidasResult<u16> {
        let mut buf = [0u8; 2];
        self.reader
            .read_exact(&mut buf)
            .map_err(|e| map_truncation(e, self.block, "data word"))?;
        self.bytes_read += 2;
        let word = u16::from_le_bytes(buf);
        if self.swap {
            Ok(bit_reverse16(byte_swap16(word)))
        } else {
            Ok(word)
        }
    }

    /// Read a single byte, zero-extended.
    ///
    /// Part of the wire-format surface but unused by the event grammar;
    /// the legacy decoder carried it and never called it either.
    pub fn read_mini_word(&mut self) -> MidasResult<u16> {
        let mut buf = [0u8; 1];
        self.reader
            .read_exact(&mut buf)
            .map_err(|e| map_truncation(e, self.block, "mini word"))?;
        self.bytes_read += 1;
        Ok(buf[0] as u16)
    }

    /// Payload bytes consumed so far in this block
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
