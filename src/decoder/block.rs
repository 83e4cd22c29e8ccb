//! Block synchronization and header parsing
//!
//! The stream is a sequence of fixed-size blocks, each opened by a 24-byte
//! header: the ASCII magic `EBYEDATA` followed by 16 bytes of fields. Blocks are padded to a
//! fixed on-disk size and an event never spans two blocks, so everything
//! between the end-of-block marker and the next magic is padding to be
//! discarded. The scan reads 4 bytes at a time; block starts are 4-byte
//! aligned.
//!
//! Header fields use the fixed wire widths below on every platform. The
//! acquisition hardware writes them little-endian.

use std::io::Read;

use crate::error::{MidasError, MidasResult};

/// Block start marker
pub const BLOCK_MAGIC: &[u8; 8] = b"EBYEDATA";

/// Size of the header fields following the magic, in bytes.
///
/// The full on-disk header is 24 bytes: the 8-byte magic plus these 16
/// bytes of fields.
pub const HEADER_SIZE: usize = 16;

/// MIDAS data block header fields (follow the 8-byte magic)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block sequence number within the file
    pub sequence: u32,
    /// Acquisition stream number (1..=4)
    pub stream: u16,
    /// Tape flag, written as 1 by the tape server
    pub tape: u16,
    /// Native-endian marker of the writing host
    pub native_endian: u16,
    /// Endianness of the data words following the header
    pub data_endian: u16,
    /// Declared length of useful data in bytes.
    ///
    /// Advisory only: event framing is determined by in-band markers, never
    /// by this field.
    pub data_len: u32,
}

impl BlockHeader {
    /// Parse the 16 field bytes following the magic
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            sequence: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            stream: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            tape: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            native_endian: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            data_endian: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
            data_len: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }

    /// True if the data words need the byte-swap + bit-reverse transform
    pub fn data_swapped(&self) -> bool {
        self.data_endian != 0
    }
}

/// Outcome of a block scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A block marker was found and its header parsed
    Header(BlockHeader),
    /// The stream ended before a marker was found - normal termination
    EndOfStream,
}

/// Scan for the next block marker and read its header.
///
/// Consumes padding bytes until `EBYEDATA` is found. Returns
/// [`SyncOutcome::EndOfStream`] if the stream runs out during the scan;
/// a stream that ends after the magic but inside the header fails with
/// [`MidasError::StreamTruncated`], which abandons this block only.
///
/// `block` is the ordinal of the block being located, used for diagnostics.
pub fn locate_block<R: Read>(reader: &mut R, block: u64) -> MidasResult<SyncOutcome> {
    let mut quad = [0u8; 4];
    loop {
        if !read_quad(reader, &mut quad)? {
            return Ok(SyncOutcome::EndOfStream);
        }
        if &quad != b"EBYE" {
            continue;
        }
        if !read_quad(reader, &mut quad)? {
            return Ok(SyncOutcome::EndOfStream);
        }
        if &quad == b"DATA" {
            break;
        }
    }

    let mut buf = [0u8; HEADER_SIZE];
    reader
        .read_exact(&mut buf)
        .map_err(|e| map_truncation(e, block, "block header"))?;
    Ok(SyncOutcome::Header(BlockHeader::from_bytes(&buf)))
}

/// Read exactly 4 bytes; `Ok(false)` on clean end of stream.
fn read_quad<R: Read>(reader: &mut R, buf: &mut [u8; 4]) -> MidasResult<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn map_truncation(e: std::io::Error, block: u64, context: &'static str) -> MidasError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        MidasError::StreamTruncated { block, context }
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header_bytes(sequence: u32, data_endian: u16, data_len: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // stream
        buf.extend_from_slice(&1u16.to_le_bytes()); // tape
        buf.extend_from_slice(&1u16.to_le_bytes()); // native_endian
        buf.extend_from_slice(&data_endian.to_le_bytes());
        buf.extend_from_slice(&data_len.to_le_bytes());
        buf
    }

    #[test]
    fn test_locate_block_at_start() {
        let mut data = Vec::new();
        data.extend_from_slice(BLOCK_MAGIC);
        data.extend_from_slice(&header_bytes(7, 1, 1024));

        let outcome = locate_block(&mut Cursor::new(data), 0).unwrap();
        match outcome {
            SyncOutcome::Header(h) => {
                assert_eq!(h.sequence, 7);
                assert_eq!(h.stream, 1);
                assert!(h.data_swapped());
                assert_eq!(h.data_len, 1024);
            }
            SyncOutcome::EndOfStream => panic!("expected a header"),
        }
    }

    #[test]
    fn test_locate_block_skips_padding() {
        let mut data = vec![0u8; 64]; // inter-block padding
        data.extend_from_slice(BLOCK_MAGIC);
        data.extend_from_slice(&header_bytes(2, 0, 0));

        let outcome = locate_block(&mut Cursor::new(data), 0).unwrap();
        match outcome {
            SyncOutcome::Header(h) => {
                assert_eq!(h.sequence, 2);
                assert!(!h.data_swapped());
            }
            SyncOutcome::EndOfStream => panic!("expected a header"),
        }
    }

    #[test]
    fn test_partial_magic_is_not_a_block() {
        // "EBYE" followed by something other than "DATA"
        let mut data = Vec::new();
        data.extend_from_slice(b"EBYEJUNK");
        let outcome = locate_block(&mut Cursor::new(data), 0).unwrap();
        assert_eq!(outcome, SyncOutcome::EndOfStream);
    }

    #[test]
    fn test_empty_stream_is_end_of_stream() {
        let outcome = locate_block(&mut Cursor::new(Vec::new()), 0).unwrap();
        assert_eq!(outcome, SyncOutcome::EndOfStream);
    }

    #[test]
    fn test_truncated_header_is_stream_truncated() {
        let mut data = Vec::new();
        data.extend_from_slice(BLOCK_MAGIC);
        data.extend_from_slice(&[0u8; 10]); // fewer than 16 field bytes

        let err = locate_block(&mut Cursor::new(data), 4).unwrap_err();
        match err {
            MidasError::StreamTruncated { block, .. } => assert_eq!(block, 4),
            other => panic!("expected StreamTruncated, got {other:?}"),
        }
    }

    #[test]
    fn test_header_fixed_widths() {
        // 24 bytes regardless of platform word sizes
        let buf = [0u8; HEADER_SIZE];
        let h = BlockHeader::from_bytes(&buf);
        assert_eq!(h.sequence, 0);
        assert_eq!(h.data_len, 0);
    }
}
