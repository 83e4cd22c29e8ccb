//! Event decoding state machine
//!
//! Each 16-bit tag word carries a 2-bit control code selecting one of four
//! grammar modes:
//!
//! - frame marker (3): begin-of-event or end-of-block, validated against
//!   fixed check fields in bits 8-13 and 0-7
//! - single data word (0): one (address, value) hit
//! - group data item (1) and extended group data item (2): counted runs of
//!   words that carry no decode effect; they are consumed and discarded to
//!   keep the stream position correct
//!
//! Events are framed purely in-band: a begin-of-event marker flushes the
//! previously accumulated event, and an end-of-block marker closes the
//! block without flushing. The event open at end-of-block therefore stays
//! pending; by default it is dropped with a diagnostic when the run ends,
//! matching output produced by the historic converter, and
//! [`DecoderConfig::flush_last_event`] emits it instead.

use std::io::Read;

use tracing::{debug, info, warn};

use crate::bitops::{bit_mask, bit_reverse16};
use crate::channel_map::ChannelTable;
use crate::decoder::block::{locate_block, BlockHeader, SyncOutcome};
use crate::decoder::words::WordReader;
use crate::error::{MidasError, MidasResult};
use crate::sink::EventSink;

/// Grammar constants
mod fields {
    /// Frame marker control code
    pub const CTRL_FRAME: u16 = 3;
    /// Single data word control code
    pub const CTRL_DATA: u16 = 0;
    /// Group data item control code
    pub const CTRL_GROUP: u16 = 1;
    /// Extended group data item control code
    pub const CTRL_EXT_GROUP: u16 = 2;

    /// Expected value of frame-marker bits 8-13
    pub const FRAME_CHECK1: u16 = 0x3f;
    /// Expected value of frame-marker bits 0-7
    pub const FRAME_CHECK2: u16 = 0xff;

    /// Address stride between consecutive groups
    pub const GROUP_STRIDE: i32 = 32;
}

/// Which bits of a tag word hold the 2-bit control code.
///
/// The historic decoder computed the code as `word & 0b11` (an operator
/// precedence slip: the intended `bit_mask(14, 15) >> 14` combination
/// reduced to a low-bits mask), while the field layout of the surrounding
/// grammar places the code in bits 14-15. Both readings are supported;
/// pick [`ControlField::LowBits`] for compatibility with files already
/// processed by the historic tool (exact except for the group-item skip
/// distance, which reads the shifted count field here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ControlField {
    /// Control code in bits 0-1, as the historic decoder extracted it
    LowBits,
    /// Control code in bits 14-15, consistent with the grammar's field layout
    HighBits,
}

impl ControlField {
    /// Extract the 2-bit control code from a tag word
    #[inline]
    pub fn extract(self, word: u16) -> u16 {
        match self {
            ControlField::LowBits => word & 0b11,
            ControlField::HighBits => (word >> 14) & 0b11,
        }
    }
}

/// Decoder configuration
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    /// Where the control code lives in a tag word
    pub control_field: ControlField,
    /// Anomalies tolerated per block before the stream is declared
    /// desynchronized and the run aborted
    pub max_anomalies_per_block: u32,
    /// Flush the event still pending when the stream ends, instead of
    /// dropping it with a diagnostic
    pub flush_last_event: bool,
    /// Emit a progress line every this many events; 0 disables progress
    /// logging
    pub progress_interval: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            control_field: ControlField::LowBits,
            max_anomalies_per_block: 1024,
            flush_last_event: false,
            progress_interval: 5000,
        }
    }
}

/// Progress counters, carried through the decode call chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderState {
    /// Blocks located and decoded so far
    pub blocks_read: u64,
    /// Begin-of-event markers seen so far
    pub events_emitted: u64,
    /// Payload bytes consumed in the current block
    pub bytes_read_in_current_block: u64,
}

/// The control-code state machine.
///
/// Owns the per-event accumulator (one growable hit sequence per mapped
/// channel, parallel to the channel table) for the lifetime of a run.
pub struct EventDecoder<'a, S: EventSink> {
    config: DecoderConfig,
    table: &'a ChannelTable,
    sink: &'a mut S,
    state: DecoderState,
    /// Per-channel hit sequences for the event being assembled
    accumulator: Vec<Vec<u16>>,
    /// True once any hit landed since the last flush
    hits_pending: bool,
}

impl<'a, S: EventSink> EventDecoder<'a, S> {
    /// Create a decoder over a channel table and a sink
    pub fn new(table: &'a ChannelTable, sink: &'a mut S, config: DecoderConfig) -> Self {
        Self {
            config,
            table,
            sink,
            state: DecoderState::default(),
            accumulator: vec![Vec::new(); table.len()],
            hits_pending: false,
        }
    }

    /// Progress counters
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Decode blocks until the stream ends.
    ///
    /// A truncated block is abandoned with a diagnostic and the scan
    /// resumes at the next block marker. Desync and I/O errors abort the
    /// run. On end-of-stream the pending event is flushed or dropped per
    /// [`DecoderConfig::flush_last_event`]; a drop is always logged.
    pub fn decode_stream<R: Read>(&mut self, reader: &mut R) -> MidasResult<()> {
        loop {
            let outcome = match locate_block(reader, self.state.blocks_read) {
                Ok(outcome) => outcome,
                Err(e) if e.is_block_recoverable() => {
                    warn!(error = %e, "Abandoning block, resynchronizing");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match outcome {
                SyncOutcome::EndOfStream => break,
                SyncOutcome::Header(header) => {
                    self.state.blocks_read += 1;
                    self.state.bytes_read_in_current_block = 0;
                    debug!(
                        block = self.state.blocks_read,
                        sequence = header.sequence,
                        stream = header.stream,
                        data_len = header.data_len,
                        swapped = header.data_swapped(),
                        "Located block"
                    );
                    match self.decode_block(reader, &header) {
                        Ok(()) => {}
                        Err(e) if e.is_block_recoverable() => {
                            warn!(error = %e, "Abandoning block, resynchronizing");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        if self.hits_pending {
            if self.config.flush_last_event {
                self.flush_event()?;
            } else {
                warn!(
                    event = self.state.events_emitted,
                    "Final event left pending at end of stream, dropping \
                     (enable flush_last_event to emit it)"
                );
            }
        }

        info!(
            blocks = self.state.blocks_read,
            events = self.state.events_emitted,
            "Processed all blocks"
        );
        Ok(())
    }

    /// Decode one block's payload after a successful header read.
    ///
    /// Returns when the end-of-block marker is reached. The only other
    /// exits are stream truncation and an exceeded anomaly budget.
    fn decode_block<R: Read>(&mut self, reader: &mut R, header: &BlockHeader) -> MidasResult<()> {
        let block = self.state.blocks_read;
        let mut words = WordReader::new(reader, header, block);
        let mut anomalies = 0u32;

        let result = loop {
            let whole = match words.read_word() {
                Ok(w) => w,
                Err(e) => break Err(e),
            };
            let ctrl = self.config.control_field.extract(whole);

            match ctrl {
                fields::CTRL_FRAME => {
                    let check1 = (whole & bit_mask(8, 13)) >> 8;
                    let check2 = whole & bit_mask(0, 7);
                    if check1 != fields::FRAME_CHECK1 || check2 != fields::FRAME_CHECK2 {
                        warn!(
                            block,
                            word = format!("0x{whole:04x}"),
                            check1,
                            check2,
                            "Frame marker check mismatch"
                        );
                        anomalies += 1;
                        if anomalies > self.config.max_anomalies_per_block {
                            break Err(MidasError::Desync { block, anomalies });
                        }
                        continue;
                    }
                    let value = match words.read_word() {
                        Ok(w) => w,
                        Err(e) => break Err(e),
                    };
                    if value == 0 {
                        // end of block; the event opened since the last
                        // begin-of-event stays pending
                        break Ok(());
                    }
                    // begin of event (closes the previous one)
                    if self.hits_pending {
                        if let Err(e) = self.flush_event() {
                            break Err(e);
                        }
                    }
                    self.clear_event();
                    self.state.events_emitted += 1;
                    if self.config.progress_interval > 0
                        && self.state.events_emitted % self.config.progress_interval == 0
                    {
                        info!(
                            blocks = self.state.blocks_read,
                            events = self.state.events_emitted,
                            "Decoding progress"
                        );
                    }
                }

                fields::CTRL_DATA => {
                    let value = match words.read_word() {
                        Ok(w) => w,
                        Err(e) => break Err(e),
                    };
                    let addr_word = bit_reverse16(whole);
                    let group = (addr_word & bit_mask(0, 7)) as i32;
                    let item = ((addr_word & bit_mask(8, 13)) >> 8) as i32;
                    let address = fields::GROUP_STRIDE * (group - 1) + item;
                    match self.table.lookup(address) {
                        Some(idx) => {
                            self.accumulator[idx].push(bit_reverse16(value));
                            self.hits_pending = true;
                        }
                        None => {
                            warn!(block, address, "Hit on unmapped address, dropping sample");
                        }
                    }
                }

                fields::CTRL_GROUP => {
                    // counted run with no decode effect; consume to keep
                    // the stream position correct
                    let count = (whole & bit_mask(8, 13)) >> 8;
                    let group = whole & bit_mask(0, 7);
                    debug!(block, group, count, "Skipping group data item");
                    if let Err(e) = self.discard_words(&mut words, count) {
                        break Err(e);
                    }
                }

                fields::CTRL_EXT_GROUP => {
                    let mut count = whole & bit_mask(0, 13);
                    let group = match words.read_word() {
                        Ok(w) => w,
                        Err(e) => break Err(e),
                    };
                    if count == 0 {
                        let (min, max) = match (words.read_word(), words.read_word()) {
                            (Ok(min), Ok(max)) => (min, max),
                            (Err(e), _) | (_, Err(e)) => break Err(e),
                        };
                        count = max.wrapping_sub(min);
                    }
                    debug!(block, group, count, "Skipping extended group data item");
                    if let Err(e) = self.discard_words(&mut words, count) {
                        break Err(e);
                    }
                }

                other => {
                    // unreachable for a 2-bit field, kept as a defensive
                    // anomaly report
                    warn!(block, ctrl = other, "Unexpected control code");
                    anomalies += 1;
                    if anomalies > self.config.max_anomalies_per_block {
                        break Err(MidasError::Desync { block, anomalies });
                    }
                }
            }
        };

        self.state.bytes_read_in_current_block = words.bytes_read();
        result
    }

    fn discard_words<R: Read>(&self, words: &mut WordReader<R>, count: u16) -> MidasResult<()> {
        for _ in 0..count {
            words.read_word()?;
        }
        Ok(())
    }

    /// Push the accumulated event to the sink. Every registered channel
    /// appears in the row, unhit channels with an empty sequence.
    fn flush_event(&mut self) -> MidasResult<()> {
        let row: Vec<(&str, &[u16])> = self
            .table
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.accumulator.iter().map(Vec::as_slice))
            .collect();
        self.sink.append_event(&row)?;
        self.clear_event();
        Ok(())
    }

    fn clear_event(&mut self) {
        for hits in &mut self.accumulator {
            hits.clear();
        }
        self.hits_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::ChannelMapConfig;
    use crate::sink::MemorySink;
    use std::io::Cursor;

    /// A frame marker word valid under both control-field readings
    const FRAME: u16 = 0xffff;

    fn test_table() -> ChannelTable {
        let mut table = ChannelTable::new(ChannelMapConfig::default());
        table.insert("si_de", 1, 0); // address 992
        table.insert("si_e", 1, 1); // address 993
        table
    }

    /// Tag word for a ctrl=0 hit on `address`
    fn data_tag(address: i32) -> u16 {
        let group = address / fields::GROUP_STRIDE + 1;
        let item = address % fields::GROUP_STRIDE;
        assert!(item < 0x40);
        let addr_word = (group as u16) | ((item as u16) << 8);
        let tag = bit_reverse16(addr_word);
        assert_eq!(ControlField::LowBits.extract(tag), 0);
        tag
    }

    /// Value word that decodes to `value`
    fn data_value(value: u16) -> u16 {
        bit_reverse16(value)
    }

    fn block_bytes(words: &[u16]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(crate::decoder::BLOCK_MAGIC);
        buf.extend_from_slice(&1u32.to_le_bytes()); // sequence
        buf.extend_from_slice(&1u16.to_le_bytes()); // stream
        buf.extend_from_slice(&1u16.to_le_bytes()); // tape
        buf.extend_from_slice(&1u16.to_le_bytes()); // native_endian
        buf.extend_from_slice(&0u16.to_le_bytes()); // data_endian: native
        buf.extend_from_slice(&((words.len() * 2) as u32).to_le_bytes());
        for w in words {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        buf
    }

    fn decode(words: &[u16], config: DecoderConfig) -> (MemorySink, DecoderState) {
        let table = test_table();
        let mut sink = MemorySink::new();
        for name in table.names() {
            sink.register_channel(name).unwrap();
        }
        let mut decoder = EventDecoder::new(&table, &mut sink, config);
        decoder
            .decode_stream(&mut Cursor::new(block_bytes(words)))
            .unwrap();
        let state = decoder.state();
        (sink, state)
    }

    #[test]
    fn test_control_field_extraction() {
        assert_eq!(ControlField::LowBits.extract(0x8003), 3);
        assert_eq!(ControlField::HighBits.extract(0x8003), 2);
        assert_eq!(ControlField::LowBits.extract(0xc000), 0);
        assert_eq!(ControlField::HighBits.extract(0xc000), 3);
        assert_eq!(ControlField::LowBits.extract(FRAME), 3);
        assert_eq!(ControlField::HighBits.extract(FRAME), 3);
    }

    #[test]
    fn test_event_open_at_end_of_block_is_not_flushed() {
        // begin event, one hit on address 992 with value 100, end block
        let words = [
            FRAME,
            5, // begin of event
            data_tag(992),
            data_value(100),
            FRAME,
            0, // end of block
        ];
        let (sink, state) = decode(&words, DecoderConfig::default());
        assert_eq!(sink.events().len(), 0, "pending event must not be flushed");
        assert_eq!(state.blocks_read, 1);
        assert_eq!(state.events_emitted, 1);
    }

    #[test]
    fn test_trailing_begin_of_event_flushes_pending() {
        let words = [
            FRAME,
            5,
            data_tag(992),
            data_value(100),
            FRAME,
            7, // begin of next event flushes the previous one
            FRAME,
            0,
        ];
        let (sink, _) = decode(&words, DecoderConfig::default());
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0]["si_de"], vec![100]);
        assert!(sink.events()[0]["si_e"].is_empty());
    }

    #[test]
    fn test_flush_last_event_emits_pending() {
        let words = [FRAME, 5, data_tag(992), data_value(100), FRAME, 0];
        let config = DecoderConfig {
            flush_last_event: true,
            ..Default::default()
        };
        let (sink, _) = decode(&words, config);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0]["si_de"], vec![100]);
    }

    #[test]
    fn test_multiple_hits_per_channel_append() {
        let words = [
            FRAME,
            5,
            data_tag(993),
            data_value(10),
            data_tag(993),
            data_value(11),
            FRAME,
            6,
            FRAME,
            0,
        ];
        let (sink, _) = decode(&words, DecoderConfig::default());
        assert_eq!(sink.events()[0]["si_e"], vec![10, 11]);
    }

    #[test]
    fn test_unmapped_address_dropped_mapped_hits_kept() {
        let words = [
            FRAME,
            5,
            data_tag(1500), // unmapped
            data_value(42),
            data_tag(992), // mapped, must survive
            data_value(7),
            FRAME,
            6,
            FRAME,
            0,
        ];
        let (sink, _) = decode(&words, DecoderConfig::default());
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0]["si_de"], vec![7]);
        assert!(sink.events()[0]["si_e"].is_empty());
    }

    #[test]
    fn test_empty_event_not_flushed_by_next_begin() {
        // two consecutive begin markers with no hits in between
        let words = [FRAME, 5, FRAME, 6, data_tag(992), data_value(1), FRAME, 7, FRAME, 0];
        let (sink, state) = decode(&words, DecoderConfig::default());
        assert_eq!(sink.events().len(), 1);
        assert_eq!(state.events_emitted, 3);
    }

    #[test]
    fn test_group_item_words_discarded() {
        // count=2 in bits 8-13; group byte 0x05 puts ctrl=1 in the low bits
        let tag = (2u16 << 8) | 0x05;
        assert_eq!(ControlField::LowBits.extract(tag), 1);
        let words = [
            FRAME,
            5,
            tag,
            0xdead, // discarded
            0xbeef, // discarded
            data_tag(992),
            data_value(3),
            FRAME,
            6,
            FRAME,
            0,
        ];
        let (sink, _) = decode(&words, DecoderConfig::default());
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0]["si_de"], vec![3]);
    }

    #[test]
    fn test_extended_group_item_words_discarded() {
        // ctrl=2 (low bits 10): count field bits 0-13; 0x0002 -> count=2
        let tag = 0x0002u16;
        assert_eq!(ControlField::LowBits.extract(tag), 2);
        let words = [
            FRAME,
            5,
            tag,
            0x0001, // group word
            0xaaaa, // discarded (count includes these two)
            0xbbbb, // discarded
            data_tag(992),
            data_value(9),
            FRAME,
            6,
            FRAME,
            0,
        ];
        let (sink, _) = decode(&words, DecoderConfig::default());
        assert_eq!(sink.events()[0]["si_de"], vec![9]);
    }

    #[test]
    fn test_extended_group_min_max_count() {
        // Under the low-bits reading the ctrl bits are part of the count
        // field (bits 0-13), so count=0 is only encodable with the control
        // code in bits 14-15.
        let tag = 2u16 << 14;
        let config = DecoderConfig {
            control_field: ControlField::HighBits,
            ..Default::default()
        };
        assert_eq!(config.control_field.extract(tag), 2);
        let words = [
            FRAME,
            5,
            tag,
            0x0001, // group word
            0x0010, // min
            0x0012, // max -> count = 2
            0x1111, // discarded
            0x2222, // discarded
            data_tag(992),
            data_value(4),
            FRAME,
            6,
            FRAME,
            0,
        ];
        let (sink, _) = decode(&words, config);
        assert_eq!(sink.events()[0]["si_de"], vec![4]);
    }

    #[test]
    fn test_zero_progress_interval_disables_progress_logging() {
        let words = [FRAME, 5, data_tag(992), data_value(1), FRAME, 6, FRAME, 0];
        let config = DecoderConfig {
            progress_interval: 0,
            ..Default::default()
        };
        let (sink, state) = decode(&words, config);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(state.events_emitted, 2);
    }

    #[test]
    fn test_frame_check_mismatch_is_recoverable_anomaly() {
        // low bits 11 but wrong check fields; a few of them must not kill
        // the block
        let bad_frame = 0x0003u16;
        let words = [
            bad_frame, bad_frame, FRAME, 5, data_tag(992), data_value(8), FRAME, 6, FRAME, 0,
        ];
        let (sink, _) = decode(&words, DecoderConfig::default());
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0]["si_de"], vec![8]);
    }

    #[test]
    fn test_anomaly_budget_exceeded_is_desync() {
        let config = DecoderConfig {
            max_anomalies_per_block: 4,
            ..Default::default()
        };
        let words = vec![0x0003u16; 16]; // endless bad frame markers
        let table = test_table();
        let mut sink = MemorySink::new();
        let mut decoder = EventDecoder::new(&table, &mut sink, config);
        let err = decoder
            .decode_stream(&mut Cursor::new(block_bytes(&words)))
            .unwrap_err();
        match err {
            MidasError::Desync { anomalies, .. } => assert_eq!(anomalies, 5),
            other => panic!("expected Desync, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_final_block_is_not_fatal() {
        // a complete block followed by one cut off mid-event: the truncated
        // block is abandoned with a diagnostic, the run ends cleanly
        let mut data = block_bytes(&[
            FRAME,
            5,
            data_tag(993),
            data_value(21),
            FRAME,
            6,
            FRAME,
            0,
        ]);
        let mut cut = block_bytes(&[FRAME, 5, data_tag(992), data_value(100), FRAME, 0]);
        cut.truncate(cut.len() - 5); // rip out the end-of-block marker
        data.extend_from_slice(&cut);

        let table = test_table();
        let mut sink = MemorySink::new();
        for name in table.names() {
            sink.register_channel(name).unwrap();
        }
        let mut decoder = EventDecoder::new(&table, &mut sink, DecoderConfig::default());
        decoder.decode_stream(&mut Cursor::new(data)).unwrap();
        assert_eq!(decoder.state().blocks_read, 2);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0]["si_e"], vec![21]);
    }

    #[test]
    fn test_stream_ending_mid_header_is_not_fatal() {
        let mut data = block_bytes(&[FRAME, 5, FRAME, 0]);
        data.extend_from_slice(crate::decoder::BLOCK_MAGIC);
        data.extend_from_slice(&[0u8; 10]); // header cut short

        let table = test_table();
        let mut sink = MemorySink::new();
        let mut decoder = EventDecoder::new(&table, &mut sink, DecoderConfig::default());
        decoder.decode_stream(&mut Cursor::new(data)).unwrap();
        assert_eq!(decoder.state().blocks_read, 1);
    }

    #[test]
    fn test_swapped_data_words() {
        // same block, data_endian set: every payload word is stored
        // bit-reversed-then-byte-swapped on the wire
        let logical = [FRAME, 5, data_tag(992), data_value(100), FRAME, 6, FRAME, 0];
        let mut buf = Vec::new();
        buf.extend_from_slice(crate::decoder::BLOCK_MAGIC);
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // data_endian set
        buf.extend_from_slice(&((logical.len() * 2) as u32).to_le_bytes());
        for w in &logical {
            // inverse of read_word's transform: bit-reverse then byte-swap
            let wire = crate::bitops::byte_swap16(bit_reverse16(*w));
            buf.extend_from_slice(&wire.to_le_bytes());
        }

        let table = test_table();
        let mut sink = MemorySink::new();
        for name in table.names() {
            sink.register_channel(name).unwrap();
        }
        let mut decoder = EventDecoder::new(&table, &mut sink, DecoderConfig::default());
        decoder.decode_stream(&mut Cursor::new(buf)).unwrap();
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0]["si_de"], vec![100]);
    }
}
