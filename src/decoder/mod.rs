//! MIDAS block and event decoding
//!
//! The wire format is a sequence of fixed-size padded blocks, each framed
//! by an 8-byte ASCII magic and a fixed header, carrying 16-bit tagged
//! words. [`block`] locates and parses block headers, [`words`] normalizes
//! word endianness, and [`event`] runs the control-code state machine that
//! turns the word stream into per-channel hit sequences.

pub mod block;
pub mod event;
pub mod words;

pub use block::{locate_block, BlockHeader, SyncOutcome, BLOCK_MAGIC};
pub use event::{ControlField, DecoderConfig, DecoderState, EventDecoder};
pub use words::WordReader;
