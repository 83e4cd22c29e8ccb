//! MIDAS-RS: decoder for the MIDAS "EBYEDATA" event-block format
//!
//! Unpacks the event-by-event data stream written by MIDAS-style
//! acquisition systems at nuclear physics facilities into per-channel,
//! per-event value sequences, delivered to a generic tabular sink.

pub mod bitops;
pub mod channel_map;
pub mod convert;
pub mod decoder;
pub mod error;
pub mod sink;

pub use channel_map::{ChannelMapConfig, ChannelTable};
pub use convert::{convert, ConvertOptions, ConvertSummary};
pub use decoder::{ControlField, DecoderConfig, DecoderState, EventDecoder};
pub use error::{MidasError, MidasResult};
pub use sink::{EventSink, JsonLinesSink, MemorySink};
