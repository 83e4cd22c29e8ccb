//! Run-level conversion entry point
//!
//! Wires the pieces together for one run: open the input stream, load the
//! channel map, register channels with the sink, drive the block loop to
//! end-of-stream, close the sink. The sink is closed on the fatal-error
//! path too, so buffered output reaches disk and write errors surface;
//! a close failure after a decode error is logged and the decode error
//! is the one propagated.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{info, warn};

use crate::channel_map::{ChannelMapConfig, ChannelTable};
use crate::decoder::{ControlField, DecoderConfig, EventDecoder};
use crate::error::MidasResult;
use crate::sink::{EventSink, JsonLinesSink};

/// Options for a conversion run
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions {
    /// Channels per ADC module
    pub adc_base: i32,
    /// Address of (ADC 1, channel 0)
    pub adc_offset: i32,
    /// Where the control code lives in a tag word
    pub control_field: ControlField,
    /// Per-block decode anomaly budget
    pub max_anomalies_per_block: u32,
    /// Emit the event still pending at end of stream instead of dropping it
    pub flush_last_event: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        let decoder = DecoderConfig::default();
        let map = ChannelMapConfig::default();
        Self {
            adc_base: map.adc_base,
            adc_offset: map.adc_offset,
            control_field: decoder.control_field,
            max_anomalies_per_block: decoder.max_anomalies_per_block,
            flush_last_event: decoder.flush_last_event,
        }
    }
}

impl ConvertOptions {
    fn channel_map_config(&self) -> ChannelMapConfig {
        ChannelMapConfig {
            adc_base: self.adc_base,
            adc_offset: self.adc_offset,
        }
    }

    fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            control_field: self.control_field,
            max_anomalies_per_block: self.max_anomalies_per_block,
            flush_last_event: self.flush_last_event,
            ..DecoderConfig::default()
        }
    }
}

/// Outcome of a conversion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertSummary {
    /// Blocks located and decoded
    pub blocks_read: u64,
    /// Events seen (begin-of-event markers)
    pub events_emitted: u64,
    /// Channels registered from the map
    pub channels: usize,
}

/// Convert a MIDAS file into a JSON-lines table.
///
/// Fails with a fatal error if the input, output, or channel-map file
/// cannot be opened; in-stream decode problems are handled per the
/// decoder's recovery rules.
pub fn convert<P: AsRef<Path>>(
    input: P,
    output: P,
    channel_map: P,
    options: &ConvertOptions,
) -> MidasResult<ConvertSummary> {
    let table = ChannelTable::from_path(options.channel_map_config(), &channel_map)?;
    let sink = JsonLinesSink::create(&output)?;

    let file = File::open(input.as_ref())?;
    info!(path = %input.as_ref().display(), "Treating MIDAS file");
    let mut reader = BufReader::new(file);

    run(&mut reader, &table, sink, options.decoder_config())
}

/// Drive one decode run over an already-open stream and sink.
///
/// The sink is closed on every exit path. When the decode fails, close
/// is still attempted; a close failure is logged and the decode error
/// takes precedence.
pub fn run<R, S>(
    reader: &mut R,
    table: &ChannelTable,
    mut sink: S,
    config: DecoderConfig,
) -> MidasResult<ConvertSummary>
where
    R: std::io::Read,
    S: EventSink,
{
    for name in table.names() {
        sink.register_channel(name)?;
    }

    let mut decoder = EventDecoder::new(table, &mut sink, config);
    let result = decoder.decode_stream(reader);
    let state = decoder.state();
    if let Err(e) = result {
        if let Err(close_err) = sink.close() {
            warn!(error = %close_err, "Sink close failed after fatal decode error");
        }
        return Err(e);
    }
    sink.close()?;

    let summary = ConvertSummary {
        blocks_read: state.blocks_read,
        events_emitted: state.events_emitted,
        channels: table.len(),
    };
    info!(
        blocks = summary.blocks_read,
        events = summary.events_emitted,
        channels = summary.channels,
        "Conversion finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_match_component_defaults() {
        let options = ConvertOptions::default();
        assert_eq!(options.adc_base, 32);
        assert_eq!(options.adc_offset, 992);
        assert_eq!(options.control_field, ControlField::LowBits);
        assert!(!options.flush_last_event);
    }

    #[test]
    fn test_convert_missing_input_is_fatal() {
        let missing = Path::new("/nonexistent/run0001.dat");
        let err = convert(
            missing,
            Path::new("/nonexistent/out.jsonl"),
            Path::new("/nonexistent/map.csv"),
            &ConvertOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::MidasError::Io(_)));
    }
}
