//! midas2tab - convert a MIDAS event-by-event file to a JSON-lines table
//!
//! Usage:
//!   midas2tab run0001.dat run0001.jsonl --map channels.csv
//!   midas2tab run0001.dat run0001.jsonl --map channels.csv \
//!       --adc-base 32 --adc-offset 992 --ctrl-bits low-bits

use std::path::PathBuf;

use clap::Parser;
use midas_rs::{convert, ControlField, ConvertOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "midas2tab", about = "MIDAS event-by-event file converter")]
struct Args {
    /// Input MIDAS file
    input: PathBuf,

    /// Output JSON-lines file
    output: PathBuf,

    /// Channel map file (name,adc,channel lines after a header line)
    #[arg(short = 'm', long = "map")]
    channel_map: PathBuf,

    /// Channels per ADC module
    #[arg(long, default_value_t = 32)]
    adc_base: i32,

    /// Address of (ADC 1, channel 0)
    #[arg(long, default_value_t = 992)]
    adc_offset: i32,

    /// Which bits of a tag word hold the control code
    #[arg(long = "ctrl-bits", value_enum, default_value = "low-bits")]
    control_field: ControlField,

    /// Decode anomalies tolerated per block before aborting
    #[arg(long, default_value_t = 1024)]
    max_anomalies: u32,

    /// Emit the event still pending at end of stream instead of dropping it
    #[arg(long)]
    flush_last: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("midas_rs=info".parse()?))
        .init();

    let args = Args::parse();

    let options = ConvertOptions {
        adc_base: args.adc_base,
        adc_offset: args.adc_offset,
        control_field: args.control_field,
        max_anomalies_per_block: args.max_anomalies,
        flush_last_event: args.flush_last,
    };

    let summary = convert(&args.input, &args.output, &args.channel_map, &options)?;

    info!(
        blocks = summary.blocks_read,
        events = summary.events_emitted,
        channels = summary.channels,
        output = %args.output.display(),
        "Done"
    );
    Ok(())
}
