//! Channel table: hardware address to output channel mapping
//!
//! Each detector channel is identified on the wire by a linear address
//! computed from its (ADC, channel) pair. The table is built once per run
//! from a delimited text file and is read-only during decoding. To keep
//! the hot path cheap, the table hands out dense indices: lookups return a
//! `usize` the decoder uses into a parallel accumulator array, so per-hit
//! work is a single integer-keyed probe with no string handling.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{info, warn};

use crate::error::MidasResult;

/// Address formula constants, run-wide
#[derive(Debug, Clone, Copy)]
pub struct ChannelMapConfig {
    /// Channels per ADC module
    pub adc_base: i32,
    /// Address of (ADC 1, channel 0)
    pub adc_offset: i32,
}

impl Default for ChannelMapConfig {
    fn default() -> Self {
        Self {
            adc_base: 32,
            adc_offset: 992,
        }
    }
}

impl ChannelMapConfig {
    /// Linear address of an (ADC, channel) pair.
    pub fn address(&self, adc: i32, channel: i32) -> i32 {
        (adc - 1) * self.adc_base + channel + self.adc_offset
    }
}

/// Mapping from linear hardware address to output channel
#[derive(Debug, Clone)]
pub struct ChannelTable {
    config: ChannelMapConfig,
    /// address -> dense channel index
    index: HashMap<i32, usize>,
    /// channel index -> output channel name
    names: Vec<String>,
}

impl ChannelTable {
    /// Create an empty table
    pub fn new(config: ChannelMapConfig) -> Self {
        Self {
            config,
            index: HashMap::new(),
            names: Vec::new(),
        }
    }

    /// Register a channel; first registration wins on address collision.
    ///
    /// Returns the dense index of the new channel, or `None` if the address
    /// was already taken (reported, never fatal).
    pub fn insert(&mut self, name: &str, adc: i32, channel: i32) -> Option<usize> {
        let address = self.config.address(adc, channel);
        if let Some(&existing) = self.index.get(&address) {
            warn!(
                name,
                address,
                kept = %self.names[existing],
                "Duplicate channel mapping, keeping the earlier one"
            );
            return None;
        }
        let idx = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(address, idx);
        Some(idx)
    }

    /// Load a table from delimited text: one header line (ignored), then
    /// `name,adc,channel` lines. Malformed or duplicate lines are reported
    /// and skipped.
    pub fn from_reader<R: BufRead>(config: ChannelMapConfig, reader: R) -> MidasResult<Self> {
        let mut table = Self::new(config);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if lineno == 0 {
                continue; // header
            }
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != 3 {
                warn!(lineno = lineno + 1, %line, "Bad channel-map line, skipping");
                continue;
            }
            let adc = fields[1].parse::<i32>();
            let channel = fields[2].parse::<i32>();
            match (adc, channel) {
                (Ok(adc), Ok(channel)) => {
                    if let Some(idx) = table.insert(fields[0], adc, channel) {
                        info!(
                            name = fields[0],
                            adc,
                            channel,
                            address = config.address(adc, channel),
                            index = idx,
                            "Registered channel"
                        );
                    }
                }
                _ => {
                    warn!(lineno = lineno + 1, %line, "Non-numeric ADC/channel, skipping");
                }
            }
        }
        Ok(table)
    }

    /// Load a table from a file path
    pub fn from_path<P: AsRef<Path>>(config: ChannelMapConfig, path: P) -> MidasResult<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(config, BufReader::new(file))
    }

    /// Dense index of a mapped address, `None` if unmapped
    #[inline]
    pub fn lookup(&self, address: i32) -> Option<usize> {
        self.index.get(&address).copied()
    }

    /// Channel name at a dense index
    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    /// Channel names, in registration order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of registered channels
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if no channels are registered
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
