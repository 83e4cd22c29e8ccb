//! Tabular event sinks
//!
//! A sink receives the decoded output as a table: one column per mapped
//! channel, one row per event, each cell an ordered sequence of hit values
//! (possibly empty - every registered channel appears in every row).
//!
//! Contract: `register_channel` once per channel before decoding starts,
//! `append_event` once per completed event in event order, `close` exactly
//! once at the end of the run.

mod jsonl;

pub use jsonl::JsonLinesSink;

use std::collections::HashMap;

use crate::error::{MidasError, MidasResult};

/// Receiver of decoded events
pub trait EventSink {
    /// Register an output channel. Called once per mapped channel before
    /// any event is appended.
    fn register_channel(&mut self, name: &str) -> MidasResult<()>;

    /// Append one completed event. `channels` holds every registered
    /// channel paired with its hit sequence for this event, in
    /// registration order.
    fn append_event(&mut self, channels: &[(&str, &[u16])]) -> MidasResult<()>;

    /// Finalize the sink. Called exactly once after the last block.
    fn close(&mut self) -> MidasResult<()>;
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn register_channel(&mut self, name: &str) -> MidasResult<()> {
        (**self).register_channel(name)
    }

    fn append_event(&mut self, channels: &[(&str, &[u16])]) -> MidasResult<()> {
        (**self).append_event(channels)
    }

    fn close(&mut self) -> MidasResult<()> {
        (**self).close()
    }
}

/// In-memory sink for tests and inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    channels: Vec<String>,
    events: Vec<HashMap<String, Vec<u16>>>,
    closed: bool,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered channel names, in registration order
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Appended events, in event order
    pub fn events(&self) -> &[HashMap<String, Vec<u16>>] {
        &self.events
    }

    /// True once `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl EventSink for MemorySink {
    fn register_channel(&mut self, name: &str) -> MidasResult<()> {
        self.channels.push(name.to_string());
        Ok(())
    }

    fn append_event(&mut self, channels: &[(&str, &[u16])]) -> MidasResult<()> {
        let row = channels
            .iter()
            .map(|(name, hits)| (name.to_string(), hits.to_vec()))
            .collect();
        self.events.push(row);
        Ok(())
    }

    fn close(&mut self) -> MidasResult<()> {
        if self.closed {
            return Err(MidasError::sink("sink already closed"));
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_rows() {
        let mut sink = MemorySink::new();
        sink.register_channel("a").unwrap();
        sink.register_channel("b").unwrap();
        sink.append_event(&[("a", &[1, 2]), ("b", &[])]).unwrap();
        sink.close().unwrap();

        assert_eq!(sink.channels(), &["a", "b"]);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0]["a"], vec![1, 2]);
        assert!(sink.events()[0]["b"].is_empty());
        assert!(sink.is_closed());
    }

    #[test]
    fn test_memory_sink_double_close_fails() {
        let mut sink = MemorySink::new();
        sink.close().unwrap();
        assert!(sink.close().is_err());
    }
}
