//! JSON-lines file sink
//!
//! Layout:
//! - header line: `{"type":"header","channels":[...]}`
//! - one line per event: `{"type":"event","hits":{"name":[values],...}}`
//! - footer line: `{"type":"footer","events":N}`
//!
//! The header is written lazily before the first event row (or at close
//! for an empty run), after all channels have been registered.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::{MidasError, MidasResult};
use crate::sink::EventSink;

#[derive(Serialize)]
struct HeaderLine<'a> {
    r#type: &'static str,
    channels: &'a [String],
}

#[derive(Serialize)]
struct EventLine<'a> {
    r#type: &'static str,
    hits: Vec<(&'a str, &'a [u16])>,
}

#[derive(Serialize)]
struct FooterLine {
    r#type: &'static str,
    events: u64,
}

/// Writes one JSON object per line to any [`Write`] target
pub struct JsonLinesSink<W: Write> {
    writer: BufWriter<W>,
    channels: Vec<String>,
    events_written: u64,
    header_written: bool,
    closed: bool,
}

impl JsonLinesSink<File> {
    /// Create a sink writing to a new file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> MidasResult<Self> {
        let file = File::create(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Created output file");
        Ok(Self::new(file))
    }
}

impl<W: Write> JsonLinesSink<W> {
    /// Create a sink over an arbitrary writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            channels: Vec::new(),
            events_written: 0,
            header_written: false,
            closed: false,
        }
    }

    /// Events written so far
    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    fn write_header(&mut self) -> MidasResult<()> {
        let line = HeaderLine {
            r#type: "header",
            channels: &self.channels,
        };
        serde_json::to_writer(&mut self.writer, &line)
            .map_err(|e| MidasError::sink(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        self.header_written = true;
        Ok(())
    }

    /// Consume the sink and return the inner writer (tests)
    pub fn into_inner(self) -> std::io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn register_channel(&mut self, name: &str) -> MidasResult<()> {
        if self.header_written {
            return Err(MidasError::sink(
                "cannot register a channel after the first event",
            ));
        }
        self.channels.push(name.to_string());
        Ok(())
    }

    fn append_event(&mut self, channels: &[(&str, &[u16])]) -> MidasResult<()> {
        if !self.header_written {
            self.write_header()?;
        }
        let line = EventLine {
            r#type: "event",
            hits: channels.to_vec(),
        };
        serde_json::to_writer(&mut self.writer, &line)
            .map_err(|e| MidasError::sink(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        self.events_written += 1;
        Ok(())
    }

    fn close(&mut self) -> MidasResult<()> {
        if self.closed {
            return Err(MidasError::sink("sink already closed"));
        }
        if !self.header_written {
            self.write_header()?;
        }
        let line = FooterLine {
            r#type: "footer",
            events: self.events_written,
        };
        serde_json::to_writer(&mut self.writer, &line)
            .map_err(|e| MidasError::sink(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.closed = true;
        info!(events = self.events_written, "Closed output");
        Ok(())
    }
}
