//! Batch relay.
//!
//! Drains a `BatchStream`, mirroring every batch to an optional display
//! callback and an optional Arrow IPC sink.  The two sinks are independent.

use std::path::Path;

use arrow::array::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use crate::error::{FlightClientError, Result};
use crate::sink::IpcSink;
use crate::stream::BatchStream;

/// What a completed relay moved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    pub batches: usize,
    pub rows: usize,
}

/// Display callback that prints each batch as a table on stdout
pub fn print_batch(batch: &RecordBatch) {
    match pretty_format_batches(std::slice::from_ref(batch)) {
        Ok(table) => println!("{table}"),
        Err(e) => warn!("Unable to format batch: {e}"),
    }
}

pub struct Relay<D, W> {
    display: Option<D>,
    output: Option<W>,
}

impl Default for Relay<fn(&RecordBatch), tokio::fs::File> {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay<fn(&RecordBatch), tokio::fs::File> {
    /// A relay that only drains the stream
    pub fn new() -> Self {
        Relay {
            display: None,
            output: None,
        }
    }
}

impl<D, W> Relay<D, W>
where
    D: FnMut(&RecordBatch),
    W: AsyncWrite + Unpin,
{
    pub fn with_display<D2>(self, display: D2) -> Relay<D2, W>
    where
        D2: FnMut(&RecordBatch),
    {
        Relay {
            display: Some(display),
            output: self.output,
        }
    }

    pub fn with_output<W2>(self, output: W2) -> Relay<D, W2>
    where
        W2: AsyncWrite + Unpin,
    {
        Relay {
            display: self.display,
            output: Some(output),
        }
    }

    /// Drain `stream` to completion
    pub async fn run(self, stream: &mut BatchStream) -> Result<RelaySummary> {
        let Relay {
            mut display,
            output,
        } = self;

        let mut sink = match output {
            Some(output) => Some(IpcSink::try_new(output, stream.schema()).await?),
            None => None,
        };

        let mut summary = RelaySummary::default();

        while let Some(batch) = stream.next_batch().await? {
            debug!(rows = batch.num_rows(), "relaying batch");

            if let Some(display) = display.as_mut() {
                display(&batch);
            }

            if let Some(sink) = sink.as_mut() {
                sink.write(&batch).await?;
            }

            summary.batches += 1;
            summary.rows += batch.num_rows();
        }

        if let Some(sink) = sink {
            sink.finish().await?;
        }

        info!(batches = summary.batches, rows = summary.rows, "relay complete");

        Ok(summary)
    }
}

/// Relay to the console when `print` is set and to an Arrow IPC file at
/// `output`. The file is only created once the stream is open.
pub async fn relay_stream(
    stream: &mut BatchStream,
    output: Option<&Path>,
    print: bool,
) -> Result<RelaySummary> {
    let mut relay = Relay::new();

    if print {
        relay = relay.with_display(print_batch as fn(&RecordBatch));
    }

    if let Some(path) = output {
        let file = tokio::fs::File::create(path).await.map_err(|e| {
            FlightClientError::Io(format!("Unable to create {}: {e}", path.display()))
        })?;
        relay = relay.with_output(file);
    }

    relay.run(stream).await
}
