//! Arrow IPC stream output.
//!
//! Batches are encoded into an in-memory buffer by arrow's `StreamWriter` and
//! the encoded bytes are written to the async output after every message, so
//! the output only ever holds a header, whole batch frames and finally the
//! end-of-stream marker.

use arrow::array::RecordBatch;
use arrow::ipc::writer::StreamWriter;
use arrow_schema::SchemaRef;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{FlightClientError, Result};

pub struct IpcSink<W> {
    schema: SchemaRef,
    writer: StreamWriter<Vec<u8>>,
    output: W,
    frames: usize,
}

impl<W> IpcSink<W>
where
    W: AsyncWrite + Unpin,
{
    /// Write the stream header for `schema` to `output`
    pub async fn try_new(output: W, schema: SchemaRef) -> Result<Self> {
        let writer = StreamWriter::try_new(Vec::new(), &schema).map_err(FlightClientError::io)?;
        let mut sink = Self {
            schema,
            writer,
            output,
            frames: 0,
        };
        sink.flush_buffer().await?;

        Ok(sink)
    }

    /// Append one batch frame
    pub async fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        if batch.schema() != self.schema {
            return Err(FlightClientError::SchemaMismatch(
                self.schema.to_string(),
                batch.schema().to_string(),
            ));
        }

        self.writer.write(batch).map_err(FlightClientError::io)?;
        self.flush_buffer().await?;
        self.frames += 1;

        Ok(())
    }

    /// Number of batch frames written so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Write the end-of-stream marker and shut the output down
    pub async fn finish(mut self) -> Result<usize> {
        self.writer.finish().map_err(FlightClientError::io)?;
        self.flush_buffer().await?;
        self.output.shutdown().await?;

        Ok(self.frames)
    }

    async fn flush_buffer(&mut self) -> Result<()> {
        let buffer = std::mem::take(self.writer.get_mut());
        self.output.write_all(&buffer).await?;

        Ok(())
    }
}
