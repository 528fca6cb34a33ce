//! Result streams.
//!
//! A `BatchStream` decodes the `FlightData` messages of a `DoGet` call.  The
//! schema should be the first message returned, all remaining messages are
//! dictionaries and record batches.

use arrow::array::RecordBatch;
use arrow_flight::decode::{DecodedPayload, FlightDataDecoder};
use arrow_flight::error::FlightError;
use arrow_flight::FlightData;
use arrow_schema::SchemaRef;
use futures::{Stream, StreamExt};

use crate::error::{FlightClientError, Result};

pub struct BatchStream {
    schema: SchemaRef,
    decoder: FlightDataDecoder,
}

impl std::fmt::Debug for BatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStream")
            .field("schema", &self.schema)
            .finish()
    }
}

impl BatchStream {
    /// Wrap a stream of `FlightData`, reading up to and including the schema message
    pub async fn try_new<S>(flight_data: S) -> Result<Self>
    where
        S: Stream<Item = std::result::Result<FlightData, FlightError>> + Send + 'static,
    {
        let mut decoder = FlightDataDecoder::new(flight_data);

        loop {
            let decoded = decoder
                .next()
                .await
                .ok_or_else(|| {
                    FlightClientError::Transport("Stream ended before a schema was sent".into())
                })?
                .map_err(FlightClientError::transport)?;

            match decoded.payload {
                DecodedPayload::Schema(schema) => return Ok(Self { schema, decoder }),
                DecodedPayload::None => continue,
                DecodedPayload::RecordBatch(_) => {
                    return Err(FlightClientError::Transport(
                        "Record batch received before the schema".into(),
                    ))
                }
            }
        }
    }

    /// The schema reported by the first message of the stream
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Pull the next batch, `None` once the server signals end-of-data
    pub async fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        while let Some(decoded) = self.decoder.next().await {
            match decoded.map_err(FlightClientError::transport)?.payload {
                DecodedPayload::RecordBatch(batch) => return Ok(Some(batch)),
                DecodedPayload::None => continue,
                DecodedPayload::Schema(schema) => {
                    if schema != self.schema {
                        return Err(FlightClientError::SchemaMismatch(
                            self.schema.to_string(),
                            schema.to_string(),
                        ));
                    }
                }
            }
        }

        Ok(None)
    }
}
