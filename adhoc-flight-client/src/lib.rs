pub mod config;
pub mod error;
pub mod relay;
pub mod sink;
pub mod sql;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_utils;
mod tls;

use std::path::Path;

use arrow_flight::error::FlightError;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{FlightDescriptor, FlightInfo, HandshakeRequest, Ticket};
use arrow_schema::Schema;
use base64::prelude::{Engine, BASE64_STANDARD};
use futures::TryStreamExt;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tonic::transport::Channel;
use tonic::{Code, Request, Status};
use tracing::{debug, info};

pub use crate::config::{ConnectionConfig, Credentials, TlsOptions};
pub use crate::error::{FlightClientError, Result};
pub use crate::relay::{print_batch, Relay, RelaySummary};
pub use crate::sink::IpcSink;
pub use crate::sql::SqlCommand;
pub use crate::stream::BatchStream;

const AUTHORIZATION: &str = "authorization";
const BASIC_PREFIX: &str = "Basic ";
const BEARER_PREFIX: &str = "Bearer ";

/// Where and how the results of a described query can be fetched
#[derive(Debug)]
pub struct QueryDescriptor {
    info: FlightInfo,
}

impl QueryDescriptor {
    pub fn flight_info(&self) -> &FlightInfo {
        &self.info
    }

    /// Number of endpoints the results are partitioned over
    pub fn endpoint_count(&self) -> usize {
        self.info.endpoint.len()
    }

    /// The schema the server announced, if it sent one
    pub fn schema(&self) -> Result<Option<Schema>> {
        if self.info.schema.is_empty() {
            return Ok(None);
        }

        self.info
            .clone()
            .try_decode_schema()
            .map(Some)
            .map_err(FlightClientError::transport)
    }

    /// Only the first endpoint is ever read
    fn first_ticket(self) -> Result<Ticket> {
        self.info
            .endpoint
            .into_iter()
            .next()
            .ok_or_else(|| FlightClientError::Transport("Query returned no endpoints".into()))?
            .ticket
            .ok_or_else(|| FlightClientError::Transport("Endpoint has no ticket".into()))
    }
}

/// An authenticated Flight session.
///
/// Every call after the handshake carries the bearer token issued by the
/// server along with the client properties of the `ConnectionConfig`.
pub struct Session {
    inner: Option<FlightServiceClient<Channel>>,
    headers: MetadataMap,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("released", &self.is_released())
            .finish()
    }
}

impl Session {
    /// Connect and authenticate with a single handshake
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let properties = property_metadata(&config.properties)?;
        let channel = tls::connect_channel(config).await?;
        let mut inner = FlightServiceClient::new(channel);

        let token = handshake(&mut inner, &config.credentials, &properties).await?;

        let mut headers = properties;
        headers.insert(AUTHORIZATION, ascii_value(format!("{BEARER_PREFIX}{token}"))?);

        info!(
            host = %config.host,
            port = config.port,
            username = %config.credentials.username,
            encrypted = config.tls.is_encrypted(),
            "authenticated"
        );

        Ok(Session {
            inner: Some(inner),
            headers,
        })
    }

    /// Describe a query sent as an opaque command
    pub async fn describe_query(&mut self, query: &str) -> Result<QueryDescriptor> {
        self.describe(FlightDescriptor::new_cmd(query.to_string()))
            .await
    }

    /// Describe any Flight descriptor
    pub async fn describe(&mut self, descriptor: FlightDescriptor) -> Result<QueryDescriptor> {
        debug!(?descriptor, "get_flight_info");

        let request = self.request(descriptor);
        let info = self
            .client()?
            .get_flight_info(request)
            .await
            .map_err(describe_error)?
            .into_inner();

        debug!(endpoints = info.endpoint.len(), "described query");

        Ok(QueryDescriptor { info })
    }

    /// Open the result stream of the first endpoint of `descriptor`
    pub async fn open_result_stream(&mut self, descriptor: QueryDescriptor) -> Result<BatchStream> {
        if descriptor.endpoint_count() > 1 {
            debug!(
                endpoints = descriptor.endpoint_count(),
                "reading only the first endpoint"
            );
        }

        let ticket = descriptor.first_ticket()?;
        let request = self.request(ticket);
        let flight_data = self
            .client()?
            .do_get(request)
            .await
            .map_err(|status| FlightClientError::Transport(status.message().to_string()))?
            .into_inner();

        BatchStream::try_new(flight_data.map_err(FlightError::from)).await
    }

    /// Describe `query`, stream its results and relay them to the console
    /// and/or an Arrow IPC file
    pub async fn run_query(
        &mut self,
        query: &str,
        output: Option<&Path>,
        print: bool,
    ) -> Result<RelaySummary> {
        let descriptor = self.describe_query(query).await?;
        let mut stream = self.open_result_stream(descriptor).await?;

        relay::relay_stream(&mut stream, output, print).await
    }

    /// Release the transport; calling it again does nothing
    pub fn release(&mut self) {
        if self.inner.take().is_some() {
            debug!("session released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Build a request carrying the session headers
    pub(crate) fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        *request.metadata_mut() = self.headers.clone();

        request
    }

    pub(crate) fn client(&mut self) -> Result<&mut FlightServiceClient<Channel>> {
        self.inner
            .as_mut()
            .ok_or_else(|| FlightClientError::Transport("Session has been released".into()))
    }
}

/// Send the credentials and return the bearer token the server issued
async fn handshake(
    inner: &mut FlightServiceClient<Channel>,
    credentials: &Credentials,
    properties: &MetadataMap,
) -> Result<String> {
    let basic = BASE64_STANDARD.encode(format!(
        "{}:{}",
        credentials.username, credentials.password
    ));

    let mut request = Request::new(futures::stream::iter(vec![HandshakeRequest::default()]));
    *request.metadata_mut() = properties.clone();
    request
        .metadata_mut()
        .insert(AUTHORIZATION, ascii_value(format!("{BASIC_PREFIX}{basic}"))?);

    let response = inner
        .handshake(request)
        .await
        .map_err(|status| FlightClientError::Auth(status.message().to_string()))?;

    let token = bearer_token(response.metadata())?;
    let mut responses = response.into_inner();

    while responses
        .message()
        .await
        .map_err(|status| FlightClientError::Auth(status.message().to_string()))?
        .is_some()
    {}

    // some servers only send the token once the handshake stream is closed
    let token = match token {
        Some(token) => Some(token),
        None => match responses
            .trailers()
            .await
            .map_err(|status| FlightClientError::Auth(status.message().to_string()))?
        {
            Some(trailers) => bearer_token(&trailers)?,
            None => None,
        },
    };

    token.ok_or_else(|| FlightClientError::Auth("Server did not return a bearer token".into()))
}

fn bearer_token(metadata: &MetadataMap) -> Result<Option<String>> {
    let Some(value) = metadata.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value.to_str().map_err(FlightClientError::auth)?;

    match value.strip_prefix(BEARER_PREFIX) {
        Some(token) if !token.is_empty() => Ok(Some(token.to_string())),
        _ => Err(FlightClientError::Auth(format!(
            "Unexpected authorization header: {value}"
        ))),
    }
}

fn property_metadata(properties: &[(String, String)]) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::new();

    for (key, value) in properties {
        let key = AsciiMetadataKey::from_bytes(key.to_lowercase().as_bytes())
            .map_err(|e| FlightClientError::InvalidArgument(format!("{key}: {e}")))?;
        metadata.append(key, ascii_value(value.clone())?);
    }

    Ok(metadata)
}

fn ascii_value(value: String) -> Result<AsciiMetadataValue> {
    value
        .parse()
        .map_err(|e| FlightClientError::InvalidArgument(format!("Invalid header value: {e}")))
}

/// Connection-level failures are transport errors, everything else is the
/// server rejecting the query
fn describe_error(status: Status) -> FlightClientError {
    match status.code() {
        Code::Unavailable | Code::Cancelled | Code::DeadlineExceeded => {
            FlightClientError::Transport(status.message().to_string())
        }
        _ => FlightClientError::query(status),
    }
}
