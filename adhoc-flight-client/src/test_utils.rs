//! An in-process Flight server for tests.
//!
//! It authenticates `admin`/`password` with a Basic handshake, answers with a
//! fixed bearer token and serves a handful of canned queries.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::array::{RecordBatch, StringArray};
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::sql::{Any, CommandGetCatalogs, CommandStatementUpdate, DoPutUpdateResult};
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightEndpoint, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaResult, Ticket,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use base64::prelude::{Engine, BASE64_STANDARD};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use prost::Message;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::metadata::MetadataMap;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

use crate::config::{ConnectionConfig, Credentials};
use crate::stream::tests::{users_batch, users_schema};

pub(crate) const USERNAME: &str = "admin";
pub(crate) const PASSWORD: &str = "password";
pub(crate) const TOKEN: &str = "9f3c2a7e-token";

pub(crate) const USERS_QUERY: &str = "SELECT * FROM users";
pub(crate) const EMPTY_QUERY: &str = "SELECT * FROM users WHERE 1 = 0";
pub(crate) const UPDATE_QUERY: &str = "UPDATE users SET name = 'x'";

const CATALOGS_TICKET: &str = "catalogs";

pub(crate) fn get_temp_dir(dir: &str) -> String {
    std::env::temp_dir().join(dir).to_str().unwrap().to_string()
}

pub(crate) async fn create_temp_dir(dir: &str) -> String {
    let temp_dir = get_temp_dir(dir);
    tokio::fs::create_dir_all(&temp_dir).await.unwrap();

    temp_dir
}

pub(crate) async fn remove_temp_dir(temp_dir: &str) {
    tokio::fs::remove_dir_all(temp_dir).await.unwrap();
}

pub(crate) fn config(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig::new(
        addr.ip().to_string(),
        addr.port(),
        Credentials::new(USERNAME, PASSWORD),
    )
}

/// Calls the server has seen
#[derive(Debug, Default)]
pub(crate) struct CallLog {
    pub handshakes: AtomicUsize,
    pub describes: AtomicUsize,
    pub streams: AtomicUsize,
    pub routing_tags: Mutex<Vec<String>>,
}

impl CallLog {
    fn record_routing_tag(&self, metadata: &MetadataMap) {
        if let Some(tag) = metadata.get("routing-tag") {
            self.routing_tags
                .lock()
                .unwrap()
                .push(tag.to_str().unwrap().to_string());
        }
    }
}

/// Start the server on an ephemeral port
pub(crate) async fn start_server() -> (SocketAddr, Arc<CallLog>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(CallLog::default());
    let service = MockFlightService { log: log.clone() };

    tokio::spawn(async move {
        Server::builder()
            .add_service(FlightServiceServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    (addr, log)
}

fn catalogs_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new(
        "catalog_name",
        DataType::Utf8,
        false,
    )]))
}

/// Schema and batches served for a ticket
fn results(ticket: &str) -> Result<(SchemaRef, Vec<RecordBatch>), Status> {
    match ticket {
        USERS_QUERY => Ok((
            users_schema(),
            vec![
                users_batch(vec![1, 2, 3]),
                users_batch(vec![4, 5]),
                users_batch(vec![6]),
            ],
        )),
        EMPTY_QUERY => Ok((users_schema(), vec![])),
        CATALOGS_TICKET => {
            let batch = RecordBatch::try_new(
                catalogs_schema(),
                vec![Arc::new(StringArray::from(vec!["dremio", "samples"]))],
            )
            .map_err(|e| Status::internal(e.to_string()))?;

            Ok((catalogs_schema(), vec![batch]))
        }
        query if query.contains("missing") => Err(Status::invalid_argument(
            "Table 'missing' not found",
        )),
        query => Err(Status::invalid_argument(format!(
            "Failure parsing the query: {query}"
        ))),
    }
}

#[derive(Clone)]
struct MockFlightService {
    log: Arc<CallLog>,
}

impl MockFlightService {
    fn check_token(&self, metadata: &MetadataMap) -> Result<(), Status> {
        let expected = format!("Bearer {TOKEN}");

        match metadata.get("authorization").map(|value| value.to_str()) {
            Some(Ok(value)) if value == expected => Ok(()),
            _ => Err(Status::unauthenticated("Missing or invalid bearer token")),
        }
    }

    /// The ticket for a command, which is either a Flight SQL `Any` or plain query text
    fn ticket_for(cmd: &[u8]) -> Result<String, Status> {
        if let Ok(any) = Any::decode(cmd) {
            if any.is::<CommandGetCatalogs>() {
                return Ok(CATALOGS_TICKET.into());
            }
        }

        String::from_utf8(cmd.to_vec()).map_err(|e| Status::invalid_argument(e.to_string()))
    }
}

#[tonic::async_trait]
impl FlightService for MockFlightService {
    type HandshakeStream = BoxStream<'static, Result<HandshakeResponse, Status>>;
    type ListFlightsStream = BoxStream<'static, Result<FlightInfo, Status>>;
    type DoGetStream = BoxStream<'static, Result<FlightData, Status>>;
    type DoPutStream = BoxStream<'static, Result<PutResult, Status>>;
    type DoActionStream = BoxStream<'static, Result<arrow_flight::Result, Status>>;
    type ListActionsStream = BoxStream<'static, Result<ActionType, Status>>;
    type DoExchangeStream = BoxStream<'static, Result<FlightData, Status>>;

    async fn handshake(
        &self,
        request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        self.log.record_routing_tag(request.metadata());

        let expected = format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{USERNAME}:{PASSWORD}"))
        );
        match request.metadata().get("authorization").map(|value| value.to_str()) {
            Some(Ok(value)) if value == expected => {}
            _ => return Err(Status::unauthenticated("Invalid credentials")),
        }

        self.log.handshakes.fetch_add(1, Ordering::SeqCst);

        let output = futures::stream::iter(vec![Ok(HandshakeResponse::default())]);
        let mut response = Response::new(Box::pin(output) as Self::HandshakeStream);
        response.metadata_mut().insert(
            "authorization",
            format!("Bearer {TOKEN}")
                .parse()
                .map_err(|_| Status::internal("invalid token"))?,
        );

        Ok(response)
    }

    async fn get_flight_info(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        self.check_token(request.metadata())?;
        self.log.record_routing_tag(request.metadata());
        self.log.describes.fetch_add(1, Ordering::SeqCst);

        let descriptor = request.into_inner();
        let ticket = Self::ticket_for(&descriptor.cmd)?;
        let (schema, _) = results(&ticket)?;

        let info = FlightInfo::new()
            .try_with_schema(&schema)
            .map_err(|e| Status::internal(e.to_string()))?
            .with_endpoint(FlightEndpoint::new().with_ticket(Ticket::new(ticket)))
            .with_descriptor(descriptor);

        Ok(Response::new(info))
    }

    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        self.check_token(request.metadata())?;
        self.log.streams.fetch_add(1, Ordering::SeqCst);

        let ticket = request.into_inner();
        let ticket = std::str::from_utf8(&ticket.ticket)
            .map_err(|e| Status::invalid_argument(format!("Invalid ticket: {e:?}")))?;
        let (schema, batches) = results(ticket)?;

        let output = FlightDataEncoderBuilder::new()
            .with_schema(schema)
            .build(futures::stream::iter(batches.into_iter().map(Ok)))
            .map_err(Status::from);

        Ok(Response::new(Box::pin(output) as Self::DoGetStream))
    }

    async fn do_put(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        self.check_token(request.metadata())?;

        let mut flight_data = request.into_inner();
        let descriptor = flight_data
            .next()
            .await
            .ok_or_else(|| Status::invalid_argument("Empty DoPut"))??
            .flight_descriptor
            .ok_or_else(|| Status::invalid_argument("Missing descriptor"))?;

        let command = Any::decode(descriptor.cmd)
            .map_err(|e| Status::invalid_argument(e.to_string()))?
            .unpack::<CommandStatementUpdate>()
            .map_err(|e| Status::invalid_argument(e.to_string()))?
            .ok_or_else(|| Status::invalid_argument("Expected CommandStatementUpdate"))?;

        if command.query != UPDATE_QUERY {
            results(&command.query)?;
        }

        let result = PutResult {
            app_metadata: DoPutUpdateResult { record_count: 3 }
                .encode_to_vec()
                .into(),
        };
        let output = futures::stream::iter(vec![Ok(result)]);

        Ok(Response::new(Box::pin(output) as Self::DoPutStream))
    }

    async fn get_schema(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    async fn do_action(
        &self,
        _request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("Not yet implemented"))
    }
}
