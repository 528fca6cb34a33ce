//! Flight SQL operations.
//!
//! Flight SQL commands are protobuf messages packed into an `Any` and sent as
//! command descriptors, so they describe and stream through the same
//! `Session` calls as a plain query.

use arrow_flight::sql::{
    CommandGetCatalogs, CommandGetDbSchemas, CommandGetExportedKeys, CommandGetImportedKeys,
    CommandGetPrimaryKeys, CommandGetSqlInfo, CommandGetTableTypes, CommandGetTables,
    CommandStatementQuery, CommandStatementUpdate, DoPutUpdateResult, ProstMessageExt,
};
use arrow_flight::{FlightData, FlightDescriptor};
use prost::Message;
use tracing::debug;

use crate::error::{FlightClientError, Result};
use crate::{QueryDescriptor, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlCommand {
    Execute {
        query: String,
    },
    GetCatalogs,
    GetSchemas {
        catalog: Option<String>,
        schema_filter: Option<String>,
    },
    GetTables {
        catalog: Option<String>,
        schema_filter: Option<String>,
        table_filter: Option<String>,
    },
    GetTableTypes,
    GetSqlInfo,
    GetPrimaryKeys {
        catalog: Option<String>,
        schema: Option<String>,
        table: String,
    },
    GetExportedKeys {
        catalog: Option<String>,
        schema: Option<String>,
        table: String,
    },
    GetImportedKeys {
        catalog: Option<String>,
        schema: Option<String>,
        table: String,
    },
}

impl SqlCommand {
    /// The command descriptor sent with `GetFlightInfo`
    pub fn descriptor(&self) -> FlightDescriptor {
        let any = match self.clone() {
            SqlCommand::Execute { query } => CommandStatementQuery {
                query,
                transaction_id: None,
            }
            .as_any(),
            SqlCommand::GetCatalogs => CommandGetCatalogs {}.as_any(),
            SqlCommand::GetSchemas {
                catalog,
                schema_filter,
            } => CommandGetDbSchemas {
                catalog,
                db_schema_filter_pattern: schema_filter,
            }
            .as_any(),
            SqlCommand::GetTables {
                catalog,
                schema_filter,
                table_filter,
            } => CommandGetTables {
                catalog,
                db_schema_filter_pattern: schema_filter,
                table_name_filter_pattern: table_filter,
                table_types: vec![],
                include_schema: false,
            }
            .as_any(),
            SqlCommand::GetTableTypes => CommandGetTableTypes {}.as_any(),
            SqlCommand::GetSqlInfo => CommandGetSqlInfo { info: vec![] }.as_any(),
            SqlCommand::GetPrimaryKeys {
                catalog,
                schema,
                table,
            } => CommandGetPrimaryKeys {
                catalog,
                db_schema: schema,
                table,
            }
            .as_any(),
            SqlCommand::GetExportedKeys {
                catalog,
                schema,
                table,
            } => CommandGetExportedKeys {
                catalog,
                db_schema: schema,
                table,
            }
            .as_any(),
            SqlCommand::GetImportedKeys {
                catalog,
                schema,
                table,
            } => CommandGetImportedKeys {
                catalog,
                db_schema: schema,
                table,
            }
            .as_any(),
        };

        FlightDescriptor::new_cmd(any.encode_to_vec())
    }
}

impl Session {
    /// Describe a Flight SQL command
    pub async fn describe_sql(&mut self, command: &SqlCommand) -> Result<QueryDescriptor> {
        debug!(?command, "describing Flight SQL command");

        self.describe(command.descriptor()).await
    }

    /// Run an update statement, returning the number of affected records
    pub async fn execute_update(&mut self, query: &str) -> Result<i64> {
        let command = CommandStatementUpdate {
            query: query.to_string(),
            transaction_id: None,
        };
        let descriptor = FlightDescriptor::new_cmd(command.as_any().encode_to_vec());
        let flight_data = FlightData::new().with_descriptor(descriptor);

        let request = self.request(futures::stream::iter(vec![flight_data]));
        let mut results = self
            .client()?
            .do_put(request)
            .await
            .map_err(FlightClientError::query)?
            .into_inner();

        let result = results
            .message()
            .await
            .map_err(FlightClientError::query)?
            .ok_or_else(|| {
                FlightClientError::Transport("Server returned no update result".into())
            })?;

        let update = DoPutUpdateResult::decode(result.app_metadata)
            .map_err(FlightClientError::transport)?;

        debug!(records = update.record_count, "update executed");

        Ok(update.record_count)
    }
}
