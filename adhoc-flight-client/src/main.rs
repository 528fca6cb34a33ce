use std::path::PathBuf;

use adhoc_flight_client::config::parse_property;
use adhoc_flight_client::relay::relay_stream;
use adhoc_flight_client::{
    ConnectionConfig, Credentials, FlightClientError, Result, Session, SqlCommand, TlsOptions,
};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run a query or a Flight SQL command against an Arrow Flight server
#[derive(Parser, Debug)]
#[command(name = "adhoc-flight", version, about, long_about = None)]
struct Args {
    /// Host to connect to
    #[arg(long)]
    host: String,

    /// Port to connect to
    #[arg(long)]
    port: u16,

    /// Method to run
    #[arg(long, value_enum, ignore_case = true)]
    command: Command,

    /// Auth username
    #[arg(long, env = "FLIGHT_USERNAME")]
    username: String,

    /// Auth password
    #[arg(long, env = "FLIGHT_PASSWORD", hide_env_values = true)]
    password: String,

    /// Query
    #[arg(long)]
    query: Option<String>,

    /// Catalog
    #[arg(long)]
    catalog: Option<String>,

    /// Schema
    #[arg(long)]
    schema: Option<String>,

    /// Table
    #[arg(long)]
    table: Option<String>,

    /// Save the results to this file in the Arrow IPC stream format
    #[arg(long)]
    output: Option<PathBuf>,

    /// Do not print the results
    #[arg(long)]
    no_print: bool,

    /// Encrypt the connection
    #[arg(long)]
    tls: bool,

    /// PEM file with the certificates to trust
    #[arg(long, requires = "tls")]
    trust_store: Option<PathBuf>,

    /// Do not verify the server certificate
    #[arg(long, requires = "tls", conflicts_with = "trust_store")]
    disable_server_verification: bool,

    /// Client property sent with every call, e.g. routing-tag=nightly
    #[arg(long = "property", value_parser = parse_property)]
    properties: Vec<(String, String)>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "PascalCase")]
enum Command {
    Query,
    Execute,
    ExecuteUpdate,
    GetCatalogs,
    GetSchemas,
    GetTables,
    GetTableTypes,
    GetSqlInfo,
    GetPrimaryKeys,
    GetExportedKeys,
    GetImportedKeys,
}

impl Args {
    fn connection_config(&self) -> Result<ConnectionConfig> {
        let tls = match (self.tls, &self.trust_store, self.disable_server_verification) {
            (false, _, _) => TlsOptions::Plaintext,
            (true, Some(path), _) => TlsOptions::TrustStore { path: path.clone() },
            (true, None, true) => TlsOptions::Unverified,
            (true, None, false) => {
                return Err(FlightClientError::InvalidArgument(
                    "--tls needs --trust-store or --disable-server-verification".into(),
                ))
            }
        };

        let mut config = ConnectionConfig::new(
            self.host.trim(),
            self.port,
            Credentials::new(self.username.trim(), self.password.trim()),
        )
        .with_tls(tls);
        config.properties = self.properties.clone();

        Ok(config)
    }

    fn query(&self) -> Result<String> {
        self.query.clone().ok_or_else(|| {
            FlightClientError::InvalidArgument(format!("{:?} needs --query", self.command))
        })
    }

    fn table(&self) -> Result<String> {
        self.table.clone().ok_or_else(|| {
            FlightClientError::InvalidArgument(format!("{:?} needs --table", self.command))
        })
    }

    /// Check the command's own arguments without connecting
    fn validate(&self) -> Result<()> {
        if matches!(self.command, Command::Query | Command::ExecuteUpdate) {
            self.query()?;
        }
        self.sql_command()?;

        Ok(())
    }

    /// The Flight SQL command to describe, `None` for the commands that do not stream
    fn sql_command(&self) -> Result<Option<SqlCommand>> {
        let catalog = self.catalog.clone();
        let schema = self.schema.clone();

        let command = match self.command {
            Command::Query | Command::ExecuteUpdate => return Ok(None),
            Command::Execute => SqlCommand::Execute {
                query: self.query()?,
            },
            Command::GetCatalogs => SqlCommand::GetCatalogs,
            Command::GetSchemas => SqlCommand::GetSchemas {
                catalog,
                schema_filter: schema,
            },
            Command::GetTables => SqlCommand::GetTables {
                catalog,
                schema_filter: schema,
                table_filter: self.table.clone(),
            },
            Command::GetTableTypes => SqlCommand::GetTableTypes,
            Command::GetSqlInfo => SqlCommand::GetSqlInfo,
            Command::GetPrimaryKeys => SqlCommand::GetPrimaryKeys {
                catalog,
                schema,
                table: self.table()?,
            },
            Command::GetExportedKeys => SqlCommand::GetExportedKeys {
                catalog,
                schema,
                table: self.table()?,
            },
            Command::GetImportedKeys => SqlCommand::GetImportedKeys {
                catalog,
                schema,
                table: self.table()?,
            },
        };

        Ok(Some(command))
    }
}

async fn run(session: &mut Session, args: &Args) -> Result<()> {
    let print = !args.no_print;
    let output = args.output.as_deref();

    match args.command {
        Command::Query => {
            let summary = session.run_query(&args.query()?, output, print).await?;
            info!(batches = summary.batches, rows = summary.rows, "query complete");
        }
        Command::ExecuteUpdate => {
            let records = session.execute_update(&args.query()?).await?;
            println!("Updated {records} records");
        }
        _ => {
            if let Some(command) = args.sql_command()? {
                let descriptor = session.describe_sql(&command).await?;
                let mut stream = session.open_result_stream(descriptor).await?;
                relay_stream(&mut stream, output, print).await?;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // validate everything before a connection is opened
    let config = args.connection_config()?;
    args.validate()?;

    let mut session = Session::connect(&config).await?;
    let result = run(&mut session, &args).await;
    session.release();

    Ok(result?)
}
