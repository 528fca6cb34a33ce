use std::path::Path;

use adhoc_flight_client::{ConnectionConfig, Credentials, Session};

/// This example connects to a Flight server on localhost:32010, runs a query,
/// prints the results and saves them to `results.arrow`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let credentials = Credentials::new(
        std::env::var("FLIGHT_USERNAME").unwrap_or_else(|_| "dremio".into()),
        std::env::var("FLIGHT_PASSWORD").unwrap_or_else(|_| "dremio123".into()),
    );
    let config = ConnectionConfig::new("localhost", 32010, credentials)
        .with_property("routing-tag", "examples");

    let mut session = Session::connect(&config).await?;
    let summary = session
        .run_query(
            "SELECT * FROM sys.options LIMIT 10",
            Some(Path::new("results.arrow")),
            true,
        )
        .await?;
    session.release();

    println!("Fetched {} rows in {} batches", summary.rows, summary.batches);

    Ok(())
}
