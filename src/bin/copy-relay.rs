use anyhow::{anyhow, Result};
use lambda_runtime::{run, service_fn, LambdaEvent};
use s3_file_relay::relay::{self, Invocation};
use s3_file_relay::response::Response;
use s3_file_relay::client;
use serde_json::Value;

/// Copy each S3 event record into the destination bucket. The
/// payload is taken as raw JSON so malformed events get reported too.
async fn function_handler(event: LambdaEvent<Value>) -> Result<Response> {
    let clients = client::current();
    let services = relay::Services {
        store: &clients.s3,
        mailer: &clients.ses,
    };
    let invocation = Invocation::from(&event.context);
    relay::current()
        .handle_payload(event.payload, &invocation, &services)
        .await
}

/// Run an AWS Lambda function that listens to S3 object creation
/// events and copies the new exports into the integration bucket,
/// emailing a report whenever something goes wrong.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    relay::init()?;
    client::init().await?;

    run(service_fn(function_handler))
        .await
        .map_err(|e| anyhow!("{:?}", e))
}
