use anyhow::{anyhow, Context, Result};
use aws_lambda_events::event::s3::S3Event;
use lambda_runtime::{run, service_fn, LambdaEvent};
use s3_file_relay::response::Response;
use s3_file_relay::soap::HttpTransport;
use s3_file_relay::{client, submit};
use std::time::Duration;

/// Submit the CSV file named by the S3 event to the intake webservice
async fn function_handler(
    event: LambdaEvent<S3Event>,
    transport: &HttpTransport,
) -> Result<Response> {
    let clients = client::current();
    let services = submit::Services {
        store: &clients.s3,
        transport,
        mailer: &clients.ses,
    };
    Ok(submit::current().handle(&event.payload, &services).await)
}

/// Run an AWS Lambda function that listens to S3 object creation
/// events, posts each new CSV file to the SOAP intake webservice, and
/// emails the outcome.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    submit::init()?;
    client::init().await?;

    let settings = &submit::current().settings;
    let transport = HttpTransport::new(
        Duration::from_secs(settings.ws_timeout),
        settings.ssl_verification_enabled(),
    )
    .context("Failed to prepare the webservice transport")?;

    run(service_fn(|event| function_handler(event, &transport)))
        .await
        .map_err(|e| anyhow!("{:?}", e))
}
