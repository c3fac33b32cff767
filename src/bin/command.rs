use anyhow::{bail, Context, Result};
use s3_file_relay::soap::HttpTransport;
use s3_file_relay::trigger::Trigger;
use s3_file_relay::{client, submit};
use std::env::var;
use std::time::Duration;

/// Submit a single S3 object to the intake webservice outside of
/// Lambda, printing the resulting response.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    submit::init()?;
    client::init().await?;

    let trigger = Trigger {
        bucket: var("BUCKET").context("BUCKET is required")?,
        key: var("KEY").context("KEY is required")?,
        event_name: String::new(),
    };
    let settings = &submit::current().settings;
    let transport = HttpTransport::new(
        Duration::from_secs(settings.ws_timeout),
        settings.ssl_verification_enabled(),
    )?;
    let clients = client::current();
    let services = submit::Services {
        store: &clients.s3,
        transport: &transport,
        mailer: &clients.ses,
    };

    let response = submit::current()
        .submit(&trigger, &services)
        .await
        .with_context(|| format!("Failed to submit {:?}", &trigger))?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.status_code != 200 {
        bail!("The webservice refused the file");
    }
    Ok(())
}
