//! Defines configuration as read from the environment.

use aws_config::{from_env, SdkConfig};
use aws_sdk_s3::config::Region;
use serde::{Deserialize, Deserializer};
use std::env;

/// Reads a toggle: `true` (in any case) turns it on, anything else
/// leaves it off.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = String::deserialize(deserializer)?;
    Ok(value.trim().eq_ignore_ascii_case("true"))
}

/// Reads a comma-separated address list, trimming each entry and
/// dropping empty ones.
fn address_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let values = Vec::<String>::deserialize(deserializer)?;
    Ok(values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(String::from)
        .collect())
}

/// Default `service_id` value.
fn default_service_id() -> String {
    String::from("BNFC")
}

/// Default `file_type` value.
fn default_file_type() -> String {
    String::from("CSV")
}

/// Default `ws_timeout` value, in seconds.
fn default_ws_timeout() -> u64 {
    550
}

/// Default `verify_ssl` value.
fn default_verify_ssl() -> String {
    String::from("1")
}

/// Default `key_suffix` value for the SOAP submission.
fn default_submit_key_suffix() -> String {
    String::from(".csv")
}

/// Default `processed_path` value.
fn default_processed_path() -> String {
    String::from("processados/")
}

/// Default `error_path` value.
fn default_error_path() -> String {
    String::from("erros/")
}

/// Default `source_prefix` value.
fn default_source_prefix() -> String {
    String::from("voxis/")
}

/// Default `key_suffix` value for the copy relay.
fn default_relay_key_suffix() -> String {
    String::from(".csv.gz")
}

/// Default `destination_prefix` value.
fn default_destination_prefix() -> String {
    String::from("voxis/VIEWS_VOXIS_SAUDI_UNIMED_FERJ_SCHEMA/")
}

/// Default `email_subject_prefix` value.
fn default_email_subject_prefix() -> String {
    String::from("[LAMBDA ERROR] Falha na cópia de arquivos S3")
}

/// The SOAP submission reads CSV files from S3, sends them to the
/// intake webservice and reports the outcome by email. The
/// configuration must be given as environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitSettings {
    /// The SOAP endpoint receiving the files.
    pub ws_url: String,

    /// Login sent in the envelope.
    pub ws_login: String,

    /// Password sent in the envelope, base64-encoded on the way out.
    pub ws_password: String,

    /// The client code assigned by the webservice operator.
    pub client_code: String,

    /// Service identifier sent in the envelope.
    #[serde(default = "default_service_id")]
    pub service_id: String,

    /// File type declared in the envelope.
    #[serde(default = "default_file_type")]
    pub file_type: String,

    /// Request timeout for the whole POST, in seconds.
    #[serde(default = "default_ws_timeout")]
    pub ws_timeout: u64,

    /// Set to `"0"` to skip TLS certificate and hostname checks.
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: String,

    /// Only keys ending with this suffix (ignoring ASCII case) are
    /// submitted.
    #[serde(default = "default_submit_key_suffix")]
    pub key_suffix: String,

    /// Only keys under this prefix are submitted. Empty matches
    /// everything.
    #[serde(default)]
    pub key_prefix: String,

    /// Copy the object under `processed_path` after the webservice
    /// accepts it. Only `true` turns it on.
    #[serde(default, deserialize_with = "flag")]
    pub move_processed: bool,

    /// Key prefix processed files are copied under.
    #[serde(default = "default_processed_path")]
    pub processed_path: String,

    /// Delete the original object once it's been copied under
    /// `processed_path`. Only `true` turns it on.
    #[serde(default, deserialize_with = "flag")]
    pub delete_original: bool,

    /// Copy the object under `error_path` when the webservice rejects
    /// the request. Only `true` turns it on.
    #[serde(default, deserialize_with = "flag")]
    pub move_failed: bool,

    /// Key prefix rejected files are copied under.
    #[serde(default = "default_error_path")]
    pub error_path: String,

    /// Verified SES identity the reports are sent from.
    pub email_sender: String,

    /// Comma-separated list of recipients.
    #[serde(deserialize_with = "address_list")]
    pub email_recipients: Vec<String>,

    /// Comma-separated list of carbon-copy recipients.
    #[serde(default, deserialize_with = "address_list")]
    pub email_cc: Vec<String>,
}

impl SubmitSettings {
    /// Whether TLS certificates of the endpoint must be verified.
    pub fn ssl_verification_enabled(&self) -> bool {
        self.verify_ssl != "0"
    }
}

/// The copy relay moves compressed CSV exports from one bucket into
/// the folder layout expected by the integration bucket, and reports
/// failures by email.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    /// Events from any other bucket are ignored.
    pub source_bucket: String,

    /// Bucket the exports are copied into.
    pub destination_bucket: String,

    /// Only keys under this prefix are copied.
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,

    /// Only keys ending with this suffix (ignoring ASCII case) are
    /// copied.
    #[serde(default = "default_relay_key_suffix")]
    pub key_suffix: String,

    /// Copied objects land under
    /// `<destination_prefix><STEM>/<filename>`.
    #[serde(default = "default_destination_prefix")]
    pub destination_prefix: String,

    /// Verified SES identity the reports are sent from.
    pub email_source: String,

    /// Comma-separated list of recipients.
    #[serde(deserialize_with = "address_list")]
    pub email_destination: Vec<String>,

    /// Subject of failure reports, followed by the timestamp.
    #[serde(default = "default_email_subject_prefix")]
    pub email_subject_prefix: String,
}

/// Load the shared AWS configuration, honoring an `AWS_ENDPOINT_URL`
/// override (useful against local S3/SES emulators).
pub async fn aws_service_config() -> SdkConfig {
    if let Ok(endpoint_url) = env::var("AWS_ENDPOINT_URL") {
        from_env()
            .endpoint_url(
                if endpoint_url.starts_with("http://") || endpoint_url.starts_with("https://") {
                    endpoint_url
                } else {
                    format!("https://{}", endpoint_url)
                },
            )
            .region(Region::new("us-east-1")) // should be OK since the endpoint was overridden
            .load()
            .await
    } else {
        from_env().load().await
    }
}
