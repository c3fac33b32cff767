//! Defines a _trigger_, the input for the handling of an event. The
//! trigger is built from an S3 event record, and checked against a
//! [`Filter`] before anything else happens.

use anyhow::{Context, Result};
use aws_lambda_events::event::s3::S3EventRecord;
use std::fmt;

/// Prefix shared by every object-creation event name
/// (`ObjectCreated:Put`, `ObjectCreated:Copy`, ...).
const OBJECT_CREATED: &str = "ObjectCreated";

/// The decoded contents of a single S3 event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub bucket: String,
    pub key: String,
    pub event_name: String,
}

impl Trigger {
    /// Builds a trigger from an S3 event record, decoding the object
    /// key.
    pub fn from_record(record: &S3EventRecord) -> Result<Self> {
        let bucket = record
            .s3
            .bucket
            .name
            .clone()
            .context("S3 event record carries no bucket name")?;
        let raw_key = record
            .s3
            .object
            .key
            .as_deref()
            .context("S3 event record carries no object key")?;
        Ok(Self {
            bucket,
            key: decode_key(raw_key)?,
            event_name: record.event_name.clone().unwrap_or_default(),
        })
    }

    /// The last segment of the key.
    pub fn filename(&self) -> &str {
        filename(&self.key)
    }
}

/// Decodes an object key the way S3 encodes it in event
/// notifications: spaces as `+`, everything else percent-encoded.
pub fn decode_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    Ok(urlencoding::decode(&spaced)
        .with_context(|| format!("Object key {:?} isn't valid UTF-8 once decoded", raw))?
        .into_owned())
}

/// The last segment of an object key.
pub fn filename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Whether `value` ends with `suffix`, ignoring ASCII case.
pub fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    strip_suffix_ignore_case(value, suffix).is_some()
}

/// Removes `suffix` from the end of `value`, ignoring ASCII case.
pub fn strip_suffix_ignore_case<'a>(value: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = value.len().checked_sub(suffix.len())?;
    if value.is_char_boundary(cut) && value[cut..].eq_ignore_ascii_case(suffix) {
        Some(&value[..cut])
    } else {
        None
    }
}

/// Why a trigger was not eligible for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// The key doesn't end with the expected suffix.
    Suffix(String),
    /// The event isn't an object creation.
    EventType(String),
    /// The key isn't under the expected prefix.
    Prefix(String),
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Suffix(suffix) => write!(
                f,
                "não é {}",
                suffix.trim_start_matches('.').to_uppercase()
            ),
            Skip::EventType(event_name) => {
                write!(f, "evento {} não é de criação de objeto", event_name)
            }
            Skip::Prefix(prefix) => write!(f, "fora do caminho {}", prefix),
        }
    }
}

/// Eligibility rules for triggers.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Required key suffix, compared ignoring ASCII case.
    pub suffix: String,
    /// Required key prefix. Empty matches every key.
    pub prefix: String,
}

impl Filter {
    pub fn new(suffix: &str, prefix: &str) -> Self {
        Self {
            suffix: suffix.to_string(),
            prefix: prefix.to_string(),
        }
    }

    /// Checks the suffix, the event type and the prefix, in that
    /// order, returning the first mismatch.
    pub fn check(&self, trigger: &Trigger) -> Result<(), Skip> {
        if !ends_with_ignore_case(&trigger.key, &self.suffix) {
            return Err(Skip::Suffix(self.suffix.clone()));
        }
        if !trigger.event_name.starts_with(OBJECT_CREATED) {
            return Err(Skip::EventType(trigger.event_name.clone()));
        }
        if !trigger.key.starts_with(&self.prefix) {
            return Err(Skip::Prefix(self.prefix.clone()));
        }
        Ok(())
    }
}
