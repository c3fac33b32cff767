//! In-memory stand-ins for the collaborators, and event fixtures.

use crate::client::ObjectStore;
use crate::mail::{Email, Mailer};
use crate::soap::{Reply, Transport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_lambda_events::event::s3::{S3Event, S3EventRecord};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// The JSON form of an S3 event record.
pub fn record_json(bucket: &str, key: &str, event_name: &str) -> Value {
    json!({
        "eventVersion": "2.1",
        "eventSource": "aws:s3",
        "awsRegion": "us-east-1",
        "eventTime": "2024-02-01T10:00:00.000Z",
        "eventName": event_name,
        "userIdentity": { "principalId": "EXAMPLE" },
        "requestParameters": { "sourceIPAddress": "127.0.0.1" },
        "responseElements": {
            "x-amz-request-id": "EXAMPLE123456789",
            "x-amz-id-2": "EXAMPLE123/5678abcdefghijklambdaisawesome/mnopqrstuvwxyzABCDEFGH"
        },
        "s3": {
            "s3SchemaVersion": "1.0",
            "configurationId": "testConfigRule",
            "bucket": {
                "name": bucket,
                "ownerIdentity": { "principalId": "EXAMPLE" },
                "arn": format!("arn:aws:s3:::{}", bucket)
            },
            "object": {
                "key": key,
                "size": 1024,
                "eTag": "0123456789abcdef0123456789abcdef",
                "sequencer": "0A1B2C3D4E5F678901"
            }
        }
    })
}

/// An S3 event record, as delivered by the notification service.
pub fn s3_record(bucket: &str, key: &str, event_name: &str) -> S3EventRecord {
    serde_json::from_value(record_json(bucket, key, event_name)).unwrap()
}

/// An S3 event holding one record per `(bucket, key, event name)`.
pub fn s3_event(records: &[(&str, &str, &str)]) -> S3Event {
    serde_json::from_value(json!({
        "Records": records
            .iter()
            .map(|(bucket, key, event_name)| record_json(bucket, key, event_name))
            .collect::<Vec<_>>()
    }))
    .unwrap()
}

/// Object store kept in memory, recording every call.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    fail_copies: bool,
    lose_copies: bool,
}

impl MemoryStore {
    /// A store where every copy fails.
    pub fn failing_copies() -> Self {
        Self {
            fail_copies: true,
            ..Default::default()
        }
    }

    /// A store where copies report success but leave nothing behind.
    pub fn losing_copies() -> Self {
        Self {
            lose_copies: true,
            ..Default::default()
        }
    }

    pub fn with_object(self, bucket: &str, key: &str, content: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), content.to_vec());
        self
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: {}/{}", bucket, key))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.record(format!("read {}/{}", bucket, key));
        self.get(bucket, key)
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<()> {
        self.record(format!("head {}/{}", bucket, key));
        self.get(bucket, key).map(|_| ())
    }

    async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
    ) -> Result<()> {
        self.record(format!(
            "copy {}/{} -> {}/{}",
            source_bucket, source_key, target_bucket, target_key
        ));
        if self.fail_copies {
            return Err(anyhow!("AccessDenied"));
        }
        let content = self.get(source_bucket, source_key)?;
        if !self.lose_copies {
            self.objects
                .lock()
                .unwrap()
                .insert((target_bucket.to_string(), target_key.to_string()), content);
        }
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.record(format!("delete {}/{}", bucket, key));
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// An email handed to a [`RecordingMailer`].
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub sender: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub email: Email,
}

/// Mailer that keeps what it was asked to send.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    fail: bool,
}

impl RecordingMailer {
    /// A mailer whose every send fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        sender: &str,
        to: &[String],
        cc: &[String],
        email: &Email,
    ) -> Result<String> {
        if self.fail {
            return Err(anyhow!("MessageRejected: Email address is not verified"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(SentEmail {
            sender: sender.to_string(),
            to: to.to_vec(),
            cc: cc.to_vec(),
            email: email.clone(),
        });
        Ok(format!("message-{}", sent.len()))
    }
}

/// Transport answering every request with the same reply, or failing
/// to connect when it has none.
#[derive(Default)]
pub struct CannedTransport {
    reply: Option<Reply>,
    requests: Mutex<Vec<(String, String)>>,
}

impl CannedTransport {
    pub fn replying(status: u16, body: &str) -> Self {
        Self {
            reply: Some(Reply {
                status,
                body: body.to_string(),
            }),
            ..Default::default()
        }
    }

    /// A transport whose every request times out.
    pub fn unreachable() -> Self {
        Self::default()
    }

    /// The `(url, envelope)` pairs posted so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for CannedTransport {
    async fn post(&self, url: &str, envelope: String) -> Result<Reply> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), envelope));
        self.reply
            .clone()
            .ok_or_else(|| anyhow!("operation timed out"))
    }
}
