//! Defines the outgoing email operation, backed by SES.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};

const CHARSET: &str = "UTF-8";

/// A rendered email, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Sends emails. Returns the provider's message id.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        sender: &str,
        to: &[String],
        cc: &[String],
        email: &Email,
    ) -> Result<String>;
}

fn content(data: &str) -> Content {
    Content::builder().data(data).charset(CHARSET).build()
}

#[async_trait]
impl Mailer for aws_sdk_sesv2::Client {
    async fn send(
        &self,
        sender: &str,
        to: &[String],
        cc: &[String],
        email: &Email,
    ) -> Result<String> {
        let destination = Destination::builder()
            .set_to_addresses(Some(to.to_vec()))
            .set_cc_addresses(if cc.is_empty() {
                None
            } else {
                Some(cc.to_vec())
            })
            .build();
        let message = Message::builder()
            .subject(content(&email.subject))
            .body(
                Body::builder()
                    .text(content(&email.text))
                    .html(content(&email.html))
                    .build(),
            )
            .build();
        let output = self
            .send_email()
            .from_email_address(sender)
            .destination(destination)
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .with_context(|| format!("Failed to send email {:?} from {:?}", email.subject, sender))?;
        Ok(output.message_id().unwrap_or_default().to_string())
    }
}
