//! Submits CSV files dropped in S3 to the intake webservice, and
//! reports every outcome by email.

use crate::client::ObjectStore;
use crate::conf::SubmitSettings;
use crate::interpret::{accepted, interpret, ParsedResult, Status};
use crate::mail::Mailer;
use crate::notify::{local_timestamp, submission_report, Notifier};
use crate::response::Response;
use crate::soap::{Submission, Transport};
use crate::trigger::{Filter, Trigger};
use anyhow::{anyhow, Context, Result};
use aws_lambda_events::event::s3::S3Event;
use envy::from_env;
use once_cell::sync::OnceCell;
use serde_json::json;
use tracing::{error, info, instrument, warn};

/// Stand-in for the file name when the event doesn't even carry one.
const UNKNOWN_FILE: &str = "unknown_file";

/// The collaborators a submission talks to.
pub struct Services<'a> {
    pub store: &'a dyn ObjectStore,
    pub transport: &'a dyn Transport,
    pub mailer: &'a dyn Mailer,
}

/// The SOAP submission handler, derived from its settings.
pub struct Submitter {
    /// The original settings.
    pub settings: SubmitSettings,

    /// Decides which triggers are submitted.
    pub filter: Filter,
}

impl Submitter {
    /// Initialize a Submitter instance given a settings
    /// struct. Consumes the settings struct.
    pub fn new(settings: SubmitSettings) -> Self {
        let filter = Filter::new(&settings.key_suffix, &settings.key_prefix);
        Submitter { settings, filter }
    }

    fn notifier<'a>(&'a self, mailer: &'a dyn Mailer) -> Notifier<'a> {
        Notifier {
            mailer,
            sender: &self.settings.email_sender,
            to: &self.settings.email_recipients,
            cc: &self.settings.email_cc,
        }
    }

    /// Handle an invocation. Only the first record of the event is
    /// considered. Every failure ends up in the returned response.
    #[instrument(skip_all)]
    pub async fn handle(&self, event: &S3Event, services: &Services<'_>) -> Response {
        let first = event.records.first();
        let trigger = match first
            .context("S3 event carries no records")
            .and_then(Trigger::from_record)
        {
            Ok(trigger) => trigger,
            Err(e) => {
                let key = first
                    .and_then(|record| record.s3.object.key.clone())
                    .unwrap_or_else(|| String::from(UNKNOWN_FILE));
                return self.general_failure(&key, e, services).await;
            }
        };
        info!(bucket = %trigger.bucket, key = %trigger.key, "Processing file");

        if let Err(skip) = self.filter.check(&trigger) {
            info!(key = %trigger.key, "Skipping file: {}", skip);
            return Response::text(200, &format!("Arquivo ignorado: {}", skip));
        }

        match self.submit(&trigger, services).await {
            Ok(response) => response,
            Err(e) => self.general_failure(&trigger.key, e, services).await,
        }
    }

    /// Send the triggering object to the webservice, bypassing the
    /// eligibility checks.
    #[instrument(skip(self, services))]
    pub async fn submit(&self, trigger: &Trigger, services: &Services<'_>) -> Result<Response> {
        let content = services.store.read(&trigger.bucket, &trigger.key).await?;
        let envelope = Submission {
            login: &self.settings.ws_login,
            password: &self.settings.ws_password,
            client_code: &self.settings.client_code,
            service_id: &self.settings.service_id,
            file_type: &self.settings.file_type,
            filename: trigger.filename(),
            content: &content,
        }
        .envelope();
        let reply = services
            .transport
            .post(&self.settings.ws_url, envelope)
            .await?;
        let result = interpret(reply.status, &reply.body);
        let notifier = self.notifier(services.mailer);

        if accepted(reply.status) {
            info!(
                status = ?result.status,
                protocol = %result.protocol,
                "Webservice took the file: {}",
                result.message
            );
            let email = submission_report(
                &trigger.key,
                &result,
                result.status.is_error(),
                &local_timestamp(),
            );
            notifier.send(&email).await;
            if self.settings.move_processed {
                self.relocate(trigger, &self.settings.processed_path, services.store)
                    .await?;
                if self.settings.delete_original {
                    services
                        .store
                        .delete(&trigger.bucket, &trigger.key)
                        .await?;
                    info!(key = %trigger.key, "Deleted original object");
                }
            }
            Response::json(200, &result)
        } else {
            warn!(
                status = reply.status,
                "Webservice refused the request: {}", result.message
            );
            let email = submission_report(&trigger.key, &result, true, &local_timestamp());
            notifier.send(&email).await;
            if self.settings.move_failed {
                self.relocate(trigger, &self.settings.error_path, services.store)
                    .await?;
            }
            Response::json(500, &result)
        }
    }

    /// Copy the triggering object under another prefix of its bucket.
    async fn relocate(&self, trigger: &Trigger, prefix: &str, store: &dyn ObjectStore) -> Result<()> {
        let target_key = format!("{}{}", prefix, trigger.filename());
        store
            .copy(&trigger.bucket, &trigger.key, &trigger.bucket, &target_key)
            .await?;
        info!(key = %trigger.key, target_key = %target_key, "Copied object");
        Ok(())
    }

    /// Report an unexpected failure, and turn it into a response.
    async fn general_failure(
        &self,
        key: &str,
        e: anyhow::Error,
        services: &Services<'_>,
    ) -> Response {
        error!("Failed to submit {:?}: {:?}", key, e);
        let message = format!("{:#}", e);
        let result = ParsedResult::failure(message.clone(), "Exceção não tratada");
        let email = submission_report(key, &result, true, &local_timestamp());
        self.notifier(services.mailer).send(&email).await;
        let body = json!({ "status": Status::Error, "mensagem": message });
        Response::json(500, &body).unwrap_or_else(|_| Response::text(500, &message))
    }
}

/// Global Submitter instance.
static CURRENT: OnceCell<Submitter> = OnceCell::new();

/// Initialize the global Submitter instance from the environment.
pub fn init() -> Result<()> {
    let settings = from_env().context("Invalid SOAP submission settings")?;
    CURRENT
        .set(Submitter::new(settings))
        .map_err(|_| anyhow!("submit::CURRENT was already initialized"))
}

/// Get the current Submitter instance, or panic if it hasn't been
/// initialized.
pub fn current() -> &'static Submitter {
    CURRENT.get().expect("submitter is not initialized")
}
