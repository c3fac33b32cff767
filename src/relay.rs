//! Copies compressed exports from the source bucket into the folder
//! layout of the destination bucket, reporting failures by email.

use crate::client::ObjectStore;
use crate::conf::RelaySettings;
use crate::mail::Mailer;
use crate::notify::{failure_report, utc_timestamp, ErrorContext, Notifier};
use crate::response::Response;
use crate::trigger::{strip_suffix_ignore_case, Filter, Trigger};
use anyhow::{anyhow, Context, Result};
use aws_lambda_events::event::s3::S3Event;
use envy::from_env;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{error, info, instrument, warn};

/// Identity of the running function, attached to failure reports.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub function_name: String,
    pub function_version: String,
    pub request_id: String,
}

impl From<&lambda_runtime::Context> for Invocation {
    fn from(context: &lambda_runtime::Context) -> Self {
        Self {
            function_name: context.env_config.function_name.clone(),
            function_version: context.env_config.version.clone(),
            request_id: context.request_id.clone(),
        }
    }
}

/// The collaborators a relay talks to.
pub struct Services<'a> {
    pub store: &'a dyn ObjectStore,
    pub mailer: &'a dyn Mailer,
}

/// Kind of failure, as shown in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    PathStructure,
    SourceFileNotFound,
    CopyOperation,
    General,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorType::PathStructure => "PATH_STRUCTURE_ERROR",
            ErrorType::SourceFileNotFound => "SOURCE_FILE_NOT_FOUND",
            ErrorType::CopyOperation => "COPY_OPERATION_ERROR",
            ErrorType::General => "GENERAL_LAMBDA_ERROR",
        })
    }
}

/// What happened to a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Copied { destination_key: String },
    Skipped(String),
    Failed(ErrorType),
}

/// The copy relay handler, derived from its settings.
pub struct Relayer {
    /// The original settings.
    pub settings: RelaySettings,

    /// Decides which triggers are copied.
    pub filter: Filter,
}

impl Relayer {
    /// Initialize a Relayer instance given a settings struct.
    /// Consumes the settings struct.
    pub fn new(settings: RelaySettings) -> Self {
        let filter = Filter::new(&settings.key_suffix, &settings.source_prefix);
        Relayer { settings, filter }
    }

    /// The key a source object is copied to:
    /// `<destination prefix><STEM>/<filename>`.
    pub fn destination_key(&self, trigger: &Trigger) -> String {
        let filename = trigger.filename();
        let stem = strip_suffix_ignore_case(filename, &self.settings.key_suffix).unwrap_or(filename);
        format!(
            "{}{}/{}",
            self.settings.destination_prefix,
            stem.to_uppercase(),
            filename
        )
    }

    fn base_context(&self, invocation: &Invocation) -> ErrorContext {
        let mut context = ErrorContext::new();
        context.insert("function_name".into(), json!(invocation.function_name));
        context.insert("function_version".into(), json!(invocation.function_version));
        context.insert("request_id".into(), json!(invocation.request_id));
        context.insert("source_bucket".into(), json!(self.settings.source_bucket));
        context.insert(
            "destination_bucket".into(),
            json!(self.settings.destination_bucket),
        );
        context
    }

    /// Send a failure report; never fails.
    async fn report(
        &self,
        message: &str,
        error_type: ErrorType,
        mut context: ErrorContext,
        mailer: &dyn Mailer,
    ) -> bool {
        context.insert("error_type".into(), json!(error_type.to_string()));
        let email = failure_report(
            &self.settings.email_subject_prefix,
            message,
            &context,
            &utc_timestamp(),
        );
        let notifier = Notifier {
            mailer,
            sender: &self.settings.email_source,
            to: &self.settings.email_destination,
            cc: &[],
        };
        let sent = notifier.send(&email).await;
        info!(%error_type, sent, "Failure report handled");
        sent
    }

    /// Report a failure that aborts the whole invocation, attaching
    /// the payload, and hand the error back.
    async fn general_failure(
        &self,
        e: anyhow::Error,
        payload: Value,
        mut context: ErrorContext,
        mailer: &dyn Mailer,
    ) -> Result<Response> {
        let message = format!("Erro geral na execução da Lambda: {:#}", e);
        error!("{}", message);
        context.insert("event".into(), payload);
        self.report(&message, ErrorType::General, context, mailer)
            .await;
        Err(e)
    }

    /// Handle a raw invocation payload. Payloads that aren't S3
    /// events are reported and fail the invocation.
    pub async fn handle_payload(
        &self,
        payload: Value,
        invocation: &Invocation,
        services: &Services<'_>,
    ) -> Result<Response> {
        let decoded = S3Event::deserialize(&payload);
        match decoded {
            Ok(event) => self.handle(&event, invocation, services).await,
            Err(e) => {
                let e = anyhow::Error::new(e).context("Payload isn't an S3 event");
                self.general_failure(e, payload, self.base_context(invocation), services.mailer)
                    .await
            }
        }
    }

    /// Handle an invocation, copying every eligible record in
    /// order. Per-record failures are reported and skipped; a record
    /// that can't be decoded aborts the invocation after reporting.
    #[instrument(skip_all, fields(request_id = %invocation.request_id))]
    pub async fn handle(
        &self,
        event: &S3Event,
        invocation: &Invocation,
        services: &Services<'_>,
    ) -> Result<Response> {
        let context = self.base_context(invocation);
        info!(
            source_bucket = %self.settings.source_bucket,
            destination_bucket = %self.settings.destination_bucket,
            records = event.records.len(),
            "Starting copy relay"
        );

        for record in &event.records {
            let trigger = match Trigger::from_record(record) {
                Ok(trigger) => trigger,
                Err(e) => {
                    let payload = serde_json::to_value(event).unwrap_or(Value::Null);
                    return self
                        .general_failure(e, payload, context, services.mailer)
                        .await;
                }
            };
            self.relay(&trigger, &context, services).await;
        }

        info!("Copy relay finished");
        Response::json(
            200,
            &json!({
                "message": "Processamento concluído com sucesso",
                "processed_files": event.records.len()
            }),
        )
    }

    /// Copy a single object, if eligible.
    #[instrument(skip(self, context, services))]
    pub async fn relay(
        &self,
        trigger: &Trigger,
        context: &ErrorContext,
        services: &Services<'_>,
    ) -> Outcome {
        if trigger.bucket != self.settings.source_bucket {
            warn!(
                "Bucket {} isn't the expected {}; ignored",
                trigger.bucket, self.settings.source_bucket
            );
            return Outcome::Skipped(format!("bucket {}", trigger.bucket));
        }
        if let Err(skip) = self.filter.check(trigger) {
            info!("Object {} ignored: {}", trigger.key, skip);
            return Outcome::Skipped(skip.to_string());
        }
        let mut context = context.clone();
        context.insert("object_key".into(), json!(trigger.key));

        if trigger.key.split('/').count() < 2 {
            let message = format!("Estrutura de path inválida: {}", trigger.key);
            warn!("{}", message);
            self.report(&message, ErrorType::PathStructure, context, services.mailer)
                .await;
            return Outcome::Failed(ErrorType::PathStructure);
        }

        let destination_key = self.destination_key(trigger);
        info!(
            "Copying s3://{}/{} to s3://{}/{}",
            trigger.bucket, trigger.key, self.settings.destination_bucket, destination_key
        );

        if let Err(e) = services.store.head(&trigger.bucket, &trigger.key).await {
            let message = format!("Erro ao verificar arquivo de origem: {:#}", e);
            error!("{}", message);
            self.report(
                &message,
                ErrorType::SourceFileNotFound,
                context,
                services.mailer,
            )
            .await;
            return Outcome::Failed(ErrorType::SourceFileNotFound);
        }

        if let Err(e) = self.copy(trigger, &destination_key, services.store).await {
            let message = format!("Erro ao copiar arquivo: {:#}", e);
            error!("{}", message);
            context.insert("destination_key".into(), json!(destination_key));
            self.report(&message, ErrorType::CopyOperation, context, services.mailer)
                .await;
            return Outcome::Failed(ErrorType::CopyOperation);
        }

        info!("Copy verified at s3://{}/{}", self.settings.destination_bucket, destination_key);
        Outcome::Copied { destination_key }
    }

    /// Copy, then confirm the copy exists.
    async fn copy(&self, trigger: &Trigger, destination_key: &str, store: &dyn ObjectStore) -> Result<()> {
        let destination_bucket = &self.settings.destination_bucket;
        store
            .copy(&trigger.bucket, &trigger.key, destination_bucket, destination_key)
            .await?;
        store
            .head(destination_bucket, destination_key)
            .await
            .context("Copied object is missing from the destination")?;
        Ok(())
    }
}

/// Global Relayer instance.
static CURRENT: OnceCell<Relayer> = OnceCell::new();

/// Initialize the global Relayer instance from the environment.
pub fn init() -> Result<()> {
    let settings = from_env().context("Invalid copy relay settings")?;
    CURRENT
        .set(Relayer::new(settings))
        .map_err(|_| anyhow!("relay::CURRENT was already initialized"))
}

/// Get the current Relayer instance, or panic if it hasn't been
/// initialized.
pub fn current() -> &'static Relayer {
    CURRENT.get().expect("relayer is not initialized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{s3_event, MemoryStore, RecordingMailer};

    const SOURCE: &str = "exports";
    const DESTINATION: &str = "integration";

    fn relayer() -> Relayer {
        Relayer::new(
            serde_json::from_value(json!({
                "source_bucket": SOURCE,
                "destination_bucket": DESTINATION,
                "email_source": "no-reply@example.com",
                "email_destination": ["ops@example.com"]
            }))
            .unwrap(),
        )
    }

    fn invocation() -> Invocation {
        Invocation {
            function_name: String::from("copy-relay"),
            function_version: String::from("$LATEST"),
            request_id: String::from("req-1"),
        }
    }

    fn trigger(key: &str) -> Trigger {
        Trigger {
            bucket: String::from(SOURCE),
            key: key.to_string(),
            event_name: String::from("ObjectCreated:Put"),
        }
    }

    #[test]
    fn destination_key_uses_the_uppercased_stem() {
        assert_eq!(
            relayer().destination_key(&trigger("voxis/beneficiarios_ativos.csv.gz")),
            "voxis/VIEWS_VOXIS_SAUDI_UNIMED_FERJ_SCHEMA/BENEFICIARIOS_ATIVOS/beneficiarios_ativos.csv.gz"
        );
        assert_eq!(
            relayer().destination_key(&trigger("voxis/sub/Contratos.CSV.GZ")),
            "voxis/VIEWS_VOXIS_SAUDI_UNIMED_FERJ_SCHEMA/CONTRATOS/Contratos.CSV.GZ"
        );
    }

    #[tokio::test]
    async fn copies_every_record_without_mail() {
        let store = MemoryStore::default()
            .with_object(SOURCE, "voxis/contratos.csv.gz", b"a")
            .with_object(SOURCE, "voxis/beneficiarios.csv.gz", b"b");
        let mailer = RecordingMailer::default();
        let event = s3_event(&[
            (SOURCE, "voxis/contratos.csv.gz", "ObjectCreated:Put"),
            (SOURCE, "voxis/beneficiarios.csv.gz", "ObjectCreated:CompleteMultipartUpload"),
        ]);
        let services = Services {
            store: &store,
            mailer: &mailer,
        };

        let response = relayer()
            .handle(&event, &invocation(), &services)
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        let body: Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["processed_files"], 2);
        assert_eq!(body["message"], "Processamento concluído com sucesso");
        assert!(store.contains(
            DESTINATION,
            "voxis/VIEWS_VOXIS_SAUDI_UNIMED_FERJ_SCHEMA/CONTRATOS/contratos.csv.gz"
        ));
        assert!(store.contains(
            DESTINATION,
            "voxis/VIEWS_VOXIS_SAUDI_UNIMED_FERJ_SCHEMA/BENEFICIARIOS/beneficiarios.csv.gz"
        ));
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn ineligible_records_are_skipped_silently() {
        let store = MemoryStore::default();
        let mailer = RecordingMailer::default();
        let event = s3_event(&[
            (SOURCE, "outros/contratos.csv.gz", "ObjectCreated:Put"),
            (SOURCE, "voxis/contratos.csv", "ObjectCreated:Put"),
            (SOURCE, "voxis/contratos.csv.gz", "ObjectRemoved:Delete"),
            ("someone-else", "voxis/contratos.csv.gz", "ObjectCreated:Put"),
        ]);
        let services = Services {
            store: &store,
            mailer: &mailer,
        };

        let response = relayer()
            .handle(&event, &invocation(), &services)
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert!(store.calls().is_empty());
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_source_is_reported_and_the_batch_goes_on() {
        let store = MemoryStore::default().with_object(SOURCE, "voxis/presente.csv.gz", b"a");
        let mailer = RecordingMailer::default();
        let event = s3_event(&[
            (SOURCE, "voxis/ausente.csv.gz", "ObjectCreated:Put"),
            (SOURCE, "voxis/presente.csv.gz", "ObjectCreated:Put"),
        ]);
        let services = Services {
            store: &store,
            mailer: &mailer,
        };

        let response = relayer()
            .handle(&event, &invocation(), &services)
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert!(store.contains(
            DESTINATION,
            "voxis/VIEWS_VOXIS_SAUDI_UNIMED_FERJ_SCHEMA/PRESENTE/presente.csv.gz"
        ));
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec![String::from("ops@example.com")]);
        assert!(sent[0]
            .email
            .text
            .contains("\"error_type\": \"SOURCE_FILE_NOT_FOUND\""));
        assert!(sent[0]
            .email
            .text
            .contains("\"object_key\": \"voxis/ausente.csv.gz\""));
        assert!(sent[0].email.text.contains("Lambda Function: copy-relay"));
    }

    #[tokio::test]
    async fn failed_copies_are_reported() {
        let store = MemoryStore::failing_copies().with_object(SOURCE, "voxis/contratos.csv.gz", b"a");
        let mailer = RecordingMailer::default();
        let services = Services {
            store: &store,
            mailer: &mailer,
        };

        let outcome = relayer()
            .relay(&trigger("voxis/contratos.csv.gz"), &ErrorContext::new(), &services)
            .await;

        assert_eq!(outcome, Outcome::Failed(ErrorType::CopyOperation));
        let text = &mailer.sent()[0].email.text;
        assert!(text.contains("Erro ao copiar arquivo"));
        assert!(text.contains("COPY_OPERATION_ERROR"));
        assert!(text.contains("CONTRATOS/contratos.csv.gz"));
    }

    #[tokio::test]
    async fn unverified_copies_are_reported() {
        let store = MemoryStore::losing_copies().with_object(SOURCE, "voxis/contratos.csv.gz", b"a");
        let mailer = RecordingMailer::default();
        let services = Services {
            store: &store,
            mailer: &mailer,
        };

        let outcome = relayer()
            .relay(&trigger("voxis/contratos.csv.gz"), &ErrorContext::new(), &services)
            .await;

        assert_eq!(outcome, Outcome::Failed(ErrorType::CopyOperation));
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn keys_without_folders_are_reported() {
        let mut relayer = relayer();
        relayer.settings.source_prefix = String::new();
        relayer.filter = Filter::new(&relayer.settings.key_suffix, "");
        let store = MemoryStore::default();
        let mailer = RecordingMailer::default();
        let services = Services {
            store: &store,
            mailer: &mailer,
        };

        let outcome = relayer
            .relay(&trigger("contratos.csv.gz"), &ErrorContext::new(), &services)
            .await;

        assert_eq!(outcome, Outcome::Failed(ErrorType::PathStructure));
        assert!(store.calls().is_empty());
        assert!(mailer.sent()[0].email.text.contains("PATH_STRUCTURE_ERROR"));
    }

    #[tokio::test]
    async fn undecodable_records_fail_the_invocation() {
        let store = MemoryStore::default().with_object(SOURCE, "voxis/contratos.csv.gz", b"a");
        let mailer = RecordingMailer::default();
        let mut event = s3_event(&[
            (SOURCE, "voxis/contratos.csv.gz", "ObjectCreated:Put"),
            (SOURCE, "voxis/outro.csv.gz", "ObjectCreated:Put"),
        ]);
        event.records[1].s3.object.key = None;
        let services = Services {
            store: &store,
            mailer: &mailer,
        };

        let result = relayer().handle(&event, &invocation(), &services).await;

        assert!(result.is_err());
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].email.text.contains("GENERAL_LAMBDA_ERROR"));
        assert!(sent[0].email.text.contains("\"event\""));
        assert!(sent[0].email.text.contains("Erro geral na execução da Lambda"));
    }

    #[tokio::test]
    async fn payloads_that_are_not_s3_events_are_reported() {
        let store = MemoryStore::default();
        let mailer = RecordingMailer::default();
        let services = Services {
            store: &store,
            mailer: &mailer,
        };

        let result = relayer()
            .handle_payload(json!("ping"), &invocation(), &services)
            .await;

        assert!(result.is_err());
        assert!(store.calls().is_empty());
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].email.text.contains("GENERAL_LAMBDA_ERROR"));
        assert!(sent[0].email.text.contains("Payload isn't an S3 event"));
        assert!(sent[0].email.text.contains("\"event\": \"ping\""));
        assert!(sent[0].email.text.contains("\"request_id\": \"req-1\""));
    }

    #[tokio::test]
    async fn s3_payloads_are_relayed() {
        let store = MemoryStore::default().with_object(SOURCE, "voxis/contratos.csv.gz", b"a");
        let mailer = RecordingMailer::default();
        let services = Services {
            store: &store,
            mailer: &mailer,
        };
        let payload = json!({
            "Records": [crate::testing::record_json(SOURCE, "voxis/contratos.csv.gz", "ObjectCreated:Put")]
        });

        let response = relayer()
            .handle_payload(payload, &invocation(), &services)
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert!(mailer.sent().is_empty());
        assert!(store.contains(
            DESTINATION,
            "voxis/VIEWS_VOXIS_SAUDI_UNIMED_FERJ_SCHEMA/CONTRATOS/contratos.csv.gz"
        ));
    }
}
