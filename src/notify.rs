//! Renders the report emails and sends them on a best-effort basis.

use crate::interpret::{ParsedResult, NOT_AVAILABLE};
use crate::mail::{Email, Mailer};
use crate::trigger::filename;
use chrono::{Local, Utc};
use itertools::Itertools;
use quick_xml::escape::escape;
use serde_json::{Map, Value};
use tracing::{error, info};

/// Diagnostic fields attached to failure reports, kept in insertion
/// order.
pub type ErrorContext = Map<String, Value>;

/// Color scheme of a report, depending on its outcome.
struct Palette {
    label: &'static str,
    class: &'static str,
    color: &'static str,
    background: &'static str,
}

const ERROR_PALETTE: Palette = Palette {
    label: "ERRO",
    class: "error",
    color: "#D8000C",
    background: "#FFBABA",
};

const SUCCESS_PALETTE: Palette = Palette {
    label: "SUCESSO",
    class: "success",
    color: "#4F8A10",
    background: "#DFF2BF",
};

const STYLE: &str = "body { font-family: Arial, sans-serif; }
            table { border-collapse: collapse; width: 100%; }
            th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }
            th { background-color: #f2f2f2; }";

/// Timestamp shown in submission reports.
pub fn local_timestamp() -> String {
    Local::now().format("%d/%m/%Y %H:%M:%S").to_string()
}

/// Timestamp shown in failure reports.
pub fn utc_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn html_rows(rows: &[(&str, String)]) -> String {
    rows.iter()
        .map(|(item, value)| {
            format!(
                "<tr><td>{}</td><td>{}</td></tr>",
                escape(*item),
                escape(value.as_str())
            )
        })
        .join("\n")
}

/// Renders the report of a file submission.
pub fn submission_report(
    key: &str,
    result: &ParsedResult,
    is_error: bool,
    timestamp: &str,
) -> Email {
    let palette = if is_error {
        &ERROR_PALETTE
    } else {
        &SUCCESS_PALETTE
    };
    let name = filename(key);
    let count = |value: &Option<String>| {
        value
            .clone()
            .unwrap_or_else(|| String::from(NOT_AVAILABLE))
    };
    let rows = [
        ("Nome do arquivo", name.to_string()),
        ("Protocolo", result.protocol.clone()),
        ("Total de Registros", count(&result.total_rows)),
        ("Linhas Aceitas", count(&result.accepted_rows)),
        ("Linhas Rejeitadas", count(&result.rejected_rows)),
        ("Data e Hora", timestamp.to_string()),
    ];
    let title = format!(
        "Notificação de {} - Envio de Arquivo para SAUDI/VOXIS",
        palette.label
    );

    let html = format!(
        r#"<html>
    <head>
        <style>
            {style}
            .{class} {{ color: {color}; background-color: {background}; padding: 10px; border-radius: 5px; }}
        </style>
    </head>
    <body>
        <h2>{title}</h2>
        <div class="{class}">
            <p><strong>Mensagem:</strong> {message}</p>
        </div>
        <h3>Detalhes do Processamento:</h3>
        <table>
            <tr><th>Item</th><th>Valor</th></tr>
            {rows}
        </table>
        <h3>Resposta Completa:</h3>
        <pre>{raw}</pre>
        <p>Este é um email automático. Por favor, não responda.</p>
    </body>
</html>
"#,
        style = STYLE,
        class = palette.class,
        color = palette.color,
        background = palette.background,
        title = escape(title.as_str()),
        message = escape(result.message.as_str()),
        rows = html_rows(&rows),
        raw = escape(result.raw_response.as_str()),
    );

    let text = format!(
        "{title}\n\nMensagem: {message}\n\nDetalhes do Processamento:\n{rows}\n\n\
         Resposta Completa:\n{raw}\n\nEste é um email automático. Por favor, não responda.\n",
        title = title,
        message = result.message,
        rows = rows
            .iter()
            .map(|(item, value)| format!("- {}: {}", item, value))
            .join("\n"),
        raw = result.raw_response,
    );

    Email {
        subject: format!(
            "{} no processamento do arquivo {} - Protocolo: {}",
            palette.label, name, result.protocol
        ),
        text,
        html,
    }
}

/// Renders the report of a failed copy.
pub fn failure_report(
    subject_prefix: &str,
    message: &str,
    context: &ErrorContext,
    timestamp: &str,
) -> Email {
    let function_name = context
        .get("function_name")
        .and_then(Value::as_str)
        .unwrap_or(NOT_AVAILABLE);
    let details = serde_json::to_string_pretty(context).unwrap_or_else(|_| format!("{:?}", context));
    let rows = context
        .iter()
        .map(|(field, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (field.as_str(), value)
        })
        .collect::<Vec<_>>();

    let text = format!(
        "ERRO DETECTADO NA LAMBDA DE CÓPIA S3\n\n\
         Timestamp: {timestamp}\n\
         Lambda Function: {function_name}\n\n\
         DETALHES DO ERRO:\n{message}\n\n\
         INFORMAÇÕES ADICIONAIS:\n{details}\n\n\
         Este é um email automático gerado pela função Lambda.\n\
         Por favor, verifique os logs do CloudWatch para mais detalhes.\n"
    );

    let html = format!(
        r#"<html>
    <head>
        <style>
            {style}
            .{class} {{ color: {color}; background-color: {background}; padding: 10px; border-radius: 5px; }}
        </style>
    </head>
    <body>
        <h2>Erro detectado na Lambda de cópia S3</h2>
        <div class="{class}">
            <p><strong>Detalhes do erro:</strong> {message}</p>
        </div>
        <table>
            <tr><th>Item</th><th>Valor</th></tr>
            {rows}
        </table>
        <p>Este é um email automático gerado pela função Lambda. Por favor, verifique os logs do CloudWatch para mais detalhes.</p>
    </body>
</html>
"#,
        style = STYLE,
        class = ERROR_PALETTE.class,
        color = ERROR_PALETTE.color,
        background = ERROR_PALETTE.background,
        message = escape(message),
        rows = html_rows(
            &[
                vec![
                    ("Timestamp", timestamp.to_string()),
                    ("Lambda Function", function_name.to_string()),
                ],
                rows
            ]
            .concat()
        ),
    );

    Email {
        subject: format!("{} - {}", subject_prefix, timestamp),
        text,
        html,
    }
}

/// Sends report emails to a fixed audience. Failures are logged and
/// never propagated.
pub struct Notifier<'a> {
    pub mailer: &'a dyn Mailer,
    pub sender: &'a str,
    pub to: &'a [String],
    pub cc: &'a [String],
}

impl Notifier<'_> {
    /// Sends the email, returning whether it went out.
    pub async fn send(&self, email: &Email) -> bool {
        match self.mailer.send(self.sender, self.to, self.cc, email).await {
            Ok(message_id) => {
                info!(%message_id, subject = %email.subject, "Notification email sent");
                true
            }
            Err(e) => {
                error!(
                    sender = %self.sender,
                    recipients = %self.to.iter().join(","),
                    "Failed to send notification email: {:?}",
                    e
                );
                false
            }
        }
    }
}
