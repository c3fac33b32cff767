//! Builds the file submission envelope and posts it to the intake
//! webservice.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use quick_xml::escape::escape;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{info, instrument};

/// SOAP 1.1 envelope namespace.
pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Namespace of the intake webservice endpoints.
pub const SERVICE_NS: &str = "http://endpoints.webservice.integration.saudi.acol.com/";

/// The parameters of a `transmitirArquivoOperadora` call.
#[derive(Debug)]
pub struct Submission<'a> {
    pub login: &'a str,
    pub password: &'a str,
    pub client_code: &'a str,
    pub service_id: &'a str,
    pub file_type: &'a str,
    pub filename: &'a str,
    pub content: &'a [u8],
}

impl Submission<'_> {
    /// Renders the request envelope. The password and the file are
    /// sent base64-encoded.
    pub fn envelope(&self) -> String {
        format!(
            r#"<soapenv:Envelope xmlns:soapenv="{soap}" xmlns:end="{service}">
    <soapenv:Header/>
    <soapenv:Body>
        <end:transmitirArquivoOperadora>
            <login>{login}</login>
            <senha>{password}</senha>
            <codCliente>{client_code}</codCliente>
            <idtServico>{service_id}</idtServico>
            <tipArquivo>{file_type}</tipArquivo>
            <nomArquivo>{filename}</nomArquivo>
            <arquivo>{content}</arquivo>
        </end:transmitirArquivoOperadora>
    </soapenv:Body>
</soapenv:Envelope>
"#,
            soap = SOAP_ENVELOPE_NS,
            service = SERVICE_NS,
            login = escape(self.login),
            password = Base64::encode_string(self.password.as_bytes()),
            client_code = escape(self.client_code),
            service_id = escape(self.service_id),
            file_type = escape(self.file_type),
            filename = escape(self.filename),
            content = Base64::encode_string(self.content),
        )
    }
}

/// What came back from the webservice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

/// Delivers an envelope to the webservice.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &str, envelope: String) -> Result<Reply>;
}

/// HTTP(S) transport. Every call opens its own connection.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, verify_tls: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .pool_max_idle_per_host(0)
            .build()
            .context("Failed to build the HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, envelope), fields(bytes = envelope.len()))]
    async fn post(&self, url: &str, envelope: String) -> Result<Reply> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/xml;charset=UTF-8")
            .header("SOAPAction", "")
            .body(envelope)
            .send()
            .await
            .with_context(|| format!("Failed to post the envelope to {:?}", url))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read the response from {:?}", url))?;
        info!(status, "Webservice replied");
        Ok(Reply { status, body })
    }
}
