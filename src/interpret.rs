//! Interprets the webservice replies: the SOAP return text when it
//! can be found, the raw reply otherwise.

use crate::soap::{SOAP_ENVELOPE_NS, SERVICE_NS};
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

/// HTTP statuses meaning the webservice took the request.
pub const ACCEPTED_STATUSES: [u16; 2] = [200, 202];

/// Placeholder for values the reply didn't carry.
pub const NOT_AVAILABLE: &str = "N/A";

/// Maximum characters of raw reply kept in a result.
const RAW_LIMIT: usize = 500;

/// Maximum characters of raw reply quoted in an error message.
const MESSAGE_LIMIT: usize = 200;

const RESPONSE_ELEMENT: &str = "transmitirArquivoOperadoraResponse";
const RETURN_ELEMENT: &str = "return";
const FAULT_ELEMENT: &str = "Fault";
const FAULT_STRING_ELEMENT: &str = "faultstring";

const DEFAULT_MESSAGE: &str = "Arquivo processado";

static ERROR_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Arquivo inserido, mas com erros").unwrap());
static SUCCESS_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Arquivo inserido com sucesso!").unwrap());
static PROTOCOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Número do protocolo\s*:\s*(\d+)").unwrap());
static TOTAL_ROWS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Qtd\. Total de Registros\s*:\s*(\d+)").unwrap());
static ACCEPTED_ROWS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Qtd\. Linhas Aceitas\s*:\s*(\d+)").unwrap());
static REJECTED_ROWS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Qtd\. Linhas Rejeitadas\s*:\s*(\d+)").unwrap());

/// Overall outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    #[serde(rename = "Sucesso")]
    Success,
    #[serde(rename = "Erro")]
    Error,
}

impl Status {
    pub fn is_error(self) -> bool {
        self == Status::Error
    }
}

/// What was understood from a reply. Serializes with the field names
/// downstream consumers already read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedResult {
    pub status: Status,
    #[serde(rename = "mensagem")]
    pub message: String,
    #[serde(rename = "protocolo")]
    pub protocol: String,
    #[serde(rename = "total_registros", skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<String>,
    #[serde(rename = "linhas_aceitas", skip_serializing_if = "Option::is_none")]
    pub accepted_rows: Option<String>,
    #[serde(rename = "linhas_rejeitadas", skip_serializing_if = "Option::is_none")]
    pub rejected_rows: Option<String>,
    #[serde(rename = "resposta_completa")]
    pub raw_response: String,
}

impl ParsedResult {
    /// A failure that happened before or outside of the webservice
    /// exchange.
    pub fn failure(message: String, raw_response: &str) -> Self {
        Self {
            status: Status::Error,
            message,
            protocol: String::from(NOT_AVAILABLE),
            total_rows: None,
            accepted_rows: None,
            rejected_rows: None,
            raw_response: raw_response.to_string(),
        }
    }
}

/// Whether an HTTP status means the webservice took the request.
pub fn accepted(status: u16) -> bool {
    ACCEPTED_STATUSES.contains(&status)
}

/// The longest prefix of `text` with at most `max` characters.
pub fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Interprets a webservice reply.
pub fn interpret(status: u16, body: &str) -> ParsedResult {
    if !accepted(status) {
        return communication_failure(status, body);
    }
    match locate(body, SERVICE_NS, RESPONSE_ELEMENT, RETURN_ELEMENT) {
        Ok(Located {
            text: Some(text), ..
        }) if !text.is_empty() => scan(&text, text.clone()),
        Ok(_) => {
            warn!("Reply carries no return text; scanning the raw reply");
            scan(body, truncate(body, RAW_LIMIT).to_string())
        }
        Err(e) => {
            warn!("Couldn't parse the reply as XML; scanning the raw reply: {:?}", e);
            scan(body, truncate(body, RAW_LIMIT).to_string())
        }
    }
}

/// Builds the result for a reply outside the accepted statuses,
/// preferring the SOAP fault string as message.
fn communication_failure(status: u16, body: &str) -> ParsedResult {
    let message = match locate(body, SOAP_ENVELOPE_NS, FAULT_ELEMENT, FAULT_STRING_ELEMENT) {
        Ok(Located {
            parent_found: true,
            text,
        }) => text
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| truncate(body, MESSAGE_LIMIT).to_string()),
        _ => format!(
            "Erro de comunicação. Status: {}. Resposta: {}",
            status,
            truncate(body, MESSAGE_LIMIT)
        ),
    };
    ParsedResult::failure(message, truncate(body, RAW_LIMIT))
}

/// Scans a text for the labels the webservice writes in its report.
fn scan(text: &str, raw_response: String) -> ParsedResult {
    let capture = |re: &Regex| {
        re.captures(text)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
    };
    let error = ERROR_MARKER.find(text);
    let message = error
        .or_else(|| SUCCESS_MARKER.find(text))
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_MESSAGE);
    ParsedResult {
        status: if error.is_some() {
            Status::Error
        } else {
            Status::Success
        },
        message: message.to_string(),
        protocol: capture(&PROTOCOL).unwrap_or_else(|| String::from(NOT_AVAILABLE)),
        total_rows: Some(capture(&TOTAL_ROWS).unwrap_or_else(|| String::from("0"))),
        accepted_rows: Some(capture(&ACCEPTED_ROWS).unwrap_or_else(|| String::from("0"))),
        rejected_rows: Some(capture(&REJECTED_ROWS).unwrap_or_else(|| String::from("0"))),
        raw_response,
    }
}

/// The outcome of looking for an unqualified child element under a
/// namespaced parent.
#[derive(Debug, Default, PartialEq, Eq)]
struct Located {
    parent_found: bool,
    /// Text of the first matching child, up to its first nested
    /// element.
    text: Option<String>,
}

/// Walks the events of a document, tracking the open elements.
struct Locator<'a> {
    parent_ns: &'a str,
    parent: &'a str,
    child: &'a str,
    located: Located,
    /// One entry per open element: whether it's the parent.
    open: Vec<bool>,
    /// Depth and accumulated text of the child being read.
    capture: Option<(usize, String)>,
    saw_root: bool,
    closed_root: bool,
}

impl Locator<'_> {
    fn start(&mut self, ns: &ResolveResult, local: &[u8], empty: bool) -> Result<()> {
        if self.closed_root {
            bail!("element after the root element");
        }
        if let ResolveResult::Unknown(prefix) = ns {
            bail!(
                "undeclared namespace prefix {}",
                String::from_utf8_lossy(prefix)
            );
        }
        if let Some((_, text)) = self.capture.take() {
            self.located.text = Some(text);
        }
        let is_parent = matches!(ns, ResolveResult::Bound(Namespace(n)) if *n == self.parent_ns.as_bytes())
            && local == self.parent.as_bytes();
        let is_child = self.open.last() == Some(&true)
            && matches!(ns, ResolveResult::Unbound)
            && local == self.child.as_bytes()
            && self.located.text.is_none();
        self.located.parent_found |= is_parent;
        self.saw_root = true;
        if empty {
            if is_child {
                self.located.text = Some(String::new());
            }
            self.closed_root = self.open.is_empty();
        } else {
            self.open.push(is_parent);
            if is_child {
                self.capture = Some((self.open.len(), String::new()));
            }
        }
        Ok(())
    }

    fn end(&mut self) {
        if matches!(self.capture, Some((depth, _)) if depth == self.open.len()) {
            self.located.text = self.capture.take().map(|(_, text)| text);
        }
        self.open.pop();
        self.closed_root = self.open.is_empty();
    }

    fn text(&mut self, content: &str) -> Result<()> {
        if self.open.is_empty() {
            // Only whitespace may surround the root element.
            if !content.trim().is_empty() {
                bail!("text outside the root element");
            }
            return Ok(());
        }
        if let Some((depth, text)) = &mut self.capture {
            if *depth == self.open.len() {
                text.push_str(content);
            }
        }
        Ok(())
    }
}

/// Parses the whole document, failing on malformed XML, and locates
/// `{parent_ns}parent/child`.
fn locate(xml: &str, parent_ns: &str, parent: &str, child: &str) -> Result<Located> {
    let mut reader = NsReader::from_str(xml);
    let mut locator = Locator {
        parent_ns,
        parent,
        child,
        located: Located::default(),
        open: Vec::new(),
        capture: None,
        saw_root: false,
        closed_root: false,
    };
    loop {
        let (ns, event) = reader.read_resolved_event()?;
        match event {
            Event::Start(e) => locator.start(&ns, e.local_name().as_ref(), false)?,
            Event::Empty(e) => locator.start(&ns, e.local_name().as_ref(), true)?,
            Event::End(_) => locator.end(),
            Event::Text(e) => locator.text(&e.unescape()?)?,
            Event::CData(e) => locator.text(&String::from_utf8_lossy(&e.into_inner()))?,
            Event::Eof => break,
            _ => (),
        }
    }
    if !locator.saw_root {
        bail!("document has no root element");
    }
    if !locator.open.is_empty() {
        bail!(
            "document ends with {} unclosed element(s)",
            locator.open.len()
        );
    }
    Ok(locator.located)
}
