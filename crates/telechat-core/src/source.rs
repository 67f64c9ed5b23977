//! Agenda sources
//!
//! An [`AgendaSource`] yields the date-keyed [`Agenda`] for one run. The
//! HTTP implementation fetches the datatracker agenda and decodes either
//! the HTML documents page or the JSON agenda; both decoders are pure
//! functions of the response body.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::agenda::{validate_component, Agenda, DocumentId, UNKNOWN_DATE};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// Source of the telechat agenda.
#[async_trait]
pub trait AgendaSource: Send + Sync {
    /// Fetch and decode the agenda.
    ///
    /// # Errors
    /// - [`SyncError::Fetch`] / [`SyncError::FetchStatus`] when the request fails
    /// - [`SyncError::Decode`] when the body does not have the expected shape
    async fn fetch(&self) -> Result<Agenda>;
}

/// Body format of the agenda endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgendaFormat {
    /// Pick by content type, then by the first byte of the body
    #[default]
    Auto,
    Html,
    Json,
}

impl std::str::FromStr for AgendaFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(AgendaFormat::Auto),
            "html" => Ok(AgendaFormat::Html),
            "json" => Ok(AgendaFormat::Json),
            other => Err(format!("unknown agenda format '{}'", other)),
        }
    }
}

impl std::fmt::Display for AgendaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgendaFormat::Auto => "auto",
            AgendaFormat::Html => "html",
            AgendaFormat::Json => "json",
        };
        write!(f, "{}", s)
    }
}

impl AgendaFormat {
    /// Resolve `Auto` for a concrete response.
    pub fn detect(self, content_type: Option<&str>, body: &[u8]) -> AgendaFormat {
        if self != AgendaFormat::Auto {
            return self;
        }
        if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json")) {
            return AgendaFormat::Json;
        }
        match body.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => AgendaFormat::Json,
            _ => AgendaFormat::Html,
        }
    }
}

/// Agenda source backed by one HTTP GET.
pub struct HttpAgendaSource {
    client: reqwest::Client,
    url: String,
    format: AgendaFormat,
}

impl HttpAgendaSource {
    pub fn new(client: reqwest::Client, url: &str, format: AgendaFormat) -> Self {
        HttpAgendaSource {
            client,
            url: url.to_string(),
            format,
        }
    }

    /// Build a source (and its HTTP client) from a [`SyncConfig`].
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("telechat-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self::new(client, &config.agenda_url, config.agenda_format))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AgendaSource for HttpAgendaSource {
    #[instrument(skip(self), fields(url = %self.url, format = %self.format))]
    async fn fetch(&self) -> Result<Agenda> {
        let fetch_err = |source: reqwest::Error| SyncError::Fetch {
            url: self.url.clone(),
            source,
        };

        let response = self.client.get(&self.url).send().await.map_err(fetch_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::FetchStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(fetch_err)?;

        let format = self.format.detect(content_type.as_deref(), &body);
        debug!(%format, body_len = body.len(), "decoding agenda");

        let agenda = match format {
            AgendaFormat::Json => parse_json(&body)?,
            _ => parse_html(&String::from_utf8_lossy(&body)),
        };

        info!(
            event = "agenda.fetched",
            dates = agenda.date_count(),
            documents = agenda.len(),
        );
        Ok(agenda)
    }
}

#[derive(Deserialize)]
struct RawAgenda {
    #[serde(rename = "telechat-date")]
    telechat_date: String,
    sections: BTreeMap<String, RawSection>,
}

#[derive(Deserialize)]
struct RawSection {
    #[serde(default)]
    docs: Vec<RawDoc>,
}

#[derive(Deserialize)]
struct RawDoc {
    docname: String,
    rev: String,
}

/// Sort key for section numbers such as `2.1.10`: numeric components
/// compare as numbers, anything else sorts after them.
fn section_order(section: &str) -> Vec<u64> {
    section
        .split('.')
        .map(|part| part.trim().parse().unwrap_or(u64::MAX))
        .collect()
}

/// Decode the JSON agenda.
///
/// Requires a `telechat-date` string and a `sections` object. Sections
/// are visited in agenda order (`2` before `10`). Sections without
/// `docs` contribute nothing; a `docs` entry without string
/// `docname`/`rev` fails the whole decode.
pub fn parse_json(body: &[u8]) -> Result<Agenda> {
    let raw: RawAgenda =
        serde_json::from_slice(body).map_err(|e| SyncError::Decode(e.to_string()))?;

    let date = raw.telechat_date.trim();
    validate_component(date)
        .map_err(|e| SyncError::Decode(format!("invalid telechat-date: {}", e)))?;

    let mut sections: Vec<_> = raw.sections.iter().collect();
    sections.sort_by_cached_key(|(section, _)| section_order(section));

    let mut agenda = Agenda::new();
    for (section, contents) in sections {
        for doc in &contents.docs {
            let id = DocumentId::from_parts(&doc.docname, &doc.rev);
            if let Err(e) = validate_component(id.as_str()) {
                warn!(section = %section, error = %e, "skipping document with unusable name");
                continue;
            }
            if agenda.insert(date, id.clone()) {
                debug!(document = %id, date = %date, "found document");
            }
        }
    }
    Ok(agenda)
}

/// One piece of markup: a comment or a single start/end tag.
fn markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)<!--.*?(?:-->|\z)|<(?P<close>/?)(?P<name>[A-Za-z][A-Za-z0-9]*)(?P<attrs>[^>]*?)(?P<selfclose>/?)>",
        )
        .expect("markup pattern is valid")
    })
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bhref\s*=\s*["']([^"']*)["']"#).expect("href pattern is valid")
    })
}

fn telechat_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"IESG telechat\s+(.*)").expect("telechat pattern is valid"))
}

/// Date key for a heading such as `IESG telechat 2017-04-27.`
///
/// Headings that do not name a usable date map to [`UNKNOWN_DATE`] so
/// documents below them still land somewhere.
pub fn extract_date(heading: &str) -> String {
    let Some(caps) = telechat_re().captures(heading) else {
        warn!(heading = %heading, "was not able to extract date from heading");
        return UNKNOWN_DATE.to_string();
    };

    let raw = caps[1].trim().trim_end_matches('.').trim();
    let date = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(d) => d.format("%Y-%m-%d").to_string(),
        Err(_) => raw.to_string(),
    };

    if let Err(e) = validate_component(&date) {
        warn!(heading = %heading, error = %e, "unusable telechat date");
        return UNKNOWN_DATE.to_string();
    }
    date
}

/// Draft name if `text` names an Internet-Draft.
fn extract_doc(text: &str) -> Option<&str> {
    text.starts_with("draft-").then_some(text)
}

fn is_doc_link(attrs: &str) -> bool {
    href_re()
        .captures(attrs)
        .is_some_and(|h| h[1].starts_with("/doc/draft"))
}

/// Element whose text is being collected.
enum Open {
    Heading(String),
    DocLink(String),
}

impl Open {
    fn push_text(&mut self, text: &str) {
        let buf = match self {
            Open::Heading(buf) | Open::DocLink(buf) => buf,
        };
        buf.push(' ');
        buf.push_str(text);
    }
}

/// Close `open`, updating the current date or recording a document.
fn finish(open: Option<Open>, date: &mut String, agenda: &mut Agenda) {
    match open {
        Some(Open::Heading(text)) => *date = extract_date(&collapse(&text)),
        Some(Open::DocLink(text)) => {
            let text = collapse(&text);
            let Some(name) = extract_doc(&text) else {
                return;
            };
            if let Err(e) = validate_component(name) {
                warn!(document = %name, error = %e, "skipping document with unusable name");
                return;
            }
            if agenda.insert(date.as_str(), DocumentId::new(name)) {
                debug!(document = %name, date = %date, "found a new document");
            }
        }
        None => {}
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode the HTML documents page.
///
/// Walks the markup tag by tag. Comments are skipped. An `<h2>` sets the
/// current date from its text; a `/doc/draft...` link collects text up to
/// its own `</a>` and is filed under the current date. A link left open
/// ends at the next link or heading, and a self-closing `<a/>` opens
/// nothing.
pub fn parse_html(page: &str) -> Agenda {
    let mut agenda = Agenda::new();
    let mut date = UNKNOWN_DATE.to_string();
    let mut open: Option<Open> = None;
    let mut last = 0;

    for caps in markup_re().captures_iter(page) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if let Some(element) = open.as_mut() {
            element.push_text(&page[last..whole.start()]);
        }
        last = whole.end();

        // Comments have no tag name.
        let Some(name) = caps.name("name") else {
            continue;
        };
        let closing = caps.name("close").is_some_and(|c| !c.as_str().is_empty());
        let self_closing = caps.name("selfclose").is_some_and(|c| !c.as_str().is_empty());
        let attrs = caps.name("attrs").map_or("", |m| m.as_str());

        match (name.as_str().to_ascii_lowercase().as_str(), closing) {
            ("h2", false) => {
                finish(open.take(), &mut date, &mut agenda);
                if !self_closing {
                    open = Some(Open::Heading(String::new()));
                }
            }
            ("h2", true) => finish(open.take(), &mut date, &mut agenda),
            ("a", false) if !matches!(open, Some(Open::Heading(_))) => {
                finish(open.take(), &mut date, &mut agenda);
                if !self_closing && is_doc_link(attrs) {
                    open = Some(Open::DocLink(String::new()));
                }
            }
            ("a", true) if matches!(open, Some(Open::DocLink(_))) => {
                finish(open.take(), &mut date, &mut agenda)
            }
            _ => {}
        }
    }

    if let Some(element) = open.as_mut() {
        element.push_text(&page[last..]);
    }
    finish(open, &mut date, &mut agenda);

    agenda
}
