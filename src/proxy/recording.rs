//! The structured recording produced by the HTTP request filter.

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub const fn from_secure(secure: bool) -> Self {
        if secure { Self::Https } else { Self::Http }
    }

    /// Parses a URI scheme, ignoring case.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("http") {
            Some(Self::Http)
        } else if value.eq_ignore_ascii_case("https") {
            Some(Self::Https)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
    Connect,
    Patch,
}

impl HttpMethod {
    /// Parses an upper-case method token as it appears on a request line.
    #[must_use]
    pub fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"GET" => Some(Self::Get),
            b"HEAD" => Some(Self::Head),
            b"POST" => Some(Self::Post),
            b"PUT" => Some(Self::Put),
            b"DELETE" => Some(Self::Delete),
            b"OPTIONS" => Some(Self::Options),
            b"TRACE" => Some(Self::Trace),
            b"CONNECT" => Some(Self::Connect),
            b"PATCH" => Some(Self::Patch),
            _ => None,
        }
    }

    /// Methods whose requests are followed by an entity body.
    #[must_use]
    pub const fn expects_body(self) -> bool {
        match self {
            Self::Post | Self::Put | Self::Patch | Self::Options => true,
            Self::Get | Self::Head | Self::Delete | Self::Trace | Self::Connect => false,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
            Self::Patch => "PATCH",
        }
    }
}

/// Scheme, host and port a relative URL extends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseUrl {
    pub url_id: String,
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A set of headers shared by many requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommonHeaders {
    pub headers_id: String,
    pub headers: Vec<Header>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasicAuthorization {
    pub userid: String,
    pub password: String,
}

/// Headers of one request: the common set it extends plus its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestHeaders {
    pub extends: String,
    pub headers: Vec<Header>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<BasicAuthorization>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}

impl NameValue {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryString {
    Parsed(Vec<NameValue>),
    Unparsed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelativeUrl {
    /// Id of the [`BaseUrl`] this path is relative to.
    pub extends: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_string: Option<QueryString>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyContent {
    Form {
        fields: Vec<NameValue>,
    },
    String {
        text: String,
    },
    Binary {
        #[serde(serialize_with = "serialize_base64")]
        bytes: Vec<u8>,
    },
    /// Written to a side file because it was too large to inline.
    File {
        path: String,
    },
}

fn serialize_base64<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&B64.encode(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Body {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub content: BodyContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    pub request_id: u32,
    pub short_description: String,
    pub method: HttpMethod,
    /// RFC 3339 timestamp of the request line.
    pub time: String,
    pub url: RelativeUrl,
    pub headers: RequestHeaders,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep_time_ms: Option<u64>,
}

/// Sink for everything the request filter extracts.
pub trait Recording: Send + Sync {
    fn add_base_url(&self, base_url: BaseUrl);

    fn add_common_headers(&self, headers: CommonHeaders);

    fn add_request(&self, request: RequestRecord);

    /// When the last response was seen, if any.
    fn last_response_time(&self) -> Option<Instant>;

    fn mark_last_response_time(&self);
}

/// Serialized form of an [`HttpRecording`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordingDocument {
    pub base_urls: Vec<BaseUrl>,
    pub common_headers: Vec<CommonHeaders>,
    pub requests: Vec<RequestRecord>,
}

/// In-memory [`Recording`], written out as JSON when the proxy stops.
#[derive(Debug, Default)]
pub struct HttpRecording {
    document: Mutex<RecordingDocument>,
    last_response: Mutex<Option<Instant>>,
}

impl HttpRecording {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> RecordingDocument {
        self.document
            .lock()
            .map(|document| document.clone())
            .unwrap_or_default()
    }

    /// Renders the recording as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::SerializeRecording`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ProxyError> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|source| ProxyError::SerializeRecording { source })
    }

    /// Writes the recording to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the recording cannot be serialized or the file
    /// cannot be written.
    pub fn write_to(&self, path: &Path) -> Result<(), ProxyError> {
        let mut json = self.to_json()?;
        json.push('\n');
        std::fs::write(path, json).map_err(|source| ProxyError::WriteRecording {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Recording written to {}", path.display());
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut RecordingDocument)) {
        if let Ok(mut document) = self.document.lock() {
            apply(&mut document);
        }
    }
}

impl Recording for HttpRecording {
    fn add_base_url(&self, base_url: BaseUrl) {
        self.update(|document| document.base_urls.push(base_url));
    }

    fn add_common_headers(&self, headers: CommonHeaders) {
        self.update(|document| document.common_headers.push(headers));
    }

    fn add_request(&self, request: RequestRecord) {
        self.update(|document| document.requests.push(request));
    }

    fn last_response_time(&self) -> Option<Instant> {
        self.last_response.lock().ok().and_then(|last| *last)
    }

    fn mark_last_response_time(&self) {
        if let Ok(mut last) = self.last_response.lock() {
            *last = Some(Instant::now());
        }
    }
}
