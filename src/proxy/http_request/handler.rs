//! Per-connection reassembly of HTTP requests from arbitrary fragments.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::{debug, warn};

use super::body::classify;
use super::interning::{BaseUrlMap, CommonHeadersMap};
use super::patterns::{
    RequestLine, basic_credentials, is_blank_line, last_path_element, latin1, parse_header,
    parse_request_line, starts_with_request_line,
};
use super::query::parse_name_values;
use crate::proxy::connection::ConnectionDetails;
use crate::proxy::recording::{
    BasicAuthorization, Body, Header, HttpMethod, QueryString, Recording, RelativeUrl,
    RequestRecord, Scheme,
};

/// Headers copied into the recording, matched case-sensitively.
const MIRRORED_HEADERS: [&str; 8] = [
    "Accept",
    "Accept-Charset",
    "Accept-Encoding",
    "Accept-Language",
    "Cache-Control",
    "If-Modified-Since",
    "Referer",
    "User-Agent",
];

/// Requests closer than this to the previous response get no sleep time.
const SLEEP_THRESHOLD_MS: u64 = 10;

/// Longest unterminated line kept while looking for a request line or header.
const MAX_PENDING_LINE: usize = 0x2000;

/// State shared by every connection of one filter.
pub(super) struct RequestContext {
    pub(super) recording: Arc<dyn Recording>,
    pub(super) data_directory: PathBuf,
    pub(super) base_urls: BaseUrlMap,
    pub(super) common_headers: CommonHeadersMap,
    next_request_id: AtomicU32,
}

impl RequestContext {
    pub(super) fn new(recording: Arc<dyn Recording>, data_directory: PathBuf) -> Self {
        Self {
            recording,
            data_directory,
            base_urls: BaseUrlMap::default(),
            common_headers: CommonHeadersMap::default(),
            next_request_id: AtomicU32::new(0),
        }
    }
}

/// A request whose request line has been seen.
struct Request {
    id: u32,
    method: HttpMethod,
    short_description: String,
    time: String,
    url: RelativeUrl,
    sleep_time_ms: Option<u64>,
    headers: Vec<Header>,
    authorization: Option<BasicAuthorization>,
    content_type: Option<String>,
    content_length: Option<usize>,
    /// `Some` once the blank line after the headers of a body method
    /// has been seen.
    body: Option<Vec<u8>>,
}

impl Request {
    fn new(
        line: RequestLine,
        method: HttpMethod,
        connection: &ConnectionDetails,
        context: &RequestContext,
    ) -> Self {
        let id = context.next_request_id.fetch_add(1, Ordering::Relaxed);
        let recording = context.recording.as_ref();

        let extends = match &line.authority {
            Some(authority) => context.base_urls.intern(
                authority.scheme,
                &authority.host,
                authority.port,
                recording,
            ),
            None => context.base_urls.intern(
                Scheme::from_secure(connection.secure),
                &connection.remote.host,
                connection.remote.port,
                recording,
            ),
        };

        let short_description = match last_path_element(&line.path) {
            Some(element) if !element.is_empty() => format!("{} {}", method.as_str(), element),
            Some(_) | None => format!("{} {}", method.as_str(), id),
        };

        let query_string = line.query.map(|query| match parse_name_values(&query) {
            Ok(pairs) => QueryString::Parsed(pairs),
            Err(err) => {
                warn!("Keeping raw query string: {}", err);
                QueryString::Unparsed(query)
            }
        });

        let sleep_time_ms = recording
            .last_response_time()
            .map(|last| u64::try_from(last.elapsed().as_millis()).unwrap_or(u64::MAX))
            .filter(|elapsed| *elapsed > SLEEP_THRESHOLD_MS);

        Self {
            id,
            method,
            short_description,
            time: chrono::Local::now().to_rfc3339(),
            url: RelativeUrl {
                extends,
                path: line.path,
                query_string,
            },
            sleep_time_ms,
            headers: Vec::new(),
            authorization: None,
            content_type: None,
            content_length: None,
            body: None,
        }
    }

    fn apply_header(&mut self, line: &[u8]) {
        let Some((name, value)) = parse_header(line) else {
            debug!("Ignoring malformed header line");
            return;
        };

        if MIRRORED_HEADERS.contains(&name.as_str()) {
            self.headers.push(Header::new(name, value));
        } else if name == "Authorization" {
            if let Some(token) = basic_credentials(&value) {
                self.add_basic_authorization(token);
            }
        } else if self.method.expects_body() && name.eq_ignore_ascii_case("Content-Length") {
            match value.parse::<usize>() {
                Ok(length) => self.content_length = Some(length),
                Err(err) => warn!("Ignoring Content-Length '{}': {}", value, err),
            }
        } else if self.method.expects_body() && name.eq_ignore_ascii_case("Content-Type") {
            self.headers.push(Header::new("Content-Type", value.clone()));
            self.content_type = Some(value);
        }
    }

    fn add_basic_authorization(&mut self, token: &str) {
        let decoded = B64.decode(token).map(|bytes| latin1(&bytes));
        match decoded.as_deref().map(|credentials| credentials.split_once(':')) {
            Ok(Some((userid, password))) => {
                self.authorization = Some(BasicAuthorization {
                    userid: userid.to_owned(),
                    password: password.to_owned(),
                });
            }
            Ok(None) | Err(_) => warn!("Could not decode Authorization header"),
        }
    }

    fn record(self, context: &RequestContext) {
        let recording = context.recording.as_ref();
        let headers = context
            .common_headers
            .extract(self.headers, self.authorization, recording);
        let body = self.body.map(|bytes| Body {
            content: classify(
                self.id,
                self.content_type.as_deref(),
                bytes,
                &context.data_directory,
            ),
            content_type: self.content_type,
        });

        debug!("Recording request {} ({})", self.id, self.short_description);
        recording.add_request(RequestRecord {
            request_id: self.id,
            short_description: self.short_description,
            method: self.method,
            time: self.time,
            url: self.url,
            headers,
            body,
            sleep_time_ms: self.sleep_time_ms,
        });
    }
}

enum State {
    /// No request line seen yet, or the last request has been recorded.
    Idle,
    /// The request line named a method we cannot record.
    Ignoring,
    Headers(Request),
    Body(Request),
    /// Headers of a bodiless request are done; it is recorded when the next
    /// request starts or the connection closes.
    Complete(Request),
}

/// Parser for one direction of one connection.
pub(super) struct Handler {
    connection: ConnectionDetails,
    state: State,
    /// Bytes of a line not yet terminated.
    line: Vec<u8>,
}

impl Handler {
    pub(super) const fn new(connection: ConnectionDetails) -> Self {
        Self {
            connection,
            state: State::Idle,
            line: Vec::new(),
        }
    }

    pub(super) fn handle(&mut self, context: &RequestContext, fragment: &[u8]) {
        // A request line at the start of a fragment ends the body in flight,
        // whether or not its declared length was reached.
        if matches!(self.state, State::Body(_)) && starts_with_request_line(fragment) {
            self.end_message(context);
        }

        let mut remaining = fragment;
        while !remaining.is_empty() {
            if matches!(self.state, State::Body(_)) {
                self.collect_body(context, remaining);
                return;
            }

            let Some(end) = remaining.iter().position(|&byte| byte == b'\n') else {
                self.line.extend_from_slice(remaining);
                if self.line.len() > MAX_PENDING_LINE {
                    debug!(
                        "Discarding {} bytes without a line end on {}",
                        self.line.len(),
                        self.connection
                    );
                    self.line.clear();
                }
                return;
            };
            let (head, tail) = remaining.split_at(end.saturating_add(1));
            self.line.extend_from_slice(head);
            let line = std::mem::take(&mut self.line);
            self.process_line(context, &line);
            remaining = tail;

            if matches!(self.state, State::Body(_)) {
                // Also completes an empty body with Content-Length: 0.
                self.collect_body(context, remaining);
                return;
            }
        }
    }

    /// Records the request in flight, if any.
    pub(super) fn end_message(&mut self, context: &RequestContext) {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Headers(request) | State::Body(request) | State::Complete(request) => {
                request.record(context);
            }
            State::Idle | State::Ignoring => {}
        }
    }

    fn process_line(&mut self, context: &RequestContext, line: &[u8]) {
        match &mut self.state {
            State::Headers(request) => {
                if is_blank_line(line) {
                    self.end_headers();
                } else if parse_request_line(line).is_some() {
                    self.start_request(context, line);
                } else {
                    request.apply_header(line);
                }
            }
            State::Idle | State::Ignoring | State::Complete(_) => {
                self.start_request(context, line);
            }
            State::Body(_) => {}
        }
    }

    fn start_request(&mut self, context: &RequestContext, line: &[u8]) {
        let Some(request_line) = parse_request_line(line) else {
            match &self.state {
                State::Idle if !is_blank_line(line) => {
                    warn!("No current request on {}, ignoring data", self.connection);
                }
                State::Complete(_) if !is_blank_line(line) => {
                    debug!("Ignoring data after request on {}", self.connection);
                }
                State::Idle
                | State::Ignoring
                | State::Complete(_)
                | State::Headers(_)
                | State::Body(_) => {}
            }
            return;
        };

        self.end_message(context);

        match HttpMethod::from_token(request_line.method.as_bytes()) {
            Some(method) => {
                let request = Request::new(request_line, method, &self.connection, context);
                self.state = State::Headers(request);
            }
            None => {
                warn!(
                    "Unknown HTTP method '{}' on {}, request dropped",
                    request_line.method, self.connection
                );
                self.state = State::Ignoring;
            }
        }
    }

    fn end_headers(&mut self) {
        self.state = match std::mem::replace(&mut self.state, State::Idle) {
            State::Headers(mut request) if request.method.expects_body() => {
                request.body = Some(Vec::new());
                State::Body(request)
            }
            State::Headers(request) => State::Complete(request),
            other @ (State::Idle | State::Ignoring | State::Body(_) | State::Complete(_)) => other,
        };
    }

    fn collect_body(&mut self, context: &RequestContext, bytes: &[u8]) {
        let State::Body(request) = &mut self.state else {
            return;
        };
        let Some(body) = request.body.as_mut() else {
            return;
        };

        let Some(length) = request.content_length else {
            body.extend_from_slice(bytes);
            return;
        };

        let room = length.saturating_sub(body.len());
        if bytes.len() > room {
            warn!(
                "Expected content length exceeded on {}, truncating",
                self.connection
            );
        }
        body.extend(bytes.iter().take(room));

        if body.len() >= length {
            self.end_message(context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use crate::proxy::connection::EndPoint;
    use crate::proxy::recording::HttpRecording;

    #[test]
    fn pending_line_stays_bounded() -> AppResult<()> {
        let context = RequestContext::new(Arc::new(HttpRecording::new()), std::env::temp_dir());
        let mut handler = Handler::new(ConnectionDetails::new(
            EndPoint::new("127.0.0.1", 50_100),
            EndPoint::new("example.com", 443),
            false,
        ));
        let noise = [0xab_u8; 0x1000];
        for _ in 0..16 {
            handler.handle(&context, &noise);
            if handler.line.len() > MAX_PENDING_LINE {
                return Err(AppError::validation(format!(
                    "Pending line grew to {} bytes",
                    handler.line.len()
                )));
            }
        }
        Ok(())
    }
}
