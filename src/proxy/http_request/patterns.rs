use once_cell::sync::Lazy;
use regex::bytes::Regex;
use tracing::error;

use crate::proxy::recording::Scheme;

// Request-Line = Method SP Request-URI SP HTTP-Version, lenient about
// whitespace. The line terminator is stripped before matching.
static REQUEST_LINE: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(
        r"(?-u)\A([A-Z]+)[ \t]+(?:([A-Za-z]+)://([^/ \t]+))?([^? \t]*)(?:\?([^ \t]*))?[ \t]+HTTP/[0-9]+\.[0-9]+[ \t]*\z",
    )
});

static HEADER_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?-u)\A([!#$%&'*+.^_`|~0-9A-Za-z-]+):[ \t]*(.*?)[ \t]*\z"));

static BASIC_CREDENTIALS: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"(?-u)\ABasic[ \t]*([A-Za-z0-9+/]*=*)"));

static LAST_PATH_ELEMENT: Lazy<Option<Regex>> = Lazy::new(|| compile(r"(?-u)\A[^?;]*/([^?;]*)"));

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|err| error!("Invalid pattern '{}': {}", pattern, err))
        .ok()
}

/// Decodes ISO-8859-1: every byte maps to the char with the same value.
pub(super) fn latin1(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

pub(super) fn strip_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Target of an absolute-form request URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Authority {
    pub(super) scheme: Scheme,
    pub(super) host: String,
    pub(super) port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct RequestLine {
    pub(super) method: String,
    pub(super) authority: Option<Authority>,
    pub(super) path: String,
    pub(super) query: Option<String>,
}

pub(super) fn parse_request_line(line: &[u8]) -> Option<RequestLine> {
    let captures = REQUEST_LINE.as_ref()?.captures(strip_line_end(line))?;
    let text = |index: usize| captures.get(index).map(|found| latin1(found.as_bytes()));

    let authority = text(2)
        .as_deref()
        .and_then(Scheme::parse)
        .zip(text(3))
        .map(|(scheme, authority)| parse_authority(scheme, &authority));
    let path = text(4).filter(|path| !path.is_empty());

    Some(RequestLine {
        method: text(1)?,
        authority,
        path: path.unwrap_or_else(|| "/".to_owned()),
        query: text(5),
    })
}

fn parse_authority(scheme: Scheme, authority: &str) -> Authority {
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    if let Some((host, port)) = authority.rsplit_once(':')
        && let Ok(port) = port.parse::<u16>()
    {
        return Authority {
            scheme,
            host: host.to_owned(),
            port,
        };
    }
    Authority {
        scheme,
        host: authority.to_owned(),
        port: scheme.default_port(),
    }
}

/// True when `fragment` begins with a complete request line.
pub(super) fn starts_with_request_line(fragment: &[u8]) -> bool {
    fragment
        .iter()
        .position(|&byte| byte == b'\n')
        .and_then(|end| fragment.get(..end))
        .and_then(parse_request_line)
        .is_some()
}

/// Splits a header line into its name and trimmed value.
pub(super) fn parse_header(line: &[u8]) -> Option<(String, String)> {
    let captures = HEADER_LINE.as_ref()?.captures(strip_line_end(line))?;
    let name = captures.get(1)?;
    let value = captures.get(2)?;
    Some((latin1(name.as_bytes()), latin1(value.as_bytes())))
}

/// The base64 token of a `Basic` authorization value.
pub(super) fn basic_credentials(value: &str) -> Option<&str> {
    let captures = BASIC_CREDENTIALS.as_ref()?.captures(value.as_bytes())?;
    let token = captures.get(1)?;
    value.get(token.start()..token.end())
}

/// The last element of a URL path, ignoring parameters and query.
pub(super) fn last_path_element(path: &str) -> Option<&str> {
    let captures = LAST_PATH_ELEMENT.as_ref()?.captures(path.as_bytes())?;
    let element = captures.get(1)?;
    path.get(element.start()..element.end())
}

pub(super) const fn is_blank_line(line: &[u8]) -> bool {
    matches!(line, b"\n" | b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};

    #[test]
    fn every_pattern_compiles() -> AppResult<()> {
        for (name, pattern) in [
            ("request line", &REQUEST_LINE),
            ("header line", &HEADER_LINE),
            ("basic credentials", &BASIC_CREDENTIALS),
            ("last path element", &LAST_PATH_ELEMENT),
        ] {
            if pattern.is_none() {
                return Err(AppError::validation(format!("{} failed to compile", name)));
            }
        }
        Ok(())
    }

    #[test]
    fn request_line_with_query() -> AppResult<()> {
        let parsed = parse_request_line(b"GET /foo/bar?x=1 HTTP/1.1\r\n")
            .ok_or_else(|| AppError::validation("Request line not matched"))?;
        let expected = RequestLine {
            method: "GET".to_owned(),
            authority: None,
            path: "/foo/bar".to_owned(),
            query: Some("x=1".to_owned()),
        };
        if parsed != expected {
            return Err(AppError::validation(format!("Unexpected {:?}", parsed)));
        }
        Ok(())
    }

    #[test]
    fn absolute_uri_carries_an_authority() -> AppResult<()> {
        let parsed = parse_request_line(b"POST https://api.example.com:8443/v1 HTTP/1.0\n")
            .ok_or_else(|| AppError::validation("Request line not matched"))?;
        let expected = Some(Authority {
            scheme: Scheme::Https,
            host: "api.example.com".to_owned(),
            port: 8443,
        });
        if parsed.authority != expected || parsed.path != "/v1" || parsed.query.is_some() {
            return Err(AppError::validation(format!("Unexpected {:?}", parsed)));
        }

        let bare = parse_request_line(b"GET http://example.com HTTP/1.1")
            .ok_or_else(|| AppError::validation("Bare authority not matched"))?;
        if bare.path != "/" || bare.authority.map(|found| found.port) != Some(80) {
            return Err(AppError::validation("Bare authority not defaulted"));
        }
        Ok(())
    }

    #[test]
    fn non_request_lines_are_rejected() {
        assert!(parse_request_line(b"Accept: text/html\r\n").is_none());
        assert!(parse_request_line(b"get / HTTP/1.1\r\n").is_none());
        assert!(parse_request_line(b"GET / HTTP/1.1 trailing\r\n").is_none());
        assert!(!starts_with_request_line(b"GET / HTTP/1.1"));
        assert!(starts_with_request_line(b"GET / HTTP/1.1\r\nHost: x\r\n"));
    }

    #[test]
    fn header_values_are_trimmed() -> AppResult<()> {
        let (name, value) = parse_header(b"User-Agent: \t loadgen/1.0  \r\n")
            .ok_or_else(|| AppError::validation("Header not matched"))?;
        if name != "User-Agent" || value != "loadgen/1.0" {
            return Err(AppError::validation(format!("Unexpected {}: '{}'", name, value)));
        }
        if parse_header(b"not a header\r\n").is_some() {
            return Err(AppError::validation("Garbage parsed as a header"));
        }
        Ok(())
    }

    #[test]
    fn path_elements_and_credentials() {
        assert_eq!(last_path_element("/foo/bar"), Some("bar"));
        assert_eq!(last_path_element("/a/b;jsessionid=1"), Some("b"));
        assert_eq!(last_path_element("nopath"), None);
        assert_eq!(basic_credentials("Basic dXNlcjpwdw=="), Some("dXNlcjpwdw=="));
        assert_eq!(basic_credentials("Bearer abc"), None);
    }

    #[test]
    fn latin1_maps_bytes_one_to_one() {
        let text = latin1(&[b'a', 0xe9, 0xff]);
        assert_eq!(text.chars().map(u32::from).collect::<Vec<_>>(), vec![0x61, 0xe9, 0xff]);
    }
}
