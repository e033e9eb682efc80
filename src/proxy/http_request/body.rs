use std::path::Path;

use tracing::{debug, error};

use super::patterns::latin1;
use super::query::parse_name_values;
use crate::proxy::recording::{BodyContent, NameValue};

/// Bodies larger than this are written to a side file.
pub(super) const FILE_THRESHOLD: usize = 0x4000;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM: &str = "multipart/form-data";

pub(super) fn data_file_name(request_id: u32) -> String {
    format!("http-data-{}.dat", request_id)
}

/// Decides how a request body is recorded.
pub(super) fn classify(
    request_id: u32,
    content_type: Option<&str>,
    bytes: Vec<u8>,
    data_directory: &Path,
) -> BodyContent {
    if bytes.len() > FILE_THRESHOLD {
        let path = data_directory.join(data_file_name(request_id));
        if let Err(err) = std::fs::write(&path, &bytes) {
            error!("Failed to write body data to '{}': {}", path.display(), err);
        }
        return BodyContent::File {
            path: path.display().to_string(),
        };
    }

    let text = latin1(&bytes);

    if content_type == Some(FORM_URLENCODED) {
        match parse_name_values(&text) {
            Ok(fields) => return BodyContent::Form { fields },
            Err(err) => debug!("Recording form body as raw data: {}", err),
        }
    }

    if let Some(content_type) = content_type
        && let Some(fields) = multipart_fields(content_type, &text)
    {
        return BodyContent::Form { fields };
    }

    if text.chars().all(is_printable) {
        BodyContent::String { text }
    } else {
        BodyContent::Binary { bytes }
    }
}

/// Control characters other than whitespace make a body binary.
fn is_printable(c: char) -> bool {
    !c.is_control() || matches!(c, '\t' | '\n' | '\u{b}' | '\u{c}' | '\r' | '\u{1c}'..='\u{1f}')
}

/// Fields of a `multipart/form-data` body, provided every part is a plain
/// textual field.
fn multipart_fields(content_type: &str, text: &str) -> Option<Vec<NameValue>> {
    let delimiter = format!("--{}", multipart_boundary(content_type)?);
    let mut sections = text.split(delimiter.as_str());
    sections.next()?;

    let mut fields = Vec::new();
    for section in sections {
        if section.starts_with("--") {
            return Some(fields);
        }
        let section = section.strip_prefix("\r\n")?;
        let (head, content) = section.split_once("\r\n\r\n")?;
        let name = field_name(head)?;
        let content = content.strip_suffix("\r\n").unwrap_or(content);
        if !content.chars().all(is_printable) {
            return None;
        }
        fields.push(NameValue::new(name, content));
    }

    // No closing delimiter.
    None
}

fn multipart_boundary(content_type: &str) -> Option<&str> {
    let (mime, parameters) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case(MULTIPART_FORM) {
        return None;
    }
    parameters
        .split(';')
        .filter_map(|parameter| parameter.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|boundary| !boundary.is_empty())
}

/// The `name` of a form-data part; `None` for file uploads.
fn field_name(head: &str) -> Option<String> {
    let disposition = head.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-disposition")
            .then_some(value)
    })?;

    let mut field = None;
    for parameter in disposition.split(';').skip(1) {
        let (key, value) = parameter.split_once('=')?;
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "name" => field = Some(value.to_owned()),
            "filename" => return None,
            _ => {}
        }
    }
    field
}
