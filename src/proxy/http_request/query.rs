use crate::error::ProxyError;
use crate::proxy::recording::NameValue;

/// Parses `name=value&...` pairs, URL-decoding both sides.
///
/// Every pair must contain `=` and every `%` must introduce two hex digits.
pub(super) fn parse_name_values(input: &str) -> Result<Vec<NameValue>, ProxyError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    input
        .split('&')
        .map(|pair| {
            let (name, value) = pair.split_once('=').ok_or_else(|| ProxyError::MalformedQuery {
                input: input.to_owned(),
                reason: "'=' missing",
            })?;
            Ok(NameValue::new(url_decode(name, input)?, url_decode(value, input)?))
        })
        .collect()
}

fn url_decode(encoded: &str, input: &str) -> Result<String, ProxyError> {
    let mut decoded = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(next) = chars.next() {
        match next {
            '+' => decoded.push(' '),
            '%' => {
                let byte = hex_byte(chars.next(), chars.next()).ok_or_else(|| {
                    ProxyError::MalformedQuery {
                        input: input.to_owned(),
                        reason: "invalid escape",
                    }
                })?;
                decoded.push(char::from(byte));
            }
            other => decoded.push(other),
        }
    }
    Ok(decoded)
}

fn hex_byte(high: Option<char>, low: Option<char>) -> Option<u8> {
    let digits: String = [high?, low?].iter().collect();
    if !digits.chars().all(|digit| digit.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(&digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};

    #[test]
    fn pairs_are_decoded() -> AppResult<()> {
        let parsed = parse_name_values("x=1&name=a+b%21&empty=")?;
        let expected = vec![
            NameValue::new("x", "1"),
            NameValue::new("name", "a b!"),
            NameValue::new("empty", ""),
        ];
        if parsed != expected {
            return Err(AppError::validation(format!("Unexpected {:?}", parsed)));
        }
        Ok(())
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(parse_name_values("novalue").is_err());
        assert!(parse_name_values("x=%zz").is_err());
        assert!(parse_name_values("x=%4").is_err());
        assert!(parse_name_values("x=%+1").is_err());
    }

    #[test]
    fn empty_input_has_no_pairs() -> AppResult<()> {
        if !parse_name_values("")?.is_empty() {
            return Err(AppError::validation("Expected no pairs"));
        }
        Ok(())
    }
}
