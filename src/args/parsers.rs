use std::time::Duration;

use crate::error::{AppError, AppResult, ValidationError};
use crate::proxy::EndPoint;

/// Parses `host:port`.
pub(crate) fn parse_endpoint(s: &str) -> Result<EndPoint, ValidationError> {
    let value = s.trim();
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| ValidationError::InvalidAddress {
            value: value.to_owned(),
        })?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ValidationError::InvalidAddress {
            value: value.to_owned(),
        });
    }
    let port = port
        .parse::<u16>()
        .map_err(|err| ValidationError::InvalidPort {
            value: value.to_owned(),
            source: err,
        })?;
    Ok(EndPoint::new(host, port))
}

pub(super) fn parse_positive_usize(s: &str) -> Result<usize, ValidationError> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err(ValidationError::MustBePositive { field: "value" }),
        Ok(value) => Ok(value),
        Err(source) => Err(ValidationError::InvalidNumber {
            value: s.to_owned(),
            source,
        }),
    }
}

/// Parses a duration with an optional `ms`, `s`, `m` or `h` suffix;
/// a bare number is seconds.
pub(crate) fn parse_duration(s: &str) -> Result<Duration, ValidationError> {
    let value = s.trim();
    if value.is_empty() {
        return Err(ValidationError::DurationEmpty);
    }

    let mut digits_len = 0usize;
    for ch in value.chars() {
        if ch.is_ascii_digit() {
            digits_len = digits_len.saturating_add(1);
        } else {
            break;
        }
    }
    if digits_len == 0 {
        return Err(ValidationError::InvalidDurationFormat {
            value: value.to_owned(),
        });
    }
    let (num_part, unit_part) = value.split_at(digits_len);
    let number: u64 = num_part
        .parse()
        .map_err(|err| ValidationError::InvalidDurationNumber {
            value: value.to_owned(),
            source: err,
        })?;

    let unit = if unit_part.is_empty() { "s" } else { unit_part };
    let duration = match unit {
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => {
            let secs = number
                .checked_mul(60)
                .ok_or(ValidationError::DurationOverflow)?;
            Duration::from_secs(secs)
        }
        "h" => {
            let secs = number
                .checked_mul(60)
                .and_then(|seconds| seconds.checked_mul(60))
                .ok_or(ValidationError::DurationOverflow)?;
            Duration::from_secs(secs)
        }
        _ => {
            return Err(ValidationError::InvalidDurationUnit {
                unit: unit.to_owned(),
            });
        }
    };

    if duration.as_millis() == 0 {
        return Err(ValidationError::DurationZero);
    }

    Ok(duration)
}

pub(crate) fn parse_duration_arg(s: &str) -> AppResult<Duration> {
    parse_duration(s).map_err(AppError::validation)
}
