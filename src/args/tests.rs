use super::parsers::{parse_duration, parse_endpoint, parse_positive_usize};
use super::*;
use crate::error::{AppError, AppResult, ValidationError};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn parse_duration_supports_units() -> AppResult<()> {
    let cases = [
        ("250ms", Duration::from_millis(250)),
        ("5", Duration::from_secs(5)),
        ("5s", Duration::from_secs(5)),
        ("2m", Duration::from_secs(120)),
        ("1h", Duration::from_secs(3600)),
    ];
    for (input, expected) in cases {
        let parsed = parse_duration(input)?;
        if parsed != expected {
            return Err(AppError::validation(format!(
                "'{}' parsed to {:?}, expected {:?}",
                input, parsed, expected
            )));
        }
    }
    Ok(())
}

#[test]
fn parse_duration_rejects_bad_input() -> AppResult<()> {
    if !matches!(parse_duration(""), Err(ValidationError::DurationEmpty)) {
        return Err(AppError::validation("Empty duration accepted"));
    }
    if !matches!(
        parse_duration("ms"),
        Err(ValidationError::InvalidDurationFormat { .. })
    ) {
        return Err(AppError::validation("Missing number accepted"));
    }
    if !matches!(
        parse_duration("5d"),
        Err(ValidationError::InvalidDurationUnit { .. })
    ) {
        return Err(AppError::validation("Unknown unit accepted"));
    }
    if !matches!(parse_duration("0s"), Err(ValidationError::DurationZero)) {
        return Err(AppError::validation("Zero duration accepted"));
    }
    Ok(())
}

#[test]
fn parse_endpoint_splits_host_and_port() -> AppResult<()> {
    let endpoint = parse_endpoint("example.com:8080")?;
    if endpoint.host != "example.com" || endpoint.port != 8080 {
        return Err(AppError::validation(format!(
            "Unexpected endpoint {}",
            endpoint
        )));
    }
    let ipv6 = parse_endpoint("[::1]:9000")?;
    if ipv6.host != "::1" || ipv6.port != 9000 {
        return Err(AppError::validation(format!("Unexpected endpoint {}", ipv6)));
    }
    if !matches!(
        parse_endpoint("example.com"),
        Err(ValidationError::InvalidAddress { .. })
    ) {
        return Err(AppError::validation("Missing port accepted"));
    }
    if !matches!(
        parse_endpoint("example.com:http"),
        Err(ValidationError::InvalidPort { .. })
    ) {
        return Err(AppError::validation("Named port accepted"));
    }
    Ok(())
}

#[test]
fn parse_positive_usize_rejects_zero() -> AppResult<()> {
    if parse_positive_usize("3")? != 3 {
        return Err(AppError::validation("Wrong value parsed"));
    }
    if !matches!(
        parse_positive_usize("0"),
        Err(ValidationError::MustBePositive { .. })
    ) {
        return Err(AppError::validation("Zero accepted"));
    }
    if !matches!(
        parse_positive_usize("many"),
        Err(ValidationError::InvalidNumber { .. })
    ) {
        return Err(AppError::validation("Text accepted"));
    }
    Ok(())
}

#[test]
fn proxy_subcommand_parses_options() -> AppResult<()> {
    let cli = Cli::try_parse_from([
        "stampede",
        "-v",
        "proxy",
        "--listen-port",
        "9001",
        "--target",
        "backend:80",
        "--mode",
        "echo",
        "-o",
        "out.json",
    ])?;
    if !cli.verbose {
        return Err(AppError::validation("Expected verbose"));
    }
    let Command::Proxy(proxy) = cli.command else {
        return Err(AppError::validation("Expected proxy subcommand"));
    };
    if proxy.listen_port != Some(9001)
        || proxy.mode != Some(ProxyMode::Echo)
        || proxy.output != Some(PathBuf::from("out.json"))
    {
        return Err(AppError::validation(format!("Unexpected args {:?}", proxy)));
    }
    match proxy.target {
        Some(target) if target.host == "backend" && target.port == 80 => Ok(()),
        Some(_) | None => Err(AppError::validation("Unexpected target")),
    }
}

#[test]
fn agent_subcommand_parses_durations() -> AppResult<()> {
    let cli = Cli::try_parse_from([
        "stampede",
        "agent",
        "--console",
        "127.0.0.1:6372",
        "--reconnect-delay",
        "250ms",
        "--workers",
        "4",
    ])?;
    let Command::Agent(agent) = cli.command else {
        return Err(AppError::validation("Expected agent subcommand"));
    };
    if agent.reconnect_delay != Some(Duration::from_millis(250))
        || agent.worker_processes != Some(4)
        || agent.heartbeat_interval.is_some()
    {
        return Err(AppError::validation(format!("Unexpected args {:?}", agent)));
    }
    Ok(())
}

#[test]
fn console_subcommand_rejects_zero_limit() -> AppResult<()> {
    if Cli::try_parse_from(["stampede", "console", "--max-control-connections", "0"]).is_ok() {
        return Err(AppError::validation("Zero connection limit accepted"));
    }
    Ok(())
}

#[test]
fn subcommand_is_required() -> AppResult<()> {
    if Cli::try_parse_from(["stampede"]).is_ok() {
        return Err(AppError::validation("Missing subcommand accepted"));
    }
    Ok(())
}
