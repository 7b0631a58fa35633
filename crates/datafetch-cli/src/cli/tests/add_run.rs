//! Tests for add, run and status.

use super::parse;
use crate::cli::CliCommand;

#[test]
fn cli_parse_add_defaults() {
    match parse(&["datafetch", "add", "3", "/data/era5"]) {
        CliCommand::Add {
            source_id,
            save_path,
            pattern,
            priority,
            max_retries,
            timeout,
        } => {
            assert_eq!(source_id, 3);
            assert_eq!(save_path, "/data/era5");
            assert!(pattern.is_none());
            assert_eq!((priority, max_retries, timeout), (5, 3, 300));
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_options() {
    match parse(&[
        "datafetch",
        "add",
        "1",
        "out",
        "--pattern",
        "t2m_*.nc",
        "--priority",
        "1",
        "--max-retries",
        "0",
        "--timeout",
        "60",
    ]) {
        CliCommand::Add {
            pattern,
            priority,
            max_retries,
            timeout,
            ..
        } => {
            assert_eq!(pattern.as_deref(), Some("t2m_*.nc"));
            assert_eq!((priority, max_retries, timeout), (1, 0, 60));
        }
        _ => panic!("expected Add with options"),
    }
}

#[test]
fn cli_parse_run() {
    match parse(&["datafetch", "run"]) {
        CliCommand::Run {
            max_concurrent,
            until_idle,
        } => {
            assert!(max_concurrent.is_none());
            assert!(!until_idle);
        }
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_options() {
    match parse(&["datafetch", "run", "--max-concurrent", "2", "--until-idle"]) {
        CliCommand::Run {
            max_concurrent,
            until_idle,
        } => {
            assert_eq!(max_concurrent, Some(2));
            assert!(until_idle);
        }
        _ => panic!("expected Run with options"),
    }
}

#[test]
fn cli_parse_status_json() {
    match parse(&["datafetch", "status", "--json"]) {
        CliCommand::Status {
            status,
            source_id,
            skip,
            limit,
            json,
        } => {
            assert!(json);
            assert!(status.is_none() && source_id.is_none() && limit.is_none());
            assert_eq!(skip, 0);
        }
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_status_filters() {
    match parse(&[
        "datafetch", "status", "--status", "failed", "--source", "2", "--skip", "10", "--limit",
        "5",
    ]) {
        CliCommand::Status {
            status,
            source_id,
            skip,
            limit,
            json,
        } => {
            assert_eq!(status.as_deref(), Some("failed"));
            assert_eq!(source_id, Some(2));
            assert_eq!((skip, limit), (10, Some(5)));
            assert!(!json);
        }
        _ => panic!("expected Status with filters"),
    }
}
