//! Tests for pause, resume, cancel, start, priority and remove.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_pause() {
    match parse(&["datafetch", "pause", "42"]) {
        CliCommand::Pause { ids } => assert_eq!(ids, vec![42]),
        _ => panic!("expected Pause"),
    }
}

#[test]
fn cli_parse_resume() {
    match parse(&["datafetch", "resume", "1"]) {
        CliCommand::Resume { ids } => assert_eq!(ids, vec![1]),
        _ => panic!("expected Resume"),
    }
}

#[test]
fn cli_parse_cancel() {
    match parse(&["datafetch", "cancel", "8", "3", "5"]) {
        CliCommand::Cancel { ids } => assert_eq!(ids, vec![8, 3, 5]),
        _ => panic!("expected Cancel"),
    }
}

#[test]
fn cli_parse_start() {
    match parse(&["datafetch", "start", "9", "10"]) {
        CliCommand::Start { ids } => assert_eq!(ids, vec![9, 10]),
        _ => panic!("expected Start"),
    }
}

#[test]
fn cli_parse_priority() {
    match parse(&["datafetch", "priority", "4", "2"]) {
        CliCommand::Priority { id, priority } => assert_eq!((id, priority), (4, 2)),
        _ => panic!("expected Priority"),
    }
}

#[test]
fn cli_parse_remove() {
    match parse(&["datafetch", "remove", "99"]) {
        CliCommand::Remove { id } => assert_eq!(id, 99),
        _ => panic!("expected Remove"),
    }
}

#[test]
fn cli_rejects_non_numeric_id() {
    assert!(Cli::try_parse_from(["datafetch", "pause", "abc"]).is_err());
    assert!(Cli::try_parse_from(["datafetch", "resume", "1", "x"]).is_err());
}

#[test]
fn cli_lifecycle_requires_an_id() {
    for op in ["pause", "resume", "cancel", "start"] {
        assert!(Cli::try_parse_from(["datafetch", op]).is_err(), "{op}");
    }
}
