//! `rlsguard-init`: administrative CLI for the tenant context record.
//!
//! ```text
//! rlsguard-init <client_id>   store the active tenant (exit 1 if blank)
//! rlsguard-init --clear       remove the stored tenant
//! rlsguard-init --show        print the stored tenant
//! ```
//!
//! An identifier beginning with `-` is passed after `--`, as in
//! `rlsguard-init -- -tenant`.
//!
//! Run by the trusted host before any user queries; the record it writes
//! lives outside the query-issuing workspace with mode `0600`.
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use rlsguard_core::ContextStore;
use tracing_subscriber::EnvFilter;

/// Initialize client context for row-level security.
#[derive(Parser, Debug)]
#[command(name = "rlsguard-init")]
#[command(about, long_about = None, disable_version_flag = true)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["client_id", "clear", "show"])
))]
struct Args {
    /// Client ID to store as the active tenant
    client_id: Option<String>,

    /// Remove the stored client ID
    #[arg(long)]
    clear: bool,

    /// Print the stored client ID
    #[arg(long)]
    show: bool,
}

fn main() -> ExitCode {
    init_tracing();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let result = ContextStore::default_location()
        .context("failed to locate tenant context record")
        .and_then(|store| run(&args, &store, &mut io::stdout().lock()));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
}

fn run(args: &Args, store: &ContextStore, out: &mut impl Write) -> Result<()> {
    if args.clear {
        if store.clear()? {
            writeln!(out, "✓ Client context cleared")?;
        }
        return Ok(());
    }

    if args.show {
        match store.peek() {
            Some(tenant) => writeln!(out, "Current client_id: {tenant}")?,
            None => writeln!(out, "No client_id configured")?,
        }
        return Ok(());
    }

    let raw = args.client_id.as_deref().unwrap_or_default();
    let tenant = store.set(raw)?;
    writeln!(out, "✓ Client context initialized: {}", tenant.redacted())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rlsguard_core::ContextError;
    use tempfile::TempDir;

    use super::*;

    fn test_store() -> (TempDir, ContextStore) {
        let tmp = TempDir::new().unwrap();
        let store = ContextStore::at(tmp.path().join(".agent-config"));
        (tmp, store)
    }

    fn run_with(argv: &[&str], store: &ContextStore) -> (Result<()>, String) {
        let args = Args::try_parse_from(argv).unwrap();
        let mut out = Vec::new();
        let result = run(&args, store, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn set_stores_identifier_and_prints_redacted() {
        let (_tmp, store) = test_store();
        let (result, out) = run_with(
            &["rlsguard-init", "123e4567-e89b-12d3-a456-426614174000"],
            &store,
        );
        result.unwrap();
        assert_eq!(out, "✓ Client context initialized: 123e4567...\n");
        assert_eq!(
            store.get().unwrap().as_str(),
            "123e4567-e89b-12d3-a456-426614174000"
        );
    }

    #[test]
    fn empty_identifier_is_an_error() {
        let (_tmp, store) = test_store();
        for blank in ["", "   "] {
            let (result, out) = run_with(&["rlsguard-init", blank], &store);
            let err = result.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<ContextError>(),
                Some(ContextError::InvalidIdentifier)
            ));
            assert_eq!(err.to_string(), "client_id cannot be empty");
            assert!(out.is_empty());
        }
        assert!(store.peek().is_none());
    }

    #[test]
    fn show_prints_current_or_absence() {
        let (_tmp, store) = test_store();
        let (result, out) = run_with(&["rlsguard-init", "--show"], &store);
        result.unwrap();
        assert_eq!(out, "No client_id configured\n");

        store.set("tenant-42").unwrap();
        let (result, out) = run_with(&["rlsguard-init", "--show"], &store);
        result.unwrap();
        assert_eq!(out, "Current client_id: tenant-42\n");
    }

    #[test]
    fn clear_succeeds_whether_or_not_set() {
        let (_tmp, store) = test_store();
        let (result, out) = run_with(&["rlsguard-init", "--clear"], &store);
        result.unwrap();
        assert!(out.is_empty());

        store.set("tenant-42").unwrap();
        let (result, out) = run_with(&["rlsguard-init", "--clear"], &store);
        result.unwrap();
        assert_eq!(out, "✓ Client context cleared\n");
        assert!(store.peek().is_none());
    }

    #[test]
    fn no_arguments_is_a_usage_error() {
        let err = Args::try_parse_from(["rlsguard-init"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn actions_are_mutually_exclusive() {
        assert!(Args::try_parse_from(["rlsguard-init", "--clear", "--show"]).is_err());
        assert!(Args::try_parse_from(["rlsguard-init", "tenant", "--clear"]).is_err());
    }

    #[test]
    fn unknown_flags_are_rejected() {
        for flag in ["--force", "--version", "-V"] {
            let err = Args::try_parse_from(["rlsguard-init", flag]).unwrap_err();
            assert!(err.use_stderr(), "{flag} should be a usage error");
        }
    }

    #[test]
    fn hyphen_leading_identifier_after_separator() {
        let (_tmp, store) = test_store();
        let (result, out) = run_with(&["rlsguard-init", "--", "-tenant-7"], &store);
        result.unwrap();
        assert_eq!(out, "✓ Client context initialized: -tenant-...\n");
        assert_eq!(store.get().unwrap().as_str(), "-tenant-7");
    }
}
