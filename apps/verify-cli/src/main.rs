//! Verify a database row against the blockchain-anchored audit trail.

mod verifier;

use std::process::ExitCode;
use std::sync::Arc;

use anchor_near::{NearRpcClient, NearViewClient};
use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Arg, ArgAction, ArgGroup, Command};
use etrap_storage::s3::S3ObjectStore;
use etrap_storage::ObjectStore;
use rusoto_core::Region;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verifier::{SearchHints, StoreResolver, VerificationReport, VerificationStatus, Verifier};

/// Build the CLI command definition.
///
/// Extracted so tests can call `build_cli().try_get_matches_from(...)`
/// without hitting `std::process::exit` on parse errors.
fn build_cli() -> Command {
    Command::new("etrap-verify")
        .about("Verify a database transaction against the blockchain-anchored audit trail")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("contract")
                .short('c')
                .long("contract")
                .help("NEAR contract id (e.g. acme.testnet)")
                .required(true),
        )
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .help("NEAR network")
                .value_parser(["testnet", "mainnet", "localnet"])
                .default_value("testnet"),
        )
        .arg(
            Arg::new("data")
                .long("data")
                .help("Transaction data as a JSON string (\"-\" reads stdin)"),
        )
        .arg(
            Arg::new("data-file")
                .long("data-file")
                .help("Path to a file containing the transaction JSON"),
        )
        .group(
            ArgGroup::new("input")
                .args(["data", "data-file"])
                .required(true),
        )
        .arg(
            Arg::new("hint-batch")
                .long("hint-batch")
                .help("Specific batch id to check first"),
        )
        .arg(
            Arg::new("hint-table")
                .long("hint-table")
                .help("Table name hint for a narrower search"),
        )
        .arg(
            Arg::new("hint-database")
                .long("hint-database")
                .help("Database name hint"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Output the result as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Minimal output (just the verification status)")
                .action(ArgAction::SetTrue),
        )
}

/// Resolve the transaction payload: inline JSON, `-` for stdin, or a file.
fn resolve_payload(data: Option<&str>, data_file: Option<&str>) -> Result<Value> {
    if let Some(inline) = data {
        if inline == "-" {
            let stdin = std::io::read_to_string(std::io::stdin())
                .context("Failed to read transaction data from stdin")?;
            return serde_json::from_str(&stdin).context("Invalid JSON on stdin");
        }
        return serde_json::from_str(inline).context("Invalid inline JSON");
    }
    if let Some(path) = data_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read data file: {path}"))?;
        return serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in file: {path}"));
    }
    anyhow::bail!("no transaction data given")
}

/// Builds an S3 store per bucket named on chain; all buckets share the
/// configured region.
struct S3StoreResolver {
    region: Region,
}

impl StoreResolver for S3StoreResolver {
    fn store_for(&self, bucket: &str) -> Arc<dyn ObjectStore> {
        Arc::new(S3ObjectStore::new(bucket, self.region.clone()))
    }
}

fn print_human(report: &VerificationReport, contract: &str, network: &str) {
    let line = "-".repeat(60);
    match report.status {
        VerificationStatus::Verified => {
            println!("\nTRANSACTION VERIFIED");
            println!("{line}");
            println!("\nTransaction:");
            println!("  Hash:      {}", report.transaction_hash);
            if let Some(operation) = &report.operation {
                println!("  Operation: {operation}");
            }
            if let Some(database) = &report.database {
                println!("  Database:  {database}");
            }
            if let Some(table) = &report.table {
                println!("  Table:     {table}");
            }
            println!("\nBlockchain record:");
            if let Some(token_id) = &report.token_id {
                println!("  Token id:    {token_id}");
            }
            println!("  Contract:    {contract}");
            println!("  Network:     {network}");
            if let Some(root) = &report.merkle_root {
                println!("  Merkle root: {root}");
            }
            if let Some(timestamp) = report.anchored_timestamp_ms {
                if let Some(datetime) = DateTime::from_timestamp_millis(timestamp) {
                    println!("\nRecorded on chain at {} UTC", datetime.format("%Y-%m-%d %H:%M:%S"));
                    println!("  This timestamp is the authoritative anchoring time.");
                }
            }
            if let Some(length) = report.proof_length {
                println!("\nProof: {length} sibling steps");
            }
            if let (Some(bucket), Some(key)) = (&report.s3_bucket, &report.s3_key) {
                println!("Bundle: s3://{bucket}/{key}");
            }
            println!("\nBatches searched: {}", report.batches_searched);
        }
        VerificationStatus::NotVerified => {
            println!("\nTRANSACTION NOT VERIFIED");
            println!("{line}");
            println!("\nTransaction hash: {}", report.transaction_hash);
            println!("Batches searched: {}", report.batches_searched);
            if let Some(message) = &report.message {
                println!("Status: {message}");
            }
            println!("\nPossible reasons:");
            println!("  - the transaction has not been captured and anchored yet");
            println!("  - the transaction data was modified");
            println!("  - the batch is older than the searched window (use hints)");
        }
        VerificationStatus::TamperEvidence => {
            println!("\nTAMPER EVIDENCE");
            println!("{line}");
            println!("\nTransaction hash: {}", report.transaction_hash);
            if let Some(token_id) = &report.token_id {
                println!("Found in token:   {token_id}");
            }
            if let Some(message) = &report.message {
                println!("Status: {message}");
            }
            println!("\nThe hash is recorded in the batch, but its inclusion proof no");
            println!("longer reaches the anchored Merkle root. The stored bundle does");
            println!("not match what was anchored on chain.");
        }
    }
}

async fn run() -> Result<ExitCode> {
    let matches = build_cli().get_matches();

    let contract = matches.get_one::<String>("contract").expect("required arg");
    let network = matches.get_one::<String>("network").expect("defaulted arg");
    let json_output = matches.get_flag("json");
    let quiet = matches.get_flag("quiet");

    let payload = resolve_payload(
        matches.get_one::<String>("data").map(String::as_str),
        matches.get_one::<String>("data-file").map(String::as_str),
    )?;

    let hints = SearchHints {
        batch_id: matches.get_one::<String>("hint-batch").cloned(),
        table: matches.get_one::<String>("hint-table").cloned(),
        database: matches.get_one::<String>("hint-database").cloned(),
    };

    if !quiet && !json_output {
        println!("ETRAP transaction verification");
        println!("  Contract: {contract}");
        println!("  Network:  {network}");
    }

    let rpc = NearRpcClient::new(NearRpcClient::endpoint_for(network));
    let index = NearViewClient::new(rpc, contract.clone());
    let region: Region = std::env::var("AWS_DEFAULT_REGION")
        .unwrap_or_else(|_| "us-west-2".to_string())
        .parse()
        .unwrap_or(Region::UsWest2);
    let verifier = Verifier::new(Box::new(index), Box::new(S3StoreResolver { region }));

    let report = verifier
        .verify(&payload, &hints)
        .await
        .map_err(|err| anyhow::anyhow!("verification failed: {err}"))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if quiet {
        println!("{}", report.status);
    } else {
        print_human(&report, contract, network);
    }

    Ok(if report.verified {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // ---------------------------------------------------------------------------
    // Argument parsing
    // ---------------------------------------------------------------------------

    #[test]
    fn test_cli_requires_contract_and_data() {
        let result = build_cli().try_get_matches_from(["etrap-verify"]);
        assert!(result.is_err(), "expected parse error when args are missing");

        let result = build_cli().try_get_matches_from(["etrap-verify", "-c", "acme.testnet"]);
        assert!(result.is_err(), "expected parse error without data input");
    }

    #[test]
    fn test_cli_parses_minimal_invocation() {
        let m = build_cli()
            .try_get_matches_from(["etrap-verify", "-c", "acme.testnet", "--data", r#"{"id":1}"#])
            .expect("valid args should parse");

        assert_eq!(m.get_one::<String>("contract").unwrap(), "acme.testnet");
        assert_eq!(m.get_one::<String>("network").unwrap(), "testnet");
        assert!(!m.get_flag("json"));
        assert!(!m.get_flag("quiet"));
    }

    #[test]
    fn test_cli_rejects_both_data_sources() {
        let result = build_cli().try_get_matches_from([
            "etrap-verify",
            "-c",
            "acme.testnet",
            "--data",
            "{}",
            "--data-file",
            "tx.json",
        ]);
        assert!(result.is_err(), "data and data-file are mutually exclusive");
    }

    #[test]
    fn test_cli_parses_hints_and_output_flags() {
        let m = build_cli()
            .try_get_matches_from([
                "etrap-verify",
                "-c",
                "acme.testnet",
                "-n",
                "mainnet",
                "--data-file",
                "tx.json",
                "--hint-batch",
                "BATCH-2025-06-14-abcd1234",
                "--hint-table",
                "financial_transactions",
                "--hint-database",
                "etrapdb",
                "--json",
                "-q",
            ])
            .expect("valid args with flags should parse");

        assert_eq!(m.get_one::<String>("network").unwrap(), "mainnet");
        assert_eq!(
            m.get_one::<String>("hint-batch").unwrap(),
            "BATCH-2025-06-14-abcd1234"
        );
        assert_eq!(
            m.get_one::<String>("hint-table").unwrap(),
            "financial_transactions"
        );
        assert_eq!(m.get_one::<String>("hint-database").unwrap(), "etrapdb");
        assert!(m.get_flag("json"));
        assert!(m.get_flag("quiet"));
    }

    #[test]
    fn test_cli_rejects_unknown_network() {
        let result = build_cli().try_get_matches_from([
            "etrap-verify",
            "-c",
            "acme.testnet",
            "--data",
            "{}",
            "-n",
            "betanet",
        ]);
        assert!(result.is_err(), "unknown network must be rejected");
    }

    // ---------------------------------------------------------------------------
    // Payload resolution
    // ---------------------------------------------------------------------------

    #[test]
    fn test_resolve_payload_inline_json() {
        let v = resolve_payload(Some(r#"{"id":123,"account_id":"ACC500"}"#), None).unwrap();
        assert_eq!(v["id"], 123);
        assert_eq!(v["account_id"], "ACC500");
    }

    #[test]
    fn test_resolve_payload_inline_invalid_json() {
        assert!(resolve_payload(Some("{not json"), None).is_err());
    }

    #[test]
    fn test_resolve_payload_from_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, r#"{{"id":7,"amount":10000}}"#).unwrap();
        let v = resolve_payload(None, Some(tmp.path().to_str().unwrap())).unwrap();
        assert_eq!(v["amount"], 10000);
    }

    #[test]
    fn test_resolve_payload_file_not_found() {
        let result = resolve_payload(None, Some("/nonexistent/tx.json"));
        assert!(result.is_err());
        let msg = format!("{}", result.unwrap_err());
        assert!(msg.contains("Failed to read data file"), "got: {msg}");
    }

    // ---------------------------------------------------------------------------
    // Status rendering
    // ---------------------------------------------------------------------------

    #[test]
    fn test_status_display_matches_the_contract() {
        assert_eq!(VerificationStatus::Verified.to_string(), "VERIFIED");
        assert_eq!(VerificationStatus::NotVerified.to_string(), "NOT_VERIFIED");
        assert_eq!(VerificationStatus::TamperEvidence.to_string(), "TAMPER_EVIDENCE");
    }
}
