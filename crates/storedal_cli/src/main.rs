//! Operator entry point.
//!
//! # Responsibility
//! - `version`: print the core version.
//! - `check`: compare declared delete flags with the database's foreign keys.
//! - `reindex`: recompute every product stream.

use log::{error, info};
use std::process::ExitCode;
use storedal_core::definition::catalog;
use storedal_core::write::verify_storage_contract;
use storedal_core::{core_version, init_logging, open_db, DalConfig, ProductStreamIndexer};

const USAGE: &str = "usage: storedal <version|check|reindex>";

fn main() -> ExitCode {
    let command = std::env::args().nth(1).unwrap_or_default();
    if command == "version" {
        println!("storedal_core version={}", core_version());
        return ExitCode::SUCCESS;
    }

    let config = match DalConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(log_dir) = &config.log_dir {
        if let Err(err) = init_logging(config.log_level, log_dir) {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    }

    match run(&command, &config) {
        Ok(code) => code,
        Err(message) => {
            error!("event=cli_command module=cli status=error command={command} error={message}");
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: &str, config: &DalConfig) -> Result<ExitCode, String> {
    match command {
        "check" => {
            let conn = open_db(&config.database).map_err(|err| err.to_string())?;
            let mismatches =
                verify_storage_contract(&conn, &catalog::registry()).map_err(|err| err.to_string())?;
            for mismatch in &mismatches {
                println!(
                    "{}.{}: {}.{} expected ON DELETE {} found {}",
                    mismatch.entity,
                    mismatch.association,
                    mismatch.table,
                    mismatch.column,
                    mismatch.expected,
                    mismatch.actual.as_deref().unwrap_or("no foreign key")
                );
            }
            info!(
                "event=cli_command module=cli status=ok command=check mismatches={}",
                mismatches.len()
            );
            if mismatches.is_empty() {
                println!("storage contract ok");
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        "reindex" => {
            let conn = open_db(&config.database).map_err(|err| err.to_string())?;
            let report = ProductStreamIndexer::new(catalog::registry())
                .index_all(&conn, config.indexer_batch_size)
                .map_err(|err| err.to_string())?;
            println!(
                "product streams: {} valid, {} invalid, {} failed",
                report.valid_count(),
                report.invalid_count(),
                report.failed_count()
            );
            Ok(if report.failed_count() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        _ => Err(USAGE.to_string()),
    }
}
