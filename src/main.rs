use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use identity_import::auth::{PasswordService, UuidGenerator};
use identity_import::cli::{self, CliError, Invocation, USAGE};
use identity_import::config::ImportSettings;
use identity_import::db;
use identity_import::error::{ImportError, ImportResult};
use identity_import::import::{Dispatcher, ImportReport, PipelineOptions};
use identity_import::init_logger;

#[tokio::main]
async fn main() -> ExitCode {
    init_logger();

    let invocation = match cli::parse_args(std::env::args_os()) {
        Ok(invocation) => invocation,
        Err(CliError::Help(text)) => {
            println!("{text}");
            return ExitCode::SUCCESS;
        }
        Err(CliError::Usage) => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(invocation).await {
        Ok(report) => {
            if !report.warnings.is_empty() {
                log::info!(
                    "{} finished with {} reference warnings",
                    report.entity,
                    report.warnings.len()
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            if err.is_startup() {
                log::error!("import did not start: {}", err);
            } else {
                log::error!("import failed: {}", err);
            }
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(invocation: Invocation) -> ImportResult<ImportReport> {
    let settings = ImportSettings::load()?;
    settings.validate()?;

    let hasher = Arc::new(PasswordService::new()?);
    let dispatcher = Dispatcher::new(hasher, Arc::new(UuidGenerator));
    dispatcher.lookup(&invocation.entity)?;
    if !invocation.file.is_file() {
        return Err(ImportError::FileNotFound(invocation.file));
    }

    let mut store = db::connect(&settings).await?;
    log::info!("connected to {} store", settings.provider);

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupt received, stopping after the current row");
                cancel.cancel();
            }
        })
    };

    let result = dispatcher
        .dispatch(
            &invocation.entity,
            &invocation.file,
            &mut store,
            PipelineOptions::from(&settings),
            cancel,
        )
        .await;

    interrupt.abort();
    store.close().await;
    result
}
