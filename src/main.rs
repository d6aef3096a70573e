use std::process;

use supercache::{
    application::{
        AppError, CacheContext, ControlError, FlushSelector, PreloadAction, Report,
        TrustedContext, enabled_message,
    },
    config::{self, Command, Settings},
    infra::{error::InfraError, telemetry},
};
use tokio::sync::broadcast;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    eprintln!("Error: {error}");
    if matches!(error, AppError::Control(_)) {
        return;
    }

    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %error, cause = report.root_cause(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, cause = report.root_cause(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;
    let context = CacheContext::from_settings(&settings).await?;
    let controller = &context.controller;

    let report = match cli_args.command {
        Command::Flush(args) => {
            let selector = FlushSelector::from_options(args.post_id, args.permalink);
            controller.flush(selector).await?.report()
        }
        Command::Status => controller.status()?.report(),
        Command::Enable => {
            controller.enable()?;
            Report::success(enabled_message(true))
        }
        Command::Disable => {
            controller.disable()?;
            Report::success(enabled_message(false))
        }
        Command::Preload(args) => {
            let action = PreloadAction::from_flags(args.status, args.cancel);
            match controller.preload(action).await {
                Ok(outcome) => outcome.report(),
                Err(ControlError::AlreadyRunning) => {
                    let status = controller.preload_status();
                    print!("{}", Report::new().with_line(status.describe()));
                    return Err(ControlError::AlreadyRunning.into());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Defaults => {
            let trusted = TrustedContext::operator(operator_name());
            controller.apply_defaults(&trusted)?.report()
        }
        Command::Run(_) => return run_scheduler(&context, &settings).await,
    };

    print!("{report}");
    Ok(())
}

async fn run_scheduler(context: &CacheContext, settings: &Settings) -> Result<(), AppError> {
    let scheduler = context.scheduler(settings);
    let (shutdown, _) = broadcast::channel(1);
    let handle = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::signal::ctrl_c().await.map_err(InfraError::from)?;
    info!("Shutdown requested");
    // Both loops may already have stopped, leaving no receivers.
    let _ = shutdown.send(());

    handle
        .await
        .map_err(|err| AppError::unexpected(format!("scheduler task failed: {err}")))
}

fn operator_name() -> String {
    std::env::var("USER").unwrap_or_else(|_| "operator".to_string())
}
