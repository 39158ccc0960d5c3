use std::process;

use shiftcache::{
    application::{error::AppError, simulation},
    cache::CacheConfig,
    config,
    infra::telemetry,
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Simulate(config::SimulateArgs {
            scenario: config::Scenario::WithdrawOk,
            overrides: config::SettingsOverrides::default(),
        }));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Simulate(args) => run_simulate(&settings, args).await,
        config::Command::Config(_) => run_print_config(&settings),
    }
}

async fn run_simulate(
    settings: &config::Settings,
    args: config::SimulateArgs,
) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    info!(
        target = "shiftcache::simulate",
        scenario = args.scenario.as_str(),
        max_entries = cache_config.max_entries,
        mutation_timeout_ms = cache_config.mutation_timeout_ms,
        "Starting simulation"
    );

    let report = simulation::run(args.scenario, &cache_config).await?;
    println!("{report}");
    Ok(())
}

fn run_print_config(settings: &config::Settings) -> Result<(), AppError> {
    let rendered = settings
        .to_toml()
        .map_err(|err| AppError::unexpected(format!("failed to render settings: {err}")))?;
    print!("{rendered}");
    Ok(())
}
