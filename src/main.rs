use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use visitor::{
    application::error::AppError,
    config,
    infra::{
        error::InfraError,
        gateway::{GatewayClient, GatewayState, ShellRenderer, serve_gateway},
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::configuration(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Stop(_) => run_stop(settings).await,
        config::Command::Health(_) => run_health(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::bind(settings.server.addr, err)))?;

    let state = GatewayState::new(Arc::new(ShellRenderer));
    serve_gateway(listener, state, settings.server.graceful_shutdown)
        .await
        .map_err(AppError::from)?;

    info!(target = "visitor::cli", "render gateway stopped");
    Ok(())
}

async fn run_stop(settings: config::Settings) -> Result<(), AppError> {
    let client = GatewayClient::new(&settings.ssr)?;
    client.shutdown().await?;

    info!(
        target = "visitor::cli",
        url = %client.base_url(),
        "render gateway stopped"
    );
    Ok(())
}

async fn run_health(settings: config::Settings) -> Result<(), AppError> {
    let client = GatewayClient::new(&settings.ssr)?;
    let health = client.health().await?;

    println!("{} ({})", health.status, health.timestamp);
    Ok(())
}
