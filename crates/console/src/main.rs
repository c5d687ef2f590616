//! `traycam-console` -- operator console for tray waste capture.
//!
//! Logs in, loads the menu, connects to the realtime frame stream and
//! turns stdin lines into session intents. See [`traycam_console::config`]
//! for the environment variables and type `help` at the prompt for the
//! command list.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use traycam_console::commands::{self, Command};
use traycam_console::config::ConsoleConfig;
use traycam_console::lifecycle::session_ended;
use traycam_console::render;
use traycam_core::machine::SessionMachine;
use traycam_core::session::Session;
use traycam_realtime::api::ControlApi;
use traycam_realtime::auth::{AuthApi, TokenStore};
use traycam_realtime::client::RealtimeClient;
use traycam_realtime::driver::SessionDriver;
use traycam_realtime::lookup::LookupApi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "traycam_console=info,traycam_realtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ConsoleConfig::from_env()?;
    let flight_number = config
        .flight_number
        .clone()
        .context("TRAYCAM_FLIGHT_NUMBER environment variable is required")?;
    let menu_code = config
        .menu_code
        .clone()
        .context("TRAYCAM_MENU_CODE environment variable is required")?;

    tracing::info!(
        realtime_url = %config.realtime_url,
        api_url = %config.api_url,
        transport = ?config.transport,
        flight_number = %flight_number,
        menu_code = %menu_code,
        "Starting traycam-console",
    );

    let tokens = TokenStore::load(&config.token_path);
    AuthApi::new(&config.api_url, tokens.clone())
        .ensure_logged_in(config.username.as_deref(), config.password.as_deref())
        .await
        .context("login failed")?;

    let dishes = match &config.dishes {
        Some(dishes) => dishes.clone(),
        None => {
            let menu_id = config
                .menu_id
                .as_deref()
                .context("set TRAYCAM_MENU_ID or TRAYCAM_DISHES")?;
            LookupApi::new(&config.api_url, tokens.clone())
                .dishes(menu_id)
                .await
                .with_context(|| format!("could not load dishes for menu {menu_id}"))?
        }
    };
    tracing::info!(dish_count = dishes.len(), "Menu loaded");

    let session = Session::new(flight_number, menu_code, dishes, config.food_level_plan()?)?;
    let control = Arc::new(ControlApi::new(&config.api_url).with_tokens(tokens));
    let handle = SessionDriver::start(
        SessionMachine::new(session),
        RealtimeClient::new(&config.realtime_url),
        control,
        config.driver_config(),
    );

    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("* {}", render::event_line(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Console fell behind session events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut snapshots = handle.watch();

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => break,
            _ = session_ended(&mut snapshots) => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };

        match commands::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(Command::Help)) => println!("{}", commands::HELP),
            Ok(Some(Command::Status)) => println!("{}", render::status_report(&handle.snapshot())),
            Ok(Some(Command::Intents(intents))) => {
                for intent in intents {
                    if let Err(e) = handle.send(intent).await {
                        println!("! {e}");
                        break;
                    }
                }
            }
            Err(e) => println!("! {e}"),
        }
    }

    handle.shutdown().await;
    printer.abort();
    tracing::info!("Console stopped");
    Ok(())
}
