#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod bot;
mod chat;
mod cli;
mod config;
mod discord;
mod scheduler;
mod store;
mod utils;
mod web;

use bot::{BatchOutcome, BotCore, TallyOutcome};
use cli::{Cli, Commands};
use config::Config;
use discord::DiscordClient;
use scheduler::Scheduler;
use store::{AnnouncementStore, StoreBackend};
use utils::Notifier;
use utils::task::spawn_supervised;
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Arc::new(Config::load_from_file(&cli.config)?);
    utils::logging::init_tracing(&config.logging);

    let command = cli.command();
    if command == Commands::ValidateConfig {
        println!("configuration is valid");
        return Ok(());
    }

    let store = Arc::new(AnnouncementStore::load(StoreBackend::from_config(&config)).await);
    if command == Commands::ShowRecords {
        if store.is_empty() {
            println!("no announcements recorded");
        }
        for record in store.records() {
            println!("{}\t{}", record.channel_id, record.message_id);
        }
        return Ok(());
    }

    let discord = DiscordClient::new(&config)?;
    let chat = Arc::new(discord.clone());
    let notifier = Arc::new(Notifier::from_channels(chat.clone(), &config.channels));
    let bot = Arc::new(BotCore::new(
        config.clone(),
        store,
        chat,
        notifier.clone(),
    )?);
    discord.set_bot(bot.clone()).await;

    match command {
        Commands::PostNow => {
            print_batch(&bot.post_all().await);
            Ok(())
        }
        Commands::TallyNow => {
            match bot.tally().await {
                TallyOutcome::Completed(batch) => print_batch(&batch),
                aborted => println!("{aborted}"),
            }
            Ok(())
        }
        _ => run(config, discord, bot, notifier).await,
    }
}

fn print_batch(batch: &BatchOutcome) {
    for result in &batch.results {
        println!("{}\t{}", result.channel_id, result.status);
    }
    println!("{batch}");
}

async fn run(
    config: Arc<Config>,
    discord: DiscordClient,
    bot: Arc<BotCore>,
    notifier: Arc<Notifier>,
) -> Result<()> {
    info!("lineup bot starting up");

    discord.start().await?;
    let mut handles = Scheduler::new(bot.clone())?.start();

    let web_server = WebServer::new(config.clone());
    handles.push(spawn_supervised("keep-alive server", notifier.clone(), async move {
        web_server.start().await
    }));
    let web_config = config.web.clone();
    handles.push(spawn_supervised("self-ping", notifier.clone(), async move {
        web::keepalive::run_self_ping(&web_config).await
    }));

    shutdown_signal().await;

    notifier.shutdown().await;
    for handle in &handles {
        handle.abort();
    }
    if let Err(err) = discord.stop().await {
        error!("discord shutdown error: {}", err);
    }

    info!("lineup bot shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, beginning shutdown"),
        _ = terminate => info!("received SIGTERM, beginning shutdown"),
    }
}
