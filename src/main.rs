use std::process::ExitCode;
use std::sync::Arc;

use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::ChatKind;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use feedbot::chat_log::ChatLogLayer;
use feedbot::config::Config;
use feedbot::relay::{Database, RelayConfig, RelayEngine, TelegramClient, telegram_to_inbound};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "feedbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    let _guard = match init_logging(&config, &bot) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("❌ Failed to set up logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("🚀 Starting feedbot...");
    info!("Loaded config from {config_path}");
    info!("Admin: {}", config.admin_user_id);
    info!("Database: {:?}", config.database_path);

    match bot.get_me().await {
        Ok(me) => info!("Bot user ID: {}, username: @{}", me.id, me.username()),
        Err(e) => warn!("Failed to get bot info: {e}"),
    }

    let database = match Database::open(&config.database_path) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database {:?}: {e}", config.database_path);
            return ExitCode::FAILURE;
        }
    };

    let relay_config = RelayConfig {
        admin_user_id: config.admin_user_id.0 as i64,
        page_size: config.feedback_page_size,
    };
    let telegram = Arc::new(TelegramClient::new(bot.clone()));
    let engine = Arc::new(RelayEngine::new(relay_config, database, telegram));

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine.clone()])
        .enable_ctrlc_handler()
        .build();

    #[cfg(unix)]
    tokio::spawn(shutdown_on_sigterm(dispatcher.shutdown_token()));

    dispatcher.dispatch().await;
    drop(dispatcher);
    info!("🛑 Dispatcher stopped");

    match Arc::try_unwrap(engine) {
        Ok(engine) => {
            if let Err(e) = engine.close() {
                error!("Failed to close database: {e}");
                return ExitCode::FAILURE;
            }
        }
        Err(_) => warn!("Engine still referenced at shutdown, database closes on drop"),
    }

    ExitCode::SUCCESS
}

fn init_logging(config: &Config, bot: &Bot) -> std::io::Result<WorkerGuard> {
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("feedbot.log"))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let chat_layer = config
        .log_chat_id
        .map(|chat_id| ChatLogLayer::new(bot.clone(), chat_id));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(chat_layer)
        .init();

    Ok(guard)
}

/// Stop taking updates on SIGTERM; in-flight handlers are allowed to finish.
#[cfg(unix)]
async fn shutdown_on_sigterm(token: ShutdownToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {e}");
            return;
        }
    };
    sigterm.recv().await;
    info!("SIGTERM received, shutting down");

    match token.shutdown() {
        Ok(done) => done.await,
        Err(_) => warn!("Dispatcher was not running at shutdown"),
    }
}

async fn handle_message(msg: Message, engine: Arc<RelayEngine>) -> ResponseResult<()> {
    // Feedback is a private conversation with the bot.
    if !matches!(msg.chat.kind, ChatKind::Private(_)) {
        return Ok(());
    }

    let Some(inbound) = telegram_to_inbound(&msg) else {
        return Ok(());
    };

    engine.handle_message(inbound).await;
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, engine: Arc<RelayEngine>) -> ResponseResult<()> {
    let origin = q
        .message
        .as_ref()
        .map(|m| (m.chat().id.0, m.id().0 as i64));
    let data = q.data.clone().unwrap_or_default();

    let answer = engine.handle_callback(q.from.id.0 as i64, origin, &data).await;

    let mut request = bot.answer_callback_query(q.id.clone());
    if !answer.is_empty() {
        request = request.text(answer);
    }
    if let Err(e) = request.await {
        warn!("Failed to answer callback query: {e}");
    }
    Ok(())
}
