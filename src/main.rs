mod chat;
mod common;
mod config;
mod network;
mod storage;
#[cfg(test)]
mod testing;
mod ui;

use std::error::Error;

use chat::{ChatSession, ConversationDirectory, resolve_display_names};
use clap::{Parser, Subcommand};
use common::{SessionContext, UserId};
use config::AppConfig;
use dotenvy::dotenv;
use network::{RestBackend, StompTransport};
use storage::ClientDatabase;
use tokio::sync::mpsc;
use ui::{ChatScreenState, ConsoleApp};

#[derive(Parser)]
#[command(
    name = "marketplace_chat",
    version,
    about = "Buyer/seller chat client for the marketplace backend"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Act as this user instead of the stored identity
    #[arg(long, value_name = "USER_ID", global = true)]
    user: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Remember who is using this client
    Login {
        user_id: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Forget the stored identity
    Logout,
    /// Show the current identity
    Whoami,
    /// List conversations of the current user
    Conversations,
    /// Delete every message exchanged with PEER
    DeleteConversation { peer: String },
    /// Open a live chat with PEER
    Chat { peer: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    // Khởi tạo Logger để debug
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);

    storage::ensure_data_dir(&app_config.database_path)?;
    let database = ClientDatabase::with_path(&app_config.database_path)?;

    match cli.command {
        Command::Login { user_id, name } => {
            let user_id = parse_user_id(&user_id)?;
            database.save_identity(&user_id, name.as_deref())?;
            println!("Signed in as {user_id}");
        }
        Command::Logout => {
            if database.clear_identity()? {
                println!("Signed out");
            } else {
                println!("No stored identity");
            }
        }
        Command::Whoami => match database.load_identity()? {
            Some(identity) => match identity.display_name {
                Some(name) => println!("{} ({name})", identity.user_id),
                None => println!("{}", identity.user_id),
            },
            None => println!("Not signed in. Run `login <USER_ID>` first."),
        },
        Command::Conversations => {
            let context = resolve_context(&database, cli.user.as_deref())?;
            let backend = RestBackend::new(&app_config.api_base_url)?;
            let mut directory = ConversationDirectory::new(context, backend);
            let conversations = directory.refresh().await?;
            for line in ui::components::sidebar::render(conversations) {
                println!("{line}");
            }
        }
        Command::DeleteConversation { peer } => {
            let context = resolve_context(&database, cli.user.as_deref())?;
            let peer_id = parse_user_id(&peer)?;
            let backend = RestBackend::new(&app_config.api_base_url)?;
            let mut directory = ConversationDirectory::new(context, backend);
            directory.delete(&peer_id).await?;
            println!("Deleted conversation with {peer_id}");
        }
        Command::Chat { peer } => {
            let context = resolve_context(&database, cli.user.as_deref())?;
            let peer_id = parse_user_id(&peer)?;
            run_chat(&app_config, context, peer_id).await?;
        }
    }

    Ok(())
}

fn parse_user_id(raw: &str) -> Result<UserId, Box<dyn Error>> {
    let id = UserId::new(raw.trim());
    if id.is_blank() {
        return Err("user id must not be empty".into());
    }
    Ok(id)
}

fn resolve_context(
    database: &ClientDatabase,
    user: Option<&str>,
) -> Result<SessionContext, Box<dyn Error>> {
    if let Some(user) = user {
        return Ok(SessionContext::new(parse_user_id(user)?));
    }
    match database.load_identity()? {
        Some(identity) => Ok(SessionContext::new(identity.user_id)),
        None => Err("not signed in; run `login <USER_ID>` or pass --user".into()),
    }
}

async fn run_chat(
    app_config: &AppConfig,
    context: SessionContext,
    peer_id: UserId,
) -> Result<(), Box<dyn Error>> {
    let backend = RestBackend::new(&app_config.api_base_url)?;
    let transport = StompTransport::new(&app_config.broker_url)?;

    let names = resolve_display_names(&backend, [&peer_id]).await;
    log::info!("{} opening chat with {peer_id}", context.user_id);

    // 1. Tạo các kênh giao tiếp (Channels)
    // UI -> Session
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // Session -> UI
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let screen = ChatScreenState::new(context.user_id.clone(), peer_id.clone(), names);
    let session = ChatSession::new(
        context,
        peer_id,
        backend.clone(),
        transport,
        app_config.session_options(),
        event_tx,
    );
    let app = ConsoleApp::new(screen, backend, cmd_tx, event_rx);

    // 2. Session và UI chạy chung một task
    tokio::join!(session.run(cmd_rx), app.run());
    Ok(())
}
