use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gemini_chat::config::APP_DIR;
use gemini_chat::conversation::{Rejection, SubmitError};
use gemini_chat::{Config, Conversation, FileStore, GeminiClient};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;

#[derive(Parser)]
#[command(name = "gemini-chat")]
#[command(author, version, about = "Chat with Google Gemini from the terminal")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Model name, e.g. gemini-1.5-flash
    #[arg(long, global = true)]
    model: Option<String>,

    /// Full generateContent URL (overrides --model)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Directory holding config.json and storage.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat (default)
    Chat,
    /// Send one message and print the reply
    Ask {
        /// Your message
        prompt: String,
    },
    /// Manage the stored API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Store an API key
    Set { key: String },
    /// Remove the stored API key
    Clear,
    /// Show whether a key is stored
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat);

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::default_dir()?,
    };

    // The TUI owns the terminal, so its logs go to a file.
    let log_file = matches!(command, Commands::Chat).then(|| log_path(&config_dir));
    init_logging(cli.verbose, log_file.as_deref())?;

    let mut config = Config::load_from(&config_dir)?;
    if cli.model.is_some() {
        config.model = cli.model;
    }
    if cli.endpoint.is_some() {
        config.endpoint = cli.endpoint;
    }

    let store = Arc::new(FileStore::open(config_dir.join("storage.json"))?);
    let mut client = GeminiClient::new(&config, store)?;
    tracing::info!(endpoint = client.endpoint(), "starting");

    match command {
        Commands::Chat => run_chat(client, config.model().to_string()).await,
        Commands::Ask { prompt } => ask(&client, &prompt).await,
        Commands::Key { action } => manage_key(&mut client, action),
    }
}

fn log_path(config_dir: &Path) -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| config_dir.to_path_buf())
        .join("gemini-chat.log")
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_directive = if verbose {
        "gemini_chat=debug"
    } else {
        "gemini_chat=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| anyhow!("failed to initialise logging: {e}"))
}

async fn run_chat(client: GeminiClient, model: String) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let mut app = App::new(client, model);

    let result = run_loop(&mut terminal, &mut events, &mut app).await;

    tui::restore()?;
    result
}

async fn run_loop(
    terminal: &mut tui::Tui,
    events: &mut tui::EventHandler,
    app: &mut App,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }

        app.poll_reply().await;
    }
    Ok(())
}

async fn ask(client: &GeminiClient, prompt: &str) -> Result<()> {
    let mut conversation = Conversation::new();
    let result = conversation.submit(client, prompt).await;

    for notification in conversation.take_notifications() {
        eprintln!("{}: {}", notification.title, notification.description);
    }

    match result {
        Ok(reply) => {
            println!("{}", reply);
            Ok(())
        }
        Err(SubmitError::Rejected(Rejection::CredentialRequired)) => {
            bail!("No API key configured. Run `gemini-chat key set <KEY>` first.")
        }
        Err(SubmitError::Rejected(_)) => bail!("Nothing to send: the message is empty"),
        Err(SubmitError::Completion(e)) => {
            if let Some(apology) = conversation.messages().last() {
                println!("{}", apology.text());
            }
            Err(e.into())
        }
    }
}

fn manage_key(client: &mut GeminiClient, action: KeyAction) -> Result<()> {
    match action {
        KeyAction::Set { key } => {
            client.set_credential(&key)?;
            println!("API key saved.");
        }
        KeyAction::Clear => {
            client.clear_credential()?;
            println!("API key removed.");
        }
        KeyAction::Status => match client.credential() {
            Some(key) => println!("API key configured ({}).", mask_key(key)),
            None => println!("No API key configured."),
        },
    }
    Ok(())
}

fn mask_key(key: &str) -> String {
    let len = key.chars().count();
    if len <= 4 {
        return "*".repeat(len);
    }
    let last_four: String = key.chars().skip(len - 4).collect();
    format!("****{}", last_four)
}
