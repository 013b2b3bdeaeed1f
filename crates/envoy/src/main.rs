use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use vibe_envoy::ui::{self, Interrupts, Renderer};
use vibe_envoy::{
    ApiClient, FileStore, Preferences, SessionController, StreamHandle, StreamOutcome, ViewEvent,
};
use vibe_shared::Mode;

#[derive(Debug, Parser)]
#[command(author, version, about = "Envoy - terminal client for the vibe coding agent")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start interactive chat (default)
    Chat {
        #[arg(long, default_value = "agent")]
        mode: Mode,
    },
    /// Send a single prompt and stream the reply
    Send {
        prompt: String,
        #[arg(long, default_value = "agent")]
        mode: Mode,
        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },
    /// List available models
    Models,
    /// Manage stored conversations
    Conversations {
        #[command(subcommand)]
        command: Option<ConversationCommand>,
    },
    /// List a directory on the agent host
    Browse { path: Option<String> },
    /// Create a directory on the agent host
    Mkdir { path: String },
    /// Check that the backend is reachable
    Health,
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum ConversationCommand {
    List,
    Show { id: String },
    Delete { id: String },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    Set { key: ConfigKey, value: String },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ConfigKey {
    Server,
    Dir,
    Model,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let store = FileStore::default_location()?;
    let preferences = Preferences::load(Box::new(store))
        .context("Failed to load config")?
        .with_env_override();
    let client = ApiClient::new(preferences.server_url());
    let mut controller = SessionController::new(client, preferences);

    match cli.command.unwrap_or(Command::Chat { mode: Mode::Agent }) {
        Command::Chat { mode } => interactive_chat(&mut controller, mode).await?,
        Command::Send {
            prompt,
            mode,
            conversation,
        } => {
            if let Some(id) = conversation {
                controller.open_conversation(&id).await?;
            }
            single_message(&controller, prompt, mode).await?;
        }
        Command::Models => {
            for model in controller.client().models().await? {
                println!("{:<20} {}", model.id, model.name);
            }
        }
        Command::Conversations { command } => {
            handle_conversations(&mut controller, command.unwrap_or(ConversationCommand::List))
                .await?
        }
        Command::Browse { path } => {
            let path = path.unwrap_or_else(|| controller.preferences().working_dir().to_string());
            let listing = controller.client().browse(&path).await?;
            if let Some(error) = listing.error {
                anyhow::bail!("{}: {}", listing.current, error);
            }
            println!("{}", listing.current);
            for entry in listing.entries {
                let marker = if entry.is_dir { "/" } else { "" };
                println!("  {}{}", entry.name, marker);
            }
        }
        Command::Mkdir { path } => {
            let result = controller.client().mkdir(&path).await?;
            if let Some(error) = result.error {
                anyhow::bail!("{}", error);
            }
            println!("Created {}", result.path.unwrap_or(path));
        }
        Command::Health => {
            let url = controller.client().base_url().to_string();
            match controller.client().health().await {
                Ok(true) => println!("Backend at {} is up", url),
                Ok(false) => anyhow::bail!("Backend at {} answered with an error", url),
                Err(e) => anyhow::bail!("Failed to reach backend at {}: {}", url, e),
            }
        }
        Command::Config { command } => {
            handle_config(&mut controller, command.unwrap_or(ConfigCommand::Show))?
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "vibe_envoy=debug" } else { "vibe_envoy=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stderr keeps log lines out of the rendered chat
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

async fn single_message(controller: &SessionController, prompt: String, mode: Mode) -> Result<()> {
    let mut interrupts = Interrupts::listen();
    let outcome = stream_reply(controller, &mut interrupts, prompt, mode).await?;
    if let StreamOutcome::Errored { message } = outcome {
        anyhow::bail!(message);
    }
    Ok(())
}

async fn interactive_chat(controller: &mut SessionController, mut mode: Mode) -> Result<()> {
    println!("Envoy chat started in {} mode. Type 'quit' to exit.", mode);
    println!("Commands: /new, /mode <agent|plan|ask>, /model <name>, /dir <path>\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupts = Interrupts::listen();

    loop {
        print!("You: ");
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupts.recv() => {
                println!("\nGoodbye!");
                break;
            }
        };
        let Some(input) = line else {
            break;
        };
        let input = input.trim();

        if input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            if let Err(e) = run_slash_command(controller, command, &mut mode) {
                eprintln!("{}", e);
            }
            continue;
        }

        println!(); // Blank line before response
        if let Err(e) = stream_reply(controller, &mut interrupts, input.to_string(), mode).await {
            eprintln!("Error: {}\n", e);
        }
        println!();
    }

    Ok(())
}

fn run_slash_command(controller: &mut SessionController, command: &str, mode: &mut Mode) -> Result<()> {
    let (name, arg) = command
        .split_once(' ')
        .map(|(name, arg)| (name, arg.trim()))
        .unwrap_or((command, ""));

    match name {
        "new" => {
            controller.new_conversation()?;
            println!("Started a new conversation.");
        }
        "mode" => {
            *mode = arg.parse().map_err(anyhow::Error::msg)?;
            println!("Mode: {}", mode);
        }
        "model" if !arg.is_empty() => {
            controller.set_model(arg)?;
            println!("Model: {}", arg);
        }
        "dir" if !arg.is_empty() => {
            controller.set_working_dir(arg)?;
            println!("Working directory: {}", arg);
        }
        _ => anyhow::bail!("Unknown command: /{}", command),
    }
    Ok(())
}

/// Stream one reply, rendering as it arrives. Ctrl-C cancels the stream.
async fn stream_reply(
    controller: &SessionController,
    interrupts: &mut Interrupts,
    prompt: String,
    mode: Mode,
) -> Result<StreamOutcome> {
    let mut events = controller.view().subscribe();
    let mut renderer = Renderer::new(controller.view().clone());
    let handle = controller.send(prompt, mode)?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    renderer.handle(&event);
                    if is_end_of(&handle, controller, &event) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "renderer lagged behind view events");
                    if handle.is_finished() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = interrupts.recv() => controller.cancel(&handle),
        }
    }

    Ok(handle.wait().await)
}

fn is_end_of(handle: &StreamHandle, controller: &SessionController, event: &ViewEvent) -> bool {
    let ViewEvent::StreamFinished { message, .. } = event else {
        return false;
    };
    controller.view().read(|state| {
        state
            .messages()
            .get(*message)
            .is_some_and(|m| m.id == handle.message_id())
    })
}

async fn handle_conversations(
    controller: &mut SessionController,
    command: ConversationCommand,
) -> Result<()> {
    match command {
        ConversationCommand::List => {
            let conversations = controller.list_conversations().await?;
            if conversations.is_empty() {
                println!("No conversations yet.");
            }
            for conv in conversations {
                println!(
                    "{}  {:<40} {:>3} msgs  {}",
                    conv.id, conv.title, conv.message_count, conv.working_dir
                );
            }
        }
        ConversationCommand::Show { id } => {
            controller.open_conversation(&id).await?;
            let state = controller.view().snapshot();
            println!("Working directory: {}\n", controller.preferences().working_dir());
            ui::print_transcript(state.messages());
        }
        ConversationCommand::Delete { id } => {
            controller.delete_conversation(&id).await?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}

fn handle_config(controller: &mut SessionController, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let prefs = controller.preferences();
            println!("Current config:");
            println!("  Server URL: {}", prefs.server_url());
            println!("  Working dir: {}", prefs.working_dir());
            println!("  Model: {}", prefs.model());
        }
        ConfigCommand::Set { key, value } => {
            match key {
                ConfigKey::Server => controller.set_server_url(value.clone())?,
                ConfigKey::Dir => controller.set_working_dir(value.clone())?,
                ConfigKey::Model => controller.set_model(value.clone())?,
            }
            println!("Updated {:?} to: {}", key, value);
        }
    }
    Ok(())
}
