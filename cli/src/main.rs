use std::path::PathBuf;

use chatdesk::ChatError;
use chatdesk::api::{ChatApi, RestChatApi};
use chatdesk::auth::AuthStore;
use chatdesk::config::{ChatConfig, DEFAULT_AUTH_FILE};
use chatdesk::model::{Conversation, Message, StaffUser};
use chatdesk::reconciler::Disposition;
use chatdesk::session::{ChatSession, ChatUpdate};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("failed to read .env: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("not signed in; run `chatdesk session set` first")]
    NotSignedIn,
    #[error("credential rejected by server; stored session cleared")]
    SessionExpired,
    #[error("conversation not found: {0}")]
    UnknownConversation(String),
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "chatdesk", about = "Staff chat console")]
struct Cli {
    #[arg(long, env = "CHAT_AUTH_FILE", default_value = DEFAULT_AUTH_FILE, global = true)]
    auth_file: PathBuf,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the stored credential.
    Session(SessionCommand),
    /// List conversations.
    Conversations,
    /// Print one conversation's history.
    History { conversation_id: String },
    /// Open a conversation live; each stdin line is sent, `/quit` exits.
    Chat { conversation_id: String },
}

#[derive(Args, Debug)]
struct SessionCommand {
    #[command(subcommand)]
    command: SessionSubcommand,
}

#[derive(Subcommand, Debug)]
enum SessionSubcommand {
    /// Store a credential issued by the login endpoint.
    Set {
        #[arg(long)]
        user_id: String,
        #[arg(long, env = "CHAT_ACCESS_TOKEN", hide_env_values = true)]
        token: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "Staff")]
        role: String,
        #[arg(long, default_value = "")]
        avatar: String,
    },
    Show,
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let cli = Cli::parse();
    let auth = AuthStore::new(cli.auth_file.clone());
    auth.hydrate();

    match cli.command {
        Command::Session(session) => run_session(&auth, session, cli.json),
        Command::Conversations => run_conversations(&auth, cli.json).await,
        Command::History { conversation_id } => run_history(&auth, &conversation_id, cli.json).await,
        Command::Chat { conversation_id } => run_chat(&auth, &conversation_id).await,
    }
}

fn load_config(auth: &AuthStore) -> Result<ChatConfig, CliError> {
    let mut config = ChatConfig::from_env()?;
    config.auth_file = auth.path().to_path_buf();
    Ok(config)
}

// =============================================================================
// SESSION
// =============================================================================

fn run_session(auth: &AuthStore, session: SessionCommand, json: bool) -> Result<(), CliError> {
    match session.command {
        SessionSubcommand::Set { user_id, token, name, role, avatar } => {
            let user = StaffUser { id: user_id, full_name: name, role, avatar };
            auth.set_auth(user, token)?;
            println!("credential stored in {}", auth.path().display());
        }
        SessionSubcommand::Show => match auth.credential() {
            Some(identity) if json => print_json(&serde_json::to_value(&identity.user)?)?,
            Some(identity) => {
                println!("user:  {} ({})", identity.user.id, identity.user.full_name);
                println!("role:  {}", identity.user.role);
                println!("token: {}", redact(&identity.access_token));
            }
            None => println!("signed out"),
        },
        SessionSubcommand::Clear => {
            auth.clear_auth()?;
            println!("signed out");
        }
    }
    Ok(())
}

fn redact(token: &str) -> String {
    let visible: String = token.chars().take(6).collect();
    format!("{visible}… ({} chars)", token.chars().count())
}

// =============================================================================
// REST READS
// =============================================================================

async fn run_conversations(auth: &AuthStore, json: bool) -> Result<(), CliError> {
    let config = load_config(auth)?;
    require_credential(auth)?;
    let mut session = ChatSession::from_config(&config, auth.subscribe())?;
    let conversations = session.load_conversations().await.map_err(|e| expire_on_unauthorized(auth, e))?;

    if json {
        return print_json(&serde_json::to_value(&conversations)?);
    }
    for conversation in &conversations {
        print_conversation(conversation);
    }
    if conversations.is_empty() {
        println!("no conversations");
    }
    Ok(())
}

async fn run_history(auth: &AuthStore, conversation_id: &str, json: bool) -> Result<(), CliError> {
    let config = load_config(auth)?;
    let identity = require_credential(auth)?;
    let api = RestChatApi::from_config(&config)?;
    let messages = api
        .messages(&identity.access_token, conversation_id)
        .await
        .map_err(|e| expire_on_unauthorized(auth, e))?;

    if json {
        return print_json(&serde_json::to_value(&messages)?);
    }
    for message in &messages {
        print_message(message, &identity.user.id);
    }
    Ok(())
}

// =============================================================================
// LIVE CHAT
// =============================================================================

async fn run_chat(auth: &AuthStore, conversation_id: &str) -> Result<(), CliError> {
    let config = load_config(auth)?;
    let identity = require_credential(auth)?;
    let mut session = ChatSession::from_config(&config, auth.subscribe())?;

    let state = session.sync_auth().await;
    eprintln!("* connection {state}");
    let conversations = session.load_conversations().await.map_err(|e| expire_on_unauthorized(auth, e))?;
    let conversation = conversations
        .into_iter()
        .find(|c| c.conversation_id == conversation_id)
        .ok_or_else(|| CliError::UnknownConversation(conversation_id.to_owned()))?;
    session.select_conversation(&conversation);
    eprintln!("* chatting with {}; type /quit to leave", conversation.other_user_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim();
                if text == "/quit" {
                    break;
                }
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = session.try_send_message(text).await {
                    eprintln!("! not sent: {e}");
                }
            }
            update = session.next_update() => {
                print_update(&session, &update, &identity.user.id);
            }
        }
    }

    tracing::debug!("leaving chat");
    Ok(())
}

fn print_update(session: &ChatSession, update: &ChatUpdate, me: &str) {
    match update {
        ChatUpdate::Connection(state) => eprintln!("* connection {state}"),
        ChatUpdate::Message(ingested) => match &ingested.disposition {
            Disposition::Appended => print_message(&ingested.message, me),
            Disposition::OtherConversation => {
                eprintln!("* new message in {}: {}", ingested.message.conversation_id, ingested.message.text);
            }
            Disposition::Confirmed { .. } | Disposition::Duplicate => {}
        },
        ChatUpdate::MalformedPush(reason) => eprintln!("! dropped malformed push: {reason}"),
        ChatUpdate::ServerException(message) => eprintln!("! server: {message}"),
        ChatUpdate::TransportError(message) => eprintln!("! transport: {message}"),
        ChatUpdate::HistoryLoaded { .. } => {
            for message in session.messages() {
                print_message(message, me);
            }
        }
        ChatUpdate::HistoryFailed { error, .. } => eprintln!("! history unavailable: {error}"),
        ChatUpdate::Auth { signed_in } => eprintln!("* signed in: {signed_in}"),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn require_credential(auth: &AuthStore) -> Result<chatdesk::auth::AuthIdentity, CliError> {
    auth.credential().ok_or(CliError::NotSignedIn)
}

/// A rejected credential is dropped, as the console does on any 401.
fn expire_on_unauthorized(auth: &AuthStore, err: ChatError) -> CliError {
    if !matches!(err, ChatError::Unauthorized) {
        return err.into();
    }
    if let Err(e) = auth.clear_auth() {
        tracing::warn!(error = %e, "failed to clear stored credential");
    }
    CliError::SessionExpired
}

fn print_conversation(conversation: &Conversation) {
    let when = conversation.last_sent_at.map(|at| at.to_string()).unwrap_or_default();
    println!(
        "{}  with {}  [{}] {}: {}",
        conversation.conversation_id,
        conversation.other_user_id,
        when,
        conversation.last_sender_id,
        conversation.last_message
    );
}

fn print_message(message: &Message, me: &str) {
    let who = if message.sender_id == me { "me" } else { message.sender_id.as_str() };
    println!("[{}] {who}: {}", message.sent_at, message.text);
}

fn print_json(value: &serde_json::Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
