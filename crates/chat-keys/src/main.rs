use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use output::Output;

#[derive(Parser)]
#[command(name = "chat-keys")]
#[command(version)]
#[command(about = "Manage the cipher-chat device identity key")]
struct Cli {
    /// Output in JSON format
    #[arg(short, long, global = true)]
    json: bool,

    /// Data directory (default: platform data dir/cipher-chat)
    #[arg(long, global = true, env = "CIPHER_CHAT_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the device identity if this device has none
    Init,

    /// Store the login handed over by the web login flow
    Login {
        /// Bearer token
        #[arg(long, env = "CIPHER_CHAT_TOKEN")]
        token: String,
        /// Account user id
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        username: String,
        /// Public key registered for the account (base64 SPKI)
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Show the stored login and device key status
    Whoami,

    /// Print the device public key (base64 SPKI) for registration
    ExportPublic,

    /// Print the SHA-256 fingerprint of the device public key
    Fingerprint,

    /// Forget the stored login; the device key is kept
    Logout,

    /// Delete the device private key. Messages wrapped for it become unreadable.
    ForgetKey {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    setup_logging();
    let cli = Cli::parse();
    let output = Output::new(cli.json);

    if let Err(e) = run(cli, &output).await {
        output.error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn setup_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();
}

async fn run(cli: Cli, output: &Output) -> anyhow::Result<()> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => cipher_chat::ClientConfig::default_data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?,
    };
    let ctx = commands::Context::open(&data_dir)?;

    match cli.command {
        Commands::Init => commands::identity::init(&ctx, output).await,
        Commands::Login {
            token,
            user_id,
            username,
            public_key,
        } => commands::identity::login(&ctx, token, &user_id, username, public_key, output).await,
        Commands::Whoami => commands::identity::whoami(&ctx, output).await,
        Commands::ExportPublic => commands::identity::export_public(&ctx, output).await,
        Commands::Fingerprint => commands::identity::fingerprint(&ctx, output).await,
        Commands::Logout => commands::identity::logout(&ctx, output).await,
        Commands::ForgetKey { yes } => commands::identity::forget_key(&ctx, yes, output).await,
    }
}
