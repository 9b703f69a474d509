use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use prescription_auth::api::start_webserver;
use prescription_auth::config::{AppConfig, load_config_or_panic};
use prescription_auth::oauth2::{
    OAuth2State,
    seed::{ClientRegistration, register_client, seed_clients},
};
use prescription_auth::store::{CredentialStore, spawn_purge_task};
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "prescription_auth=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[derive(Parser)]
#[command(author, version, about = "OAuth2 authorization server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (the default)
    Serve,

    /// Register a client and print its generated credentials
    RegisterClient {
        /// Display name shown on the consent page
        #[arg(short, long)]
        name: String,

        /// Absolute redirect URI (can specify multiple)
        #[arg(short, long = "redirect-uri", required = true, num_args = 1..)]
        redirect_uris: Vec<String>,

        /// Scope the client may request (can specify multiple)
        #[arg(short, long = "scope", num_args = 1..)]
        scopes: Vec<String>,

        /// Allowed grant type (default: authorization_code refresh_token)
        #[arg(short, long = "grant-type", num_args = 1..)]
        grant_types: Vec<String>,
    },
}

async fn connect(config: &AppConfig) -> color_eyre::eyre::Result<Arc<DatabaseConnection>> {
    let db = Arc::new(Database::connect(&config.database_url).await?);
    Migrator::up(db.as_ref(), None).await?;
    tracing::info!("database migrations applied");
    Ok(db)
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    initialize_tracing();

    let config = load_config_or_panic();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::RegisterClient {
            name,
            redirect_uris,
            scopes,
            grant_types,
        } => {
            let store = CredentialStore::new(connect(&config).await?);
            let client = register_client(
                &store,
                ClientRegistration {
                    name,
                    redirect_uris,
                    scopes,
                    grant_types,
                },
            )
            .await?;
            println!("client_id:     {}", client.client_id);
            println!("client_secret: {}", client.client_secret);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> color_eyre::eyre::Result<()> {
    let db = connect(&config).await?;

    let state = OAuth2State::new(db, &config)
        .map_err(|e| color_eyre::eyre::eyre!("invalid password hash parameters: {e}"))?;

    let seeded = seed_clients(&state.store, &config.oauth2.clients).await?;
    tracing::info!(clients = seeded, "client registrations loaded");

    if config.oauth2.cleanup_interval > 0 {
        spawn_purge_task(
            state.store.clone(),
            Duration::from_secs(config.oauth2.cleanup_interval),
        );
    }

    start_webserver(state, &config.bind_address).await
}
