//! Passgate CLI - OAuth2 password-grant session from the command line.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use passgate_claims::unix_now;
use passgate_oidc::{OidcConfig, OidcTokenClient, DEFAULT_CLIENT_ID, DEFAULT_SCOPE};
use passgate_session::{
    AppConfiguration, GuardError, RecordingNavigator, RequestGuard, SessionManager,
    StaticConfiguration,
};
use passgate_storage_sqlite::SqliteStorage;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "passgate")]
#[command(about = "Passgate CLI - Log in to an OpenID provider and call protected APIs")]
#[command(version)]
struct Cli {
    /// Identity provider base URL
    #[arg(long, default_value = "http://localhost:5000", env = "PASSGATE_ISSUER")]
    issuer: String,

    /// OAuth2 client ID
    #[arg(long, default_value = DEFAULT_CLIENT_ID, env = "PASSGATE_CLIENT_ID")]
    client_id: String,

    /// Requested scopes
    #[arg(long, default_value = DEFAULT_SCOPE, env = "PASSGATE_SCOPE")]
    scope: String,

    /// Token endpoint (skips discovery)
    #[arg(long, env = "PASSGATE_TOKEN_ENDPOINT")]
    token_endpoint: Option<String>,

    /// Directory holding persisted sessions
    #[arg(long, default_value = ".passgate", env = "PASSGATE_DATA_DIR")]
    data_dir: PathBuf,

    /// Session profile name
    #[arg(long, default_value = "default", env = "PASSGATE_PROFILE")]
    profile: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with user name and password
    Login {
        /// User name
        user: String,
        /// Password (read from stdin if not provided)
        #[arg(long)]
        password: Option<String>,
        /// Keep the session after this process exits
        #[arg(long)]
        remember_me: bool,
    },
    /// Log out and forget the stored tokens
    Logout,
    /// Show session status
    Status,
    /// Show the logged-in user
    Whoami,
    /// Exchange the refresh token for new tokens
    Refresh,
    /// GET a protected URL with the session's access token
    Get {
        /// Resource URL
        url: String,
    },
    /// Print the payload of a JWT without verifying it
    Decode {
        /// Compact JWT
        token: String,
    },
}

// ============================================================================
// Session wiring
// ============================================================================

struct App {
    session: Arc<SessionManager>,
    http: Client,
}

async fn open_session(cli: &Cli) -> Result<App> {
    let http = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    let mut config = OidcConfig::new(&cli.issuer)
        .with_client_id(&cli.client_id)
        .with_scope(&cli.scope);
    if let Some(endpoint) = &cli.token_endpoint {
        config = config.with_token_endpoint(endpoint);
    }

    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("Failed to create {}", cli.data_dir.display()))?;
    let storage = SqliteStorage::open(&cli.data_dir, &cli.profile)
        .await
        .context("Failed to open session store")?;
    tracing::debug!(path = %storage.db_path().display(), "Session store opened");

    let exchange = OidcTokenClient::new(config).with_http_client(http.clone());
    let configuration = StaticConfiguration::new(&cli.issuer);

    let session = SessionManager::new(
        Arc::new(storage),
        Arc::new(exchange),
        Arc::new(configuration),
        Arc::new(RecordingNavigator::default()),
    );

    Ok(App {
        session: Arc::new(session),
        http,
    })
}

fn read_password() -> Result<String> {
    print!("Password: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn describe_expiry(expiry: u64) -> String {
    let now = unix_now();
    if expiry > now {
        format!("{expiry} (in {}s)", expiry - now)
    } else {
        format!("{expiry} (expired {}s ago)", now - expiry)
    }
}

// ============================================================================
// Command Handlers
// ============================================================================

async fn cmd_login(
    ctx: &App,
    user: &str,
    password: Option<String>,
    remember_me: bool,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => read_password()?,
    };
    if password.is_empty() {
        bail!("Password cannot be empty");
    }

    let principal = ctx
        .session
        .login(user, &password, remember_me)
        .await
        .context("Login failed")?;

    println!("Logged in as {}", principal.friendly_name());
    if !remember_me {
        println!("Session is kept for this process only. Use --remember-me to persist it.");
    }
    Ok(())
}

async fn cmd_logout(ctx: &App) -> Result<()> {
    ctx.session.logout(false).await.context("Logout failed")?;
    println!("Logged out");
    Ok(())
}

async fn cmd_status(ctx: &App) -> Result<()> {
    let record = ctx
        .session
        .session_record()
        .await
        .context("Failed to read session")?;

    let Some(principal) = record.principal else {
        println!("Not logged in");
        return Ok(());
    };

    println!("Session status:");
    println!("  User:        {}", principal.user_name);
    println!("  Remember me: {}", record.remember_me);
    match record.access_token_expiry {
        Some(expiry) => println!("  Expires:     {}", describe_expiry(expiry)),
        None => println!("  Expires:     unknown"),
    }
    println!("  Refreshable: {}", record.refresh_token.is_some());
    println!("  Permissions: {}", record.permissions.len());
    Ok(())
}

async fn cmd_whoami(ctx: &App) -> Result<()> {
    let Some(principal) = ctx.session.current_user().await? else {
        bail!("Not logged in");
    };
    let permissions = ctx.session.user_permissions().await?;

    println!("{}", serde_json::to_string_pretty(&principal)?);
    if !permissions.is_empty() {
        println!("Permissions:");
        for permission in &permissions {
            println!("  {permission}");
        }
    }
    Ok(())
}

async fn cmd_refresh(ctx: &App) -> Result<()> {
    let principal = ctx
        .session
        .refresh(false)
        .await
        .context("Refresh failed")?;
    let expiry = ctx.session.access_token_expiry().await?;

    println!("Session refreshed for {}", principal.user_name);
    if let Some(expiry) = expiry {
        println!("Expires: {}", describe_expiry(expiry));
    }
    Ok(())
}

async fn cmd_get(ctx: &App, url: &str) -> Result<()> {
    let guard = RequestGuard::new(ctx.session.clone());
    // The token is attached per attempt so a retry uses the refreshed one.
    let headers = RequestGuard::api_headers();

    let result = guard
        .execute_authorized(|token| {
            let request = ctx
                .http
                .get(url)
                .headers(headers.clone())
                .bearer_auth(token);
            async move { request.send().await?.error_for_status()?.text().await }
        })
        .await;

    match result {
        Ok(body) => {
            println!("{body}");
            Ok(())
        },
        Err(GuardError::SessionExpired(reason)) => {
            let login_url = ctx.session.configuration().login_url();
            bail!(
                "Session expired ({}). Run `passgate login` again (web login page: {login_url})",
                reason.as_deref().unwrap_or("no valid session")
            )
        },
        Err(e) => Err(e).context("Request failed"),
    }
}

fn cmd_decode(token: &str) -> Result<()> {
    let payload = passgate_claims::decode_value(token).context("Failed to decode token")?;
    println!("{}", serde_json::to_string_pretty(&payload)?);

    if let Some(expiry) = passgate_claims::expiration_of(token)? {
        println!("Expires: {}", describe_expiry(expiry));
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Decode { token } = &cli.command {
        return cmd_decode(token);
    }

    let ctx = open_session(&cli).await?;

    match cli.command {
        Commands::Login {
            user,
            password,
            remember_me,
        } => cmd_login(&ctx, &user, password, remember_me).await,
        Commands::Logout => cmd_logout(&ctx).await,
        Commands::Status => cmd_status(&ctx).await,
        Commands::Whoami => cmd_whoami(&ctx).await,
        Commands::Refresh => cmd_refresh(&ctx).await,
        Commands::Get { url } => cmd_get(&ctx, &url).await,
        Commands::Decode { .. } => Ok(()),
    }
}
