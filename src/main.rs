use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use std::sync::Arc;
use tokio::sync::broadcast;

use rental_client::auth::{CredentialStore, Session};
use rental_client::config::{CliArgs, Command, Config};
use rental_client::http_client::{ApiClient, ClientEvent, RequestDescriptor};
use rental_client::retry::RetryPolicy;
use rental_client::storage::{LocalStore, SqliteStorage};
use rental_client::utils::validation;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::load();

    let config = Config::from_args(&args);
    config.validate()?;

    init_logging(&config);
    tracing::debug!(base_url = %config.api_base_url, "Configuration loaded");

    // Offline command, no storage or network needed
    if let Command::CheckCard { ref number } = args.command {
        return check_card(number);
    }

    let backend = Arc::new(
        SqliteStorage::open(&config.storage_file).with_context(|| {
            format!(
                "Failed to open storage database: {}",
                config.storage_file.display()
            )
        })?,
    );
    let credentials = Arc::new(CredentialStore::new(
        LocalStore::new(backend),
        config.credential_keys(),
    ));

    let client = Arc::new(ApiClient::new(&config.client_config(), credentials)?);
    let mut events = client.subscribe();
    let session = Session::new(client.clone());

    let report_auth_failures = args.command.reports_auth_failures();
    let result = run(args.command, &client, &session).await;

    // Authentication failures are reported even when the command itself failed
    if report_auth_failures {
        report_events(&mut events);
    }

    result
}

async fn run(command: Command, client: &ApiClient, session: &Session) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let email = match email {
                Some(email) => email,
                None => Input::<String>::new()
                    .with_prompt("Email")
                    .interact_text()
                    .context("Failed to read email")?,
            };
            validation::validate_email(&email)?;

            let password = match password {
                Some(password) => password,
                None => Password::new()
                    .with_prompt("Password")
                    .interact()
                    .context("Failed to read password")?,
            };
            validation::validate_required("Password", &password)?;

            let user = session.login(&email, &password).await?;
            println!("✅ Logged in as {} <{}>", user.name, user.email);
        }

        Command::Logout => {
            session.logout().await?;
            println!("👋 Logged out");
        }

        Command::Whoami => {
            if !session.is_authenticated() {
                println!("Not logged in");
                return Ok(());
            }

            let user = session.current_user().await?;
            println!("{} <{}>", user.name, user.email);
            if let Some(role) = user.role {
                println!("Role: {}", role);
            }
        }

        Command::Get {
            path,
            retries,
            retry_delay,
        } => {
            let request = RequestDescriptor::get(path);
            let data: serde_json::Value = client
                .send_with_retry(&request, RetryPolicy::new(retries, retry_delay))
                .await?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }

        Command::CheckCard { ref number } => check_card(number)?,
    }

    Ok(())
}

fn check_card(number: &str) -> Result<()> {
    match validation::validate_card_number(number) {
        Ok(()) => {
            println!("✅ Card number is valid");
            Ok(())
        }
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Print navigation notices for authentication failures raised during the command
fn report_events(events: &mut broadcast::Receiver<ClientEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            ClientEvent::AuthenticationFailed { url, login_path } => {
                tracing::debug!(url = %url, "Authentication failed");
                eprintln!(
                    "🔒 Session expired or invalid. Log in again ({}): rental-client login",
                    login_path
                );
            }
        }
    }
}

fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.log_json {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}
