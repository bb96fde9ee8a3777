use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::warn;

use hotel_desk_core::auth::{token, FileStorage, KeyringStorage, Phase, RegisterOutcome, TokenStorage};
use hotel_desk_core::models::{Credentials, Registration};
use hotel_desk_core::{ApiClient, AuthService, Config, SessionEvent, SessionManager, SessionState};

pub type Desk = AuthService<ApiClient>;

pub fn build_service(config: &Config) -> Result<Desk> {
    let api = Arc::new(ApiClient::new(&config.api_settings()).context("Failed to create API client")?);

    let storage: Arc<dyn TokenStorage> = if config.use_keyring {
        Arc::new(KeyringStorage::new())
    } else {
        let dir = config.data_dir()?;
        Arc::new(FileStorage::in_dir(&dir).context("Failed to open session storage")?)
    };

    let manager = SessionManager::builder(storage.clone(), api.clone())
        .refresh_margin(config.refresh_margin())
        .build();

    Ok(AuthService::new(api, storage, manager))
}

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => print!("{} [{}]: ", label, default),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    match (input.is_empty(), default) {
        (true, Some(default)) => Ok(default.to_string()),
        (true, None) => anyhow::bail!("{} is required", label),
        (false, _) => Ok(input.to_string()),
    }
}

fn prompt_optional(label: &str) -> Result<String> {
    print!("{} (optional): ", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

pub async fn login(desk: &Desk, config: &mut Config, username: Option<&str>) -> Result<()> {
    let username = match username {
        Some(username) => username.to_string(),
        None => prompt("Username", config.last_username.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    desk.login(&Credentials::new(username.clone(), password))
        .await
        .context("Login failed")?;

    config.last_username = Some(username.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {}", username);
    Ok(())
}

pub async fn guest(desk: &Desk, name: Option<&str>) -> Result<()> {
    desk.login_guest(name).await.context("Guest login failed")?;
    let profile = desk.profile();
    println!("Logged in as guest {}", profile.display_name().unwrap_or_default());
    Ok(())
}

pub async fn register(desk: &Desk, username: &str, email: &str) -> Result<()> {
    let first_name = prompt_optional("First name")?;
    let last_name = prompt_optional("Last name")?;
    let password = rpassword::prompt_password("Password: ")?;
    let password_confirmation = rpassword::prompt_password("Repeat password: ")?;

    let registration = Registration {
        username: username.to_string(),
        email: email.to_string(),
        first_name,
        last_name,
        password,
        password_confirmation,
    };

    match desk.register(&registration).await.context("Registration failed")? {
        RegisterOutcome::SignedIn => println!("Account created, logged in as {}", username),
        RegisterOutcome::AccountCreated => {
            println!("Account created. Log in with `hotel-desk login {}`", username)
        }
    }
    Ok(())
}

pub fn status(desk: &Desk) -> Result<()> {
    let state = desk.session_state();
    println!("Session:  {}", state.display_name());
    if state == SessionState::Anonymous {
        return Ok(());
    }

    let profile = desk.profile();
    match profile.display_name() {
        Some(name) => println!("User:     guest ({})", name),
        None => println!("User:     normal"),
    }

    if let Some(access) = desk.access_token() {
        match token::expiration(&access) {
            Ok(expires_at) => println!("Expires:  {}", expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")),
            Err(e) => println!("Expires:  unknown ({})", e),
        }
    }
    Ok(())
}

pub async fn whoami(desk: &Desk) -> Result<()> {
    let user = desk.current_user().await.context("Could not load the current user")?;
    println!("{} ({})", user.full_name(), user.username);
    println!("Role: {}", user.role().display_name());
    Ok(())
}

/// Keep the session fresh in the foreground until Ctrl-C or until the
/// session is terminated.
pub async fn watch(desk: &Desk) -> Result<()> {
    if desk.session_state() == SessionState::Anonymous {
        anyhow::bail!("Not logged in. Run `hotel-desk login` first.");
    }

    let manager = desk.manager();
    let mut events = manager
        .take_events()
        .context("Session events already taken")?;

    manager.start();
    match (manager.phase(), manager.next_refresh_at()) {
        (Phase::Idle, _) => {
            println!("Access token has no readable expiry; it will not be refreshed automatically");
            return Ok(());
        }
        (_, Some(at)) => println!("Next refresh at {}", at.with_timezone(&Local).format("%H:%M:%S")),
        (_, None) => println!("Refreshing now"),
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                manager.stop();
                println!("Stopped");
                return Ok(());
            }
            event = events.recv() => match event {
                Some(SessionEvent::Refreshed { expires_at: Some(expires_at) }) => {
                    println!(
                        "Token refreshed, expires {}",
                        expires_at.with_timezone(&Local).format("%H:%M:%S")
                    );
                }
                Some(SessionEvent::Refreshed { expires_at: None }) => {
                    println!("Token refreshed; new token has no readable expiry, stopping");
                    return Ok(());
                }
                Some(SessionEvent::Terminated(reason)) => {
                    anyhow::bail!("Session ended ({}). Log in again with `hotel-desk login`.", reason);
                }
                None => return Ok(()),
            },
        }
    }
}

pub async fn logout(desk: &Desk) -> Result<()> {
    desk.logout().await;
    println!("Logged out");
    Ok(())
}
