use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::warn;

use bearerline_core::{Config, Session};

/// Environment variable holding the sign-in password
const PASSWORD_ENV: &str = "BEARERLINE_PASSWORD";

pub async fn login(session: &Session, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(name) if !name.is_empty() => name,
        _ => prompt("Username: ")?,
    };

    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    let credentials = session
        .sign_in(&username, &password)
        .await
        .context("Sign-in failed")?;

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    match credentials.principal {
        Some(principal) => println!("Signed in as {} ({})", principal.display_name, principal.role),
        None => println!("Signed in"),
    }
    Ok(())
}

pub async fn whoami(session: &Session) -> Result<()> {
    let principal = session
        .current_principal()
        .await
        .context("Failed to fetch current user")?;
    println!("{} (id {}, role {})", principal.display_name, principal.id, principal.role);
    Ok(())
}

pub async fn get(session: &Session, path: &str) -> Result<()> {
    let value: serde_json::Value = session
        .client()
        .get(path)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

pub async fn logout(session: &Session, all: bool) -> Result<()> {
    if all {
        session.sign_out_all().await;
        println!("Signed out of all sessions");
    } else {
        session.sign_out().await;
        println!("Signed out");
    }
    Ok(())
}

pub fn status(session: &Session) -> Result<()> {
    match session.store().read() {
        Some(credentials) => {
            let who = credentials
                .principal
                .map(|p| p.display_name)
                .unwrap_or_else(|| "unknown user".to_string());
            println!("Session stored for {}", who);
        }
        _ => println!("No session stored"),
    }
    println!("Location: {}", session.navigator().location());
    Ok(())
}

/// Tell the user when the session ended and they need to sign in again.
pub fn report_reauth(session: &Session) {
    if !session.is_authenticated() {
        eprintln!("Not signed in. Run `bearerline login` to start a session.");
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
