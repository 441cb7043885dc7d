//! Status command handler

use anyhow::Result;

use parley_core::{Config, Session};

use crate::output::{Output, OutputFormat};

/// Show endpoints, session and connection policy
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let session = Session::from_config(config);
    let reconnect = config.reconnect_policy();
    let requests = config.request_policy();

    match output.format {
        OutputFormat::Json => {
            let (user, session_error) = match &session {
                Ok(s) => (Some(s.user_id().to_string()), None),
                Err(e) => (None, Some(e.to_string())),
            };
            println!(
                "{}",
                serde_json::json!({
                    "api_url": config.api_url,
                    "push_url": config.push_url,
                    "session": {
                        "user_id": user,
                        "expires_at": session.as_ref().ok().and_then(|s| s.expires_at()),
                        "error": session_error
                    },
                    "reconnect": {
                        "base_delay_ms": reconnect.base_delay.as_millis() as u64,
                        "max_delay_ms": reconnect.max_delay.as_millis() as u64,
                        "max_attempts": reconnect.max_attempts
                    },
                    "requests": {
                        "attempts": requests.attempts,
                        "timeout_ms": requests.timeout.as_millis() as u64
                    },
                    "log_file": config.log_path()
                })
            );
        }
        OutputFormat::Quiet => match &session {
            Ok(s) => println!("{}", s.user_id()),
            Err(_) => println!("signed-out"),
        },
        OutputFormat::Human => {
            println!("Parley Status");
            println!("=============");
            println!();
            println!("Server:");
            println!("  REST: {}", config.api_url);
            println!("  Push: {}", config.push_url);
            println!();
            println!("Session:");
            match &session {
                Ok(s) => {
                    println!("  User:    {}", s.user_id());
                    if let Some(expires) = s.expires_at() {
                        println!("  Expires: {}", expires.format("%Y-%m-%d %H:%M"));
                    }
                }
                Err(e) => {
                    println!("  Not signed in ({})", e);
                    if let Some(hint) = e.recovery_suggestion() {
                        println!("  {}", hint);
                    }
                }
            }
            println!();
            println!("Reconnect:");
            println!(
                "  Backoff:  {:?} doubling to {:?}",
                reconnect.base_delay, reconnect.max_delay
            );
            println!("  Attempts: {}", reconnect.max_attempts);
            println!();
            println!("Requests:");
            println!("  Attempts: {}", requests.attempts);
            println!("  Timeout:  {:?}", requests.timeout);
            println!();
            println!("Log file: {}", config.log_path().display());
        }
    }

    Ok(())
}
