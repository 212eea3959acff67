use anyhow::Result;
use async_trait::async_trait;
use eemailer::{Config, KeyBackup, KeyBackupPrompt, Messenger};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Shows the backup phrase and waits for the user to confirm it was saved
struct TerminalBackup;

#[async_trait]
impl KeyBackupPrompt for TerminalBackup {
    async fn acknowledge(&self, backup: &KeyBackup) -> Result<()> {
        println!("\nA new key pair was created for {}.", backup.identity);
        println!("Write down this backup phrase. It cannot be recovered:\n");
        println!("  {}\n", backup.phrase);
        print!("Press Enter once it is saved...");
        io::stdout().flush()?;

        // stdin blocks; keep it off the runtime workers
        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).map(|_| ())
        })
        .await??;
        Ok(())
    }
}

fn format_time(millis: u64) -> String {
    chrono::DateTime::from_timestamp_millis(millis as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown time".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Get command line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <config.toml> [recipient_email]", args[0]);
        std::process::exit(1);
    }

    let config = Config::load(&args[1])?;
    let access_token =
        tokio::task::spawn_blocking(|| rpassword::prompt_password("Enter access token: "))
            .await??;

    let mut messenger = Messenger::from_config(config, Arc::new(TerminalBackup))?;

    println!("Logging in and registering with the directory...");
    let session = messenger.login(access_token.trim()).await?;
    println!("Logged in as {}", session.email());

    // If a recipient was given, send them a test message
    if let Some(recipient) = args.get(2) {
        println!("\nSending test message to {}...", recipient);
        let id = messenger
            .send(recipient, "hello", "Hello from eemailer!")
            .await?;
        println!("Message sent with ID: {}", id);
    }

    let conversations = messenger.conversations().to_vec();
    println!("\nFound {} conversations:", conversations.len());
    for conversation in &conversations {
        println!(
            "\n== {} (last active {}) ==",
            conversation.counterparty,
            format_time(conversation.last_activity)
        );
        for message in messenger.select(&conversation.counterparty) {
            let marker = if message.decrypted { "" } else { " [unencrypted]" };
            println!(
                "[{}] {}{}: {}",
                format_time(message.timestamp),
                message.subject,
                marker,
                message.content
            );
        }
    }

    // logging out would erase the local key; keep the session for next time
    Ok(())
}
