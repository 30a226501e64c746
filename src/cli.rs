//! Command line interface.
//!
//! Provides subcommands for:
//! - Connecting a provider, including the OAuth round trip (`connect`)
//! - Removing a connection and its credentials (`disconnect`)
//! - Listing saved connections (`list`) and the tool catalog (`tools`)
//! - Running a tool-calling conversation (`chat`)

use std::{io::BufRead, path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::{builder::RangedU64ValueParser, Parser, Subcommand};
use serde_json::json;
use toolbridge_mcp::{ChatOptions, ConnectOutcome};
use toolbridge_protocol::ChatMessage;
use tracing::{info, warn};

use crate::{
    app::App,
    callback::{CallbackError, CallbackListener},
};

#[derive(Parser, Debug)]
#[command(name = "toolbridge")]
#[command(about = "Connect a chat model to remote MCP tool providers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// YAML configuration file
    #[arg(short, long, global = true, env = "TOOLBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect a provider; runs the authorization flow when it asks for one
    Connect {
        /// Provider endpoint URL
        url: String,

        /// Display name (defaults to the URL host)
        #[arg(long)]
        name: Option<String>,

        /// Print the authorization URL and exit instead of waiting
        #[arg(long)]
        no_wait: bool,

        /// How long to wait for the authorization callback
        #[arg(long, default_value = "300")]
        auth_timeout_secs: u64,
    },

    /// Remove a connection, its credentials and its saved row
    Disconnect {
        connection_id: String,
    },

    /// List saved connections
    List,

    /// Reconnect saved connections and print their tools
    Tools,

    /// Send one prompt through the tool-calling loop
    Chat {
        prompt: String,

        /// Model name override
        #[arg(long)]
        model: Option<String>,

        /// Maximum model turns
        #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        max_iterations: Option<usize>,

        /// Keep offering tools right after a tool result
        #[arg(long)]
        use_tools: bool,
    },
}

pub async fn run_command(app: &App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Connect {
            url,
            name,
            no_wait,
            auth_timeout_secs,
        } => {
            run_connect(
                app,
                &url,
                name.as_deref(),
                no_wait,
                Duration::from_secs(auth_timeout_secs),
            )
            .await
        }
        Command::Disconnect { connection_id } => {
            let removed = app.manager.disconnect(&connection_id).await?;
            print_json(&json!({ "connectionId": connection_id, "disconnected": removed }))
        }
        Command::List => print_json(&app.manager.list_connections().await?),
        Command::Tools => {
            app.recover().await?;
            let tools: Vec<_> = app
                .manager
                .get_all_tools()
                .iter()
                .map(|entry| {
                    json!({
                        "name": entry.name.to_string(),
                        "connection": entry.connection_name,
                        "description": entry.tool.description,
                    })
                })
                .collect();
            print_json(&tools)
        }
        Command::Chat {
            prompt,
            model,
            max_iterations,
            use_tools,
        } => {
            app.recover().await?;
            let options = ChatOptions {
                model,
                max_iterations,
                use_tools,
                ..Default::default()
            };
            run_chat(app, prompt, &options).await
        }
    }
}

async fn run_connect(
    app: &App,
    url: &str,
    name: Option<&str>,
    no_wait: bool,
    auth_timeout: Duration,
) -> anyhow::Result<()> {
    // Bind before connecting so the redirect cannot arrive before we listen
    let listener = if no_wait {
        None
    } else {
        match CallbackListener::bind(&app.config.mcp.redirect_url).await {
            Ok(listener) => Some(listener),
            Err(CallbackError::NotLocal(_)) => None,
            Err(e) => return Err(e.into()),
        }
    };

    let outcome = app.manager.connect(url, name).await?;
    let (connection_id, authorization_url) = match &outcome {
        ConnectOutcome::Connected(_) => return print_json(&outcome),
        ConnectOutcome::NeedsAuth {
            connection_id,
            authorization_url,
        } => (connection_id.clone(), authorization_url.clone()),
    };

    if no_wait {
        return print_json(&outcome);
    }

    eprintln!("Open this URL to authorize the connection:\n\n  {}\n", authorization_url);
    let code = match await_code(app, &connection_id, listener, auth_timeout).await {
        Ok(code) => code,
        Err(e) => {
            // Drop the pending_auth row and the partial credentials
            if let Err(err) = app.manager.disconnect(&connection_id).await {
                warn!(connection_id = %connection_id, error = %err, "Failed to discard pending connection");
            }
            return Err(e);
        }
    };

    // A failed exchange is purged by the manager
    let info = app
        .manager
        .complete_oauth_connection(&connection_id, &code)
        .await?;
    print_json(&ConnectOutcome::Connected(info))
}

/// The authorization code, from the callback listener or typed by the user.
async fn await_code(
    app: &App,
    connection_id: &str,
    listener: Option<CallbackListener>,
    auth_timeout: Duration,
) -> anyhow::Result<String> {
    let Some(listener) = listener else {
        return read_code_from_stdin();
    };

    info!(connection_id = %connection_id, "Waiting for authorization callback");
    let params = listener.wait(auth_timeout).await?;
    let expected = app.expected_state(connection_id).await?;
    if expected.is_some() && params.state != expected {
        warn!(connection_id = %connection_id, "Callback state mismatch");
        bail!("authorization callback carried an unexpected state parameter");
    }
    Ok(params.code)
}

fn read_code_from_stdin() -> anyhow::Result<String> {
    eprint!("Paste the authorization code: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read authorization code")?;
    let code = line.trim();
    if code.is_empty() {
        bail!("no authorization code given");
    }
    Ok(code.to_string())
}

async fn run_chat(app: &App, prompt: String, options: &ChatOptions) -> anyhow::Result<()> {
    let orchestrator = app.orchestrator()?;
    match orchestrator
        .chat_with_tool_loop(vec![ChatMessage::user(prompt)], options)
        .await
    {
        Ok(outcome) => {
            info!(iterations = outcome.iterations, "Chat finished");
            println!("{}", outcome.final_message.content.unwrap_or_default());
            Ok(())
        }
        Err(e) => {
            warn!(
                messages = e.transcript.len(),
                iteration_bound = e.is_iteration_bound(),
                "Chat failed"
            );
            Err(e.into())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
