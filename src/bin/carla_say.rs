//! carla-say: command-line client for a running carla-rs service.
//!
//! Sends one request to the control API and prints the outcome, so shell
//! scripts and hooks can make the avatar talk without speaking HTTP
//! themselves.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "carla-say", about = "Make a running carla-rs avatar talk")]
struct Args {
    /// Message for the avatar to say
    text: Option<String>,

    /// Set the avatar's emotion (neutral, happy, sad, surprised, thinking)
    #[arg(short, long)]
    emotion: Option<String>,

    /// Stop the avatar mid-sentence
    #[arg(long)]
    cancel: bool,

    /// Toggle the avatar active/inactive
    #[arg(long)]
    toggle: bool,

    /// Print the avatar's current status
    #[arg(long)]
    status: bool,

    /// Control API port of the running service
    #[arg(short, long, default_value_t = 8768)]
    port: u16,
}

#[derive(Deserialize)]
struct SimpleResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    let base = format!("http://127.0.0.1:{}", args.port);

    let client = Client::builder()
        .connect_timeout(Duration::from_millis(300))
        .timeout(Duration::from_secs(3))
        .build()
        .unwrap_or_else(|_| Client::new());

    // Quick connectivity check before doing anything.
    if client.get(format!("{base}/status")).send().await.is_err() {
        eprintln!("carla-rs is not reachable on port {}", args.port);
        return ExitCode::FAILURE;
    }

    if args.status {
        match client.get(format!("{base}/status")).send().await {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(data) => {
                    println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
                    return ExitCode::SUCCESS;
                }
                Err(e) => {
                    eprintln!("Bad status response: {e}");
                    return ExitCode::FAILURE;
                }
            },
            Err(e) => {
                eprintln!("Status request failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if args.cancel {
        return exit_code(post(&client, &format!("{base}/cancel"), None).await);
    }

    if args.toggle {
        return exit_code(post(&client, &format!("{base}/active-toggle"), None).await);
    }

    if let Some(emotion) = &args.emotion {
        let ok = post(
            &client,
            &format!("{base}/emotion"),
            Some(json!({ "emotion": emotion })),
        )
        .await;
        if !ok || args.text.is_none() {
            return exit_code(ok);
        }
    }

    match &args.text {
        Some(text) => {
            exit_code(post(&client, &format!("{base}/say"), Some(json!({ "text": text }))).await)
        }
        None => {
            eprintln!("Nothing to do: pass a message or one of --emotion/--cancel/--toggle/--status");
            ExitCode::FAILURE
        }
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn post(client: &Client, url: &str, body: Option<serde_json::Value>) -> bool {
    let request = match body {
        Some(body) => client.post(url).json(&body),
        None => client.post(url),
    };

    match request.send().await {
        Ok(resp) => match resp.json::<SimpleResponse>().await {
            Ok(data) if data.status == "error" => {
                eprintln!("Error: {}", data.error.unwrap_or_else(|| "unknown".into()));
                false
            }
            Ok(data) => {
                println!("{}", data.status);
                true
            }
            Err(e) => {
                eprintln!("Bad response: {e}");
                false
            }
        },
        Err(e) => {
            eprintln!("Request failed: {e}");
            false
        }
    }
}
