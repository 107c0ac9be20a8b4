use std::time::Duration;

use clap::{Parser, Subcommand};
use frames::{Envelope, Notice};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    Ws(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("websocket closed")]
    WsClosed,
    #[error("timed out waiting for websocket frame")]
    Timeout,
    #[error("expected welcome notice, got: {0}")]
    NoWelcome(String),
    #[error("health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error("stdin: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for CliError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Ws(Box::new(error))
    }
}

#[derive(Parser, Debug)]
#[command(name = "relay-cli", about = "Message relay websocket CLI")]
struct Cli {
    #[arg(long, env = "RELAY_BASE_URL", default_value = "http://127.0.0.1:8080")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check `/healthz`.
    Ping,
    /// Interactive session: print received frames, send envelopes typed on stdin.
    Chat,
    /// Send one message and exit.
    Send {
        /// Recipient client id.
        to: String,
        message: String,
        #[arg(long, default_value_t = 500, help = "Linger before closing, in milliseconds")]
        linger_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Ping => run_ping(&cli.base_url).await,
        Command::Chat => run_chat(&cli.base_url).await,
        Command::Send { to, message, linger_ms } => {
            run_send(&cli.base_url, Envelope::new(to, message), Duration::from_millis(linger_ms)).await
        }
    }
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let url = format!("{}/healthz", base_url.trim_end_matches('/'));
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_chat(base_url: &str) -> Result<(), CliError> {
    let (stream, id) = connect(base_url).await?;
    eprintln!("connected as {id}");
    eprintln!(r#"type {{"id": "<peer-id>", "message": "<text>"}} or "quit" to exit"#);

    let (mut write, mut read) = stream.split();

    let printer = tokio::spawn(async move {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => println!("{}", text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(error) => {
                    eprintln!("receive failed: {error}");
                    break;
                }
            }
        }
        eprintln!("connection closed");
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") {
            break;
        }
        if let Err(error) = frames::decode_envelope(line) {
            eprintln!("not sent: {error}");
            continue;
        }
        if printer.is_finished() {
            return Err(CliError::WsClosed);
        }
        write.send(Message::Text(line.into())).await?;
    }

    let _ = write.send(Message::Close(None)).await;
    printer.abort();
    Ok(())
}

async fn run_send(base_url: &str, envelope: Envelope, linger: Duration) -> Result<(), CliError> {
    let (mut stream, id) = connect(base_url).await?;
    eprintln!("connected as {id}");

    stream
        .send(Message::Text(frames::encode_envelope(&envelope).into()))
        .await?;

    // Print anything that arrives while lingering, e.g. a reply or peer list.
    let _ = tokio::time::timeout(linger, async {
        while let Some(Ok(message)) = stream.next().await {
            if let Message::Text(text) = message {
                println!("{}", text.as_str());
            }
        }
    })
    .await;

    stream.close(None).await?;
    Ok(())
}

/// Connect to the relay and wait for the welcome notice carrying our id.
async fn connect(base_url: &str) -> Result<(WsStream, String), CliError> {
    let (mut stream, _) = connect_async(ws_url(base_url)?).await?;
    let first = recv_text(&mut stream, Duration::from_secs(5)).await?;
    match Notice::parse(&first) {
        Some(Notice::Welcome { id }) => Ok((stream, id)),
        _ => Err(CliError::NoWelcome(first)),
    }
}

fn ws_url(base_url: &str) -> Result<String, CliError> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws"));
    }

    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

async fn recv_text(stream: &mut WsStream, timeout: Duration) -> Result<String, CliError> {
    let fut = async {
        loop {
            let Some(message) = stream.next().await else {
                return Err(CliError::WsClosed);
            };
            match message? {
                Message::Text(text) => return Ok(text.as_str().to_owned()),
                Message::Close(_) => return Err(CliError::WsClosed),
                _ => {}
            }
        }
    };

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CliError::Timeout)?
}
