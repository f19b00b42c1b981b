//! Interactive terminal client for the `/chat` WebSocket.
//!
//! Each stdin line is sent as a query; answer chunks are printed as they
//! arrive.  `/cancel` abandons the answer in progress and `quit` or `exit`
//! leaves.

use std::io::Write;

use anyhow::{Context, Result, bail};
use futures::{SinkExt, StreamExt};
use oracle_web::ServerFrame;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

/// What the user typed, after trimming.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Blank,
    Quit,
    Cancel,
    Ask(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Blank,
        "quit" | "exit" => Input::Quit,
        "/cancel" => Input::Cancel,
        other => Input::Ask(other),
    }
}

/// Check that `raw` is a plain WebSocket URL.  TLS is left to a reverse
/// proxy in front of the server.
pub fn parse_chat_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).context("failed to parse server URL")?;
    match url.scheme() {
        "ws" => Ok(url),
        "wss" => bail!("wss:// is not supported by this client; connect to the server with ws://"),
        other => bail!("expected a ws:// URL, got {other}://"),
    }
}

fn query_frame(content: &str) -> String {
    serde_json::json!({ "content": content }).to_string()
}

fn cancel_frame() -> String {
    serde_json::json!({ "type": "cancel" }).to_string()
}

fn prompt() {
    print!("> ");
    std::io::stdout().flush().ok();
}

/// Connect to `url` and run the read-eval-print loop until stdin closes,
/// the user quits, or the server goes away.
pub async fn run_chat(url: &str) -> Result<()> {
    let url = parse_chat_url(url)?;
    let (ws, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let (mut sink, mut stream) = ws.split();

    println!("connected to {url}");
    println!("type a question, /cancel to stop an answer, quit to leave");
    prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut answering = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match classify(&line) {
                    Input::Blank => {
                        if !answering {
                            prompt();
                        }
                    }
                    Input::Quit => break,
                    Input::Cancel => {
                        sink.send(Message::Text(cancel_frame().into()))
                            .await
                            .context("failed to send cancel")?;
                    }
                    Input::Ask(question) => {
                        sink.send(Message::Text(query_frame(question).into()))
                            .await
                            .context("failed to send query")?;
                        answering = true;
                    }
                }
            }
            msg = stream.next() => {
                let Some(msg) = msg else {
                    println!("\nconnection closed by server");
                    return Ok(());
                };
                match msg.context("websocket error")? {
                    Message::Text(text) => {
                        match serde_json::from_str::<ServerFrame>(text.as_str()) {
                            Ok(ServerFrame::Chunk(data)) => {
                                print!("{data}");
                                std::io::stdout().flush().ok();
                            }
                            Ok(ServerFrame::Done) => {
                                println!();
                                answering = false;
                                prompt();
                            }
                            Ok(ServerFrame::Error(reason)) => {
                                eprintln!("\n[error] {reason}");
                                answering = false;
                                prompt();
                            }
                            Err(e) => debug!(error = %e, "ignoring unrecognized frame"),
                        }
                    }
                    Message::Close(_) => {
                        println!("\nconnection closed by server");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }

    sink.send(Message::Close(None)).await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_websocket_urls_only() {
        assert!(parse_chat_url("ws://127.0.0.1:8000/chat").is_ok());
        assert!(parse_chat_url("wss://oracle.example.com/chat").is_err());

        let err = parse_chat_url("http://127.0.0.1:8000/chat").unwrap_err();
        assert!(err.to_string().contains("http://"));
        assert!(parse_chat_url("not a url").is_err());
    }

    #[test]
    fn classifies_input_lines() {
        assert_eq!(classify("   "), Input::Blank);
        assert_eq!(classify("quit"), Input::Quit);
        assert_eq!(classify(" exit \n"), Input::Quit);
        assert_eq!(classify("/cancel"), Input::Cancel);
        assert_eq!(classify("  why? "), Input::Ask("why?"));
    }

    #[test]
    fn frames_are_json_the_server_accepts() {
        let q: serde_json::Value = serde_json::from_str(&query_frame("say \"hi\"")).unwrap();
        assert_eq!(q["content"], "say \"hi\"");

        let c: serde_json::Value = serde_json::from_str(&cancel_frame()).unwrap();
        assert_eq!(c["type"], "cancel");
    }
}
