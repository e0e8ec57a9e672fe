//! Terminal chat client driving the Kaiwa sync core.
//!
//! Connects to a backend over a websocket, logs in with a resume token, and
//! prints room lists, messages and history windows as they arrive.
//! Reconnects on its own with exponential backoff.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin kaiwa-client -- --user-id u1 --token secret
//! KAIWA_USER_ID=u1 KAIWA_TOKEN=secret cargo run --bin kaiwa-client
//! ```
//!
//! Commands:
//! ```not_rust
//! /open <room>        open a room view and make it current
//! /close [room]       close a room view (the current one by default)
//! /more               load older messages in the current room
//! /highlight <msg>    jump to a message in the current room
//! /latest             return to the newest messages
//! /read               mark the current room as read
//! /rooms              fetch the room list
//! /reconnect          retry the connection now
//! /away, /online      report presence
//! /status             print the connection status
//! /quit               exit
//! /send <text>        send to the current room
//! <text>              same as /send
//! ```

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use kaiwa_client::config::DEFAULT_ENDPOINT;
use kaiwa_client::domain::{Credentials, MessageId, RoomId};
use kaiwa_client::formatter::EventFormatter;
use kaiwa_client::{ChannelEventHandler, ChatClient, ChatEvent, ClientConfig};
use kaiwa_shared::logger::setup_logger;

/// Rendered height of one message line, fed back as the layout height
const LINE_HEIGHT_PX: f64 = 20.0;

#[derive(Parser, Debug)]
#[command(name = "kaiwa-client")]
#[command(about = "Terminal chat client on the Kaiwa sync core", long_about = None)]
struct Args {
    /// WebSocket endpoint of the backend
    #[arg(short = 'u', long, default_value = DEFAULT_ENDPOINT)]
    url: String,

    /// Backend user id
    #[arg(long, env = "KAIWA_USER_ID")]
    user_id: Option<String>,

    /// Resume token used to log in
    #[arg(long, env = "KAIWA_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Messages per history page
    #[arg(long, default_value_t = 20)]
    page_size: usize,

    /// Skip the cached room list at startup
    #[arg(long)]
    no_cache: bool,
}

/// One parsed input line
#[derive(Debug, PartialEq)]
enum Input {
    Open(String),
    Close(Option<String>),
    More,
    Highlight(String),
    Latest,
    Read,
    Rooms,
    Reconnect,
    Liveness(bool),
    Status,
    Quit,
    Send(String),
    Unknown(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let Some(command) = line.strip_prefix('/') else {
            return Input::Send(line.to_string());
        };
        let (name, arg) = match command.split_once(' ') {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        match (name, arg) {
            ("open", room) if !room.is_empty() => Input::Open(room.to_string()),
            ("close", "") => Input::Close(None),
            ("close", room) => Input::Close(Some(room.to_string())),
            ("send", body) if !body.is_empty() => Input::Send(body.to_string()),
            ("more", _) => Input::More,
            ("highlight", id) if !id.is_empty() => Input::Highlight(id.to_string()),
            ("latest", _) => Input::Latest,
            ("read", _) => Input::Read,
            ("rooms", _) => Input::Rooms,
            ("reconnect", _) => Input::Reconnect,
            ("away", _) => Input::Liveness(false),
            ("online", _) => Input::Liveness(true),
            ("status", _) => Input::Status,
            ("quit", _) | ("exit", _) => Input::Quit,
            _ => Input::Unknown(line.to_string()),
        }
    }
}

fn redisplay_prompt(room: Option<&RoomId>) {
    match room {
        Some(room) => print!("{}> ", room),
        None => print!("> "),
    }
    std::io::stdout().flush().ok();
}

/// Read stdin lines on a blocking thread
fn spawn_readline() -> mpsc::UnboundedReceiver<String> {
    let (input_tx, input_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    // Ctrl+D
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });
    input_rx
}

/// Act on one input line; returns `false` to quit
fn handle_input(client: &ChatClient, current: &mut Option<RoomId>, input: Input) -> bool {
    let result = match input {
        Input::Open(room) => match RoomId::new(room) {
            Ok(room_id) => {
                let opened = client.open_room_view(&room_id);
                *current = Some(room_id);
                opened
            }
            Err(e) => {
                println!("{}", e);
                Ok(())
            }
        },
        Input::Close(Some(room)) => match RoomId::new(room) {
            Ok(room_id) => {
                if current.as_ref() == Some(&room_id) {
                    *current = None;
                }
                client.close_room_view(&room_id)
            }
            Err(e) => {
                println!("{}", e);
                Ok(())
            }
        },
        Input::Close(None) => match current.take() {
            Some(room_id) => client.close_room_view(&room_id),
            None => Ok(()),
        },
        Input::More => with_room(current, |room_id| client.request_history_page(room_id)),
        Input::Highlight(id) => match MessageId::new(id) {
            Ok(message_id) => with_room(current, |room_id| {
                client.request_highlight(room_id, &message_id)
            }),
            Err(e) => {
                println!("{}", e);
                Ok(())
            }
        },
        Input::Latest => with_room(current, |room_id| client.jump_to_latest(room_id)),
        Input::Read => with_room(current, |room_id| {
            let client = client.clone();
            let room_id = room_id.clone();
            tokio::spawn(async move {
                if let Err(e) = client.mark_read(&room_id).await {
                    tracing::warn!("Failed to mark {} as read: {}", room_id, e);
                }
            });
            Ok(())
        }),
        Input::Rooms => {
            let client = client.clone();
            tokio::spawn(async move {
                match client.fetch_rooms().await {
                    Ok(rooms) => print!(
                        "{}",
                        EventFormatter::format_room_list(
                            &rooms,
                            kaiwa_client::bootstrap::RoomListSource::Fresh
                        )
                    ),
                    Err(e) => tracing::warn!("Failed to fetch rooms: {}", e),
                }
            });
            Ok(())
        }
        Input::Reconnect => client.reconnect(),
        Input::Liveness(online) => client.set_liveness(online),
        Input::Status => {
            print!("{}", EventFormatter::format_connection_status(&client.status()));
            Ok(())
        }
        Input::Quit => return false,
        Input::Send(body) => with_room(current, |room_id| {
            let client = client.clone();
            let room_id = room_id.clone();
            tokio::spawn(async move {
                if let Err(e) = client.send_message(&room_id, body, vec![]).await {
                    tracing::debug!("Send to {} failed: {}", room_id, e);
                }
            });
            Ok(())
        }),
        Input::Unknown(line) => {
            println!("unknown command: {}", line);
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!("Client error: {}", e);
        return false;
    }
    true
}

fn with_room(
    current: &Option<RoomId>,
    f: impl FnOnce(&RoomId) -> Result<(), kaiwa_client::ClientError>,
) -> Result<(), kaiwa_client::ClientError> {
    match current {
        Some(room_id) => f(room_id),
        None => {
            println!("no room open, use /open <room>");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let credentials = match (&args.user_id, &args.token) {
        (Some(user_id), Some(token)) => Credentials::from_parts(user_id, token),
        _ => None,
    };
    if credentials.is_none() {
        tracing::warn!("No credentials given; set --user-id and --token to log in");
    }

    let config = ClientConfig::new(args.url.clone())
        .with_page_size(args.page_size)
        .with_cache(!args.no_cache);
    let (handler, mut events) = ChannelEventHandler::new();
    let client = ChatClient::connect_websocket(config, Arc::new(handler));

    tracing::info!("Connecting to {}", args.url);
    if let Err(e) = client.open(credentials) {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }

    let mut input = spawn_readline();
    let mut current: Option<RoomId> = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let ChatEvent::WindowChanged { room_id, window } = &event {
                    // The terminal has no real layout; report one line per message
                    let height = window.messages.len() as f64 * LINE_HEIGHT_PX;
                    client.layout_settled(room_id, height).ok();
                    if current.as_ref() != Some(room_id) {
                        continue;
                    }
                }
                if let Some(text) = EventFormatter::format_event(&event) {
                    print!("{}", text);
                    redisplay_prompt(current.as_ref());
                }
            }
            line = input.recv() => {
                let Some(line) = line else { break };
                if !handle_input(&client, &mut current, Input::parse(&line)) {
                    break;
                }
            }
        }
    }

    client.shutdown().ok();
    tracing::info!("Client session ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_text_is_send() {
        // テスト項目: スラッシュで始まらない入力は送信になる
        // given (前提条件):
        let line = "hello there";

        // when (操作):
        let input = Input::parse(line);

        // then (期待する結果):
        assert_eq!(input, Input::Send("hello there".to_string()));
    }

    #[test]
    fn test_parse_commands_with_arguments() {
        // テスト項目: 引数付きコマンドが解釈される
        // given (前提条件):
        let open = "/open general";
        let highlight = "/highlight m42";
        let send = "/send  hi all";

        // when (操作):
        let open = Input::parse(open);
        let highlight = Input::parse(highlight);
        let send = Input::parse(send);

        // then (期待する結果):
        assert_eq!(open, Input::Open("general".to_string()));
        assert_eq!(highlight, Input::Highlight("m42".to_string()));
        assert_eq!(send, Input::Send("hi all".to_string()));
        assert_eq!(Input::parse("/close"), Input::Close(None));
    }

    #[test]
    fn test_parse_missing_argument_is_unknown() {
        // テスト項目: 必須引数がないコマンドは不明扱い
        // given (前提条件):
        let line = "/open";

        // when (操作):
        let input = Input::parse(line);

        // then (期待する結果):
        assert_eq!(input, Input::Unknown("/open".to_string()));
        assert_eq!(Input::parse("/away"), Input::Liveness(false));
    }
}
