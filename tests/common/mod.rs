//! Scripted in-process MPD server for integration tests.
//!
//! Speaks enough of the protocol for the connector: greeting, password,
//! status, listplaylists, playlistinfo, a few playback and queue commands,
//! command lists and idle/noidle. Every line received is recorded, and any
//! command other than `noidle` sent while a client is parked in `idle` is
//! recorded as a framing violation.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use mpd_connector::ConnectorConfig;

pub const PROTOCOL_VERSION: &str = "0.23.5";

#[derive(Default)]
struct ServerState {
    status: Vec<(String, String)>,
    playlists: Vec<String>,
    queue: Vec<String>,
    received: Vec<String>,
    violations: Vec<String>,
    password: Option<String>,
}

impl ServerState {
    fn status_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .status
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        lines.push(format!("playlistlength: {}", self.queue.len()));
        lines
    }

    fn set_status(&mut self, key: &str, value: &str) {
        match self.status.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.status.push((key.to_string(), value.to_string())),
        }
    }
}

pub struct MockMpdServer {
    port: u16,
    state: Arc<Mutex<ServerState>>,
    changes: broadcast::Sender<String>,
    kill: broadcast::Sender<()>,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockMpdServer {
    pub async fn start() -> Self {
        Self::start_with_password(None).await
    }

    pub async fn start_with_password(password: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let port = listener.local_addr().expect("local addr").port();

        let state = Arc::new(Mutex::new(ServerState {
            status: vec![
                ("volume".to_string(), "50".to_string()),
                ("repeat".to_string(), "0".to_string()),
                ("random".to_string(), "0".to_string()),
                ("single".to_string(), "0".to_string()),
                ("consume".to_string(), "0".to_string()),
                ("state".to_string(), "stop".to_string()),
            ],
            playlists: vec!["Favourites".to_string()],
            queue: vec!["album/01.flac".to_string(), "album/02.flac".to_string()],
            password: password.map(str::to_string),
            ..Default::default()
        }));
        let (changes, _) = broadcast::channel(64);
        let (kill, _) = broadcast::channel(4);
        let accepted = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));

        let accept_task = {
            let state = state.clone();
            let changes = changes.clone();
            let kill = kill.clone();
            let accepted = accepted.clone();
            let open = open.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    open.fetch_add(1, Ordering::SeqCst);
                    let connection = Connection {
                        state: state.clone(),
                        changes: changes.clone(),
                        changes_rx: changes.subscribe(),
                        kill_rx: kill.subscribe(),
                    };
                    let open = open.clone();
                    tokio::spawn(async move {
                        let _ = connection.serve(stream).await;
                        open.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            port,
            state,
            changes,
            kill,
            accepted,
            open,
            accept_task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connector config pointing at this server with short test timings
    pub fn config(&self) -> ConnectorConfig {
        ConnectorConfig::new("127.0.0.1", self.port)
            .with_retry_interval(Duration::from_millis(100))
            .with_heartbeat_interval(Duration::from_millis(200))
            .with_io_timeout(Duration::from_secs(2))
    }

    /// Simulates another client changing something
    pub fn push_change(&self, subsystem: &str) {
        let _ = self.changes.send(subsystem.to_string());
    }

    pub fn add_playlist(&self, name: &str) {
        self.state.lock().unwrap().playlists.push(name.to_string());
        self.push_change("stored_playlist");
    }

    pub fn set_status(&self, key: &str, value: &str) {
        self.state.lock().unwrap().set_status(key, value);
    }

    /// Drops every open client connection
    pub fn sever(&self) {
        let _ = self.kill.send(());
    }

    pub fn connections_accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn count_received(&self, line: &str) -> usize {
        self.received().iter().filter(|l| *l == line).count()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    pub fn queue(&self) -> Vec<String> {
        self.state.lock().unwrap().queue.clone()
    }

    pub fn playlists(&self) -> Vec<String> {
        self.state.lock().unwrap().playlists.clone()
    }
}

impl Drop for MockMpdServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.kill.send(());
    }
}

/// A port nothing listens on
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

/// Polls `condition` until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Reply = Result<Vec<String>, (u32, String)>;

struct Connection {
    state: Arc<Mutex<ServerState>>,
    changes: broadcast::Sender<String>,
    changes_rx: broadcast::Receiver<String>,
    kill_rx: broadcast::Receiver<()>,
}

impl Connection {
    async fn serve(mut self, stream: TcpStream) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        writer
            .write_all(format!("OK MPD {}\n", PROTOCOL_VERSION).as_bytes())
            .await?;

        let mut idling = false;
        let mut pending: Vec<String> = Vec::new();
        let mut command_list: Option<Vec<String>> = None;

        loop {
            tokio::select! {
                _ = self.kill_rx.recv() => return Ok(()),
                change = self.changes_rx.recv() => {
                    if let Ok(change) = change {
                        if !pending.contains(&change) {
                            pending.push(change);
                        }
                        if idling {
                            idling = false;
                            Self::flush_changes(&mut writer, &mut pending).await?;
                        }
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { return Ok(()) };
                    self.state.lock().unwrap().received.push(line.clone());

                    if idling {
                        if line == "noidle" {
                            idling = false;
                            Self::flush_changes(&mut writer, &mut pending).await?;
                        } else {
                            self.state.lock().unwrap().violations.push(line);
                        }
                        continue;
                    }

                    if let Some(list) = command_list.as_mut() {
                        if line != "command_list_end" {
                            list.push(line);
                            continue;
                        }
                        let list = command_list.take().unwrap_or_default();
                        let mut response = String::new();
                        for (index, command) in list.iter().enumerate() {
                            match self.run(command) {
                                Ok(out) => out.iter().for_each(|l| {
                                    response.push_str(l);
                                    response.push('\n');
                                }),
                                Err((code, message)) => {
                                    response = ack(code, index, command, &message);
                                    break;
                                }
                            }
                        }
                        if !response.starts_with("ACK") {
                            response.push_str("OK\n");
                        }
                        writer.write_all(response.as_bytes()).await?;
                        continue;
                    }

                    if line == "command_list_begin" {
                        command_list = Some(Vec::new());
                    } else if line == "idle" || line.starts_with("idle ") {
                        if pending.is_empty() {
                            idling = true;
                        } else {
                            Self::flush_changes(&mut writer, &mut pending).await?;
                        }
                    } else if line == "noidle" {
                        // Ignored outside idle
                    } else {
                        let response = match self.run(&line) {
                            Ok(out) => {
                                let mut response: String =
                                    out.iter().map(|l| format!("{}\n", l)).collect();
                                response.push_str("OK\n");
                                response
                            }
                            Err((code, message)) => ack(code, 0, &line, &message),
                        };
                        writer.write_all(response.as_bytes()).await?;
                    }
                }
            }
        }
    }

    async fn flush_changes(
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
        pending: &mut Vec<String>,
    ) -> std::io::Result<()> {
        let mut response: String = pending
            .drain(..)
            .map(|change| format!("changed: {}\n", change))
            .collect();
        response.push_str("OK\n");
        writer.write_all(response.as_bytes()).await
    }

    fn notify(&self, subsystem: &str) {
        let _ = self.changes.send(subsystem.to_string());
    }

    fn run(&self, line: &str) -> Reply {
        let (name, args) = split_command(line);
        let mut state = self.state.lock().unwrap();
        match name.as_str() {
            "ping" => Ok(vec![]),
            "password" => match (&state.password, args.first()) {
                (Some(expected), Some(given)) if expected == given => Ok(vec![]),
                _ => Err((3, "incorrect password".to_string())),
            },
            "status" => Ok(state.status_lines()),
            "currentsong" => {
                let song = state
                    .status
                    .iter()
                    .find(|(k, _)| k == "song")
                    .and_then(|(_, v)| v.parse::<usize>().ok());
                Ok(match song.and_then(|pos| state.queue.get(pos).map(|f| (pos, f))) {
                    Some((pos, file)) => vec![
                        format!("file: {}", file),
                        format!("Pos: {}", pos),
                        format!("Id: {}", pos + 1),
                    ],
                    None => vec![],
                })
            }
            "playlistinfo" => Ok(state
                .queue
                .iter()
                .enumerate()
                .flat_map(|(pos, file)| {
                    vec![
                        format!("file: {}", file),
                        format!("Pos: {}", pos),
                        format!("Id: {}", pos + 1),
                    ]
                })
                .collect()),
            "listplaylists" => Ok(state
                .playlists
                .iter()
                .flat_map(|name| {
                    vec![
                        format!("playlist: {}", name),
                        "Last-Modified: 2024-01-01T00:00:00Z".to_string(),
                    ]
                })
                .collect()),
            "play" => {
                state.set_status("state", "play");
                let pos = args.first().cloned().unwrap_or_else(|| "0".to_string());
                state.set_status("song", &pos);
                drop(state);
                self.notify("player");
                Ok(vec![])
            }
            "pause" => {
                let paused = args.first().map(|a| a == "1").unwrap_or(true);
                state.set_status("state", if paused { "pause" } else { "play" });
                drop(state);
                self.notify("player");
                Ok(vec![])
            }
            "stop" => {
                state.set_status("state", "stop");
                drop(state);
                self.notify("player");
                Ok(vec![])
            }
            "random" | "repeat" | "consume" => {
                let value = args.first().cloned().unwrap_or_default();
                state.set_status(&name, &value);
                drop(state);
                self.notify("options");
                Ok(vec![])
            }
            "clear" => {
                state.queue.clear();
                drop(state);
                self.notify("playlist");
                Ok(vec![])
            }
            "add" => {
                state.queue.push(args.first().cloned().unwrap_or_default());
                drop(state);
                self.notify("playlist");
                Ok(vec![])
            }
            "save" => {
                let name = args.first().cloned().unwrap_or_default();
                if state.playlists.contains(&name) {
                    return Err((56, "Playlist already exists".to_string()));
                }
                state.playlists.push(name);
                drop(state);
                self.notify("stored_playlist");
                Ok(vec![])
            }
            "rm" => {
                let name = args.first().cloned().unwrap_or_default();
                let before = state.playlists.len();
                state.playlists.retain(|p| *p != name);
                if state.playlists.len() == before {
                    return Err((50, "No such playlist".to_string()));
                }
                drop(state);
                self.notify("stored_playlist");
                Ok(vec![])
            }
            _ => Err((5, format!("unknown command \"{}\"", name))),
        }
    }
}

fn ack(code: u32, index: usize, command: &str, message: &str) -> String {
    let (name, _) = split_command(command);
    format!("ACK [{}@{}] {{{}}} {}\n", code, index, name, message)
}

/// Splits a request line into the command name and unquoted arguments.
fn split_command(line: &str) -> (String, Vec<String>) {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == ' ' {
            chars.next();
            continue;
        }
        let mut word = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            word.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => word.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                word.push(c);
                chars.next();
            }
        }
        words.push(word);
    }
    let name = if words.is_empty() {
        String::new()
    } else {
        words.remove(0)
    };
    (name, words)
}
