use crate::events::Subsystem;
use crate::utils::{mpd_parse, quote};

// Protocol commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Password(String),
    Ping,
    Status,
    CurrentSong,
    PlaylistInfo,
    ListInfo(String),
    ListPlaylists,
    Play(Option<usize>),
    Pause(bool),
    Stop,
    Next,
    Previous,
    SeekCur(f64),
    Random(bool),
    Repeat(bool),
    Consume(bool),
    Clear,
    Add(String),
    Delete(usize),
    Shuffle,
    MoveId { id: u32, to: usize },
    Load(String),
    Save(String),
    Rm(String),
    Rename { from: String, to: String },
    PlaylistAdd { name: String, uri: String },
    Update(Option<String>),
    Idle(Vec<Subsystem>),
    NoIdle,
}

impl Command {
    /// The protocol name of the command
    pub fn name(&self) -> &'static str {
        match self {
            Command::Password(_) => "password",
            Command::Ping => "ping",
            Command::Status => "status",
            Command::CurrentSong => "currentsong",
            Command::PlaylistInfo => "playlistinfo",
            Command::ListInfo(_) => "lsinfo",
            Command::ListPlaylists => "listplaylists",
            Command::Play(_) => "play",
            Command::Pause(_) => "pause",
            Command::Stop => "stop",
            Command::Next => "next",
            Command::Previous => "previous",
            Command::SeekCur(_) => "seekcur",
            Command::Random(_) => "random",
            Command::Repeat(_) => "repeat",
            Command::Consume(_) => "consume",
            Command::Clear => "clear",
            Command::Add(_) => "add",
            Command::Delete(_) => "delete",
            Command::Shuffle => "shuffle",
            Command::MoveId { .. } => "moveid",
            Command::Load(_) => "load",
            Command::Save(_) => "save",
            Command::Rm(_) => "rm",
            Command::Rename { .. } => "rename",
            Command::PlaylistAdd { .. } => "playlistadd",
            Command::Update(_) => "update",
            Command::Idle(_) => "idle",
            Command::NoIdle => "noidle",
        }
    }

    /// Renders the request line, without the trailing newline.
    pub fn to_line(&self) -> String {
        let name = self.name();
        match self {
            Command::Password(password) => format!("{} {}", name, quote(password)),
            Command::ListInfo(path) if path.is_empty() => name.to_string(),
            Command::ListInfo(path) => format!("{} {}", name, quote(path)),
            Command::Play(Some(pos)) => format!("{} {}", name, pos),
            Command::Pause(paused) => format!("{} {}", name, mpd_parse::format_bool(*paused)),
            Command::SeekCur(secs) => format!("{} {:.3}", name, secs),
            Command::Random(on) | Command::Repeat(on) | Command::Consume(on) => {
                format!("{} {}", name, mpd_parse::format_bool(*on))
            }
            Command::Add(uri) => format!("{} {}", name, quote(uri)),
            Command::Delete(pos) => format!("{} {}", name, pos),
            Command::MoveId { id, to } => format!("{} {} {}", name, id, to),
            Command::Load(playlist) | Command::Save(playlist) | Command::Rm(playlist) => {
                format!("{} {}", name, quote(playlist))
            }
            Command::Rename { from, to } => format!("{} {} {}", name, quote(from), quote(to)),
            Command::PlaylistAdd { name: playlist, uri } => {
                format!("{} {} {}", name, quote(playlist), quote(uri))
            }
            Command::Update(Some(path)) if !path.is_empty() => format!("{} {}", name, quote(path)),
            Command::Idle(subsystems) if !subsystems.is_empty() => {
                let tags: Vec<&str> = subsystems.iter().map(|s| s.as_str()).collect();
                format!("{} {}", name, tags.join(" "))
            }
            _ => name.to_string(),
        }
    }
}

/// Commands sent as one `command_list_begin` .. `command_list_end` block.
///
/// The server executes the whole list before answering, and the encoder
/// writes it as a single frame so nothing else can be interleaved on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn with(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

impl Extend<Command> for CommandList {
    fn extend<I: IntoIterator<Item = Command>>(&mut self, iter: I) {
        self.commands.extend(iter);
    }
}

impl FromIterator<Command> for CommandList {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}
