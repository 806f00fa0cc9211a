use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;

use crate::utils::mpd_parse;

/// Playback state as reported in the `state` status attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Play,
    Pause,
    Stop,
    /// Not connected, or the server sent something else
    Unknown,
}

impl PlayerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerState::Play => "play",
            PlayerState::Pause => "pause",
            PlayerState::Stop => "stop",
            PlayerState::Unknown => "unknown",
        }
    }
}

impl FromStr for PlayerState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "play" => PlayerState::Play,
            "pause" => PlayerState::Pause,
            "stop" => PlayerState::Stop,
            _ => PlayerState::Unknown,
        })
    }
}

/// Last known server status, as returned by the `status` command.
///
/// The snapshot is a plain attribute map. A missing attribute means the
/// corresponding feature is inactive: no `updating_db` means no database
/// update is running, no `song` means there is no current song. The keys the
/// connector and its typed accessors rely on are listed as constants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusSnapshot {
    attrs: HashMap<String, String>,
}

impl StatusSnapshot {
    pub const STATE: &'static str = "state";
    pub const SONG: &'static str = "song";
    pub const SONG_ID: &'static str = "songid";
    pub const ELAPSED: &'static str = "elapsed";
    pub const DURATION: &'static str = "duration";
    /// Legacy `elapsed:total` in whole seconds
    pub const TIME: &'static str = "time";
    pub const RANDOM: &'static str = "random";
    pub const REPEAT: &'static str = "repeat";
    pub const CONSUME: &'static str = "consume";
    pub const SINGLE: &'static str = "single";
    pub const VOLUME: &'static str = "volume";
    pub const PLAYLIST_LENGTH: &'static str = "playlistlength";
    pub const UPDATING_DB: &'static str = "updating_db";
    pub const ERROR: &'static str = "error";

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            attrs: pairs.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attrs
    }

    pub fn player_state(&self) -> PlayerState {
        self.get(Self::STATE)
            .and_then(|s| s.parse().ok())
            .unwrap_or(PlayerState::Unknown)
    }

    /// Queue position of the current song
    pub fn song_index(&self) -> Option<usize> {
        self.get(Self::SONG).and_then(mpd_parse::parse_index)
    }

    pub fn song_id(&self) -> Option<u32> {
        self.get(Self::SONG_ID).and_then(|s| s.parse().ok())
    }

    /// Elapsed time of the current song in seconds
    pub fn elapsed(&self) -> Option<f64> {
        self.get(Self::ELAPSED)
            .map(mpd_parse::parse_float)
            .or_else(|| self.legacy_time().map(|(elapsed, _)| elapsed))
    }

    /// Duration of the current song in seconds
    pub fn duration(&self) -> Option<f64> {
        self.get(Self::DURATION)
            .map(mpd_parse::parse_float)
            .or_else(|| self.legacy_time().map(|(_, total)| total))
    }

    /// Calculate the progress percentage (0-100)
    pub fn progress_percentage(&self) -> f64 {
        match (self.elapsed(), self.duration()) {
            (Some(elapsed), Some(duration)) if duration > 0.0 => {
                (elapsed / duration * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        }
    }

    pub fn random(&self) -> bool {
        self.flag(Self::RANDOM)
    }

    pub fn repeat(&self) -> bool {
        self.flag(Self::REPEAT)
    }

    pub fn consume(&self) -> bool {
        self.flag(Self::CONSUME)
    }

    pub fn is_updating_db(&self) -> bool {
        self.contains(Self::UPDATING_DB)
    }

    /// Mixer volume, `None` when the server has no mixer (reports -1)
    pub fn volume(&self) -> Option<u8> {
        self.get(Self::VOLUME).and_then(|s| s.trim().parse().ok())
    }

    pub fn queue_length(&self) -> usize {
        self.get(Self::PLAYLIST_LENGTH)
            .and_then(mpd_parse::parse_index)
            .unwrap_or(0)
    }

    pub fn error(&self) -> Option<&str> {
        self.get(Self::ERROR)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).map(mpd_parse::parse_bool).unwrap_or(false)
    }

    fn legacy_time(&self) -> Option<(f64, f64)> {
        let (elapsed, total) = self.get(Self::TIME)?.split_once(':')?;
        Some((mpd_parse::parse_float(elapsed), mpd_parse::parse_float(total)))
    }
}

/// A song's tags and attributes from `currentsong`, `playlistinfo` or `lsinfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Song {
    attrs: HashMap<String, String>,
}

impl Song {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            attrs: pairs.into_iter().collect(),
        }
    }

    /// Splits a multi-song response; every song starts with its `file` key.
    pub fn list_from_pairs(pairs: Vec<(String, String)>) -> Vec<Song> {
        let mut songs = Vec::new();
        let mut current: Option<HashMap<String, String>> = None;
        for (key, value) in pairs {
            if key == "file" {
                if let Some(attrs) = current.take() {
                    songs.push(Song { attrs });
                }
                current = Some(HashMap::new());
            }
            if let Some(attrs) = current.as_mut() {
                attrs.insert(key, value);
            }
        }
        if let Some(attrs) = current {
            songs.push(Song { attrs });
        }
        songs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attrs
    }

    pub fn file(&self) -> &str {
        self.get("file").unwrap_or_default()
    }

    pub fn title(&self) -> Option<&str> {
        self.get("Title")
    }

    pub fn artist(&self) -> Option<&str> {
        self.get("Artist")
    }

    pub fn album(&self) -> Option<&str> {
        self.get("Album")
    }

    pub fn date(&self) -> Option<&str> {
        self.get("Date")
    }

    pub fn track(&self) -> Option<&str> {
        self.get("Track")
    }

    /// Duration in seconds, from `duration` or the legacy integer `Time`
    pub fn duration(&self) -> Option<f64> {
        self.get("duration")
            .or_else(|| self.get("Time"))
            .map(mpd_parse::parse_float)
    }

    /// Position in the queue (queue listings only)
    pub fn position(&self) -> Option<usize> {
        self.get("Pos").and_then(mpd_parse::parse_index)
    }

    /// Queue song id (queue listings only)
    pub fn id(&self) -> Option<u32> {
        self.get("Id").and_then(|s| s.parse().ok())
    }

    /// Title if tagged, otherwise the file name
    pub fn display_title(&self) -> &str {
        self.title()
            .unwrap_or_else(|| self.file().rsplit('/').next().unwrap_or_default())
    }
}

/// One row of a `lsinfo` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LibraryEntry {
    Directory { path: String },
    File { song: Song },
    Playlist { path: String },
}

impl LibraryEntry {
    pub fn list_from_pairs(pairs: Vec<(String, String)>) -> Vec<LibraryEntry> {
        let mut entries = Vec::new();
        let mut song: Option<Vec<(String, String)>> = None;
        for (key, value) in pairs {
            match key.as_str() {
                "directory" | "playlist" | "file" => {
                    if let Some(attrs) = song.take() {
                        entries.push(LibraryEntry::File {
                            song: Song::from_pairs(attrs),
                        });
                    }
                    match key.as_str() {
                        "directory" => entries.push(LibraryEntry::Directory { path: value }),
                        "playlist" => entries.push(LibraryEntry::Playlist { path: value }),
                        _ => song = Some(vec![(key, value)]),
                    }
                }
                _ => {
                    // Attributes of the preceding song; directory and playlist
                    // modification times are dropped.
                    if let Some(attrs) = song.as_mut() {
                        attrs.push((key, value));
                    }
                }
            }
        }
        if let Some(attrs) = song {
            entries.push(LibraryEntry::File {
                song: Song::from_pairs(attrs),
            });
        }
        entries
    }

    /// Full path of the entry relative to the music directory
    pub fn path(&self) -> &str {
        match self {
            LibraryEntry::Directory { path } | LibraryEntry::Playlist { path } => path,
            LibraryEntry::File { song } => song.file(),
        }
    }

    /// Last path component
    pub fn name(&self) -> &str {
        self.path().rsplit('/').next().unwrap_or_default()
    }
}
