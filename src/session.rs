use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Encoder, Framed};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{Frame, MpdCodec};
use crate::commands::{Command, CommandList};
use crate::events::Subsystem;
use crate::models::{LibraryEntry, PlayerState, Song, StatusSnapshot};
use crate::settings::ConnectorConfig;
use crate::utils::mpd_parse;
use crate::MpdError;

/// How `Session::save_queue` writes into a stored playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveMode {
    /// Replace the playlist with the whole queue (creating it if needed)
    Replace,
    /// Append the whole queue to the playlist
    Append,
    /// Append only the songs at these queue positions
    Selection(Vec<usize>),
    /// Replace the playlist with the songs at these queue positions
    ReplaceWithSelection(Vec<usize>),
}

/// An established, authenticated protocol session.
///
/// Only reachable through the connector's command gateway. Any transport
/// failure marks the session broken; the connector then discards it and
/// reconnects.
pub struct Session {
    framed: Framed<TcpStream, MpdCodec>,
    version: String,
    io_timeout: Duration,
    closed: CancellationToken,
    broken: bool,
    // A request went out and its full response has not been read yet
    awaiting_response: bool,
}

impl Session {
    /// Opens the TCP connection, reads the greeting and authenticates.
    pub(crate) async fn connect(
        config: &ConnectorConfig,
        closed: CancellationToken,
    ) -> Result<Self, MpdError> {
        let address = config.address();
        debug!(%address, "Opening connection");
        let host = config.host.trim_start_matches('[').trim_end_matches(']');
        let stream = timeout(config.io_timeout, TcpStream::connect((host, config.port)))
            .await
            .map_err(|_| MpdError::Timeout)??;
        stream.set_nodelay(true)?;

        let mut session = Session {
            framed: Framed::new(stream, MpdCodec::new()),
            version: String::new(),
            io_timeout: config.io_timeout,
            closed,
            broken: false,
            awaiting_response: false,
        };

        match session.read_frame(Some(config.io_timeout)).await? {
            Frame::Greeting(version) => session.version = version,
            other => {
                return Err(MpdError::InvalidResponse(format!(
                    "Expected greeting, got {:?}",
                    other
                )))
            }
        }
        info!(%address, version = %session.version, "Connected to MPD");

        if let Some(password) = &config.password {
            session.execute(Command::Password(password.clone())).await?;
            debug!("Authenticated.");
        }
        Ok(session)
    }

    /// Protocol version announced in the server greeting
    pub fn protocol_version(&self) -> &str {
        &self.version
    }

    /// True once a transport failure has been seen on this session.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// True when a response is still owed by the server, i.e. a command
    /// future was dropped mid-exchange. The stream can no longer be framed.
    pub fn is_desynchronized(&self) -> bool {
        self.broken || self.awaiting_response
    }

    fn check_usable(&self) -> Result<(), MpdError> {
        if self.broken || self.closed.is_cancelled() {
            return Err(MpdError::ConnectionClosed);
        }
        Ok(())
    }

    fn mark_broken(&mut self, error: &MpdError) {
        if !self.broken {
            warn!(error = %error, "Session transport failed");
            self.broken = true;
        }
    }

    /// Starts a request/response exchange. Refuses to start when the previous
    /// exchange was abandoned before its response was read.
    fn begin_exchange(&mut self) -> Result<(), MpdError> {
        self.check_usable()?;
        if self.awaiting_response {
            let error =
                MpdError::InvalidResponse("Previous response was never read".to_string());
            self.mark_broken(&error);
            return Err(error);
        }
        self.awaiting_response = true;
        Ok(())
    }

    async fn send<I>(&mut self, item: I) -> Result<(), MpdError>
    where
        MpdCodec: Encoder<I, Error = MpdError>,
    {
        self.check_usable()?;
        let result = tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(MpdError::ConnectionClosed),
            sent = timeout(self.io_timeout, self.framed.send(item)) => {
                sent.map_err(|_| MpdError::Timeout).and_then(|r| r)
            }
        };
        if let Err(e) = &result {
            // A failed write leaves the stream in an unknown state
            self.mark_broken(e);
        }
        result
    }

    /// Reads the next frame. `deadline` of `None` waits indefinitely (idle).
    async fn read_frame(&mut self, deadline: Option<Duration>) -> Result<Frame, MpdError> {
        self.check_usable()?;
        let framed = &mut self.framed;
        let closed = &self.closed;
        let next = async move {
            match deadline {
                Some(limit) => timeout(limit, framed.next())
                    .await
                    .map_err(|_| MpdError::Timeout),
                None => Ok(framed.next().await),
            }
        };
        let result = tokio::select! {
            biased;
            _ = closed.cancelled() => Err(MpdError::ConnectionClosed),
            frame = next => match frame {
                Ok(Some(Ok(frame))) => Ok(frame),
                Ok(Some(Err(e))) => Err(e),
                Ok(None) => Err(MpdError::ConnectionClosed),
                Err(e) => Err(e),
            },
        };
        match &result {
            Ok(Frame::Ok(_)) | Ok(Frame::Ack(_)) => self.awaiting_response = false,
            Ok(Frame::Greeting(_)) => {}
            // Decoder errors desynchronise the stream just like I/O errors
            Err(e) => self.mark_broken(e),
        }
        result
    }

    async fn read_response(&mut self) -> Result<Vec<(String, String)>, MpdError> {
        match self.read_frame(Some(self.io_timeout)).await? {
            Frame::Ok(pairs) => Ok(pairs),
            Frame::Ack(ack) => {
                debug!(%ack, "Server rejected command");
                Err(MpdError::Ack(ack))
            }
            Frame::Greeting(_) => {
                self.broken = true;
                Err(MpdError::InvalidResponse("Unexpected greeting".to_string()))
            }
        }
    }

    /// Sends one command and returns the response pairs.
    pub async fn execute(&mut self, command: Command) -> Result<Vec<(String, String)>, MpdError> {
        debug!(command = command.name(), "Executing command");
        self.begin_exchange()?;
        self.send(command).await?;
        self.read_response().await
    }

    /// Sends a command list in one write. The server answers once for the
    /// whole list, or with an `ACK` naming the failing command's index.
    pub async fn execute_list(
        &mut self,
        list: CommandList,
    ) -> Result<Vec<(String, String)>, MpdError> {
        if list.is_empty() {
            return Ok(Vec::new());
        }
        debug!(commands = list.len(), "Executing command list");
        self.begin_exchange()?;
        self.send(list).await?;
        self.read_response().await
    }

    /// Enters `idle` until one of `subsystems` changes or `interrupted`
    /// resolves, in which case `noidle` is sent and the pending answer
    /// collected. Returns the changed subsystems, empty for an interrupted
    /// wait with no change.
    pub(crate) async fn idle<F>(
        &mut self,
        subsystems: &[Subsystem],
        interrupted: F,
    ) -> Result<Vec<Subsystem>, MpdError>
    where
        F: Future<Output = ()>,
    {
        self.begin_exchange()?;
        self.send(Command::Idle(subsystems.to_vec())).await?;
        tokio::pin!(interrupted);

        let frame = tokio::select! {
            frame = self.read_frame(None) => frame?,
            _ = &mut interrupted => {
                debug!("Leaving idle for a command");
                self.send(Command::NoIdle).await?;
                self.read_frame(Some(self.io_timeout)).await?
            }
        };

        match frame {
            Frame::Ok(pairs) => Ok(pairs
                .into_iter()
                .filter(|(key, _)| key == "changed")
                .filter_map(|(_, tag)| match tag.parse::<Subsystem>() {
                    Ok(subsystem) => Some(subsystem),
                    Err(_) => {
                        debug!(%tag, "Ignoring change of unwatched subsystem");
                        None
                    }
                })
                .collect()),
            Frame::Ack(ack) => Err(MpdError::Ack(ack)),
            Frame::Greeting(_) => {
                self.broken = true;
                Err(MpdError::InvalidResponse("Unexpected greeting".to_string()))
            }
        }
    }

    // --- Queries ---

    pub async fn ping(&mut self) -> Result<(), MpdError> {
        self.execute(Command::Ping).await.map(|_| ())
    }

    pub async fn status(&mut self) -> Result<StatusSnapshot, MpdError> {
        self.execute(Command::Status)
            .await
            .map(StatusSnapshot::from_pairs)
    }

    /// The current song, `None` when the queue is empty or playback stopped
    /// without a selected song.
    pub async fn current_song(&mut self) -> Result<Option<Song>, MpdError> {
        let pairs = self.execute(Command::CurrentSong).await?;
        if pairs.is_empty() {
            return Ok(None);
        }
        Ok(Some(Song::from_pairs(pairs)))
    }

    /// The whole queue, in order
    pub async fn queue(&mut self) -> Result<Vec<Song>, MpdError> {
        self.execute(Command::PlaylistInfo)
            .await
            .map(Song::list_from_pairs)
    }

    /// Directory listing of `path` in the library ("" for the root)
    pub async fn list_info(&mut self, path: &str) -> Result<Vec<LibraryEntry>, MpdError> {
        self.execute(Command::ListInfo(path.to_string()))
            .await
            .map(LibraryEntry::list_from_pairs)
    }

    /// Names of the stored playlists, in server order
    pub async fn list_playlists(&mut self) -> Result<Vec<String>, MpdError> {
        let pairs = self.execute(Command::ListPlaylists).await?;
        Ok(pairs
            .into_iter()
            .filter(|(key, _)| key == "playlist")
            .map(|(_, name)| name)
            .collect())
    }

    // --- Playback ---

    /// Starts playback, at queue position `pos` if given
    pub async fn play(&mut self, pos: Option<usize>) -> Result<(), MpdError> {
        self.execute(Command::Play(pos)).await.map(|_| ())
    }

    pub async fn pause(&mut self, paused: bool) -> Result<(), MpdError> {
        self.execute(Command::Pause(paused)).await.map(|_| ())
    }

    /// Pauses when playing, resumes when paused, starts otherwise.
    pub async fn toggle_playback(&mut self, current: PlayerState) -> Result<(), MpdError> {
        match current {
            PlayerState::Play => self.pause(true).await,
            PlayerState::Pause => self.pause(false).await,
            PlayerState::Stop | PlayerState::Unknown => self.play(None).await,
        }
    }

    pub async fn stop(&mut self) -> Result<(), MpdError> {
        self.execute(Command::Stop).await.map(|_| ())
    }

    pub async fn next(&mut self) -> Result<(), MpdError> {
        self.execute(Command::Next).await.map(|_| ())
    }

    pub async fn previous(&mut self) -> Result<(), MpdError> {
        self.execute(Command::Previous).await.map(|_| ())
    }

    /// Seeks within the current song to `secs`
    pub async fn seek_current(&mut self, secs: f64) -> Result<(), MpdError> {
        self.execute(Command::SeekCur(secs.max(0.0))).await.map(|_| ())
    }

    // --- Options ---

    pub async fn set_random(&mut self, on: bool) -> Result<(), MpdError> {
        self.execute(Command::Random(on)).await.map(|_| ())
    }

    pub async fn set_repeat(&mut self, on: bool) -> Result<(), MpdError> {
        self.execute(Command::Repeat(on)).await.map(|_| ())
    }

    pub async fn set_consume(&mut self, on: bool) -> Result<(), MpdError> {
        self.execute(Command::Consume(on)).await.map(|_| ())
    }

    // --- Queue ---

    pub async fn clear(&mut self) -> Result<(), MpdError> {
        self.execute(Command::Clear).await.map(|_| ())
    }

    pub async fn add(&mut self, uri: &str) -> Result<(), MpdError> {
        self.execute(Command::Add(uri.to_string())).await.map(|_| ())
    }

    /// Appends `uris` to the queue, clearing it first if `replace`, in one
    /// command list.
    pub async fn queue_uris(&mut self, replace: bool, uris: &[String]) -> Result<(), MpdError> {
        let mut list = CommandList::new();
        if replace {
            list.push(Command::Clear);
        }
        list.extend(uris.iter().cloned().map(Command::Add));
        self.execute_list(list).await.map(|_| ())
    }

    /// Appends a stored playlist to the queue, clearing it first if `replace`.
    pub async fn queue_playlist(&mut self, replace: bool, name: &str) -> Result<(), MpdError> {
        let mut list = CommandList::new();
        if replace {
            list.push(Command::Clear);
        }
        list.push(Command::Load(name.to_string()));
        self.execute_list(list).await.map(|_| ())
    }

    /// Removes the songs at `positions` from the queue. Deletion runs from
    /// the highest position down so earlier deletions don't shift later ones.
    pub async fn delete_positions(&mut self, positions: &[usize]) -> Result<(), MpdError> {
        let mut positions = positions.to_vec();
        positions.sort_unstable_by(|a, b| b.cmp(a));
        positions.dedup();
        let list: CommandList = positions.into_iter().map(Command::Delete).collect();
        self.execute_list(list).await.map(|_| ())
    }

    pub async fn shuffle(&mut self) -> Result<(), MpdError> {
        self.execute(Command::Shuffle).await.map(|_| ())
    }

    /// Reorders the queue by song attribute `attr` (a tag name such as
    /// "Artist", or "duration"). Songs without the attribute sort as empty
    /// (or 0 when `numeric`); the sort is stable.
    pub async fn sort_queue(
        &mut self,
        attr: &str,
        numeric: bool,
        descending: bool,
    ) -> Result<(), MpdError> {
        let mut songs = self.queue().await?;
        songs.sort_by(|a, b| {
            let (a, b) = (a.get(attr).unwrap_or_default(), b.get(attr).unwrap_or_default());
            let ordering = if numeric {
                mpd_parse::parse_float(a).total_cmp(&mpd_parse::parse_float(b))
            } else {
                a.cmp(b)
            };
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        let mut list = CommandList::new();
        for (to, song) in songs.iter().enumerate() {
            let id = song.id().ok_or_else(|| {
                MpdError::InvalidResponse(format!("Queue entry without Id: {}", song.file()))
            })?;
            list.push(Command::MoveId { id, to });
        }
        self.execute_list(list).await.map(|_| ())
    }

    // --- Stored playlists ---

    /// Writes the queue (or part of it) into stored playlist `name`.
    /// `exists` tells whether the playlist is already there, as replacing a
    /// missing playlist must not try to remove it first.
    pub async fn save_queue(
        &mut self,
        name: &str,
        exists: bool,
        mode: SaveMode,
    ) -> Result<(), MpdError> {
        let replace = matches!(mode, SaveMode::Replace | SaveMode::ReplaceWithSelection(_));
        let mut list = CommandList::new();
        if replace && exists {
            list.push(Command::Rm(name.to_string()));
        }

        let add = |song: &Song| Command::PlaylistAdd {
            name: name.to_string(),
            uri: song.file().to_string(),
        };
        match mode {
            SaveMode::Replace => {
                list.push(Command::Save(name.to_string()));
            }
            SaveMode::Append => {
                let songs = self.queue().await?;
                list.extend(songs.iter().map(add));
            }
            SaveMode::Selection(positions) | SaveMode::ReplaceWithSelection(positions) => {
                let songs = self.queue().await?;
                for pos in positions {
                    let song = songs.get(pos).ok_or_else(|| {
                        MpdError::InvalidResponse(format!("No song at queue position {}", pos))
                    })?;
                    list.push(add(song));
                }
            }
        }
        self.execute_list(list).await.map(|_| ())
    }

    pub async fn remove_playlist(&mut self, name: &str) -> Result<(), MpdError> {
        self.execute(Command::Rm(name.to_string())).await.map(|_| ())
    }

    pub async fn rename_playlist(&mut self, from: &str, to: &str) -> Result<(), MpdError> {
        self.execute(Command::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
        .await
        .map(|_| ())
    }

    // --- Library ---

    /// Starts a database update of `path` (everything for `None`) and
    /// returns the update job id.
    pub async fn update_library(&mut self, path: Option<&str>) -> Result<u32, MpdError> {
        let pairs = self.execute(Command::Update(path.map(str::to_string))).await?;
        pairs
            .into_iter()
            .find(|(key, _)| key == "updating_db")
            .map(|(_, id)| id.parse::<u32>().map_err(MpdError::from))
            .unwrap_or_else(|| {
                Err(MpdError::InvalidResponse(
                    "update did not return a job id".to_string(),
                ))
            })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("version", &self.version)
            .field("broken", &self.broken)
            .field("awaiting_response", &self.awaiting_response)
            .finish()
    }
}
