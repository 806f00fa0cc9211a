// Codec for the MPD text protocol
// Handles the greeting line, `key: value` responses terminated by `OK`,
// and `ACK [code@index] {command} message` error lines.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::commands::{Command, CommandList};
use crate::error::{AckError, MpdError};
use crate::utils::{parse_ack, parse_greeting, split_pair};

/// A decoded unit read from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `OK MPD <version>`, sent once right after connecting.
    Greeting(String),
    /// All `key: value` pairs of a successful response, in order.
    Ok(Vec<(String, String)>),
    Ack(AckError),
}

pub struct MpdCodec {
    // Current parsing state
    state: MpdCodecState,
}

enum MpdCodecState {
    // Waiting for the server greeting
    AwaitingGreeting,
    // Collecting pairs until OK or ACK
    ReadingResponse { pairs: Vec<(String, String)> },
}

impl Default for MpdCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MpdCodec {
    pub fn new() -> Self {
        Self {
            state: MpdCodecState::AwaitingGreeting,
        }
    }

    /// A codec for a stream whose greeting has already been consumed.
    pub fn greeted() -> Self {
        Self {
            state: MpdCodecState::ReadingResponse { pairs: Vec::new() },
        }
    }
}

impl Decoder for MpdCodec {
    type Item = Frame;
    type Error = MpdError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Not enough data for a full line
            let Some(newline_pos) = buf.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };

            let raw = buf.split_to(newline_pos + 1);
            let line = std::str::from_utf8(&raw[..newline_pos]).map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid UTF-8 in response line")
            })?;
            trace!(line, "<< server");

            match &mut self.state {
                MpdCodecState::AwaitingGreeting => {
                    let version = parse_greeting(line)?;
                    self.state = MpdCodecState::ReadingResponse { pairs: Vec::new() };
                    return Ok(Some(Frame::Greeting(version)));
                }

                MpdCodecState::ReadingResponse { pairs } => {
                    if line == "OK" {
                        return Ok(Some(Frame::Ok(std::mem::take(pairs))));
                    }
                    if line.starts_with("ACK ") {
                        // Anything collected before the error belongs to the failed request
                        pairs.clear();
                        return Ok(Some(Frame::Ack(parse_ack(line)?)));
                    }
                    if line == "list_OK" {
                        // Sub-response separator of command_list_ok_begin
                        continue;
                    }
                    pairs.push(split_pair(line)?);
                }
            }
        }
    }
}

impl Encoder<Command> for MpdCodec {
    type Error = MpdError;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace!(command = command.name(), ">> server");
        let line = command.to_line();
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

impl Encoder<CommandList> for MpdCodec {
    type Error = MpdError;

    fn encode(&mut self, list: CommandList, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace!(commands = list.len(), ">> server (command list)");
        dst.put_slice(b"command_list_begin\n");
        for command in list.commands() {
            dst.put_slice(command.to_line().as_bytes());
            dst.put_u8(b'\n');
        }
        dst.put_slice(b"command_list_end\n");
        Ok(())
    }
}
