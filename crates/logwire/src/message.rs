//! Wire messages exchanged with the controller.
//!
//! Both id namespaces mirror the controller's tables and must stay in sync
//! with it. Integers are big-endian; strings are u32-length-prefixed UTF-8.

use crate::error::{RelayError, RelayResult};
use crate::record::Severity;

/// Upper bound on a single frame. Log text is cut down to fit before it
/// is queued ([`truncate_message`]); anything larger is rejected on read
/// and discarded on write.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Length prefix preceding every frame on the stream.
pub const FRAME_HEADER_LEN: usize = 4;

/// Encoded overhead of a `Log` frame: id tag, severity, text length prefix.
const LOG_FRAME_OVERHEAD: usize = 10;

/// Longest message text whose `Log` frame still fits in [`MAX_FRAME_LEN`].
pub const MAX_MESSAGE_LEN: usize = MAX_FRAME_LEN - LOG_FRAME_OVERHEAD;

/// Appended in place of text removed by [`truncate_message`].
pub const TRUNCATION_MARKER: &str = " [truncated]";

/// Client-to-server message identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ClientMessageId {
    /// Announces this client to the controller after connecting.
    Announce = 1,
    /// Carries one log record.
    Log = 2,
}

/// Server-to-client message identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ServerMessageId {
    /// Free-form notice from the controller.
    Notice = 1,
}

/// Messages this client sends to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Identifies the sender; carries no payload.
    Announce,
    /// One log record: severity followed by the message text.
    Log { severity: Severity, message: String },
}

/// Messages the controller sends back.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Free-form notice, logged locally.
    Notice { text: String },
}

impl ClientMessage {
    /// Identifier tag for this message.
    pub fn id(&self) -> ClientMessageId {
        match self {
            ClientMessage::Announce => ClientMessageId::Announce,
            ClientMessage::Log { .. } => ClientMessageId::Log,
        }
    }

    /// True for frames carrying a log record, as opposed to control
    /// traffic like `Announce`.
    pub fn is_log(&self) -> bool {
        matches!(self, ClientMessage::Log { .. })
    }

    /// Encodes the message as an id tag followed by its payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u16(&mut buf, self.id() as u16);
        if let ClientMessage::Log { severity, message } = self {
            put_i32(&mut buf, severity.as_wire());
            put_string(&mut buf, message);
        }
        buf
    }
}

impl ServerMessage {
    /// Decodes one frame. Unknown ids, truncation, invalid UTF-8 and
    /// trailing bytes are all rejected.
    pub fn decode(frame: &[u8]) -> RelayResult<Self> {
        let mut reader = Reader::new(frame);
        let id = reader.take_u16()?;
        match id {
            id if id == ServerMessageId::Notice as u16 => {
                let text = reader.take_string()?;
                reader.finish()?;
                Ok(ServerMessage::Notice { text })
            }
            other => Err(RelayError::Decode(format!(
                "unknown server message id {other}"
            ))),
        }
    }
}

/// Cuts message text down so its `Log` frame fits in [`MAX_FRAME_LEN`],
/// marking the cut. Text already within bounds passes through unchanged.
/// The cut backs up to a char boundary, keeping the result valid UTF-8.
pub fn truncate_message(mut message: String) -> String {
    if message.len() <= MAX_MESSAGE_LEN {
        return message;
    }
    let mut cut = MAX_MESSAGE_LEN - TRUNCATION_MARKER.len();
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message.truncate(cut);
    message.push_str(TRUNCATION_MARKER);
    message
}

/// Decodes a frame length prefix, rejecting lengths above
/// [`MAX_FRAME_LEN`] before anything is allocated.
pub fn decode_frame_len(header: [u8; FRAME_HEADER_LEN]) -> RelayResult<usize> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(RelayError::FrameTooLarge(len));
    }
    Ok(len)
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_string(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

/// Cursor over a received frame.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> RelayResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| RelayError::Decode("frame truncated".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u16(&mut self) -> RelayResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take_u32(&mut self) -> RelayResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_string(&mut self) -> RelayResult<String> {
        let len = self.take_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| RelayError::Decode("string is not valid UTF-8".to_string()))
    }

    fn finish(&self) -> RelayResult<()> {
        let trailing = self.buf.len() - self.pos;
        if trailing == 0 {
            Ok(())
        } else {
            Err(RelayError::Decode(format!("{trailing} trailing bytes")))
        }
    }
}
