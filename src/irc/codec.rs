/// IRC line codec: frames a byte stream into IRC lines.
///
/// Splits on `\r\n` (per RFC 2812) and decodes each line with the configured
/// text encoding. Parsing into a [`Message`] happens one layer up, so a
/// malformed line costs only that line and never ends the stream.
///
/// Oversized lines (> 8191 bytes) are skipped rather than killing the
/// connection.
use std::borrow::Cow;

use bytes::{Buf, BufMut, BytesMut};
use serde::Deserialize;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use super::message::Message;

/// Maximum inbound line length (excluding `\r\n`).
/// RFC 2812 says 512 bytes. IRCv3 `message-tags` can push this to 8191.
const MAX_LINE_LENGTH: usize = 8191;

/// Text encoding used on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8", alias = "UTF-8")]
    Utf8,
    #[serde(rename = "latin-1", alias = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl TextEncoding {
    /// Encode text for the wire. Latin-1 replaces unrepresentable chars with `?`.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        match self {
            Self::Utf8 => Cow::Borrowed(text.as_bytes()),
            Self::Latin1 => {
                let mut replaced = 0usize;
                let bytes = text
                    .chars()
                    .map(|c| {
                        u8::try_from(u32::from(c)).unwrap_or_else(|_| {
                            replaced += 1;
                            b'?'
                        })
                    })
                    .collect();
                if replaced > 0 {
                    debug!(replaced, line = %text, "codec: characters not representable in Latin-1 sent as '?'");
                }
                Cow::Owned(bytes)
            }
        }
    }

    /// Decode a line from the wire. Invalid UTF-8 is replaced, not rejected.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => match std::str::from_utf8(bytes) {
                Ok(s) => s.to_owned(),
                Err(e) => {
                    warn!(error = %e, "codec: invalid UTF-8 in line, decoding lossily");
                    String::from_utf8_lossy(bytes).into_owned()
                }
            },
            Self::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// Codec error. Framing itself never fails; only the underlying I/O can.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames IRC lines on `\r\n` boundaries.
///
/// Oversized lines are skipped (logged + discarded) instead of returning
/// a fatal error.
#[derive(Debug, Default)]
pub struct IrcCodec {
    encoding: TextEncoding,
    /// True when we're discarding an oversized line and waiting for `\r\n`.
    skipping: bool,
}

impl IrcCodec {
    pub fn new(encoding: TextEncoding) -> Self {
        Self {
            encoding,
            skipping: false,
        }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }
}

impl Decoder for IrcCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // If we're in skip mode (discarding an oversized line that didn't
        // have its \r\n terminator yet), scan for the terminator.
        if self.skipping {
            if let Some(pos) = src.windows(2).position(|w| w == b"\r\n") {
                let discarded = pos + 2;
                warn!(bytes = discarded, "codec: finished skipping oversized line tail");
                src.advance(discarded);
                self.skipping = false;
            } else {
                // Keep a possible trailing '\r' so a split "\r\n" is still seen.
                let keep = usize::from(src.last() == Some(&b'\r'));
                src.advance(src.len() - keep);
                return Ok(None);
            }
        }

        let crlf_pos = src.windows(2).position(|w| w == b"\r\n");

        match crlf_pos {
            Some(pos) if pos > MAX_LINE_LENGTH => {
                warn!(bytes = pos, "codec: skipped oversized IRC line ({pos} bytes)");
                src.advance(pos + 2);
                self.decode(src)
            }
            Some(pos) => {
                let line_bytes = src.split_to(pos);
                src.advance(2); // skip \r\n
                Ok(Some(self.encoding.decode(&line_bytes)))
            }
            None => {
                // No complete line yet. Check if buffer is getting too large.
                if src.len() > MAX_LINE_LENGTH + 1 {
                    let discarded = src.len();
                    warn!(
                        bytes = discarded,
                        "codec: discarding oversized partial line, waiting for terminator"
                    );
                    let keep = usize::from(src.last() == Some(&b'\r'));
                    src.advance(discarded - keep);
                    self.skipping = true;
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if !src.is_empty() {
            warn!(bytes = src.len(), "codec: discarding unterminated line at end of input");
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        let bytes = self.encoding.encode(&wire);
        dst.reserve(bytes.len() + 2);
        dst.put_slice(&bytes);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
