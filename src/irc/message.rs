/// IRC message parsing, serialization, and send-time sanitization.
///
/// Implements the RFC 2812 message shape:
///   [`:`prefix SPACE] command [SPACE params] [SPACE `:` trailing]
///
/// Positional parameters and the trailing body are kept apart, so a body
/// never gets confused with the last positional parameter. Messages are
/// terminated by CR-LF (`\r\n`) on the wire, but parsing operates on the
/// content without the terminator.
use std::fmt;

use super::codec::TextEncoding;
use super::prefix::Prefix;

/// Longest serialized line (CR-LF excluded) we are willing to transmit.
pub const MAX_MESSAGE_BYTES: usize = 512;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional source (`nick!user@host` or a server name).
    pub sender: Option<Prefix>,
    /// The command (e.g. `PRIVMSG`, `001`, `NICK`).
    pub command: String,
    /// Positional parameters. None of them contain spaces.
    pub params: Vec<String>,
    /// The trailing parameter, which may contain spaces.
    pub body: Option<String>,
    /// The raw line, kept only when part of it could not be parsed.
    pub raw: Option<String>,
}

/// Errors that can occur during message parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
    #[error("invalid command {0:?}")]
    InvalidCommand(String),
}

/// An outgoing message rejected at the send boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanitizeError {
    #[error("possible injection in {field}: {reason}")]
    Injection {
        field: &'static str,
        reason: &'static str,
    },
    #[error("message is {len} bytes, limit is {MAX_MESSAGE_BYTES}")]
    ExcessiveLength { len: usize },
}

impl Message {
    /// Build a message with positional parameters and no body.
    pub fn new<I, S>(command: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sender: None,
            command: command.into(),
            params: params.into_iter().map(Into::into).collect(),
            body: None,
            raw: None,
        }
    }

    /// Set the trailing body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the sender prefix.
    pub fn with_sender(mut self, sender: Prefix) -> Self {
        self.sender = Some(sender);
        self
    }

    /// `PRIVMSG target :text`
    pub fn privmsg(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new("PRIVMSG", [target.into()]).with_body(text)
    }

    /// `PONG :token`, answering a `PING`.
    pub fn pong(token: impl Into<String>) -> Self {
        Self::new("PONG", std::iter::empty::<String>()).with_body(token)
    }

    /// Parse a single IRC message from a line (without the trailing `\r\n`).
    ///
    /// A sender prefix that fails to parse does not fail the whole line: the
    /// message keeps `sender: None` and records the line in `raw`.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches("\r\n");

        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = if let Some(stripped) = input.strip_prefix(':') {
            // Prefix runs until the first space.
            match stripped.find(' ') {
                Some(idx) => (Some(&stripped[..idx]), stripped[idx + 1..].trim_start_matches(' ')),
                None => return Err(ParseError::MissingCommand),
            }
        } else {
            (None, input)
        };

        // Split into command and parameter portion.
        let (command, param_str) = match rest.find(' ') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }
        if !is_valid_command(command) {
            return Err(ParseError::InvalidCommand(command.to_owned()));
        }

        let mut params = Vec::new();
        let mut body = None;

        if let Some(mut remaining) = param_str {
            loop {
                remaining = remaining.trim_start_matches(' ');
                if remaining.is_empty() {
                    break;
                }
                if let Some(trailing) = remaining.strip_prefix(':') {
                    // Trailing parameter: everything after the colon, including spaces.
                    body = Some(trailing.to_owned());
                    break;
                }
                match remaining.find(' ') {
                    Some(idx) => {
                        params.push(remaining[..idx].to_owned());
                        remaining = &remaining[idx + 1..];
                    }
                    None => {
                        params.push(remaining.to_owned());
                        break;
                    }
                }
            }
        }

        let (sender, raw) = match prefix.map(Prefix::parse) {
            None => (None, None),
            Some(Ok(sender)) => (Some(sender), None),
            Some(Err(_)) => (None, Some(input.to_owned())),
        };

        Ok(Message {
            sender,
            command: command.to_owned(),
            params,
            body,
            raw,
        })
    }

    /// Serialize to the IRC wire format (without trailing `\r\n`).
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if let Some(ref sender) = self.sender {
            out.push(':');
            out.push_str(&sender.to_wire());
            out.push(' ');
        }

        out.push_str(&self.command);

        for param in &self.params {
            out.push(' ');
            out.push_str(param);
        }

        if let Some(ref body) = self.body {
            out.push_str(" :");
            out.push_str(body);
        }

        out
    }

    /// Nick of the sender, if there is one.
    pub fn sender_nick(&self) -> Option<&str> {
        self.sender.as_ref().map(|s| s.nick.as_str())
    }

    /// Check that the message is safe to put on the wire.
    ///
    /// Called by the writer immediately before transmission. The length is
    /// measured on the serialized line in `encoding`, CR-LF excluded.
    pub fn sanitize(&self, encoding: TextEncoding) -> Result<(), SanitizeError> {
        if has_control(&self.command) {
            return Err(injection("command", "control character"));
        }
        if let Some(ref sender) = self.sender {
            let parts = [Some(&sender.nick), sender.user.as_ref(), sender.host.as_ref()];
            if parts.into_iter().flatten().any(|p| has_control(p) || p.contains(' ')) {
                return Err(injection("sender", "control character or space"));
            }
        }
        for param in &self.params {
            if has_control(param) {
                return Err(injection("param", "control character"));
            }
            if param.is_empty() {
                return Err(injection("param", "empty positional parameter"));
            }
            if param.contains(' ') {
                return Err(injection("param", "space in positional parameter"));
            }
            if param.starts_with(':') {
                return Err(injection("param", "positional parameter starts with ':'"));
            }
        }
        if let Some(ref body) = self.body {
            if has_control(body) {
                return Err(injection("body", "control character"));
            }
        }

        let len = encoding.encode(&self.to_wire()).len();
        if len > MAX_MESSAGE_BYTES {
            return Err(SanitizeError::ExcessiveLength { len });
        }
        Ok(())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

/// Alphabetic token, or exactly three digits.
fn is_valid_command(command: &str) -> bool {
    command.bytes().all(|b| b.is_ascii_alphabetic())
        || (command.len() == 3 && command.bytes().all(|b| b.is_ascii_digit()))
}

/// C0 control characters (U+0000 through U+001F).
fn has_control(s: &str) -> bool {
    s.chars().any(|c| c <= '\u{1f}')
}

fn injection(field: &'static str, reason: &'static str) -> SanitizeError {
    SanitizeError::Injection { field, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── Parsing basics ───────────────────────────────────────────

    #[test]
    fn parse_simple_command() {
        let msg = Message::parse("QUIT").unwrap();
        assert_eq!(msg.sender, None);
        assert_eq!(msg.command, "QUIT");
        assert_eq!(msg.params, Vec::<String>::new());
        assert_eq!(msg.body, None);
    }

    #[test]
    fn parse_privmsg_with_full_sender() {
        let msg = Message::parse(":nick!user@host PRIVMSG #chan :hello world").unwrap();
        let sender = msg.sender.as_ref().unwrap();
        assert_eq!(sender.nick, "nick");
        assert_eq!(sender.identity().as_deref(), Some("user@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan"]);
        assert_eq!(msg.body.as_deref(), Some("hello world"));
        assert_eq!(msg.raw, None);
    }

    #[test]
    fn parse_numeric_reply() {
        let msg = Message::parse(":irc.example.net 433 * bot :Nickname is already in use").unwrap();
        assert_eq!(msg.sender_nick(), Some("irc.example.net"));
        assert_eq!(msg.command, "433");
        assert_eq!(msg.params, vec!["*", "bot"]);
        assert_eq!(msg.body.as_deref(), Some("Nickname is already in use"));
    }

    #[test]
    fn parse_user_command() {
        let msg = Message::parse("USER bot * * :Lagoon Bot").unwrap();
        assert_eq!(msg.params, vec!["bot", "*", "*"]);
        assert_eq!(msg.body.as_deref(), Some("Lagoon Bot"));
    }

    #[test]
    fn parse_strips_crlf() {
        let msg = Message::parse("PING :server\r\n").unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.body.as_deref(), Some("server"));
    }

    #[test]
    fn parse_lowercase_command() {
        let msg = Message::parse("privmsg #chan :hi").unwrap();
        assert_eq!(msg.command, "privmsg");
    }

    // ── Parsing edge cases ───────────────────────────────────────

    #[test]
    fn parse_colon_inside_middle_param_is_not_a_body() {
        let msg = Message::parse("MODE #chan +b *!*@host:1").unwrap();
        assert_eq!(msg.params, vec!["#chan", "+b", "*!*@host:1"]);
        assert_eq!(msg.body, None);
    }

    #[test]
    fn parse_trailing_empty_string() {
        let msg = Message::parse("TOPIC #lagoon :").unwrap();
        assert_eq!(msg.params, vec!["#lagoon"]);
        assert_eq!(msg.body.as_deref(), Some(""));
    }

    #[test]
    fn parse_trailing_starts_with_colon() {
        let msg = Message::parse("PRIVMSG #lagoon ::)").unwrap();
        assert_eq!(msg.body.as_deref(), Some(":)"));
    }

    #[test]
    fn parse_collapses_repeated_spaces() {
        let msg = Message::parse(":srv  MODE   #chan  +o   nick").unwrap();
        assert_eq!(msg.command, "MODE");
        assert_eq!(msg.params, vec!["#chan", "+o", "nick"]);
    }

    #[test]
    fn no_trailing_means_no_body_even_with_params() {
        let msg = Message::parse("JOIN #lagoon").unwrap();
        assert_eq!(msg.params, vec!["#lagoon"]);
        assert_eq!(msg.body, None);
    }

    #[test]
    fn no_trailing_and_no_params_means_no_body() {
        let msg = Message::parse("AWAY").unwrap();
        assert!(msg.params.is_empty());
        assert_eq!(msg.body, None);
    }

    #[test]
    fn bad_sender_keeps_raw_line() {
        let line = ":!user@host PRIVMSG #chan :hi";
        let msg = Message::parse(line).unwrap();
        assert_eq!(msg.sender, None);
        assert_eq!(msg.raw.as_deref(), Some(line));
        assert_eq!(msg.command, "PRIVMSG");
    }

    // ── Parse errors ─────────────────────────────────────────────

    #[test]
    fn parse_empty_input() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
    }

    #[test]
    fn parse_prefix_only() {
        assert_eq!(Message::parse(":prefix_only"), Err(ParseError::MissingCommand));
    }

    #[test]
    fn parse_rejects_two_digit_numeric() {
        assert_eq!(
            Message::parse(":srv 01 bot :hi"),
            Err(ParseError::InvalidCommand("01".into()))
        );
    }

    #[test]
    fn parse_rejects_mixed_command() {
        assert_eq!(
            Message::parse("PRIV1MSG x"),
            Err(ParseError::InvalidCommand("PRIV1MSG".into()))
        );
    }

    // ── Serialization ────────────────────────────────────────────

    #[test]
    fn serialize_with_trailing() {
        let msg = Message::privmsg("#lagoon", "Hello everyone!");
        assert_eq!(msg.to_wire(), "PRIVMSG #lagoon :Hello everyone!");
    }

    #[test]
    fn serialize_without_body_keeps_params_bare() {
        let msg = Message::new("JOIN", ["#lagoon"]);
        assert_eq!(msg.to_wire(), "JOIN #lagoon");
    }

    #[test]
    fn serialize_with_sender() {
        let msg = Message::privmsg("#lagoon", "hey")
            .with_sender(Prefix::parse("wings!user@host").unwrap());
        assert_eq!(msg.to_wire(), ":wings!user@host PRIVMSG #lagoon :hey");
    }

    // ── Roundtrip ────────────────────────────────────────────────

    #[test]
    fn roundtrip_preserves_params_and_body() {
        for input in [
            ":wings!user@host PRIVMSG #lagoon :Hello everyone!",
            ":irc.example.net 001 bot :Welcome to the network",
            "MODE #lagoon +o wings",
            "USER bot * * :Lagoon Bot",
            "TOPIC #lagoon :",
        ] {
            let msg = Message::parse(input).unwrap();
            assert_eq!(msg.to_wire(), input);
            assert_eq!(Message::parse(&msg.to_wire()).unwrap(), msg);
        }
    }

    #[test]
    fn roundtrip_constructed_messages() {
        let sender = Prefix::parse("wings!user@lagun.co").unwrap();
        let cases = [
            Message::privmsg("#lagoon", "hello"),
            Message::privmsg("#lagoon", "hello").with_sender(sender.clone()),
            Message::new("MODE", ["#lagoon", "+ov", "wings", "bot"]).with_sender(sender.clone()),
            Message::new("MODE", ["#lagoon", "+o", "wings"]).with_body("and a body"),
            Message::new("TOPIC", ["#lagoon"]).with_body(""),
            Message::new("PART", ["#lagoon"]),
            Message::new("QUIT", std::iter::empty::<String>()),
            Message::privmsg("#lagoon", "time: 12:30 :) ok"),
            Message::privmsg("#lagoon", ":leading colon"),
            Message::privmsg("#lagoon", "  spaced  out  "),
            Message::new("PRIVMSG", ["a:b"]).with_body("x"),
            Message::pong("irc.example.net"),
            Message::new("001", ["bot"])
                .with_body("Welcome")
                .with_sender(Prefix::nick("irc.example.net")),
        ];
        for msg in cases {
            assert_eq!(Message::parse(&msg.to_wire()), Ok(msg.clone()), "{}", msg.to_wire());
        }
    }

    // ── Sanitize ─────────────────────────────────────────────────

    #[test]
    fn sanitize_rejects_nul_in_body() {
        let msg = Message::privmsg("#chan", "evil\x00QUIT");
        assert_eq!(
            msg.sanitize(TextEncoding::Utf8),
            Err(SanitizeError::Injection {
                field: "body",
                reason: "control character"
            })
        );
        let clean = Message::privmsg("#chan", "evilQUIT");
        assert_eq!(clean.sanitize(TextEncoding::Utf8), Ok(()));
    }

    #[test]
    fn sanitize_rejects_crlf_in_param() {
        let msg = Message::new("JOIN", ["#chan\r\nQUIT"]);
        assert!(matches!(
            msg.sanitize(TextEncoding::Utf8),
            Err(SanitizeError::Injection { field: "param", .. })
        ));
    }

    #[test]
    fn sanitize_rejects_params_that_change_line_shape() {
        for param in ["", "two words", ":body"] {
            let msg = Message::new("JOIN", [param]);
            assert!(
                matches!(
                    msg.sanitize(TextEncoding::Utf8),
                    Err(SanitizeError::Injection { field: "param", .. })
                ),
                "{param:?} should be rejected"
            );
        }
    }

    #[test]
    fn sanitize_length_boundary() {
        // "PRIVMSG #c :" is 12 bytes.
        let exact = Message::privmsg("#c", "a".repeat(MAX_MESSAGE_BYTES - 12));
        assert_eq!(exact.to_wire().len(), MAX_MESSAGE_BYTES);
        assert_eq!(exact.sanitize(TextEncoding::Utf8), Ok(()));

        let over = Message::privmsg("#c", "a".repeat(MAX_MESSAGE_BYTES - 11));
        assert_eq!(
            over.sanitize(TextEncoding::Utf8),
            Err(SanitizeError::ExcessiveLength {
                len: MAX_MESSAGE_BYTES + 1
            })
        );
    }

    #[test]
    fn sanitize_counts_encoded_bytes_not_chars() {
        // 250 two-byte chars = 500 bytes in UTF-8, 250 bytes in Latin-1.
        let msg = Message::privmsg("#c", "é".repeat(250));
        assert_eq!(msg.sanitize(TextEncoding::Utf8), Ok(()));
        let long = Message::privmsg("#c", "é".repeat(251));
        assert_eq!(
            long.sanitize(TextEncoding::Utf8),
            Err(SanitizeError::ExcessiveLength { len: 514 })
        );
        assert_eq!(long.sanitize(TextEncoding::Latin1), Ok(()));
    }

    #[test]
    fn sanitize_allows_irc_safe_text() {
        let msg = Message::privmsg("#chan", "unicode ✓ and :colons: are fine");
        assert_eq!(msg.sanitize(TextEncoding::Utf8), Ok(()));
    }

    #[test]
    fn sanitize_rejects_tab_in_body() {
        let msg = Message::privmsg("#chan", "a\tb");
        assert_eq!(
            msg.sanitize(TextEncoding::Utf8),
            Err(SanitizeError::Injection {
                field: "body",
                reason: "control character"
            })
        );
    }
}
