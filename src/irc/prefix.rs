/// Message source prefix: `nick[!user][@host]`.
///
/// The nick is mutable and trivially spoofed, so authorization decisions
/// key on [`Prefix::identity`] (`user@host`) instead.
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrefixError {
    #[error("empty prefix")]
    Empty,
    #[error("prefix has no nick: {0:?}")]
    MissingNick(String),
    #[error("prefix has an empty user or host: {0:?}")]
    EmptyPart(String),
}

impl Prefix {
    /// A bare nick (or server name) with no user or host.
    pub fn nick(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            user: None,
            host: None,
        }
    }

    /// Parse a prefix. The leading `:` is optional.
    pub fn parse(input: &str) -> Result<Self, PrefixError> {
        let s = input.strip_prefix(':').unwrap_or(input);
        if s.is_empty() {
            return Err(PrefixError::Empty);
        }

        let (nick, user, host) = match s.split_once('!') {
            Some((nick, rest)) => match rest.split_once('@') {
                Some((user, host)) => (nick, Some(user), Some(host)),
                None => (nick, Some(rest), None),
            },
            None => match s.split_once('@') {
                Some((nick, host)) => (nick, None, Some(host)),
                None => (s, None, None),
            },
        };

        if nick.is_empty() {
            return Err(PrefixError::MissingNick(input.to_owned()));
        }
        if user.is_some_and(str::is_empty) || host.is_some_and(str::is_empty) {
            return Err(PrefixError::EmptyPart(input.to_owned()));
        }

        Ok(Self {
            nick: nick.to_owned(),
            user: user.map(str::to_owned),
            host: host.map(str::to_owned),
        })
    }

    /// `user@host`, when both are known.
    pub fn identity(&self) -> Option<String> {
        match (&self.user, &self.host) {
            (Some(user), Some(host)) => Some(format!("{user}@{host}")),
            _ => None,
        }
    }

    /// Wire form without the leading `:`.
    ///
    /// Only a full `nick!user@host` round-trips; a partial suffix is dropped.
    pub fn to_wire(&self) -> String {
        match (&self.user, &self.host) {
            (Some(user), Some(host)) => format!("{}!{user}@{host}", self.nick),
            _ => self.nick.clone(),
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}
