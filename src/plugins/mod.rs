//! Plugins shipped with the bot. See `Registry::builtin`.

pub mod channels;
pub mod commandline;
pub mod pong;
