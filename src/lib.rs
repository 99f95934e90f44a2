pub mod config;
pub mod irc;
pub mod plugin;
pub mod plugins;
pub mod reload;
