//! Keeps the connection alive by answering server `PING`s.

use async_trait::async_trait;

use crate::irc::message::Message;
use crate::plugin::{Plugin, PluginContext, PluginError, PluginSeed, Reaction};

pub struct Pong;

pub fn construct(_seed: PluginSeed) -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(Pong))
}

#[async_trait]
impl Plugin for Pong {
    async fn react(&mut self, msg: &Message, ctx: &mut PluginContext) -> Result<Reaction, PluginError> {
        if msg.command != "PING" {
            return Ok(Reaction::Continue);
        }
        let token = msg.body.as_ref().or(msg.params.first()).cloned();
        ctx.client().send(Message::pong(token.unwrap_or_default()))?;
        Ok(Reaction::Halt)
    }
}
