//! Admin console over private messages.
//!
//! Only `PRIVMSG`s addressed to the bot's current nick from the configured
//! admin identity are considered:
//!
//! - `.join #channel`
//! - `.part #channel`
//! - `.raw <irc line>` (still sanitized before it goes out)

use async_trait::async_trait;
use tracing::{debug, info};

use crate::irc::message::Message;
use crate::plugin::{CommandTable, Plugin, PluginContext, PluginError, PluginSeed, Reaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Join,
    Part,
    Raw,
}

pub struct Commandline {
    commands: CommandTable<Command>,
}

pub fn construct(seed: PluginSeed) -> Result<Box<dyn Plugin>, PluginError> {
    let mut commands = CommandTable::new();
    commands
        .register(r"^\.join +(##?[\w-]+)$", Command::Join)
        .and_then(|t| t.register(r"^\.part +(##?[\w-]+)$", Command::Part))
        .and_then(|t| t.register(r"^\.raw +(.+)$", Command::Raw))
        .map_err(|e| PluginError::load(seed.name, e))?;
    Ok(Box::new(Commandline { commands }))
}

#[async_trait]
impl Plugin for Commandline {
    async fn react(&mut self, msg: &Message, ctx: &mut PluginContext) -> Result<Reaction, PluginError> {
        if msg.command != "PRIVMSG" {
            return Ok(Reaction::Continue);
        }
        let (Some(sender), Some(target), Some(text)) = (&msg.sender, msg.params.first(), &msg.body) else {
            return Ok(Reaction::Continue);
        };
        if *target != ctx.client().nick() {
            return Ok(Reaction::Continue);
        }
        if !ctx.client().is_admin(sender) {
            debug!(sender = %sender, "commandline: ignoring private message from non-admin");
            return Ok(Reaction::Continue);
        }

        let Some((command, caps)) = self.commands.route(text) else {
            return Ok(Reaction::Continue);
        };
        let arg = &caps[1];
        info!(?command, %arg, "commandline: admin command");

        let out = match command {
            Command::Join => Message::new("JOIN", [arg]),
            Command::Part => Message::new("PART", [arg]),
            Command::Raw => Message::parse(arg)
                .map_err(|e| PluginError::Runtime(format!("invalid raw line {arg:?}: {e}")))?,
        };
        ctx.client().send(out)?;
        Ok(Reaction::Halt)
    }
}
