//! Joins the configured channels.
//!
//! Shared data is the set of channels the bot is in, so after a reload only
//! the difference against the new configuration is joined or parted.
//!
//! ```yaml
//! plugins:
//!   - channels:
//!       channels: ["#lagoon", "#rust"]
//! ```

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::irc::message::Message;
use crate::plugin::{Plugin, PluginContext, PluginError, PluginSeed, Reaction};

#[derive(Debug, Default, Deserialize)]
struct ChannelsConfig {
    #[serde(default)]
    channels: Vec<String>,
}

pub struct Channels {
    wanted: BTreeSet<String>,
}

pub fn construct(seed: PluginSeed) -> Result<Box<dyn Plugin>, PluginError> {
    let config: ChannelsConfig = seed.config_as()?;
    Ok(Box::new(Channels {
        wanted: config.channels.into_iter().collect(),
    }))
}

impl Channels {
    async fn joined(ctx: &PluginContext) -> Result<BTreeSet<String>, PluginError> {
        Ok(ctx
            .shared_data_as::<Option<BTreeSet<String>>>()
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl Plugin for Channels {
    fn init_shared_data(&self) -> Value {
        json!([])
    }

    async fn start(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let joined = Self::joined(ctx).await?;

        for channel in self.wanted.difference(&joined) {
            info!(%channel, "channels: joining");
            ctx.client().send(Message::new("JOIN", [channel.as_str()]))?;
        }
        for channel in joined.difference(&self.wanted) {
            info!(%channel, "channels: parting");
            ctx.client().send(Message::new("PART", [channel.as_str()]))?;
        }

        ctx.set_shared_data(json!(self.wanted)).await;
        Ok(())
    }

    /// Keep the joined set honest when the server moves us around.
    async fn react(&mut self, msg: &Message, ctx: &mut PluginContext) -> Result<Reaction, PluginError> {
        let me = ctx.client().nick();
        let (channel, joined) = match msg.command.as_str() {
            "JOIN" if msg.sender_nick() == Some(me.as_str()) => {
                (msg.params.first().or(msg.body.as_ref()), true)
            }
            "PART" if msg.sender_nick() == Some(me.as_str()) => (msg.params.first(), false),
            "KICK" if msg.params.get(1) == Some(&me) => (msg.params.first(), false),
            _ => return Ok(Reaction::Continue),
        };
        let Some(channel) = channel else {
            return Ok(Reaction::Continue);
        };

        let mut set = Self::joined(ctx).await?;
        let changed = if joined {
            set.insert(channel.clone())
        } else {
            set.remove(channel)
        };
        if changed {
            ctx.set_shared_data(json!(set)).await;
        }
        Ok(Reaction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginEntry;
    use crate::irc::client::{ClientHandle, Outbound};
    use crate::plugin::{PluginSet, Registry};
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_util::sync::CancellationToken;

    fn entry(channels: &[&str]) -> PluginEntry {
        PluginEntry::Configured(BTreeMap::from([(
            "channels".to_owned(),
            json!({ "channels": channels }),
        )]))
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(o) = rx.try_recv() {
            out.push(o.message.to_wire());
        }
        out
    }

    #[tokio::test]
    async fn first_start_joins_everything() {
        let (client, mut rx) = ClientHandle::detached("bot");
        let set = PluginSet::load(&Registry::builtin(), &[entry(&["#b", "#a"])], HashMap::new(), &client, 4).await;

        assert_eq!(drain(&mut rx), vec!["JOIN #a", "JOIN #b"]);
        assert_eq!(set.store().get("channels").await, Some(json!(["#a", "#b"])));
    }

    #[tokio::test]
    async fn reload_only_applies_the_difference() {
        let (client, mut rx) = ClientHandle::detached("bot");
        let carried = HashMap::from([("channels".to_owned(), json!(["#a", "#old"]))]);
        let set = PluginSet::load(&Registry::builtin(), &[entry(&["#a", "#new"])], carried, &client, 4).await;

        assert_eq!(drain(&mut rx), vec!["JOIN #new", "PART #old"]);
        assert_eq!(set.unload().await["channels"], json!(["#a", "#new"]));
    }

    #[tokio::test]
    async fn kick_removes_channel_from_shared_data() {
        let (client, mut rx) = ClientHandle::detached("bot");
        let mut set = PluginSet::load(&Registry::builtin(), &[entry(&["#a", "#b"])], HashMap::new(), &client, 4).await;
        drain(&mut rx);
        let token = CancellationToken::new();
        let mut tasks = set.spawn(&token);

        set.dispatch(&Arc::new(Message::parse(":op!o@h KICK #a bot :bye").unwrap()));
        set.dispatch(&Arc::new(Message::parse(":bot!b@h JOIN :#c").unwrap()));

        let store = set.store().clone();
        let expected = json!(["#b", "#c"]);
        for _ in 0..100 {
            if store.get("channels").await.as_ref() == Some(&expected) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.get("channels").await, Some(expected));

        token.cancel();
        while tasks.join_next().await.is_some() {}
    }

    #[test]
    fn bad_config_fails_construction() {
        let (client, _rx) = ClientHandle::detached("bot");
        let seed = PluginSeed {
            name: "channels".into(),
            config: Some(json!({"channels": "#not-a-list"})),
            shared_data: None,
            client,
        };
        assert!(matches!(construct(seed), Err(PluginError::Load { .. })));
    }
}
