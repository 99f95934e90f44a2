#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use lagoon_bot::config::Config;
use lagoon_bot::irc::client::Client;
use lagoon_bot::irc::codec::IrcCodec;
use lagoon_bot::irc::message::Message;
use lagoon_bot::plugin::{Plugin, PluginContext, PluginError, Reaction};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

pub const WAIT: Duration = Duration::from_secs(5);

/// Server end of an in-memory connection to a `Client`.
pub struct TestServer {
    reader: FramedRead<ReadHalf<DuplexStream>, IrcCodec>,
    writer: WriteHalf<DuplexStream>,
}

impl TestServer {
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("client hung up");
    }

    /// Next line the client sent.
    pub async fn expect(&mut self) -> String {
        timeout(WAIT, self.reader.next())
            .await
            .expect("timed out waiting for the client")
            .expect("client closed the connection")
            .expect("read error")
    }

    /// Assert the client sends nothing for `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(line)) = timeout(wait, self.reader.next()).await {
            panic!("unexpected line from client: {line:?}");
        }
    }
}

pub fn config(plugins: &str) -> Config {
    Config::from_yaml(&config_yaml(plugins)).expect("test config")
}

pub fn config_yaml(plugins: &str) -> String {
    format!(
        "server: {{ host: irc.test, tls: false }}\n\
         bot: {{ nick: bot, name: Lagoon Test, send_delay_ms: 0, queue_capacity: 8 }}\n\
         plugins: {plugins}\n"
    )
}

pub fn pair(config: &Config) -> (Client, TestServer) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let client = Client::new(Box::new(ours), &config.bot);
    let (reader, writer) = tokio::io::split(theirs);
    let server = TestServer {
        reader: FramedRead::new(reader, IrcCodec::default()),
        writer,
    };
    (client, server)
}

/// A client that has completed registration as `bot`.
pub async fn registered(config: &Config) -> (Client, TestServer) {
    let (mut client, mut server) = pair(config);
    let (result, ()) = tokio::join!(client.greet(), async {
        server.expect().await;
        server.expect().await;
        server.send(":irc.test 001 bot :Welcome").await;
    });
    result.expect("handshake");
    (client, server)
}

/// Echoes channel messages to `#out` as `<tag>:<text>`.
///
/// `boom` makes `react` fail; `hang` blocks forever when `hangs` is set.
pub struct Echo {
    pub tag: &'static str,
    pub hangs: bool,
}

#[async_trait]
impl Plugin for Echo {
    async fn react(&mut self, msg: &Message, ctx: &mut PluginContext) -> Result<Reaction, PluginError> {
        if msg.command != "PRIVMSG" {
            return Ok(Reaction::Continue);
        }
        let text = msg.body.clone().unwrap_or_default();
        match text.as_str() {
            "boom" => return Err(PluginError::Runtime(format!("{} exploded", self.tag))),
            "hang" if self.hangs => std::future::pending::<()>().await,
            _ => {}
        }
        ctx.client()
            .send(Message::privmsg("#out", format!("{}:{text}", self.tag)))?;
        Ok(Reaction::Continue)
    }
}
