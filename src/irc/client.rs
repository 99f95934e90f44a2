/// IRC client orchestrator.
///
/// Owns the framed connection and the outgoing queue. `greet` performs the
/// registration handshake; `run` drives one generation (reader, writer and
/// plugin tasks) until the connection closes or the generation is cancelled.
///
/// The connection and the outgoing queue outlive a generation: a reload swaps
/// only the plugins, and messages still queued are sent by the next writer.
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::{CodecError, IrcCodec};
use super::message::{Message, SanitizeError};
use super::prefix::Prefix;
use super::transport::IrcStream;
use crate::config::BotConfig;
use crate::plugin::{Dispatcher, PluginSet};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
    #[error("handshake message rejected: {0}")]
    Handshake(SanitizeError),
}

impl From<CodecError> for ClientError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => Self::Io(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

/// Why a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The server closed the connection.
    Disconnected,
    /// The generation's token was cancelled (reload or shutdown).
    Cancelled,
}

/// An entry on the outgoing queue.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub message: Message,
    /// Skip the send-time sanitize check.
    pub trusted: bool,
}

/// Cloneable handle plugins use to talk to the connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    outgoing: mpsc::UnboundedSender<Outbound>,
    nick: watch::Receiver<String>,
    admin: Option<Arc<str>>,
}

impl ClientHandle {
    /// A handle attached to no connection. Outgoing messages land in the
    /// returned receiver.
    pub fn detached(nick: &str) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outgoing, rx) = mpsc::unbounded_channel();
        let (_, nick) = watch::channel(nick.to_owned());
        let handle = Self {
            outgoing,
            nick,
            admin: None,
        };
        (handle, rx)
    }

    pub fn with_admin(mut self, identity: impl Into<Arc<str>>) -> Self {
        self.admin = Some(identity.into());
        self
    }

    /// Queue a message for transmission. Never waits on the network.
    pub fn send(&self, message: Message) -> Result<(), ClientError> {
        self.enqueue(message, false)
    }

    /// Queue a message that bypasses the send-time sanitize check.
    ///
    /// Only for internally built control traffic.
    pub fn send_trusted(&self, message: Message) -> Result<(), ClientError> {
        self.enqueue(message, true)
    }

    fn enqueue(&self, message: Message, trusted: bool) -> Result<(), ClientError> {
        self.outgoing
            .send(Outbound { message, trusted })
            .map_err(|_| ClientError::Closed)
    }

    /// The nick the server currently knows us by.
    pub fn nick(&self) -> String {
        self.nick.borrow().clone()
    }

    /// Whether `sender` carries the configured admin identity.
    ///
    /// Compares `user@host`, never the nick.
    pub fn is_admin(&self, sender: &Prefix) -> bool {
        match (&self.admin, sender.identity()) {
            (Some(admin), Some(identity)) => **admin == identity,
            _ => false,
        }
    }
}

pub struct Client {
    reader: FramedRead<ReadHalf<IrcStream>, IrcCodec>,
    writer: FramedWrite<WriteHalf<IrcStream>, IrcCodec>,
    outgoing_tx: mpsc::UnboundedSender<Outbound>,
    outgoing_rx: mpsc::UnboundedReceiver<Outbound>,
    nick: watch::Sender<String>,
    state: ClientState,
    realname: String,
    admin: Option<Arc<str>>,
    send_delay: Duration,
}

impl Client {
    pub fn new(stream: IrcStream, bot: &BotConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (nick, _) = watch::channel(bot.nick.clone());
        Self {
            reader: FramedRead::new(read_half, IrcCodec::new(bot.encoding)),
            writer: FramedWrite::new(write_half, IrcCodec::new(bot.encoding)),
            outgoing_tx,
            outgoing_rx,
            nick,
            state: ClientState::Disconnected,
            realname: bot.name.clone(),
            admin: bot.admin.as_deref().map(Arc::from),
            send_delay: bot.send_delay(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn nick(&self) -> String {
        self.nick.borrow().clone()
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            outgoing: self.outgoing_tx.clone(),
            nick: self.nick.subscribe(),
            admin: self.admin.clone(),
        }
    }

    /// Apply settings that can change without reconnecting.
    ///
    /// Handles created before this call keep the old admin identity.
    pub fn reconfigure(&mut self, bot: &BotConfig) {
        self.admin = bot.admin.as_deref().map(Arc::from);
        self.send_delay = bot.send_delay();
        if bot.nick != *self.nick.borrow() {
            let current = self.nick();
            info!(configured = %bot.nick, %current, "client: nick change takes effect on next connection");
        }
    }

    /// Register with the server: `USER`, `NICK`, then wait for the welcome.
    ///
    /// A nick collision appends `_` and claims again. `PING` is answered;
    /// anything else is ignored until the welcome arrives.
    pub async fn greet(&mut self) -> Result<(), ClientError> {
        self.state = ClientState::Handshaking;
        let mut candidate = self.nick();

        self.send_now(Message::new("USER", [candidate.as_str(), "*", "*"]).with_body(self.realname.clone()))
            .await?;
        self.send_now(Message::new("NICK", [candidate.as_str()])).await?;

        while let Some(line) = self.reader.next().await {
            let line = line?;
            debug!(">>> {line}");
            let msg = match Message::parse(&line) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, %line, "client: dropping unparseable line");
                    continue;
                }
            };

            match msg.command.as_str() {
                "433" => {
                    candidate.push('_');
                    info!(nick = %candidate, "client: nick in use, trying another");
                    self.send_now(Message::new("NICK", [candidate.as_str()])).await?;
                }
                "001" => {
                    let nick = msg.params.first().cloned().unwrap_or(candidate);
                    info!(%nick, "client: registered");
                    self.nick.send_replace(nick);
                    self.state = ClientState::Ready;
                    return Ok(());
                }
                "PING" => {
                    let token = msg.body.or_else(|| msg.params.first().cloned());
                    self.send_now(Message::pong(token.unwrap_or_default())).await?;
                }
                _ => debug!(command = %msg.command, "client: ignored during handshake"),
            }
        }

        self.state = ClientState::Closed;
        Err(ClientError::Closed)
    }

    /// Transmit directly, bypassing the queue and the send delay.
    async fn send_now(&mut self, msg: Message) -> Result<(), ClientError> {
        msg.sanitize(self.writer.encoder().encoding())
            .map_err(ClientError::Handshake)?;
        debug!("<<< {msg}");
        self.writer.send(msg).await?;
        Ok(())
    }

    /// Drive one generation until the connection closes or `cancel` fires.
    ///
    /// Plugins are spawned under a child of `cancel`; when the reader sees
    /// end of input the child is cancelled too, so the writer and every
    /// plugin task stop before this returns.
    pub async fn run(
        &mut self,
        plugins: &mut PluginSet,
        cancel: &CancellationToken,
    ) -> Result<RunExit, ClientError> {
        if self.state == ClientState::Closed {
            return Err(ClientError::Closed);
        }

        let generation = cancel.child_token();
        let mut tasks = plugins.spawn(&generation);
        let dispatcher = plugins.dispatcher();

        let Self {
            reader,
            writer,
            outgoing_rx,
            nick,
            state,
            send_delay,
            ..
        } = self;

        let read = async {
            let exit = read_loop(reader, nick, dispatcher, &generation).await;
            if !matches!(exit, Ok(RunExit::Cancelled)) {
                *state = ClientState::Closing;
            }
            generation.cancel();
            exit
        };
        let write = async {
            let result = write_loop(writer, outgoing_rx, *send_delay, &generation).await;
            if result.is_err() {
                generation.cancel();
            }
            result
        };
        let supervise = async {
            let mut stopped = Vec::with_capacity(tasks.len());
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(ctx) => stopped.push(ctx),
                    Err(e) => warn!(error = %e, "client: plugin task ended abnormally"),
                }
            }
            stopped
        };

        let (read_exit, write_result, stopped) = tokio::join!(read, write, supervise);
        for ctx in stopped {
            plugins.park(ctx);
        }

        if *state == ClientState::Closing || write_result.is_err() {
            *state = ClientState::Closed;
            info!("client: connection closed");
        }
        write_result?;
        read_exit
    }
}

async fn read_loop(
    reader: &mut FramedRead<ReadHalf<IrcStream>, IrcCodec>,
    nick: &watch::Sender<String>,
    dispatcher: &Dispatcher,
    token: &CancellationToken,
) -> Result<RunExit, ClientError> {
    loop {
        let line = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(RunExit::Cancelled),
            line = reader.next() => line,
        };
        let line = match line {
            Some(line) => line?,
            None => return Ok(RunExit::Disconnected),
        };
        debug!(">>> {line}");

        let msg = match Message::parse(&line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, %line, "client: dropping unparseable line");
                continue;
            }
        };

        if msg.command == "NICK" && msg.sender_nick() == Some(nick.borrow().as_str()) {
            if let Some(new) = msg.body.clone().or_else(|| msg.params.first().cloned()) {
                info!(nick = %new, "client: nick changed");
                nick.send_replace(new);
            }
        }

        dispatcher.dispatch(&Arc::new(msg));
    }
}

async fn write_loop(
    writer: &mut FramedWrite<WriteHalf<IrcStream>, IrcCodec>,
    outgoing: &mut mpsc::UnboundedReceiver<Outbound>,
    send_delay: Duration,
    token: &CancellationToken,
) -> Result<(), ClientError> {
    let encoding = writer.encoder().encoding();
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            next = outgoing.recv() => next,
        };
        let Some(Outbound { message, trusted }) = next else {
            return Ok(());
        };

        if !trusted {
            if let Err(e) = message.sanitize(encoding) {
                warn!(error = %e, message = ?message.to_wire(), "client: dropping outgoing message, possible abuse");
                continue;
            }
        }

        debug!("<<< {message}");
        writer.send(message).await?;

        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(send_delay) => {}
        }
    }
}
