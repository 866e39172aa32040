//! IRC adapter.
//!
//! This crate implements the `chanlog-core` ChatPort over a plain TCP IRC
//! connection.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

pub mod message;

use chanlog_core::{
    domain::ChannelName,
    errors::Error,
    messaging::{
        port::{ChatHandler, ChatPort},
        types::IncomingMessage,
    },
    Result,
};

use message::{is_channel, privmsg_lines, Message};

const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(30);

type Handler = Arc<RwLock<Option<Arc<dyn ChatHandler>>>>;
type Writer = Arc<Mutex<OwnedWriteHalf>>;

struct Session {
    writer: Writer,
    reader: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

impl Session {
    /// Close without raising `on_disconnect`.
    async fn close(self, quit: Option<&str>) {
        self.closing.store(true, Ordering::SeqCst);
        {
            let mut w = self.writer.lock().await;
            if let Some(reason) = quit {
                if let Err(e) = write_line(&mut w, &format!("QUIT :{reason}")).await {
                    debug!(error = %e, "QUIT not delivered");
                }
            }
            let _ = w.shutdown().await;
        }
        self.reader.abort();
    }
}

/// One IRC session at a time; `connect` replaces any previous one.
pub struct IrcClient {
    realname: String,
    register_timeout: Duration,
    handler: Handler,
    session: Mutex<Option<Session>>,
}

impl IrcClient {
    pub fn new(realname: impl Into<String>) -> Self {
        Self {
            realname: realname.into(),
            register_timeout: DEFAULT_REGISTER_TIMEOUT,
            handler: Arc::new(RwLock::new(None)),
            session: Mutex::new(None),
        }
    }

    /// Bound on TCP connect plus registration.
    pub fn with_register_timeout(mut self, register_timeout: Duration) -> Self {
        self.register_timeout = register_timeout;
        self
    }

    async fn register(
        &self,
        server: &str,
        nick: &str,
    ) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
        let stream = TcpStream::connect(server).await?;
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);

        write_line(&mut write, &format!("NICK {nick}")).await?;
        write_line(&mut write, &format!("USER {nick} 0 * :{}", self.realname)).await?;

        let mut buf = Vec::new();
        loop {
            let Some(line) = read_line(&mut reader, &mut buf).await? else {
                return Err(Error::Chat(format!(
                    "{server} closed the connection during registration"
                )));
            };
            let Some(msg) = Message::parse(&line) else {
                continue;
            };
            match msg.command.as_str() {
                "001" => return Ok((reader, write)),
                "PING" => {
                    let token = msg.param(0).unwrap_or_default();
                    write_line(&mut write, &format!("PONG :{token}")).await?;
                }
                // ERR_NICKNAMEINUSE, ERR_NICKCOLLISION
                "433" | "436" => return Err(Error::NickInUse(nick.to_string())),
                "432" => {
                    return Err(Error::Chat(format!("erroneous nickname `{nick}`")));
                }
                "ERROR" => {
                    return Err(Error::Chat(format!(
                        "{server} refused registration: {}",
                        msg.param(0).unwrap_or_default()
                    )));
                }
                _ => {}
            }
        }
    }

    async fn write(&self, lines: &[String]) -> Result<()> {
        let writer = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(s) => s.writer.clone(),
                None => return Err(Error::Chat("not connected".to_string())),
            }
        };
        let mut w = writer.lock().await;
        for line in lines {
            write_line(&mut w, line).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChatPort for IrcClient {
    async fn connect(&self, server: &str, nick: &str) -> Result<()> {
        let previous = self.session.lock().await.take();
        if let Some(previous) = previous {
            previous.close(None).await;
        }

        let (reader, writer) = timeout(self.register_timeout, self.register(server, nick))
            .await
            .map_err(|_| Error::Timeout(format!("registering with {server}")))??;
        info!(server = %server, nick = %nick, "registered");

        let writer: Writer = Arc::new(Mutex::new(writer));
        let closing = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            reader,
            writer.clone(),
            self.handler.clone(),
            closing.clone(),
        ));

        *self.session.lock().await = Some(Session {
            writer,
            reader,
            closing,
        });
        Ok(())
    }

    async fn join_channel(&self, channel: &ChannelName) -> Result<()> {
        self.write(&[format!("JOIN {channel}")]).await
    }

    async fn send_message(&self, destination: &str, text: &str) -> Result<()> {
        let lines = privmsg_lines(destination, text);
        if lines.is_empty() {
            return Ok(());
        }
        self.write(&lines).await
    }

    async fn quit(&self, reason: &str) -> Result<()> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.close(Some(reason)).await;
            info!("left the network");
        }
        Ok(())
    }

    fn set_handler(&self, handler: Arc<dyn ChatHandler>) {
        match self.handler.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }
}

fn current_handler(handler: &Handler) -> Option<Arc<dyn ChatHandler>> {
    match handler.read() {
        Ok(slot) => slot.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    writer: Writer,
    handler: Handler,
    closing: Arc<AtomicBool>,
) {
    let mut buf = Vec::new();
    loop {
        let line = match read_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("server closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "read failed");
                break;
            }
        };
        let Some(msg) = Message::parse(&line) else {
            continue;
        };

        match msg.command.as_str() {
            "PING" => {
                let token = msg.param(0).unwrap_or_default();
                let mut w = writer.lock().await;
                if let Err(e) = write_line(&mut w, &format!("PONG :{token}")).await {
                    warn!(error = %e, "PONG failed");
                    break;
                }
            }
            "PRIVMSG" => {
                let (Some(target), Some(text)) = (msg.param(0), msg.param(1)) else {
                    continue;
                };
                if !is_channel(target) {
                    continue;
                }
                let Some((nick, user, host)) = msg.source() else {
                    continue;
                };
                if let Some(h) = current_handler(&handler) {
                    h.on_message(IncomingMessage {
                        channel: target.to_string(),
                        sender: nick.to_string(),
                        login: user.to_string(),
                        host: host.to_string(),
                        text: text.to_string(),
                    })
                    .await;
                }
            }
            "433" | "436" => {
                let nick = msg.param(1).unwrap_or_default();
                if let Some(h) = current_handler(&handler) {
                    h.on_nick_collision(nick).await;
                }
            }
            "ERROR" => {
                warn!(reason = msg.param(0).unwrap_or_default(), "server closed the session");
                break;
            }
            _ => {}
        }
    }

    if closing.load(Ordering::SeqCst) {
        return;
    }
    if let Some(h) = current_handler(&handler) {
        h.on_disconnect().await;
    }
}

/// Next line as lossy UTF-8; `None` at EOF.
async fn read_line(reader: &mut BufReader<OwnedReadHalf>, buf: &mut Vec<u8>) -> Result<Option<String>> {
    buf.clear();
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(buf).trim_end().to_string()))
}

async fn write_line(w: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    let line = line.replace('\r', " ").replace('\n', " ");
    w.write_all(format!("{line}\r\n").as_bytes()).await?;
    Ok(())
}
