//! Loopback fakes for session, search and transfer tests

use std::io::{Cursor, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::config::IrcConfig;
use crate::irc::{IrcLineCodec, IrcMessage};
use crate::transfer::DccOffer;

const SERVER_NAME: &str = "fake.server";

/// Scripted behaviour of the fake IRC server
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeServerOptions {
    /// Nicknames answered with 433
    pub taken_nicks: Vec<String>,
    /// Answer every NICK with 433
    pub reject_all_nicks: bool,
    /// Send a CTCP VERSION request before the welcome
    pub version_probe: bool,
    /// PRIVMSG substring and the lines sent back; `{nick}` is replaced
    pub responders: Vec<(String, Vec<String>)>,
}

/// Minimal IRC server on a loopback port that records every line
pub(crate) struct FakeIrcServer {
    pub addr: SocketAddr,
    log: Arc<Mutex<Vec<(Instant, String)>>>,
    connections: Arc<AtomicUsize>,
    clients: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>,
    accept_task: JoinHandle<()>,
}

impl FakeIrcServer {
    pub async fn start(options: FakeServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let clients = Arc::new(Mutex::new(Vec::new()));

        let accept_task = {
            let (log, connections, clients) = (log.clone(), connections.clone(), clients.clone());
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let (push_tx, push_rx) = mpsc::unbounded_channel();
                    clients.lock().unwrap().push(push_tx);
                    tokio::spawn(serve(socket, options.clone(), log.clone(), push_rx));
                }
            })
        };

        Self { addr, log, connections, clients, accept_task }
    }

    /// Every received line, in order
    pub fn lines(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(_, l)| l.clone()).collect()
    }

    /// Received lines with their arrival time
    pub fn timed_lines(&self) -> Vec<(Instant, String)> {
        self.log.lock().unwrap().clone()
    }

    /// Received lines whose command word is `command`
    pub fn commands(&self, command: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.split(' ').next() == Some(command))
            .collect()
    }

    /// Poll until `count` lines of `command` arrived or two seconds passed
    pub async fn wait_for_commands(&self, command: &str, count: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let found = self.commands(command);
            if found.len() >= count || Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a raw line to every connected client
    pub async fn push(&self, line: &str) {
        for client in self.clients.lock().unwrap().iter() {
            let _ = client.send(line.to_string());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

impl Drop for FakeIrcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(
    socket: TcpStream,
    options: FakeServerOptions,
    log: Arc<Mutex<Vec<(Instant, String)>>>,
    mut pushed: mpsc::UnboundedReceiver<String>,
) {
    let mut framed = Framed::new(socket, IrcLineCodec::new());
    let mut nick: Option<String> = None;
    let mut has_user = false;
    let mut welcomed = false;

    loop {
        let line = tokio::select! {
            line = framed.next() => match line {
                Some(Ok(line)) => line,
                _ => break,
            },
            Some(out) = pushed.recv() => {
                if framed.send(out).await.is_err() {
                    break;
                }
                continue;
            }
        };
        log.lock().unwrap().push((Instant::now(), line.clone()));
        let Some(message) = IrcMessage::parse(&line) else {
            continue;
        };

        let mut replies = Vec::new();
        let current = nick.clone().unwrap_or_else(|| "*".to_string());
        match message.command.as_str() {
            "NICK" => {
                let wanted = message.param(0).unwrap_or_default().to_string();
                if options.reject_all_nicks || options.taken_nicks.contains(&wanted) {
                    replies.push(format!(":{} 433 {} {} :Nickname is already in use", SERVER_NAME, current, wanted));
                } else {
                    nick = Some(wanted);
                }
            }
            "USER" => has_user = true,
            "JOIN" => {
                let channel = message.param(0).unwrap_or_default();
                replies.push(format!(":{}!user@loopback JOIN {}", current, channel));
                replies.push(format!(":{} 366 {} {} :End of /NAMES list.", SERVER_NAME, current, channel));
            }
            "PING" => {
                replies.push(format!(":{} PONG {} :{}", SERVER_NAME, SERVER_NAME, message.trailing().unwrap_or_default()));
            }
            "QUIT" => {
                let _ = framed.send("ERROR :Closing Link: quit".to_string()).await;
                break;
            }
            "PRIVMSG" => {
                let text = message.param(1).unwrap_or_default();
                for (trigger, lines) in &options.responders {
                    if text.contains(trigger.as_str()) {
                        replies.extend(lines.iter().map(|l| l.replace("{nick}", &current)));
                    }
                }
            }
            _ => {}
        }

        if !welcomed && has_user {
            if let Some(nick) = &nick {
                if options.version_probe {
                    replies.push(format!(":Probe!probe@loopback PRIVMSG {} :\x01VERSION\x01", nick));
                }
                replies.push(format!(":{} 001 {} :Welcome to the fake network", SERVER_NAME, nick));
                welcomed = true;
            }
        }

        for reply in replies {
            if framed.send(reply).await.is_err() {
                return;
            }
        }
    }
}

/// How a fake DCC peer sends its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeerBehavior {
    /// Send everything, then close
    Complete,
    /// Send this many bytes, then go silent with the socket open
    Stall(usize),
    /// Send this many bytes, then close
    CloseEarly(usize),
    /// Send everything without ever reading acknowledgements
    IgnoreAcks,
}

/// Serve `data` to the first connection on a loopback port
pub(crate) async fn spawn_dcc_peer(data: Vec<u8>, behavior: PeerBehavior) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        if let PeerBehavior::IgnoreAcks = behavior {
            let mut socket = socket;
            let _ = socket.write_all(&data).await;
            let _ = socket.flush().await;
            // Closing with unread acks would reset the connection
            tokio::time::sleep(Duration::from_secs(2)).await;
            return;
        }

        let (mut reader, mut writer) = socket.into_split();
        // Drain acknowledgements until the receiver hangs up
        let acks = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            while let Ok(n) = reader.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });

        match behavior {
            PeerBehavior::Complete => {
                let _ = writer.write_all(&data).await;
                let _ = writer.shutdown().await;
            }
            PeerBehavior::CloseEarly(n) => {
                let _ = writer.write_all(&data[..n.min(data.len())]).await;
                let _ = writer.shutdown().await;
            }
            PeerBehavior::Stall(n) => {
                let _ = writer.write_all(&data[..n.min(data.len())]).await;
                let _ = writer.flush().await;
            }
            PeerBehavior::IgnoreAcks => {}
        }
        let _ = acks.await;
        drop(writer);
    });

    addr
}

/// CTCP DCC SEND text offering `filename` from `addr`
pub(crate) fn offer_payload(filename: &str, addr: SocketAddr, size: u64) -> String {
    let ip = match addr.ip() {
        std::net::IpAddr::V4(v4) => u32::from(v4).to_string(),
        other => other.to_string(),
    };
    let name = if filename.contains(' ') {
        format!("\"{}\"", filename)
    } else {
        filename.to_string()
    };
    format!("\x01DCC SEND {} {} {} {}\x01", name, ip, addr.port(), size)
}

pub(crate) fn dcc_offer(filename: &str, addr: SocketAddr, size: u64) -> DccOffer {
    DccOffer::parse(&offer_payload(filename, addr, size)).unwrap()
}

/// In-memory zip archive
pub(crate) fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in members {
        zip.start_file(*name, zip::write::SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Fast timings for loopback tests
pub(crate) fn test_config(dir: &Path) -> IrcConfig {
    IrcConfig {
        server: "127.0.0.1".to_string(),
        port: 6667,
        tls: false,
        min_command_interval_ms: 50,
        connect_timeout_ms: 1_000,
        registration_timeout_ms: 2_000,
        join_timeout_ms: 500,
        connect_attempts: 3,
        backoff_base_ms: 10,
        backoff_max_ms: 50,
        response_window_ms: 400,
        offer_timeout_ms: 1_000,
        stall_timeout_ms: 300,
        keepalive_interval_ms: 5_000,
        stale_after_ms: 10_000,
        quit_timeout_ms: 200,
        download_dir: dir.join("downloads"),
        ..IrcConfig::default()
    }
}

/// Test config pointed at a fake server
pub(crate) fn server_config(dir: &Path, addr: SocketAddr) -> IrcConfig {
    IrcConfig {
        server: addr.ip().to_string(),
        port: addr.port(),
        ..test_config(dir)
    }
}
