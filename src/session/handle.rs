//! Live IRC session
//!
//! A registered connection split into two workers. The reader parses
//! inbound lines, answers PING and CTCP VERSION, and fans events out on a
//! bounded broadcast channel. The writer owns the socket's write half and
//! the rate limiter, draining a FIFO command queue one spaced line at a
//! time. Callers never touch the socket.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::connection::BoxedStream;
use super::rate_limit::RateLimiter;
use super::state::{ConnectionState, SessionId, SessionStatus};
use crate::error::{ConnectionErrorKind, IrcBookError, Result};
use crate::irc::{ctcp, Ctcp, IrcLineCodec, IrcMessage};

/// Framed IRC connection
pub type IrcFramed = Framed<BoxedStream, IrcLineCodec>;

/// Queued commands per session
const COMMAND_QUEUE: usize = 64;

/// Buffered inbound events per subscriber
const EVENT_QUEUE: usize = 1024;

/// Time allowed for workers to exit after cancellation
const WORKER_SHUTDOWN: Duration = Duration::from_secs(1);

/// Something that arrived on the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// PRIVMSG or NOTICE text (CTCP excluded)
    Message {
        from: String,
        target: String,
        text: String,
        notice: bool,
    },
    /// A CTCP DCC request; `payload` is the raw CTCP text
    DccOffer { from: String, payload: String },
    /// The connection is gone
    Disconnected { reason: String },
}

/// Line waiting for the writer, with an optional completion signal
struct OutboundCommand {
    line: String,
    ack: Option<oneshot::Sender<Result<()>>>,
}

/// Fixed facts about a registered connection
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub id: SessionId,
    pub address: String,
    pub tls: bool,
    pub nickname: String,
    pub version_reply: String,
    pub keepalive_interval: Duration,
    pub stale_after: Duration,
}

/// Mutable per-session state, guarded by the session's own locks
#[derive(Debug)]
struct SessionShared {
    state: RwLock<ConnectionState>,
    last_activity: RwLock<(Instant, SystemTime)>,
    last_command: RwLock<Option<SystemTime>>,
}

impl SessionShared {
    async fn touch(&self) {
        *self.last_activity.write().await = (Instant::now(), SystemTime::now());
    }

    /// Move to `next` unless the owner already closed the session
    async fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != ConnectionState::Closed {
            *state = next;
        }
    }
}

/// One live IRC connection
pub struct Session {
    params: SessionParams,
    created_at: SystemTime,
    shared: Arc<SessionShared>,
    commands: mpsc::Sender<OutboundCommand>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    closed: AtomicBool,
    searches: AtomicUsize,
    downloads: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Start the workers on a registered connection. `backlog` holds lines
    /// read during channel join that still need handling.
    pub fn start(framed: IrcFramed, params: SessionParams, backlog: Vec<IrcMessage>, limiter: RateLimiter) -> Arc<Self> {
        let (sink, stream) = framed.split();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE);
        let cancel = CancellationToken::new();
        let shared = Arc::new(SessionShared {
            state: RwLock::new(ConnectionState::Ready),
            last_activity: RwLock::new((Instant::now(), SystemTime::now())),
            last_command: RwLock::new(None),
        });

        let reader = Reader {
            id: params.id.clone(),
            nickname: params.nickname.clone(),
            version_reply: params.version_reply.clone(),
            keepalive_interval: params.keepalive_interval,
            commands: command_tx.clone(),
            events: event_tx.clone(),
            shared: shared.clone(),
            cancel: cancel.clone(),
        };
        let reader_task = tokio::spawn(reader.run(stream, backlog));
        let writer_task = tokio::spawn(writer_loop(
            params.id.clone(),
            sink,
            command_rx,
            limiter,
            shared.clone(),
            cancel.clone(),
        ));

        info!("Session {} ready as {} on {}", params.id, params.nickname, params.address);
        Arc::new(Self {
            params,
            created_at: SystemTime::now(),
            shared,
            commands: command_tx,
            events: event_tx,
            cancel,
            closed: AtomicBool::new(false),
            searches: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            workers: Mutex::new(vec![reader_task, writer_task]),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.params.id
    }

    pub fn nickname(&self) -> &str {
        &self.params.nickname
    }

    pub fn address(&self) -> &str {
        &self.params.address
    }

    pub fn is_tls(&self) -> bool {
        self.params.tls
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    /// Receive inbound events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Token cancelled when the session closes; transfers hang off it
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Token cancelled by either `cancel` or the session closing. Cancel it
    /// once the work is done to release the watcher task.
    pub fn linked_token(&self, cancel: &CancellationToken) -> CancellationToken {
        let linked = cancel.child_token();
        let session = self.cancel.clone();
        let watched = linked.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = session.cancelled() => watched.cancel(),
                _ = watched.cancelled() => {}
            }
        });
        linked
    }

    /// Queue a command and wait until the writer has sent it. The wait
    /// includes the rate limiter's spacing.
    pub async fn send(&self, message: IrcMessage, cancel: &CancellationToken) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(IrcBookError::session_error_with_id("Session is closed", self.params.id.as_str()));
        }
        let state = self.state().await;
        if !state.is_usable() {
            return Err(IrcBookError::session_error_with_id(
                format!("Session is {:?}", state),
                self.params.id.as_str(),
            ));
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let line = message.to_line();
        debug!("Queueing command on {}: {}", self.params.id, line);
        self.commands
            .send(OutboundCommand { line, ack: Some(ack_tx) })
            .await
            .map_err(|_| IrcBookError::session_error_with_id("Session writer has stopped", self.params.id.as_str()))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(IrcBookError::cancelled(format!("{} on {}", message.command, self.params.id))),
            ack = ack_rx => ack.map_err(|_| {
                IrcBookError::session_error_with_id("Session writer dropped the command", self.params.id.as_str())
            })?,
        }
    }

    /// Send a PRIVMSG through the queue
    pub async fn privmsg(&self, target: &str, text: &str, cancel: &CancellationToken) -> Result<()> {
        self.send(IrcMessage::privmsg(target, text), cancel).await
    }

    /// Open, ready and heard from within `stale_after`
    pub async fn is_healthy(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
            return false;
        }
        if !self.state().await.is_usable() {
            return false;
        }
        let (last, _) = *self.shared.last_activity.read().await;
        last.elapsed() <= self.params.stale_after
    }

    pub fn record_search(&self) {
        self.searches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot for dashboards
    pub async fn status(&self) -> SessionStatus {
        let (_, last_activity) = *self.shared.last_activity.read().await;
        SessionStatus {
            id: self.params.id.clone(),
            server: self.params.address.clone(),
            nickname: self.params.nickname.clone(),
            state: self.state().await,
            tls: self.params.tls,
            healthy: self.is_healthy().await,
            searches: self.searches.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            created_at: self.created_at,
            last_activity,
            last_command: *self.shared.last_command.read().await,
        }
    }

    /// Best-effort QUIT bounded by `quit_timeout`, then stop both workers.
    /// Calling it again is a no-op.
    pub async fn close(&self, quit_timeout: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Session {} already closed", self.params.id);
            return;
        }
        info!("Closing session {}", self.params.id);

        if self.state().await.is_usable() {
            let (ack_tx, ack_rx) = oneshot::channel();
            let quit = OutboundCommand { line: IrcMessage::quit("Goodbye").to_line(), ack: Some(ack_tx) };
            if self.commands.try_send(quit).is_ok() {
                match timeout(quit_timeout, ack_rx).await {
                    Ok(Ok(Ok(()))) => debug!("QUIT sent on {}", self.params.id),
                    Ok(Ok(Err(e))) => debug!("QUIT failed on {}: {}", self.params.id, e),
                    _ => debug!("QUIT not sent on {} within {:?}", self.params.id, quit_timeout),
                }
            }
        }

        self.cancel.cancel();
        *self.shared.state.write().await = ConnectionState::Closed;

        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for mut worker in workers {
            if timeout(WORKER_SHUTDOWN, &mut worker).await.is_err() {
                warn!("Session {} worker did not stop, aborting", self.params.id);
                worker.abort();
            }
        }
        info!("Session {} closed", self.params.id);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.params.id)
            .field("address", &self.params.address)
            .field("nickname", &self.params.nickname)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Outcome of handling one inbound line
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Inbound worker state
struct Reader {
    id: SessionId,
    nickname: String,
    version_reply: String,
    keepalive_interval: Duration,
    commands: mpsc::Sender<OutboundCommand>,
    events: broadcast::Sender<SessionEvent>,
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
}

impl Reader {
    async fn run(self, mut stream: SplitStream<IrcFramed>, backlog: Vec<IrcMessage>) {
        for message in backlog {
            if self.handle(message).await == Flow::Stop {
                return;
            }
        }

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = timeout(self.keepalive_interval, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    debug!("Session {} idle for {:?}, sending keepalive", self.id, self.keepalive_interval);
                    self.enqueue(IrcMessage::ping(&self.nickname));
                }
                Ok(None) => {
                    self.disconnect("Connection closed by server").await;
                    break;
                }
                Ok(Some(Err(e))) => {
                    self.disconnect(&format!("Read error: {}", e)).await;
                    break;
                }
                Ok(Some(Ok(line))) => {
                    trace!("{} <- {}", self.id, line);
                    self.shared.touch().await;
                    let Some(message) = IrcMessage::parse(&line) else {
                        debug!("Ignoring unparseable line on {}: {:?}", self.id, line);
                        continue;
                    };
                    if self.handle(message).await == Flow::Stop {
                        break;
                    }
                }
            }
        }
        debug!("Session {} reader stopped", self.id);
    }

    async fn handle(&self, message: IrcMessage) -> Flow {
        match message.command.as_str() {
            "PING" => {
                let token = message.trailing().unwrap_or_default();
                trace!("Answering PING {} on {}", token, self.id);
                self.enqueue(IrcMessage::pong(token));
            }
            "ERROR" => {
                let reason = message.trailing().unwrap_or("server sent ERROR").to_string();
                self.disconnect(&reason).await;
                return Flow::Stop;
            }
            "PRIVMSG" | "NOTICE" => self.handle_text(&message),
            "KICK" if message.param(1).is_some_and(|n| n.eq_ignore_ascii_case(&self.nickname)) => {
                warn!("Session {} was kicked from {}: {}", self.id, message.param(0).unwrap_or("?"), message.trailing().unwrap_or(""));
            }
            _ => trace!("Unhandled {} on {}", message.command, self.id),
        }
        Flow::Continue
    }

    fn handle_text(&self, message: &IrcMessage) {
        let (Some(target), Some(text)) = (message.param(0), message.param(1)) else {
            return;
        };
        let from = message.source_nick().unwrap_or_default().to_string();
        let notice = message.command == "NOTICE";

        if let Some(request) = Ctcp::parse(text) {
            if request.is_version() && !notice {
                info!("Answering CTCP VERSION from {}", from);
                self.enqueue(ctcp::version_reply(&from, &self.version_reply));
            } else if request.is_dcc() {
                debug!("DCC request from {} on {}", from, self.id);
                let _ = self.events.send(SessionEvent::DccOffer { from, payload: text.to_string() });
            } else {
                trace!("Ignoring CTCP {} from {}", request.command, from);
            }
            return;
        }

        let _ = self.events.send(SessionEvent::Message {
            from,
            target: target.to_string(),
            text: text.to_string(),
            notice,
        });
    }

    /// Queue a reply without waiting; the reader must never block on the writer
    fn enqueue(&self, message: IrcMessage) {
        let command = OutboundCommand { line: message.to_line(), ack: None };
        if let Err(e) = self.commands.try_send(command) {
            warn!("Dropping {} on {}: command queue unavailable ({})", message.command, self.id, e);
        }
    }

    async fn disconnect(&self, reason: &str) {
        warn!("Session {} disconnected: {}", self.id, reason);
        self.shared.set_state(ConnectionState::Disconnected).await;
        let _ = self.events.send(SessionEvent::Disconnected { reason: reason.to_string() });
    }
}

/// Outbound worker: one queued line at a time, spaced by the limiter
async fn writer_loop(
    id: SessionId,
    mut sink: SplitSink<IrcFramed, String>,
    mut commands: mpsc::Receiver<OutboundCommand>,
    mut limiter: RateLimiter,
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(ack) = command.ack {
                    let _ = ack.send(Err(IrcBookError::cancelled("queued command")));
                }
                break;
            }
            _ = limiter.wait() => {}
        }

        trace!("{} -> {}", id, command.line);
        let result = sink.send(command.line).await.map_err(|e| {
            IrcBookError::connection_error(ConnectionErrorKind::Refused, format!("Failed to write to server: {}", e))
        });
        *shared.last_command.write().await = Some(SystemTime::now());

        let failed = result.is_err();
        if let Err(e) = &result {
            warn!("Session {} write failed: {}", id, e);
        }
        if let Some(ack) = command.ack {
            let _ = ack.send(result);
        }
        if failed {
            shared.set_state(ConnectionState::Disconnected).await;
            break;
        }
    }

    let _ = sink.close().await;
    debug!("Session {} writer stopped", id);
}
