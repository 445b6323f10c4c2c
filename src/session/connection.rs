//! Connection manager
//!
//! Opens the transport (TLS or plain), registers with NICK/USER, survives
//! nickname collisions, joins the search channel and hands the result to
//! a [`Session`]. Retries with bounded exponential backoff live here and
//! nowhere else.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::backoff::RetryPolicy;
use super::handle::{IrcFramed, Session, SessionParams};
use super::nickname::{random_nickname, with_suffix};
use super::rate_limit::RateLimiter;
use super::state::SessionId;
use crate::config::IrcConfig;
use crate::error::{ConnectionErrorKind, IrcBookError, Result};
use crate::events::{EventBus, ProgressEvent};
use crate::irc::{ctcp, reply, Ctcp, IrcLineCodec, IrcMessage};

/// Byte stream usable as an IRC transport
pub trait IrcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IrcStream for T {}

/// Type-erased transport, plain or TLS
pub type BoxedStream = Box<dyn IrcStream>;

/// An open transport, before registration
pub struct DialedStream {
    pub stream: BoxedStream,
    pub address: String,
    pub tls: bool,
}

/// Opens the raw transport to the IRC server
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, config: &IrcConfig) -> Result<DialedStream>;
}

/// TCP dialer with optional TLS and plain-port fallback
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl TcpDialer {
    async fn connect_tcp(address: &str, connect_timeout: Duration) -> Result<TcpStream> {
        debug!("Opening TCP connection to {}", address);
        let stream = timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                warn!("Connection timeout to {}", address);
                IrcBookError::connection_error_full(ConnectionErrorKind::Timeout, "Connection timeout", address, format!("{:?}", connect_timeout))
            })?
            .map_err(|e| {
                error!("Failed to connect to {}: {}", address, e);
                let kind = if e.kind() == std::io::ErrorKind::TimedOut {
                    ConnectionErrorKind::Timeout
                } else {
                    ConnectionErrorKind::Refused
                };
                IrcBookError::connection_error_full(kind, "Failed to connect", address, e.to_string())
            })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    async fn dial_tls(config: &IrcConfig, address: &str) -> Result<BoxedStream> {
        let tcp = Self::connect_tcp(address, config.connect_timeout()).await?;
        let connector = TlsConnector::from(Arc::new(tls_client_config(config.tls_verify)));
        let server_name = rustls::pki_types::ServerName::try_from(config.server.clone()).map_err(|e| {
            IrcBookError::config_error_with_field(format!("Invalid TLS server name '{}': {}", config.server, e), "server")
        })?;

        let tls = timeout(config.connect_timeout(), connector.connect(server_name, tcp))
            .await
            .map_err(|_| {
                warn!("TLS handshake timeout with {}", address);
                IrcBookError::connection_error_full(ConnectionErrorKind::Timeout, "TLS handshake timeout", address, "handshake")
            })?
            .map_err(|e| {
                error!("TLS handshake with {} failed: {}", address, e);
                IrcBookError::connection_error_full(ConnectionErrorKind::Refused, "TLS handshake failed", address, e.to_string())
            })?;
        debug!("TLS handshake complete with {}", address);
        Ok(Box::new(tls))
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, config: &IrcConfig) -> Result<DialedStream> {
        let address = config.address();
        if !config.tls {
            let stream = Self::connect_tcp(&address, config.connect_timeout()).await?;
            return Ok(DialedStream { stream: Box::new(stream), address, tls: false });
        }

        match Self::dial_tls(config, &address).await {
            Ok(stream) => Ok(DialedStream { stream, address, tls: true }),
            Err(e) => {
                let Some(port) = config.plain_fallback_port else {
                    return Err(e);
                };
                let plain = format!("{}:{}", config.server, port);
                warn!("TLS connection to {} failed ({}), falling back to plain {}", address, e, plain);
                let stream = Self::connect_tcp(&plain, config.connect_timeout()).await?;
                Ok(DialedStream { stream: Box::new(stream), address: plain, tls: false })
            }
        }
    }
}

/// rustls client config: native roots, or no verification at all
fn tls_client_config(verify: bool) -> ClientConfig {
    if !verify {
        warn!("TLS certificate verification disabled");
        return ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
            .with_no_client_auth();
    }

    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            warn!("Failed to add root cert: {}", e);
        }
    }
    for e in &native.errors {
        warn!("Error loading native certs: {}", e);
    }
    debug!("Loaded {} trusted root certificates", roots.len());
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Establishes registered sessions
#[derive(Clone)]
pub struct ConnectionManager {
    config: Arc<IrcConfig>,
    dialer: Arc<dyn Dialer>,
    events: EventBus,
    policy: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(config: Arc<IrcConfig>, events: EventBus) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer), events)
    }

    pub fn with_dialer(config: Arc<IrcConfig>, dialer: Arc<dyn Dialer>, events: EventBus) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self { config, dialer, events, policy }
    }

    pub fn config(&self) -> &Arc<IrcConfig> {
        &self.config
    }

    /// Connect and register, retrying transport failures with backoff.
    /// Registration rejections are not retried.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<Arc<Session>> {
        let address = self.config.address();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            info!("Connecting to {} (attempt {}/{})", address, attempt, self.policy.max_attempts);
            self.events.emit(ProgressEvent::Connecting { server: address.clone(), attempt });

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(IrcBookError::cancelled("connect")),
                result = self.establish() => result,
            };

            match result {
                Ok(session) => {
                    self.events.emit(ProgressEvent::Registered {
                        session_id: session.id().to_string(),
                        nickname: session.nickname().to_string(),
                    });
                    return Ok(session);
                }
                Err(e) if is_retryable(&e) && self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!("Connection attempt {} to {} failed: {}; retrying in {:?}", attempt, address, e, delay);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let e = IrcBookError::cancelled("connect");
                            self.events.emit(ProgressEvent::failed(&e));
                            return Err(e);
                        }
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!("Giving up on {} after {} attempt(s): {}", address, attempt, e);
                    self.events.emit(ProgressEvent::failed(&e));
                    return Err(e);
                }
            }
        }
    }

    /// Whether a session can be reused
    pub async fn is_healthy(&self, session: &Session) -> bool {
        session.is_healthy().await
    }

    /// One full attempt: dial, register, join
    async fn establish(&self) -> Result<Arc<Session>> {
        let dialed = self.dialer.dial(&self.config).await?;
        info!("Connected to {} (tls: {})", dialed.address, dialed.tls);
        let mut framed = Framed::new(dialed.stream, IrcLineCodec::new());

        let nickname = timeout(self.config.registration_timeout(), self.register(&mut framed))
            .await
            .map_err(|_| {
                warn!("Registration with {} timed out", dialed.address);
                IrcBookError::connection_error_full(
                    ConnectionErrorKind::Timeout,
                    "No welcome from server",
                    dialed.address.clone(),
                    "registration",
                )
            })??;
        info!("Registered with {} as {}", dialed.address, nickname);

        let mut limiter = RateLimiter::new(self.config.min_command_interval());
        let backlog = self.join_channel(&mut framed, &nickname, &mut limiter).await?;

        let params = SessionParams {
            id: SessionId::generate(),
            address: dialed.address,
            tls: dialed.tls,
            nickname,
            version_reply: self.config.version_reply.clone(),
            keepalive_interval: self.config.keepalive_interval(),
            stale_after: self.config.stale_after(),
        };
        Ok(Session::start(framed, params, backlog, limiter))
    }

    /// NICK/USER and wait for the welcome numeric
    async fn register(&self, framed: &mut IrcFramed) -> Result<String> {
        let base = self.config.nickname.clone().unwrap_or_else(random_nickname);
        let mut nickname = base.clone();
        let mut collisions = 0u32;

        debug!("Registering as {}", nickname);
        write_line(framed, IrcMessage::nick(&nickname)).await?;
        write_line(framed, IrcMessage::user(&nickname, &nickname)).await?;

        loop {
            let message = read_message(framed, "registration").await?;
            match message.command.as_str() {
                reply::RPL_WELCOME | reply::RPL_MYINFO => {
                    // The server's view of our nick wins
                    if let Some(assigned) = message.param(0).filter(|n| *n != "*") {
                        nickname = assigned.to_string();
                    }
                    return Ok(nickname);
                }
                reply::ERR_NICKNAMEINUSE | reply::ERR_NICKCOLLISION | reply::ERR_ERRONEUSNICKNAME => {
                    collisions += 1;
                    if collisions > self.config.nick_retries {
                        error!("Nickname {} rejected, no retries left", nickname);
                        return Err(IrcBookError::connection_error(
                            ConnectionErrorKind::RegistrationFailed,
                            format!("Nickname rejected {} time(s): {}", collisions, message.trailing().unwrap_or("")),
                        ));
                    }
                    let retry = with_suffix(&base, self.config.nickname_suffix_digits);
                    warn!("Nickname {} unavailable ({}), retrying as {}", nickname, message.command, retry);
                    nickname = retry;
                    write_line(framed, IrcMessage::nick(&nickname)).await?;
                }
                "PING" => {
                    write_line(framed, IrcMessage::pong(message.trailing().unwrap_or_default())).await?;
                }
                "ERROR" => {
                    let reason = message.trailing().unwrap_or("closed during registration").to_string();
                    error!("Server refused registration: {}", reason);
                    return Err(IrcBookError::connection_error(ConnectionErrorKind::RegistrationFailed, reason));
                }
                "PRIVMSG" => {
                    // Networks probe VERSION before welcoming; unanswered probes get the client dropped
                    if let (Some(from), Some(text)) = (message.source_nick(), message.param(1)) {
                        if Ctcp::parse(text).is_some_and(|c| c.is_version()) {
                            info!("Answering CTCP VERSION from {} during registration", from);
                            write_line(framed, ctcp::version_reply(from, &self.config.version_reply)).await?;
                        }
                    }
                }
                _ => trace!("Registration: ignoring {}", message.command),
            }
        }
    }

    /// JOIN the channel and wait for the echo or end of NAMES. Returns the
    /// other lines read meanwhile so the session worker can handle them.
    async fn join_channel(&self, framed: &mut IrcFramed, nickname: &str, limiter: &mut RateLimiter) -> Result<Vec<IrcMessage>> {
        let channel = &self.config.channel;
        info!("Joining {}", channel);
        write_line(framed, IrcMessage::join(channel)).await?;
        limiter.mark_sent();

        let deadline = Instant::now() + self.config.join_timeout();
        let mut backlog = Vec::new();
        loop {
            let message = match tokio::time::timeout_at(deadline, read_message(framed, "join")).await {
                Ok(message) => message?,
                Err(_) => {
                    warn!("No JOIN confirmation for {} within {:?}", channel, self.config.join_timeout());
                    return Ok(backlog);
                }
            };

            let for_channel = |i: usize| message.param(i).is_some_and(|c| c.eq_ignore_ascii_case(channel));
            let joined = (message.command == "JOIN"
                && message.source_nick().is_some_and(|n| n.eq_ignore_ascii_case(nickname))
                && for_channel(0))
                || (message.command == reply::RPL_ENDOFNAMES && for_channel(1));
            if joined {
                info!("Joined {}", channel);
                return Ok(backlog);
            }
            if message.command == "ERROR" {
                let reason = message.trailing().unwrap_or("closed during join").to_string();
                return Err(IrcBookError::connection_error(ConnectionErrorKind::RegistrationFailed, reason));
            }
            backlog.push(message);
        }
    }
}

/// Only transport-level failures are worth another connection attempt
fn is_retryable(err: &IrcBookError) -> bool {
    matches!(
        err,
        IrcBookError::Connection { kind: ConnectionErrorKind::Refused | ConnectionErrorKind::Timeout, .. }
    )
}

async fn write_line(framed: &mut IrcFramed, message: IrcMessage) -> Result<()> {
    let line = message.to_line();
    trace!("-> {}", line);
    framed.send(line).await.map_err(|e| {
        IrcBookError::connection_error(ConnectionErrorKind::Refused, format!("Failed to write to server: {}", e))
    })
}

async fn read_message(framed: &mut IrcFramed, phase: &str) -> Result<IrcMessage> {
    loop {
        match framed.next().await {
            None => {
                return Err(IrcBookError::connection_error(
                    ConnectionErrorKind::RegistrationFailed,
                    format!("Server closed the connection during {}", phase),
                ))
            }
            Some(Err(e)) => {
                return Err(IrcBookError::connection_error(
                    ConnectionErrorKind::Refused,
                    format!("Read failed during {}: {}", phase, e),
                ))
            }
            Some(Ok(line)) => {
                trace!("<- {}", line);
                if let Some(message) = IrcMessage::parse(&line) {
                    return Ok(message);
                }
            }
        }
    }
}
