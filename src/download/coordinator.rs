//! Download coordinator
//!
//! Walks a ranked candidate list: send the candidate's trigger, wait for
//! the matching DCC offer, hand it to the transfer engine. Any per-attempt
//! failure moves on to the next candidate; only running out of candidates
//! is terminal.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::IrcConfig;
use crate::error::{IrcBookError, Result, SearchErrorKind, TransferErrorKind};
use crate::events::{EventBus, ProgressEvent};
use crate::search::Candidate;
use crate::session::{Session, SessionEvent, SessionId, SessionRegistry};
use crate::transfer::{DccOffer, DccTransferEngine, LocalFile};

/// Drives transfers with candidate fallback
#[derive(Clone)]
pub struct DownloadCoordinator {
    registry: Arc<SessionRegistry>,
    config: Arc<IrcConfig>,
    events: EventBus,
    engine: DccTransferEngine,
}

impl DownloadCoordinator {
    pub fn new(registry: Arc<SessionRegistry>, events: EventBus) -> Self {
        let config = registry.manager().config().clone();
        let engine = DccTransferEngine::new(config.clone(), events.clone());
        Self { registry, config, events, engine }
    }

    /// Try `candidates` in order until one transfer succeeds. The outcome is
    /// reported once on the event bus: `succeeded` or `failed`.
    pub async fn download_with_fallback(
        &self,
        session_id: &SessionId,
        candidates: &[Candidate],
        destination_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<LocalFile> {
        match self.run(session_id, candidates, destination_dir, cancel).await {
            Ok(file) => {
                self.events.emit(ProgressEvent::Succeeded {
                    path: file.path.clone(),
                    extracted: file.extracted_members.clone(),
                });
                Ok(file)
            }
            Err(e) => {
                error!("Download failed: {}", e);
                self.events.emit(ProgressEvent::failed(&e));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        session_id: &SessionId,
        candidates: &[Candidate],
        destination_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<LocalFile> {
        if candidates.is_empty() {
            return Err(IrcBookError::search_error(SearchErrorKind::NoResults, "No candidates to download"));
        }
        let session = self.registry.get(session_id).await?;
        let total = self
            .config
            .max_download_attempts
            .map_or(candidates.len(), |cap| cap.clamp(1, candidates.len()));

        let mut last_error = None;
        for (index, candidate) in candidates.iter().take(total).enumerate() {
            let attempt = index + 1;
            info!("Download attempt {}/{}: {} from {}", attempt, total, candidate.filename, candidate.server);
            self.events.emit(ProgressEvent::Downloading {
                server: candidate.server.clone(),
                filename: candidate.filename.clone(),
                attempt,
                total,
            });

            match self.attempt(&session, candidate, destination_dir, cancel).await {
                Ok(file) => {
                    session.record_download();
                    info!("Downloaded {} from {} on attempt {}", file.path.display(), candidate.server, attempt);
                    return Ok(file);
                }
                Err(e) if is_terminal(&e) => return Err(e),
                Err(e) => {
                    warn!("Attempt {} ({}) failed: {}", attempt, candidate.server, e);
                    self.events.emit(ProgressEvent::AttemptFailed {
                        server: candidate.server.clone(),
                        reason: e.reason().to_string(),
                    });
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.unwrap_or_else(|| {
            IrcBookError::transfer_error(TransferErrorKind::Timeout, "No download attempt was made")
        });
        Err(IrcBookError::AllCandidatesFailed {
            attempts: total,
            last: Box::new(last),
        })
    }

    /// One candidate: trigger, offer, transfer
    async fn attempt(
        &self,
        session: &Session,
        candidate: &Candidate,
        destination_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<LocalFile> {
        let mut inbound = session.subscribe();
        session.privmsg(&self.config.channel, candidate.trigger(), cancel).await?;
        let offer = self.wait_for_offer(&mut inbound, candidate, cancel).await?;

        // The transfer gets its own task; closing the session cancels it
        let token = session.linked_token(cancel);
        let engine = self.engine.clone();
        let destination = destination_dir.to_path_buf();
        let transfer_token = token.clone();
        let handle = tokio::spawn(async move { engine.receive(&offer, &destination, &transfer_token).await });

        let result = handle.await.map_err(|e| {
            IrcBookError::transfer_error(TransferErrorKind::IoFailure, format!("Transfer task failed: {}", e))
        });
        token.cancel();
        result?
    }

    /// Wait for the DCC SEND answering `candidate`'s trigger
    async fn wait_for_offer(
        &self,
        inbound: &mut broadcast::Receiver<SessionEvent>,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<DccOffer> {
        let deadline = Instant::now() + self.config.offer_timeout();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IrcBookError::cancelled(format!("offer wait for {}", candidate.filename))),
                _ = sleep_until(deadline) => {
                    warn!("No DCC offer from {} within {:?}", candidate.server, self.config.offer_timeout());
                    return Err(IrcBookError::transfer_error_with_peer(
                        TransferErrorKind::Timeout,
                        format!("No offer for {} within {:?}", candidate.filename, self.config.offer_timeout()),
                        candidate.server.clone(),
                    ));
                }
                event = inbound.recv() => event,
            };

            match event {
                Ok(SessionEvent::DccOffer { from, payload }) => {
                    let from_server = from.eq_ignore_ascii_case(&candidate.server);
                    match DccOffer::parse(&payload) {
                        Ok(offer) if from_server || same_file(&offer.filename, &candidate.filename) => {
                            debug!("Offer {} from {} answers {}", offer.filename, from, candidate.trigger());
                            return Ok(offer.with_sender(from));
                        }
                        Ok(offer) => debug!("Ignoring unrelated offer {} from {}", offer.filename, from),
                        Err(e) if from_server => return Err(e.with_context(format!("offer from {}", from))),
                        Err(e) => debug!("Ignoring bad offer from {}: {}", from, e),
                    }
                }
                Ok(SessionEvent::Message { from, text, .. }) => trace!("While waiting for offer, {}: {}", from, text),
                Ok(SessionEvent::Disconnected { reason }) => {
                    return Err(IrcBookError::session_error(format!("Disconnected while waiting for offer: {}", reason)));
                }
                Err(RecvError::Lagged(missed)) => warn!("Offer wait missed {} inbound events", missed),
                Err(RecvError::Closed) => return Err(IrcBookError::session_error("Session closed while waiting for offer")),
            }
        }
    }
}

/// Failures that no other candidate can fix
fn is_terminal(err: &IrcBookError) -> bool {
    matches!(err, IrcBookError::Cancelled { .. } | IrcBookError::Session { .. } | IrcBookError::Connection { .. })
}

/// Bots often replace spaces with underscores in offered names
fn same_file(offered: &str, requested: &str) -> bool {
    let norm = |s: &str| s.trim().to_lowercase().replace('_', " ");
    norm(offered) == norm(requested)
}
