//! DCC transfer engine
//!
//! Receives one offered file over a direct TCP connection to the sending
//! peer: stream to a partial file, verify the size, move it into place,
//! and unpack archives down to the target format.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::extract::{available_path, extract_archive};
use super::offer::DccOffer;
use super::state::{TransferPhase, TransferState};
use crate::config::IrcConfig;
use crate::error::{IrcBookError, Result, TransferErrorKind};
use crate::events::{EventBus, ProgressEvent};

/// Read buffer size
const CHUNK_SIZE: usize = 64 * 1024;

/// Bytes between two transfer_progress events
const PROGRESS_STEP: u64 = 256 * 1024;

/// A finished download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalFile {
    /// Primary file: the received payload, or the first extracted member
    pub path: PathBuf,
    /// Bytes received from the peer
    pub size: u64,
    /// SHA-1 of the received payload, hex encoded
    pub sha1: String,
    /// Members extracted from an archive payload
    pub extracted_members: Vec<PathBuf>,
    /// Nickname of the sender, if known
    pub source: Option<String>,
}

/// Receives DCC SEND offers
#[derive(Clone)]
pub struct DccTransferEngine {
    config: Arc<IrcConfig>,
    events: EventBus,
}

impl DccTransferEngine {
    pub fn new(config: Arc<IrcConfig>, events: EventBus) -> Self {
        Self { config, events }
    }

    /// Receive a book, extracting target members from archives
    pub async fn receive(&self, offer: &DccOffer, destination_dir: &Path, cancel: &CancellationToken) -> Result<LocalFile> {
        self.run(offer, destination_dir, cancel, true).await
    }

    /// Receive a file as-is, without archive handling
    pub async fn receive_raw(&self, offer: &DccOffer, destination_dir: &Path, cancel: &CancellationToken) -> Result<LocalFile> {
        self.run(offer, destination_dir, cancel, false).await
    }

    async fn run(&self, offer: &DccOffer, destination_dir: &Path, cancel: &CancellationToken, extract: bool) -> Result<LocalFile> {
        info!("Receiving {} ({} bytes) from {}", offer.filename, offer.size, offer.addr());
        let mut state = TransferState::new(offer.filename.clone(), offer.size);
        state.source = offer.sender.clone();

        let partial_dir = self.config.partial_dir();
        fs::create_dir_all(&partial_dir).await?;
        let temp_path = available_path(&partial_dir, &format!("{}.part", offer.local_name()));
        state.temp_path = Some(temp_path.clone());

        let streamed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IrcBookError::cancelled(format!("transfer of {}", offer.filename))),
            result = self.stream_to_file(offer, &temp_path, &mut state) => result,
        };

        let digest = match streamed {
            Ok(digest) => digest,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&temp_path).await {
                    trace!("No partial file to remove at {}: {}", temp_path.display(), rm);
                }
                state.fail(e.transfer_kind().unwrap_or(TransferErrorKind::IoFailure));
                warn!("Transfer of {} failed: {}", offer.filename, e);
                return Err(e);
            }
        };

        match self.finish(offer, &temp_path, destination_dir, extract, &mut state).await {
            Ok((path, extracted_members)) => {
                state.advance(TransferPhase::Succeeded)?;
                info!("Received {} -> {}", offer.filename, path.display());
                Ok(LocalFile {
                    path,
                    size: state.bytes_received,
                    sha1: digest,
                    extracted_members,
                    source: offer.sender.clone(),
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                state.fail(e.transfer_kind().unwrap_or(TransferErrorKind::IoFailure));
                warn!("Post-processing of {} failed: {}", offer.filename, e);
                Err(e)
            }
        }
    }

    /// Connect to the peer and stream exactly the declared size to `temp_path`
    async fn stream_to_file(&self, offer: &DccOffer, temp_path: &Path, state: &mut TransferState) -> Result<String> {
        let addr = offer.addr();
        let peer = addr.to_string();
        let stall = self.config.stall_timeout();

        let mut socket = timeout(self.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| {
                warn!("DCC connect timeout to {}", addr);
                IrcBookError::transfer_error_with_peer(TransferErrorKind::Stalled, "Timed out connecting to peer", peer.clone())
            })?
            .map_err(|e| {
                error!("Failed to connect to DCC peer {}: {}", addr, e);
                IrcBookError::transfer_error_full(TransferErrorKind::IoFailure, "Failed to connect to peer", peer.clone(), e.to_string())
            })?;
        debug!("Connected to DCC peer {}", addr);
        state.advance(TransferPhase::Transferring)?;

        let mut writer = BufWriter::new(fs::File::create(temp_path).await?);
        let mut hasher = Sha1::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut next_report = PROGRESS_STEP;

        while state.bytes_received < offer.size {
            let want = (offer.size - state.bytes_received).min(buf.len() as u64) as usize;
            let n = match timeout(stall, socket.read(&mut buf[..want])).await {
                Err(_) => {
                    warn!("DCC transfer from {} stalled at {} of {} bytes", addr, state.bytes_received, offer.size);
                    return Err(IrcBookError::transfer_error_with_peer(
                        TransferErrorKind::Stalled,
                        format!("No data for {:?} after {} of {} bytes", stall, state.bytes_received, offer.size),
                        peer,
                    ));
                }
                Ok(Err(e)) => {
                    error!("DCC read from {} failed: {}", addr, e);
                    return Err(IrcBookError::transfer_error_full(
                        TransferErrorKind::IoFailure,
                        "Failed to read from peer",
                        peer,
                        e.to_string(),
                    ));
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
            };

            writer.write_all(&buf[..n]).await?;
            hasher.update(&buf[..n]);
            state.bytes_received += n as u64;
            trace!("Received {} bytes from {} ({:.1}%)", n, addr, state.percent());

            if let Err(e) = send_ack(&mut socket, state.bytes_received, stall, &peer).await {
                warn!("DCC peer {} stopped reading acknowledgements at {} bytes", addr, state.bytes_received);
                return Err(e);
            }

            if state.bytes_received >= next_report || state.bytes_received == offer.size {
                next_report = state.bytes_received + PROGRESS_STEP;
                self.events.emit(ProgressEvent::TransferProgress {
                    filename: offer.filename.clone(),
                    received: state.bytes_received,
                    expected: offer.size,
                });
            }
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        let _ = socket.shutdown().await;

        state.advance(TransferPhase::Verifying)?;
        if state.bytes_received != offer.size {
            warn!("Peer {} closed after {} of {} bytes", addr, state.bytes_received, offer.size);
            return Err(IrcBookError::transfer_error_with_peer(
                TransferErrorKind::Incomplete,
                format!("Received {} of {} bytes", state.bytes_received, offer.size),
                peer,
            ));
        }
        let on_disk = fs::metadata(temp_path).await?.len();
        if on_disk != offer.size {
            error!("Partial file {} holds {} bytes, expected {}", temp_path.display(), on_disk, offer.size);
            return Err(IrcBookError::transfer_error(
                TransferErrorKind::IoFailure,
                format!("Wrote {} of {} bytes", on_disk, offer.size),
            ));
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Move the verified payload into place and unpack archives
    async fn finish(
        &self,
        offer: &DccOffer,
        temp_path: &Path,
        destination_dir: &Path,
        extract: bool,
        state: &mut TransferState,
    ) -> Result<(PathBuf, Vec<PathBuf>)> {
        fs::create_dir_all(destination_dir).await?;
        let final_path = available_path(destination_dir, &offer.local_name());
        move_file(temp_path, &final_path).await?;

        let target = self.config.target_extension.to_ascii_lowercase();
        let is_archive = offer.local_name().to_ascii_lowercase().ends_with(".zip") && target != "zip";
        if !extract || !is_archive {
            return Ok((final_path, Vec::new()));
        }

        state.advance(TransferPhase::Extracting)?;
        let extracted = extract_archive(final_path.clone(), destination_dir.to_path_buf(), target.clone()).await;
        // The archive itself is never the result
        let _ = fs::remove_file(&final_path).await;
        let extracted = extracted?;

        match extracted.first() {
            Some(first) => Ok((first.clone(), extracted.clone())),
            None => {
                warn!("Archive {} holds no .{} members", offer.filename, target);
                Err(IrcBookError::transfer_error(
                    TransferErrorKind::NoMatchingContent,
                    format!("Archive {} contains no .{} file", offer.filename, target),
                ))
            }
        }
    }
}

/// Send the cumulative 32-bit acknowledgement senders wait on. A peer that
/// stops reading them for `stall` counts as stalled.
async fn send_ack<W: AsyncWrite + Unpin>(writer: &mut W, received: u64, stall: Duration, peer: &str) -> Result<()> {
    let ack = (received & 0xFFFF_FFFF) as u32;
    match timeout(stall, writer.write_all(&ack.to_be_bytes())).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            trace!("DCC ack to {} failed: {}", peer, e);
            Ok(())
        }
        Err(_) => Err(IrcBookError::transfer_error_with_peer(
            TransferErrorKind::Stalled,
            format!("Acknowledgement blocked for {:?} after {} bytes", stall, received),
            peer,
        )),
    }
}

/// Rename, falling back to copy and delete across filesystems
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    debug!("Rename failed, copying {} to {}", from.display(), to.display());
    fs::copy(from, to).await?;
    fs::remove_file(from).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dcc_offer, spawn_dcc_peer, test_config, zip_bytes, PeerBehavior};

    fn engine(dir: &Path) -> (DccTransferEngine, Arc<IrcConfig>) {
        let config = Arc::new(test_config(dir));
        (DccTransferEngine::new(config.clone(), EventBus::new()), config)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_receive_writes_exactly_declared_size() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, config) = engine(dir.path());
        let data = payload(300_000);
        let addr = spawn_dcc_peer(data.clone(), PeerBehavior::Complete).await;
        let offer = dcc_offer("Example Book.epub", addr, data.len() as u64);

        let file = engine.receive(&offer, &config.download_dir, &CancellationToken::new()).await.unwrap();
        assert_eq!(file.size, data.len() as u64);
        assert_eq!(std::fs::read(&file.path).unwrap(), data);
        assert_eq!(file.sha1, hex::encode(Sha1::digest(&data)));
        assert!(file.extracted_members.is_empty());
        assert_eq!(std::fs::read_dir(config.partial_dir()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_ack_is_a_stall() {
        // Room for exactly one ack, and nobody reads it
        let (mut ours, _peer) = tokio::io::duplex(4);
        send_ack(&mut ours, 10, Duration::from_secs(5), "10.0.0.1:2050").await.unwrap();
        let err = send_ack(&mut ours, 20, Duration::from_secs(5), "10.0.0.1:2050").await.unwrap_err();
        assert_eq!(err.transfer_kind(), Some(TransferErrorKind::Stalled));
    }

    #[tokio::test]
    async fn test_peer_ignoring_acks_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, config) = engine(dir.path());
        let data = payload(200_000);
        let addr = spawn_dcc_peer(data.clone(), PeerBehavior::IgnoreAcks).await;
        let offer = dcc_offer("Example Book.epub", addr, data.len() as u64);

        let file = engine.receive(&offer, &config.download_dir, &CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read(&file.path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_stall_fails_and_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, config) = engine(dir.path());
        let addr = spawn_dcc_peer(payload(10_000), PeerBehavior::Stall(4_000)).await;
        let offer = dcc_offer("Example Book.epub", addr, 10_000);

        let err = engine.receive(&offer, &config.download_dir, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.transfer_kind(), Some(TransferErrorKind::Stalled));
        assert_eq!(std::fs::read_dir(config.partial_dir()).unwrap().count(), 0);
        assert!(!config.download_dir.join("Example Book.epub").exists());
    }

    #[tokio::test]
    async fn test_early_close_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, config) = engine(dir.path());
        let addr = spawn_dcc_peer(payload(10_000), PeerBehavior::CloseEarly(2_500)).await;
        let offer = dcc_offer("Example Book.epub", addr, 10_000);

        let err = engine.receive(&offer, &config.download_dir, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.transfer_kind(), Some(TransferErrorKind::Incomplete));
        assert_eq!(std::fs::read_dir(config.partial_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_zip_extracts_only_target_members() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, config) = engine(dir.path());
        let archive = zip_bytes(&[("book.epub", b"the book"), ("cover.jpg", b"a cover")]);
        let addr = spawn_dcc_peer(archive.clone(), PeerBehavior::Complete).await;
        let offer = dcc_offer("bundle.zip", addr, archive.len() as u64);

        let file = engine.receive(&offer, &config.download_dir, &CancellationToken::new()).await.unwrap();
        let book = config.download_dir.join("book.epub");
        assert_eq!(file.path, book);
        assert_eq!(file.extracted_members, vec![book.clone()]);
        assert_eq!(std::fs::read(&book).unwrap(), b"the book");
        assert!(!config.download_dir.join("cover.jpg").exists());
        assert!(!config.download_dir.join("bundle.zip").exists());
    }

    #[tokio::test]
    async fn test_zip_without_target_is_no_matching_content() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, config) = engine(dir.path());
        let archive = zip_bytes(&[("cover.jpg", b"a cover")]);
        let addr = spawn_dcc_peer(archive.clone(), PeerBehavior::Complete).await;
        let offer = dcc_offer("bundle.zip", addr, archive.len() as u64);

        let err = engine.receive(&offer, &config.download_dir, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.transfer_kind(), Some(TransferErrorKind::NoMatchingContent));
        assert_eq!(std::fs::read_dir(&config.download_dir).unwrap().filter(|e| {
            e.as_ref().map(|e| e.path().is_file()).unwrap_or(false)
        }).count(), 0);
    }

    #[tokio::test]
    async fn test_receive_raw_keeps_archive() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, config) = engine(dir.path());
        let archive = zip_bytes(&[("results.txt", b"!Ook a.epub\n")]);
        let addr = spawn_dcc_peer(archive.clone(), PeerBehavior::Complete).await;
        let offer = dcc_offer("SearchOok_results_for_x.txt.zip", addr, archive.len() as u64);

        let file = engine.receive_raw(&offer, &config.download_dir, &CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read(&file.path).unwrap(), archive);
    }

    #[tokio::test]
    async fn test_cancel_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, config) = engine(dir.path());
        let addr = spawn_dcc_peer(payload(10_000), PeerBehavior::Stall(1_000)).await;
        let offer = dcc_offer("Example Book.epub", addr, 10_000);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let err = engine.receive(&offer, &config.download_dir, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(std::fs::read_dir(config.partial_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, config) = engine(dir.path());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let offer = dcc_offer("Example Book.epub", addr, 100);

        let err = engine.receive(&offer, &config.download_dir, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.transfer_kind(), Some(TransferErrorKind::IoFailure));
    }
}
