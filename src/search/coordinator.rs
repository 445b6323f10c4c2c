//! Search coordinator
//!
//! Sends `<bot> <terms>` to the channel through a session, then collects
//! result lines and DCC-delivered listings for the response window. The
//! collected candidates are filtered, narrowed by scope and capped.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::listing::{is_result_listing, read_listing_async};
use super::parser::{Candidate, SearchResultParser};
use super::query::SearchQuery;
use super::relevance::select_for_scope;
use crate::config::IrcConfig;
use crate::error::{IrcBookError, Result, SearchErrorKind};
use crate::events::{EventBus, ProgressEvent};
use crate::session::{Session, SessionEvent, SessionId, SessionRegistry};
use crate::transfer::{DccOffer, DccTransferEngine};

/// Phrases search bots use when nothing matched
const NO_MATCH_PHRASES: &[&str] = &["returned no matches", "no results", "no matches found"];

/// Why the response window closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowEnd {
    Elapsed,
    ListingReceived,
    NoMatches,
}

/// Runs searches on registry sessions
#[derive(Clone)]
pub struct SearchCoordinator {
    registry: Arc<SessionRegistry>,
    config: Arc<IrcConfig>,
    events: EventBus,
    parser: SearchResultParser,
    engine: DccTransferEngine,
}

impl SearchCoordinator {
    pub fn new(registry: Arc<SessionRegistry>, events: EventBus) -> Self {
        let config = registry.manager().config().clone();
        let parser = SearchResultParser::new(config.target_extension.clone());
        let engine = DccTransferEngine::new(config.clone(), events.clone());
        Self { registry, config, events, parser, engine }
    }

    pub fn parser(&self) -> &SearchResultParser {
        &self.parser
    }

    /// Search through `session_id` and return ranked candidates. Failures
    /// are reported once on the event bus and are not retried.
    pub async fn search(&self, session_id: &SessionId, query: &SearchQuery, cancel: &CancellationToken) -> Result<Vec<Candidate>> {
        match self.run(session_id, query, cancel).await {
            Ok(candidates) => Ok(candidates),
            Err(e) => {
                warn!("Search for '{}' failed: {}", query, e);
                self.events.emit(ProgressEvent::failed(&e));
                Err(e)
            }
        }
    }

    async fn run(&self, session_id: &SessionId, query: &SearchQuery, cancel: &CancellationToken) -> Result<Vec<Candidate>> {
        query.validate()?;
        let session = self.registry.get(session_id).await?;

        // Subscribe before sending so no early answer is missed
        let mut inbound = session.subscribe();
        let command = format!("{} {}", self.config.search_bot, query.terms());
        self.events.emit(ProgressEvent::Searching {
            session_id: session_id.to_string(),
            query: query.terms(),
        });

        info!("Searching on {}: {}", session_id, command);
        session.privmsg(&self.config.channel, &command, cancel).await?;
        session.record_search();

        let deadline = Instant::now() + self.config.response_window();
        let mut collected = Vec::new();
        let end = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IrcBookError::cancelled(format!("search '{}'", query))),
                _ = sleep_until(deadline) => break WindowEnd::Elapsed,
                event = inbound.recv() => event,
            };

            match event {
                Ok(SessionEvent::Message { from, text, notice, .. }) => {
                    if let Some(candidate) = self.parser.parse(&text) {
                        trace!("Result from {}: {}", from, candidate.filename);
                        collected.push(candidate);
                    } else if notice && is_no_match_notice(&text) {
                        info!("{} reports no matches for '{}'", from, query);
                        break WindowEnd::NoMatches;
                    }
                }
                Ok(SessionEvent::DccOffer { from, payload }) => {
                    if self.collect_listing(&session, &from, &payload, &mut collected, deadline, cancel).await? {
                        break WindowEnd::ListingReceived;
                    }
                }
                Ok(SessionEvent::Disconnected { reason }) => {
                    error!("Session {} dropped during search: {}", session_id, reason);
                    return Err(IrcBookError::session_error_with_id(
                        format!("Disconnected during search: {}", reason),
                        session_id.as_str(),
                    ));
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Search on {} missed {} inbound events", session_id, missed);
                }
                Err(RecvError::Closed) => {
                    return Err(IrcBookError::session_error_with_id("Session closed during search", session_id.as_str()));
                }
            }
        };
        debug!("Response window for '{}' closed ({:?}) with {} raw candidates", query, end, collected.len());

        if collected.is_empty() {
            let kind = match end {
                WindowEnd::Elapsed => SearchErrorKind::Timeout,
                WindowEnd::ListingReceived | WindowEnd::NoMatches => SearchErrorKind::NoResults,
            };
            return Err(IrcBookError::search_error_with_query(kind, "No candidates received", query.terms()));
        }

        let ranked = self.rank(collected, query);
        if ranked.is_empty() {
            return Err(IrcBookError::search_error_with_query(
                SearchErrorKind::NoResults,
                "No candidates survived filtering",
                query.terms(),
            ));
        }

        info!("Search '{}' returned {} candidates", query, ranked.len());
        self.events.emit(ProgressEvent::ResultCount {
            session_id: session_id.to_string(),
            count: ranked.len(),
        });
        Ok(ranked)
    }

    /// Filter by format, narrow by scope and cap
    pub fn rank(&self, candidates: Vec<Candidate>, query: &SearchQuery) -> Vec<Candidate> {
        let filtered = self.parser.filter(candidates, query.epub_only);
        let mut selected = select_for_scope(filtered, query);
        selected.truncate(query.result_cap(self.config.max_results));
        selected
    }

    /// Fetch a result listing offered over DCC. Returns whether one was read;
    /// unrelated or broken offers are skipped. The transfer is abandoned when
    /// the response window closes.
    async fn collect_listing(
        &self,
        session: &Session,
        from: &str,
        payload: &str,
        collected: &mut Vec<Candidate>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let offer = match DccOffer::parse(payload) {
            Ok(offer) => offer.with_sender(from),
            Err(e) => {
                debug!("Ignoring DCC request from {}: {}", from, e);
                return Ok(false);
            }
        };
        if !is_result_listing(&offer.filename) {
            debug!("Ignoring non-listing DCC offer {} from {}", offer.filename, from);
            return Ok(false);
        }

        info!("Receiving result listing {} from {}", offer.filename, from);
        let listings_dir: PathBuf = self.config.partial_dir().join("listings");
        let token = session.linked_token(cancel);
        let receive = self.engine.receive_raw(&offer, &listings_dir, &token);
        tokio::pin!(receive);
        let received = tokio::select! {
            result = &mut receive => result,
            _ = sleep_until(deadline) => {
                warn!("Result listing {} still incomplete when the response window closed", offer.filename);
                // Cancelling lets the engine remove its partial file
                token.cancel();
                receive.await
            }
        };
        token.cancel();

        let file = match received {
            Ok(file) => file,
            Err(e) if e.is_cancelled() && cancel.is_cancelled() => return Err(e),
            Err(e) => {
                warn!("Result listing {} failed: {}", offer.filename, e);
                return Ok(false);
            }
        };

        let parsed = read_listing_async(file.path.clone(), self.parser.clone()).await;
        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            debug!("Could not remove listing {}: {}", file.path.display(), e);
        }
        match parsed {
            Ok(candidates) => {
                collected.extend(candidates);
                Ok(true)
            }
            Err(e) => {
                warn!("Unreadable result listing {}: {}", offer.filename, e);
                Ok(false)
            }
        }
    }
}

fn is_no_match_notice(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    NO_MATCH_PHRASES.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionManager;
    use crate::test_support::{offer_payload, server_config, spawn_dcc_peer, zip_bytes, FakeIrcServer, FakeServerOptions, PeerBehavior};

    const QUERY: &str = "@search Jane Doe Example Book";

    fn bot_lines(lines: &[&str]) -> Vec<String> {
        lines
            .iter()
            .map(|l| format!(":SearchBot!bot@loopback NOTICE {{nick}} :{}", l))
            .collect()
    }

    async fn setup(options: FakeServerOptions, dir: &std::path::Path) -> (FakeIrcServer, SearchCoordinator, SessionId, EventBus) {
        setup_with(options, dir, |_| {}).await
    }

    async fn setup_with(
        options: FakeServerOptions,
        dir: &std::path::Path,
        tweak: impl FnOnce(&mut IrcConfig),
    ) -> (FakeIrcServer, SearchCoordinator, SessionId, EventBus) {
        let server = FakeIrcServer::start(options).await;
        let events = EventBus::new();
        let mut config = server_config(dir, server.addr);
        tweak(&mut config);
        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new(ConnectionManager::new(config, events.clone())));
        let id = registry.acquire(&CancellationToken::new()).await.unwrap();
        (server, SearchCoordinator::new(registry, events.clone()), id, events)
    }

    #[tokio::test]
    async fn test_title_search_returns_best_per_server() {
        let dir = tempfile::tempdir().unwrap();
        let options = FakeServerOptions {
            responders: vec![(
                QUERY.to_string(),
                bot_lines(&[
                    "!PeerA Jane Doe - Example Book.epub ::INFO:: 1.1MB",
                    "!PeerB Jane Doe - Example Book.mobi ::INFO:: 800KB",
                    "Searching, please wait",
                    "!PeerC Jane Doe - Example Book.epub ::INFO:: 878.9KB",
                    "!PeerD Jane Doe - Another Story.epub ::INFO:: 300KB",
                ]),
            )],
            ..Default::default()
        };
        let (server, search, id, events) = setup(options, dir.path()).await;
        let mut rx = events.subscribe();

        let query = SearchQuery::title("Jane Doe", "Example Book").with_epub_only(true);
        let results = search.search(&id, &query, &CancellationToken::new()).await.unwrap();

        let servers: Vec<&str> = results.iter().map(|c| c.server.as_str()).collect();
        assert_eq!(servers, vec!["PeerA", "PeerC"]);
        assert_eq!(results[0].trigger(), "!PeerA Jane Doe - Example Book.epub");
        assert_eq!(server.commands("PRIVMSG"), vec![format!("PRIVMSG #ebooks :{}", QUERY)]);

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(names, vec!["searching", "result_count"]);
    }

    #[tokio::test]
    async fn test_author_search_ranks_target_first() {
        let dir = tempfile::tempdir().unwrap();
        let options = FakeServerOptions {
            responders: vec![(
                "@search Jane Doe".to_string(),
                bot_lines(&[
                    "!PeerB Jane Doe - Example Book.mobi ::INFO:: 800KB",
                    "!PeerA Jane Doe - Example Book.epub ::INFO:: 1.1MB",
                    "!PeerC Jane Doe - Another Story.pdf ::INFO:: 2MB",
                ]),
            )],
            ..Default::default()
        };
        let (_server, search, id, _events) = setup(options, dir.path()).await;

        let query = SearchQuery::author("Jane Doe");
        let results = search.search(&id, &query, &CancellationToken::new()).await.unwrap();
        let files: Vec<&str> = results.iter().map(|c| c.filename.as_str()).collect();
        assert_eq!(files, vec!["Jane Doe - Example Book.epub", "Jane Doe - Another Story.pdf"]);
    }

    #[tokio::test]
    async fn test_silence_is_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (_server, search, id, events) = setup(FakeServerOptions::default(), dir.path()).await;
        let mut rx = events.subscribe();

        let err = search
            .search(&id, &SearchQuery::author("Nobody"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IrcBookError::Search { kind: SearchErrorKind::Timeout, .. }));

        let mut failed = 0;
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::Failed { reason, .. } = event {
                assert_eq!(reason, "timeout");
                failed += 1;
            }
        }
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_no_match_notice_ends_window() {
        let dir = tempfile::tempdir().unwrap();
        let options = FakeServerOptions {
            responders: vec![(
                "@search Nobody".to_string(),
                bot_lines(&["Sorry, your search for \"Nobody\" returned no matches."]),
            )],
            ..Default::default()
        };
        let (_server, search, id, _events) = setup(options, dir.path()).await;

        let started = Instant::now();
        let err = search
            .search(&id, &SearchQuery::author("Nobody"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "no_results");
        assert!(started.elapsed() < std::time::Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_epub_only_without_epubs_is_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let options = FakeServerOptions {
            responders: vec![(
                "@search Jane Doe".to_string(),
                bot_lines(&["!PeerB Jane Doe - Example Book.mobi ::INFO:: 800KB"]),
            )],
            ..Default::default()
        };
        let (_server, search, id, _events) = setup(options, dir.path()).await;

        let query = SearchQuery::author("Jane Doe").with_epub_only(true);
        let err = search.search(&id, &query, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.reason(), "no_results");
    }

    #[tokio::test]
    async fn test_listing_delivered_over_dcc() {
        let dir = tempfile::tempdir().unwrap();
        let listing = b"!PeerA Jane Doe - Example Book.epub ::INFO:: 1.1MB\r\n\
!PeerC Jane Doe - Example Book.epub ::INFO:: 878.9KB\r\n\
not a result line\r\n";
        let archive = zip_bytes(&[("SearchBot_results_for_jane_doe.txt", listing)]);
        let peer = spawn_dcc_peer(archive.clone(), PeerBehavior::Complete).await;
        let offer = offer_payload("SearchBot_results_for_jane_doe.txt.zip", peer, archive.len() as u64);

        let options = FakeServerOptions {
            responders: vec![(
                "@search Jane Doe".to_string(),
                vec![format!(":SearchBot!bot@loopback PRIVMSG {{nick}} :{}", offer)],
            )],
            ..Default::default()
        };
        let (_server, search, id, _events) = setup(options, dir.path()).await;

        let started = Instant::now();
        let results = search
            .search(&id, &SearchQuery::author("Jane Doe").with_max_results(5), &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() < std::time::Duration::from_millis(400));
        // author scope keeps one per title
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].server, "PeerA");

        let listings = dir.path().join("downloads").join(".partial").join("listings");
        let leftovers = std::fs::read_dir(&listings).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_slow_listing_is_bounded_by_window() {
        let dir = tempfile::tempdir().unwrap();
        let archive = zip_bytes(&[("SearchBot_results_for_jane_doe.txt", b"!PeerA Jane Doe - Example Book.epub\r\n")]);
        let peer = spawn_dcc_peer(archive.clone(), PeerBehavior::Stall(10)).await;
        let offer = offer_payload("SearchBot_results_for_jane_doe.txt.zip", peer, archive.len() as u64);

        let options = FakeServerOptions {
            responders: vec![(
                "@search Jane Doe".to_string(),
                vec![format!(":SearchBot!bot@loopback PRIVMSG {{nick}} :{}", offer)],
            )],
            ..Default::default()
        };
        let (_server, search, id, _events) = setup_with(options, dir.path(), |c| c.stall_timeout_ms = 10_000).await;

        let started = Instant::now();
        let err = search
            .search(&id, &SearchQuery::author("Jane Doe"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "timeout");
        assert!(started.elapsed() < std::time::Duration::from_millis(1500));

        let listings = dir.path().join("downloads").join(".partial").join("listings");
        let leftovers = std::fs::read_dir(&listings).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_invalid_query_is_rejected_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let (server, search, id, _events) = setup(FakeServerOptions::default(), dir.path()).await;

        let err = search
            .search(&id, &SearchQuery::author("Jane\r\nQUIT"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "config");
        assert!(server.commands("PRIVMSG").is_empty());
    }
}
