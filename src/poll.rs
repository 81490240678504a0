//! Background feed polling.
//!
//! Every tick the scheduler spawns one task per configured source.  Each task
//! runs the whole pipeline for its source:
//!
//! ```text
//! fetch ─► compare newest link with cache ─┬─ unchanged ─────────────┐
//!                                          └─ changed ─► per item:   │
//!                                       keyword? ─► claim ─► seen? ─►│
//!                                               dispatch ─► mark seen│
//!                                                                    ▼
//!                                                             cache.put
//! ```
//!
//! Tasks are independent: a slow or failing source never delays another one
//! or the next tick.  Ticks can overlap (a reload polls immediately), so a
//! link is claimed for the duration of its dispatch and a second task that
//! meets the same link skips it.  Finished tasks are reaped from a [`JoinSet`] by the
//! scheduling loop, which also consumes [`SchedulerEvent`]s.
//!
//! ## For contributors
//!
//! [`PollScheduler::poll_all`] runs one full tick and waits for it, which is
//! what tests and `--once` use.  The long-lived loop is
//! [`PollScheduler::run`].

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Interval, MissedTickBehavior};

use crate::cache::ItemCache;
use crate::config::Settings;
use crate::error::FetchError;
use crate::notifier::NotificationMessage;
use crate::seen::SeenStore;
use crate::source::{FeedFetcher, FeedSnapshot};

/// Messages consumed by the scheduling loop.
pub enum SchedulerEvent {
    /// A new, already validated configuration replaced the old one.
    ConfigChanged(Arc<Settings>),
}

/// Where one source ended up after a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// Newest item is the same as last time; items were not re-examined.
    Unchanged,
    /// Items were examined; `notified` of them triggered an announcement.
    Changed { items: usize, notified: usize },
    /// Fetch or parse failed; the cache was left alone.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub url: String,
    pub state: PollState,
}

/// `true` iff both snapshots have items and their newest links agree.
///
/// A missing previous snapshot or an empty item list on either side counts
/// as a change.
pub fn is_unchanged(previous: Option<&FeedSnapshot>, current: &FeedSnapshot) -> bool {
    match (previous.and_then(FeedSnapshot::newest), current.newest()) {
        (Some(old), Some(new)) => old.link == new.link,
        _ => false,
    }
}

/// The shared state every poll task works against.
#[derive(Clone)]
struct Pipeline {
    cache: Arc<ItemCache>,
    seen: Arc<SeenStore>,
    fetcher: Arc<dyn FeedFetcher>,
    /// Links currently being announced by some task.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Releases an in-flight link when dropped.
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    link: &'a str,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.link);
    }
}

impl Pipeline {
    /// Reserve `link` for this task, or `None` if another task holds it.
    fn claim<'a>(&'a self, link: &'a str) -> Option<Claim<'a>> {
        let fresh = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(link.to_string());
        fresh.then_some(Claim {
            in_flight: &self.in_flight,
            link,
        })
    }

    async fn poll_source(&self, settings: &Settings, url: &str, tick: DateTime<Local>) -> PollOutcome {
        let fetched = match time::timeout(settings.fetch_timeout, self.fetcher.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(settings.fetch_timeout)),
        };

        let mut snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(url, error = %e, "fetch failed, retrying next tick");
                return PollOutcome {
                    url: url.to_string(),
                    state: PollState::Failed(e.to_string()),
                };
            }
        };
        snapshot.source_id = url.to_string();
        snapshot.last_update = tick;

        let previous = self.cache.get(url);
        let state = if is_unchanged(previous.as_deref(), &snapshot) {
            tracing::debug!(url, "feed unchanged");
            PollState::Unchanged
        } else {
            let notified = self.process_items(settings, &snapshot).await;
            PollState::Changed {
                items: snapshot.items.len(),
                notified,
            }
        };

        self.cache.put(url, snapshot);
        PollOutcome {
            url: url.to_string(),
            state,
        }
    }

    /// Match and announce unseen items in listed order.  Returns the number
    /// of announcements made.
    async fn process_items(&self, settings: &Settings, snapshot: &FeedSnapshot) -> usize {
        let mut notified = 0;

        for item in &snapshot.items {
            if item.link.trim().is_empty() {
                tracing::debug!(url = %snapshot.source_id, title = %item.title, "item has no link, skipping");
                continue;
            }
            let Some(hit) = settings.matcher.matches(&item.title) else {
                continue;
            };
            let Some(_claim) = self.claim(&item.link) else {
                tracing::debug!(link = %item.link, "item is being announced by another task");
                continue;
            };
            if self.seen.has(&item.link) {
                continue;
            }

            let message = NotificationMessage::new(
                settings.routes.iter().cloned(),
                format!("{hit}\n{}", item.link),
            );
            let report = settings.notifier.dispatch(&message).await;
            tracing::info!(
                link = %item.link,
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                skipped = report.skipped.len(),
                "announced item"
            );
            notified += 1;

            if let Err(e) = self.seen.mark_seen(&item.link) {
                tracing::error!(link = %item.link, error = %e, "could not record item as seen, it may be announced again");
            }
        }

        notified
    }
}

pub struct PollScheduler {
    pipeline: Pipeline,
    settings: watch::Sender<Arc<Settings>>,
}

impl PollScheduler {
    pub fn new(
        cache: Arc<ItemCache>,
        seen: Arc<SeenStore>,
        fetcher: Arc<dyn FeedFetcher>,
        settings: Arc<Settings>,
    ) -> Self {
        let (settings, _) = watch::channel(settings);
        Self {
            pipeline: Pipeline {
                cache,
                seen,
                fetcher,
                in_flight: Arc::default(),
            },
            settings,
        }
    }

    /// The settings snapshot new tasks will start with.
    pub fn current(&self) -> Arc<Settings> {
        Arc::clone(&self.settings.borrow())
    }

    /// Follow settings swaps (for status views).
    pub fn settings_watch(&self) -> watch::Receiver<Arc<Settings>> {
        self.settings.subscribe()
    }

    /// Spawn one task per configured source without waiting for them.
    pub fn spawn_tick(&self, tasks: &mut JoinSet<PollOutcome>) {
        let settings = self.current();
        let tick = Local::now();
        tracing::debug!(sources = settings.sources.len(), "polling all sources");

        for url in &settings.sources {
            let pipeline = self.pipeline.clone();
            let settings = Arc::clone(&settings);
            let url = url.clone();
            tasks.spawn(async move { pipeline.poll_source(&settings, &url, tick).await });
        }
    }

    /// Poll every source once and wait for all of them.
    pub async fn poll_all(&self) -> Vec<PollOutcome> {
        let mut tasks = JoinSet::new();
        self.spawn_tick(&mut tasks);

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Some(outcome) = log_outcome(joined) {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Swap in `settings` for all tasks spawned from now on.
    pub fn apply(&self, settings: Arc<Settings>) {
        let old = self.current();
        for url in old.config.added_sources(&settings.config) {
            tracing::info!(url = %url, "source added");
        }
        if old.config.archives != settings.config.archives {
            tracing::warn!(
                path = %settings.config.archives.display(),
                "archives path changed; it takes effect after a restart"
            );
        }
        tracing::info!(
            sources = settings.sources.len(),
            interval_secs = settings.interval.as_secs(),
            "configuration reloaded"
        );
        self.settings.send_replace(settings);
    }

    /// Poll on a fixed cadence until `shutdown` resolves.
    ///
    /// The first tick fires immediately.  A `ConfigChanged` event restarts the
    /// cadence with the new interval, which also polls everything right away.
    /// Tasks still running at shutdown are aborted.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<SchedulerEvent>,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        let mut ticker = new_ticker(self.current().interval);
        let mut tasks = JoinSet::new();
        let mut events_open = true;

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => self.spawn_tick(&mut tasks),
                event = events.recv(), if events_open => match event {
                    Some(SchedulerEvent::ConfigChanged(settings)) => {
                        let interval = settings.interval;
                        self.apply(settings);
                        ticker = new_ticker(interval);
                    }
                    None => events_open = false,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_outcome(joined);
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "scheduler stopping");
        tasks.shutdown().await;
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn log_outcome(joined: Result<PollOutcome, JoinError>) -> Option<PollOutcome> {
    match joined {
        Ok(outcome) => {
            match &outcome.state {
                PollState::Unchanged => tracing::debug!(url = %outcome.url, "poll done, unchanged"),
                PollState::Changed { items, notified } => {
                    tracing::info!(url = %outcome.url, items, notified, "poll done")
                }
                PollState::Failed(reason) => {
                    tracing::debug!(url = %outcome.url, reason = %reason, "poll done, failed")
                }
            }
            Some(outcome)
        }
        Err(e) => {
            tracing::error!(error = %e, "poll task panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use tempfile::TempDir;

    use crate::config::Config;
    use crate::error::DispatchError;
    use crate::matcher::KeywordMatcher;
    use crate::notifier::tests::RecordingTransport;
    use crate::notifier::{Notifier, Transport, FEISHU_ROUTE};
    use crate::source::{snapshot, Item};

    // -- fakes ---------------------------------------------------------------

    enum Response {
        Feed(Vec<Item>),
        Fail,
        Hang,
    }

    #[derive(Default)]
    struct FakeFetcher {
        responses: Mutex<HashMap<String, Response>>,
    }

    impl FakeFetcher {
        fn set(&self, url: &str, response: Response) {
            self.responses.lock().unwrap().insert(url.to_string(), response);
        }

        fn feed(&self, url: &str, items: &[(&str, &str)]) {
            let items = items.iter().map(|(link, title)| Item::new(*link, *title)).collect();
            self.set(url, Response::Feed(items));
        }
    }

    #[async_trait]
    impl FeedFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FeedSnapshot, FetchError> {
            let items = match self.responses.lock().unwrap().get(url) {
                Some(Response::Feed(items)) => Some(items.clone()),
                Some(Response::Hang) => None,
                Some(Response::Fail) | None => return Err(FetchError::Status(StatusCode::BAD_GATEWAY)),
            };
            let Some(items) = items else {
                time::sleep(Duration::from_secs(30)).await;
                return Err(FetchError::Status(StatusCode::GATEWAY_TIMEOUT));
            };
            Ok(FeedSnapshot {
                source_id: String::new(),
                title: format!("Feed {url}"),
                link: url.to_string(),
                items,
                last_update: Local::now(),
            })
        }
    }

    /// Records like [`RecordingTransport`] but yields first, so concurrent
    /// tasks interleave at dispatch.
    struct SlowTransport(Arc<RecordingTransport>);

    #[async_trait]
    impl Transport for SlowTransport {
        async fn send(&self, text: &str) -> Result<(), DispatchError> {
            time::sleep(Duration::from_millis(50)).await;
            self.0.send(text).await
        }
    }

    struct Harness {
        _dir: TempDir,
        cache: Arc<ItemCache>,
        seen: Arc<SeenStore>,
        fetcher: Arc<FakeFetcher>,
        sent: Arc<RecordingTransport>,
        scheduler: PollScheduler,
    }

    fn settings(sources: &[&str], keywords: &[&str], sent: &Arc<RecordingTransport>) -> Arc<Settings> {
        settings_with(sources, keywords, sent.clone())
    }

    fn settings_with(sources: &[&str], keywords: &[&str], transport: Arc<dyn Transport>) -> Arc<Settings> {
        let config = Config::parse("{}", Path::new("test.json")).unwrap();
        Arc::new(Settings {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            interval: Duration::from_secs(3600),
            fetch_timeout: Duration::from_millis(200),
            matcher: KeywordMatcher::new(keywords).unwrap(),
            notifier: Notifier::new(Duration::from_secs(1)).with_route(FEISHU_ROUTE, transport),
            routes: [FEISHU_ROUTE.to_string()].into(),
            config,
        })
    }

    fn harness(sources: &[&str], keywords: &[&str]) -> Harness {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(ItemCache::new());
        let seen = Arc::new(SeenStore::open(dir.path().join("archives.txt")).unwrap());
        let fetcher = Arc::new(FakeFetcher::default());
        let sent = Arc::new(RecordingTransport::default());
        let scheduler = PollScheduler::new(
            cache.clone(),
            seen.clone(),
            fetcher.clone(),
            settings(sources, keywords, &sent),
        );
        Harness {
            _dir: dir,
            cache,
            seen,
            fetcher,
            sent,
            scheduler,
        }
    }

    async fn poll(h: &Harness, url: &str, tick: DateTime<Local>) -> PollOutcome {
        let settings = h.scheduler.current();
        h.scheduler.pipeline.poll_source(&settings, url, tick).await
    }

    fn sent(h: &Harness) -> Vec<String> {
        h.sent.sent.lock().unwrap().clone()
    }

    // -- change detection ----------------------------------------------------

    #[test]
    fn no_previous_snapshot_is_always_changed() {
        assert!(!is_unchanged(None, &snapshot("a", &["x"])));
        assert!(!is_unchanged(None, &snapshot("a", &[])));
    }

    #[test]
    fn unchanged_iff_newest_links_match() {
        let old = snapshot("a", &["x", "w"]);
        assert!(is_unchanged(Some(&old), &snapshot("a", &["x"])));
        assert!(is_unchanged(Some(&old), &snapshot("a", &["x", "v", "u"])));
        assert!(!is_unchanged(Some(&old), &snapshot("a", &["y", "x"])));
    }

    #[test]
    fn empty_item_list_on_either_side_is_changed() {
        assert!(!is_unchanged(Some(&snapshot("a", &[])), &snapshot("a", &["x"])));
        assert!(!is_unchanged(Some(&snapshot("a", &["x"])), &snapshot("a", &[])));
        assert!(!is_unchanged(Some(&snapshot("a", &[])), &snapshot("a", &[])));
    }

    // -- pipeline ------------------------------------------------------------

    #[tokio::test]
    async fn new_matching_item_is_announced_once_and_cached() {
        let h = harness(&["A"], &["release"]);
        h.cache.put("A", snapshot("A", &["https://a/x"]));
        h.fetcher.feed(
            "A",
            &[("https://a/y", "v2.0 release notes"), ("https://a/x", "Old post")],
        );

        let outcome = poll(&h, "A", Local::now()).await;

        assert_eq!(outcome.state, PollState::Changed { items: 2, notified: 1 });
        let messages = sent(&h);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("release"));
        assert!(messages[0].ends_with("\nhttps://a/y"));
        assert!(h.seen.has("https://a/y"));
        assert!(!h.seen.has("https://a/x"));
        let cached = h.cache.get("A").unwrap();
        assert_eq!(cached.newest().unwrap().link, "https://a/y");
        assert_eq!(cached.source_id, "A");
    }

    #[tokio::test]
    async fn seen_item_is_not_announced_again() {
        let h = harness(&["A"], &["release"]);
        h.fetcher.feed("A", &[("https://a/1", "release 1")]);
        poll(&h, "A", Local::now()).await;

        // New newest item, so the feed is "changed" and re-examined in full.
        h.fetcher.feed("A", &[("https://a/2", "chatter"), ("https://a/1", "release 1")]);
        let outcome = poll(&h, "A", Local::now()).await;

        assert_eq!(outcome.state, PollState::Changed { items: 2, notified: 0 });
        assert_eq!(sent(&h).len(), 1);
    }

    #[tokio::test]
    async fn previously_seen_link_from_log_is_not_announced() {
        let h = harness(&["A"], &["release"]);
        h.seen.mark_seen("https://a/1").unwrap();
        h.fetcher.feed("A", &[("https://a/1", "release 1")]);

        let outcome = poll(&h, "A", Local::now()).await;

        assert_eq!(outcome.state, PollState::Changed { items: 1, notified: 0 });
        assert!(sent(&h).is_empty());
    }

    #[tokio::test]
    async fn unchanged_feed_skips_items_but_refreshes_cache() {
        let h = harness(&["A"], &["release"]);
        h.fetcher.feed("A", &[("https://a/1", "chatter")]);
        poll(&h, "A", Local::now()).await;

        // Same newest link; the second item would match but is not examined.
        h.fetcher.feed("A", &[("https://a/1", "chatter"), ("https://a/0", "release 0")]);
        let later = Local.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let outcome = poll(&h, "A", later).await;

        assert_eq!(outcome.state, PollState::Unchanged);
        assert!(sent(&h).is_empty());
        let cached = h.cache.get("A").unwrap();
        assert_eq!(cached.items.len(), 2);
        assert_eq!(cached.last_update, later);
    }

    #[tokio::test]
    async fn items_are_announced_in_listed_order() {
        let h = harness(&["A"], &["release"]);
        h.fetcher.feed(
            "A",
            &[("https://a/3", "release 3"), ("https://a/2", "nope"), ("https://a/1", "release 1")],
        );

        poll(&h, "A", Local::now()).await;

        let messages = sent(&h);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].ends_with("https://a/3"));
        assert!(messages[1].ends_with("https://a/1"));
    }

    #[tokio::test]
    async fn linkless_items_are_skipped() {
        let h = harness(&["A"], &["release"]);
        h.fetcher.feed("A", &[("", "release without link"), (" ", "release with blank link")]);

        let outcome = poll(&h, "A", Local::now()).await;

        assert_eq!(outcome.state, PollState::Changed { items: 2, notified: 0 });
        assert!(sent(&h).is_empty());
    }

    #[tokio::test]
    async fn overlapping_polls_announce_a_link_once() {
        let h = harness(&["A"], &["release"]);
        let slow: Arc<dyn Transport> = Arc::new(SlowTransport(h.sent.clone()));
        h.scheduler.apply(settings_with(&["A"], &["release"], slow));
        h.fetcher.feed("A", &[("https://a/1", "release 1")]);

        let (first, second) = tokio::join!(
            poll(&h, "A", Local::now()),
            poll(&h, "A", Local::now()),
        );

        let notified: Vec<_> = [first, second]
            .into_iter()
            .map(|o| match o.state {
                PollState::Changed { notified, .. } => notified,
                other => panic!("unexpected state {other:?}"),
            })
            .collect();
        assert_eq!(notified.iter().sum::<usize>(), 1);
        assert_eq!(sent(&h).len(), 1);
        assert!(h.seen.has("https://a/1"));
        assert!(h.scheduler.pipeline.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_source_does_not_stop_the_others() {
        let h = harness(&["B", "C"], &["release"]);
        h.cache.put("B", snapshot("B", &["https://b/old"]));
        h.fetcher.set("B", Response::Fail);
        h.fetcher.feed("C", &[("https://c/1", "release day")]);

        let mut outcomes = h.scheduler.poll_all().await;
        outcomes.sort_by(|a, b| a.url.cmp(&b.url));

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].state, PollState::Failed(_)));
        assert_eq!(outcomes[1].state, PollState::Changed { items: 1, notified: 1 });
        assert_eq!(h.cache.get("B").unwrap().newest().unwrap().link, "https://b/old");
        let messages = sent(&h);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("https://c/1"));
    }

    #[tokio::test]
    async fn hanging_fetch_times_out() {
        let h = harness(&["slow", "fast"], &[]);
        h.fetcher.set("slow", Response::Hang);
        h.fetcher.feed("fast", &[("https://f/1", "x")]);

        let mut outcomes = h.scheduler.poll_all().await;
        outcomes.sort_by(|a, b| a.url.cmp(&b.url));

        assert_eq!(outcomes[0].url, "fast");
        assert_eq!(outcomes[1].url, "slow");
        assert!(matches!(outcomes[1].state, PollState::Failed(ref e) if e.contains("timed out")));
        assert!(h.cache.get("slow").is_none());
        assert!(h.cache.get("fast").is_some());
    }

    // -- scheduling loop -----------------------------------------------------

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn config_change_swaps_settings_and_polls_immediately() {
        let h = harness(&["A"], &[]);
        h.fetcher.feed("A", &[("https://a/1", "one")]);
        h.fetcher.feed("B", &[("https://b/1", "release b")]);

        let cache = h.cache.clone();
        let mut watch = h.scheduler.settings_watch();
        let (events_tx, events_rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let run = tokio::spawn(h.scheduler.run(events_rx, async move {
            let _ = stop_rx.await;
        }));

        // The first tick fires straight away.
        wait_for(|| cache.get("A").is_some()).await;
        assert!(cache.get("B").is_none());

        let reloaded = settings(&["A", "B"], &["release"], &h.sent);
        events_tx.send(SchedulerEvent::ConfigChanged(reloaded)).await.unwrap();

        // The hourly interval has not elapsed, so B can only come from the
        // out-of-cycle poll triggered by the reload.
        wait_for(|| cache.get("B").is_some()).await;
        watch.changed().await.unwrap();
        assert_eq!(watch.borrow().sources, vec!["A", "B"]);
        wait_for(|| h.sent.sent.lock().unwrap().len() == 1).await;

        stop_tx.send(()).unwrap();
        run.await.unwrap();
    }
}
