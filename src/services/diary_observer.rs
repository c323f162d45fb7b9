//! src/services/diary_observer.rs
//!
//! DiaryObserver owns the single live query behind the "current diaries"
//! value. Switching between the unfiltered and the date-filtered view
//! aborts the running subscription task and joins it before the next one is
//! spawned, so two subscriptions never publish into the shared state.

use crate::{
    models::{entry::Diaries, request_state::RequestState},
    services::entry_repository::EntryRepository,
};
use chrono::{DateTime, Utc};
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Quiet period applied to the unfiltered view.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SubscriptionMode {
    AllEntries,
    FilteredEntries {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

struct Subscription {
    mode: SubscriptionMode,
    task: JoinHandle<()>,
}

pub struct DiaryObserver {
    repository: Arc<dyn EntryRepository>,
    debounce: Duration,
    diaries: Arc<watch::Sender<RequestState<Diaries>>>,
    active: Mutex<Option<Subscription>>,
}

impl DiaryObserver {
    pub fn new(repository: Arc<dyn EntryRepository>, debounce: Duration) -> Self {
        let (diaries, _) = watch::channel(RequestState::Idle);
        Self {
            repository,
            debounce,
            diaries: Arc::new(diaries),
            active: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RequestState<Diaries>> {
        self.diaries.subscribe()
    }

    pub fn current(&self) -> RequestState<Diaries> {
        self.diaries.borrow().clone()
    }

    /// The live subscription's mode, or `None` when nothing is subscribed.
    pub async fn mode(&self) -> Option<SubscriptionMode> {
        self.active.lock().await.as_ref().map(|sub| sub.mode)
    }

    /// Replace the live subscription.
    ///
    /// With a range the filtered view starts undebounced; without one the
    /// unfiltered view starts behind the debounce. The previous task is
    /// cancelled and joined first, then `Loading` is published.
    pub async fn get_diaries(&self, range: Option<(DateTime<Utc>, DateTime<Utc>)>) {
        let mode = match range {
            Some((from, to)) => SubscriptionMode::FilteredEntries { from, to },
            None => SubscriptionMode::AllEntries,
        };

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            cancel(previous).await;
        }
        self.diaries.send_replace(RequestState::Loading);

        let mut updates = match mode {
            SubscriptionMode::AllEntries => {
                debounced(self.repository.observe_all(), self.debounce)
            }
            SubscriptionMode::FilteredEntries { from, to } => {
                self.repository.observe_filtered(from, to)
            }
        };
        let diaries = self.diaries.clone();
        let task = tokio::spawn(async move {
            while let Some(state) = updates.next().await {
                diaries.send_replace(state);
            }
            debug!("diary subscription stream ended");
        });

        info!("diary subscription switched to {:?}", mode);
        *active = Some(Subscription { mode, task });
    }

    /// Cancel the live subscription, if any. The last published state stays.
    pub async fn shutdown(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            cancel(previous).await;
        }
    }
}

async fn cancel(subscription: Subscription) {
    subscription.task.abort();
    match subscription.task.await {
        Ok(()) => debug!("{:?} subscription had already finished", subscription.mode),
        Err(err) if err.is_cancelled() => {
            debug!("{:?} subscription cancelled", subscription.mode)
        }
        Err(err) => warn!("{:?} subscription failed: {}", subscription.mode, err),
    }
}

/// Emit an item only after `period` passes without a newer one.
///
/// When the source ends, the pending item is flushed immediately.
pub fn debounced<T: Send + 'static>(
    source: BoxStream<'static, T>,
    period: Duration,
) -> BoxStream<'static, T> {
    stream::unfold(
        (source, None::<T>, false),
        move |(mut source, mut pending, mut exhausted)| async move {
            loop {
                if exhausted {
                    return pending.take().map(|item| (item, (source, None, true)));
                }
                match pending.take() {
                    None => match source.next().await {
                        Some(item) => pending = Some(item),
                        None => return None,
                    },
                    Some(item) => {
                        tokio::select! {
                            next = source.next() => match next {
                                Some(newer) => pending = Some(newer),
                                None => {
                                    pending = Some(item);
                                    exhausted = true;
                                }
                            },
                            _ = tokio::time::sleep(period) => {
                                return Some((item, (source, None, false)));
                            }
                        }
                    }
                }
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entry::{DayGroup, Entry};
    use crate::services::entry_repository::StateStream;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
    use std::collections::VecDeque;
    use uuid::Uuid;

    type Feed = UnboundedReceiver<RequestState<Diaries>>;

    /// Repository whose live queries are fed by the test.
    #[derive(Default)]
    struct ChannelRepository {
        all: std::sync::Mutex<VecDeque<Feed>>,
        filtered: std::sync::Mutex<VecDeque<Feed>>,
    }

    impl ChannelRepository {
        fn feed_all(&self) -> UnboundedSender<RequestState<Diaries>> {
            let (tx, rx) = unbounded();
            self.all.lock().unwrap().push_back(rx);
            tx
        }

        fn feed_filtered(&self) -> UnboundedSender<RequestState<Diaries>> {
            let (tx, rx) = unbounded();
            self.filtered.lock().unwrap().push_back(rx);
            tx
        }

        fn next_feed(feeds: &std::sync::Mutex<VecDeque<Feed>>) -> StateStream<Diaries> {
            match feeds.lock().unwrap().pop_front() {
                Some(rx) => rx.boxed(),
                None => stream::pending().boxed(),
            }
        }
    }

    #[async_trait]
    impl EntryRepository for ChannelRepository {
        fn observe_all(&self) -> StateStream<Diaries> {
            Self::next_feed(&self.all)
        }

        fn observe_filtered(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> StateStream<Diaries> {
            Self::next_feed(&self.filtered)
        }

        fn observe_one(&self, _: Uuid) -> StateStream<Entry> {
            stream::pending().boxed()
        }

        async fn insert(&self, _: Entry) -> RequestState<Entry> {
            RequestState::Idle
        }

        async fn update(&self, _: Entry) -> RequestState<Entry> {
            RequestState::Idle
        }

        async fn delete(&self, _: Uuid) -> RequestState<Entry> {
            RequestState::Idle
        }

        async fn delete_all(&self) -> RequestState<bool> {
            RequestState::Idle
        }
    }

    /// A recognisable payload: one empty group on `day` of January 2024.
    fn marker(day: u32) -> RequestState<Diaries> {
        RequestState::Success(vec![DayGroup {
            day: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            entries: Vec::new(),
        }])
    }

    fn marker_day(state: &RequestState<Diaries>) -> Option<u32> {
        use chrono::Datelike;
        state.success().map(|groups| groups[0].day.day())
    }

    fn january() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
        )
    }

    fn observer(repo: &Arc<ChannelRepository>) -> DiaryObserver {
        DiaryObserver::new(repo.clone(), DEFAULT_DEBOUNCE)
    }

    #[tokio::test(start_paused = true)]
    async fn starts_idle_then_loading() {
        let repo = Arc::new(ChannelRepository::default());
        let observer = observer(&repo);
        assert!(matches!(observer.current(), RequestState::Idle));
        assert_eq!(observer.mode().await, None);

        observer.get_diaries(None).await;

        assert!(observer.current().is_loading());
        assert_eq!(observer.mode().await, Some(SubscriptionMode::AllEntries));
    }

    #[tokio::test(start_paused = true)]
    async fn unfiltered_view_is_debounced() {
        let repo = Arc::new(ChannelRepository::default());
        let feed = repo.feed_all();
        let observer = observer(&repo);
        observer.get_diaries(None).await;

        feed.unbounded_send(marker(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(observer.current().is_loading());

        feed.unbounded_send(marker(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(observer.current().is_loading());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(marker_day(&observer.current()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn filtered_view_publishes_immediately() {
        let repo = Arc::new(ChannelRepository::default());
        let feed = repo.feed_filtered();
        let observer = observer(&repo);
        observer.get_diaries(Some(january())).await;

        feed.unbounded_send(marker(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(marker_day(&observer.current()), Some(5));
        let (from, to) = january();
        assert_eq!(
            observer.mode().await,
            Some(SubscriptionMode::FilteredEntries { from, to })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn switching_to_all_drops_filtered_subscription() {
        let repo = Arc::new(ChannelRepository::default());
        let filtered = repo.feed_filtered();
        let all = repo.feed_all();
        let observer = observer(&repo);

        observer.get_diaries(Some(january())).await;
        observer.get_diaries(None).await;

        // The aborted task dropped its stream, so the stale feed is disconnected.
        assert!(filtered.unbounded_send(marker(9)).is_err());

        all.unbounded_send(marker(3)).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(marker_day(&observer.current()), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_debounced_value_is_not_published_after_switch() {
        let repo = Arc::new(ChannelRepository::default());
        let all = repo.feed_all();
        let filtered = repo.feed_filtered();
        let observer = observer(&repo);
        let mut seen = observer.subscribe();

        observer.get_diaries(None).await;
        all.unbounded_send(marker(7)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        observer.get_diaries(Some(january())).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(observer.current().is_loading());

        filtered.unbounded_send(marker(8)).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(marker_day(&seen.borrow_and_update()), Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn switching_back_and_forth_keeps_one_subscription() {
        let repo = Arc::new(ChannelRepository::default());
        let first_all = repo.feed_all();
        let filtered = repo.feed_filtered();
        let second_all = repo.feed_all();
        let observer = observer(&repo);

        observer.get_diaries(None).await;
        observer.get_diaries(Some(january())).await;
        observer.get_diaries(None).await;

        assert!(first_all.unbounded_send(marker(1)).is_err());
        assert!(filtered.unbounded_send(marker(2)).is_err());
        second_all.unbounded_send(marker(4)).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(marker_day(&observer.current()), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_and_keeps_last_state() {
        let repo = Arc::new(ChannelRepository::default());
        let feed = repo.feed_filtered();
        let observer = observer(&repo);
        observer.get_diaries(Some(january())).await;
        feed.unbounded_send(marker(6)).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        observer.shutdown().await;

        assert_eq!(observer.mode().await, None);
        assert!(feed.unbounded_send(marker(7)).is_err());
        assert_eq!(marker_day(&observer.current()), Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_flushes_pending_item_when_source_ends() {
        let source = stream::iter([1, 2, 3]).boxed();
        let out: Vec<_> = debounced(source, Duration::from_secs(2)).collect().await;
        assert_eq!(out, [3]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_emits_each_item_separated_by_quiet_period() {
        let (tx, rx) = unbounded::<u32>();
        let mut out = debounced(rx.boxed(), Duration::from_secs(2));

        tx.unbounded_send(1).unwrap();
        assert_eq!(out.next().await, Some(1));
        tx.unbounded_send(2).unwrap();
        assert_eq!(out.next().await, Some(2));
        drop(tx);
        assert_eq!(out.next().await, None);
    }

    #[tokio::test]
    async fn filtered_then_unfiltered_publishes_only_unfiltered_results() {
        use crate::models::mood::Mood;
        use crate::services::entry_repository::tests::memory_repository;

        let repo = Arc::new(memory_repository(Some("U1")).await);
        let mut old = Entry::new("january", "", Mood::Calm);
        old.date = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        repo.insert(old).await;
        repo.insert(Entry::new("today", "", Mood::Happy)).await;

        let observer = DiaryObserver::new(repo.clone(), Duration::from_millis(10));
        let mut seen = observer.subscribe();
        observer.get_diaries(Some(january())).await;
        observer.get_diaries(None).await;

        let state = tokio::time::timeout(
            Duration::from_secs(5),
            seen.wait_for(|state| state.success().is_some()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();

        let titles: Vec<_> = state
            .success()
            .unwrap()
            .iter()
            .flat_map(|g| g.entries.iter().map(|e| e.title.clone()))
            .collect();
        assert_eq!(titles, ["today", "january"]);
        assert_eq!(observer.mode().await, Some(SubscriptionMode::AllEntries));
    }
}
