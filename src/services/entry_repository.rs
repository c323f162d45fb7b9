//! src/services/entry_repository.rs
//!
//! Entry store gateway. `EntryRepository` is the contract the observer and
//! journal service depend on; `SqliteEntryRepository` implements it on an
//! owner-partitioned `entries` table. Every committed write bumps a change
//! counter, and live queries re-run whenever it moves.

use crate::{
    db,
    models::{
        entry::{Diaries, Entry, group_by_day},
        mood::Mood,
        request_state::RequestState,
    },
    services::session::{Session, User},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use sqlx::{FromRow, SqlitePool};
use std::{future::Future, sync::Arc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("../../migrations/0002_entries.sql");

const ENTRY_COLUMNS: &str = "id, owner_id, title, description, mood, date_ms, images";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("user is not logged in")]
    UserNotAuthenticated,
    #[error("entry `{0}` does not exist")]
    EntityNotFound(Uuid),
    #[error("entry `{0}` already exists")]
    AlreadyExists(Uuid),
    #[error("stored entry is malformed: {0}")]
    Malformed(String),
    #[error(transparent)]
    Query(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A live, restartable sequence of states. Query failures are emitted as
/// `RequestState::Error` and the stream keeps waiting for changes.
pub type StateStream<T> = BoxStream<'static, RequestState<T>>;

#[async_trait]
pub trait EntryRepository: Send + Sync {
    /// All of the caller's entries, newest first, grouped by local day.
    fn observe_all(&self) -> StateStream<Diaries>;

    /// Entries dated strictly inside `(from - 1 day, to + 1 day)`, oldest first.
    fn observe_filtered(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> StateStream<Diaries>;

    /// One entry; emits `EntityNotFound` while it is absent.
    fn observe_one(&self, id: Uuid) -> StateStream<Entry>;

    async fn insert(&self, entry: Entry) -> RequestState<Entry>;

    async fn update(&self, entry: Entry) -> RequestState<Entry>;

    async fn delete(&self, id: Uuid) -> RequestState<Entry>;

    async fn delete_all(&self) -> RequestState<bool>;
}

#[derive(FromRow)]
struct EntryRow {
    id: String,
    owner_id: String,
    title: String,
    description: String,
    mood: String,
    date_ms: i64,
    images: String,
}

impl TryFrom<EntryRow> for Entry {
    type Error = RepositoryError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|err| RepositoryError::Malformed(format!("id `{}`: {}", row.id, err)))?;
        let mood = row
            .mood
            .parse::<Mood>()
            .map_err(|err| RepositoryError::Malformed(err.to_string()))?;
        let date = DateTime::from_timestamp_millis(row.date_ms).ok_or_else(|| {
            RepositoryError::Malformed(format!("date {} out of range", row.date_ms))
        })?;
        let images = serde_json::from_str(&row.images)
            .map_err(|err| RepositoryError::Malformed(format!("images: {}", err)))?;
        Ok(Entry {
            id,
            owner_id: row.owner_id,
            title: row.title,
            description: row.description,
            mood,
            date,
            images,
        })
    }
}

#[derive(Clone)]
pub struct SqliteEntryRepository {
    /// Shared SQLite connection pool for the entry store.
    pub db: Arc<SqlitePool>,
    session: Session,
    changes: Arc<watch::Sender<u64>>,
}

impl SqliteEntryRepository {
    pub fn new(db: Arc<SqlitePool>, session: Session) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            db,
            session,
            changes: Arc::new(changes),
        }
    }

    pub async fn ensure_schema(&self) -> RepositoryResult<()> {
        for stmt in db::statements(SCHEMA_SQL) {
            debug!("Executing entry schema SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn require_user(&self) -> RepositoryResult<User> {
        self.session
            .current_user()
            .ok_or(RepositoryError::UserNotAuthenticated)
    }

    fn notify_changed(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// Run `query` now and again after every committed write.
    fn live<T, F, Fut>(&self, query: F) -> StateStream<T>
    where
        T: Send + 'static,
        F: Fn(Arc<SqlitePool>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RepositoryResult<T>> + Send + 'static,
    {
        let state = (self.db.clone(), self.changes.subscribe(), Arc::new(query), true);
        stream::unfold(state, |(db, mut changes, query, first)| async move {
            if !first {
                changes.changed().await.ok()?;
            }
            let result = query(db.clone()).await;
            if let Err(err) = &result {
                warn!("live entry query failed: {}", err);
            }
            Some((RequestState::from(result), (db, changes, query, false)))
        })
        .boxed()
    }

    async fn try_insert(&self, mut entry: Entry) -> RepositoryResult<Entry> {
        let user = self.require_user()?;
        entry.owner_id = user.id;
        // Stored as epoch millis; the returned entry must match later reads.
        entry.date = entry.date.trunc_subsecs(3);
        let images = serde_json::to_string(&entry.images)
            .map_err(|err| RepositoryError::Malformed(err.to_string()))?;

        let mut tx = self.db.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO entries (id, owner_id, title, description, mood, date_ms, images)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.owner_id)
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(entry.mood.as_str())
        .bind(entry.date.timestamp_millis())
        .bind(images)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(RepositoryError::AlreadyExists(entry.id));
            }
            Err(err) => return Err(err.into()),
        }
        tx.commit().await?;
        self.notify_changed();

        debug!("inserted entry {} for {}", entry.id, entry.owner_id);
        Ok(entry)
    }

    async fn try_update(&self, entry: Entry) -> RepositoryResult<Entry> {
        let user = self.require_user()?;
        let images = serde_json::to_string(&entry.images)
            .map_err(|err| RepositoryError::Malformed(err.to_string()))?;

        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            "UPDATE entries
             SET title = ?, description = ?, mood = ?, images = ?, date_ms = ?
             WHERE id = ? AND owner_id = ?",
        )
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(entry.mood.as_str())
        .bind(images)
        .bind(entry.date.timestamp_millis())
        .bind(entry.id.to_string())
        .bind(&user.id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::EntityNotFound(entry.id));
        }

        let stored = fetch_one(&mut *tx, &user.id, entry.id).await?;
        tx.commit().await?;
        self.notify_changed();

        debug!("updated entry {}", entry.id);
        stored.ok_or(RepositoryError::EntityNotFound(entry.id))
    }

    async fn try_delete(&self, id: Uuid) -> RepositoryResult<Entry> {
        let user = self.require_user()?;

        let mut tx = self.db.begin().await?;
        // Scoped to the owner: another user's id is indistinguishable from a missing one.
        let entry = fetch_one(&mut *tx, &user.id, id)
            .await?
            .ok_or(RepositoryError::EntityNotFound(id))?;
        sqlx::query("DELETE FROM entries WHERE id = ? AND owner_id = ?")
            .bind(id.to_string())
            .bind(&user.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.notify_changed();

        debug!("deleted entry {}", id);
        Ok(entry)
    }

    async fn try_delete_all(&self) -> RepositoryResult<bool> {
        let user = self.require_user()?;

        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM entries WHERE owner_id = ?")
            .bind(&user.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.notify_changed();

        debug!("deleted {} entries for {}", result.rows_affected(), user.id);
        Ok(true)
    }
}

#[async_trait]
impl EntryRepository for SqliteEntryRepository {
    fn observe_all(&self) -> StateStream<Diaries> {
        let user = match self.require_user() {
            Ok(user) => user,
            Err(err) => return stream::iter([RequestState::error(err)]).boxed(),
        };
        self.live(move |db| {
            let owner = user.id.clone();
            async move {
                let sql = format!(
                    "SELECT {} FROM entries WHERE owner_id = ?1 ORDER BY date_ms DESC",
                    ENTRY_COLUMNS
                );
                let rows = sqlx::query_as::<_, EntryRow>(&sql)
                    .bind(owner)
                    .fetch_all(&*db)
                    .await?;
                Ok::<_, RepositoryError>(group_by_day(into_entries(rows)?))
            }
        })
    }

    fn observe_filtered(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> StateStream<Diaries> {
        let user = match self.require_user() {
            Ok(user) => user,
            Err(err) => return stream::iter([RequestState::error(err)]).boxed(),
        };
        let (lower_ms, upper_ms) = padded_bounds(from, to);
        self.live(move |db| {
            let owner = user.id.clone();
            async move {
                let sql = format!(
                    "SELECT {} FROM entries
                     WHERE owner_id = ?1 AND date_ms < ?2 AND date_ms > ?3
                     ORDER BY date_ms ASC",
                    ENTRY_COLUMNS
                );
                let rows = sqlx::query_as::<_, EntryRow>(&sql)
                    .bind(owner)
                    .bind(upper_ms)
                    .bind(lower_ms)
                    .fetch_all(&*db)
                    .await?;
                Ok::<_, RepositoryError>(group_by_day(into_entries(rows)?))
            }
        })
    }

    fn observe_one(&self, id: Uuid) -> StateStream<Entry> {
        let user = match self.require_user() {
            Ok(user) => user,
            Err(err) => return stream::iter([RequestState::error(err)]).boxed(),
        };
        self.live(move |db| {
            let owner = user.id.clone();
            async move {
                let mut conn = db.acquire().await?;
                fetch_one(&mut *conn, &owner, id)
                    .await?
                    .ok_or(RepositoryError::EntityNotFound(id))
            }
        })
    }

    async fn insert(&self, entry: Entry) -> RequestState<Entry> {
        self.try_insert(entry).await.into()
    }

    async fn update(&self, entry: Entry) -> RequestState<Entry> {
        self.try_update(entry).await.into()
    }

    async fn delete(&self, id: Uuid) -> RequestState<Entry> {
        self.try_delete(id).await.into()
    }

    async fn delete_all(&self) -> RequestState<bool> {
        self.try_delete_all().await.into()
    }
}

/// Exclusive millisecond bounds for a date filter, padded by one day on each
/// side to absorb timezone skew and truncated to whole seconds.
fn padded_bounds(from: DateTime<Utc>, to: DateTime<Utc>) -> (i64, i64) {
    let lower = (from - Duration::days(1)).timestamp() * 1000;
    let upper = (to + Duration::days(1)).timestamp() * 1000;
    (lower, upper)
}

async fn fetch_one(
    conn: &mut sqlx::SqliteConnection,
    owner: &str,
    id: Uuid,
) -> RepositoryResult<Option<Entry>> {
    let sql = format!(
        "SELECT {} FROM entries WHERE id = ?1 AND owner_id = ?2",
        ENTRY_COLUMNS
    );
    let row = sqlx::query_as::<_, EntryRow>(&sql)
        .bind(id.to_string())
        .bind(owner)
        .fetch_optional(conn)
        .await?;
    row.map(Entry::try_from).transpose()
}

fn into_entries(rows: Vec<EntryRow>) -> RepositoryResult<Vec<Entry>> {
    rows.into_iter().map(Entry::try_from).collect()
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;
    use chrono::{Local, TimeZone};

    pub async fn memory_repository(user: Option<&str>) -> SqliteEntryRepository {
        let session = Session::new(user.map(User::new));
        let repo = SqliteEntryRepository::new(Arc::new(memory_pool().await), session);
        repo.ensure_schema().await.unwrap();
        repo
    }

    async fn row_count(repo: &SqliteEntryRepository) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&*repo.db)
            .await
            .unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
    }

    fn dated(title: &str, date: DateTime<Utc>) -> Entry {
        let mut entry = Entry::new(title, "", Mood::Neutral);
        entry.date = date;
        entry
    }

    #[tokio::test]
    async fn inserted_entry_shows_up_under_today() {
        let repo = memory_repository(Some("U1")).await;
        let inserted = repo
            .insert(Entry::new("A", "first", Mood::Happy))
            .await
            .success()
            .cloned()
            .unwrap();

        let mut stream = repo.observe_all();
        let state = stream.next().await.unwrap();
        let groups = state.success().unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].day, Local::now().date_naive());
        assert_eq!(groups[0].entries, vec![inserted.clone()]);
        assert_eq!(inserted.owner_id, "U1");
        assert_eq!(inserted.mood, Mood::Happy);
    }

    #[tokio::test]
    async fn observe_all_re_emits_after_writes() {
        let repo = memory_repository(Some("U1")).await;
        let mut stream = repo.observe_all();
        assert!(stream.next().await.unwrap().success().unwrap().is_empty());

        repo.insert(dated("old", Utc::now() - Duration::days(3))).await;
        repo.insert(Entry::new("new", "", Mood::Calm)).await;

        // Each commit bumps the counter; the stream may coalesce them.
        let mut latest = stream.next().await.unwrap();
        while latest.success().map(|g| g.len()) != Some(2) {
            latest = stream.next().await.unwrap();
        }
        let groups = latest.success().unwrap();
        assert_eq!(groups[0].entries[0].title, "new");
        assert_eq!(groups[1].entries[0].title, "old");
    }

    #[tokio::test]
    async fn unauthenticated_calls_fail_without_touching_store() {
        let repo = memory_repository(None).await;

        let state = repo.insert(Entry::new("A", "", Mood::Happy)).await;
        assert!(matches!(
            state.cause(),
            Some(RepositoryError::UserNotAuthenticated)
        ));
        assert_eq!(row_count(&repo).await, 0);

        let emitted: Vec<_> = repo.observe_all().collect().await;
        assert_eq!(emitted.len(), 1);
        assert!(matches!(
            emitted[0].cause(),
            Some(RepositoryError::UserNotAuthenticated)
        ));
        assert!(repo.delete_all().await.cause().is_some());
    }

    #[tokio::test]
    async fn insert_never_overwrites_existing_id() {
        let repo = memory_repository(Some("U1")).await;
        let original = Entry::new("original", "", Mood::Calm);
        repo.insert(original.clone()).await;

        let mut clash = original.clone();
        clash.title = "clash".into();
        let state = repo.insert(clash).await;

        assert!(matches!(
            state.cause(),
            Some(RepositoryError::AlreadyExists(id)) if *id == original.id
        ));
        let mut one = repo.observe_one(original.id);
        assert_eq!(one.next().await.unwrap().success().unwrap().title, "original");
    }

    #[tokio::test]
    async fn update_missing_entry_leaves_store_unchanged() {
        let repo = memory_repository(Some("U1")).await;
        let kept = repo
            .insert(Entry::new("kept", "", Mood::Calm))
            .await
            .success()
            .cloned()
            .unwrap();

        let ghost = Entry::new("ghost", "", Mood::Awful);
        let state = repo.update(ghost.clone()).await;

        assert!(matches!(
            state.cause(),
            Some(RepositoryError::EntityNotFound(id)) if *id == ghost.id
        ));
        assert_eq!(row_count(&repo).await, 1);
        let mut one = repo.observe_one(kept.id);
        assert_eq!(one.next().await.unwrap().success(), Some(&kept));
    }

    #[tokio::test]
    async fn update_overwrites_mutable_fields_only() {
        let repo = memory_repository(Some("U1")).await;
        let stored = repo
            .insert(Entry::new("draft", "", Mood::Neutral))
            .await
            .success()
            .cloned()
            .unwrap();

        let mut edited = stored.clone();
        edited.owner_id = "someone-else".into();
        edited.title = "final".into();
        edited.description = "body".into();
        edited.mood = Mood::Romantic;
        edited.images = vec!["images/U1/a.jpg-1.jpg".into()];
        edited.date = utc(2024, 5, 1, 9);

        let updated = repo.update(edited).await.success().cloned().unwrap();

        assert_eq!(updated.owner_id, "U1");
        assert_eq!(updated.title, "final");
        assert_eq!(updated.mood, Mood::Romantic);
        assert_eq!(updated.images, vec!["images/U1/a.jpg-1.jpg".to_string()]);
        assert_eq!(updated.date, utc(2024, 5, 1, 9));
    }

    #[tokio::test]
    async fn cross_owner_delete_reports_not_found() {
        let repo = memory_repository(Some("U1")).await;
        let theirs = repo
            .insert(Entry::new("private", "", Mood::Lonely))
            .await
            .success()
            .cloned()
            .unwrap();

        repo.session.log_in(User::new("U2"));
        let state = repo.delete(theirs.id).await;

        assert!(matches!(
            state.cause(),
            Some(RepositoryError::EntityNotFound(id)) if *id == theirs.id
        ));
        assert_eq!(row_count(&repo).await, 1);
    }

    #[tokio::test]
    async fn delete_returns_removed_entry() {
        let repo = memory_repository(Some("U1")).await;
        let entry = repo
            .insert(Entry::new("bye", "", Mood::Bored))
            .await
            .success()
            .cloned()
            .unwrap();

        let deleted = repo.delete(entry.id).await;

        assert_eq!(deleted.success(), Some(&entry));
        assert_eq!(row_count(&repo).await, 0);
        assert!(repo.delete(entry.id).await.cause().is_some());
    }

    #[tokio::test]
    async fn observe_one_surfaces_concurrent_delete_as_error() {
        let repo = memory_repository(Some("U1")).await;
        let entry = repo
            .insert(Entry::new("watched", "", Mood::Tense))
            .await
            .success()
            .cloned()
            .unwrap();
        let mut stream = repo.observe_one(entry.id);
        assert!(stream.next().await.unwrap().success().is_some());

        repo.delete(entry.id).await;

        let state = stream.next().await.unwrap();
        assert!(matches!(
            state.cause(),
            Some(RepositoryError::EntityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn filtered_range_is_padded_and_ascending() {
        let repo = memory_repository(Some("U1")).await;
        for (title, date) in [
            ("too-early", utc(2023, 12, 30, 12)),
            ("pad-early", utc(2023, 12, 31, 12)),
            ("mid", utc(2024, 1, 15, 8)),
            ("start", utc(2024, 1, 1, 10)),
            ("pad-late", utc(2024, 1, 31, 23)),
            ("too-late", utc(2024, 2, 10, 0)),
        ] {
            repo.insert(dated(title, date)).await;
        }

        let mut stream = repo.observe_filtered(utc(2024, 1, 1, 0), utc(2024, 1, 31, 0));
        let groups = stream.next().await.unwrap().success().cloned().unwrap();
        let titles: Vec<_> = groups
            .iter()
            .flat_map(|g| g.entries.iter().map(|e| e.title.clone()))
            .collect();

        assert_eq!(titles, ["pad-early", "start", "mid", "pad-late"]);
    }

    #[tokio::test]
    async fn delete_all_only_touches_callers_entries() {
        let repo = memory_repository(Some("U1")).await;
        repo.insert(Entry::new("mine", "", Mood::Calm)).await;
        repo.session.log_in(User::new("U2"));
        repo.insert(Entry::new("theirs", "", Mood::Calm)).await;

        assert_eq!(repo.delete_all().await.success(), Some(&true));

        assert_eq!(row_count(&repo).await, 1);
        repo.session.log_in(User::new("U1"));
        let mut stream = repo.observe_all();
        let groups = stream.next().await.unwrap().success().cloned().unwrap();
        assert_eq!(groups[0].entries[0].title, "mine");
    }

    #[tokio::test]
    async fn insert_returns_entry_as_later_read() {
        let repo = memory_repository(Some("U1")).await;
        let entry = dated("precise", utc(2024, 3, 1, 8) + Duration::nanoseconds(123_456_789));

        let inserted = repo.insert(entry).await.success().cloned().unwrap();

        assert_eq!(
            inserted.date,
            utc(2024, 3, 1, 8) + Duration::milliseconds(123)
        );
        let mut one = repo.observe_one(inserted.id);
        assert_eq!(one.next().await.unwrap().success(), Some(&inserted));
    }

    #[tokio::test]
    async fn live_query_recovers_after_failed_read() {
        let repo = memory_repository(Some("U1")).await;
        let broken = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO entries (id, owner_id, title, description, mood, date_ms, images)
             VALUES (?, 'U1', 'broken', '', 'Gleeful', 0, '[]')",
        )
        .bind(broken.to_string())
        .execute(&*repo.db)
        .await
        .unwrap();

        let mut stream = repo.observe_all();
        let first = stream.next().await.unwrap();
        assert!(matches!(first.cause(), Some(RepositoryError::Malformed(_))));

        sqlx::query("UPDATE entries SET mood = 'Calm' WHERE id = ?")
            .bind(broken.to_string())
            .execute(&*repo.db)
            .await
            .unwrap();
        repo.insert(Entry::new("fresh", "", Mood::Happy)).await;

        let recovered = stream.next().await.unwrap();
        let titles: Vec<_> = recovered
            .success()
            .unwrap()
            .iter()
            .flat_map(|g| g.entries.iter().map(|e| e.title.clone()))
            .collect();
        assert_eq!(titles, ["fresh", "broken"]);
    }

    #[test]
    fn padded_bounds_truncate_to_seconds() {
        let from = utc(2024, 1, 1, 0) + Duration::milliseconds(750);
        let (lower, upper) = padded_bounds(from, utc(2024, 1, 31, 0));
        assert_eq!(lower, utc(2023, 12, 31, 0).timestamp_millis());
        assert_eq!(upper, utc(2024, 2, 1, 0).timestamp_millis());
    }
}
