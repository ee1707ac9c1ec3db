//! SqliteFeedbackStore - sqlx による FeedbackStore 実装
//!
//! # 設計
//! - 接続プールはコンストラクタで受け取る（グローバルな接続は持たない）
//! - 時刻は固定幅の RFC 3339 文字列（UTC, マイクロ秒）で保存するので、
//!   文字列の並びがそのまま時刻の並びになる
//! - mark_sent は 1 トランザクション
//! - スキーマ変更は migrate() に分離（check-then-alter、何度実行してもよい）
//! - 旧形式の naive な時刻（`2024-04-02 09:15:00` など）は UTC として読む。
//!   migrate() は見つけ次第 RFC 3339 に書き換える

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info, warn};

use crate::domain::{DEFAULT_WEATHER, FeedbackId, FeedbackRecord, NewFeedback, StoreError};
use crate::ports::FeedbackStore;

const TABLE: &str = "weather_feedback";

/// UPDATE 1 文あたりの id 数（SQLite のバインド数上限より十分小さく）
const MARK_CHUNK: usize = 500;

/// 旧スキーマが書いていた時刻の書式（タイムゾーンなし、UTC とみなす）
const LEGACY_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// encode_time が書く固定幅の形にすでになっている値
const CANONICAL_TIME_GLOB: &str =
    "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9].[0-9][0-9][0-9][0-9][0-9][0-9]Z";

const TIME_COLUMNS: [&str; 2] = ["date_of_interaction", "sent_date"];

const SELECT_UNSENT: &str = "SELECT id, action_required, postal_code, municipality, feedback, \
     date_of_interaction, weather, sent_date \
     FROM weather_feedback \
     WHERE sent_date IS NULL \
     ORDER BY date_of_interaction DESC, id DESC";

/// migrate() が適用した変更 1 つ分
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStep {
    CreatedTable,
    AddedColumn(&'static str),
    RenamedColumn { from: &'static str, to: &'static str },
    NormalizedTimestamps { column: &'static str, rows: u64 },
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStep::CreatedTable => write!(f, "created table {TABLE}"),
            MigrationStep::AddedColumn(col) => write!(f, "added column {col}"),
            MigrationStep::RenamedColumn { from, to } => write!(f, "renamed column {from} to {to}"),
            MigrationStep::NormalizedTimestamps { column, rows } => {
                write!(f, "normalized {rows} legacy timestamps in {column}")
            }
        }
    }
}

/// migrate() の結果。スキーマが最新なら applied は空
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<MigrationStep>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SqliteFeedbackStore {
    pool: SqlitePool,
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    LEGACY_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn decode_time(id: FeedbackId, column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    parse_time(raw).ok_or_else(|| StoreError::Corrupt {
        id,
        reason: format!("{column} {raw:?} is neither RFC 3339 nor a legacy timestamp"),
    })
}

fn corrupt(id: FeedbackId) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::Corrupt {
        id,
        reason: e.to_string(),
    }
}

fn record_from_row(row: &SqliteRow) -> Result<FeedbackRecord, StoreError> {
    let id = FeedbackId::new(row.try_get::<i64, _>("id").map_err(unavailable)?);

    let interaction: String = row.try_get("date_of_interaction").map_err(corrupt(id))?;
    let sent: Option<String> = row.try_get("sent_date").map_err(corrupt(id))?;

    Ok(FeedbackRecord {
        id,
        action_required: row.try_get("action_required").map_err(corrupt(id))?,
        postal_code: row.try_get("postal_code").map_err(corrupt(id))?,
        municipality: row.try_get("municipality").map_err(corrupt(id))?,
        feedback_text: row.try_get("feedback").map_err(corrupt(id))?,
        interaction_time: decode_time(id, "date_of_interaction", &interaction)?,
        weather: row.try_get("weather").map_err(corrupt(id))?,
        sent_at: sent
            .as_deref()
            .map(|raw| decode_time(id, "sent_date", raw))
            .transpose()?,
    })
}

impl SqliteFeedbackStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// url のデータベースを開く（なければ作る）
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(unavailable)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(unavailable)?;
        info!(url, "connected to sqlite feedback store");
        Ok(Self::new(pool))
    }

    /// 専用のインメモリ DB。接続は 1 本で使い回さないので、データはストアと同じだけ生きる
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(unavailable)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(unavailable)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// スキーマを最新にする（何度実行してもよい）
    ///
    /// - 列ごとに check-then-alter。最新のスキーマに対しては何も変えない
    /// - 旧 `is_satisfied` 列はフラグを増やさず `action_required` に rename する
    /// - 旧形式の時刻は RFC 3339 に書き換える。読めない値は warn して残す
    ///   （fetch_unsent でその行が Corrupt になる）
    pub async fn migrate(&self) -> Result<MigrationReport, StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let mut report = MigrationReport::default();

        let exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(TABLE)
                .fetch_one(&mut *tx)
                .await
                .map_err(unavailable)?;
        if exists == 0 {
            sqlx::query(
                "CREATE TABLE weather_feedback (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    postal_code TEXT NOT NULL,
                    municipality TEXT NOT NULL,
                    feedback TEXT,
                    date_of_interaction TEXT NOT NULL
                )",
            )
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
            report.applied.push(MigrationStep::CreatedTable);
        }

        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('weather_feedback')")
                .fetch_all(&mut *tx)
                .await
                .map_err(unavailable)?;
        let has = |name: &str| columns.iter().any(|c| c.eq_ignore_ascii_case(name));

        if !has("weather") {
            let ddl = format!(
                "ALTER TABLE weather_feedback ADD COLUMN weather TEXT NOT NULL DEFAULT '{DEFAULT_WEATHER}'"
            );
            sqlx::query(&ddl).execute(&mut *tx).await.map_err(unavailable)?;
            report.applied.push(MigrationStep::AddedColumn("weather"));
        }

        if has("is_satisfied") && !has("action_required") {
            sqlx::query("ALTER TABLE weather_feedback RENAME COLUMN is_satisfied TO action_required")
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
            report.applied.push(MigrationStep::RenamedColumn {
                from: "is_satisfied",
                to: "action_required",
            });
        } else if !has("action_required") {
            sqlx::query(
                "ALTER TABLE weather_feedback ADD COLUMN action_required INTEGER NOT NULL DEFAULT 0",
            )
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
            report.applied.push(MigrationStep::AddedColumn("action_required"));
        }

        if !has("sent_date") {
            sqlx::query("ALTER TABLE weather_feedback ADD COLUMN sent_date TEXT")
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?;
            report.applied.push(MigrationStep::AddedColumn("sent_date"));
        }

        for column in TIME_COLUMNS {
            let rows = normalize_times(&mut tx, column).await?;
            if rows > 0 {
                report.applied.push(MigrationStep::NormalizedTimestamps { column, rows });
            }
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_weather_feedback_unsent \
             ON weather_feedback (sent_date, date_of_interaction)",
        )
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;

        for step in &report.applied {
            info!(%step, "schema migration applied");
        }
        if report.is_noop() {
            debug!("schema already current");
        }
        Ok(report)
    }

    /// 取り込み口。未送信のレコードを 1 件保存して id を返す
    pub async fn insert_feedback(&self, feedback: NewFeedback) -> Result<FeedbackId, StoreError> {
        let feedback = feedback.normalized();
        let result = sqlx::query(
            "INSERT INTO weather_feedback \
             (action_required, postal_code, municipality, feedback, date_of_interaction, weather) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(feedback.action_required)
        .bind(&feedback.postal_code)
        .bind(&feedback.municipality)
        .bind(&feedback.feedback_text)
        .bind(encode_time(feedback.interaction_time))
        .bind(feedback.weather.as_deref().unwrap_or(DEFAULT_WEATHER))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        let id = FeedbackId::new(result.last_insert_rowid());
        debug!(%id, "feedback stored");
        Ok(id)
    }

    pub async fn get(&self, id: FeedbackId) -> Result<Option<FeedbackRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, action_required, postal_code, municipality, feedback, \
             date_of_interaction, weather, sent_date FROM weather_feedback WHERE id = ?",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        row.as_ref().map(record_from_row).transpose()
    }
}

/// column の値のうち固定幅 RFC 3339 でないものを書き換え、書き換えた行数を返す
async fn normalize_times(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    column: &'static str,
) -> Result<u64, StoreError> {
    let select = format!(
        "SELECT id, {column} FROM weather_feedback \
         WHERE {column} IS NOT NULL AND {column} NOT GLOB '{CANONICAL_TIME_GLOB}'"
    );
    let legacy: Vec<(i64, String)> = sqlx::query_as(&select)
        .fetch_all(&mut **tx)
        .await
        .map_err(unavailable)?;

    let update = format!("UPDATE weather_feedback SET {column} = ? WHERE id = ?");
    let mut rows = 0;
    for (id, raw) in legacy {
        let Some(t) = parse_time(&raw) else {
            warn!(id, column, raw = %raw, "unreadable timestamp left as is");
            continue;
        };
        rows += sqlx::query(&update)
            .bind(encode_time(t))
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(unavailable)?
            .rows_affected();
    }
    Ok(rows)
}

#[async_trait]
impl FeedbackStore for SqliteFeedbackStore {
    async fn fetch_unsent(&self) -> Result<Vec<FeedbackRecord>, StoreError> {
        let rows = sqlx::query(SELECT_UNSENT)
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn mark_sent(
        &self,
        ids: &BTreeSet<FeedbackId>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let at = encode_time(at);
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let mut updated = 0;

        for chunk in ids.chunks(MARK_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE weather_feedback SET sent_date = ");
            qb.push_bind(at.clone());
            qb.push(" WHERE sent_date IS NULL AND id IN (");
            let mut list = qb.separated(", ");
            for id in chunk {
                list.push_bind(*id);
            }
            list.push_unseparated(")");

            updated += qb
                .build()
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?
                .rows_affected();
        }

        tx.commit().await.map_err(unavailable)?;
        debug!(requested = ids.len(), updated, "marked feedback as sent");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, hour, 15, 0).unwrap()
    }

    async fn store() -> SqliteFeedbackStore {
        let store = SqliteFeedbackStore::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_migrate_fresh_database() {
        let store = SqliteFeedbackStore::in_memory().await.unwrap();
        let report = store.migrate().await.unwrap();
        assert_eq!(
            report.applied,
            vec![
                MigrationStep::CreatedTable,
                MigrationStep::AddedColumn("weather"),
                MigrationStep::AddedColumn("action_required"),
                MigrationStep::AddedColumn("sent_date"),
            ]
        );
    }

    #[tokio::test]
    async fn test_migrate_twice_is_noop() {
        let store = store().await;
        let second = store.migrate().await.unwrap();
        assert!(second.is_noop());
    }

    #[tokio::test]
    async fn test_migrate_renames_legacy_column_and_keeps_rows() {
        let store = SqliteFeedbackStore::in_memory().await.unwrap();
        sqlx::query(
            "CREATE TABLE weather_feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                is_satisfied INTEGER NOT NULL,
                postal_code TEXT NOT NULL,
                municipality TEXT NOT NULL,
                feedback TEXT,
                date_of_interaction TEXT NOT NULL
            )",
        )
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO weather_feedback (is_satisfied, postal_code, municipality, date_of_interaction) \
             VALUES (1, 'K1A0B1', 'Ottawa', '2024-04-02T09:15:00.000000Z')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let report = store.migrate().await.unwrap();
        assert!(report.applied.contains(&MigrationStep::RenamedColumn {
            from: "is_satisfied",
            to: "action_required"
        }));
        assert!(!report.applied.contains(&MigrationStep::AddedColumn("action_required")));

        let rows = store.fetch_unsent().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].action_required);
        assert_eq!(rows[0].weather, DEFAULT_WEATHER);
        assert!(store.migrate().await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn test_insert_normalizes() {
        let store = store().await;
        let id = store
            .insert_feedback(NewFeedback::new(true, "k1a 0b1", "Ottawa", t(9)).with_feedback("Ice"))
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.postal_code, "K1A 0B1");
        assert_eq!(record.feedback_text.as_deref(), Some("Ice"));
        assert_eq!(record.interaction_time, t(9));
        assert_eq!(record.weather, DEFAULT_WEATHER);
        assert!(record.sent_at.is_none());
    }

    #[tokio::test]
    async fn test_fetch_unsent_newest_first() {
        let store = store().await;
        let t1 = store.insert_feedback(NewFeedback::new(true, "A", "X", t(12))).await.unwrap();
        let t3 = store.insert_feedback(NewFeedback::new(true, "A", "X", t(8))).await.unwrap();
        let t2 = store.insert_feedback(NewFeedback::new(true, "A", "X", t(10))).await.unwrap();

        let ids: Vec<_> = store.fetch_unsent().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![t1, t2, t3]);
    }

    #[tokio::test]
    async fn test_fetch_orders_sub_second_times() {
        let store = store().await;
        let early = store.insert_feedback(NewFeedback::new(true, "A", "X", t(8))).await.unwrap();
        let later = store
            .insert_feedback(NewFeedback::new(true, "A", "X", t(8) + Duration::milliseconds(250)))
            .await
            .unwrap();

        let ids: Vec<_> = store.fetch_unsent().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![later, early]);
    }

    #[tokio::test]
    async fn test_mark_sent_is_idempotent() {
        let store = store().await;
        let a = store.insert_feedback(NewFeedback::new(true, "A", "X", t(8))).await.unwrap();
        let b = store.insert_feedback(NewFeedback::new(true, "A", "X", t(9))).await.unwrap();

        assert_eq!(store.mark_sent(&BTreeSet::from([a]), t(20)).await.unwrap(), 1);
        assert_eq!(store.mark_sent(&BTreeSet::from([a, b]), t(21)).await.unwrap(), 1);
        assert_eq!(store.mark_sent(&BTreeSet::from([a, b]), t(22)).await.unwrap(), 0);

        assert_eq!(store.get(a).await.unwrap().unwrap().sent_at, Some(t(20)));
        assert_eq!(store.get(b).await.unwrap().unwrap().sent_at, Some(t(21)));
        assert!(store.fetch_unsent().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_sent_spans_chunks() {
        let store = store().await;
        let mut ids = BTreeSet::new();
        for _ in 0..(MARK_CHUNK + 3) {
            ids.insert(store.insert_feedback(NewFeedback::new(false, "A", "X", t(8))).await.unwrap());
        }

        let updated = store.mark_sent(&ids, t(20)).await.unwrap();
        assert_eq!(updated as usize, MARK_CHUNK + 3);
        assert!(store.fetch_unsent().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_mark_never_touches_the_store() {
        let store = store().await;
        let a = store.insert_feedback(NewFeedback::new(true, "A", "X", t(8))).await.unwrap();
        store.pool().close().await;

        assert_eq!(store.mark_sent(&BTreeSet::new(), t(20)).await.unwrap(), 0);
        let err = store.mark_sent(&BTreeSet::from([a]), t(20)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_on_closed_pool_is_unavailable() {
        let store = store().await;
        store.pool().close().await;
        assert!(matches!(store.fetch_unsent().await, Err(StoreError::Unavailable(_))));
    }

    async fn legacy_table(store: &SqliteFeedbackStore, times: &[&str]) {
        sqlx::query(
            "CREATE TABLE weather_feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                is_satisfied INTEGER NOT NULL,
                postal_code TEXT NOT NULL,
                municipality TEXT NOT NULL,
                feedback TEXT,
                date_of_interaction TEXT NOT NULL
            )",
        )
        .execute(store.pool())
        .await
        .unwrap();
        for time in times {
            sqlx::query(
                "INSERT INTO weather_feedback (is_satisfied, postal_code, municipality, date_of_interaction) \
                 VALUES (0, 'K1A0B1', 'Ottawa', ?)",
            )
            .bind(*time)
            .execute(store.pool())
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_migrate_rewrites_legacy_timestamps() {
        let store = SqliteFeedbackStore::in_memory().await.unwrap();
        legacy_table(&store, &["2024-04-02 09:15:00", "2024-04-02 11:15:00.500000"]).await;

        let report = store.migrate().await.unwrap();
        assert!(report.applied.contains(&MigrationStep::NormalizedTimestamps {
            column: "date_of_interaction",
            rows: 2
        }));

        let stored: Vec<String> =
            sqlx::query_scalar("SELECT date_of_interaction FROM weather_feedback ORDER BY id")
                .fetch_all(store.pool())
                .await
                .unwrap();
        assert_eq!(stored, vec!["2024-04-02T09:15:00.000000Z", "2024-04-02T11:15:00.500000Z"]);

        let fresh = store.insert_feedback(NewFeedback::new(true, "A", "X", t(10))).await.unwrap();
        let rows = store.fetch_unsent().await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![FeedbackId::new(2), fresh, FeedbackId::new(1)]);
        assert_eq!(rows[2].interaction_time, t(9));

        assert!(store.migrate().await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn test_legacy_timestamp_is_read_as_utc_next_to_valid_rows() {
        let store = store().await;
        store.insert_feedback(NewFeedback::new(true, "A", "X", t(8))).await.unwrap();
        sqlx::query(
            "INSERT INTO weather_feedback (action_required, postal_code, municipality, date_of_interaction) \
             VALUES (0, 'B', 'Y', '2024-04-02 09:15:00')",
        )
        .execute(store.pool())
        .await
        .unwrap();
        store.insert_feedback(NewFeedback::new(true, "C", "Z", t(7))).await.unwrap();

        let rows = store.fetch_unsent().await.unwrap();
        assert_eq!(rows.len(), 3);
        let legacy = rows.iter().find(|r| r.postal_code == "B").unwrap();
        assert_eq!(legacy.interaction_time, t(9));
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_is_corrupt() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO weather_feedback (action_required, postal_code, municipality, date_of_interaction) \
             VALUES (0, 'A', 'X', 'yesterday-ish')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let err = store.fetch_unsent().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
