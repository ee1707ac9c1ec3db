//! FeedbackStore port - フィードバックの正本（source of truth）
//!
//! # 実装
//! - `impls::InMemoryFeedbackStore`（テスト・開発用）
//! - `impls::SqliteFeedbackStore`（sqlx）

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{FeedbackId, FeedbackRecord, StoreError};

/// FeedbackStore は notifier が使うレコードストア
///
/// どちらのメソッドも I/O で待つことがあり、タイムアウトは持たない。必要なら呼び出し側で包む。
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// sent_at が未設定のレコードをすべて、interaction_time の新しい順で返す
    /// （同時刻は id の大きい順）
    ///
    /// 未送信がなければ空。1 回の一貫した読み取りで、重複も他者が mark 済みのものも含まない。
    async fn fetch_unsent(&self) -> Result<Vec<FeedbackRecord>, StoreError>;

    /// ids のうち sent_at が未設定のものに `sent_at = at` を設定し、変更した行数を返す
    ///
    /// - mark 済み・存在しない id はエラーではなくスキップ
    /// - 集合全体で all-or-nothing
    /// - 空集合はストアに触れずに `Ok(0)`
    async fn mark_sent(
        &self,
        ids: &BTreeSet<FeedbackId>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
