//! InMemoryFeedbackStore - 開発・テスト用のストア
//!
//! # 実装詳細
//! - BTreeMap<FeedbackId, FeedbackRecord> を tokio::sync::Mutex で保護
//! - mark_sent は 1 回のロックの中で完結する（all-or-nothing）
//! - 障害注入: fetch / mark を StoreError::Unavailable で失敗させられる

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{FeedbackId, FeedbackRecord, NewFeedback, StoreError};
use crate::ports::FeedbackStore;

struct InMemoryStoreState {
    records: BTreeMap<FeedbackId, FeedbackRecord>,
    next_id: i64,
    fetch_unavailable: bool,
    /// 残り何回の mark_sent を失敗させるか
    failing_marks: u32,
    mark_calls: usize,
    rows_marked: u64,
}

impl InMemoryStoreState {
    fn allocate_id(&mut self) -> FeedbackId {
        let id = FeedbackId::new(self.next_id);
        self.next_id += 1;
        id
    }
}

#[derive(Clone)]
pub struct InMemoryFeedbackStore {
    state: Arc<Mutex<InMemoryStoreState>>,
}

impl InMemoryFeedbackStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState {
                records: BTreeMap::new(),
                next_id: 1,
                fetch_unavailable: false,
                failing_marks: 0,
                mark_calls: 0,
                rows_marked: 0,
            })),
        }
    }

    /// 取り込み口。id は 1 から振り、再利用しない
    pub async fn insert(&self, feedback: NewFeedback) -> FeedbackId {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        state.records.insert(id, feedback.into_record(id));
        id
    }

    pub async fn get(&self, id: FeedbackId) -> Option<FeedbackRecord> {
        self.state.lock().await.records.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<FeedbackRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }

    pub async fn set_fetch_unavailable(&self, unavailable: bool) {
        self.state.lock().await.fetch_unavailable = unavailable;
    }

    /// 次の n 回の mark_sent を `Unavailable` で失敗させる（何も変更しない）
    pub async fn fail_next_marks(&self, n: u32) {
        self.state.lock().await.failing_marks = n;
    }

    /// ストアまで届いた mark_sent の回数（空集合は数えない）
    pub async fn mark_calls(&self) -> usize {
        self.state.lock().await.mark_calls
    }

    /// sent_at が変わった行数の合計
    pub async fn rows_marked(&self) -> u64 {
        self.state.lock().await.rows_marked
    }
}

impl Default for InMemoryFeedbackStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedbackStore for InMemoryFeedbackStore {
    async fn fetch_unsent(&self) -> Result<Vec<FeedbackRecord>, StoreError> {
        let state = self.state.lock().await;
        if state.fetch_unavailable {
            return Err(StoreError::Unavailable("in-memory store: fetch disabled".into()));
        }

        let mut unsent: Vec<FeedbackRecord> = state
            .records
            .values()
            .filter(|r| r.is_eligible())
            .cloned()
            .collect();
        unsent.sort_by(|a, b| {
            b.interaction_time
                .cmp(&a.interaction_time)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(unsent)
    }

    async fn mark_sent(
        &self,
        ids: &BTreeSet<FeedbackId>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        state.mark_calls += 1;
        if state.failing_marks > 0 {
            state.failing_marks -= 1;
            return Err(StoreError::Unavailable("in-memory store: mark disabled".into()));
        }

        let mut updated = 0;
        for id in ids {
            if let Some(record) = state.records.get_mut(id)
                && record.sent_at.is_none()
            {
                record.sent_at = Some(at);
                updated += 1;
            }
        }
        state.rows_marked += updated;
        Ok(updated)
    }
}
