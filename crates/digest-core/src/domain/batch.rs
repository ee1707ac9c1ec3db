//! Batch - 1 回の実行で扱うレコード集合とその結果
//!
//! Batch は永続化されない。run_once の間だけ存在する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ids::FeedbackId;
use super::record::FeedbackRecord;

/// Report は 1 バッチ分のレンダリング結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub html_body: String,
    pub text_body: String,
    pub total: usize,
    pub generated_at: DateTime<Utc>,
}

/// Batch は実行の最初に取得したレコード（取得順）とそのレポート
#[derive(Debug, Clone)]
pub struct Batch {
    records: Vec<FeedbackRecord>,
    report: Report,
}

impl Batch {
    pub fn new(records: Vec<FeedbackRecord>, report: Report) -> Self {
        Self { records, report }
    }

    pub fn records(&self) -> &[FeedbackRecord] {
        &self.records
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    /// fetch 時点の id 集合。mark するのはこれ
    pub fn ids(&self) -> BTreeSet<FeedbackId> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// BatchResult は run_once 1 回の結果
///
/// ストアやレンダリングの失敗はここには入らない（run_once の `Err` になる）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BatchResult {
    NoPendingRecords,
    /// count は取得して配送した件数（mark_sent が返した件数ではない）
    Delivered { count: usize },
    DeliveryFailed { reason: String },
}

impl BatchResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, BatchResult::Delivered { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::NewFeedback;
    use chrono::TimeZone;

    #[test]
    fn ids_follow_fetched_records() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let records = vec![
            NewFeedback::new(true, "A1A1A1", "Here", t).into_record(FeedbackId::new(9)),
            NewFeedback::new(false, "B2B2B2", "There", t).into_record(FeedbackId::new(4)),
        ];
        let report = Report {
            html_body: String::new(),
            text_body: String::new(),
            total: 2,
            generated_at: t,
        };
        let batch = Batch::new(records, report);

        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.ids().into_iter().collect::<Vec<_>>(),
            vec![FeedbackId::new(4), FeedbackId::new(9)]
        );
        // fetch 順はそのまま
        assert_eq!(batch.records()[0].id, FeedbackId::new(9));
    }

    #[test]
    fn batch_result_is_tagged() {
        let v = serde_json::to_value(BatchResult::Delivered { count: 3 }).unwrap();
        assert_eq!(v["result"], "delivered");
        assert_eq!(v["count"], 3);

        let v = serde_json::to_value(BatchResult::NoPendingRecords).unwrap();
        assert_eq!(v["result"], "no_pending_records");
    }
}
