//! BatchNotifier - 1 回分のバッチ実行
//!
//! # フロー
//! 1. FeedbackStore::fetch_unsent() で未送信レコードを取得（空なら何もしない）
//! 2. report::render() でレポート生成
//! 3. Mailer::send() で配送
//! 4. 成功したときだけ、手順 1 で取った id 集合を mark_sent
//!
//! mark は配送の後。配送と mark の間で落ちると次回に同じレコードがもう一度届く
//! （重複はあり得るが、取りこぼしはない）。

use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};

use super::report;
use crate::domain::{Batch, BatchResult, DigestError};
use crate::ports::{Clock, FeedbackStore, Mailer};

/// BatchNotifier は fetch → render → deliver → mark を 1 回流す
///
/// 実行間で状態を持たない。実行の重なりはここでは防がないので、呼び出し側で直列化する。
pub struct BatchNotifier {
    pub(crate) store: Arc<dyn FeedbackStore>,
    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) recipient: String,
    pub(crate) subject_prefix: String,
}

impl BatchNotifier {
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// 1 回分の実行
    ///
    /// `Err` は fetch か render の失敗で、何も配送も mark もしていない。
    /// 配送後の mark_sent 失敗はログに残したうえで `Delivered` を返す。
    pub async fn run_once(&self) -> Result<BatchResult, DigestError> {
        let span = info_span!("digest_run", recipient = %self.recipient);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<BatchResult, DigestError> {
        let records = self.store.fetch_unsent().await.inspect_err(|e| {
            error!(error = %e, "fetch of unsent feedback failed; nothing delivered");
        })?;

        if records.is_empty() {
            info!("no pending feedback");
            return Ok(BatchResult::NoPendingRecords);
        }

        let now = self.clock.now();
        let ahead: Vec<i64> = records
            .iter()
            .filter(|r| r.interaction_time > now)
            .map(|r| r.id.get())
            .collect();
        if !ahead.is_empty() {
            warn!(ids = ?ahead, "interaction time is in the future; delivering anyway");
        }

        let report = report::render(&records, now).inspect_err(|e| {
            let ids: Vec<i64> = records.iter().map(|r| r.id.get()).collect();
            error!(error = %e, ?ids, "report rendering failed; batch left unsent");
        })?;
        let batch = Batch::new(records, report);
        let ids = batch.ids();
        debug!(batch_size = batch.len(), preview = %batch.report().text_body, "rendered batch");

        let subject = format!("{} - {}", self.subject_prefix, now.format("%Y-%m-%d %H:%M"));
        if let Err(e) = self
            .mailer
            .send(&self.recipient, &subject, &batch.report().html_body)
            .await
        {
            warn!(
                error = %e,
                kind = ?e.kind(),
                batch_size = batch.len(),
                "delivery failed; records stay pending for the next run"
            );
            return Ok(BatchResult::DeliveryFailed { reason: e.to_string() });
        }

        let count = batch.len();
        let marked_at = self.clock.now();
        match self.store.mark_sent(&ids, marked_at).await {
            Ok(updated) if updated as usize == count => {
                info!(batch_size = count, updated, "feedback summary delivered and marked");
            }
            Ok(updated) => {
                warn!(
                    batch_size = count,
                    updated,
                    ids = ?ids.iter().map(|id| id.get()).collect::<Vec<_>>(),
                    "delivered, but some records were already marked by someone else"
                );
            }
            Err(e) => {
                error!(
                    error = %e,
                    batch_size = count,
                    ids = ?ids.iter().map(|id| id.get()).collect::<Vec<_>>(),
                    "delivered, but marking failed; these records will be delivered again next run"
                );
            }
        }

        Ok(BatchResult::Delivered { count })
    }
}
