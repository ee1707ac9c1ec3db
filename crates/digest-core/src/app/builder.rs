//! NotifierBuilder - BatchNotifier の構築とワイヤリング
//!
//! 起動時に足りない部品があれば build() で失敗させる（Fail-fast）。

use std::sync::Arc;

use super::notifier::BatchNotifier;
use super::report::REPORT_TITLE;
use crate::ports::{Clock, FeedbackStore, Mailer, SystemClock};

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing required component: {0}")]
    Missing(&'static str),

    #[error("invalid recipient address: {0:?}")]
    InvalidRecipient(String),
}

/// # 使用例
/// ```ignore
/// let notifier = NotifierBuilder::new()
///     .store(store)
///     .mailer(mailer)
///     .recipient("ops@example.com")
///     .build()?;
/// let result = notifier.run_once().await?;
/// ```
///
/// clock の既定は [`SystemClock`]、subject_prefix の既定はレポートのタイトル。
pub struct NotifierBuilder {
    store: Option<Arc<dyn FeedbackStore>>,
    mailer: Option<Arc<dyn Mailer>>,
    clock: Arc<dyn Clock>,
    recipient: Option<String>,
    subject_prefix: String,
}

impl NotifierBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            mailer: None,
            clock: Arc::new(SystemClock),
            recipient: None,
            subject_prefix: REPORT_TITLE.to_string(),
        }
    }

    pub fn store(mut self, store: Arc<dyn FeedbackStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<BatchNotifier, BuildError> {
        let store = self.store.ok_or(BuildError::Missing("store"))?;
        let mailer = self.mailer.ok_or(BuildError::Missing("mailer"))?;
        let recipient = self.recipient.ok_or(BuildError::Missing("recipient"))?;
        let recipient = recipient.trim().to_string();
        if !is_plausible_address(&recipient) {
            return Err(BuildError::InvalidRecipient(recipient));
        }

        Ok(BatchNotifier {
            store,
            mailer,
            clock: self.clock,
            recipient,
            subject_prefix: self.subject_prefix,
        })
    }
}

impl Default for NotifierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `local@domain` の形で、どちらも空でなく空白を含まない
fn is_plausible_address(addr: &str) -> bool {
    match addr.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !addr.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
