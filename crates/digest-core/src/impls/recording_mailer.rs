//! RecordingMailer - 送信内容をメモリに記録する Mailer
//!
//! テストと dry-run 用。fail_with() で失敗を仕込むと clear_failure() まで毎回失敗する。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::DeliveryError;
use crate::ports::Mailer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Default)]
struct RecordingState {
    sent: Vec<SentMessage>,
    attempts: usize,
    failure: Option<DeliveryError>,
}

#[derive(Clone, Default)]
pub struct RecordingMailer {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_with(&self, error: DeliveryError) {
        self.state.lock().await.failure = Some(error);
    }

    pub async fn clear_failure(&self) {
        self.state.lock().await.failure = None;
    }

    /// 配送に成功したメッセージ（古い順）
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().await.sent.clone()
    }

    /// send が呼ばれた回数（成否を問わない）
    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), DeliveryError> {
        let mut state = self.state.lock().await;
        state.attempts += 1;
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        state.sent.push(SentMessage {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }
}
