//! Mailer port - レポートの配送
//!
//! SMTP などの転送の詳細はこの trait の外側。notifier からは成功か失敗かしか見えない。

use async_trait::async_trait;

use crate::domain::DeliveryError;

/// Mailer はメッセージを 1 通配送する
///
/// リトライはしない（次回の実行に任せる）。
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str)
    -> Result<(), DeliveryError>;
}
