//! Errors - エラー型と分類
//!
//! - StoreError: ストアに届かない / 行が壊れている（時刻が読めない行もここ）
//! - DeliveryError: メール送信の失敗（run_once 内で DeliveryFailed に回収される）
//! - RenderError: レポート生成の失敗（配送前に中断）
//! - DigestError: run_once が返すエラー

use thiserror::Error;

use super::ids::FeedbackId;

/// ErrorKind は運用上の分類
///
/// - Transient: 次回の実行で自然に回復する見込み
/// - Permanent: データを直さない限り回復しない
/// - Infrastructure: ストアなど外部基盤の障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: FeedbackId, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("message rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot render an empty batch")]
    EmptyBatch,
}

/// DigestError は run_once を中断させるエラー（配送も mark もされない）
#[derive(Debug, Error)]
pub enum DigestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl DigestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DigestError::Store(StoreError::Unavailable(_)) => ErrorKind::Infrastructure,
            DigestError::Store(StoreError::Corrupt { .. }) => ErrorKind::Permanent,
            DigestError::Render(_) => ErrorKind::Permanent,
        }
    }
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::Transport(_) => ErrorKind::Transient,
            DeliveryError::Rejected(_) => ErrorKind::Permanent,
        }
    }
}
