//! digest-core
//!
//! Feedback digest の中核: 未送信のフィードバックを集めてレポートを送り、
//! 送信済みとしてマークする at-least-once バッチパイプライン。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, record, batch, errors）
//! - **ports**: 抽象化レイヤー（FeedbackStore, Mailer, Clock）
//! - **app**: アプリケーションロジック（builder, notifier, report）
//! - **impls**: ports の実装（InMemory 系、SQLite、spool mailer）

pub mod domain;
pub mod ports;
pub mod app;
pub mod impls;

pub use app::{BatchNotifier, NotifierBuilder};
pub use domain::{BatchResult, DigestError, FeedbackId, FeedbackRecord, NewFeedback};
