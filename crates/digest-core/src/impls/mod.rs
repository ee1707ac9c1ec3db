//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryFeedbackStore**: 開発・テスト用のストア（障害注入つき）
//! - **SqliteFeedbackStore**: sqlx による本番用ストア + スキーマ migration
//! - **RecordingMailer**: 送信内容を記録するだけの Mailer
//! - **SpoolMailer**: スプールディレクトリに書き出す Mailer

pub mod inmem_store;
pub mod recording_mailer;
pub mod spool_mailer;
pub mod sqlite_store;

pub use self::inmem_store::InMemoryFeedbackStore;
pub use self::recording_mailer::{RecordingMailer, SentMessage};
pub use self::spool_mailer::SpoolMailer;
pub use self::sqlite_store::{MigrationReport, MigrationStep, SqliteFeedbackStore};
