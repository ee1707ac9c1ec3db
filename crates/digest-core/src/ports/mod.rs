//! Ports - 抽象化レイヤー
//!
//! パイプラインが外部に依存する箇所をすべて trait として切り出す。
//! - FeedbackStore: フィードバックの正本（relational store）
//! - Mailer: レポートの配送先
//! - Clock: 現在時刻（テストでは固定）

pub mod clock;
pub mod feedback_store;
pub mod mailer;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::feedback_store::FeedbackStore;
pub use self::mailer::Mailer;
