//! App - アプリケーション層
//!
//! ports を組み合わせてパイプラインを実装する。
//!
//! # 主要コンポーネント
//! - **NotifierBuilder**: 構築とワイヤリング
//! - **BatchNotifier**: fetch → render → deliver → mark
//! - **report**: レポート生成（純粋関数）

pub mod builder;
pub mod notifier;
pub mod report;

pub use self::builder::{BuildError, NotifierBuilder};
pub use self::notifier::BatchNotifier;
