//! Feedback identifiers.
//!
//! ID はストアが作成時に採番する（再利用されない）。コア側では生成しない。

use serde::{Deserialize, Serialize};
use std::fmt;

/// FeedbackRecord の識別子
///
/// `#[serde(transparent)]` なので JSON 上はただの数値になる。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(i64);

impl FeedbackId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for FeedbackId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feedback-{}", self.0)
    }
}
