//! Feedback records as the pipeline sees them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::FeedbackId;

/// 天気情報なしで投稿されたときに保存する値
pub const DEFAULT_WEATHER: &str = "Weather data not available";

/// FeedbackRecord はユーザーが投稿した 1 件の観測
///
/// notifier が変更するのは sent_at だけで、`None` から `Some(_)` への一方向のみ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: FeedbackId,
    pub action_required: bool,
    pub postal_code: String,
    pub municipality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_text: Option<String>,
    /// 観測した出来事の日時（行の作成日時ではない）
    pub interaction_time: DateTime<Utc>,
    pub weather: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl FeedbackRecord {
    /// 次のバッチの対象か
    pub fn is_eligible(&self) -> bool {
        self.sent_at.is_none()
    }

    pub fn action_label(&self) -> &'static str {
        if self.action_required {
            "Action Required"
        } else {
            "No Action Required"
        }
    }

    /// フィードバック本文。なし・空白のみなら `None`
    pub fn feedback(&self) -> Option<&str> {
        self.feedback_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// NewFeedback は取り込み時の入力（ストアが id を振る前のレコード）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFeedback {
    pub action_required: bool,
    pub postal_code: String,
    pub municipality: String,
    #[serde(default)]
    pub feedback_text: Option<String>,
    pub interaction_time: DateTime<Utc>,
    #[serde(default)]
    pub weather: Option<String>,
}

impl NewFeedback {
    pub fn new(
        action_required: bool,
        postal_code: impl Into<String>,
        municipality: impl Into<String>,
        interaction_time: DateTime<Utc>,
    ) -> Self {
        Self {
            action_required,
            postal_code: postal_code.into(),
            municipality: municipality.into(),
            feedback_text: None,
            interaction_time,
            weather: None,
        }
    }

    pub fn with_feedback(mut self, text: impl Into<String>) -> Self {
        self.feedback_text = Some(text.into());
        self
    }

    pub fn with_weather(mut self, weather: impl Into<String>) -> Self {
        self.weather = Some(weather.into());
        self
    }

    /// 郵便番号を大文字にし、天気の既定値を埋める。ストアは書き込み前にこれを呼ぶ
    pub fn normalized(mut self) -> Self {
        self.postal_code = self.postal_code.trim().to_uppercase();
        if self.weather.as_deref().is_none_or(|w| w.trim().is_empty()) {
            self.weather = Some(DEFAULT_WEATHER.to_string());
        }
        self
    }

    /// id が決まったあとに保存用のレコードを作る
    pub fn into_record(self, id: FeedbackId) -> FeedbackRecord {
        let normalized = self.normalized();
        FeedbackRecord {
            id,
            action_required: normalized.action_required,
            postal_code: normalized.postal_code,
            municipality: normalized.municipality,
            feedback_text: normalized.feedback_text,
            interaction_time: normalized.interaction_time,
            weather: normalized
                .weather
                .unwrap_or_else(|| DEFAULT_WEATHER.to_string()),
            sent_at: None,
        }
    }
}
