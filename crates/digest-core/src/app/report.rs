//! Report - レポート生成
//!
//! 純粋関数のみ。取得済みのレコードと生成時刻から HTML / プレーンテキストを作る。
//! ストアには触らない。
//!
//! interaction_time は検証しない（未来の日時でもそのまま表示する）。
//! 1 件の異常値でバッチ全体が止まると、以降どのレコードも届かなくなるため。

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::domain::{FeedbackRecord, RenderError, Report};

pub const REPORT_TITLE: &str = "Weather Feedback Summary";

const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const GENERATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const STYLE: &str = "\
table { border-collapse: collapse; width: 100%; }
th, td { padding: 8px; text-align: left; border: 1px solid #ddd; }
th { background-color: #f2f2f2; }
.no-action { color: green; }
.action-required { color: red; }";

/// records を渡された順のままレポートにする
///
/// 空のスライスは RenderError::EmptyBatch（notifier は空では呼ばない）。
pub fn render(records: &[FeedbackRecord], generated_at: DateTime<Utc>) -> Result<Report, RenderError> {
    if records.is_empty() {
        return Err(RenderError::EmptyBatch);
    }

    Ok(Report {
        html_body: render_html(records, generated_at),
        text_body: render_text(records, generated_at),
        total: records.len(),
        generated_at,
    })
}

fn location(record: &FeedbackRecord) -> String {
    format!("{} ({})", record.municipality, record.postal_code)
}

fn status_class(record: &FeedbackRecord) -> &'static str {
    if record.action_required {
        "action-required"
    } else {
        "no-action"
    }
}

fn render_html(records: &[FeedbackRecord], generated_at: DateTime<Utc>) -> String {
    let mut html = String::with_capacity(1024 + records.len() * 256);

    // write! into a String cannot fail
    let _ = write!(
        html,
        "<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n{STYLE}\n</style>\n</head>\n<body>\n\
         <h2>{REPORT_TITLE}</h2>\n<p>Generated on: {}</p>\n<table>\n\
         <tr><th>Date</th><th>Location</th><th>Action Status</th><th>Feedback</th></tr>\n",
        generated_at.format(GENERATED_FORMAT)
    );

    for record in records {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td></tr>",
            record.interaction_time.format(ROW_TIME_FORMAT),
            escape_html(&location(record)),
            status_class(record),
            record.action_label(),
            escape_html(record.feedback().unwrap_or("-")),
        );
    }

    let _ = write!(
        html,
        "</table>\n<p>Total records: {}</p>\n</body>\n</html>\n",
        records.len()
    );
    html
}

fn render_text(records: &[FeedbackRecord], generated_at: DateTime<Utc>) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "{REPORT_TITLE}");
    let _ = writeln!(text, "Generated on: {}", generated_at.format(GENERATED_FORMAT));
    let _ = writeln!(text);
    for record in records {
        let _ = writeln!(
            text,
            "{} | {} | {} | {}",
            record.interaction_time.format(ROW_TIME_FORMAT),
            location(record),
            record.action_label(),
            record.feedback().unwrap_or("-"),
        );
    }
    let _ = writeln!(text);
    let _ = writeln!(text, "Total records: {}", records.len());
    text
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
