//! Telegram HTML rendering for status-change alerts.
//!
//! Escalations (any transition into red) are marked with the 🚨 header in single
//! messages, and with a trailing `!` on the row plus a 🚨 count line in batch tables.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::models::{SignalChange, Status};

const DOMINO_WIDTH: usize = 18;
const SIGNAL_WIDTH: usize = 22;
const ESCALATION_MARKER: &str = "🚨";
/// Telegram caps `sendMessage` text at 4096 characters; rows stop here to leave
/// room for the closing tag and footer lines.
const TABLE_BUDGET: usize = 3700;

const DOMINO_NAMES: &[(i32, &str)] = &[
    (1, "AI Capability Surge"),
    (2, "White-Collar Labor Shock"),
    (3, "Consumer Demand Slowdown"),
    (4, "Credit Stress"),
    (5, "SaaS Revenue Compression"),
    (6, "Market Repricing"),
];

pub fn domino_label(domino_id: i32) -> String {
    DOMINO_NAMES
        .iter()
        .find(|(id, _)| *id == domino_id)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| format!("Domino {domino_id}"))
}

pub fn status_marker(status: &str) -> &'static str {
    match status.parse::<Status>() {
        Ok(Status::Green) => "🟢",
        Ok(Status::Amber) => "🟡",
        Ok(Status::Red) => "🔴",
        Err(_) => "⚪",
    }
}

fn status_letter(status: &str) -> char {
    match status.parse::<Status>() {
        Ok(Status::Green) => 'G',
        Ok(Status::Amber) => 'A',
        Ok(Status::Red) => 'R',
        Err(_) => '?',
    }
}

fn trigger_code(trigger: &str) -> char {
    trigger
        .chars()
        .find(|c| c.is_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('?')
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[derive(Debug, Clone)]
pub struct Renderer {
    timezone: Tz,
}

impl Renderer {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    fn timestamp(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M %Z")
            .to_string()
    }

    pub fn single(&self, change: &SignalChange) -> String {
        let mut out = String::new();
        if change.is_escalation() {
            let _ = writeln!(out, "{ESCALATION_MARKER} <b>RED ESCALATION</b>");
        } else {
            let _ = writeln!(out, "📊 <b>Signal status change</b>");
        }
        let _ = writeln!(
            out,
            "{} → {} <b>{}</b>",
            status_marker(&change.old_status),
            status_marker(&change.new_status),
            escape_html(&change.signal_name)
        );
        let _ = writeln!(out, "Domino: {}", escape_html(&domino_label(change.domino_id)));
        let _ = writeln!(
            out,
            "Status: {} → {}",
            escape_html(&change.old_status),
            escape_html(&change.new_status)
        );
        if let Some(reason) = change.reason.as_deref().filter(|r| !r.trim().is_empty()) {
            let _ = writeln!(out, "Reason: {}", escape_html(reason));
        }
        let _ = write!(
            out,
            "<i>Trigger: {} · {}</i>",
            escape_html(&change.trigger_type),
            self.timestamp(change.changed_at)
        );
        out
    }

    pub fn batch(&self, changes: &[&SignalChange]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "📊 <b>{} signal status changes</b>", changes.len());
        let _ = writeln!(out, "<pre>");
        let _ = writeln!(
            out,
            "{}",
            escape_html(&format!(
                "{:>2}  {:<dw$}  {:<sw$}  {:<3}  T",
                "#",
                "Domino",
                "Signal",
                "Δ",
                dw = DOMINO_WIDTH,
                sw = SIGNAL_WIDTH
            ))
        );
        let mut length = out.chars().count();
        let mut omitted = 0;
        for (index, change) in changes.iter().enumerate() {
            let row = format!(
                "{:>2}  {:<dw$}  {:<sw$}  {}→{}  {}{}",
                index + 1,
                truncate(&domino_label(change.domino_id), DOMINO_WIDTH),
                truncate(&change.signal_name, SIGNAL_WIDTH),
                status_letter(&change.old_status),
                status_letter(&change.new_status),
                trigger_code(&change.trigger_type),
                if change.is_escalation() { " !" } else { "" },
                dw = DOMINO_WIDTH,
                sw = SIGNAL_WIDTH
            );
            let row = escape_html(&row);
            let row_length = row.chars().count() + 1;
            if length + row_length > TABLE_BUDGET {
                omitted = changes.len() - index;
                break;
            }
            length += row_length;
            let _ = writeln!(out, "{row}");
        }
        if omitted > 0 {
            let _ = writeln!(out, "…and {omitted} more");
        }
        let _ = writeln!(out, "</pre>");

        let escalations = changes.iter().filter(|c| c.is_escalation()).count();
        if escalations > 0 {
            let plural = if escalations == 1 { "" } else { "s" };
            let _ = writeln!(
                out,
                "{ESCALATION_MARKER} <b>{escalations} red escalation{plural}</b>"
            );
        }
        if let Some(latest) = changes.iter().map(|c| c.changed_at).max() {
            let _ = write!(out, "<i>{}</i>", self.timestamp(latest));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn change(domino_id: i32, name: &str, old: &str, new: &str) -> SignalChange {
        SignalChange {
            id: Uuid::new_v4(),
            domino_id,
            signal_name: name.to_string(),
            old_status: old.to_string(),
            new_status: new.to_string(),
            trigger_type: "cron".to_string(),
            reason: Some("Latest value \"<b>118%</b> & rising\"".to_string()),
            changed_at: Utc.with_ymd_and_hms(2026, 1, 15, 17, 30, 0).unwrap(),
        }
    }

    fn renderer() -> Renderer {
        Renderer::new(chrono_tz::America::New_York)
    }

    #[test]
    fn red_single_message_is_an_escalation() {
        let text = renderer().single(&change(4, "VIX", "amber", "red"));
        assert!(text.starts_with("🚨 <b>RED ESCALATION</b>"));
        assert!(text.contains("🟡 → 🔴"));

        let calm = renderer().single(&change(4, "VIX", "red", "amber"));
        assert!(!calm.contains(ESCALATION_MARKER));
    }

    #[test]
    fn user_text_is_escaped() {
        let text = renderer().single(&change(1, "<script>", "green", "amber"));
        assert!(text.contains("&lt;script&gt;"));
        assert!(text.contains("&quot;&lt;b&gt;118%&lt;/b&gt; &amp; rising&quot;"));
        assert!(!text.contains("<script>"));
    }

    #[test]
    fn timestamps_use_reference_zone() {
        let text = renderer().single(&change(1, "X", "green", "amber"));
        assert!(text.contains("2026-01-15 12:30 EST"), "{text}");
    }

    #[test]
    fn unknown_values_fall_back() {
        assert_eq!(domino_label(42), "Domino 42");
        assert_eq!(domino_label(5), "SaaS Revenue Compression");
        assert_eq!(status_marker("purple"), "⚪");
        assert_eq!(status_letter("purple"), '?');
        assert_eq!(trigger_code("manual"), 'M');
        assert_eq!(trigger_code(""), '?');
    }

    #[test]
    fn batch_table_truncates_and_counts_escalations() {
        let a = change(2, "Professional Services Job Openings Index", "green", "red");
        let b = change(99, "VIX", "red", "amber");
        let c = change(3, "Consumer Sentiment Index", "amber", "red");
        let text = renderer().batch(&[&a, &b, &c]);

        assert!(text.contains("<pre>"));
        assert!(text.contains("White-Collar Labo…"));
        assert!(text.contains("Professional Services…"));
        assert!(text.contains("Domino 99"));
        assert!(text.contains("G→R  C !"));
        assert!(text.contains("R→A  C\n"));
        assert!(text.contains("🚨 <b>2 red escalations</b>"));

        let rows: Vec<&str> = text.lines().filter(|l| l.contains('→')).collect();
        assert!(rows[0].starts_with(" 1"));
        assert!(rows[1].starts_with(" 2"));
        assert!(rows[2].starts_with(" 3"));
    }

    #[test]
    fn batch_without_red_has_no_escalation_line() {
        let a = change(1, "A", "green", "amber");
        let text = renderer().batch(&[&a]);
        assert!(!text.contains(ESCALATION_MARKER));
    }

    #[test]
    fn large_batches_stay_within_message_limit() {
        let changes: Vec<SignalChange> = (0..80)
            .map(|i| {
                change(
                    2,
                    &format!("Claims & Openings <{i}> Rolling Average"),
                    "green",
                    "red",
                )
            })
            .collect();
        let refs: Vec<&SignalChange> = changes.iter().collect();
        let text = renderer().batch(&refs);

        assert!(text.chars().count() <= 4096, "{} chars", text.chars().count());
        assert!(text.starts_with("📊 <b>80 signal status changes</b>"));
        assert!(text.contains("🚨 <b>80 red escalations</b>"));

        let shown = text.lines().filter(|l| l.contains('→')).count();
        let more = text
            .lines()
            .find_map(|l| l.strip_prefix("…and "))
            .and_then(|rest| rest.strip_suffix(" more"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap();
        assert!(shown > 0);
        assert_eq!(shown + more, 80);
    }

    #[test]
    fn small_batches_are_not_cut() {
        let a = change(1, "A", "green", "amber");
        let b = change(1, "B", "green", "amber");
        let text = renderer().batch(&[&a, &b]);
        assert!(!text.contains("more"));
    }
}
