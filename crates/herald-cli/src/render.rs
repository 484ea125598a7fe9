//! Text rendering of the notification bell.
//!
//! Pure functions over a [`NotificationView`]; nothing here touches the
//! subsystem.

use std::fmt::Write as _;

use chrono::{DateTime, TimeZone, Utc};
use herald_core::{Notification, NotificationId};
use herald_runtime::{NotificationView, StoreSnapshot};

/// Badges above this show `99+`.
const BADGE_CAP: usize = 99;

/// Badge text, or `None` when nothing is unread.
pub fn badge_label(unread: usize) -> Option<String> {
    match unread {
        0 => None,
        n if n > BADGE_CAP => Some(format!("{BADGE_CAP}+")),
        n => Some(n.to_string()),
    }
}

/// Connection indicator.
pub fn status_label(connected: bool) -> &'static str {
    if connected { "● Online" } else { "● Offline" }
}

/// One-line bell: icon, optional badge, connection indicator.
pub fn render_bell(view: &NotificationView) -> String {
    let mut line = String::from("🔔");
    if let Some(badge) = badge_label(view.snapshot.unread_count) {
        let _ = write!(line, " ({badge})");
    }
    let _ = write!(line, "  {}", status_label(view.connected));
    line
}

/// Dropdown body: numbered records with unread markers, or the empty state,
/// followed by the total.
pub fn render_dropdown<Tz>(snapshot: &StoreSnapshot, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    if snapshot.is_empty() {
        return "No notifications yet\n".to_string();
    }
    let mut out = String::new();
    for (index, record) in snapshot.notifications.iter().enumerate() {
        let _ = writeln!(out, "{}", render_row(index + 1, record, tz));
    }
    let _ = writeln!(out, "{} total notifications", snapshot.len());
    out
}

fn render_row<Tz>(position: usize, record: &Notification, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let marker = if record.read { ' ' } else { '•' };
    format!(
        "{marker} #{position:<3} {}  [{}]  (id {})",
        record.message,
        local_time(record.created_at, tz),
        record.id
    )
}

fn local_time<Tz>(at: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.with_timezone(tz).format("%Y-%m-%d %H:%M").to_string()
}

/// What a click on a dropdown entry resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Click {
    /// An unread record; acknowledge it.
    Mark(NotificationId),
    /// The record is already read; clicking does nothing.
    AlreadyRead,
    /// No such entry.
    Unknown,
}

/// Resolve `target` against the dropdown: `#n` selects by position
/// (1-based), anything else is an id.
pub fn resolve_click(snapshot: &StoreSnapshot, target: &str) -> Click {
    let target = target.trim();
    let record = match target.strip_prefix('#') {
        Some(position) => position
            .parse::<usize>()
            .ok()
            .and_then(|p| p.checked_sub(1))
            .and_then(|i| snapshot.notifications.get(i)),
        None => snapshot.notifications.iter().find(|n| n.id.as_str() == target),
    };
    match record {
        Some(n) if n.read => Click::AlreadyRead,
        Some(n) => Click::Mark(n.id.clone()),
        None => Click::Unknown,
    }
}
