//! Query filters, pagination and windowed statistics over one tenant's events.

use crate::contact::{classify, phone_suffix, ContactKind};
use crate::event::{Channel, Direction, MessageEvent};
use crate::status::{is_failure_status, CanonicalStatus, EventStatus};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_PAGE_LIMIT: u32 = 25;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Optional filters; the tenant is never part of this struct, it is a separate mandatory argument.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub channel: Option<Channel>,
    pub lead_id: Option<String>,
    pub status: Option<EventStatus>,
    pub direction: Option<Direction>,
    /// Case-insensitive substring over the contact identifier.
    pub search: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn matches(&self, ev: &MessageEvent) -> bool {
        if let Some(c) = self.channel {
            if ev.channel != c {
                return false;
            }
        }
        if let Some(ref lead) = self.lead_id {
            if ev.lead_id() != lead {
                return false;
            }
        }
        if let Some(ref s) = self.status {
            if &ev.status != s {
                return false;
            }
        }
        if let Some(d) = self.direction {
            if ev.direction != d {
                return false;
            }
        }
        if let Some(ref needle) = self.search {
            let needle = needle.trim().to_lowercase();
            if !needle.is_empty() && !ev.contact_identifier.to_lowercase().contains(&needle) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if ev.event_timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if ev.event_timestamp > until {
                return false;
            }
        }
        true
    }
}

/// 1-based page request. Limit is clamped to `1..=MAX_PAGE_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.filter(|p| *p > 0).unwrap_or(1),
            limit: limit
                .filter(|l| *l > 0)
                .unwrap_or(DEFAULT_PAGE_LIMIT)
                .min(MAX_PAGE_LIMIT),
        }
    }

    fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPage {
    pub items: Vec<MessageEvent>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
    pub next_page: Option<u32>,
}

/// Sort newest first and cut one page out of an already-filtered list.
pub(crate) fn paginate(mut events: Vec<MessageEvent>, page: Page) -> EventsPage {
    sort_newest_first(&mut events);
    let total = events.len();
    let offset = page.offset();
    let items: Vec<MessageEvent> = events
        .into_iter()
        .skip(offset)
        .take(page.limit as usize)
        .collect();
    let has_more = offset + (page.limit as usize) < total;
    EventsPage {
        items,
        total,
        page: page.page,
        limit: page.limit,
        has_more,
        next_page: if has_more { Some(page.page + 1) } else { None },
    }
}

pub(crate) fn sort_newest_first(events: &mut [MessageEvent]) {
    events.sort_by(|a, b| {
        b.event_timestamp
            .cmp(&a.event_timestamp)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

/// True when `ev` was sent to or received from the given contact (email exact, phone by suffix).
pub(crate) fn contact_matches(ev: &MessageEvent, contact: &ContactKind) -> bool {
    match (contact, classify(&ev.contact_identifier)) {
        (ContactKind::Email(want), ContactKind::Email(have)) => *want == have,
        (ContactKind::Phone(want), ContactKind::Phone(have)) => {
            match (phone_suffix(want), phone_suffix(&have)) {
                (Some(a), Some(b)) => a == b,
                _ => want.trim_start_matches('+') == have.trim_start_matches('+'),
            }
        }
        _ => false,
    }
}

/// Preset reporting ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsRange {
    Days7,
    Days30,
    Days90,
}

impl StatsRange {
    /// "7d", "30d" or "90d"; anything else falls back to 7 days.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "30d" => StatsRange::Days30,
            "90d" => StatsRange::Days90,
            _ => StatsRange::Days7,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StatsRange::Days7 => "7d",
            StatsRange::Days30 => "30d",
            StatsRange::Days90 => "90d",
        }
    }

    fn days(&self) -> i64 {
        match self {
            StatsRange::Days7 => 7,
            StatsRange::Days30 => 30,
            StatsRange::Days90 => 90,
        }
    }

    /// Window ending at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> StatsWindow {
        StatsWindow {
            since: now - Duration::days(self.days()),
            until: now,
        }
    }
}

/// Inclusive timestamp window for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl StatsWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.since && ts <= self.until
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub sent: u64,
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
    pub read: u64,
    /// Every failure status (failed, bounced, undelivered, blocked).
    pub failed: u64,
    pub total: u64,
    /// delivered / sent, 0 when nothing was sent.
    pub delivery_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    pub date: NaiveDate,
    pub email: u64,
    pub sms: u64,
    pub chat: u64,
}

impl DayBucket {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            email: 0,
            sms: 0,
            chat: 0,
        }
    }

    fn bump(&mut self, channel: Channel) {
        match channel {
            Channel::Email => self.email += 1,
            Channel::Sms => self.sms += 1,
            Channel::Chat => self.chat += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub window: StatsWindow,
    pub stats_by_channel: BTreeMap<Channel, ChannelStats>,
    pub inbound_total: u64,
    pub total_events: u64,
    pub timeseries: Vec<DayBucket>,
}

/// Aggregate counters for events inside `window`. Every channel is present, even with zero counts.
pub(crate) fn aggregate<'a, I>(events: I, window: StatsWindow) -> LedgerStats
where
    I: IntoIterator<Item = &'a MessageEvent>,
{
    let mut by_channel: BTreeMap<Channel, ChannelStats> = Channel::ALL
        .iter()
        .map(|c| (*c, ChannelStats::default()))
        .collect();
    let mut days: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();
    let mut inbound_total = 0;
    let mut total_events = 0;

    for ev in events.into_iter().filter(|e| window.contains(e.event_timestamp)) {
        total_events += 1;
        if ev.direction == Direction::In {
            inbound_total += 1;
        }
        let stats = by_channel.entry(ev.channel).or_default();
        stats.total += 1;
        match ev.status.canonical() {
            Some(CanonicalStatus::Sent) => stats.sent += 1,
            Some(CanonicalStatus::Delivered) => stats.delivered += 1,
            Some(CanonicalStatus::Opened) => stats.opened += 1,
            Some(CanonicalStatus::Clicked) => stats.clicked += 1,
            Some(CanonicalStatus::Read) => stats.read += 1,
            _ if is_failure_status(&ev.status) => stats.failed += 1,
            _ => {}
        }
        let day = ev.event_timestamp.date_naive();
        days.entry(day)
            .or_insert_with(|| DayBucket::new(day))
            .bump(ev.channel);
    }

    for stats in by_channel.values_mut() {
        stats.delivery_rate = if stats.sent > 0 {
            stats.delivered as f64 / stats.sent as f64
        } else {
            0.0
        };
    }

    LedgerStats {
        window,
        stats_by_channel: by_channel,
        inbound_total,
        total_events,
        timeseries: days.into_values().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDraft, LeadRef};
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, channel: Channel, status: CanonicalStatus, dir: Direction) -> MessageEvent {
        MessageEvent::new(
            LeadRef::new("acme", "L1"),
            EventDraft {
                channel,
                provider_name: "test".into(),
                direction: dir,
                provider_message_id: None,
                status: status.into(),
                contact_identifier: "+15551230000".into(),
                snippet: None,
                raw_payload: serde_json::Value::Null,
                event_timestamp: Some(Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()),
            },
        )
    }

    #[test]
    fn page_defaults_and_clamps() {
        assert_eq!(Page::new(None, None), Page { page: 1, limit: 25 });
        assert_eq!(Page::new(Some(0), Some(1000)), Page { page: 1, limit: 100 });
        assert_eq!(Page::new(Some(3), Some(0)).limit, 25);
    }

    #[test]
    fn paginate_orders_newest_first() {
        let events: Vec<_> = (1..=5)
            .map(|d| at(d, 0, Channel::Sms, CanonicalStatus::Sent, Direction::Out))
            .collect();
        let first = paginate(events.clone(), Page::new(Some(1), Some(2)));
        assert_eq!(first.total, 5);
        assert!(first.has_more);
        assert_eq!(first.next_page, Some(2));
        assert_eq!(first.items[0].event_timestamp.date_naive().to_string(), "2026-03-05");
        let last = paginate(events, Page::new(Some(3), Some(2)));
        assert_eq!(last.items.len(), 1);
        assert!(!last.has_more);
        assert_eq!(last.next_page, None);
    }

    #[test]
    fn delivery_rate_is_zero_without_sends() {
        let events = vec![
            at(1, 9, Channel::Email, CanonicalStatus::Sent, Direction::Out),
            at(1, 10, Channel::Email, CanonicalStatus::Sent, Direction::Out),
            at(1, 11, Channel::Email, CanonicalStatus::Delivered, Direction::Out),
            at(2, 9, Channel::Email, CanonicalStatus::Bounced, Direction::Out),
            at(2, 9, Channel::Sms, CanonicalStatus::Delivered, Direction::Out),
            at(2, 10, Channel::Chat, CanonicalStatus::Received, Direction::In),
        ];
        let window = StatsWindow {
            since: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            until: Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap(),
        };
        let stats = aggregate(&events, window);
        let email = &stats.stats_by_channel[&Channel::Email];
        assert_eq!((email.sent, email.delivered, email.failed, email.total), (2, 1, 1, 4));
        assert!((email.delivery_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.stats_by_channel[&Channel::Sms].delivery_rate, 0.0);
        assert_eq!(stats.inbound_total, 1);
        assert_eq!(stats.total_events, 6);
        assert_eq!(stats.timeseries.len(), 2);
        assert_eq!(stats.timeseries[0].email, 3);
        assert_eq!(stats.timeseries[1].chat, 1);
    }

    #[test]
    fn window_excludes_out_of_range_events() {
        let events = vec![at(1, 0, Channel::Sms, CanonicalStatus::Sent, Direction::Out)];
        let window = StatsWindow {
            since: Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap(),
            until: Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap(),
        };
        assert_eq!(aggregate(&events, window).total_events, 0);
    }

    #[test]
    fn stats_range_parse_falls_back_to_seven_days() {
        assert_eq!(StatsRange::parse("30d"), StatsRange::Days30);
        assert_eq!(StatsRange::parse("1y"), StatsRange::Days7);
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        assert_eq!(StatsRange::Days7.window(now).since.date_naive().to_string(), "2026-03-03");
    }

    #[test]
    fn filter_search_is_case_insensitive_substring() {
        let ev = at(1, 0, Channel::Sms, CanonicalStatus::Sent, Direction::Out);
        let mut f = EventFilter {
            search: Some("555123".into()),
            ..Default::default()
        };
        assert!(f.matches(&ev));
        f.search = Some("999".into());
        assert!(!f.matches(&ev));
    }
}
