//! Gateway HTTP wire types (query strings, request bodies, response envelopes).

use crate::event::{Channel, Direction};
use crate::ledger::{EventFilter, Page, StatsRange, StatsWindow};
use crate::status::EventStatus;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying the caller's tenant on every `/api/*` route.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Default and maximum number of orphans returned by `GET /api/orphans`.
pub const DEFAULT_ORPHAN_LIMIT: usize = 50;
pub const MAX_ORPHAN_LIMIT: usize = 500;

/// Success envelope: `{ "ok": true, ...body }`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiOk<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T: Serialize> ApiOk<T> {
    pub fn new(body: T) -> Self {
        Self { ok: true, body }
    }
}

/// Error envelope: `{ "ok": false, "error": CODE, "message": "..." }`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub ok: bool,
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `GET /api/events` query. Numbers are parsed leniently: unparseable values use the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub channel: Option<String>,
    pub status: Option<String>,
    pub direction: Option<String>,
    pub lead_id: Option<String>,
    pub search: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD` date (start of day, or end of day for upper bounds).
pub fn parse_date_bound(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?
    } else {
        NaiveTime::MIN
    };
    Some(day.and_time(time).and_utc())
}

impl EventsQuery {
    pub fn page(&self) -> Page {
        Page::new(
            non_empty(&self.page).and_then(|p| p.parse().ok()),
            non_empty(&self.limit).and_then(|l| l.parse().ok()),
        )
    }

    /// Build the filter. Err names the parameter that could not be understood.
    pub fn filter(&self) -> Result<EventFilter, String> {
        let channel = match non_empty(&self.channel) {
            Some(c) => Some(Channel::parse(c).ok_or_else(|| format!("unknown channel {:?}", c))?),
            None => None,
        };
        let direction = match non_empty(&self.direction) {
            Some(d) => Some(Direction::parse(d).ok_or_else(|| format!("unknown direction {:?}", d))?),
            None => None,
        };
        let since = match non_empty(&self.start_date) {
            Some(d) => Some(parse_date_bound(d, false).ok_or_else(|| format!("invalid startDate {:?}", d))?),
            None => None,
        };
        let until = match non_empty(&self.end_date) {
            Some(d) => Some(parse_date_bound(d, true).ok_or_else(|| format!("invalid endDate {:?}", d))?),
            None => None,
        };
        Ok(EventFilter {
            channel,
            lead_id: non_empty(&self.lead_id).map(str::to_string),
            status: non_empty(&self.status).map(|s| EventStatus::from(s.to_string())),
            direction,
            search: non_empty(&self.search).map(str::to_string),
            since,
            until,
        })
    }
}

/// `GET /api/events/stats` query: a preset range, or explicit `since`/`until` bounds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    pub range: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
}

impl StatsQuery {
    /// Label and window. Explicit bounds win over `range`; a missing bound defaults to
    /// the preset's start or to `now`.
    pub fn window(&self, now: DateTime<Utc>) -> Result<(&'static str, StatsWindow), String> {
        let range = StatsRange::parse(non_empty(&self.range).unwrap_or("7d"));
        let preset = range.window(now);
        let since = match non_empty(&self.since) {
            Some(d) => Some(parse_date_bound(d, false).ok_or_else(|| format!("invalid since {:?}", d))?),
            None => None,
        };
        let until = match non_empty(&self.until) {
            Some(d) => Some(parse_date_bound(d, true).ok_or_else(|| format!("invalid until {:?}", d))?),
            None => None,
        };
        if since.is_none() && until.is_none() {
            return Ok((range.label(), preset));
        }
        let window = StatsWindow {
            since: since.unwrap_or(preset.since),
            until: until.unwrap_or(now),
        };
        if window.since > window.until {
            return Err("since is after until".to_string());
        }
        Ok(("custom", window))
    }
}

/// Fallback contacts for `GET /api/events/lead/{leadId}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelineQuery {
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl TimelineQuery {
    pub fn contacts(&self) -> Vec<&str> {
        [non_empty(&self.phone), non_empty(&self.email)]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrphansQuery {
    pub limit: Option<String>,
}

impl OrphansQuery {
    pub fn limit(&self) -> usize {
        non_empty(&self.limit)
            .and_then(|l| l.parse::<usize>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_ORPHAN_LIMIT)
            .min(MAX_ORPHAN_LIMIT)
    }
}

/// `POST /api/events/outbound` body. The tenant comes from the header, never from the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRequest {
    pub lead_id: String,
    pub channel: Channel,
    pub provider_name: String,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub contact_identifier: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub event_timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_query_defaults_and_clamps() {
        let q = EventsQuery {
            page: Some("abc".into()),
            limit: Some("500".into()),
            ..Default::default()
        };
        assert_eq!(q.page(), Page { page: 1, limit: 100 });
        assert_eq!(EventsQuery::default().page(), Page { page: 1, limit: 25 });
    }

    #[test]
    fn events_query_filter() {
        let q = EventsQuery {
            channel: Some("whatsapp".into()),
            status: Some("Delivered".into()),
            direction: Some("inbound".into()),
            start_date: Some("2026-03-01".into()),
            end_date: Some("2026-03-02".into()),
            ..Default::default()
        };
        let f = q.filter().unwrap();
        assert_eq!(f.channel, Some(Channel::Chat));
        assert_eq!(f.direction, Some(Direction::In));
        assert_eq!(f.status.as_ref().map(|s| s.as_str()), Some("delivered"));
        assert_eq!(f.since.map(|t| t.to_rfc3339()), Some("2026-03-01T00:00:00+00:00".to_string()));
        assert!(f.until.map(|t| t.to_rfc3339().starts_with("2026-03-02T23:59:59")).unwrap_or(false));
        let bad = EventsQuery {
            channel: Some("fax".into()),
            ..Default::default()
        };
        assert!(bad.filter().is_err());
    }

    #[test]
    fn stats_window_preset_or_explicit() {
        use chrono::TimeZone;
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        let (label, w) = StatsQuery {
            range: Some("30d".into()),
            ..Default::default()
        }
        .window(now)
        .unwrap();
        assert_eq!(label, "30d");
        assert_eq!(w.since.date_naive().to_string(), "2026-03-01");
        let (label, w) = StatsQuery {
            since: Some("2026-03-10".into()),
            until: Some("2026-03-12".into()),
            ..Default::default()
        }
        .window(now)
        .unwrap();
        assert_eq!(label, "custom");
        assert_eq!(w.until.date_naive().to_string(), "2026-03-12");
        let backwards = StatsQuery {
            since: Some("2026-03-12".into()),
            until: Some("2026-03-10".into()),
            ..Default::default()
        };
        assert!(backwards.window(now).is_err());
    }

    #[test]
    fn orphan_limit_bounds() {
        assert_eq!(OrphansQuery::default().limit(), DEFAULT_ORPHAN_LIMIT);
        assert_eq!(OrphansQuery { limit: Some("100000".into()) }.limit(), MAX_ORPHAN_LIMIT);
        assert_eq!(OrphansQuery { limit: Some("0".into()) }.limit(), DEFAULT_ORPHAN_LIMIT);
    }
}
