use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A voice overlay entry: idle and speaking avatar URLs.
///
/// Entries in the participant list always carry an `id`; the default
/// participant never does. Fields this crate does not know about are kept
/// in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub url_speaking: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Participant {
    pub fn new(id: &str, url: &str, url_speaking: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            url: url.to_string(),
            url_speaking: url_speaking.to_string(),
            ..Self::default()
        }
    }

    /// Participant without an id, used as the fallback avatar.
    pub fn fallback(url: &str, url_speaking: &str) -> Self {
        Self {
            url: url.to_string(),
            url_speaking: url_speaking.to_string(),
            ..Self::default()
        }
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(Timestamp::from(date));
        self
    }

    /// The instant `date` denotes, if it is set and readable.
    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        self.date.as_ref().and_then(Timestamp::instant)
    }

    /// Chat mention text for this participant (`<@id>`), if it has an id.
    pub fn mention(&self) -> Option<String> {
        self.id.as_ref().map(|id| format!("<@{id}>"))
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// When a participant was added, exactly as it was stored.
///
/// Older saves hold JavaScript date strings or epoch milliseconds; the
/// original form is written back untouched and only interpreted for
/// ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Milliseconds since the Unix epoch.
    Millis(Number),
    Text(String),
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Interpret the stored form. `None` for blank or unrecognized text.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Millis(ms) => ms
                .as_i64()
                .or_else(|| ms.as_f64().map(|ms| ms as i64))
                .and_then(from_millis),
            Timestamp::Text(text) => parse_date(text),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(date: DateTime<Utc>) -> Self {
        Timestamp::Text(date.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Parse a stored date string.
///
/// Accepts RFC 3339 (`2021-03-02T10:00:00.000Z`), RFC 2822
/// (`Tue, 02 Mar 2021 10:00:00 GMT`), a zone-less ISO date-time or plain
/// date (read as UTC), and epoch milliseconds written as text.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(text) {
        return Some(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(date) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&date));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|date| Utc.from_utc_datetime(&date));
    }
    text.parse::<i64>().ok().and_then(from_millis)
}

/// Server and voice channel the overlay URL points at.
///
/// Unset fields are absent from the stored object, never empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vc_id: Option<String>,
}

impl ServerRef {
    pub fn is_empty(&self) -> bool {
        self.server_id.is_none() && self.vc_id.is_none()
    }
}

// ── Ordering ───────────────────────────────────────────────────────────

struct SortKey {
    date: Option<DateTime<Utc>>,
    id: String,
}

fn sort_key(entry: &Value) -> Result<SortKey, String> {
    let participant: Participant = serde_json::from_value(entry.clone())
        .map_err(|e| format!("participant entry {entry} is invalid: {e}"))?;
    let date = participant.added_at();
    if date.is_none() && participant.date.is_some() {
        tracing::debug!(%entry, "unreadable participant date, ordering as undated");
    }
    Ok(SortKey {
        date,
        id: participant.id.unwrap_or_default(),
    })
}

fn compare(a: &SortKey, b: &SortKey) -> Ordering {
    match (a.date, b.date) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    }
}

/// Pre-write transform for the participant list.
///
/// Every entry must decode as a [`Participant`], so a stored list always
/// reads back in full. Dated entries come first, newest first; undated
/// entries (and entries whose date cannot be read) follow in lexicographic
/// `id` order. The sort is stable and leaves the entries themselves
/// untouched.
pub fn order_participants(list: Value) -> Result<Value, String> {
    let entries = match list {
        Value::Array(entries) => entries,
        other => return Err(format!("participant list must be a list, got {other}")),
    };
    let mut keyed = entries
        .into_iter()
        .map(|entry| sort_key(&entry).map(|key| (key, entry)))
        .collect::<Result<Vec<_>, _>>()?;
    keyed.sort_by(|(a, _), (b, _)| compare(a, b));
    Ok(Value::Array(keyed.into_iter().map(|(_, entry)| entry).collect()))
}

/// Decode a participant list.
///
/// Lists held by the overlay's `users` slot have passed
/// [`order_participants`] and decode in full; entries that do not parse
/// in other values are skipped.
pub fn participants_from_value(value: &Value) -> Vec<Participant> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| match serde_json::from_value(entry.clone()) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        tracing::warn!(%entry, error = %e, "skipping malformed participant");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decode the stored default participant. An empty object is absent.
pub fn default_participant_from_value(value: &Value) -> Option<Participant> {
    match value {
        Value::Object(fields) if !fields.is_empty() => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(list: &Value) -> Vec<&str> {
        list.as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn dated_first_then_ids() {
        let list = json!([
            {"id": "b"},
            {"id": "a", "date": "2021-03-01T10:00:00.000Z"},
            {"id": "c", "date": "2021-03-02T10:00:00.000Z"},
        ]);
        let sorted = order_participants(list).unwrap();
        assert_eq!(ids(&sorted), vec!["c", "a", "b"]);
        assert_eq!(sorted[0]["date"], "2021-03-02T10:00:00.000Z");
    }

    #[test]
    fn undated_sorted_lexicographically() {
        let list = json!([{"id": "10"}, {"id": "9"}, {"id": "1"}, {"id": "B"}, {"id": "a"}]);
        let sorted = order_participants(list).unwrap();
        assert_eq!(ids(&sorted), vec!["1", "10", "9", "B", "a"]);
    }

    #[test]
    fn equal_dates_keep_input_order() {
        let list = json!([
            {"id": "z", "date": "2022-01-01T00:00:00Z"},
            {"id": "a", "date": "2022-01-01T00:00:00Z"},
        ]);
        assert_eq!(ids(&order_participants(list).unwrap()), vec!["z", "a"]);
    }

    #[test]
    fn unknown_fields_survive_sorting() {
        let list = json!([{"id": "b", "extra": [1]}, {"id": "a"}]);
        let sorted = order_participants(list).unwrap();
        assert_eq!(sorted[1], json!({"id": "b", "extra": [1]}));
    }

    #[test]
    fn bad_entries_are_rejected() {
        assert!(order_participants(json!([1])).is_err());
        assert!(order_participants(json!([{"id": 5}])).is_err());
        assert!(order_participants(json!([{"id": "a", "url": ["u"]}])).is_err());
        assert!(order_participants(json!({})).is_err());
    }

    #[test]
    fn date_forms_are_all_understood() {
        let expected = Utc.with_ymd_and_hms(2021, 3, 1, 10, 0, 0).unwrap();
        for text in [
            "2021-03-01T10:00:00.000Z",
            "2021-03-01T11:00:00+01:00",
            "Mon, 01 Mar 2021 10:00:00 GMT",
            "Mon, 01 Mar 2021 10:00:00 +0000",
            "2021-03-01T10:00:00",
            "1614592800000",
        ] {
            assert_eq!(parse_date(text), Some(expected), "{text}");
        }
        assert_eq!(
            parse_date("2021-03-01"),
            Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).single()
        );
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn rfc2822_dates_order_with_rfc3339_dates() {
        let list = json!([
            {"id": "old", "date": "2021-03-01T10:00:00.000Z"},
            {"id": "new", "date": "Tue, 02 Mar 2021 10:00:00 GMT"},
        ]);
        let sorted = order_participants(list).unwrap();
        assert_eq!(ids(&sorted), vec!["new", "old"]);
        assert_eq!(sorted[0]["date"], "Tue, 02 Mar 2021 10:00:00 GMT");
    }

    #[test]
    fn epoch_millisecond_dates_are_ordered_and_kept() {
        let list = json!([
            {"id": "b"},
            {"id": "ms", "url": "u", "urlSpeaking": "s", "date": 1614592800000u64},
            {"id": "iso", "date": "2021-03-01T09:00:00Z"},
        ]);
        let sorted = order_participants(list).unwrap();
        assert_eq!(ids(&sorted), vec!["ms", "iso", "b"]);
        assert_eq!(sorted[0]["date"], json!(1614592800000u64));

        let p: Participant = serde_json::from_value(sorted[0].clone()).unwrap();
        assert_eq!(p.date, Some(Timestamp::Millis(1614592800000u64.into())));
        assert_eq!(p.added_at(), Utc.timestamp_millis_opt(1614592800000).single());
        assert_eq!(p.to_value().unwrap(), sorted[0]);
    }

    #[test]
    fn unreadable_dates_sort_as_undated() {
        let list = json!([
            {"id": "b", "date": "yesterday"},
            {"id": "a"},
            {"id": "c", "date": "2020-01-01T00:00:00Z"},
        ]);
        let sorted = order_participants(list).unwrap();
        assert_eq!(ids(&sorted), vec!["c", "a", "b"]);
        assert_eq!(sorted[2]["date"], "yesterday");
    }

    #[test]
    fn unknown_fields_are_kept_on_decode() {
        let entry = json!({"id": "1", "url": "u", "urlSpeaking": "s", "note": "host", "tags": [1]});
        let p: Participant = serde_json::from_value(entry.clone()).unwrap();
        assert_eq!(p.extra.get("note"), Some(&json!("host")));
        assert_eq!(p.to_value().unwrap(), entry);
    }

    #[test]
    fn participant_uses_camel_case() {
        let p = Participant::new("42", "u1", "u2");
        assert_eq!(
            p.to_value().unwrap(),
            json!({"id": "42", "url": "u1", "urlSpeaking": "u2"})
        );
        assert_eq!(p.mention().as_deref(), Some("<@42>"));
        assert_eq!(Participant::fallback("u", "s").mention(), None);
    }

    #[test]
    fn empty_default_is_absent() {
        assert_eq!(default_participant_from_value(&json!({})), None);
        assert_eq!(
            default_participant_from_value(&json!({"url": "u", "urlSpeaking": "s"})),
            Some(Participant::fallback("u", "s"))
        );
    }

    #[test]
    fn malformed_list_entries_are_skipped() {
        let list = json!([{"id": "1", "url": "u"}, {"id": 5}]);
        let parsed = participants_from_value(&list);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id.as_deref(), Some("1"));
        assert_eq!(parsed[0].url_speaking, "");
    }

    #[test]
    fn server_ref_omits_unset_fields() {
        let server = ServerRef {
            server_id: Some("S".into()),
            vc_id: None,
        };
        assert_eq!(serde_json::to_value(&server).unwrap(), json!({"serverId": "S"}));
        assert!(ServerRef::default().is_empty());
    }
}
