use super::{Result, Upstream, UpstreamError};
use crate::model::{Message, normalize_screen_name};
use crate::payload::{DecodedBatch, decode_batch, decode_statuses, status_id};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Canned upstream responses.
///
/// Timelines and searches are keyed by normalized screen name; `statuses` is
/// the pool served by lookups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureData {
    pub timelines: HashMap<String, Vec<Value>>,
    pub searches: HashMap<String, Vec<Value>>,
    pub statuses: Vec<Value>,
    pub fail_timelines: HashSet<String>,
    pub fail_searches: HashSet<String>,
    pub fail_lookup: bool,
}

/// Offline adapter serving [`FixtureData`].
#[derive(Debug, Default)]
pub struct FixtureUpstream {
    data: FixtureData,
    calls: RefCell<Vec<String>>,
}

fn simulated(what: &str) -> UpstreamError {
    UpstreamError::Api {
        status: 503,
        message: format!("simulated {what} failure"),
    }
}

impl FixtureUpstream {
    #[must_use]
    pub fn new(data: FixtureData) -> Self {
        let data = FixtureData {
            timelines: normalize_keys(data.timelines),
            searches: normalize_keys(data.searches),
            fail_timelines: data.fail_timelines.iter().map(|s| normalize_screen_name(s)).collect(),
            fail_searches: data.fail_searches.iter().map(|s| normalize_screen_name(s)).collect(),
            ..data
        };
        Self {
            data,
            calls: RefCell::default(),
        }
    }

    /// Build from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not have the fixture shape.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(Self::new(serde_json::from_value(value)?))
    }

    /// Load a fixture file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| UpstreamError::Parse(format!("{}: {e}", path.display())))?;
        Ok(Self::new(serde_json::from_str(&text)?))
    }

    /// Calls made so far, as `kind:argument`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

fn normalize_keys(map: HashMap<String, Vec<Value>>) -> HashMap<String, Vec<Value>> {
    map.into_iter()
        .map(|(k, v)| (normalize_screen_name(&k), v))
        .collect()
}

fn id_greater(id: &str, floor: &str) -> bool {
    match (id.parse::<u64>(), floor.parse::<u64>()) {
        (Ok(a), Ok(b)) => a > b,
        _ => id > floor,
    }
}

impl Upstream for FixtureUpstream {
    fn search(&self, query: &str, since: Option<NaiveDate>, limit: usize) -> Result<Vec<Message>> {
        let key = normalize_screen_name(query);
        self.log(format!("search:{key}"));
        if self.data.fail_searches.contains(&key) {
            return Err(simulated("search"));
        }

        let statuses = self.data.searches.get(&key).cloned().unwrap_or_default();
        Ok(decode_statuses(statuses)
            .into_iter()
            .filter(|m| since.is_none_or(|d| m.created_at.date_naive() >= d))
            .take(limit)
            .collect())
    }

    fn user_timeline(
        &self,
        screen_name: &str,
        since_id: Option<&str>,
        limit: usize,
        include_replies: bool,
    ) -> Result<Vec<Message>> {
        let key = normalize_screen_name(screen_name);
        self.log(format!("timeline:{key}"));
        if self.data.fail_timelines.contains(&key) {
            return Err(simulated("timeline"));
        }

        let statuses = self.data.timelines.get(&key).cloned().unwrap_or_default();
        Ok(decode_statuses(statuses)
            .into_iter()
            .filter(|m| include_replies || m.in_reply_to.is_none())
            .filter(|m| since_id.is_none_or(|floor| id_greater(&m.id, floor)))
            .take(limit)
            .collect())
    }

    fn lookup(&self, ids: &[String]) -> Result<DecodedBatch> {
        self.log(format!("lookup:{}", ids.len()));
        if self.data.fail_lookup {
            return Err(simulated("lookup"));
        }

        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let statuses = self
            .data
            .statuses
            .iter()
            .filter(|s| status_id(s).is_some_and(|id| wanted.contains(id.as_str())))
            .cloned()
            .collect();
        Ok(decode_batch(statuses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(id: &str, user: &str, created_at: &str, parent: Option<&str>) -> Value {
        json!({
            "id_str": id,
            "created_at": created_at,
            "full_text": format!("status {id}"),
            "in_reply_to_status_id_str": parent,
            "user": {"id_str": "9", "screen_name": user}
        })
    }

    fn fixture() -> FixtureUpstream {
        FixtureUpstream::from_value(json!({
            "timelines": {
                "@Support": [
                    status("30", "support", "Wed Oct 10 20:19:24 +0000 2018", Some("1")),
                    status("20", "support", "Tue Oct 09 20:19:24 +0000 2018", None),
                    status("10", "support", "Mon Oct 08 20:19:24 +0000 2018", None)
                ]
            },
            "searches": {
                "support": [
                    status("40", "fan", "Wed Oct 10 20:19:24 +0000 2018", None),
                    status("41", "fan", "Sun Oct 07 20:19:24 +0000 2018", None)
                ]
            },
            "statuses": [status("10", "support", "Mon Oct 08 20:19:24 +0000 2018", None)],
            "fail_searches": ["@Broken"]
        }))
        .unwrap()
    }

    #[test]
    fn timeline_filters_replies_and_since_id() {
        let upstream = fixture();
        assert_eq!(upstream.user_timeline("support", None, 10, true).unwrap().len(), 3);
        assert_eq!(upstream.user_timeline("support", None, 10, false).unwrap().len(), 2);
        let newer = upstream.user_timeline("SUPPORT", Some("15"), 10, true).unwrap();
        let ids: Vec<_> = newer.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["30", "20"]);
        assert_eq!(upstream.user_timeline("support", None, 1, true).unwrap().len(), 1);
    }

    #[test]
    fn search_honours_since_date() {
        let upstream = fixture();
        let since = NaiveDate::from_ymd_opt(2018, 10, 9);
        let found = upstream.search("@support", since, 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "40");
        assert!(upstream.search("@nobody", None, 10).unwrap().is_empty());
    }

    #[test]
    fn simulated_failures() {
        let upstream = fixture();
        assert!(upstream.search("@broken", None, 10).is_err());
        assert_eq!(upstream.calls(), ["search:broken"]);
    }

    #[test]
    fn lookup_returns_only_known_requested_ids() {
        let upstream = fixture();
        let found = upstream
            .lookup(&["10".to_string(), "11".to_string()])
            .unwrap();
        assert_eq!(found.messages.len(), 1);
        assert_eq!(found.messages[0].id, "10");
        assert!(found.undecodable.is_empty());
    }

    #[test]
    fn lookup_reports_undecodable_requested_ids() {
        let upstream = FixtureUpstream::from_value(json!({
            "statuses": [
                status("10", "support", "2018-10-08T20:19:24Z", None),
                status("12", "support", "not a date", None)
            ]
        }))
        .unwrap();
        let found = upstream
            .lookup(&["10".to_string(), "11".to_string()])
            .unwrap();
        assert!(found.messages.is_empty());
        assert_eq!(found.undecodable, ["10"]);
    }
}
