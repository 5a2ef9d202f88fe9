use log::{debug, warn};
use serde_json::Value;

use crate::remote::Remote;
use ocidist::Sha256Sum;

/// Hard cap on the delta-stats sidecar. Anything larger is not a stats file.
pub const MAX_STATS_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaStatsRef {
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaStat {
    pub size: u64,
    pub u_size: u64,
}

/// Looks up `custom.delta-stats`. A target without one, or with a mangled
/// one, just downloads without an admission check.
pub fn find_ref(custom: &Value) -> Option<DeltaStatsRef> {
    let stats = custom.get("delta-stats")?;

    let sha256 = match stats.get("sha256").and_then(Value::as_str) {
        Some(sha) => sha.to_string(),
        None => {
            warn!("delta-stats reference carries no sha256 string, skipping");
            return None;
        }
    };
    let size = match stats.get("size").and_then(Value::as_u64) {
        Some(size) => size,
        None => {
            warn!("delta-stats reference carries no size integer, skipping");
            return None;
        }
    };

    Some(DeltaStatsRef {
        sha256,
        size,
    })
}

/// Fetch and verify the sidecar from one remote. Every failure mode maps to
/// `None`: stats are an optimization, the pull itself stays authoritative.
pub fn download(http: &reqwest::blocking::Client, remote: &Remote, stats_ref: &DeltaStatsRef) -> Option<Value> {
    if stats_ref.size > MAX_STATS_SIZE {
        warn!("delta-stats size {} exceeds the {} byte cap, ignoring", stats_ref.size, MAX_STATS_SIZE);
        return None;
    }

    let url = format!("{}/delta-stats/{}", remote.base_url.trim_end_matches('/'), stats_ref.sha256);
    debug!("fetching delta stats from {url}");

    let mut req = http.get(&url);
    for (key, value) in &remote.headers {
        req = req.header(key, value);
    }

    let resp = match req.send() {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            warn!("GET {} returned status code {}", url, resp.status());
            return None;
        }
        Err(err) => {
            warn!("GET {url} failed: {err}");
            return None;
        }
    };

    let body = match resp.bytes() {
        Ok(body) => body,
        Err(err) => {
            warn!("failed to read delta stats body: {err}");
            return None;
        }
    };

    if body.len() as u64 != stats_ref.size {
        warn!("delta stats size mismatch: expected {} bytes, got {}", stats_ref.size, body.len());
        return None;
    }

    let actual = Sha256Sum::of(&body);
    if actual.to_string() != stats_ref.sha256 {
        warn!("delta stats digest mismatch: expected {}, got {}", stats_ref.sha256, actual);
        return None;
    }

    match serde_json::from_slice(&body) {
        Ok(json) => Some(json),
        Err(err) => {
            warn!("failed to parse delta stats: {err}");
            None
        }
    }
}

/// The sidecar is shaped `{ <to>: { <from>: {size, u_size} } }`; lookups are
/// keyed, never positional. Both fields must be unsigned integers.
pub fn find_stat(stats: &Value, from: &str, to: &str) -> Option<DeltaStat> {
    let entry = stats.get(to)?.get(from)?;

    let size = entry.get("size").and_then(Value::as_u64)?;
    let u_size = entry.get("u_size").and_then(Value::as_u64)?;

    Some(DeltaStat {
        size,
        u_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn finds_well_formed_ref() {
        let custom = json!({"delta-stats": {"sha256": "ab", "size": 100}});
        assert_eq!(
            find_ref(&custom),
            Some(DeltaStatsRef {
                sha256: "ab".to_string(),
                size: 100,
            })
        );
    }

    #[test]
    fn rejects_missing_or_mistyped_ref_fields() {
        assert_eq!(find_ref(&json!({})), None);
        assert_eq!(find_ref(&json!({"delta-stats": {"size": 100}})), None);
        assert_eq!(find_ref(&json!({"delta-stats": {"sha256": "ab"}})), None);
        assert_eq!(find_ref(&json!({"delta-stats": {"sha256": 5, "size": 100}})), None);
        assert_eq!(find_ref(&json!({"delta-stats": {"sha256": "ab", "size": "100"}})), None);
        assert_eq!(find_ref(&json!({"delta-stats": {"sha256": "ab", "size": -1}})), None);
    }

    #[test]
    fn oversized_ref_is_dropped_before_any_request() {
        // unroutable base URL: if the cap check did issue a request this
        // test would fail on the error path timing out
        let remote = Remote {
            name: "gcs".to_string(),
            base_url: "http://invalid.invalid".to_string(),
            headers: HashMap::new(),
            keys: None,
            is_remote_set: true,
        };
        let stats_ref = DeltaStatsRef {
            sha256: "ab".to_string(),
            size: 2 * 1024 * 1024,
        };

        let http = reqwest::blocking::Client::new();
        assert_eq!(download(&http, &remote, &stats_ref), None);
    }

    #[test]
    fn walks_the_two_level_shape() {
        let stats = json!({
            "to1": {
                "from1": {"size": 10, "u_size": 100},
                "from2": {"size": 20, "u_size": 200},
            },
            "to2": {
                "from1": {"size": 30, "u_size": 300},
            },
        });

        assert_eq!(
            find_stat(&stats, "from2", "to1"),
            Some(DeltaStat {
                size: 20,
                u_size: 200,
            })
        );
        assert_eq!(find_stat(&stats, "from3", "to1"), None);
        assert_eq!(find_stat(&stats, "from1", "to3"), None);
    }

    #[test]
    fn rejects_mistyped_stat_fields() {
        let stats = json!({"to": {"from": {"size": "10", "u_size": 100}}});
        assert_eq!(find_stat(&stats, "from", "to"), None);

        let stats = json!({"to": {"from": {"size": 10}}});
        assert_eq!(find_stat(&stats, "from", "to"), None);
    }
}
