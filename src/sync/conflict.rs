// File: ./src/sync/conflict.rs
//! Remote-wins conflict policy for push candidates.
use crate::config::TimestampPolicy;
use crate::model::IdentityRecord;
use crate::source::RemoteStamp;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The remote changed after our last sync.
    Conflict,
    /// The remote record is gone; the local identity is cleared.
    Deleted,
    /// A timestamp could not be parsed and the policy says skip.
    Unparsable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Conflict => write!(f, "conflict"),
            SkipReason::Deleted => write!(f, "deleted"),
            SkipReason::Unparsable => write!(f, "unparsable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Create,
    Update { remote_id: String },
    Skip(SkipReason),
}

/// Parses the timestamp forms sources emit, truncated to whole seconds.
///
/// RFC 3339 (any offset), `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD HH:MM:SS` and
/// `YYYY-MM-DD`. Naive forms are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let parsed = if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        dt.with_timezone(&Utc)
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        dt.and_utc()
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        dt.and_utc()
    } else if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        d.and_hms_opt(0, 0, 0)?.and_utc()
    } else {
        return None;
    };
    DateTime::from_timestamp(parsed.timestamp(), 0)
}

/// Verdict for a candidate whose identity was found, given what the remote
/// reported for it.
pub fn judge(
    identity: &IdentityRecord,
    remote: &RemoteStamp,
    policy: TimestampPolicy,
) -> Verdict {
    let update = || Verdict::Update {
        remote_id: identity.remote_id.clone(),
    };
    let remote_ts = match remote {
        RemoteStamp::Deleted => return Verdict::Skip(SkipReason::Deleted),
        RemoteStamp::Present(ts) => ts,
    };

    let local = identity.synced_at.as_deref().and_then(parse_timestamp);
    let remote = parse_timestamp(remote_ts);
    match (remote, local) {
        (Some(remote), Some(local)) if remote > local => Verdict::Skip(SkipReason::Conflict),
        (Some(_), Some(_)) => update(),
        _ => match policy {
            TimestampPolicy::Allow => {
                log::warn!(
                    "Unparsable timestamp for '{}' (remote '{}', synced_at {:?}), pushing anyway",
                    identity.remote_id,
                    remote_ts,
                    identity.synced_at
                );
                update()
            }
            TimestampPolicy::Skip => Verdict::Skip(SkipReason::Unparsable),
        },
    }
}

/// `last_synced_at` to record after a successful push: never earlier than the
/// remote's own write, so that write does not look like a foreign change.
pub fn synced_at_after_push(now: DateTime<Utc>, remote_updated_at: Option<&str>) -> DateTime<Utc> {
    remote_updated_at
        .and_then(parse_timestamp)
        .map_or(now, |remote| remote.max(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(synced_at: Option<&str>) -> IdentityRecord {
        let mut r = IdentityRecord::new("foo", "r1");
        r.synced_at = synced_at.map(str::to_string);
        r
    }

    fn present(s: &str) -> RemoteStamp {
        RemoteStamp::Present(s.to_string())
    }

    #[test]
    fn test_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap();
        for s in [
            "2026-10-16T10:00:00Z",
            "2026-10-16T12:00:00+02:00",
            "2026-10-16T10:00:00.987Z",
            "2026-10-16T10:00:00",
            "2026-10-16 10:00:00",
        ] {
            assert_eq!(parse_timestamp(s), Some(expected), "{}", s);
        }
        assert_eq!(
            parse_timestamp("2026-10-16"),
            Some(Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_remote_newer_is_conflict() {
        let v = judge(
            &record(Some("2026-10-16T10:00:00Z")),
            &present("2026-10-16T10:00:01Z"),
            TimestampPolicy::Allow,
        );
        assert_eq!(v, Verdict::Skip(SkipReason::Conflict));
    }

    #[test]
    fn test_equal_or_older_is_update() {
        for remote in ["2026-10-16T10:00:00Z", "2026-10-16T10:00:00.900Z", "2026-10-15"] {
            let v = judge(
                &record(Some("2026-10-16T10:00:00Z")),
                &present(remote),
                TimestampPolicy::Skip,
            );
            assert_eq!(
                v,
                Verdict::Update {
                    remote_id: "r1".to_string()
                },
                "{}",
                remote
            );
        }
    }

    #[test]
    fn test_deleted_remote() {
        let v = judge(&record(None), &RemoteStamp::Deleted, TimestampPolicy::Allow);
        assert_eq!(v, Verdict::Skip(SkipReason::Deleted));
    }

    #[test]
    fn test_unparsable_follows_policy() {
        let r = record(Some("garbage"));
        assert!(matches!(
            judge(&r, &present("2026-10-16T10:00:00Z"), TimestampPolicy::Allow),
            Verdict::Update { .. }
        ));
        assert_eq!(
            judge(&r, &present("2026-10-16T10:00:00Z"), TimestampPolicy::Skip),
            Verdict::Skip(SkipReason::Unparsable)
        );
        assert_eq!(
            judge(&record(None), &present("2026-10-16T10:00:00Z"), TimestampPolicy::Skip),
            Verdict::Skip(SkipReason::Unparsable)
        );
    }

    #[test]
    fn test_synced_at_after_push_uses_later_time() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap();
        assert_eq!(
            synced_at_after_push(now, Some("2026-10-16T10:00:05Z")),
            Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 5).unwrap()
        );
        assert_eq!(synced_at_after_push(now, Some("2026-10-16T09:00:00Z")), now);
        assert_eq!(synced_at_after_push(now, None), now);
    }
}
