//! Sync priority and eligibility rules
//!
//! Pure functions shared by the in-memory repository and the tests. The
//! SQLite repository evaluates the same formula in SQL.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;

use crate::models::{MailboxOrigin, SyncCode};

/// An origin in process for longer than this is considered hung
pub fn hang_timeout() -> Duration {
    Duration::days(1)
}

/// Origins that never changed state are treated as last updated this long ago
pub fn never_updated_age() -> Duration {
    Duration::days(365)
}

/// Latest state change time that still allows a new synchronization
///
/// Periods reaching past the representable range clamp to the earliest time.
pub fn exec_period_border(now: DateTime<Utc>, min_exec_period_minutes: i64) -> DateTime<Utc> {
    if min_exec_period_minutes > 0 {
        Duration::try_minutes(min_exec_period_minutes)
            .and_then(|period| now.checked_sub_signed(period))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    } else {
        now
    }
}

/// Primary ordering key: in-process origins sort first
pub fn in_process_rank(origin: &MailboxOrigin) -> i64 {
    if origin.is_in_process() { 0 } else { 1 }
}

/// Secondary ordering key, higher is more urgent
///
/// `code * 100 + idle_seconds / (100 if Success else 1)`, where a missing
/// code counts as 1000 and a missing state change counts as one year ago.
pub fn sync_priority(origin: &MailboxOrigin, now: DateTime<Utc>) -> i64 {
    let code = origin
        .sync_code
        .map(|c| c.code())
        .unwrap_or(SyncCode::NEVER_SYNCED);
    let updated_at = origin
        .sync_code_updated_at
        .unwrap_or(now - never_updated_age());
    let idle_seconds = (now.timestamp_millis() - updated_at.timestamp_millis()) / 1000;
    let divisor = if origin.sync_code == Some(SyncCode::Success) { 100 } else { 1 };

    code * 100 + idle_seconds / divisor
}

/// Whether an origin passes the candidate filter
///
/// In-process origins always pass: they occupy a concurrency slot even
/// though they are never dispatched again.
pub fn is_candidate(origin: &MailboxOrigin, active_only: bool, updated_before: DateTime<Utc>) -> bool {
    if active_only && !origin.is_active {
        return false;
    }
    match origin.sync_code_updated_at {
        None => true,
        Some(updated_at) => updated_at <= updated_before || origin.is_in_process(),
    }
}

/// Total candidate ordering: in-process first, then by descending priority,
/// then oldest state change first, then by id
pub fn compare_candidates(a: &MailboxOrigin, b: &MailboxOrigin, now: DateTime<Utc>) -> Ordering {
    in_process_rank(a)
        .cmp(&in_process_rank(b))
        .then_with(|| sync_priority(b, now).cmp(&sync_priority(a, now)))
        .then_with(|| a.sync_code_updated_at.cmp(&b.sync_code_updated_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OriginId, OriginKind};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn origin(code: Option<SyncCode>, minutes_ago: Option<i64>) -> MailboxOrigin {
        let mut origin = MailboxOrigin::new(OriginKind::Imap).with_id(OriginId(1));
        origin.sync_code = code;
        origin.sync_code_updated_at = minutes_ago.map(|m| now() - Duration::minutes(m));
        origin
    }

    #[test]
    fn test_never_synced_priority() {
        let o = origin(None, None);
        let year_in_seconds = never_updated_age().num_seconds();
        assert_eq!(sync_priority(&o, now()), 1000 * 100 + year_in_seconds);
    }

    #[test]
    fn test_success_idle_time_is_discounted() {
        let failure = origin(Some(SyncCode::Failure), Some(60));
        let success = origin(Some(SyncCode::Success), Some(60));
        assert_eq!(sync_priority(&failure, now()), 200 + 3600);
        assert_eq!(sync_priority(&success, now()), 300 + 36);
    }

    #[test]
    fn test_exec_period_border() {
        assert_eq!(exec_period_border(now(), 30), now() - Duration::minutes(30));
        assert_eq!(exec_period_border(now(), 0), now());
        assert_eq!(exec_period_border(now(), -5), now());
    }

    #[test]
    fn test_exec_period_border_clamps_huge_periods() {
        assert_eq!(exec_period_border(now(), i64::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            exec_period_border(now(), 200_000_000_000),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[test]
    fn test_candidate_filter() {
        let border = now() - Duration::minutes(30);

        assert!(is_candidate(&origin(None, None), true, border));
        assert!(is_candidate(&origin(Some(SyncCode::Success), Some(30)), true, border));
        assert!(!is_candidate(&origin(Some(SyncCode::Success), Some(29)), true, border));
        assert!(is_candidate(&origin(Some(SyncCode::InProcess), Some(1)), true, border));

        let inactive = origin(None, None).with_active(false);
        assert!(!is_candidate(&inactive, true, border));
        assert!(is_candidate(&inactive, false, border));
    }

    #[test]
    fn test_in_process_sorts_first() {
        let running = origin(Some(SyncCode::InProcess), Some(5));
        let never = origin(None, None);
        assert_eq!(compare_candidates(&running, &never, now()), Ordering::Less);
    }

    #[test]
    fn test_older_state_change_breaks_ties() {
        let mut a = origin(Some(SyncCode::Failure), Some(60));
        let mut b = origin(Some(SyncCode::Failure), Some(60));
        a.id = OriginId(2);
        b.id = OriginId(1);
        assert_eq!(compare_candidates(&a, &b, now()), Ordering::Greater);
    }
}
