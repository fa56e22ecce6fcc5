//! Purpose: Resolve points in time into snapshot and window decorations.
//! Exports: `PointInTime`, `ViewResolver`.
//! Role: Validates decoration arguments before a decorated reference is built.
//! Invariants: Relative offsets are non-positive; absolute instants lie in
//! (now - max_age, now].
//! Invariants: A decorated reference is never decorated again.
use std::time::Duration as StdDuration;

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::core::error::{Error, ErrorKind};
use crate::core::table_ref::{Decoration, TableReference};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PointInTime {
    Absolute(OffsetDateTime),
    /// Offset from "now" at query time; must be zero or negative.
    Relative(Duration),
}

impl PointInTime {
    pub fn ago(duration: StdDuration) -> Self {
        PointInTime::Relative(-Duration::try_from(duration).unwrap_or(Duration::MAX))
    }

    fn describe(&self) -> String {
        match self {
            PointInTime::Absolute(at) => at
                .format(&Rfc3339)
                .unwrap_or_else(|_| at.unix_timestamp().to_string()),
            PointInTime::Relative(offset) => format!("{}ms", offset.whole_milliseconds()),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ViewResolver {
    max_age: StdDuration,
}

impl ViewResolver {
    pub fn new(max_age: StdDuration) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> StdDuration {
        self.max_age
    }

    pub fn snapshot(&self, reference: &TableReference, at: PointInTime) -> Result<TableReference, Error> {
        self.snapshot_at(reference, at, OffsetDateTime::now_utc())
    }

    pub fn window(
        &self,
        reference: &TableReference,
        begin: PointInTime,
        end: Option<PointInTime>,
    ) -> Result<TableReference, Error> {
        self.window_at(reference, begin, end, OffsetDateTime::now_utc())
    }

    /// Same as [`ViewResolver::snapshot`] with an explicit clock reading.
    pub fn snapshot_at(
        &self,
        reference: &TableReference,
        at: PointInTime,
        now: OffsetDateTime,
    ) -> Result<TableReference, Error> {
        ensure_undecorated(reference, "snapshot")?;
        let millis = self.resolve_millis(at, now)?;
        reference.decorate(Decoration::Snapshot(millis))
    }

    /// Same as [`ViewResolver::window`] with an explicit clock reading.
    pub fn window_at(
        &self,
        reference: &TableReference,
        begin: PointInTime,
        end: Option<PointInTime>,
        now: OffsetDateTime,
    ) -> Result<TableReference, Error> {
        ensure_undecorated(reference, "window")?;
        let end = end.unwrap_or(match begin {
            PointInTime::Relative(_) => PointInTime::Relative(Duration::ZERO),
            PointInTime::Absolute(_) => PointInTime::Absolute(now),
        });
        let start = self.resolve_millis(begin, now)?;
        let stop = self.resolve_millis(end, now)?;

        if (start > 0) != (stop > 0) {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("window bounds must both be absolute or both be relative")
                .with_value(format!("{}, {}", begin.describe(), end.describe())));
        }
        if start >= stop {
            return Err(Error::new(ErrorKind::Validation)
                .with_message("window begin must be before end")
                .with_value(format!("{}, {}", begin.describe(), end.describe())));
        }
        reference.decorate(Decoration::Window { start, stop })
    }

    /// Epoch milliseconds for absolute instants, non-positive offsets for relative ones.
    pub fn resolve_millis(&self, when: PointInTime, now: OffsetDateTime) -> Result<i64, Error> {
        let max_age_ms = i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX);
        let invalid = |message: &str| {
            Error::new(ErrorKind::Validation)
                .with_message(message.to_string())
                .with_value(when.describe())
        };
        match when {
            PointInTime::Relative(offset) => {
                let millis = clamp_millis(offset.whole_milliseconds());
                if millis > 0 {
                    return Err(invalid("relative point in time must not be in the future"));
                }
                if millis < -max_age_ms {
                    return Err(invalid("relative point in time is older than the snapshot limit"));
                }
                Ok(millis)
            }
            PointInTime::Absolute(at) => {
                let millis = epoch_millis(at);
                let now_ms = epoch_millis(now);
                if millis > now_ms {
                    return Err(invalid("absolute point in time is in the future"));
                }
                if millis <= now_ms.saturating_sub(max_age_ms) {
                    return Err(invalid("absolute point in time is older than the snapshot limit"));
                }
                Ok(millis)
            }
        }
    }
}

fn ensure_undecorated(reference: &TableReference, operation: &str) -> Result<(), Error> {
    if reference.is_decorated() {
        return Err(Error::new(ErrorKind::Precondition)
            .with_message(format!("cannot apply {operation} to an already decorated table"))
            .with_table(reference.full_name()));
    }
    Ok(())
}

pub(crate) fn epoch_millis(at: OffsetDateTime) -> i64 {
    clamp_millis((at - OffsetDateTime::UNIX_EPOCH).whole_milliseconds())
}

fn clamp_millis(millis: i128) -> i64 {
    millis.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::{PointInTime, ViewResolver};
    use crate::core::error::ErrorKind;
    use crate::core::table_ref::{Decoration, TableReference};
    use std::time::Duration as StdDuration;
    use time::{Duration, OffsetDateTime};

    const WEEK: StdDuration = StdDuration::from_secs(7 * 24 * 3600);

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_800_000_000).expect("now")
    }

    fn table() -> TableReference {
        TableReference::new("p", "d", "t")
    }

    #[test]
    fn snapshot_one_hour_ago_succeeds() {
        let resolver = ViewResolver::new(WEEK);
        let at = PointInTime::Absolute(now() - Duration::hours(1));
        let snap = resolver.snapshot_at(&table(), at, now()).expect("snapshot");
        assert_eq!(
            snap.decoration(),
            Some(Decoration::Snapshot(1_800_000_000_000 - 3_600_000))
        );
        assert_eq!(snap.full_name(), "p:d.t@1799996400000");
    }

    #[test]
    fn snapshot_eight_days_ago_fails() {
        let resolver = ViewResolver::new(WEEK);
        for at in [
            PointInTime::Absolute(now() - Duration::days(8)),
            PointInTime::Relative(-Duration::days(8)),
        ] {
            let err = resolver.snapshot_at(&table(), at, now()).expect_err("too old");
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert!(err.value().is_some());
        }
    }

    #[test]
    fn future_points_are_rejected() {
        let resolver = ViewResolver::new(WEEK);
        for at in [
            PointInTime::Absolute(now() + Duration::minutes(1)),
            PointInTime::Relative(Duration::seconds(1)),
        ] {
            let err = resolver.snapshot_at(&table(), at, now()).expect_err("future");
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[test]
    fn relative_snapshot_keeps_negative_offset() {
        let resolver = ViewResolver::new(WEEK);
        let snap = resolver
            .snapshot_at(&table(), PointInTime::ago(StdDuration::from_secs(60)), now())
            .expect("snapshot");
        assert_eq!(snap.decorator(), "@-60000");
    }

    #[test]
    fn window_of_past_relative_days_renders_both_bounds() {
        let resolver = ViewResolver::new(WEEK);
        let window = resolver
            .window_at(
                &table(),
                PointInTime::Relative(-Duration::days(2)),
                Some(PointInTime::Relative(-Duration::days(1))),
                now(),
            )
            .expect("window");
        assert_eq!(window.decorator(), "@-172800000--86400000");
    }

    #[test]
    fn window_rejects_mixed_and_inverted_bounds() {
        let resolver = ViewResolver::new(WEEK);
        let straddling = resolver.window_at(
            &table(),
            PointInTime::Relative(-Duration::days(1)),
            Some(PointInTime::Relative(Duration::days(1))),
            now(),
        );
        assert_eq!(straddling.expect_err("straddle").kind(), ErrorKind::Validation);

        let mixed = resolver.window_at(
            &table(),
            PointInTime::Relative(-Duration::days(1)),
            Some(PointInTime::Absolute(now() - Duration::hours(1))),
            now(),
        );
        assert_eq!(mixed.expect_err("mixed").kind(), ErrorKind::Validation);

        let inverted = resolver.window_at(
            &table(),
            PointInTime::Relative(-Duration::hours(1)),
            Some(PointInTime::Relative(-Duration::hours(2))),
            now(),
        );
        assert_eq!(inverted.expect_err("inverted").kind(), ErrorKind::Validation);
    }

    #[test]
    fn window_end_defaults_to_now_in_the_same_flavor() {
        let resolver = ViewResolver::new(WEEK);
        let relative = resolver
            .window_at(&table(), PointInTime::Relative(-Duration::hours(1)), None, now())
            .expect("relative");
        assert_eq!(relative.decorator(), "@-3600000-0");

        let begin = now() - Duration::hours(1);
        let absolute = resolver
            .window_at(&table(), PointInTime::Absolute(begin), None, now())
            .expect("absolute");
        assert_eq!(absolute.decorator(), "@1799996400000-1800000000000");
    }

    #[test]
    fn decorated_reference_rejects_any_further_view() {
        let resolver = ViewResolver::new(WEEK);
        let snap = resolver
            .snapshot_at(&table(), PointInTime::Relative(-Duration::hours(1)), now())
            .expect("snapshot");
        let again = resolver.snapshot_at(&snap, PointInTime::Relative(-Duration::hours(2)), now());
        assert_eq!(again.expect_err("again").kind(), ErrorKind::Precondition);
        let window = resolver.window_at(&snap, PointInTime::Relative(-Duration::hours(2)), None, now());
        assert_eq!(window.expect_err("window").kind(), ErrorKind::Precondition);
    }
}
