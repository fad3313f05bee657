use chrono::{DateTime, NaiveTime, Timelike, Utc};

use crate::config::CheckInPolicy;
use crate::models::session::Anomaly;

/// The facts about a session the detector inspects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionCandidate {
    pub distance_m: f64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub token_expires_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl SessionCandidate {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// Tags plus the resulting review priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyReport {
    pub anomalies: Vec<Anomaly>,
    pub flagged: bool,
}

/// Returns every anomaly that applies to the candidate, in a fixed order.
///
/// Pure: the same policy and candidate always give the same tags.
pub fn detect(policy: &CheckInPolicy, candidate: &SessionCandidate) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    if candidate.distance_m > policy.fraud_radius_m {
        anomalies.push(Anomaly::FraudSuspected);
    } else if candidate.distance_m > policy.warning_radius_m {
        anomalies.push(Anomaly::ExcessiveDistance);
    }

    let duration = candidate.duration_minutes();
    if duration < policy.min_duration_minutes || duration > policy.max_duration_minutes {
        anomalies.push(Anomaly::DurationOutOfRange);
    }

    let hours = policy.earliest_hour..=policy.latest_hour;
    if !hours.contains(&candidate.start_time.hour())
        || !hours.contains(&candidate.end_time.hour())
    {
        anomalies.push(Anomaly::OffHours);
    }

    if candidate.token_expires_at < candidate.now {
        anomalies.push(Anomaly::ExpiredToken);
    }

    anomalies
}

/// Runs [`detect`] and derives the `flagged` bit from the tags.
pub fn evaluate(policy: &CheckInPolicy, candidate: &SessionCandidate) -> AnomalyReport {
    let anomalies = detect(policy, candidate);
    let flagged = anomalies.iter().any(Anomaly::flags_session);
    AnomalyReport { anomalies, flagged }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 16, 0, 0).unwrap()
    }

    fn candidate(distance_m: f64) -> SessionCandidate {
        SessionCandidate {
            distance_m,
            start_time: time(14, 0),
            end_time: time(15, 30),
            token_expires_at: now() + Duration::hours(2),
            now: now(),
        }
    }

    #[test]
    fn clean_session_has_no_tags() {
        let report = evaluate(&CheckInPolicy::default(), &candidate(10.0));
        assert!(report.anomalies.is_empty());
        assert!(!report.flagged);
    }

    #[test]
    fn fraud_tag_is_strictly_beyond_radius() {
        let policy = CheckInPolicy::default();
        assert_eq!(policy.fraud_radius_m, 30.0);

        assert!(detect(&policy, &candidate(31.0)).contains(&Anomaly::FraudSuspected));
        assert!(!detect(&policy, &candidate(29.0)).contains(&Anomaly::FraudSuspected));
        assert!(!detect(&policy, &candidate(30.0)).contains(&Anomaly::FraudSuspected));
    }

    #[test]
    fn warning_band_tags_excessive_distance_and_flags() {
        let report = evaluate(&CheckInPolicy::default(), &candidate(25.0));
        assert_eq!(report.anomalies, vec![Anomaly::ExcessiveDistance]);
        assert!(report.flagged);
    }

    #[test]
    fn fraud_and_excessive_are_exclusive() {
        let tags = detect(&CheckInPolicy::default(), &candidate(10_000.0));
        assert!(tags.contains(&Anomaly::FraudSuspected));
        assert!(!tags.contains(&Anomaly::ExcessiveDistance));
    }

    #[test]
    fn duration_bounds_are_inclusive() {
        let policy = CheckInPolicy::default();
        let mut c = candidate(0.0);

        c.end_time = time(15, 0);
        assert!(!detect(&policy, &c).contains(&Anomaly::DurationOutOfRange));
        c.end_time = time(14, 59);
        assert!(detect(&policy, &c).contains(&Anomaly::DurationOutOfRange));
        c.end_time = time(18, 0);
        assert!(!detect(&policy, &c).contains(&Anomaly::DurationOutOfRange));
        c.end_time = time(18, 1);
        assert!(detect(&policy, &c).contains(&Anomaly::DurationOutOfRange));
    }

    #[test]
    fn off_hours_checks_both_ends() {
        let policy = CheckInPolicy::default();
        let mut c = candidate(0.0);

        c.start_time = time(7, 30);
        c.end_time = time(9, 0);
        assert!(detect(&policy, &c).contains(&Anomaly::OffHours));

        c.start_time = time(19, 0);
        c.end_time = time(20, 45);
        assert!(!detect(&policy, &c).contains(&Anomaly::OffHours));

        c.end_time = time(21, 0);
        assert!(detect(&policy, &c).contains(&Anomaly::OffHours));
    }

    #[test]
    fn expired_token_is_tagged_but_not_flagged() {
        let mut c = candidate(0.0);
        c.token_expires_at = c.now - Duration::seconds(1);

        let report = evaluate(&CheckInPolicy::default(), &c);
        assert_eq!(report.anomalies, vec![Anomaly::ExpiredToken]);
        assert!(!report.flagged);
    }

    #[test]
    fn tags_accumulate_independently() {
        let c = SessionCandidate {
            distance_m: 25.0,
            start_time: time(6, 0),
            end_time: time(6, 30),
            token_expires_at: now() - Duration::hours(1),
            now: now(),
        };

        assert_eq!(
            detect(&CheckInPolicy::default(), &c),
            vec![
                Anomaly::ExcessiveDistance,
                Anomaly::DurationOutOfRange,
                Anomaly::OffHours,
                Anomaly::ExpiredToken,
            ]
        );
    }

    #[test]
    fn detection_is_referentially_transparent() {
        let policy = CheckInPolicy::default();
        let distances = [0.0, 19.9, 20.0, 20.1, 29.9, 30.0, 30.1, 1_000.0];
        let windows = [
            (time(7, 0), time(8, 0)),
            (time(8, 0), time(9, 0)),
            (time(14, 0), time(16, 0)),
            (time(9, 0), time(13, 30)),
            (time(19, 30), time(21, 0)),
        ];
        let expiries = [now() - Duration::seconds(1), now(), now() + Duration::hours(1)];

        for &distance_m in &distances {
            for &(start_time, end_time) in &windows {
                for &token_expires_at in &expiries {
                    let c = SessionCandidate {
                        distance_m,
                        start_time,
                        end_time,
                        token_expires_at,
                        now: now(),
                    };
                    let first = evaluate(&policy, &c);
                    let second = evaluate(&policy, &c);
                    assert_eq!(first, second);
                    assert_eq!(
                        first.flagged,
                        first.anomalies.iter().any(Anomaly::flags_session)
                    );
                }
            }
        }
    }
}
