use super::clamp_percentage;
use crate::db::{Activity, DocumentUserStatistic, words_per_minute};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};

/// Time and coverage accumulated over one window.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    seconds: i64,
    fraction: f64,
}

impl Tally {
    fn add(&mut self, a: &Activity) {
        self.seconds += a.duration;
        self.fraction += (a.end_percentage - a.start_percentage).max(0.0);
    }

    fn words(&self, words: i64) -> i64 {
        (self.fraction * words as f64).round() as i64
    }
}

#[derive(Debug, Default)]
struct Rollup {
    last_read: i64,
    last_end: f64,
    total: Tally,
    yearly: Tally,
    monthly: Tally,
    weekly: Tally,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Fold a user's sessions into per-document statistics.
///
/// Words read are the covered fraction times the document word count, and
/// the windowed figures cover the trailing 365, 30 and 7 days before `now`.
/// `percentages` holds the latest reported fraction per document; sessions
/// supply it when no snapshot exists.
pub fn document_statistics(
    user_id: &str,
    activity: &[Activity],
    words: &HashMap<String, i64>,
    percentages: &HashMap<String, f64>,
    now: DateTime<Utc>,
) -> Vec<DocumentUserStatistic> {
    let year_start = (now - Duration::days(365)).timestamp();
    let month_start = (now - Duration::days(30)).timestamp();
    let week_start = (now - Duration::days(7)).timestamp();

    let mut rollups: BTreeMap<&str, Rollup> = BTreeMap::new();
    for a in activity {
        let r = rollups.entry(a.document_id.as_str()).or_default();
        if a.start_time >= r.last_read {
            r.last_read = a.start_time;
            r.last_end = a.end_percentage;
        }
        r.total.add(a);
        if a.start_time >= year_start {
            r.yearly.add(a);
        }
        if a.start_time >= month_start {
            r.monthly.add(a);
        }
        if a.start_time >= week_start {
            r.weekly.add(a);
        }
    }

    rollups
        .into_iter()
        .map(|(document_id, r)| {
            let word_count = words.get(document_id).copied().unwrap_or(0);
            let fraction = percentages.get(document_id).copied().unwrap_or(r.last_end);
            let percentage = clamp_percentage(round2(fraction * 100.0));

            let stat = |t: &Tally| {
                let w = t.words(word_count);
                (t.seconds, w, words_per_minute(w, t.seconds))
            };
            let (total_time_seconds, total_words_read, total_wpm) = stat(&r.total);
            let (yearly_time_seconds, yearly_words_read, yearly_wpm) = stat(&r.yearly);
            let (monthly_time_seconds, monthly_words_read, monthly_wpm) = stat(&r.monthly);
            let (weekly_time_seconds, weekly_words_read, weekly_wpm) = stat(&r.weekly);

            DocumentUserStatistic {
                document_id: document_id.to_string(),
                user_id: user_id.to_string(),
                last_read: r.last_read,
                percentage,
                read_percentage: round2(r.total.fraction * 100.0),
                total_time_seconds,
                total_words_read,
                total_wpm,
                yearly_time_seconds,
                yearly_words_read,
                yearly_wpm,
                monthly_time_seconds,
                monthly_words_read,
                monthly_wpm,
                weekly_time_seconds,
                weekly_words_read,
                weekly_wpm,
            }
        })
        .collect()
}
