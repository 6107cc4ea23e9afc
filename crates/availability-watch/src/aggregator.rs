use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

/// Weekday symbols, Monday first
const WEEKDAYS: [&str; 7] = ["月", "火", "水", "木", "金", "土", "日"];

/// New availability at one facility for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilityEntry {
    /// Display name of the facility
    pub facility_name: String,
    /// ID of the facility
    pub facility_id: String,
    /// Matched dates, ascending
    pub dates: Vec<NaiveDate>,
}

/// Matches collected during one run, keyed by user
///
/// Facilities keep the order in which they were folded in.
#[derive(Debug, Default)]
pub struct NotificationBatch {
    entries: BTreeMap<String, Vec<FacilityEntry>>,
}

impl NotificationBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add matched dates for a user; empty date lists are ignored
    pub fn fold_in(
        &mut self,
        user_id: &str,
        facility_name: &str,
        facility_id: &str,
        dates: &[NaiveDate],
    ) {
        if dates.is_empty() {
            return;
        }

        let entries = self.entries.entry(user_id.to_string()).or_default();

        match entries.iter_mut().find(|e| e.facility_id == facility_id) {
            Some(entry) => {
                entry.dates.extend_from_slice(dates);
                entry.dates.sort();
                entry.dates.dedup();
            }
            None => {
                let mut dates = dates.to_vec();
                dates.sort();
                dates.dedup();
                entries.push(FacilityEntry {
                    facility_name: facility_name.to_string(),
                    facility_id: facility_id.to_string(),
                    dates,
                });
            }
        }
    }

    /// Whether no user matched anything
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of users with at least one match
    pub fn user_count(&self) -> usize {
        self.entries.len()
    }

    /// Entries collected for a user
    pub fn entries_for(&self, user_id: &str) -> &[FacilityEntry] {
        self.entries.get(user_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Render one message per user
    ///
    /// Each facility becomes a block naming the facility followed by its
    /// dates joined with `、`; blocks are separated by a blank line.
    pub fn render(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(user_id, entries)| {
                let text = entries
                    .iter()
                    .map(render_entry)
                    .collect::<Vec<_>>()
                    .join("\n\n");
                (user_id.clone(), text)
            })
            .collect()
    }
}

fn render_entry(entry: &FacilityEntry) -> String {
    let dates = entry
        .dates
        .iter()
        .map(|d| format_date(*d))
        .collect::<Vec<_>>()
        .join("、");

    format!("{}の次の日程に空きがあります。\n{}", entry.facility_name, dates)
}

/// Format a date as `{month}月{day}日（{weekday}）`
pub fn format_date(date: NaiveDate) -> String {
    let weekday = WEEKDAYS[date.weekday().num_days_from_monday() as usize];
    format!("{}月{}日（{}）", date.month(), date.day(), weekday)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(date(8, 5)), "8月5日（火）");
        assert_eq!(format_date(date(8, 10)), "8月10日（日）");
        assert_eq!(format_date(date(12, 1)), "12月1日（月）");
    }

    #[test]
    fn test_render_single_facility() {
        let mut batch = NotificationBatch::new();
        batch.fold_in("U1", "保養所A", "F1", &[date(8, 6), date(8, 5)]);

        let messages = batch.render();
        assert_eq!(
            messages["U1"],
            "保養所Aの次の日程に空きがあります。\n8月5日（火）、8月6日（水）"
        );
    }

    #[test]
    fn test_render_joins_facilities_with_blank_line_in_fold_order() {
        let mut batch = NotificationBatch::new();
        batch.fold_in("U1", "保養所B", "F2", &[date(9, 1)]);
        batch.fold_in("U1", "保養所A", "F1", &[date(8, 5)]);

        let messages = batch.render();
        assert_eq!(
            messages["U1"],
            "保養所Bの次の日程に空きがあります。\n9月1日（月）\n\n保養所Aの次の日程に空きがあります。\n8月5日（火）"
        );
    }

    #[test]
    fn test_users_without_matches_get_no_message() {
        let mut batch = NotificationBatch::new();
        batch.fold_in("U1", "保養所A", "F1", &[]);
        batch.fold_in("U2", "保養所A", "F1", &[date(8, 5)]);

        let messages = batch.render();
        assert!(!messages.contains_key("U1"));
        assert_eq!(messages.len(), 1);
        assert_eq!(batch.user_count(), 1);
    }

    #[test]
    fn test_repeated_fold_merges_dates() {
        let mut batch = NotificationBatch::new();
        batch.fold_in("U1", "保養所A", "F1", &[date(8, 5)]);
        batch.fold_in("U1", "保養所A", "F1", &[date(8, 5), date(8, 7)]);

        let entries = batch.entries_for("U1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].dates, vec![date(8, 5), date(8, 7)]);
    }
}
