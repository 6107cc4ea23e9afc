use chrono::NaiveDate;

use crate::watch_types::WishedFacility;

/// A facility with at least one subscriber, in selection order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFacility {
    /// ID of the facility
    pub id: String,
    /// Display name of the facility
    pub name: String,
}

/// Dates of one facility that a single user should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMatch {
    /// ID of the matched user
    pub user_id: String,
    /// Matched dates, ascending
    pub dates: Vec<NaiveDate>,
}

/// Matches newly available dates against a snapshot of subscriptions
///
/// The snapshot is taken once at the start of a run; subscriptions added
/// later are picked up by the next run.
pub struct SubscriptionMatcher {
    facilities: Vec<SelectedFacility>,
    subscriptions: Vec<WishedFacility>,
}

impl SubscriptionMatcher {
    /// Build a matcher from the subscriptions read at the start of a run
    pub fn from_snapshot(subscriptions: Vec<WishedFacility>) -> Self {
        let mut facilities: Vec<SelectedFacility> = Vec::new();
        for sub in &subscriptions {
            if !facilities.iter().any(|f| f.id == sub.facility_id) {
                facilities.push(SelectedFacility {
                    id: sub.facility_id.clone(),
                    name: sub.facility_name.clone(),
                });
            }
        }

        Self {
            facilities,
            subscriptions,
        }
    }

    /// Facilities that have at least one subscriber
    pub fn facilities(&self) -> &[SelectedFacility] {
        &self.facilities
    }

    /// Number of subscriptions in the snapshot
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Users of `facility_id` interested in any of `newly_available`
    ///
    /// A subscription without a wish date matches every date; one with a
    /// wish date matches only that date. Users with nothing matched are left
    /// out.
    pub fn match_facility(
        &self,
        facility_id: &str,
        newly_available: &[NaiveDate],
    ) -> Vec<UserMatch> {
        if newly_available.is_empty() {
            return Vec::new();
        }

        let mut all_dates = newly_available.to_vec();
        all_dates.sort();
        all_dates.dedup();

        self.subscriptions
            .iter()
            .filter(|sub| sub.facility_id == facility_id)
            .filter_map(|sub| {
                let dates = match sub.wish_date {
                    None => all_dates.clone(),
                    Some(wish) if all_dates.contains(&wish) => vec![wish],
                    Some(_) => return None,
                };
                Some(UserMatch {
                    user_id: sub.user_id.clone(),
                    dates,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, d).unwrap()
    }

    fn wish(user: &str, facility: &str, wish_date: Option<NaiveDate>) -> WishedFacility {
        WishedFacility {
            user_id: user.to_string(),
            facility_id: facility.to_string(),
            facility_name: format!("{} name", facility),
            wish_date,
        }
    }

    #[test]
    fn test_open_wish_gets_every_date() {
        let matcher = SubscriptionMatcher::from_snapshot(vec![wish("U1", "F1", None)]);

        let matches = matcher.match_facility("F1", &[date(7), date(5)]);
        assert_eq!(
            matches,
            vec![UserMatch {
                user_id: "U1".to_string(),
                dates: vec![date(5), date(7)]
            }]
        );
    }

    #[test]
    fn test_wish_date_matches_only_itself() {
        let matcher = SubscriptionMatcher::from_snapshot(vec![
            wish("U1", "F1", Some(date(6))),
            wish("U2", "F1", Some(date(9))),
        ]);

        let matches = matcher.match_facility("F1", &[date(5), date(6)]);
        assert_eq!(
            matches,
            vec![UserMatch {
                user_id: "U1".to_string(),
                dates: vec![date(6)]
            }]
        );
    }

    #[test]
    fn test_other_facility_and_empty_dates_match_nothing() {
        let matcher = SubscriptionMatcher::from_snapshot(vec![wish("U1", "F1", None)]);

        assert!(matcher.match_facility("F2", &[date(5)]).is_empty());
        assert!(matcher.match_facility("F1", &[]).is_empty());
    }

    #[test]
    fn test_facilities_in_snapshot_order_without_duplicates() {
        let matcher = SubscriptionMatcher::from_snapshot(vec![
            wish("U1", "F2", None),
            wish("U2", "F2", None),
            wish("U1", "F1", None),
        ]);

        let ids: Vec<&str> = matcher.facilities().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["F2", "F1"]);
        assert_eq!(matcher.subscription_count(), 3);
    }
}
