use std::collections::BTreeMap;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::calendar_client::CalendarPage;
use crate::watch_types::*;

macro_rules! parse_selector {
    ($s:expr) => {
        Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

lazy_static! {
    static ref CALENDAR_CELL: Selector = parse_selector!("td[data-join-time]");
    static ref STATUS_ICON: Selector = parse_selector!("span.icon");
    static ref DIRECTORY_TAB: Selector = parse_selector!("ul#top_tabs > li");
    static ref TAB_LABEL: Selector = parse_selector!("span");
    static ref FACILITY_ID_PARAM: Regex =
        Regex::new(r"s=([A-Za-z0-9]+)").expect("Invalid facility id pattern");
}

/// Night count attribute value of single-night calendar cells
const ONE_NIGHT: &str = "1";

/// Whether a calendar marker means the night can still be booked
pub fn is_bookable(marker: &str) -> bool {
    marker != FULL_MARKER
}

/// Extract one-night availability from a calendar page
///
/// Only `td` cells tagged with `data-join-time` and `data-night-count="1"`
/// are read. Cells without a status icon or with an unreadable date are
/// skipped. A page without any dated cell is reported as a
/// [`WatchError::ParseAnomaly`].
pub fn extract(page: &CalendarPage) -> Result<Vec<ExtractedDate>, WatchError> {
    let document = Html::parse_document(&page.body);
    let mut saw_calendar_cell = false;
    let mut rows = Vec::new();

    for cell in document.select(&CALENDAR_CELL) {
        saw_calendar_cell = true;

        if cell.value().attr("data-night-count") != Some(ONE_NIGHT) {
            continue;
        }

        let Some(join_time) = cell.value().attr("data-join-time") else {
            continue;
        };

        let Some(icon) = cell.select(&STATUS_ICON).next() else {
            debug!(
                "No status icon for {} on {}",
                page.facility_id, join_time
            );
            continue;
        };

        let date = match NaiveDate::parse_from_str(join_time.trim(), "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => {
                warn!(
                    "Failed to parse join date '{}' for facility {}",
                    join_time, page.facility_id
                );
                continue;
            }
        };

        let marker = icon.text().collect::<String>().trim().to_string();
        let bookable = is_bookable(&marker);

        if bookable {
            debug!("Open: {} {} marker {}", page.facility_id, date, marker);
        } else {
            debug!("Full: {} {}", page.facility_id, date);
        }

        rows.push(ExtractedDate {
            date,
            bookable,
            marker,
        });
    }

    if !saw_calendar_cell {
        return Err(WatchError::ParseAnomaly(format!(
            "no calendar cells for facility {} in {}",
            page.facility_id,
            page.month.format("%Y-%m")
        )));
    }

    Ok(rows)
}

/// Merge rows from several month pages into one row per date
///
/// Adjacent months can show the same night twice; the night counts as
/// bookable if any page reports it bookable.
pub fn merge_months(rows: impl IntoIterator<Item = ExtractedDate>) -> Vec<ExtractedDate> {
    let mut by_date: BTreeMap<NaiveDate, ExtractedDate> = BTreeMap::new();

    for row in rows {
        match by_date.get_mut(&row.date) {
            Some(existing) if !existing.bookable && row.bookable => *existing = row,
            Some(_) => {}
            None => {
                by_date.insert(row.date, row);
            }
        }
    }

    by_date.into_values().collect()
}

/// Parse the facility directory page into facilities
///
/// Every `ul#top_tabs > li` needs a `data-href` carrying `s=<id>` and a
/// `span` holding the display name. Incomplete entries are skipped.
pub fn parse_directory(html: &str) -> Result<Vec<Facility>, WatchError> {
    let document = Html::parse_document(html);
    let mut facilities: Vec<Facility> = Vec::new();

    for tab in document.select(&DIRECTORY_TAB) {
        let href = tab.value().attr("data-href");
        let label = tab.select(&TAB_LABEL).next();

        let (Some(href), Some(label)) = (href, label) else {
            warn!("Incomplete directory entry skipped");
            continue;
        };

        let Some(id) = FACILITY_ID_PARAM
            .captures(href)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
        else {
            warn!("No facility id in directory link {}", href);
            continue;
        };

        let name = label.text().collect::<String>().trim().to_string();
        if name.is_empty() {
            warn!("Empty facility name for {}", id);
            continue;
        }

        if facilities.iter().any(|f| f.id == id) {
            continue;
        }

        debug!("Directory entry: id={} name={}", id, name);
        facilities.push(Facility { id, name });
    }

    if facilities.is_empty() {
        return Err(WatchError::ParseAnomaly(
            "facility directory contains no entries".to_string(),
        ));
    }

    Ok(facilities)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> CalendarPage {
        CalendarPage {
            facility_id: "F1".to_string(),
            month: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
            body: body.to_string(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const CALENDAR: &str = r#"
        <table><tr>
          <td data-join-time="2025-08-05" data-night-count="1"><span class="icon">○</span></td>
          <td data-join-time="2025-08-06" data-night-count="1"><span class="icon"> ☓ </span></td>
          <td data-join-time="2025-08-07" data-night-count="1"><span class="icon">△</span></td>
          <td data-join-time="2025-08-08" data-night-count="2"><span class="icon">○</span></td>
          <td data-join-time="2025-08-09" data-night-count="1"></td>
          <td data-join-time="not-a-date" data-night-count="1"><span class="icon">○</span></td>
        </tr></table>
    "#;

    #[test]
    fn test_extract_one_night_cells() {
        let rows = extract(&page(CALENDAR)).unwrap();

        assert_eq!(
            rows,
            vec![
                ExtractedDate {
                    date: date(2025, 8, 5),
                    bookable: true,
                    marker: "○".to_string()
                },
                ExtractedDate {
                    date: date(2025, 8, 6),
                    bookable: false,
                    marker: "☓".to_string()
                },
                ExtractedDate {
                    date: date(2025, 8, 7),
                    bookable: true,
                    marker: "△".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_any_marker_but_full_is_bookable() {
        assert!(is_bookable("○"));
        assert!(is_bookable("△"));
        assert!(is_bookable("要問合せ"));
        assert!(!is_bookable("☓"));
    }

    #[test]
    fn test_page_without_calendar_is_anomaly() {
        let result = extract(&page("<html><body><p>メンテナンス中</p></body></html>"));
        assert!(matches!(result, Err(WatchError::ParseAnomaly(_))));
    }

    #[test]
    fn test_merge_months_prefers_bookable() {
        let merged = merge_months(vec![
            ExtractedDate {
                date: date(2025, 8, 31),
                bookable: false,
                marker: "☓".to_string(),
            },
            ExtractedDate {
                date: date(2025, 8, 30),
                bookable: true,
                marker: "○".to_string(),
            },
            ExtractedDate {
                date: date(2025, 8, 31),
                bookable: true,
                marker: "△".to_string(),
            },
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].date, date(2025, 8, 30));
        assert!(merged[1].bookable);
        assert_eq!(merged[1].marker, "△");
    }

    #[test]
    fn test_parse_directory() {
        let html = r#"
            <ul id="top_tabs">
              <li data-href="/apply/empty_calendar?s=ABC123&join_date="><span> 保養所A </span></li>
              <li data-href="/apply/empty_calendar?s=XYZ9"><span>保養所B</span></li>
              <li data-href="/apply/empty_calendar?s=ABC123"><span>保養所A</span></li>
              <li><span>リンクなし</span></li>
              <li data-href="/apply/empty_calendar?join_date="><span>IDなし</span></li>
            </ul>
        "#;

        let facilities = parse_directory(html).unwrap();
        assert_eq!(
            facilities,
            vec![
                Facility {
                    id: "ABC123".to_string(),
                    name: "保養所A".to_string()
                },
                Facility {
                    id: "XYZ9".to_string(),
                    name: "保養所B".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_empty_directory_is_anomaly() {
        assert!(matches!(
            parse_directory("<ul id=\"top_tabs\"></ul>"),
            Err(WatchError::ParseAnomaly(_))
        ));
    }
}
