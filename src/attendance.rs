use std::collections::{HashMap, HashSet};

use crate::render::Table;
use crate::store::AttendanceRecord;

/// The representative check-in for one (user, notebook) pair: open-window
/// records always beat closed ones, no matter which was submitted later;
/// within a class the latest submission wins. Absent when the pair has no
/// records at all.
pub fn most_recent<'a>(
    user_id: &str,
    notebook_id: &str,
    records: &'a [AttendanceRecord],
) -> Option<&'a AttendanceRecord> {
    let for_pair = records
        .iter()
        .filter(|r| r.user_id == user_id && r.notebook_id == notebook_id);

    let latest_open = for_pair
        .clone()
        .filter(|r| r.was_open == Some(true))
        .max_by_key(|r| r.submitted);
    if latest_open.is_some() {
        return latest_open;
    }
    // A missing flag counts as closed.
    for_pair
        .filter(|r| r.was_open != Some(true))
        .max_by_key(|r| r.submitted)
}

/// Build the attendance table, header `["user", "timestamp", "was_open"]`.
///
/// Collapsed: one row per distinct (user, notebook) pair, in order of first
/// appearance, chosen by [`most_recent`]. Raw: one row per record in storage
/// order. `labels` maps user ids to display labels; an unknown id falls back
/// to the raw id.
pub fn to_2d_array(
    records: &[AttendanceRecord],
    labels: &HashMap<String, String>,
    collapse: bool,
) -> Table {
    let header = vec![
        Some("user".to_string()),
        Some("timestamp".to_string()),
        Some("was_open".to_string()),
    ];
    let mut rows: Table = vec![header];

    let label_for = |user_id: &str| {
        labels
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string())
    };
    let row_for = |record: &AttendanceRecord| {
        vec![
            Some(label_for(&record.user_id)),
            Some(record.submitted.to_rfc3339()),
            Some(record.was_open.unwrap_or(false).to_string()),
        ]
    };

    if collapse {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for record in records {
            let pair = (record.user_id.clone(), record.notebook_id.clone());
            if !seen.insert(pair) {
                continue;
            }
            if let Some(best) = most_recent(&record.user_id, &record.notebook_id, records) {
                rows.push(row_for(best));
            }
        }
    } else {
        for record in records {
            rows.push(row_for(record));
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rec(id: &str, user: &str, nb: &str, hhmm: (u32, u32), was_open: Option<bool>) -> AttendanceRecord {
        AttendanceRecord {
            id: id.to_string(),
            user_id: user.to_string(),
            notebook_id: nb.to_string(),
            submitted: Utc
                .with_ymd_and_hms(2026, 3, 2, hhmm.0, hhmm.1, 0)
                .single()
                .expect("valid timestamp"),
            was_open,
        }
    }

    #[test]
    fn open_record_beats_later_closed_record() {
        // Closed at 10:00, open at 09:00: the open one must win.
        let records = vec![
            rec("a", "u1", "nb", (10, 0), Some(false)),
            rec("b", "u1", "nb", (9, 0), Some(true)),
        ];
        let best = most_recent("u1", "nb", &records).expect("record");
        assert_eq!(best.id, "b");
        assert_eq!(best.was_open, Some(true));
    }

    #[test]
    fn latest_wins_within_open_class() {
        let records = vec![
            rec("a", "u1", "nb", (9, 0), Some(true)),
            rec("b", "u1", "nb", (9, 30), Some(true)),
            rec("c", "u1", "nb", (11, 0), Some(false)),
        ];
        assert_eq!(most_recent("u1", "nb", &records).map(|r| r.id.as_str()), Some("b"));
    }

    #[test]
    fn missing_flag_counts_as_closed() {
        let records = vec![
            rec("a", "u1", "nb", (9, 0), None),
            rec("b", "u1", "nb", (10, 0), Some(false)),
        ];
        assert_eq!(most_recent("u1", "nb", &records).map(|r| r.id.as_str()), Some("b"));
    }

    #[test]
    fn absent_for_unknown_pair() {
        let records = vec![rec("a", "u1", "nb", (9, 0), Some(true))];
        assert!(most_recent("u2", "nb", &records).is_none());
        assert!(most_recent("u1", "other", &records).is_none());
    }

    #[test]
    fn collapsed_table_emits_one_row_per_pair() {
        let records = vec![
            rec("a", "u1", "nb", (10, 0), Some(false)),
            rec("b", "u2", "nb", (9, 15), Some(true)),
            rec("c", "u1", "nb", (9, 0), Some(true)),
        ];
        let labels: HashMap<String, String> = [
            ("u1".to_string(), "ada@example.com".to_string()),
            ("u2".to_string(), "bob".to_string()),
        ]
        .into_iter()
        .collect();

        let table = to_2d_array(&records, &labels, true);
        assert_eq!(table.len(), 3);
        assert_eq!(
            table[0],
            vec![
                Some("user".to_string()),
                Some("timestamp".to_string()),
                Some("was_open".to_string())
            ]
        );
        // u1 appears first in storage order; its open 09:00 record wins.
        assert_eq!(table[1][0], Some("ada@example.com".to_string()));
        assert_eq!(table[1][2], Some("true".to_string()));
        assert_eq!(table[2][0], Some("bob".to_string()));
        assert_eq!(table[2][2], Some("true".to_string()));
    }

    #[test]
    fn raw_table_keeps_every_record_in_storage_order() {
        let records = vec![
            rec("a", "u1", "nb", (10, 0), Some(false)),
            rec("b", "u1", "nb", (9, 0), None),
        ];
        let labels = HashMap::new();
        let table = to_2d_array(&records, &labels, false);
        assert_eq!(table.len(), 3);
        assert_eq!(table[1][2], Some("false".to_string()));
        // Missing flag renders as false but the record itself is untouched.
        assert_eq!(table[2][2], Some("false".to_string()));
        assert_eq!(table[1][0], Some("u1".to_string()));
    }
}
