use std::collections::BTreeMap;

use super::model::{Table, Value};

// ---------------------------------------------------------------------------
// Joins and grouping
// ---------------------------------------------------------------------------

/// Left join on a single key column (pandas `merge(how="left")` with unique
/// right keys). Each left row picks up the first right row with an equal,
/// non-null key; unmatched rows get nulls. Right columns whose names already
/// exist on the left are not copied.
pub fn left_join(left: &Table, right: &Table, on: &str) -> Table {
    let mut lookup: BTreeMap<&Value, usize> = BTreeMap::new();
    for (i, key) in right.column(on).enumerate() {
        if !key.is_null() {
            lookup.entry(key).or_insert(i);
        }
    }

    let extra: Vec<&String> = right
        .columns()
        .iter()
        .filter(|c| c.as_str() != on && !left.has_column(c))
        .collect();

    let mut joined = left.clone();
    for col in extra {
        let values = (0..left.len())
            .map(|row| match lookup.get(left.get(row, on)) {
                Some(&r) => right.get(r, col).clone(),
                None => Value::Null,
            })
            .collect();
        joined.set_column(col, values);
    }
    joined
}

/// Row indices grouped by the value of `column`, groups in sorted key order
/// and rows in table order. Null keys are skipped (pandas `groupby` default).
pub fn group_indices(table: &Table, column: &str) -> BTreeMap<Value, Vec<usize>> {
    let mut groups: BTreeMap<Value, Vec<usize>> = BTreeMap::new();
    for (row, key) in table.column(column).enumerate() {
        if !key.is_null() {
            groups.entry(key.clone()).or_default().push(row);
        }
    }
    groups
}

/// Median of a slice; `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Round half away from zero to `decimals` places.
pub fn round_to(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (v * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_join_fills_unmatched_with_null() {
        let media = Table::from_rows(
            vec!["mediaID".into(), "deploymentID".into()],
            vec![
                vec!["m1".into(), "S1".into()],
                vec!["m2".into(), "S9".into()],
            ],
        );
        let deployments = Table::from_rows(
            vec!["deploymentID".into(), "latitude".into()],
            vec![vec!["S1".into(), 4.5.into()]],
        );
        let joined = left_join(&media, &deployments, "deploymentID");
        assert_eq!(joined.columns(), &["mediaID", "deploymentID", "latitude"]);
        assert_eq!(joined.get(0, "latitude"), &Value::Float(4.5));
        assert!(joined.get(1, "latitude").is_null());
    }

    #[test]
    fn groups_are_sorted_and_skip_null_keys() {
        let t = Table::from_rows(
            vec!["k".into()],
            vec![vec!["b".into()], vec![Value::Null], vec!["a".into()], vec!["b".into()]],
        );
        let groups = group_indices(&t, "k");
        let keys: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);
        assert_eq!(groups[&Value::from("b")], vec![0, 3]);
    }

    #[test]
    fn median_of_even_count_averages() {
        assert_eq!(median(&[2.0, 2.5]), Some(2.25));
        assert_eq!(median(&[1.0, 2.0, 1.5]), Some(1.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn round_to_three_decimals() {
        assert_eq!(round_to(1.23456, 3), 1.235);
        assert_eq!(round_to(2.34567, 3), 2.346);
    }
}
