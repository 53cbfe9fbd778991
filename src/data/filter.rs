use std::collections::{BTreeMap, BTreeSet};

use super::model::{Table, Value};

// ---------------------------------------------------------------------------
// Row selection: which values are allowed per column
// ---------------------------------------------------------------------------

/// Per-column selection: maps column_name → set of allowed values.
/// Columns absent from the map are unconstrained.
pub type Selection = BTreeMap<String, BTreeSet<Value>>;

/// Return indices of rows that pass every column constraint.
///
/// A row passes a column constraint when:
/// * The allowed set for that column is empty → nothing selected → fails
/// * The table lacks the column → passes only if `Null` is allowed
/// * The row's value for that column is in the allowed set → passes
pub fn filtered_indices(table: &Table, selection: &Selection) -> Vec<usize> {
    (0..table.len())
        .filter(|&row| {
            for (col, allowed) in selection {
                if allowed.is_empty() {
                    return false;
                }
                if !table.has_column(col) {
                    if !allowed.contains(&Value::Null) {
                        return false;
                    }
                    continue;
                }
                if !allowed.contains(table.get(row, col)) {
                    return false;
                }
            }
            true
        })
        .collect()
}

/// Rows whose `column` value is one of `values` (pandas `isin`).
pub fn isin(table: &Table, column: &str, values: &BTreeSet<Value>) -> Table {
    let mut selection = Selection::new();
    selection.insert(column.to_string(), values.clone());
    table.take_rows(&filtered_indices(table, &selection))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observations() -> Table {
        Table::from_rows(
            vec!["scientificName".into(), "mediaID".into()],
            vec![
                vec!["Canis lupus".into(), "m1".into()],
                vec!["Ursus arctos".into(), "m1".into()],
                vec!["Canis lupus".into(), "m2".into()],
            ],
        )
    }

    #[test]
    fn isin_keeps_matching_rows_in_order() {
        let wanted: BTreeSet<Value> = [Value::from("Canis lupus")].into_iter().collect();
        let t = isin(&observations(), "scientificName", &wanted);
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(1, "mediaID"), &Value::from("m2"));
    }

    #[test]
    fn empty_selection_hides_everything() {
        let mut sel = Selection::new();
        sel.insert("mediaID".into(), BTreeSet::new());
        assert!(filtered_indices(&observations(), &sel).is_empty());
    }

    #[test]
    fn missing_column_passes_only_when_null_allowed() {
        let mut sel = Selection::new();
        sel.insert("eventID".into(), [Value::from("e1")].into_iter().collect());
        assert!(filtered_indices(&observations(), &sel).is_empty());

        sel.insert("eventID".into(), [Value::Null].into_iter().collect());
        assert_eq!(filtered_indices(&observations(), &sel), vec![0, 1, 2]);
    }
}
