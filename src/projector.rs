//! Display projections of the canonical set. Everything here is a pure
//! function of its arguments.

use serde::Serialize;
use ts_rs::TS;
use unicode_normalization::UnicodeNormalization;

use crate::model::InventoryRecord;

pub const CSV_HEADERS: [&str; 4] = ["Name", "Code", "Quantity", "Unit"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn fold(value: &str) -> String {
    value.nfc().collect::<String>().to_lowercase()
}

/// Records whose name or code contains `term`, case-insensitively, in
/// canonical order. An empty term matches everything.
pub fn filtered_view<'a>(records: &'a [InventoryRecord], term: &str) -> Vec<&'a InventoryRecord> {
    let needle = fold(term);
    records
        .iter()
        .filter(|record| {
            needle.is_empty()
                || fold(&record.name).contains(&needle)
                || fold(&record.code).contains(&needle)
        })
        .collect()
}

/// One row per record, canonical order, columns as in [`CSV_HEADERS`].
pub fn to_csv_rows(records: &[InventoryRecord]) -> CsvTable {
    CsvTable {
        headers: CSV_HEADERS.iter().map(|h| h.to_string()).collect(),
        rows: records
            .iter()
            .map(|record| {
                vec![
                    record.name.clone(),
                    record.code.clone(),
                    record.quantity.to_string(),
                    record.unit.clone(),
                ]
            })
            .collect(),
    }
}

/// Comma-joined document: header line, then one line per row, no trailing
/// newline. Cells are written as-is; embedded commas are not quoted.
pub fn render_csv(table: &CsvTable) -> String {
    std::iter::once(table.headers.join(","))
        .chain(table.rows.iter().map(|row| row.join(",")))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn has_alerts(low_stock: &[InventoryRecord]) -> bool {
    !low_stock.is_empty()
}

/// Alert panel lines: `name (quantity unit)`.
pub fn low_stock_lines(low_stock: &[InventoryRecord]) -> Vec<String> {
    low_stock
        .iter()
        .map(|record| format!("{} ({} {})", record.name, record.quantity, record.unit))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordId;

    fn record(name: &str, code: &str, quantity: u64) -> InventoryRecord {
        InventoryRecord {
            id: RecordId::remote(code.to_lowercase()),
            name: name.into(),
            code: code.into(),
            quantity,
            unit: "pcs".into(),
            low_threshold: None,
        }
    }

    #[test]
    fn search_matches_code_case_insensitively() {
        let records = vec![record("Bolt", "A1", 3), record("Nut", "B2", 8)];
        let hits = filtered_view(&records, "a1");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].code, "A1");
    }

    #[test]
    fn search_matches_name_substring_and_keeps_order() {
        let records = vec![
            record("Hex bolt", "X1", 1),
            record("Nut", "X2", 1),
            record("Carriage BOLT", "X3", 1),
        ];
        let codes: Vec<_> = filtered_view(&records, "bolt")
            .into_iter()
            .map(|r| r.code.as_str())
            .collect();
        assert_eq!(codes, ["X1", "X3"]);
    }

    #[test]
    fn empty_term_returns_everything() {
        let records = vec![record("Bolt", "A1", 3), record("Nut", "B2", 8)];
        assert_eq!(filtered_view(&records, "").len(), 2);
    }

    #[test]
    fn search_is_not_fuzzy() {
        let records = vec![record("Bolt", "A1", 3)];
        assert!(filtered_view(&records, "blt").is_empty());
    }

    #[test]
    fn composed_and_decomposed_accents_match() {
        let records = vec![record("Caf\u{e9} filter", "C1", 3)];
        assert_eq!(filtered_view(&records, "cafe\u{301}").len(), 1);
    }

    #[test]
    fn csv_rows_follow_canonical_order_with_fixed_columns() {
        let records = vec![record("Nut", "B2", 8), record("Bolt", "A1", 3)];
        let table = to_csv_rows(&records);
        assert_eq!(table.headers, CSV_HEADERS);
        assert_eq!(table.rows.len(), 2);
        assert!(table.rows.iter().all(|row| row.len() == CSV_HEADERS.len()));
        assert_eq!(table.rows[0], ["Nut", "B2", "8", "pcs"]);
        assert_eq!(table.rows[1][0], "Bolt");
    }

    #[test]
    fn rendered_csv_is_plain_comma_joined() {
        let records = vec![record("Bolt, hex", "A1", 3)];
        let csv = render_csv(&to_csv_rows(&records));
        assert_eq!(csv, "Name,Code,Quantity,Unit\nBolt, hex,A1,3,pcs");
    }

    #[test]
    fn empty_inventory_renders_header_only() {
        assert_eq!(render_csv(&to_csv_rows(&[])), "Name,Code,Quantity,Unit");
    }

    #[test]
    fn alert_lines_describe_each_low_record() {
        let low = vec![record("Bolt", "A1", 3)];
        assert!(has_alerts(&low));
        assert_eq!(low_stock_lines(&low), ["Bolt (3 pcs)"]);
        assert!(!has_alerts(&[]));
    }
}
