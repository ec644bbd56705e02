use comfy_table::{Cell, Color as TableColor};

use crate::extract::ExtractionTable;

use super::styling::{heading, muted};
use super::tables::{create_table, cyan_header};

pub fn render_extraction_table(table: &ExtractionTable, not_found: &str) -> String {
    let mut header = vec!["Task"];
    header.extend(table.columns.iter().map(String::as_str));

    let mut rendered = create_table();
    rendered.set_header(cyan_header(&header));
    for (task, cells) in &table.rows {
        let mut row = vec![Cell::new(task)];
        row.extend(cells.iter().map(|cell| match cell {
            Some(value) => Cell::new(value),
            None => Cell::new(not_found).fg(TableColor::DarkGrey),
        }));
        rendered.add_row(row);
    }

    format!(
        "{} {}\n{rendered}\n",
        heading("🔎"),
        heading(&table.regex).underlined()
    )
}

pub fn print_extraction(tables: &[ExtractionTable], not_found: &str, as_csv: bool) {
    if tables.iter().all(|table| table.rows.is_empty()) {
        eprintln!("{}", muted("No values matched."));
    }
    for table in tables {
        if as_csv {
            print!("{}", table.to_csv(not_found));
        } else {
            println!("{}", render_extraction_table(table, not_found));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_missing_values_use_placeholder() {
        let table = ExtractionTable {
            regex: r"took (?<data>\d+)ms".to_string(),
            columns: vec!["main [2024-03-05 14:07]".to_string(), "main~2 [2024-03-04 14:07]".to_string()],
            rows: BTreeMap::from([("java".to_string(), vec![Some("12".to_string()), None])]),
        };

        let output = render_extraction_table(&table, "n/a");
        assert!(output.contains("main~2 [2024-03-04 14:07]"));
        assert!(output.contains("12"));
        assert!(output.contains("n/a"));
    }
}
