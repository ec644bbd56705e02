use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::board::StatusCounts;

use super::styling::counts_color;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn counts_cell(counts: StatusCounts) -> Cell {
    let text = if counts.new_failing > 0 {
        format!(
            "{} failing ({} new)\n{} ok",
            counts.failing, counts.new_failing, counts.other
        )
    } else {
        format!("{} failing\n{} ok", counts.failing, counts.other)
    };
    Cell::new(text).fg(counts_color(counts))
}
