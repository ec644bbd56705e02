use std::fmt::Display;

use comfy_table::{Attribute, Cell, Color as TableColor};
use console::{style, StyledObject};

use crate::board::{Status, StatusCategory, StatusCounts};

fn styled(text: impl Display) -> StyledObject<String> {
    style(text.to_string())
}

pub fn brand(text: impl Display) -> StyledObject<String> {
    styled(text).magenta().bold()
}

pub fn heading(text: impl Display) -> StyledObject<String> {
    styled(text).bright()
}

pub fn muted(text: impl Display) -> StyledObject<String> {
    styled(text).dim()
}

pub fn accent(text: impl Display) -> StyledObject<String> {
    styled(text).cyan()
}

/// Work still running, such as a fetch behind a spinner.
pub fn working(text: impl Display) -> StyledObject<String> {
    styled(text).bright().yellow()
}

pub fn success(text: impl Display) -> StyledObject<String> {
    styled(text).bright().green()
}

pub fn failure(text: impl Display) -> StyledObject<String> {
    styled(text).bright().red()
}

pub fn category_color(category: StatusCategory) -> TableColor {
    match category {
        StatusCategory::InProgress => TableColor::Blue,
        StatusCategory::Completed => TableColor::Green,
        StatusCategory::Stale => TableColor::DarkGrey,
        StatusCategory::FailOther => TableColor::Red,
        StatusCategory::DiffSnapshot => TableColor::Yellow,
        StatusCategory::FailAnalyze => TableColor::Magenta,
    }
}

/// Colored by category. New statuses are bold; statuses carried over from the
/// reference build are dimmed.
pub fn status_cell(status: Status, text: impl ToString) -> Cell {
    let cell = Cell::new(text).fg(category_color(status.category));
    if status.is_new {
        cell.add_attribute(Attribute::Bold)
    } else {
        cell.add_attribute(Attribute::Dim)
    }
}

/// Red once a failure is new, yellow for known failures only.
pub fn counts_color(counts: StatusCounts) -> TableColor {
    if counts.new_failing > 0 {
        TableColor::Red
    } else if counts.failing > 0 {
        TableColor::Yellow
    } else {
        TableColor::Green
    }
}
