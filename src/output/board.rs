use std::fmt::Write;

use chrono::{TimeZone, Utc};
use comfy_table::{Cell, Color as TableColor};

use crate::board::{group_by_status, status_counts, BuildDataItem, LoadedBuildData, TaskDiffData};

use super::styling::{accent, heading, muted, status_cell};
use super::tables::{counts_cell, create_table, cyan_header};

/// Prints the build history of each branch, newest build first.
pub fn print_board<F>(branches: &[(String, Vec<BuildDataItem>)], task_diff: F)
where
    F: Fn(&str) -> Option<TaskDiffData>,
{
    for (branch, items) in branches {
        println!("{}", render_branch(branch, items, &task_diff));
    }
}

pub fn format_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map_or_else(|| millis.to_string(), |dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
}

pub fn render_branch<F>(branch: &str, items: &[BuildDataItem], task_diff: &F) -> String
where
    F: Fn(&str) -> Option<TaskDiffData>,
{
    let mut output = String::new();
    let _ = writeln!(output, "{} {}", heading("🌿"), heading(branch).underlined());

    if items.is_empty() {
        let _ = writeln!(output, "  {}", muted("No builds found."));
        return output;
    }

    let mut table = create_table();
    table.set_header(cyan_header(&["Build", "Summary", "Tasks"]));

    for item in items {
        let info = item.info();
        let build_cell = Cell::new(format!(
            "{}\n{}",
            info.id,
            format_timestamp(info.build_created_timestamp)
        ));

        match item {
            BuildDataItem::Pending(_) => {
                table.add_row(vec![
                    build_cell,
                    Cell::new("pending").fg(TableColor::DarkGrey),
                    Cell::new(""),
                ]);
            }
            BuildDataItem::Loading(_) => {
                table.add_row(vec![
                    build_cell,
                    Cell::new("loading…").fg(TableColor::Blue),
                    Cell::new(""),
                ]);
            }
            BuildDataItem::Failed { error, .. } => {
                table.add_row(vec![
                    build_cell,
                    Cell::new("failed to load").fg(TableColor::Red),
                    Cell::new(error).fg(TableColor::Red),
                ]);
            }
            BuildDataItem::Loaded(loaded) => {
                table.add_row(vec![
                    build_cell,
                    counts_cell(status_counts(loaded)),
                    Cell::new(render_tasks(loaded, task_diff)),
                ]);
                for (status, tasks) in group_by_status(loaded) {
                    let names: Vec<String> = tasks
                        .iter()
                        .map(|(name, metadata)| {
                            let diff = metadata
                                .latest_rerun()
                                .and_then(|task| task_diff(&task.id))
                                .map(|diff| format_diff(&diff))
                                .unwrap_or_default();
                            format!("{name}{diff}")
                        })
                        .collect();
                    table.add_row(vec![
                        Cell::new(""),
                        status_cell(status, status.category),
                        status_cell(status, names.join("\n")),
                    ]);
                }
            }
        }
    }

    let _ = writeln!(output, "{table}");
    output
}

fn render_tasks<F>(loaded: &LoadedBuildData, task_diff: &F) -> String
where
    F: Fn(&str) -> Option<TaskDiffData>,
{
    let mut lines = Vec::new();
    if let Some(reference) = &loaded.reference_id {
        lines.push(format!("compared to {reference}"));
    }
    let with_diffs = loaded
        .build
        .tasks
        .iter()
        .filter(|task| task_diff(&task.id).is_some())
        .count();
    if with_diffs > 0 {
        lines.push(format!("{with_diffs} snapshot diffs parsed"));
    }
    for error in &loaded.classification_errors {
        lines.push(format!("{}: {}", error.task_name, error.message));
    }
    lines.join("\n")
}

fn format_diff(diff: &TaskDiffData) -> String {
    let mut parts = Vec::new();
    if let Some(new_count) = diff.new_count {
        parts.push(format!("+{new_count}"));
    }
    if let Some(absent_count) = diff.absent_count {
        parts.push(format!("-{absent_count}"));
    }
    if !diff.rules.is_empty() {
        parts.push(format!(
            "{} issues in {} rules",
            diff.total_rule_issues(),
            diff.rules.len()
        ));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" {}", accent(format!("({})", parts.join(" "))))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::board::InitialBuildData;
    use crate::cirrus::types::fixtures::{build, diff_task, failed_task, task};

    fn info(id: &str, created: i64) -> InitialBuildData {
        InitialBuildData {
            id: id.to_string(),
            branch: "main".to_string(),
            build_created_timestamp: created,
            previous_build_id: None,
        }
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_709_647_620_000), "2024-03-05 14:07 UTC");
    }

    #[test]
    fn test_render_empty_branch() {
        let output = render_branch("main", &[], &|_: &str| None);
        assert!(output.contains("main"));
        assert!(output.contains("No builds found."));
    }

    #[test]
    fn test_render_mixed_states() {
        let detail = build(
            "b3",
            3_000,
            vec![
                task("lint", "COMPLETED", 3),
                failed_task("sonar", "analyze", 3),
                diff_task("snapshot", 3),
            ],
        );
        let loaded = LoadedBuildData::new(info("b3", 3_000), Arc::new(detail), None);
        let items = vec![
            BuildDataItem::Loaded(Arc::new(loaded)),
            BuildDataItem::Loading(info("b2", 2_000)),
            BuildDataItem::Failed {
                info: info("b1", 1_000),
                error: "timed out".to_string(),
            },
            BuildDataItem::Pending(info("b0", 500)),
        ];

        let diff = TaskDiffData {
            rules: BTreeMap::from([("S100".to_string(), 2), ("S1192".to_string(), 3)]),
            new_count: Some(3),
            absent_count: Some(1),
        };
        let output = render_branch("main", &items, &|id: &str| {
            (id == "snapshot-3").then(|| diff.clone())
        });

        for expected in [
            "b3", "lint", "sonar", "snapshot", "(+3 -1 5 issues in 2 rules)", "loading", "timed out",
            "pending",
        ] {
            assert!(output.contains(expected), "missing {expected} in\n{output}");
        }
        assert!(output.find("sonar").unwrap() < output.find("lint").unwrap());
    }
}
