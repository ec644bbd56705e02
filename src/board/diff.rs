use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static RULE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#":(?<ruleKey>S[0-9]{3,4})[":\s]+(?<number>[0-9]+)"#).expect("valid rule regex")
});

static SUMMARY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"NEW: (?<newCount>[0-9]+),.+ABSENT: (?<absentCount>[0-9]+)")
        .expect("valid summary regex")
});

/// Per-rule issue counts of a snapshot diff, parsed from its generation log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDiffData {
    pub rules: BTreeMap<String, u32>,
    pub new_count: Option<u32>,
    pub absent_count: Option<u32>,
}

impl TaskDiffData {
    pub fn parse(log: &str) -> Self {
        let rules = RULE_REGEX
            .captures_iter(log)
            .filter_map(|caps| {
                let key = caps.name("ruleKey")?.as_str().to_string();
                let number = caps.name("number")?.as_str().parse().ok()?;
                Some((key, number))
            })
            .collect();

        let (new_count, absent_count) = SUMMARY_REGEX
            .captures(log)
            .map(|caps| {
                (
                    caps.name("newCount").and_then(|m| m.as_str().parse().ok()),
                    caps.name("absentCount").and_then(|m| m.as_str().parse().ok()),
                )
            })
            .unwrap_or((None, None));

        Self {
            rules,
            new_count,
            absent_count,
        }
    }

    pub fn total_rule_issues(&self) -> u32 {
        self.rules.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules_and_summary() {
        let log = r#"
Generating snapshot diff...
{"java:S1234": 3, "java:S100": 12}
python:S5678 7
Summary -> NEW: 4, CHANGED: 2, ABSENT: 9
"#;
        let diff = TaskDiffData::parse(log);

        assert_eq!(diff.rules.get("S1234"), Some(&3));
        assert_eq!(diff.rules.get("S100"), Some(&12));
        assert_eq!(diff.rules.get("S5678"), Some(&7));
        assert_eq!(diff.new_count, Some(4));
        assert_eq!(diff.absent_count, Some(9));
        assert_eq!(diff.total_rule_issues(), 22);
    }

    #[test]
    fn test_parse_log_without_matches() {
        let diff = TaskDiffData::parse("nothing to see here");
        assert_eq!(diff, TaskDiffData::default());
    }

    #[test]
    fn test_later_rule_occurrences_win() {
        let diff = TaskDiffData::parse(":S1000 1\n:S1000 5");
        assert_eq!(diff.rules.get("S1000"), Some(&5));
    }
}
