//! User-curated task playbooks (`.clai/tasks.yaml`).
//!
//! A playbook names tasks, their commands, and follow-up edges (`after`,
//! `after_failure`). Loading validates the whole file: duplicate names,
//! dangling references and cycles in the `after` graph are load errors, not
//! runtime surprises.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("task `{task}` references unknown task `{reference}` in `{field}`")]
    UnknownReference {
        task: String,
        reference: String,
        field: &'static str,
    },

    #[error("cycle detected in `after` graph at task `{0}`")]
    Cycle(String),

    #[error("invalid playbook yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

// Case-insensitive on load: `HIGH`, `High` and `high` all parse.
impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(serde::de::Error::custom(format!(
                "unknown priority `{other}` (expected low, normal or high)"
            ))),
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_failure: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflows: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Playbook {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Playbook {
    pub fn parse(yaml: &str) -> Result<Self, PlaybookError> {
        let playbook: Playbook = serde_yaml::from_str(yaml)?;
        playbook.validate()?;
        Ok(playbook)
    }

    pub fn load(path: &Path) -> Result<Self, PlaybookError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Look for a playbook at `<project>/.clai/tasks.yaml`, then in the
    /// user-level workflows directory. First hit that loads cleanly wins; a
    /// malformed file is a hard error rather than a silent fallthrough.
    pub fn discover(project_dir: &Path, clai_home: &Path) -> Result<Option<Self>, PlaybookError> {
        let project = project_dir.join(crate::paths::PROJECT_PLAYBOOK_RELATIVE);
        if project.is_file() {
            return Self::load(&project).map(Some);
        }
        let user_dir = crate::paths::user_playbook_dir(clai_home);
        let user = user_dir.join("tasks.yaml");
        if user.is_file() {
            return Self::load(&user).map(Some);
        }
        Ok(None)
    }

    pub fn serialize(&self) -> Result<String, PlaybookError> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn validate(&self) -> Result<(), PlaybookError> {
        let mut by_name: HashMap<&str, usize> = HashMap::with_capacity(self.tasks.len());
        for (i, task) in self.tasks.iter().enumerate() {
            if by_name.insert(task.name.as_str(), i).is_some() {
                return Err(PlaybookError::DuplicateTask(task.name.clone()));
            }
        }
        for task in &self.tasks {
            for (field, reference) in [
                ("after", task.after.as_deref()),
                ("after_failure", task.after_failure.as_deref()),
            ] {
                if let Some(reference) = reference
                    && !by_name.contains_key(reference)
                {
                    return Err(PlaybookError::UnknownReference {
                        task: task.name.clone(),
                        reference: reference.to_string(),
                        field,
                    });
                }
            }
        }
        self.check_acyclic(&by_name)
    }

    /// DFS three-color cycle detection over the `after` edges.
    fn check_acyclic(&self, by_name: &HashMap<&str, usize>) -> Result<(), PlaybookError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut colors = vec![Color::White; self.tasks.len()];

        fn visit(
            tasks: &[Task],
            by_name: &HashMap<&str, usize>,
            colors: &mut [Color],
            node: usize,
        ) -> Result<(), PlaybookError> {
            match colors[node] {
                Color::Black => return Ok(()),
                Color::Gray => return Err(PlaybookError::Cycle(tasks[node].name.clone())),
                Color::White => {}
            }
            colors[node] = Color::Gray;
            if let Some(parent) = tasks[node].after.as_deref()
                && let Some(&next) = by_name.get(parent)
            {
                visit(tasks, by_name, colors, next)?;
            }
            colors[node] = Color::Black;
            Ok(())
        }

        for node in 0..self.tasks.len() {
            visit(&self.tasks, by_name, &mut colors, node)?;
        }
        Ok(())
    }

    /// Enabled follow-ups of the task matching `last_cmd`, resolved by exact
    /// task name first, then by exact command text. `failed` selects the
    /// `after_failure` edge set. Ordered by priority desc, then name asc.
    pub fn next_tasks(&self, last_cmd: &str, failed: bool) -> Vec<&Task> {
        let resolved = self
            .tasks
            .iter()
            .find(|t| t.name == last_cmd)
            .or_else(|| self.tasks.iter().find(|t| t.command == last_cmd));
        let Some(resolved) = resolved else {
            return Vec::new();
        };

        let mut followups: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.enabled)
            .filter(|t| {
                let edge = if failed { &t.after_failure } else { &t.after };
                edge.as_deref() == Some(resolved.name.as_str())
            })
            .collect();
        followups.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        followups
    }

    /// Enabled tasks, for discovery.
    pub fn enabled_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "
tasks:
  - name: build
    command: cargo build
  - name: test
    command: cargo test
    after: build
    priority: HIGH
  - name: lint
    command: cargo clippy
    after: build
  - name: fix
    command: cargo fix
    after_failure: build
    priority: low
  - name: disabled-task
    command: echo nope
    after: build
    enabled: false
";

    #[test]
    fn parses_and_orders_followups() {
        let playbook = Playbook::parse(SAMPLE).expect("parse");
        let next: Vec<&str> = playbook
            .next_tasks("build", false)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        // High priority first, then name order; disabled task filtered.
        assert_eq!(next, vec!["test", "lint"]);
    }

    #[test]
    fn resolves_by_command_text_and_failure_edge() {
        let playbook = Playbook::parse(SAMPLE).expect("parse");
        let next: Vec<&str> = playbook
            .next_tasks("cargo build", true)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(next, vec!["fix"]);
        assert!(playbook.next_tasks("unknown-task", false).is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Playbook::parse(
            "tasks:\n  - name: a\n    command: x\n  - name: a\n    command: y\n",
        )
        .expect_err("must fail");
        assert!(matches!(err, PlaybookError::DuplicateTask(name) if name == "a"));
    }

    #[test]
    fn dangling_references_are_rejected() {
        let err = Playbook::parse("tasks:\n  - name: a\n    command: x\n    after: ghost\n")
            .expect_err("must fail");
        assert!(matches!(err, PlaybookError::UnknownReference { .. }));
    }

    #[test]
    fn cycles_are_rejected() {
        let err = Playbook::parse(
            "tasks:
  - name: a
    command: x
    after: c
  - name: b
    command: y
    after: a
  - name: c
    command: z
    after: b
",
        )
        .expect_err("must fail");
        assert!(matches!(err, PlaybookError::Cycle(_)));
    }

    #[test]
    fn priority_parse_is_case_insensitive_with_default() {
        let playbook =
            Playbook::parse("tasks:\n  - name: a\n    command: x\n    priority: High\n")
                .expect("parse");
        assert_eq!(playbook.tasks[0].priority, Priority::High);
        let playbook = Playbook::parse("tasks:\n  - name: a\n    command: x\n").expect("parse");
        assert_eq!(playbook.tasks[0].priority, Priority::Normal);
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let playbook = Playbook::parse(SAMPLE).expect("parse");
        let yaml = playbook.serialize().expect("serialize");
        let reparsed = Playbook::parse(&yaml).expect("reparse");
        assert_eq!(reparsed, playbook);
    }
}
