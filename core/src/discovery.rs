//! Empty-session fallback suggestions.
//!
//! When there is no useful history the ranker asks the discovery engine for
//! starter commands, drawn from three prior sources in fixed precedence:
//! playbook tasks, detected project type, then tool-common basics. A
//! cooldown table keeps the same suggestion from reappearing on every
//! keystroke.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::config::DiscoveryConfig;
use crate::playbook::Playbook;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiscoverySourceKind {
    Playbook,
    ProjectType,
    ToolCommon,
}

impl DiscoverySourceKind {
    /// Precedence for sorting and dedup; lower wins.
    fn order(self) -> u8 {
        match self {
            DiscoverySourceKind::Playbook => 0,
            DiscoverySourceKind::ProjectType => 1,
            DiscoverySourceKind::ToolCommon => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryCandidate {
    pub command: String,
    pub description: String,
    pub source: DiscoverySourceKind,
    pub priority: i32,
}

/// Marker files probed in `cwd` mapped to an ordered command prior.
fn project_type_priors() -> &'static [(&'static str, &'static [&'static str], &'static [&'static str])]
{
    // (project type, marker files, commands)
    &[
        ("go", &["go.mod"], &["go build ./...", "go test ./...", "go run ."]),
        (
            "node",
            &["package.json"],
            &["npm install", "npm run dev", "npm test"],
        ),
        (
            "python",
            &["pyproject.toml", "requirements.txt"],
            &["python -m pytest", "pip install -r requirements.txt"],
        ),
        (
            "rust",
            &["Cargo.toml"],
            &["cargo build", "cargo test", "cargo run"],
        ),
        (
            "docker",
            &["Dockerfile", "docker-compose.yml"],
            &["docker compose up -d", "docker ps"],
        ),
        (
            "java",
            &["pom.xml", "build.gradle"],
            &["mvn package", "gradle build"],
        ),
        ("ruby", &["Gemfile"], &["bundle install", "bundle exec rake"]),
        ("make", &["Makefile"], &["make", "make test"]),
        (
            "terraform",
            &["main.tf"],
            &["terraform plan", "terraform apply"],
        ),
        (
            "cpp",
            &["CMakeLists.txt"],
            &["cmake -B build", "cmake --build build"],
        ),
        (
            "haskell",
            &["stack.yaml", "cabal.project"],
            &["stack build", "stack test"],
        ),
        ("nix", &["flake.nix", "default.nix"], &["nix develop", "nix build"]),
    ]
}

const TOOL_COMMON: &[&str] = &["git status", "git log --oneline -10", "ls", "pwd"];

pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    /// command text -> last emitted, ms.
    cooldown: Mutex<HashMap<String, i64>>,
}

impl DiscoveryEngine {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            cooldown: Mutex::new(HashMap::new()),
        }
    }

    /// Up to `limit` distinct candidates for an empty prompt in `cwd`.
    /// Candidates still cooling down are skipped; the ones returned have
    /// their cooldown stamped with `now_ms`.
    pub fn discover(
        &self,
        cwd: &Path,
        playbook: Option<&Playbook>,
        now_ms: i64,
    ) -> Vec<DiscoveryCandidate> {
        let mut candidates = Vec::new();

        if let Some(playbook) = playbook {
            for (i, task) in playbook.enabled_tasks().enumerate() {
                candidates.push(DiscoveryCandidate {
                    command: task.command.clone(),
                    description: task
                        .description
                        .clone()
                        .unwrap_or_else(|| format!("playbook task `{}`", task.name)),
                    source: DiscoverySourceKind::Playbook,
                    priority: 100 - i as i32,
                });
            }
        }

        for (project_type, markers, commands) in project_type_priors() {
            if !self.type_allowed(project_type) {
                continue;
            }
            if !markers.iter().any(|m| cwd.join(m).is_file()) {
                continue;
            }
            for (i, command) in commands.iter().enumerate() {
                candidates.push(DiscoveryCandidate {
                    command: (*command).to_string(),
                    description: format!("common for {project_type} projects"),
                    source: DiscoverySourceKind::ProjectType,
                    priority: 50 - i as i32,
                });
            }
        }

        for (i, command) in TOOL_COMMON.iter().enumerate() {
            candidates.push(DiscoveryCandidate {
                command: (*command).to_string(),
                description: "everyday command".to_string(),
                source: DiscoverySourceKind::ToolCommon,
                priority: 10 - i as i32,
            });
        }

        // Dedup by command text, keeping the highest-precedence source.
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut deduped: Vec<DiscoveryCandidate> = Vec::new();
        for candidate in candidates {
            match seen.get(&candidate.command) {
                Some(&at) if deduped[at].source.order() <= candidate.source.order() => {}
                Some(&at) => deduped[at] = candidate,
                None => {
                    seen.insert(candidate.command.clone(), deduped.len());
                    deduped.push(candidate);
                }
            }
        }

        // Stable: source precedence first, then declared priority.
        deduped.sort_by(|a, b| {
            a.source
                .order()
                .cmp(&b.source.order())
                .then_with(|| b.priority.cmp(&a.priority))
        });

        let mut cooldown = self.cooldown.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::with_capacity(self.config.limit);
        for candidate in deduped {
            if out.len() >= self.config.limit {
                break;
            }
            if let Some(&last) = cooldown.get(&candidate.command)
                && now_ms - last < self.config.cooldown_ms
            {
                continue;
            }
            cooldown.insert(candidate.command.clone(), now_ms);
            out.push(candidate);
        }
        out
    }

    fn type_allowed(&self, project_type: &str) -> bool {
        self.config.project_types.is_empty()
            || self.config.project_types.iter().any(|t| t == project_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine(cooldown_ms: i64, limit: usize) -> DiscoveryEngine {
        DiscoveryEngine::new(DiscoveryConfig {
            cooldown_ms,
            limit,
            project_types: Vec::new(),
        })
    }

    #[test]
    fn project_type_outranks_tool_common() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").expect("write");
        let found = engine(0, 5).discover(dir.path(), None, 1_000);
        assert_eq!(found[0].command, "cargo build");
        assert_eq!(found[0].source, DiscoverySourceKind::ProjectType);
        assert!(found.iter().any(|c| c.source == DiscoverySourceKind::ToolCommon));
    }

    #[test]
    fn playbook_wins_dedup_against_lower_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let playbook =
            Playbook::parse("tasks:\n  - name: status\n    command: git status\n").expect("parse");
        let found = engine(0, 5).discover(dir.path(), Some(&playbook), 1_000);
        let status: Vec<_> = found.iter().filter(|c| c.command == "git status").collect();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].source, DiscoverySourceKind::Playbook);
    }

    #[test]
    fn cooldown_suppresses_until_elapsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine(10_000, 2);
        let first = engine.discover(dir.path(), None, 1_000);
        assert_eq!(first.len(), 2);
        // Within the cooldown the same candidates are skipped and the next
        // tier surfaces instead.
        let second = engine.discover(dir.path(), None, 2_000);
        assert!(second.iter().all(|c| !first.contains(c)));
        // After the window the originals come back.
        let third = engine.discover(dir.path(), None, 12_000);
        assert_eq!(third[0].command, first[0].command);
    }

    #[test]
    fn limit_caps_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let found = engine(0, 2).discover(dir.path(), None, 1_000);
        assert_eq!(found.len(), 2);
    }
}
