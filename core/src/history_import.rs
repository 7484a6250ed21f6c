//! Bulk import of existing shell history files so a fresh daemon starts
//! with a warm frequency signal instead of an empty database.
//!
//! Supported formats: plain bash history, zsh (plain and extended
//! `: <ts>:<dur>;cmd`), and fish's `- cmd:` / `when:` YAML-ish log. Entries
//! are deduplicated, normalized, and inserted as completed synthetic events
//! in batched transactions.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use clai_protocol::ImportReport;
use clai_protocol::ShellKind;
use tracing::warn;

use crate::error::ClaiErr;
use crate::error::Result;
use crate::normalize;
use crate::storage::Database;
use crate::storage::NewCommandEvent;
use crate::storage::{self};

const BATCH_SIZE: usize = 500;

#[derive(Debug, Clone)]
struct ImportedLine {
    cmd: String,
    /// Milliseconds, when the source format records one.
    ts_ms: Option<i64>,
}

/// Default history file location for a shell.
pub fn default_history_path(shell: ShellKind, home: &Path) -> Option<PathBuf> {
    match shell {
        ShellKind::Bash => Some(home.join(".bash_history")),
        ShellKind::Zsh => Some(home.join(".zsh_history")),
        ShellKind::Fish => Some(home.join(".local/share/fish/fish_history")),
        ShellKind::Unknown => None,
    }
}

pub fn import_file(
    db: &Database,
    shell: ShellKind,
    path: &Path,
    now_ms: i64,
) -> Result<ImportReport> {
    let text = std::fs::read_to_string(path)?;
    let lines = match shell {
        ShellKind::Bash => parse_bash(&text),
        ShellKind::Zsh => parse_zsh(&text),
        ShellKind::Fish => parse_fish(&text),
        ShellKind::Unknown => {
            return Err(ClaiErr::malformed(
                "import requires a known shell (bash, zsh or fish)",
            ));
        }
    };
    import_lines(db, shell, lines, now_ms)
}

fn import_lines(
    db: &Database,
    shell: ShellKind,
    lines: Vec<ImportedLine>,
    now_ms: i64,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let mut seen: HashSet<String> = HashSet::new();
    let session_id = format!("import:{shell:?}:{now_ms}").to_lowercase();
    let total = lines.len() as i64;
    let slot_config = db.slot_config().clone();

    for (chunk_no, chunk) in lines.chunks(BATCH_SIZE).enumerate() {
        let base = (chunk_no * BATCH_SIZE) as i64;
        db.with_tx(|tx| {
            for (offset, line) in chunk.iter().enumerate() {
                let index = base + offset as i64;
                if line.cmd.trim().is_empty() || !seen.insert(line.cmd.clone()) {
                    report.skipped += 1;
                    continue;
                }
                let normalized = normalize::normalize(&line.cmd, shell);
                if normalized.cmd_norm.is_empty() {
                    report.skipped += 1;
                    continue;
                }
                // Files without timestamps get synthetic ones, spaced one
                // second apart and ending at the import time.
                let ts_ms = line.ts_ms.unwrap_or(now_ms - (total - index) * 1_000);
                let event = NewCommandEvent {
                    session_id: session_id.clone(),
                    command_id: format!("h{index}"),
                    ts_ms,
                    cwd: String::new(),
                    repo_key: None,
                    branch: None,
                    cmd_raw: line.cmd.clone(),
                    cmd_norm: normalized.cmd_norm.clone(),
                    cmd_truncated: normalized.truncated,
                    template_id: normalized.template_id.clone(),
                    ephemeral: false,
                };
                if !storage::event_log::insert_started_in_tx(tx, &event)? {
                    report.skipped += 1;
                    continue;
                }
                storage::event_log::mark_ended_in_tx(
                    tx,
                    &session_id,
                    &event.command_id,
                    0,
                    0,
                )?;
                if !normalized.template_id.is_empty() {
                    for slot in &normalized.slots {
                        if let Err(e) = storage::slot_store::update_in_tx(
                            tx,
                            &slot_config,
                            storage::GLOBAL_SCOPE,
                            &normalized.cmd_norm,
                            slot.idx,
                            &slot.value,
                            ts_ms,
                        ) {
                            warn!(error = %e, "slot learning failed during import");
                        }
                    }
                }
                report.imported += 1;
            }
            Ok(())
        })?;
    }
    Ok(report)
}

fn parse_bash(text: &str) -> Vec<ImportedLine> {
    text.lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .map(|l| ImportedLine {
            cmd: l.trim().to_string(),
            ts_ms: None,
        })
        .collect()
}

/// Zsh extended history: `: 1700000000:5;git status`. Plain lines pass
/// through untouched. Multi-line entries (trailing `\`) are joined.
fn parse_zsh(text: &str) -> Vec<ImportedLine> {
    let mut out: Vec<ImportedLine> = Vec::new();
    let mut pending: Option<ImportedLine> = None;
    for line in text.lines() {
        if let Some(prev) = &mut pending {
            prev.cmd.push('\n');
            prev.cmd.push_str(line.trim_end_matches('\\'));
            if !line.ends_with('\\')
                && let Some(done) = pending.take()
            {
                out.push(done);
            }
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (ts_ms, cmd) = match trimmed.strip_prefix(": ") {
            Some(rest) => match rest.split_once(';') {
                Some((meta, cmd)) => {
                    let ts = meta
                        .split(':')
                        .next()
                        .and_then(|s| s.trim().parse::<i64>().ok())
                        .map(|secs| secs * 1_000);
                    (ts, cmd)
                }
                None => (None, trimmed),
            },
            None => (None, trimmed),
        };
        let entry = ImportedLine {
            cmd: cmd.trim_end_matches('\\').trim().to_string(),
            ts_ms,
        };
        if cmd.ends_with('\\') {
            pending = Some(entry);
        } else {
            out.push(entry);
        }
    }
    if let Some(entry) = pending {
        out.push(entry);
    }
    out
}

/// Fish history: repeated `- cmd: <text>` lines, each optionally followed by
/// an indented `when: <secs>`.
fn parse_fish(text: &str) -> Vec<ImportedLine> {
    let mut out: Vec<ImportedLine> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(cmd) = trimmed.strip_prefix("- cmd: ") {
            out.push(ImportedLine {
                cmd: cmd.trim().to_string(),
                ts_ms: None,
            });
        } else if let Some(when) = trimmed.strip_prefix("when: ")
            && let Some(last) = out.last_mut()
            && last.ts_ms.is_none()
        {
            last.ts_ms = when.trim().parse::<i64>().ok().map(|secs| secs * 1_000);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlotConfig;
    use crate::storage::EventFilter;
    use pretty_assertions::assert_eq;

    fn db() -> Database {
        Database::open_in_memory(SlotConfig::default()).expect("open")
    }

    #[test]
    fn bash_lines_import_with_synthetic_timestamps() {
        let db = db();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".bash_history");
        std::fs::write(&path, "git status\nls -la\ngit status\n").expect("write");

        let report = import_file(&db, ShellKind::Bash, &path, 1_000_000).expect("import");
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped, 1);

        let rows = db
            .fetch_history(&EventFilter {
                limit: 10,
                ..Default::default()
            })
            .expect("history");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.exit_code == Some(0)));
        assert!(rows.iter().all(|r| r.ts_ms < 1_000_000));
    }

    #[test]
    fn zsh_extended_format_keeps_real_timestamps() {
        let parsed = parse_zsh(": 1700000000:5;git push\n: 1700000100:0;ls\nplain command\n");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].cmd, "git push");
        assert_eq!(parsed[0].ts_ms, Some(1_700_000_000_000));
        assert_eq!(parsed[2].cmd, "plain command");
        assert_eq!(parsed[2].ts_ms, None);
    }

    #[test]
    fn fish_format_pairs_cmd_and_when() {
        let parsed = parse_fish("- cmd: git status\n  when: 1700000000\n- cmd: ls\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].cmd, "git status");
        assert_eq!(parsed[0].ts_ms, Some(1_700_000_000_000));
        assert_eq!(parsed[1].ts_ms, None);
    }

    #[test]
    fn imported_slots_feed_the_store() {
        let db = db();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".bash_history");
        std::fs::write(&path, "git checkout main\ngit checkout develop\n").expect("write");
        import_file(&db, ShellKind::Bash, &path, 1_000_000).expect("import");

        let rows = db
            .slot_top_values_at(storage::GLOBAL_SCOPE, "git checkout {}", 0, 5, 1_000_000)
            .expect("query");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn unknown_shell_is_rejected() {
        let db = db();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history");
        std::fs::write(&path, "ls\n").expect("write");
        assert!(matches!(
            import_file(&db, ShellKind::Unknown, &path, 0),
            Err(ClaiErr::Malformed(_))
        ));
    }
}
