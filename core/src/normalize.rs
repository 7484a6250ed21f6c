//! Command normalization: raw command text in, template plus slot values out.
//!
//! A template (`cmd_norm`) keeps command heads, recognized subcommands, flags
//! and shell operators, and replaces everything value-like (paths, numbers,
//! URLs, refs, quoted strings, arguments of value-taking flags) with the `{}`
//! placeholder. Identical normalized text hashes to the same `template_id`
//! in every process.

use clai_protocol::ShellKind;
use serde::Deserialize;
use serde::Serialize;

use crate::hash::stable_hex64;

/// Commands longer than this are truncated and excluded from learning.
pub const MAX_CMD_BYTES: usize = 4096;

pub const PLACEHOLDER: &str = "{}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBinding {
    pub idx: usize,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Normalized {
    pub cmd_norm: String,
    /// 16-hex-digit stable hash of `cmd_norm`; empty when the command is
    /// empty or was truncated (truncated commands never enter learning).
    pub template_id: String,
    pub slots: Vec<SlotBinding>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    quoted: bool,
}

/// Commands that merely wrap the real one; the head shifts past them.
const WRAPPER_COMMANDS: &[&str] = &["sudo", "nohup", "time", "nice", "env"];

/// Flags whose following token is always a value, regardless of its shape.
const VALUE_FLAGS: &[&str] = &[
    "-m",
    "--message",
    "-o",
    "--output",
    "--file",
    "-C",
    "-b",
    "--branch",
    "-t",
    "--tag",
    "-u",
    "--user",
    "-p",
    "--port",
    "--name",
    "-e",
    "--env",
    "-f",
    "--format",
];

fn known_subcommands(head: &str) -> &'static [&'static str] {
    match head {
        "git" => &[
            "add", "am", "bisect", "blame", "branch", "checkout", "cherry-pick", "clean", "clone",
            "commit", "config", "diff", "fetch", "grep", "init", "log", "merge", "mv", "pull",
            "push", "rebase", "reflog", "remote", "reset", "restore", "revert", "rm", "show",
            "stash", "status", "switch", "tag", "worktree",
        ],
        "docker" => &[
            "build", "compose", "container", "exec", "image", "images", "inspect", "kill", "logs",
            "network", "ps", "pull", "push", "restart", "rm", "rmi", "run", "start", "stop",
            "system", "up", "volume", "down",
        ],
        "kubectl" => &[
            "apply", "config", "create", "delete", "describe", "edit", "exec", "get", "logs",
            "port-forward", "rollout", "scale", "top",
        ],
        "cargo" => &[
            "add", "bench", "build", "check", "clean", "clippy", "doc", "fmt", "install", "new",
            "publish", "remove", "run", "test", "update",
        ],
        "npm" | "pnpm" | "yarn" => &[
            "add", "audit", "build", "ci", "dev", "init", "install", "link", "lint", "publish",
            "remove", "run", "start", "test", "uninstall", "update",
        ],
        "go" => &[
            "build", "fmt", "generate", "get", "install", "mod", "run", "test", "tidy", "vet",
            "version", "work",
        ],
        "pip" | "pip3" => &["download", "freeze", "install", "list", "show", "uninstall"],
        "apt" | "apt-get" => &[
            "autoremove",
            "install",
            "list",
            "purge",
            "remove",
            "search",
            "show",
            "update",
            "upgrade",
        ],
        "brew" => &[
            "cleanup", "info", "install", "link", "list", "search", "services", "uninstall",
            "update", "upgrade",
        ],
        "systemctl" => &[
            "daemon-reload",
            "disable",
            "enable",
            "restart",
            "start",
            "status",
            "stop",
        ],
        "terraform" => &["apply", "destroy", "fmt", "init", "plan", "state", "validate"],
        "helm" => &["install", "list", "repo", "rollback", "status", "uninstall", "upgrade"],
        "gh" => &["api", "auth", "issue", "pr", "release", "repo", "run", "workflow"],
        "make" => &[],
        _ => &[],
    }
}

fn is_connector(text: &str) -> bool {
    matches!(text, "&&" | "||" | "|" | ";" | "|&" | "&")
}

fn is_redirect(text: &str) -> bool {
    let stripped = text.trim_start_matches(|c: char| c.is_ascii_digit());
    !stripped.is_empty()
        && stripped.chars().next().is_some_and(|c| c == '>' || c == '<')
        && stripped
            .chars()
            .all(|c| matches!(c, '>' | '<' | '&' | '1' | '2'))
}

/// Split raw command text into tokens, honoring single and double quotes and
/// separating shell operators into their own tokens.
fn tokenize(raw: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut cur = String::new();
    let mut cur_quoted = false;
    let mut chars = raw.chars().peekable();

    let flush = |cur: &mut String, cur_quoted: &mut bool, tokens: &mut Vec<Token>| {
        if !cur.is_empty() || *cur_quoted {
            tokens.push(Token {
                text: std::mem::take(cur),
                quoted: *cur_quoted,
            });
            *cur_quoted = false;
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                cur_quoted = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    cur.push(q);
                }
            }
            '"' => {
                cur_quoted = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                cur.push(escaped);
                            }
                        }
                        _ => cur.push(q),
                    }
                }
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_whitespace() => flush(&mut cur, &mut cur_quoted, &mut tokens),
            '|' | '&' | ';' | '<' | '>' => {
                // A numeric token directly before a redirect is its fd prefix
                // (`2>`, `2>&1`), not a value.
                let fd_prefix = (c == '>' || c == '<')
                    && !cur.is_empty()
                    && cur.chars().all(|d| d.is_ascii_digit());
                if !fd_prefix {
                    flush(&mut cur, &mut cur_quoted, &mut tokens);
                }
                cur.push(c);
                while let Some(&next) = chars.peek() {
                    if matches!(next, '|' | '&' | '<' | '>')
                        || (next == '1' && cur.ends_with('&'))
                        || (next == '2' && cur.ends_with('&'))
                    {
                        cur.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                flush(&mut cur, &mut cur_quoted, &mut tokens);
            }
            _ => cur.push(c),
        }
    }
    flush(&mut cur, &mut cur_quoted, &mut tokens);
    tokens
}

/// Normalize a raw command for the given shell. Fish connectors (`and`,
/// `or`) are treated as keywords so they survive templating.
pub fn normalize(cmd_raw: &str, shell: ShellKind) -> Normalized {
    let (raw, truncated) = truncate_utf8(cmd_raw.trim(), MAX_CMD_BYTES);
    let tokens = tokenize(raw);

    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut slots: Vec<SlotBinding> = Vec::new();
    let mut head: Option<String> = None;
    // Set when the previous token was a value-taking flag.
    let mut value_expected = false;

    for token in &tokens {
        let text = token.text.as_str();

        if !token.quoted && (is_connector(text) || is_fish_connector(shell, text)) {
            out.push(text.to_string());
            head = None;
            value_expected = false;
            continue;
        }
        if !token.quoted && is_redirect(text) {
            out.push(text.to_string());
            value_expected = false;
            continue;
        }

        if head.is_none() {
            if !token.quoted && WRAPPER_COMMANDS.contains(&text) {
                out.push(text.to_string());
                continue;
            }
            head = Some(text.to_string());
            out.push(text.to_string());
            continue;
        }

        if value_expected {
            value_expected = false;
            push_slot(&mut out, &mut slots, text);
            continue;
        }

        if !token.quoted && text.starts_with('-') && text.len() > 1 {
            if let Some((flag, value)) = text.split_once('=') {
                out.push(format!("{flag}={PLACEHOLDER}"));
                slots.push(SlotBinding {
                    idx: slots.len(),
                    value: value.to_string(),
                });
            } else {
                value_expected = VALUE_FLAGS.contains(&text);
                out.push(text.to_string());
            }
            continue;
        }

        let head_name = head.as_deref().unwrap_or_default();
        if !token.quoted && known_subcommands(head_name).contains(&text) {
            out.push(text.to_string());
            continue;
        }

        push_slot(&mut out, &mut slots, text);
    }

    let cmd_norm = out.join(" ");
    let template_id = if cmd_norm.is_empty() || truncated {
        String::new()
    } else {
        stable_hex64(&cmd_norm)
    };
    Normalized {
        cmd_norm,
        template_id,
        slots,
        truncated,
    }
}

fn is_fish_connector(shell: ShellKind, text: &str) -> bool {
    shell == ShellKind::Fish && matches!(text, "and" | "or" | "not")
}

fn push_slot(out: &mut Vec<String>, slots: &mut Vec<SlotBinding>, value: &str) {
    out.push(PLACEHOLDER.to_string());
    slots.push(SlotBinding {
        idx: slots.len(),
        value: value.to_string(),
    });
}

/// Cut at a char boundary at or below `max` bytes.
fn truncate_utf8(s: &str, max: usize) -> (&str, bool) {
    if s.len() <= max {
        return (s, false);
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    (&s[..end], true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn norm(cmd: &str) -> Normalized {
        normalize(cmd, ShellKind::Bash)
    }

    #[test]
    fn keeps_keywords_replaces_values() {
        let n = norm("git checkout main");
        assert_eq!(n.cmd_norm, "git checkout {}");
        assert_eq!(n.slots, vec![SlotBinding {
            idx: 0,
            value: "main".into()
        }]);
    }

    #[test]
    fn flags_survive_values_do_not() {
        let n = norm("git log --oneline -10");
        assert_eq!(n.cmd_norm, "git log --oneline -10");
        assert!(n.slots.is_empty());

        let n = norm("cargo test -p clai-core");
        assert_eq!(n.cmd_norm, "cargo test -p {}");
        assert_eq!(n.slots[0].value, "clai-core");
    }

    #[test]
    fn value_flag_argument_is_a_slot_even_when_wordlike() {
        let n = norm("git commit -m status");
        assert_eq!(n.cmd_norm, "git commit -m {}");
        assert_eq!(n.slots[0].value, "status");
    }

    #[test]
    fn quoted_strings_are_single_slots() {
        let n = norm("git commit -m \"fix the parser\"");
        assert_eq!(n.cmd_norm, "git commit -m {}");
        assert_eq!(n.slots, vec![SlotBinding {
            idx: 0,
            value: "fix the parser".into()
        }]);
    }

    #[test]
    fn flag_equals_value_form() {
        let n = norm("docker run --name=web nginx");
        assert_eq!(n.cmd_norm, "docker run --name={} {}");
        assert_eq!(n.slots.len(), 2);
        assert_eq!(n.slots[0].value, "web");
        assert_eq!(n.slots[1].value, "nginx");
    }

    #[test]
    fn connectors_and_redirects_are_preserved() {
        let n = norm("make build && ./run.sh > out.log 2>&1");
        assert_eq!(n.cmd_norm, "make {} && ./run.sh > {} 2>&1");
        assert_eq!(n.slots.len(), 2);
        assert_eq!(n.slots[0].value, "build");
        assert_eq!(n.slots[1].value, "out.log");
    }

    #[test]
    fn wrapper_commands_shift_the_head() {
        let n = norm("sudo systemctl restart nginx");
        assert_eq!(n.cmd_norm, "sudo systemctl restart {}");
        assert_eq!(n.slots[0].value, "nginx");
    }

    #[test]
    fn template_id_is_pure_function_of_cmd_norm() {
        let a = norm("git checkout main");
        let b = norm("git checkout feature/login");
        assert_eq!(a.template_id, b.template_id);
        assert_eq!(a.template_id.len(), 16);
        assert_ne!(a.template_id, norm("git status").template_id);
    }

    #[test]
    fn empty_command_has_empty_template() {
        let n = norm("   ");
        assert_eq!(n.cmd_norm, "");
        assert_eq!(n.template_id, "");
        assert!(n.slots.is_empty());
    }

    #[test]
    fn oversized_command_is_truncated_and_unlearnable() {
        let long = format!("echo {}", "x".repeat(MAX_CMD_BYTES));
        let n = norm(&long);
        assert!(n.truncated);
        assert_eq!(n.template_id, "");
    }

    #[test]
    fn fish_connectors_are_kept() {
        let n = normalize("cargo build; and cargo test", ShellKind::Fish);
        assert_eq!(n.cmd_norm, "cargo build ; and cargo test");
    }

    #[test]
    fn slot_indexes_are_sequential_across_segments() {
        let n = norm("cp a.txt b.txt");
        assert_eq!(n.cmd_norm, "cp {} {}");
        assert_eq!(
            n.slots.iter().map(|s| s.idx).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }
}
