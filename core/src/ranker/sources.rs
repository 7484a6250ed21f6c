//! Candidate sources feeding the ranker. Each source is a small capability
//! behind [`SuggestionSource`]: `describe` names it for logs, `fetch`
//! produces weighted candidates for the current context. A failing source
//! contributes nothing; it never fails the request.

use std::collections::BTreeMap;

use clai_protocol::Reason;
use clai_protocol::SuggestionSourceKind;

use super::Candidate;
use super::RankContext;
use crate::config::RankConfig;
use crate::error::Result;
use crate::normalize;
use crate::playbook::Playbook;
use crate::playbook::Priority;
use crate::storage::Database;
use crate::storage::GLOBAL_SCOPE;
use crate::storage::repo_scope;

/// Recency window for the frequency signal.
const FREQUENCY_WINDOW_MS: i64 = 30 * 24 * 60 * 60 * 1000;
/// How much of the session tail the transition and workflow signals read.
const SESSION_TAIL: usize = 100;
const MAX_CANDIDATES_PER_SOURCE: usize = 20;

pub trait SuggestionSource {
    fn describe(&self) -> &'static str;
    fn fetch(&self, ctx: &RankContext<'_>) -> Result<Vec<Candidate>>;
}

fn reason(kind: &str, description: String) -> Reason {
    Reason {
        kind: kind.to_string(),
        description,
    }
}

// ---------------------------------------------------------------------------
// Session transitions
// ---------------------------------------------------------------------------

pub struct TransitionSource<'a> {
    pub db: &'a Database,
    pub weights: &'a RankConfig,
}

impl SuggestionSource for TransitionSource<'_> {
    fn describe(&self) -> &'static str {
        "session_transition"
    }

    /// Next-command likelihoods after the last committed template, estimated
    /// from this session's own history.
    fn fetch(&self, ctx: &RankContext<'_>) -> Result<Vec<Candidate>> {
        let tail = self.db.session_tail(&ctx.request.session_id, SESSION_TAIL)?;
        let Some(last) = tail.last() else {
            return Ok(Vec::new());
        };
        let last_template = last.template_id.clone();
        if last_template.is_empty() {
            return Ok(Vec::new());
        }

        // template -> (count, latest raw rendering)
        let mut nexts: BTreeMap<String, (u64, String)> = BTreeMap::new();
        let mut transitions = 0u64;
        for pair in tail.windows(2) {
            if pair[0].template_id == last_template && !pair[1].template_id.is_empty() {
                transitions += 1;
                let entry = nexts
                    .entry(pair[1].template_id.clone())
                    .or_insert((0, String::new()));
                entry.0 += 1;
                entry.1 = pair[1].cmd_raw.clone();
            }
        }
        if transitions == 0 {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for (count, text) in nexts.into_values() {
            let likelihood = count as f64 / transitions as f64;
            out.push(Candidate {
                text,
                source: SuggestionSourceKind::SessionTransition,
                score: self.weights.w_transition * likelihood,
                confidence: likelihood,
                reasons: vec![reason(
                    "session_transition",
                    format!("followed `{}` {count} time(s) this session", last.cmd_raw),
                )],
                description: String::new(),
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Frequency
// ---------------------------------------------------------------------------

pub struct FrequencySource<'a> {
    pub db: &'a Database,
    pub weights: &'a RankConfig,
}

impl SuggestionSource for FrequencySource<'_> {
    fn describe(&self) -> &'static str {
        "frequency"
    }

    fn fetch(&self, ctx: &RankContext<'_>) -> Result<Vec<Candidate>> {
        let since = ctx.request.now_ms - FREQUENCY_WINDOW_MS;
        let mut usage = self
            .db
            .template_usage(None, since, MAX_CANDIDATES_PER_SOURCE)?;
        // Repo-local usage gets a mild boost on top of the global signal.
        let repo_usage = match ctx.request.repo_key.as_deref() {
            Some(repo) => self
                .db
                .template_usage(Some(repo), since, MAX_CANDIDATES_PER_SOURCE)?,
            None => Vec::new(),
        };
        let max_count = usage
            .iter()
            .chain(repo_usage.iter())
            .map(|u| u.count)
            .max()
            .unwrap_or(0);
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let repo_templates: std::collections::HashSet<&str> = repo_usage
            .iter()
            .map(|u| u.template_id.as_str())
            .collect();
        usage.sort_by(|a, b| b.count.cmp(&a.count).then(a.cmd_norm.cmp(&b.cmd_norm)));

        let mut out = Vec::new();
        for entry in usage {
            let mut relative = entry.count as f64 / max_count as f64;
            let mut why = format!("used {} time(s) in the last 30 days", entry.count);
            if repo_templates.contains(entry.template_id.as_str()) {
                relative *= 1.25;
                why.push_str(", including in this repo");
            }
            out.push(Candidate {
                text: entry.last_raw,
                source: SuggestionSourceKind::Frequency,
                score: self.weights.w_frequency * relative,
                confidence: relative.min(1.0),
                reasons: vec![reason("frequency", why)],
                description: String::new(),
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Slot completion
// ---------------------------------------------------------------------------

pub struct SlotFillSource<'a> {
    pub db: &'a Database,
    pub weights: &'a RankConfig,
}

impl SuggestionSource for SlotFillSource<'_> {
    fn describe(&self) -> &'static str {
        "slot_fill"
    }

    /// When the buffer is a template missing its next slot, propose the best
    /// remembered value for it. Handles both `git checkout ` (complete a new
    /// slot) and `git checkout ma` (finish a partial value).
    fn fetch(&self, ctx: &RankContext<'_>) -> Result<Vec<Candidate>> {
        let prefix_raw = ctx.prefix_raw.as_str();
        if prefix_raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let ends_open = prefix_raw.ends_with(char::is_whitespace);

        // The template prefix to extend and the partial value to respect.
        let (stem_raw, partial) = if ends_open {
            (prefix_raw.trim_end(), "")
        } else {
            match prefix_raw.rsplit_once(char::is_whitespace) {
                Some((stem, partial)) => (stem.trim_end(), partial),
                // A lone first token is a command head, not a slot value.
                None => return Ok(Vec::new()),
            }
        };
        let stem = normalize::normalize(stem_raw, ctx.shell);
        if stem.cmd_norm.is_empty() {
            return Ok(Vec::new());
        }
        let target = format!("{} {}", stem.cmd_norm, normalize::PLACEHOLDER);
        let slot_idx = stem
            .cmd_norm
            .matches(normalize::PLACEHOLDER)
            .count();

        let mut templates = Vec::new();
        for scope in [
            ctx.request.repo_key.as_deref().map(repo_scope),
            Some(GLOBAL_SCOPE.to_string()),
        ]
        .into_iter()
        .flatten()
        {
            for template in
                self.db
                    .slot_templates_with_prefix(&scope, &stem.cmd_norm, MAX_CANDIDATES_PER_SOURCE)?
            {
                if template == target && !templates.contains(&template) {
                    templates.push(template);
                }
            }
        }

        let mut out = Vec::new();
        for template in templates {
            let values = self.db.slot_top_values_at(
                GLOBAL_SCOPE,
                &template,
                slot_idx,
                2,
                ctx.request.now_ms,
            )?;
            let best = match self.db.slot_best_value_at(
                &template,
                slot_idx,
                ctx.request.repo_key.as_deref(),
                ctx.request.now_ms,
            )? {
                Some(best) => best,
                None => continue,
            };
            if !partial.is_empty() && !best.value.starts_with(partial) {
                continue;
            }
            let ratio = match values.as_slice() {
                [first, second, ..] if first.count > 0.0 => {
                    first.count / (first.count + second.count)
                }
                _ => 1.0,
            };
            out.push(Candidate {
                text: format!("{stem_raw} {}", best.value),
                source: SuggestionSourceKind::SlotFill,
                score: self.weights.w_slot * ratio,
                confidence: ratio,
                reasons: vec![reason(
                    "slot_fill",
                    format!("`{}` is the usual value here", best.value),
                )],
                description: String::new(),
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Workflow continuation
// ---------------------------------------------------------------------------

pub struct WorkflowSource<'a> {
    pub db: &'a Database,
    pub weights: &'a RankConfig,
    pub min_occurrences: u64,
}

impl SuggestionSource for WorkflowSource<'_> {
    fn describe(&self) -> &'static str {
        "workflow"
    }

    /// If the session's recent template suffix matches the head of a promoted
    /// pattern, propose that pattern's next step.
    fn fetch(&self, ctx: &RankContext<'_>) -> Result<Vec<Candidate>> {
        let tail = self.db.session_tail(&ctx.request.session_id, SESSION_TAIL)?;
        if tail.is_empty() {
            return Ok(Vec::new());
        }
        let recent: Vec<&str> = tail.iter().map(|e| e.template_id.as_str()).collect();
        let repo_scope_name = ctx.request.repo_key.as_deref().map(repo_scope);

        let mut out = Vec::new();
        for pattern in self.db.workflow_patterns(self.min_occurrences)? {
            if pattern.scope != GLOBAL_SCOPE
                && Some(pattern.scope.as_str()) != repo_scope_name.as_deref()
            {
                continue;
            }
            // Longest k where the session suffix equals chain[..k].
            let max_k = pattern.template_chain.len().saturating_sub(1);
            let mut matched = 0usize;
            for k in (1..=max_k.min(recent.len())).rev() {
                let suffix = recent[recent.len() - k..].iter().copied();
                if suffix.eq(pattern.template_chain[..k].iter().map(String::as_str)) {
                    matched = k;
                    break;
                }
            }
            if matched == 0 {
                continue;
            }
            let Some(next_display) = pattern.display_chain.get(matched) else {
                continue;
            };
            let progress = matched as f64 / pattern.template_chain.len() as f64;
            let strength = (pattern.occurrence_count as f64 / 10.0).min(1.0);
            out.push(Candidate {
                text: next_display.clone(),
                source: SuggestionSourceKind::Workflow,
                score: self.weights.w_workflow * progress * strength,
                confidence: progress * strength,
                reasons: vec![reason(
                    "workflow",
                    format!(
                        "step {} of a workflow seen {} time(s)",
                        matched + 1,
                        pattern.occurrence_count
                    ),
                )],
                description: String::new(),
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Playbook follow-ups
// ---------------------------------------------------------------------------

pub struct PlaybookSource<'a> {
    pub playbook: Option<&'a Playbook>,
    pub weights: &'a RankConfig,
}

impl SuggestionSource for PlaybookSource<'_> {
    fn describe(&self) -> &'static str {
        "playbook"
    }

    fn fetch(&self, ctx: &RankContext<'_>) -> Result<Vec<Candidate>> {
        let (Some(playbook), Some(session)) = (self.playbook, ctx.session.as_ref()) else {
            return Ok(Vec::new());
        };
        let Some(last_cmd) = session.last_cmd_raw.as_deref() else {
            return Ok(Vec::new());
        };
        let failed = session.last_exit_code.is_some_and(|code| code != 0);

        let mut out = Vec::new();
        for task in playbook.next_tasks(last_cmd, failed) {
            let factor = match task.priority {
                Priority::High => 1.0,
                Priority::Normal => 0.75,
                Priority::Low => 0.5,
            };
            out.push(Candidate {
                text: task.command.clone(),
                source: SuggestionSourceKind::Playbook,
                score: self.weights.w_playbook * factor,
                confidence: factor,
                reasons: vec![reason(
                    "playbook",
                    format!("playbook task `{}` follows `{last_cmd}`", task.name),
                )],
                description: task.description.clone().unwrap_or_default(),
            });
        }
        Ok(out)
    }
}
