//! Opaque natural-language-to-command translation.
//!
//! The remote service is a single JSON POST endpoint configured under the
//! `ai` config keys. The daemon never depends on it being reachable: an
//! unconfigured endpoint yields an empty list, and every request runs under
//! the configured timeout.

use std::time::Duration;

use clai_protocol::Reason;
use clai_protocol::Suggestion;
use clai_protocol::SuggestionSourceKind;
use serde::Deserialize;
use serde::Serialize;

use crate::config::AiConfig;
use crate::error::ClaiErr;
use crate::error::Result;
use crate::normalize;
use crate::ranker::risk;

#[derive(Serialize)]
struct TranslateRequest<'a> {
    prompt: &'a str,
    cwd: &'a str,
    history: &'a [String],
    max_suggestions: usize,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    commands: Vec<RemoteCommand>,
}

#[derive(Deserialize)]
struct RemoteCommand {
    command: String,
    #[serde(default)]
    description: String,
}

pub struct TextToCommand {
    config: AiConfig,
    http: reqwest::Client,
}

impl TextToCommand {
    pub fn new(config: AiConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.endpoint.is_empty()
    }

    /// Translate `prompt` into candidate commands. `history` carries a few
    /// recent commands for context; the remote treats them as hints only.
    pub async fn translate(
        &self,
        prompt: &str,
        cwd: &str,
        history: &[String],
        max_suggestions: usize,
    ) -> Result<Vec<Suggestion>> {
        if !self.is_configured() {
            return Ok(Vec::new());
        }

        let body = TranslateRequest {
            prompt,
            cwd,
            history,
            max_suggestions,
        };
        let mut request = self
            .http
            .post(&self.config.endpoint)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClaiErr::DeadlineExceeded
                } else {
                    ClaiErr::Remote(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| ClaiErr::Remote(e.to_string()))?;
        let translated: TranslateResponse = response
            .json()
            .await
            .map_err(|e| ClaiErr::Remote(e.to_string()))?;

        let count = translated.commands.len().max(1) as f64;
        Ok(translated
            .commands
            .into_iter()
            .take(max_suggestions)
            .enumerate()
            .map(|(i, remote)| {
                let normalized =
                    normalize::normalize(&remote.command, clai_protocol::ShellKind::Bash);
                Suggestion {
                    risk: risk::classify(&normalized.cmd_norm),
                    text: remote.command,
                    // Remote ordering is the only signal we have.
                    score: 1.0 - i as f64 / count,
                    source: SuggestionSourceKind::Ai,
                    confidence: 0.5,
                    reasons: vec![Reason {
                        kind: "ai".to_string(),
                        description: format!("translated from: {prompt}"),
                    }],
                    description: remote.description,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_endpoint_yields_empty() {
        let ttc = TextToCommand::new(AiConfig::default());
        assert!(!ttc.is_configured());
        let out = ttc
            .translate("list files", "/tmp", &[], 3)
            .await
            .expect("translate");
        assert!(out.is_empty());
    }
}
