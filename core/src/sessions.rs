//! In-memory registry of live shell sessions. Purely derived state: it backs
//! `GetStatus` and the session-transition ranker source, and evaporates on
//! daemon restart.

use std::collections::HashMap;
use std::sync::RwLock;

use clai_protocol::ClientInfo;
use clai_protocol::ShellKind;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub started_at_ms: i64,
    pub shell: ShellKind,
    pub cwd: String,
    pub client: ClientInfo,
    pub last_command_id: Option<String>,
    pub last_template_id: Option<String>,
    pub last_cmd_raw: Option<String>,
    pub last_exit_code: Option<i32>,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<String, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &self,
        session_id: &str,
        cwd: &str,
        shell: ShellKind,
        client: ClientInfo,
        ts_ms: i64,
    ) {
        let info = SessionInfo {
            session_id: session_id.to_string(),
            started_at_ms: ts_ms,
            shell,
            cwd: cwd.to_string(),
            client,
            last_command_id: None,
            last_template_id: None,
            last_cmd_raw: None,
            last_exit_code: None,
        };
        self.write().insert(session_id.to_string(), info);
    }

    pub fn end(&self, session_id: &str) -> bool {
        self.write().remove(session_id).is_some()
    }

    pub fn note_command_started(&self, session_id: &str, command_id: &str, cwd: &str) {
        if let Some(info) = self.write().get_mut(session_id) {
            info.last_command_id = Some(command_id.to_string());
            info.cwd = cwd.to_string();
        }
    }

    /// Record the last *committed* command; transition candidates key off
    /// this.
    pub fn note_command_ended(
        &self,
        session_id: &str,
        template_id: &str,
        cmd_raw: &str,
        exit_code: i32,
    ) {
        if let Some(info) = self.write().get_mut(session_id) {
            if !template_id.is_empty() {
                info.last_template_id = Some(template_id.to_string());
            }
            info.last_cmd_raw = Some(cmd_raw.to_string());
            info.last_exit_code = Some(exit_code);
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.read().get(session_id).cloned()
    }

    pub fn shell_of(&self, session_id: &str) -> ShellKind {
        self.read()
            .get(session_id)
            .map(|s| s.shell)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionInfo>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionInfo>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_tracks_last_committed_command() {
        let registry = SessionRegistry::new();
        registry.start("s1", "/home", ShellKind::Zsh, ClientInfo::default(), 1_000);
        assert_eq!(registry.len(), 1);

        registry.note_command_started("s1", "c1", "/home/project");
        registry.note_command_ended("s1", "abcd1234abcd1234", "git status", 0);
        let info = registry.get("s1").expect("present");
        assert_eq!(info.cwd, "/home/project");
        assert_eq!(info.last_template_id.as_deref(), Some("abcd1234abcd1234"));
        assert_eq!(info.last_exit_code, Some(0));

        assert!(registry.end("s1"));
        assert!(!registry.end("s1"));
        assert!(registry.is_empty());
    }
}
