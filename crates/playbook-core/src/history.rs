//! Client for the external session-search tool ("cass"). The core never
//! parses transcripts itself; it asks the tool for snippets, exports, and
//! timelines, and degrades gracefully when the tool is missing.

use crate::config::Config;
use crate::error::{PlaybookError, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Exit code the tool uses to signal a missing search index. Seeing it
/// triggers one rebuild-and-retry.
pub const INDEX_MISSING_EXIT_CODE: i32 = 3;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: usize,
    pub days: i64,
    pub agent: Option<String>,
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySnippet {
    pub source_path: String,
    #[serde(default)]
    pub line_number: u64,
    #[serde(default)]
    pub agent: String,
    pub snippet: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineSession {
    pub path: String,
    #[serde(default)]
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineDay {
    pub date: String,
    #[serde(default)]
    pub sessions: Vec<TimelineSession>,
}

#[derive(Debug, Clone, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    groups: Vec<TimelineDay>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The contract the core depends on. `search` distinguishes "tool not
/// reachable" (`Err(HistoryUnavailable)`) from "no results" (`Ok(empty)`)
/// because the evidence gate treats them differently.
pub trait HistorySearch {
    fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<HistorySnippet>>;
    fn export(&self, session_path: &str) -> Result<Option<String>>;
    fn timeline(&self, days: i64) -> Result<Vec<TimelineDay>>;
}

/// Stand-in when no tool is configured: everything is unavailable.
pub struct NullHistory;

impl HistorySearch for NullHistory {
    fn search(&self, _query: &str, _opts: &SearchOptions) -> Result<Vec<HistorySnippet>> {
        Err(PlaybookError::HistoryUnavailable(
            "no history tool configured".to_string(),
        ))
    }

    fn export(&self, _session_path: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn timeline(&self, _days: i64) -> Result<Vec<TimelineDay>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// CLI-backed implementation
// ---------------------------------------------------------------------------

pub struct CassHistory {
    bin: PathBuf,
    search_timeout: Duration,
    export_timeout: Duration,
}

struct ToolOutput {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl CassHistory {
    /// Resolve the tool binary from config. `None` when it is not on PATH —
    /// callers fall back to `NullHistory`.
    pub fn from_config(cfg: &Config) -> Option<Self> {
        let bin = which::which(&cfg.cass_path).ok()?;
        Some(Self {
            bin,
            search_timeout: Duration::from_secs(cfg.search_timeout_seconds),
            export_timeout: Duration::from_secs(cfg.export_timeout_seconds),
        })
    }

    fn run(&self, args: &[String], timeout: Duration) -> Result<ToolOutput> {
        let mut child = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PlaybookError::HistoryUnavailable(e.to_string()))?;

        // Drain the pipes from threads so a chatty child never blocks on a
        // full pipe buffer while we poll for exit.
        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");
        let stdout_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf);
            buf
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf);
            buf
        });

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PlaybookError::History(format!(
                        "{} timed out after {:?}",
                        self.bin.display(),
                        timeout
                    )));
                }
                None => std::thread::sleep(Duration::from_millis(25)),
            }
        };

        Ok(ToolOutput {
            code: status.code(),
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: stderr_reader.join().unwrap_or_default(),
        })
    }

    fn rebuild_index(&self) -> Result<()> {
        tracing::info!("history index missing, rebuilding");
        let args = vec!["index".to_string()];
        // Index rebuilds can take a while; give them the export budget.
        self.run(&args, self.export_timeout.max(self.search_timeout))?;
        Ok(())
    }

    fn search_once(&self, query: &str, opts: &SearchOptions) -> Result<ToolOutput> {
        let mut args = vec![
            "search".to_string(),
            query.to_string(),
            "--json".to_string(),
            "--limit".to_string(),
            opts.limit.to_string(),
            "--days".to_string(),
            opts.days.to_string(),
        ];
        if let Some(agent) = &opts.agent {
            args.push("--agent".to_string());
            args.push(agent.clone());
        }
        if let Some(workspace) = &opts.workspace {
            args.push("--workspace".to_string());
            args.push(workspace.clone());
        }
        self.run(&args, self.search_timeout)
    }
}

impl HistorySearch for CassHistory {
    fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<HistorySnippet>> {
        let mut output = self.search_once(query, opts)?;
        if output.code == Some(INDEX_MISSING_EXIT_CODE) {
            self.rebuild_index()?;
            output = self.search_once(query, opts)?;
        }
        if output.code != Some(0) {
            tracing::warn!(
                code = ?output.code,
                stderr = %output.stderr.trim(),
                "history search failed, returning no results"
            );
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Vec<HistorySnippet>>(&output.stdout) {
            Ok(snippets) => Ok(snippets),
            Err(e) => {
                tracing::warn!("history search returned malformed JSON: {e}");
                Ok(Vec::new())
            }
        }
    }

    fn export(&self, session_path: &str) -> Result<Option<String>> {
        let args = vec![
            "export".to_string(),
            session_path.to_string(),
            "--format".to_string(),
            "markdown".to_string(),
        ];
        let output = self.run(&args, self.export_timeout)?;
        if output.code != Some(0) || output.stdout.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(output.stdout))
    }

    fn timeline(&self, days: i64) -> Result<Vec<TimelineDay>> {
        let args = vec![
            "timeline".to_string(),
            "--days".to_string(),
            days.to_string(),
            "--json".to_string(),
        ];
        let output = self.run(&args, self.search_timeout)?;
        if output.code != Some(0) {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<TimelineResponse>(&output.stdout) {
            Ok(response) => Ok(response.groups),
            Err(e) => {
                tracing::warn!("history timeline returned malformed JSON: {e}");
                Ok(Vec::new())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_history_search_is_unavailable() {
        let result = NullHistory.search("query", &SearchOptions::default());
        assert!(matches!(result, Err(PlaybookError::HistoryUnavailable(_))));
    }

    #[test]
    fn null_history_export_and_timeline_are_empty() {
        assert!(NullHistory.export("/x/session.jsonl").unwrap().is_none());
        assert!(NullHistory.timeline(7).unwrap().is_empty());
    }

    #[test]
    fn from_config_none_for_missing_binary() {
        let mut cfg = Config::default();
        cfg.cass_path = "definitely-not-a-real-binary-name".to_string();
        assert!(CassHistory::from_config(&cfg).is_none());
    }

    #[test]
    fn snippet_json_shape() {
        let json = r#"[{"source_path":"/x/s.jsonl","line_number":12,"agent":"claude-code","snippet":"fixed the bug","score":0.9}]"#;
        let snippets: Vec<HistorySnippet> = serde_json::from_str(json).unwrap();
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].agent, "claude-code");
    }

    #[test]
    fn snippet_json_tolerates_missing_optionals() {
        let json = r#"[{"source_path":"/x/s.jsonl","snippet":"did things"}]"#;
        let snippets: Vec<HistorySnippet> = serde_json::from_str(json).unwrap();
        assert_eq!(snippets[0].line_number, 0);
        assert_eq!(snippets[0].score, 0.0);
    }

    #[test]
    fn timeline_json_shape() {
        let json = r#"{"groups":[{"date":"2026-07-30","sessions":[{"path":"/x/a.jsonl","agent":"cursor"}]}]}"#;
        let response: TimelineResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.groups.len(), 1);
        assert_eq!(response.groups[0].sessions[0].agent, "cursor");
    }
}
