//! Session Log Reader (C3): parses append-only NDJSON conversation logs
//! under `<agent-root>/projects/<alias>/*.jsonl`.

use std::collections::HashMap;
use std::path::PathBuf;

use gateway_paths::GatewayPaths;
use gateway_protocol::types::{MessageBody, MessageContent, MessageRole, SessionSummaryDto};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::SessionError;
use crate::util::write_atomic;

const MAX_SUMMARY_CHARS: usize = 50;
const COMMAND_PREFIX: &str = "<command-name>";

#[derive(Debug, Clone)]
pub struct SessionLogReader {
    paths: GatewayPaths,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "type", default)]
    line_type: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    message: Option<MessageBody>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Default)]
struct Accumulator {
    summary_override: Option<String>,
    candidate_text: Option<String>,
    candidate_timestamp: Option<String>,
    message_count: usize,
    last_activity: Option<String>,
    cwd: Option<String>,
}

pub struct SessionListResult {
    pub sessions: Vec<SessionSummaryDto>,
    pub total: usize,
    pub has_more: bool,
}

pub enum GetMessagesResult {
    All(Vec<gateway_protocol::types::SessionMessageDto>),
    Page {
        messages: Vec<gateway_protocol::types::SessionMessageDto>,
        total: usize,
        has_more: bool,
    },
}

impl SessionLogReader {
    pub fn new(paths: GatewayPaths) -> Self {
        Self { paths }
    }

    /// Files under an alias directory, sorted newest-first by mtime for
    /// locality (teacher convention: `load_sessions_from_files`).
    fn jsonl_files(&self, alias: &str) -> Vec<PathBuf> {
        let dir = self.paths.project_dir(alias);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut files: Vec<(PathBuf, std::time::SystemTime)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    return None;
                }
                let mtime = entry.metadata().ok()?.modified().ok()?;
                Some((path, mtime))
            })
            .collect();
        files.sort_by(|a, b| b.1.cmp(&a.1));
        files.into_iter().map(|(p, _)| p).collect()
    }

    /// `listSessions`: merge per-`sessionId` summaries across every log
    /// file (first writer wins on duplicate summary overrides — files are
    /// already visited newest-first), sort by descending `lastActivity`,
    /// then paginate.
    pub fn list_sessions(
        &self,
        alias: &str,
        limit: usize,
        offset: usize,
    ) -> Result<SessionListResult, SessionError> {
        let summaries = self.scan_summaries(alias)?;
        let total = summaries.len();
        let mut sorted = summaries;
        sorted.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        let sessions: Vec<SessionSummaryDto> =
            sorted.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + sessions.len() < total;
        Ok(SessionListResult {
            sessions,
            total,
            has_more,
        })
    }

    /// Convenience used by the Project Registry to populate
    /// `Project.session_count` without a second full parse.
    pub fn count_sessions(&self, alias: &str) -> Result<usize, SessionError> {
        Ok(self.scan_summaries(alias)?.len())
    }

    fn scan_summaries(&self, alias: &str) -> Result<Vec<SessionSummaryDto>, SessionError> {
        let mut acc: HashMap<String, Accumulator> = HashMap::new();

        for file in self.jsonl_files(alias) {
            let content = match std::fs::read_to_string(&file) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        event = "core.session.log_read_failed",
                        file = %file.display(),
                        error = %e,
                    );
                    continue;
                }
            };
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let parsed: RawLine = match serde_json::from_str(line) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(
                            event = "core.session.log_line_malformed",
                            file = %file.display(),
                            error = %e,
                        );
                        continue;
                    }
                };
                let entry = acc.entry(parsed.session_id.clone()).or_default();

                if let Some(cwd) = &parsed.cwd {
                    entry.cwd = Some(cwd.clone());
                }

                if let Some(ts) = &parsed.timestamp
                    && entry.last_activity.as_deref().unwrap_or("") < ts.as_str()
                {
                    entry.last_activity = Some(ts.clone());
                }

                if parsed.line_type.as_deref() == Some("summary")
                    && entry.summary_override.is_none()
                    && let Some(summary) = parsed.summary
                {
                    entry.summary_override = Some(summary);
                }

                if let Some(message) = &parsed.message {
                    let qualifies = matches!(
                        message.role,
                        MessageRole::User | MessageRole::Assistant
                    );
                    if qualifies {
                        entry.message_count += 1;
                    }
                    if message.role == MessageRole::User {
                        let text = extract_text(&message.content);
                        if !text.starts_with(COMMAND_PREFIX) {
                            let ts = parsed.timestamp.clone().unwrap_or_default();
                            let is_earlier = entry
                                .candidate_timestamp
                                .as_deref()
                                .map(|existing| ts.as_str() < existing)
                                .unwrap_or(true);
                            if is_earlier {
                                entry.candidate_text = Some(text);
                                entry.candidate_timestamp = Some(ts);
                            }
                        }
                    }
                }
            }
        }

        Ok(acc
            .into_iter()
            .map(|(id, entry)| {
                let summary = entry.summary_override.unwrap_or_else(|| {
                    entry
                        .candidate_text
                        .map(|t| truncate(&t, MAX_SUMMARY_CHARS))
                        .unwrap_or_default()
                });
                SessionSummaryDto {
                    id,
                    summary,
                    last_activity: entry.last_activity.unwrap_or_default(),
                    message_count: entry.message_count,
                    cwd: entry.cwd,
                }
            })
            .collect())
    }

    /// `getMessages`: chronological (ascending `timestamp`) slice of every
    /// message-bearing line for one session across all log files.
    pub fn get_messages(
        &self,
        alias: &str,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<GetMessagesResult, SessionError> {
        let mut messages = Vec::new();
        for file in self.jsonl_files(alias) {
            let content = std::fs::read_to_string(&file).unwrap_or_default();
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<RawLine>(line) else {
                    continue;
                };
                if parsed.session_id != session_id || parsed.message.is_none() {
                    continue;
                }
                messages.push(gateway_protocol::types::SessionMessageDto {
                    session_id: parsed.session_id,
                    timestamp: parsed.timestamp,
                    cwd: parsed.cwd,
                    message: parsed.message,
                });
            }
        }
        messages.sort_by(|a, b| {
            a.timestamp
                .as_deref()
                .unwrap_or("")
                .cmp(b.timestamp.as_deref().unwrap_or(""))
        });

        let Some(limit) = limit else {
            return Ok(GetMessagesResult::All(messages));
        };

        let total = messages.len();
        let end = total.saturating_sub(offset);
        let start = end.saturating_sub(limit);
        let has_more = start > 0;
        Ok(GetMessagesResult::Page {
            messages: messages[start..end].to_vec(),
            total,
            has_more,
        })
    }

    /// `deleteSession`: for every `.jsonl` containing any line with
    /// `sessionId`, rewrite the file with those lines filtered out.
    /// Malformed lines are preserved verbatim (we only ever inspect the
    /// `sessionId` field via a loose [`Value`] parse, never the full
    /// typed struct, so a line we can't fully parse still survives).
    pub fn delete_session(&self, alias: &str, session_id: &str) -> Result<(), SessionError> {
        let mut touched = false;
        for file in self.jsonl_files(alias) {
            let content = std::fs::read_to_string(&file)?;
            let had_trailing_newline = content.ends_with('\n');
            let mut matched_any = false;
            let kept: Vec<&str> = content
                .lines()
                .filter(|line| {
                    if line.trim().is_empty() {
                        return true;
                    }
                    let is_match = serde_json::from_str::<Value>(line)
                        .ok()
                        .and_then(|v| v.get("sessionId").and_then(|s| s.as_str()).map(String::from))
                        .is_some_and(|id| id == session_id);
                    if is_match {
                        matched_any = true;
                    }
                    !is_match
                })
                .collect();

            if !matched_any {
                continue;
            }
            touched = true;

            let mut body = kept.join("\n");
            if !body.is_empty() && had_trailing_newline {
                body.push('\n');
            }
            write_atomic(&file, body.as_bytes())?;
        }

        if !touched {
            return Err(SessionError::NotFound {
                alias: alias.to_string(),
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Resolves the real working directory for an alias by scanning every
    /// log's `cwd` field (Project Registry selection rule, spec.md §4.2,
    /// §8 property 2). Returns `None` if no log carries a `cwd`.
    pub fn resolve_cwd(&self, alias: &str) -> Option<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut latest_timestamp = String::new();
        let mut latest_cwd: Option<String> = None;

        for file in self.jsonl_files(alias) {
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<RawLine>(line) else {
                    continue;
                };
                let Some(cwd) = parsed.cwd else { continue };
                *counts.entry(cwd.clone()).or_insert(0) += 1;

                let ts = parsed.timestamp.unwrap_or_default();
                if ts >= latest_timestamp {
                    latest_timestamp = ts;
                    latest_cwd = Some(cwd);
                }
            }
        }

        if counts.is_empty() {
            return None;
        }

        let most_frequent = counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(cwd, _)| cwd.clone())
            .expect("counts is non-empty");

        if let Some(latest) = latest_cwd
            && latest != most_frequent
        {
            let latest_count = counts[&latest] as f64;
            let most_frequent_count = counts[&most_frequent] as f64;
            if latest_count >= 0.3 * most_frequent_count {
                return Some(latest);
            }
        }

        Some(most_frequent)
    }
}

fn extract_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(s) => s.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .find_map(|part| match part {
                gateway_protocol::types::ContentPart::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
