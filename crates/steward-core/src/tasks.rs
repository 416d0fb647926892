//! Task-list import: turn a markdown or JSON task list into issue payloads.
//!
//! Parsing is lenient per entry. A malformed record is rejected on its own
//! and reported, the remaining records still go through.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StewardError};

/// Label applied to imported issues unless overridden.
pub const DEFAULT_TASK_LABEL: &str = "agent-task";

/// One task as read from the input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// An entry that could not be turned into a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRejection {
    /// Zero-based position in the input.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTasks {
    pub tasks: Vec<TaskRecord>,
    pub rejected: Vec<TaskRejection>,
}

/// Input file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFormat {
    Markdown,
    Json,
}

impl TaskFormat {
    /// Guess the format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "md" | "markdown" | "txt" => Some(Self::Markdown),
            _ => None,
        }
    }
}

fn heading_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*##+\s+(.+?)\s*$").ok())
        .as_ref()
}

/// Parse `## Title` headings; the lines up to the next heading form the body.
pub fn parse_markdown(text: &str) -> Result<ParsedTasks> {
    let re = heading_regex()
        .ok_or_else(|| StewardError::MalformedInput("heading pattern unavailable".into()))?;

    let mut tasks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    for line in text.lines() {
        if let Some(caps) = re.captures(line) {
            if let Some((title, body)) = current.take() {
                tasks.push(markdown_task(title, &body));
            }
            let title = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            current = Some((title.to_string(), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((title, body)) = current.take() {
        tasks.push(markdown_task(title, &body));
    }

    if tasks.is_empty() {
        return Err(StewardError::MalformedInput(
            "no tasks found in markdown; use '## Title' headings for each task".into(),
        ));
    }
    Ok(ParsedTasks {
        tasks,
        rejected: Vec::new(),
    })
}

fn markdown_task(title: String, body: &[&str]) -> TaskRecord {
    TaskRecord {
        title,
        body: body.join("\n").trim().to_string(),
        labels: Vec::new(),
    }
}

/// Parse a JSON list of tasks, or an object with a `tasks` list.
pub fn parse_json(text: &str) -> Result<ParsedTasks> {
    let data: Value = serde_json::from_str(text)?;
    let entries = match &data {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("tasks") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(StewardError::MalformedInput(
                    "expected a list or {\"tasks\": [...]}".into(),
                ))
            }
        },
        _ => {
            return Err(StewardError::MalformedInput(
                "expected a list or {\"tasks\": [...]}".into(),
            ))
        }
    };
    if entries.is_empty() {
        return Err(StewardError::MalformedInput(
            "no tasks found in JSON input".into(),
        ));
    }

    let mut parsed = ParsedTasks::default();
    for (index, entry) in entries.iter().enumerate() {
        match json_task(entry) {
            Ok(task) => parsed.tasks.push(task),
            Err(reason) => {
                tracing::warn!(index, %reason, "rejecting task entry");
                parsed.rejected.push(TaskRejection { index, reason });
            }
        }
    }
    Ok(parsed)
}

fn json_task(entry: &Value) -> std::result::Result<TaskRecord, String> {
    let obj = entry
        .as_object()
        .ok_or_else(|| "task must be a JSON object".to_string())?;
    let title = obj
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if title.is_empty() {
        return Err("task requires a non-empty 'title'".to_string());
    }
    let body = match obj.get("body") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(format!("task '{title}': 'body' must be a string")),
    };
    let labels = match obj.get("labels") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("task '{title}': labels must be strings"))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?,
        Some(_) => return Err(format!("task '{title}': 'labels' must be a list")),
    };
    Ok(TaskRecord {
        title: title.to_string(),
        body,
        labels,
    })
}

/// Read and parse a task file, picking the format from its extension and
/// falling back to JSON-then-markdown.
pub fn load_tasks(path: &Path) -> Result<ParsedTasks> {
    let text = std::fs::read_to_string(path)?;
    match TaskFormat::from_path(path) {
        Some(TaskFormat::Json) => parse_json(&text),
        Some(TaskFormat::Markdown) => parse_markdown(&text),
        None => parse_json(&text).or_else(|_| parse_markdown(&text)),
    }
}

/// Title key used for duplicate detection: trimmed, lowercased, inner
/// whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Defaults first, then task labels; trimmed, empty and repeated ones dropped.
pub fn normalize_labels(defaults: &[String], task_labels: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for label in defaults.iter().chain(task_labels) {
        let label = label.trim();
        if !label.is_empty() && !merged.iter().any(|m| m == label) {
            merged.push(label.to_string());
        }
    }
    merged
}

/// Body of an issue-creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePayload {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// What the importer will do with one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ImportDecision {
    Create(IssuePayload),
    /// An open issue already has this normalized title.
    SkipExisting { title: String, existing: String },
    /// An earlier entry of the same batch has this normalized title.
    SkipDuplicate { title: String },
}

impl ImportDecision {
    /// One-line human description.
    pub fn describe(&self, dry_run: bool) -> String {
        match self {
            Self::Create(payload) if dry_run => {
                format!("DRY-RUN: would create issue: {}", payload.title)
            }
            Self::Create(payload) => format!("create issue: {}", payload.title),
            Self::SkipExisting { title, existing } => {
                format!("skip '{title}': duplicate of open issue '{existing}'")
            }
            Self::SkipDuplicate { title } => {
                format!("skip '{title}': duplicate within this task list")
            }
        }
    }
}

/// Decide, per task, whether to create an issue or skip it as a duplicate.
///
/// `open_titles` are the titles of currently open issues.
pub fn plan_import(
    tasks: &[TaskRecord],
    open_titles: &[String],
    default_labels: &[String],
) -> Vec<ImportDecision> {
    let existing: Vec<(String, &String)> = open_titles
        .iter()
        .map(|t| (normalize_title(t), t))
        .collect();
    let mut seen: Vec<String> = Vec::new();

    tasks
        .iter()
        .map(|task| {
            let key = normalize_title(&task.title);
            if let Some((_, original)) = existing.iter().find(|(k, _)| *k == key) {
                return ImportDecision::SkipExisting {
                    title: task.title.clone(),
                    existing: (*original).clone(),
                };
            }
            if seen.contains(&key) {
                return ImportDecision::SkipDuplicate {
                    title: task.title.clone(),
                };
            }
            seen.push(key);
            ImportDecision::Create(IssuePayload {
                title: task.title.trim().to_string(),
                body: task.body.clone(),
                labels: normalize_labels(default_labels, &task.labels),
            })
        })
        .collect()
}
