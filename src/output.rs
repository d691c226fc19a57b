//! Shared output formatting for tasknote CLI commands.

use serde::Serialize;

use crate::error::{Error, JsonError, Result};

pub const SCHEMA_VERSION: &str = "tasknote.v1";

/// Global `--json` / `--quiet` switches, shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Plain-text result of one command.
///
/// Renders as a title line, then `key: value` fields aligned on the longest
/// key, then one indented row per listed task or note. Warnings and hints
/// follow; both also ride along in the `--json` envelope.
///
/// ```text
/// Task 3f2c...
///   Version  01J...
///   Title    Ship release
///   Done
///
///   - 01J... 2024-06-01T00:00:00Z
/// warning: task has no notes
/// hint: tasknote watch --once
/// ```
#[derive(Debug, Clone)]
pub struct HumanOutput {
    title: String,
    fields: Vec<(String, String)>,
    rows: Vec<String>,
    warnings: Vec<String>,
    hints: Vec<String>,
}

impl HumanOutput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: Vec::new(),
            rows: Vec::new(),
            warnings: Vec::new(),
            hints: Vec::new(),
        }
    }

    /// An empty `value` renders the key alone, as a flag.
    pub fn field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// One listed record.
    pub fn row(&mut self, line: impl Into<String>) {
        self.rows.push(line.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// A command worth running next.
    pub fn hint(&mut self, command: impl Into<String>) {
        self.hints.push(command.into());
    }
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let warnings = human.map(|h| h.warnings.clone()).unwrap_or_default();
        let hints = human.map(|h| h.hints.clone()).unwrap_or_default();

        #[derive(Serialize)]
        struct Envelope<'a, T: Serialize> {
            schema_version: &'static str,
            command: &'a str,
            status: &'static str,
            data: &'a T,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            warnings: Vec<String>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            hints: Vec<String>,
        }

        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data,
            warnings,
            hints,
        };

        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if options.quiet {
        return Ok(());
    }

    if let Some(human) = human {
        println!("{}", format_human(human));
    }

    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let hints = error_hints(err);
    if json {
        #[derive(Serialize)]
        struct ErrorBody {
            #[serde(flatten)]
            error: JsonError,
            kind: &'static str,
        }

        #[derive(Serialize)]
        struct Envelope<'a> {
            schema_version: &'static str,
            command: &'a str,
            status: &'static str,
            error: ErrorBody,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            hints: Vec<String>,
        }

        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            error: ErrorBody {
                error: JsonError::from(err),
                kind: error_kind(err),
            },
            hints,
        };

        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    eprintln!("error: {err}");
    if let Some(hint) = hints.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

pub fn format_human(output: &HumanOutput) -> String {
    let mut lines = vec![output.title.clone()];

    let width = output.fields.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    for (key, value) in &output.fields {
        if value.is_empty() {
            lines.push(format!("  {key}"));
        } else {
            lines.push(format!("  {key:<width$}  {value}"));
        }
    }

    if !output.rows.is_empty() {
        if !output.fields.is_empty() {
            lines.push(String::new());
        }
        lines.extend(output.rows.iter().map(|row| format!("  - {row}")));
    }

    lines.extend(output.warnings.iter().map(|warning| format!("warning: {warning}")));
    lines.extend(output.hints.iter().map(|hint| format!("hint: {hint}")));
    lines.join("\n")
}

/// Best-effort `"<command> <subcommand>"` for error envelopes, read before
/// clap has parsed anything.
pub fn infer_command_name_from_args() -> String {
    let mut args = std::env::args().skip(1).filter(|arg| !arg.starts_with('-'));

    let command = match args.next() {
        Some(cmd) => cmd,
        None => return "tasknote".to_string(),
    };

    if matches!(command.as_str(), "task" | "note") {
        if let Some(sub) = args.next() {
            return format!("{command} {sub}");
        }
    }
    command
}

fn error_kind(err: &Error) -> &'static str {
    match err.exit_code() {
        2 => "user_error",
        3 => "integrity_refused",
        _ => "operation_failed",
    }
}

fn error_hints(err: &Error) -> Vec<String> {
    match err {
        Error::TaskNotFound(_) => vec!["tasknote task list".to_string()],
        Error::NoteNotFound(_) => vec!["tasknote note list <task-id>".to_string()],
        Error::ChainIntegrity(_) => {
            vec!["delete a continuous run ending at the newest note".to_string()]
        }
        Error::InvalidConfig(_) => vec!["fix .tasknote.toml then retry".to_string()],
        Error::LockFailed(_) => vec!["retry once the other writer finishes".to_string()],
        _ => Vec::new(),
    }
}
