//! Shared output formatting for trellis CLI commands.

use serde::Serialize;

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: &str = "trellis.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            summary: Vec::new(),
            details: Vec::new(),
            warnings: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }

    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    next_steps: Vec<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let payload = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data: Some(data),
            error: None,
            warnings: human.map(|h| h.warnings.clone()).unwrap_or_default(),
            next_steps: human.map(|h| h.next_steps.clone()).unwrap_or_default(),
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
    let next_steps = error_next_steps(err);
    if json {
        let message = err.to_string();
        let payload: Envelope<'_, ()> = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            data: None,
            error: Some(ErrorBody {
                message: &message,
                code: err.exit_code(),
                kind: err.kind(),
                details: err.details(),
            }),
            warnings: Vec::new(),
            next_steps,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

pub fn format_human(output: &HumanOutput) -> String {
    let mut lines = Vec::new();
    lines.push(output.header.clone());

    push_summary(&mut lines, &output.summary);
    push_section(&mut lines, "Details", &output.details);
    push_section(&mut lines, "Warnings", &output.warnings);
    push_section(&mut lines, "Next steps", &output.next_steps);

    lines.join("\n")
}

/// Best-effort `command subcommand` name for error envelopes emitted before
/// clap has produced a parsed command.
pub fn infer_command_name_from_args() -> String {
    command_name_from(std::env::args().skip(1))
}

fn command_name_from(args: impl IntoIterator<Item = String>) -> String {
    let mut skip_value = false;
    let mut positional = Vec::new();

    for arg in args {
        if skip_value {
            skip_value = false;
            continue;
        }
        if matches!(arg.as_str(), "--dir" | "--actor" | "--events") {
            skip_value = true;
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        positional.push(arg);
        if positional.len() == 2 {
            break;
        }
    }

    match positional.as_slice() {
        [] => "trellis".to_string(),
        [command] => command.clone(),
        [command, sub, ..] if has_subcommands(command) => format!("{command} {sub}"),
        [command, ..] => command.clone(),
    }
}

fn has_subcommands(command: &str) -> bool {
    matches!(
        command,
        "project" | "phase" | "task" | "bug" | "note" | "update" | "actor"
    )
}

fn error_next_steps(err: &Error) -> Vec<String> {
    match err {
        Error::NotInitialized(_) => vec!["trellis init".to_string()],
        Error::InvalidConfig(_) => vec!["fix .trellis.toml then retry".to_string()],
        Error::VersionConflict { current, .. } => {
            vec![format!("re-read the record and retry with --expected-version {current}")]
        }
        Error::InvalidTransition { .. } => {
            vec!["allowed: todo -> in_progress -> done; any open state -> blocked".to_string()]
        }
        Error::LockFailed(_) => vec!["retry once the other trellis process finishes".to_string()],
        _ => Vec::new(),
    }
}

fn push_summary(lines: &mut Vec<String>, summary: &[(String, String)]) {
    if summary.is_empty() {
        return;
    }

    lines.push(String::new());
    lines.push("Summary:".to_string());
    for (key, value) in summary {
        if value.is_empty() {
            lines.push(format!("- {key}"));
        } else {
            lines.push(format!("- {key}: {value}"));
        }
    }
}

fn push_section(lines: &mut Vec<String>, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }

    lines.push(String::new());
    lines.push(format!("{title}:"));
    for item in items {
        lines.push(format!("- {item}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_human_skips_empty_sections() {
        let mut output = HumanOutput::new("trellis task create");
        output.push_summary("id", "t-01");
        output.push_summary("phase", "");
        output.push_next_step("trellis task show t-01");

        let rendered = format_human(&output);
        assert_eq!(
            rendered,
            "trellis task create\n\nSummary:\n- id: t-01\n- phase\n\nNext steps:\n- trellis task show t-01"
        );
    }

    #[test]
    fn version_conflict_suggests_current_version() {
        let steps = error_next_steps(&Error::VersionConflict {
            expected: 1,
            current: 3,
        });
        assert_eq!(steps, vec!["re-read the record and retry with --expected-version 3".to_string()]);
    }

    #[test]
    fn command_name_keeps_subcommands_only_where_they_exist() {
        let name = |args: &[&str]| command_name_from(args.iter().map(|a| a.to_string()));
        assert_eq!(name(&["--dir", "/tmp/x", "note", "create", "prj"]), "note create");
        assert_eq!(name(&["update", "post", "default", "hi"]), "update post");
        assert_eq!(name(&["status", "platform", "--rollup"]), "status");
        assert_eq!(name(&["--json"]), "trellis");
    }
}
