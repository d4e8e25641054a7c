//! Policy persistence: the load/save contract and its file and in-memory backends.
//!
//! File format: one rule per line, comma-separated, first field the rule type
//! (`p`, `g`, `g2`, ...). Blank lines and lines starting with `#` are skipped.
//! A field may be double-quoted to carry commas; `""` inside quotes is a quote.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::authz::errors::AuthzError;

/// One stored rule: its type discriminator and its values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLine {
    pub ptype: String,
    pub values: Vec<String>,
}

impl PolicyLine {
    pub fn new<S: Into<String>>(ptype: &str, values: impl IntoIterator<Item = S>) -> Self {
        Self {
            ptype: ptype.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Backing store for policy rules.
pub trait Adapter: Send + Sync {
    fn load_policy(&self) -> Result<Vec<PolicyLine>, AuthzError>;
    fn save_policy(&self, lines: &[PolicyLine]) -> Result<(), AuthzError>;
}

/// Reads and writes the comma-separated policy file format.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Adapter for FileAdapter {
    fn load_policy(&self) -> Result<Vec<PolicyLine>, AuthzError> {
        let contents =
            std::fs::read_to_string(&self.path).map_err(|source| AuthzError::PolicyLoadError {
                path: self.path.display().to_string(),
                source,
            })?;
        parse_policy_text(&contents)
    }

    fn save_policy(&self, lines: &[PolicyLine]) -> Result<(), AuthzError> {
        std::fs::write(&self.path, format_policy_text(lines)).map_err(|source| {
            AuthzError::PolicySaveError {
                path: self.path.display().to_string(),
                source,
            }
        })
    }
}

/// Keeps lines in memory. Useful for tests and for embedding without a file.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    lines: Mutex<Vec<PolicyLine>>,
}

impl MemoryAdapter {
    pub fn new(lines: Vec<PolicyLine>) -> Self {
        Self {
            lines: Mutex::new(lines),
        }
    }

    pub fn lines(&self) -> Vec<PolicyLine> {
        self.lines.lock().clone()
    }
}

impl Adapter for MemoryAdapter {
    fn load_policy(&self) -> Result<Vec<PolicyLine>, AuthzError> {
        Ok(self.lines.lock().clone())
    }

    fn save_policy(&self, lines: &[PolicyLine]) -> Result<(), AuthzError> {
        *self.lines.lock() = lines.to_vec();
        Ok(())
    }
}

/// Parse policy file contents into lines.
pub fn parse_policy_text(text: &str) -> Result<Vec<PolicyLine>, AuthzError> {
    let mut lines = Vec::new();
    for (number, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut fields = split_fields(trimmed).map_err(|msg| {
            AuthzError::InvalidRule(format!("line {}: {msg}", number + 1))
        })?;
        let ptype = fields.remove(0);
        if ptype.is_empty() || fields.is_empty() {
            return Err(AuthzError::InvalidRule(format!(
                "line {}: expected `<type>, <value>, ...`",
                number + 1
            )));
        }
        lines.push(PolicyLine {
            ptype,
            values: fields,
        });
    }
    Ok(lines)
}

/// Render lines in the file format, quoting values that need it.
pub fn format_policy_text(lines: &[PolicyLine]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.ptype);
        for value in &line.values {
            out.push_str(", ");
            if value.contains([',', '"']) || value.trim() != value {
                let _ = write!(out, "\"{}\"", value.replace('"', "\"\""));
            } else {
                out.push_str(value);
            }
        }
        out.push('\n');
    }
    out
}

fn split_fields(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => return Err("unterminated quoted field".into()),
                }
            }
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            match chars.next() {
                None => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some(',') => fields.push(field),
                Some(c) => return Err(format!("unexpected `{c}` after quoted field")),
            }
        } else {
            loop {
                match chars.next() {
                    Some(',') => break,
                    Some(c) => field.push(c),
                    None => {
                        fields.push(field.trim_end().to_string());
                        return Ok(fields);
                    }
                }
            }
            fields.push(field.trim_end().to_string());
        }
    }
}
