//! Workload files.
//!
//! One operation per line:
//!
//! ```text
//! # comment
//! name,OPEN
//! name,WRITE,pos,size,data
//! name,READ,pos,size,data
//! name,CLOSE
//! EOF
//! ```
//!
//! For READ the data is what the read must return. `data` is exactly `size`
//! bytes and cannot contain commas. Blank lines and `#` lines are skipped.

use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Workload parse failures.
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("failed to read workload: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("workload has no EOF marker")]
    MissingEof,
}

/// One workload operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadOp {
    Open { name: String },
    Close { name: String },
    Write { name: String, pos: usize, data: Vec<u8> },
    Read { name: String, pos: usize, data: Vec<u8> },
    Eof,
}

impl WorkloadOp {
    /// Object the operation applies to (None for EOF).
    pub fn name(&self) -> Option<&str> {
        match self {
            WorkloadOp::Open { name }
            | WorkloadOp::Close { name }
            | WorkloadOp::Write { name, .. }
            | WorkloadOp::Read { name, .. } => Some(name),
            WorkloadOp::Eof => None,
        }
    }
}

impl fmt::Display for WorkloadOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadOp::Open { name } => write!(f, "{name},OPEN"),
            WorkloadOp::Close { name } => write!(f, "{name},CLOSE"),
            WorkloadOp::Write { name, pos, data } => write!(
                f,
                "{name},WRITE,{pos},{},{}",
                data.len(),
                String::from_utf8_lossy(data)
            ),
            WorkloadOp::Read { name, pos, data } => write!(
                f,
                "{name},READ,{pos},{},{}",
                data.len(),
                String::from_utf8_lossy(data)
            ),
            WorkloadOp::Eof => f.write_str("EOF"),
        }
    }
}

/// Read and parse a workload file.
pub fn load(path: &Path) -> Result<Vec<WorkloadOp>, WorkloadError> {
    parse(&std::fs::read_to_string(path)?)
}

/// Parse workload text. Everything after `EOF` is ignored.
pub fn parse(text: &str) -> Result<Vec<WorkloadOp>, WorkloadError> {
    let mut ops = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let op = parse_line(line).map_err(|reason| WorkloadError::Parse {
            line: idx + 1,
            reason,
        })?;
        let done = op == WorkloadOp::Eof;
        ops.push(op);
        if done {
            return Ok(ops);
        }
    }

    Err(WorkloadError::MissingEof)
}

/// Render operations back into workload text.
pub fn render(ops: &[WorkloadOp]) -> String {
    let mut text = String::new();
    for op in ops {
        text.push_str(&op.to_string());
        text.push('\n');
    }
    text
}

fn parse_line(line: &str) -> Result<WorkloadOp, String> {
    if line.trim() == "EOF" {
        return Ok(WorkloadOp::Eof);
    }

    let fields: Vec<&str> = line.split(',').collect();
    let name = fields[0].trim();
    if name.is_empty() {
        return Err("missing object name".to_string());
    }
    let name = name.to_string();
    let verb = fields.get(1).map(|verb| verb.trim()).unwrap_or_default();

    match (verb, fields.len()) {
        ("OPEN", 2) => Ok(WorkloadOp::Open { name }),
        ("CLOSE", 2) => Ok(WorkloadOp::Close { name }),
        ("WRITE", 5) | ("READ", 5) => {
            let pos = parse_number(fields[2], "position")?;
            let size = parse_number(fields[3], "size")?;
            let data = fields[4].as_bytes().to_vec();
            if data.len() != size {
                return Err(format!(
                    "size {size} does not match {} data bytes",
                    data.len()
                ));
            }
            if verb == "WRITE" {
                Ok(WorkloadOp::Write { name, pos, data })
            } else {
                Ok(WorkloadOp::Read { name, pos, data })
            }
        }
        ("OPEN", _) | ("CLOSE", _) | ("WRITE", _) | ("READ", _) => {
            Err(format!("wrong number of fields for {verb}"))
        }
        ("", _) => Err("missing operation".to_string()),
        (other, _) => Err(format!("unknown operation {other:?}")),
    }
}

fn parse_number(field: &str, what: &str) -> Result<usize, String> {
    field
        .trim()
        .parse()
        .map_err(|_| format!("invalid {what} {field:?}"))
}
