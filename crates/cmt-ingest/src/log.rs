//! Transaction log parsing.
//!
//! Ledger logs are flat lines, but program invocations nest:
//!
//! ```text
//! Program <id> invoke [1]
//! Program log: Instruction: Mint
//! Program <id2> invoke [2]
//! Program data: <hex payload>
//! Program <id2> success
//! Program <id> consumed 5000 of 200000 compute units
//! Program <id> success
//! ```
//!
//! [`parse_transaction_log`] rebuilds that nesting as a tree of
//! [`ProgramFrame`]s in one pass.

use std::str::FromStr;

use cmt_types::AccountId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LogParseError;

const LOG_PREFIX: &str = "Program log: ";
const DATA_PREFIX: &str = "Program data: ";
const PROGRAM_PREFIX: &str = "Program ";

/// Deepest invoke nesting accepted; the ledger runtime stops far sooner.
pub const MAX_INVOKE_DEPTH: u32 = 64;

/// How a program frame ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameOutcome {
    Success,
    Failed(String),
}

/// One item inside a program frame, in log order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    /// `Program log: <msg>`
    Log(String),
    /// `Program data: <payload>`, payload text kept verbatim.
    Data(String),
    /// A nested invocation.
    Invoke(ProgramFrame),
    /// Anything else, including compute-unit accounting.
    Plain(String),
}

/// One program invocation and everything it logged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramFrame {
    /// Program id as written in the log.
    pub program: String,
    /// Call depth, 1 for top-level instructions.
    pub depth: u32,
    pub entries: Vec<LogEntry>,
    pub outcome: FrameOutcome,
}

impl ProgramFrame {
    pub fn program_id(&self) -> Option<AccountId> {
        AccountId::from_str(&self.program).ok()
    }

    pub fn is_success(&self) -> bool {
        self.outcome == FrameOutcome::Success
    }

    /// Messages logged directly by this frame.
    pub fn logs(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| match entry {
            LogEntry::Log(msg) => Some(msg.as_str()),
            _ => None,
        })
    }

    /// Name from the frame's first `Instruction: <Name>` log.
    pub fn instruction_name(&self) -> Option<&str> {
        self.logs()
            .find_map(|msg| msg.strip_prefix("Instruction: "))
            .map(str::trim)
    }

    pub fn children(&self) -> impl Iterator<Item = &ProgramFrame> {
        self.entries.iter().filter_map(|entry| match entry {
            LogEntry::Invoke(frame) => Some(frame),
            _ => None,
        })
    }

    /// Data payloads from this frame and every nested frame, in log order.
    pub fn data_payloads(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_data(&mut out);
        out
    }

    fn collect_data<'a>(&'a self, out: &mut Vec<&'a str>) {
        for entry in &self.entries {
            match entry {
                LogEntry::Data(payload) => out.push(payload.as_str()),
                LogEntry::Invoke(child) => child.collect_data(out),
                _ => {}
            }
        }
    }
}

enum Line<'a> {
    Invoke { program: &'a str, depth: u32 },
    Success { program: &'a str },
    Failed { program: &'a str, reason: &'a str },
    Log(&'a str),
    Data(&'a str),
    Plain(&'a str),
}

fn classify(text: &str, line: usize) -> Result<Line<'_>, LogParseError> {
    if let Some(msg) = text.strip_prefix(LOG_PREFIX) {
        return Ok(Line::Log(msg));
    }
    if let Some(payload) = text.strip_prefix(DATA_PREFIX) {
        return Ok(Line::Data(payload.trim()));
    }
    let Some((program, tail)) = text
        .strip_prefix(PROGRAM_PREFIX)
        .and_then(|rest| rest.split_once(' '))
    else {
        return Ok(Line::Plain(text));
    };

    if let Some(depth) = tail.strip_prefix("invoke [") {
        let depth = depth
            .strip_suffix(']')
            .and_then(|d| d.parse::<u32>().ok())
            .ok_or_else(|| LogParseError::Malformed {
                line,
                text: text.to_string(),
            })?;
        return Ok(Line::Invoke { program, depth });
    }
    if tail == "success" {
        return Ok(Line::Success { program });
    }
    if let Some(reason) = tail.strip_prefix("failed") {
        let reason = reason.strip_prefix(':').unwrap_or(reason).trim();
        return Ok(Line::Failed { program, reason });
    }
    Ok(Line::Plain(text))
}

struct Parser<'a, S> {
    lines: &'a [S],
    pos: usize,
}

impl<'a, S: AsRef<str>> Parser<'a, S> {
    fn next(&mut self) -> Option<(usize, &'a str)> {
        let line = self.lines.get(self.pos)?;
        let at = self.pos;
        self.pos += 1;
        Some((at, line.as_ref()))
    }

    /// Consume lines until the frame opened for `program` closes.
    fn frame(&mut self, program: &str, depth: u32) -> Result<ProgramFrame, LogParseError> {
        let mut entries = Vec::new();
        loop {
            let Some((line, text)) = self.next() else {
                return Err(LogParseError::Unclosed {
                    program: program.to_string(),
                    depth,
                });
            };
            let outcome = match classify(text, line)? {
                Line::Invoke {
                    program: child,
                    depth: child_depth,
                } => {
                    if child_depth > MAX_INVOKE_DEPTH {
                        return Err(LogParseError::TooDeep {
                            line,
                            depth: child_depth,
                            max: MAX_INVOKE_DEPTH,
                        });
                    }
                    if child_depth != depth + 1 {
                        return Err(LogParseError::DepthMismatch {
                            line,
                            expected: depth + 1,
                            found: child_depth,
                        });
                    }
                    entries.push(LogEntry::Invoke(self.frame(child, child_depth)?));
                    continue;
                }
                Line::Success { program: closing } => {
                    check_close(line, program, closing)?;
                    FrameOutcome::Success
                }
                Line::Failed {
                    program: closing,
                    reason,
                } => {
                    check_close(line, program, closing)?;
                    FrameOutcome::Failed(reason.to_string())
                }
                Line::Log(msg) => {
                    entries.push(LogEntry::Log(msg.to_string()));
                    continue;
                }
                Line::Data(payload) => {
                    entries.push(LogEntry::Data(payload.to_string()));
                    continue;
                }
                Line::Plain(text) => {
                    entries.push(LogEntry::Plain(text.to_string()));
                    continue;
                }
            };
            return Ok(ProgramFrame {
                program: program.to_string(),
                depth,
                entries,
                outcome,
            });
        }
    }
}

fn check_close(line: usize, expected: &str, found: &str) -> Result<(), LogParseError> {
    if expected == found {
        Ok(())
    } else {
        Err(LogParseError::MismatchedClose {
            line,
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }
}

/// Parse ordered log lines into top-level program frames.
///
/// Lines outside any frame are skipped. Any imbalance between invoke and
/// success/failed markers is an error; frames are never dropped silently.
pub fn parse_transaction_log<S: AsRef<str>>(lines: &[S]) -> Result<Vec<ProgramFrame>, LogParseError> {
    let mut parser = Parser { lines, pos: 0 };
    let mut frames = Vec::new();
    while let Some((line, text)) = parser.next() {
        match classify(text, line)? {
            Line::Invoke { program, depth } => {
                if depth != 1 {
                    return Err(LogParseError::DepthMismatch {
                        line,
                        expected: 1,
                        found: depth,
                    });
                }
                frames.push(parser.frame(program, depth)?);
            }
            Line::Success { program } | Line::Failed { program, .. } => {
                return Err(LogParseError::UnexpectedClose {
                    line,
                    program: program.to_string(),
                });
            }
            Line::Log(_) | Line::Data(_) | Line::Plain(_) => {
                debug!(line, text, "log line outside any program frame");
            }
        }
    }
    Ok(frames)
}
