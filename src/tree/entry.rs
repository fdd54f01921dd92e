use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::Serialize;

use crate::parser::Traceback;

/// Severity bitmask used for log levels, scope statuses and tree filtering.
///
/// A plain success is folded into `INFO` when matched against a filter mask,
/// so "show info" also shows passing scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusLevel(pub u8);

impl StatusLevel {
    pub const UNSET: StatusLevel = StatusLevel(0);
    pub const DEBUG: StatusLevel = StatusLevel(1);
    pub const INFO: StatusLevel = StatusLevel(2);
    pub const WARN: StatusLevel = StatusLevel(4);
    pub const ERROR: StatusLevel = StatusLevel(8);
    pub const SUCCESS: StatusLevel = StatusLevel(16);
    /// All filterable levels (success participates via the info fold).
    pub const ALL: StatusLevel = StatusLevel(1 | 2 | 4 | 8);

    pub fn is_unset(self) -> bool {
        self.0 == 0
    }

    pub fn intersects(self, other: StatusLevel) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains_all(self, other: StatusLevel) -> bool {
        self.0 & other.0 == other.0
    }

    /// Map an end-scope status string ("PASS", "ERROR", ...) to a level.
    pub fn from_status(status: &str) -> StatusLevel {
        match status {
            "ERROR" | "FAIL" => StatusLevel::ERROR,
            "WARN" => StatusLevel::WARN,
            "INFO" => StatusLevel::INFO,
            "PASS" => StatusLevel::SUCCESS,
            _ => StatusLevel::UNSET,
        }
    }

    /// Map a log level letter (`L` message) to a level.
    pub fn from_log_level(level: &str) -> StatusLevel {
        match level {
            "E" | "F" => StatusLevel::ERROR,
            "W" => StatusLevel::WARN,
            "I" => StatusLevel::INFO,
            "D" => StatusLevel::DEBUG,
            _ => StatusLevel::UNSET,
        }
    }

    /// Lowercase label of the most severe bit set.
    pub fn label(self) -> &'static str {
        if self.intersects(StatusLevel::ERROR) {
            "error"
        } else if self.intersects(StatusLevel::WARN) {
            "warn"
        } else if self.intersects(StatusLevel::SUCCESS) {
            "pass"
        } else if self.intersects(StatusLevel::INFO) {
            "info"
        } else if self.intersects(StatusLevel::DEBUG) {
            "debug"
        } else {
            ""
        }
    }
}

impl BitOr for StatusLevel {
    type Output = StatusLevel;
    fn bitor(self, rhs: StatusLevel) -> StatusLevel {
        StatusLevel(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusLevel {
    fn bitor_assign(&mut self, rhs: StatusLevel) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StatusLevel {
    type Output = StatusLevel;
    fn bitand(self, rhs: StatusLevel) -> StatusLevel {
        StatusLevel(self.0 & rhs.0)
    }
}

/// Kind of a console message (`C`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleKind {
    Unset,
    /// User output redirected from stdout.
    Stdout,
    /// User output redirected from stderr.
    Stderr,
    Regular,
    Important,
    TaskName,
    Error,
    Traceback,
}

impl ConsoleKind {
    pub fn from_wire(kind: &str) -> ConsoleKind {
        match kind {
            "stdout" => ConsoleKind::Stdout,
            "stderr" => ConsoleKind::Stderr,
            "regular" => ConsoleKind::Regular,
            "important" => ConsoleKind::Important,
            "task_name" => ConsoleKind::TaskName,
            "error" => ConsoleKind::Error,
            "traceback" => ConsoleKind::Traceback,
            _ => ConsoleKind::Unset,
        }
    }
}

/// One named argument attached to an element (`EA`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Argument {
    pub name: String,
    pub var_type: String,
    pub value: String,
}

/// Fields shared by the method-like entries (methods, generators, yields,
/// if/else, loop control, asserts).
#[derive(Debug, Clone, Serialize)]
pub struct ScopeDetails {
    pub name: String,
    pub libname: String,
    pub status: StatusLevel,
    pub start_delta: f64,
    pub end_delta: f64,
    pub arguments: Vec<Argument>,
}

/// Variant payload of a tree entry.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryData {
    Task {
        name: String,
        libname: String,
        status: StatusLevel,
        start_delta: f64,
        end_delta: f64,
    },
    Method(ScopeDetails),
    Generator(ScopeDetails),
    UntrackedGenerator(ScopeDetails),
    ResumeYield(ScopeDetails),
    ResumeYieldFrom(ScopeDetails),
    SuspendYield {
        #[serde(flatten)]
        details: ScopeDetails,
        value: String,
        var_type: String,
    },
    SuspendYieldFrom(ScopeDetails),
    If(ScopeDetails),
    Else(ScopeDetails),
    AssertFailed(ScopeDetails),
    Continue(ScopeDetails),
    Break(ScopeDetails),
    Return {
        name: String,
        libname: String,
        value: String,
        var_type: String,
    },
    Variable {
        name: String,
        value: String,
        var_type: String,
    },
    Log {
        level: StatusLevel,
        message: String,
        is_html: bool,
    },
    Console {
        #[serde(rename = "console_kind")]
        kind: ConsoleKind,
        message: String,
    },
    Exception {
        exc_type: String,
        exc_msg: String,
        traceback: Traceback,
    },
    ThreadDump {
        thread_name: String,
        thread_details: String,
        traceback: Traceback,
    },
    ProcessSnapshot {
        start_delta: f64,
        end_delta: f64,
    },
}

impl EntryData {
    pub fn scope_details(&self) -> Option<&ScopeDetails> {
        use EntryData::*;
        match self {
            Method(d) | Generator(d) | UntrackedGenerator(d) | ResumeYield(d)
            | ResumeYieldFrom(d) | SuspendYieldFrom(d) | If(d) | Else(d) | AssertFailed(d)
            | Continue(d) | Break(d) => Some(d),
            SuspendYield { details, .. } => Some(details),
            _ => None,
        }
    }

    pub fn scope_details_mut(&mut self) -> Option<&mut ScopeDetails> {
        use EntryData::*;
        match self {
            Method(d) | Generator(d) | UntrackedGenerator(d) | ResumeYield(d)
            | ResumeYieldFrom(d) | SuspendYieldFrom(d) | If(d) | Else(d) | AssertFailed(d)
            | Continue(d) | Break(d) => Some(d),
            SuspendYield { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Whether an `EE`/`YS`/`YFS` close may match this entry on the stack.
    pub fn is_method_like_scope(&self) -> bool {
        matches!(
            self,
            EntryData::Method(_)
                | EntryData::Generator(_)
                | EntryData::ResumeYield(_)
                | EntryData::ResumeYieldFrom(_)
        )
    }

    /// Generator-flavored scopes get an implicit PASS when suspended without
    /// an explicit status.
    pub fn is_generator_like(&self) -> bool {
        matches!(
            self,
            EntryData::Generator(_) | EntryData::ResumeYield(_) | EntryData::ResumeYieldFrom(_)
        )
    }

    /// Short uppercase tag used by the viewer's kind column.
    pub fn kind_label(&self) -> &'static str {
        use EntryData::*;
        match self {
            Task { .. } => "TASK",
            Method(_) => "METHOD",
            Generator(_) => "GENERATOR",
            UntrackedGenerator(_) => "GENERATOR",
            ResumeYield(_) | ResumeYieldFrom(_) => "RESUME",
            SuspendYield { .. } | SuspendYieldFrom(_) => "SUSPEND",
            If(_) | Else(_) => "BRANCH",
            AssertFailed(_) => "ASSERT",
            Continue(_) => "CONTINUE",
            Break(_) => "BREAK",
            Return { .. } => "RETURN",
            Variable { .. } => "ASSIGN",
            Log { .. } => "LOG",
            Console { .. } => "CONSOLE",
            Exception { .. } => "EXCEPTION",
            ThreadDump { .. } => "THREADS",
            ProcessSnapshot { .. } => "SNAPSHOT",
        }
    }
}

/// One node of the flattened tree.
///
/// Entries live in an append-only arena; `entry_index` is the stable index
/// into it, so scope closes can update an entry in place while consumers keep
/// referring to it by index.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: String,
    pub source: String,
    pub lineno: i64,
    pub entry_index: usize,
    #[serde(flatten)]
    pub data: EntryData,
}

impl Entry {
    /// Level used by the tree filter; unset means "always visible".
    pub fn status_level(&self) -> StatusLevel {
        match &self.data {
            EntryData::Task { status, .. } => *status,
            EntryData::Log { level, .. } => *level,
            EntryData::Exception { .. } => StatusLevel::ERROR,
            other => match other.scope_details() {
                Some(details) => details.status,
                None => StatusLevel::UNSET,
            },
        }
    }

    /// Title shown for the entry (and matched first by search).
    pub fn title(&self) -> String {
        use EntryData::*;
        match &self.data {
            Task { name, .. } => name.clone(),
            ProcessSnapshot { .. } => String::new(),
            ThreadDump { thread_name, .. } => format!("Thread Stack: {}", thread_name),
            Generator(d) => format!("{} (enter generator)", d.name),
            UntrackedGenerator(d) => format!("{} (generator lifecycle untracked)", d.name),
            ResumeYield(d) | ResumeYieldFrom(d) => format!("{} (resume generator)", d.name),
            SuspendYield { details, .. } => format!("{} (suspend generator)", details.name),
            SuspendYieldFrom(d) => format!("{} (suspend generator)", d.name),
            Method(d) | AssertFailed(d) | Continue(d) | Break(d) => d.name.clone(),
            If(d) | Else(d) => format!("Entered \"{}\"", d.name),
            Return { .. } => "Return".to_string(),
            Variable { name, .. } => name.clone(),
            // Log/console/exception rows lead with their value instead.
            Log { .. } | Console { .. } | Exception { .. } => String::new(),
        }
    }

    /// Rendered value of the entry (matched by search when the title is not).
    ///
    /// HTML-flagged log entries can't be meaningfully matched or displayed as
    /// text, so they render as their level label only.
    pub fn value_text(&self) -> String {
        use EntryData::*;
        match &self.data {
            Task { .. } | ProcessSnapshot { .. } => String::new(),
            Exception { exc_msg, .. } => exc_msg.clone(),
            ThreadDump { thread_details, .. } => replace_newlines(thread_details),
            Log {
                level,
                message,
                is_html,
            } => {
                if *is_html {
                    level.label().to_string()
                } else {
                    message.clone()
                }
            }
            Console { message, .. } => message.clone(),
            Variable {
                value, var_type, ..
            } => replace_newlines(&format!("{} ({})", value, var_type)),
            Return {
                value, var_type, ..
            } => replace_newlines(&format!("{} ({})", value, var_type)),
            SuspendYield {
                value, var_type, ..
            } => replace_newlines(&format!("Yielded: {} ({})", value, var_type)),
            SuspendYieldFrom(_) => String::new(),
            other => match other.scope_details() {
                Some(details) => format_arguments(&details.arguments),
                None => String::new(),
            },
        }
    }

    /// `libname.name` when a library qualifier is present.
    pub fn qualified_name(&self) -> String {
        let (name, libname) = match &self.data {
            EntryData::Task { name, libname, .. } => (name.as_str(), libname.as_str()),
            other => match other.scope_details() {
                Some(details) => (details.name.as_str(), details.libname.as_str()),
                None => return self.title(),
            },
        };
        if libname.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", libname, name)
        }
    }
}

/// Depth of an entry id: number of `-` separated path segments below root.
pub fn entry_depth(id: &str) -> usize {
    id.bytes().filter(|b| *b == b'-').count()
}

/// The direct parent prefix of an id, if it has one.
pub fn parent_id(id: &str) -> Option<&str> {
    id.rsplit_once('-').map(|(parent, _)| parent)
}

/// All ancestor ids of an entry, nearest parent first.
pub fn parent_ids(id: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut current = id;
    while let Some(parent) = parent_id(current) {
        ids.push(parent.to_string());
        current = parent;
    }
    ids
}

/// Entries assigned a `hide(n)` sequence never take part in the tree.
pub fn is_hidden_id(id: &str) -> bool {
    id.contains("hide(")
}

pub fn format_arguments(arguments: &[Argument]) -> String {
    arguments
        .iter()
        .map(|arg| format!("{}={}", arg.name, arg.value))
        .collect::<Vec<_>>()
        .join(", ")
}

fn replace_newlines(text: &str) -> String {
    text.replace('\r', "").replace('\n', "\\n")
}
