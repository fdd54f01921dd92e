use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use serde::Serialize;

use crate::parser::{
    LogParser, Message, MessageType, ParseError, SUPPORTED_VERSION, Traceback, TracebackAssembler,
    compare_versions,
};

use super::entry::{Argument, ConsoleKind, Entry, EntryData, ScopeDetails, StatusLevel};

/// Issues generation tokens so that selecting a new run invalidates any
/// builder still draining a previous one. There is no real parallelism; the
/// only hazard is interleaved restarts, and a superseded builder simply stops
/// making progress.
#[derive(Debug, Default)]
pub struct SessionManager {
    current: Rc<Cell<u64>>,
    last_issued: Cell<u64>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> Lease {
        let id = self.last_issued.get() + 1;
        self.last_issued.set(id);
        self.current.set(id);
        Lease {
            id,
            current: Rc::clone(&self.current),
        }
    }
}

/// Generation token handed to a `TreeBuilder` at construction.
#[derive(Debug, Clone)]
pub struct Lease {
    id: u64,
    current: Rc<Cell<u64>>,
}

impl Lease {
    pub fn is_current(&self) -> bool {
        self.current.get() == self.id
    }
}

/// Sibling-sequence counter for one parent scope.
#[derive(Debug, Default)]
struct TreeCounter {
    count: u64,
    count_not_in_tree: u64,
}

impl TreeCounter {
    fn next(&mut self) -> String {
        let value = self.count;
        self.count += 1;
        value.to_string()
    }

    fn next_not_in_tree(&mut self) -> String {
        let value = self.count_not_in_tree;
        self.count_not_in_tree += 1;
        format!("hide({})", value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Unset,
    Pass,
    Error,
}

/// Metadata about the run being viewed, updated as messages stream in.
#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub version: String,
    /// The log declares a format version newer than this build understands.
    /// Decoding still proceeds best-effort.
    pub version_too_new: bool,
    pub description: String,
    pub time: String,
    pub status: RunStatus,
    pub finish_time_delta: Option<f64>,
    pub first_part: i64,
    pub last_part: i64,
    pub info_messages: BTreeSet<String>,
}

impl Default for RunInfo {
    fn default() -> Self {
        Self {
            version: String::new(),
            version_too_new: false,
            description: "Waiting for run to start ...".to_string(),
            time: String::new(),
            status: RunStatus::Unset,
            finish_time_delta: None,
            first_part: -1,
            last_part: -1,
            info_messages: BTreeSet::new(),
        }
    }
}

/// Console entries only take part in the tree when they carry actual user
/// output; framework chatter stays out (it remains addressable through the
/// entry arena for other views).
fn accept_console_entry_in_tree(kind: ConsoleKind, message: &str) -> bool {
    matches!(kind, ConsoleKind::Stdout | ConsoleKind::Stderr) && !message.trim().is_empty()
}

/// The append-only entry arena plus the scope bookkeeping used to build it.
#[derive(Debug)]
pub struct FlattenedTree {
    pub entries: Vec<Entry>,
    pub id_to_index: HashMap<String, usize>,
    /// Arena indices of the currently-open scopes, innermost last.
    stack: Vec<usize>,
    /// One sibling counter per open scope, plus the root counter.
    stack_counters: Vec<TreeCounter>,
    parent_id: String,
    /// Where `EA` argument messages attach; not always the stack top because
    /// some argument-carrying entries do not open a scope.
    args_target: Option<usize>,
    /// Ids the viewer should auto-expand (scopes that ended with an error).
    pub new_expanded: Vec<String>,
}

impl Default for FlattenedTree {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            id_to_index: HashMap::new(),
            stack: Vec::new(),
            stack_counters: vec![TreeCounter::default()],
            parent_id: String::new(),
            args_target: None,
            new_expanded: Vec::new(),
        }
    }
}

impl FlattenedTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scopes still open.
    pub fn open_scopes(&self) -> usize {
        self.stack.len()
    }

    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    fn new_scope_id(&mut self, add_to_stack: bool, in_tree: bool) -> String {
        let counter = self
            .stack_counters
            .last_mut()
            .expect("the root counter is never popped");
        let seq = if in_tree {
            counter.next()
        } else {
            counter.next_not_in_tree()
        };
        let new_id = if self.parent_id.is_empty() {
            format!("root{}", seq)
        } else {
            format!("{}-{}", self.parent_id, seq)
        };
        if add_to_stack {
            self.parent_id = new_id.clone();
            self.stack_counters.push(TreeCounter::default());
        }
        new_id
    }

    fn push_entry(&mut self, id: String, source: String, lineno: i64, data: EntryData) -> usize {
        let entry_index = self.entries.len();
        self.id_to_index.insert(id.clone(), entry_index);
        self.entries.push(Entry {
            id,
            source,
            lineno,
            entry_index,
            data,
        });
        entry_index
    }

    fn location_parts(msg: &Message) -> (String, String, String, i64) {
        match msg.decoded.location() {
            Some(loc) => (
                loc.name.clone(),
                loc.libname.clone(),
                loc.source.clone(),
                loc.lineno,
            ),
            None => (String::new(), String::new(), String::new(), -1),
        }
    }

    fn scope_details(msg: &Message, status: StatusLevel) -> (String, i64, ScopeDetails) {
        let (name, libname, source, lineno) = Self::location_parts(msg);
        (
            source,
            lineno,
            ScopeDetails {
                name,
                libname,
                status,
                start_delta: msg.decoded.time_delta(),
                end_delta: -1.0,
                arguments: Vec::new(),
            },
        )
    }

    fn push_task_scope(&mut self, msg: &Message) {
        let (name, libname, source, lineno) = Self::location_parts(msg);
        let id = self.new_scope_id(true, true);
        let index = self.push_entry(
            id,
            source,
            lineno,
            EntryData::Task {
                name,
                libname,
                status: StatusLevel::UNSET,
                start_delta: msg.decoded.time_delta(),
                end_delta: -1.0,
            },
        );
        self.stack.push(index);
    }

    fn push_method_scope(&mut self, msg: &Message, is_generator: bool) {
        let (source, lineno, details) = Self::scope_details(msg, StatusLevel::UNSET);
        let id = self.new_scope_id(true, true);
        let data = if is_generator {
            EntryData::Generator(details)
        } else {
            EntryData::Method(details)
        };
        let index = self.push_entry(id, source, lineno, data);
        self.stack.push(index);
        self.args_target = Some(index);
    }

    fn push_resume_scope(&mut self, msg: &Message, yield_from: bool) {
        let (source, lineno, details) = Self::scope_details(msg, StatusLevel::UNSET);
        let id = self.new_scope_id(true, true);
        let data = if yield_from {
            EntryData::ResumeYieldFrom(details)
        } else {
            EntryData::ResumeYield(details)
        };
        let index = self.push_entry(id, source, lineno, data);
        self.stack.push(index);
        self.args_target = Some(index);
    }

    /// Elements that carry a location and arguments but never open a scope
    /// (untracked generators, unscoped if/else, continue/break, failed
    /// asserts).
    fn push_unscoped_element(&mut self, msg: &Message, element_type: &str) {
        let status = if element_type == "ASSERT_FAILED" {
            StatusLevel::ERROR
        } else {
            // It never gets an end message, so it can't stay unset.
            StatusLevel::INFO
        };
        let (source, lineno, details) = Self::scope_details(msg, status);
        let data = match element_type {
            "UNTRACKED_GENERATOR" => EntryData::UntrackedGenerator(details),
            "IF" => EntryData::If(details),
            "ELSE" => EntryData::Else(details),
            "CONTINUE" => EntryData::Continue(details),
            "BREAK" => EntryData::Break(details),
            _ => EntryData::AssertFailed(details),
        };
        let id = self.new_scope_id(false, true);
        let index = self.push_entry(id, source, lineno, data);
        self.args_target = Some(index);
    }

    fn push_yield_suspend(&mut self, msg: &Message, yield_from: bool) {
        let (source, lineno, details) = Self::scope_details(msg, StatusLevel::INFO);
        let data = if yield_from {
            EntryData::SuspendYieldFrom(details)
        } else {
            EntryData::SuspendYield {
                details,
                value: msg.decoded.str_field("value").unwrap_or_default().to_string(),
                var_type: msg.decoded.str_field("type").unwrap_or_default().to_string(),
            }
        };
        let id = self.new_scope_id(false, true);
        let index = self.push_entry(id, source, lineno, data);
        self.args_target = Some(index);
    }

    fn push_log(&mut self, msg: &Message, is_html: bool) {
        let level = StatusLevel::from_log_level(msg.decoded.str_field("level").unwrap_or(""));
        let (_, _, source, lineno) = Self::location_parts(msg);
        let id = self.new_scope_id(false, true);
        self.push_entry(
            id,
            source,
            lineno,
            EntryData::Log {
                level,
                message: msg.decoded.str_field("message").unwrap_or_default().to_string(),
                is_html,
            },
        );
    }

    fn push_synthetic_log(&mut self, level: StatusLevel, message: String) {
        let id = self.new_scope_id(false, true);
        self.push_entry(
            id,
            String::new(),
            -1,
            EntryData::Log {
                level,
                message,
                is_html: false,
            },
        );
    }

    fn push_console(&mut self, msg: &Message) {
        let kind = ConsoleKind::from_wire(msg.decoded.str_field("kind").unwrap_or(""));
        let message = msg.decoded.str_field("message").unwrap_or_default().to_string();
        let in_tree = accept_console_entry_in_tree(kind, &message);
        let id = self.new_scope_id(false, in_tree);
        self.push_entry(
            id,
            String::new(),
            -1,
            EntryData::Console { kind, message },
        );
    }

    fn push_assign(&mut self, msg: &Message) {
        let (_, _, source, lineno) = Self::location_parts(msg);
        let id = self.new_scope_id(false, true);
        self.push_entry(
            id,
            source,
            lineno,
            EntryData::Variable {
                name: msg.decoded.str_field("target").unwrap_or_default().to_string(),
                value: msg.decoded.str_field("value").unwrap_or_default().to_string(),
                var_type: msg.decoded.str_field("type").unwrap_or_default().to_string(),
            },
        );
    }

    fn push_return(&mut self, msg: &Message) {
        let (name, libname, source, lineno) = Self::location_parts(msg);
        let id = self.new_scope_id(false, true);
        self.push_entry(
            id,
            source,
            lineno,
            EntryData::Return {
                name,
                libname,
                value: msg.decoded.str_field("value").unwrap_or_default().to_string(),
                var_type: msg.decoded.str_field("type").unwrap_or_default().to_string(),
            },
        );
    }

    fn push_exception(&mut self, tb: Traceback) {
        let (source, lineno) = match tb.stack.first() {
            Some(frame) => (frame.source.clone(), frame.lineno),
            None => (String::new(), -1),
        };
        let (exc_type, exc_msg) = match tb.exception_msg.split_once(':') {
            Some((exc_type, exc_msg)) => (exc_type.to_string(), exc_msg.trim().to_string()),
            None => ("Error".to_string(), tb.exception_msg.clone()),
        };
        let id = self.new_scope_id(false, true);
        self.push_entry(
            id,
            source,
            lineno,
            EntryData::Exception {
                exc_type,
                exc_msg,
                traceback: tb,
            },
        );
    }

    fn push_thread_dump(&mut self, tb: Traceback) {
        let (source, lineno) = match tb.stack.first() {
            Some(frame) => (frame.source.clone(), frame.lineno),
            None => (String::new(), -1),
        };
        let (thread_name, thread_details) = match tb.exception_msg.split_once('|') {
            Some((name, details)) => (name.to_string(), details.trim().to_string()),
            None => ("<unknown thread name>".to_string(), tb.exception_msg.clone()),
        };
        let id = self.new_scope_id(false, true);
        self.push_entry(
            id,
            source,
            lineno,
            EntryData::ThreadDump {
                thread_name,
                thread_details,
                traceback: tb,
            },
        );
    }

    fn push_process_snapshot_scope(&mut self, msg: &Message) {
        let id = self.new_scope_id(true, true);
        let index = self.push_entry(
            id,
            String::new(),
            -1,
            EntryData::ProcessSnapshot {
                start_delta: msg.decoded.time_delta(),
                end_delta: -1.0,
            },
        );
        self.stack.push(index);
    }

    fn add_arguments(&mut self, msg: &Message) {
        let Some(index) = self.args_target else {
            return;
        };
        let argument = Argument {
            name: msg.decoded.str_field("name").unwrap_or_default().to_string(),
            var_type: msg.decoded.str_field("type").unwrap_or_default().to_string(),
            value: msg.decoded.str_field("value").unwrap_or_default().to_string(),
        };
        match self.entries[index].data.scope_details_mut() {
            Some(details) => details.arguments.push(argument),
            None => log::warn!(
                "argument message targets an entry without arguments: {}",
                msg.raw
            ),
        }
    }

    /// Pop the matching scope off the stack, searching past (and logging)
    /// any non-matching frames left by unbalanced messages.
    fn pop_scope(
        &mut self,
        msg: &Message,
        accept: impl Fn(&EntryData) -> bool,
    ) -> Option<usize> {
        loop {
            let Some(index) = self.stack.pop() else {
                log::warn!("no open scope matches end message: {}", msg.raw);
                return None;
            };
            if self.stack_counters.len() > 1 {
                // The root counter must survive even when there are more
                // endings than starts.
                self.stack_counters.pop();
            }
            if accept(&self.entries[index].data) {
                self.parent_id = match self.stack.last() {
                    Some(&parent) => self.entries[parent].id.clone(),
                    None => String::new(),
                };
                return Some(index);
            }
            log::warn!(
                "skipping open scope {} while handling end message: {}",
                self.entries[index].id,
                msg.raw
            );
        }
    }

    /// Update status/end time in the arena slot of a closed scope.
    fn update_entry_status(&mut self, index: usize, status: &str, end_delta: f64) {
        let level = StatusLevel::from_status(status);
        match &mut self.entries[index].data {
            EntryData::Task {
                status: task_status,
                end_delta: task_end,
                ..
            } => {
                *task_status = level;
                *task_end = end_delta;
            }
            other => {
                if let Some(details) = other.scope_details_mut() {
                    details.status = level;
                    details.end_delta = end_delta;
                }
            }
        }
        if level.intersects(StatusLevel::ERROR) {
            self.new_expanded.push(self.entries[index].id.clone());
        }
    }

    fn pop_method_scope(&mut self, msg: &Message) {
        let Some(index) = self.pop_scope(msg, EntryData::is_method_like_scope) else {
            return;
        };
        let status = match msg.decoded.str_field("status") {
            Some(status) => status.to_string(),
            None => {
                if self.entries[index].data.is_generator_like() {
                    "PASS".to_string()
                } else {
                    return;
                }
            }
        };
        self.update_entry_status(index, &status, msg.decoded.time_delta());
    }

    /// Returns whether the closed task ended with an error.
    fn pop_task_scope(&mut self, msg: &Message) -> Option<bool> {
        let index = self.pop_scope(msg, |data| matches!(data, EntryData::Task { .. }))?;
        let status = msg.decoded.str_field("status").unwrap_or("").to_string();
        self.update_entry_status(index, &status, msg.decoded.time_delta());
        Some(self.entries[index].status_level().intersects(StatusLevel::ERROR))
    }

    fn pop_process_snapshot_scope(&mut self, msg: &Message) {
        let Some(index) =
            self.pop_scope(msg, |data| matches!(data, EntryData::ProcessSnapshot { .. }))
        else {
            return;
        };
        if let EntryData::ProcessSnapshot { end_delta, .. } = &mut self.entries[index].data {
            *end_delta = msg.decoded.time_delta();
        }
    }
}

/// Builds the flattened tree from decoded messages, in strict arrival order.
///
/// `add_initial_contents` processes the full historical buffer;
/// `append_contents` + `on_appended_contents` drain newly streamed chunks
/// exactly once each, tracked by a cursor. All steps check the lease so that
/// a builder superseded by a newer run selection silently stops.
pub struct TreeBuilder {
    run_id: Option<String>,
    lease: Lease,
    parser: LogParser,
    tb_assembler: TracebackAssembler,
    pub flattened: FlattenedTree,
    pub run_info: RunInfo,
    seen_regular_scope: bool,
    suite_errored: bool,
    finished_initial: bool,
    appended: Vec<String>,
    appended_index: usize,
}

impl TreeBuilder {
    pub fn new(run_id: Option<String>, lease: Lease) -> Self {
        Self {
            run_id,
            lease,
            parser: LogParser::new(),
            tb_assembler: TracebackAssembler::new(),
            flattened: FlattenedTree::new(),
            run_info: RunInfo::default(),
            seen_regular_scope: false,
            suite_errored: false,
            finished_initial: false,
            appended: Vec::new(),
            appended_index: 0,
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn is_current(&self) -> bool {
        self.lease.is_current()
    }

    /// Per-line decode errors collected so far.
    pub fn errors(&self) -> &[(usize, ParseError)] {
        &self.parser.errors
    }

    /// Ids of scopes that ended with an error since the last call; the
    /// viewer force-expands them.
    pub fn take_new_expanded(&mut self) -> Vec<String> {
        std::mem::take(&mut self.flattened.new_expanded)
    }

    /// Process the full historical buffer, then drain anything that was
    /// appended while it was being handled.
    pub fn add_initial_contents(&mut self, text: &str) {
        for msg in self.parser.parse_block(text) {
            if !self.lease.is_current() {
                return;
            }
            self.process_message(msg);
        }
        self.finished_initial = true;
        self.on_appended_contents();
    }

    /// Host-bridge push of a newly streamed chunk.
    pub fn append_contents(&mut self, chunk: String) {
        self.appended.push(chunk);
    }

    /// Drain appended chunks. The cursor makes repeated invocations process
    /// each chunk exactly once, in order.
    pub fn on_appended_contents(&mut self) {
        if !self.finished_initial || !self.lease.is_current() {
            return;
        }
        while self.appended_index < self.appended.len() {
            let chunk = self.appended[self.appended_index].clone();
            self.appended_index += 1;
            for msg in self.parser.parse_block(&chunk) {
                if !self.lease.is_current() {
                    return;
                }
                self.process_message(msg);
            }
        }
    }

    fn process_message(&mut self, mut msg: Message) {
        if msg.message_type.opens_regular_context() {
            self.seen_regular_scope = true;
        }
        if let Some(target) = msg.message_type.replay_target() {
            if self.seen_regular_scope {
                // Replays re-sync state across rotation boundaries; once a
                // regular scope was seen they would only duplicate it.
                log::debug!("suppressing replayed message: {}", msg.raw);
                return;
            }
            msg.message_type = target;
        }
        self.dispatch(&msg);
    }

    fn dispatch(&mut self, msg: &Message) {
        use MessageType::*;
        match msg.message_type {
            Version => self.append_version(msg),
            Info => self.append_info(msg),
            RunId => self.update_run_id(msg),
            InitialTime => {
                self.run_info.time = msg.decoded.str_field("time").unwrap_or_default().to_string();
            }
            StartRun => {
                self.run_info.description =
                    msg.decoded.str_field("name").unwrap_or_default().to_string();
            }
            EndRun => {
                self.run_info.status = if self.suite_errored {
                    RunStatus::Error
                } else {
                    RunStatus::Pass
                };
                self.run_info.finish_time_delta = Some(msg.decoded.time_delta());
            }
            StartTask => self.flattened.push_task_scope(msg),
            EndTask => {
                if let Some(errored) = self.flattened.pop_task_scope(msg) {
                    self.suite_errored |= errored;
                }
            }
            StartElement => {
                let element_type = msg.decoded.str_field("type").unwrap_or("").to_string();
                match element_type.as_str() {
                    "UNTRACKED_GENERATOR" | "IF" | "ELSE" | "CONTINUE" | "BREAK"
                    | "ASSERT_FAILED" => self.flattened.push_unscoped_element(msg, &element_type),
                    // METHOD, GENERATOR, IF_SCOPE, ELSE_SCOPE, FOR, FOR_STEP,
                    // WHILE, WHILE_STEP
                    _ => self
                        .flattened
                        .push_method_scope(msg, element_type == "GENERATOR"),
                }
            }
            EndElement => {
                if msg.decoded.str_field("type") == Some("UNTRACKED_GENERATOR") {
                    // Untracked generators never opened a scope.
                } else {
                    self.flattened.pop_method_scope(msg);
                }
            }
            YieldResume => self.flattened.push_resume_scope(msg, false),
            YieldFromResume => self.flattened.push_resume_scope(msg, true),
            YieldSuspend => {
                self.flattened.push_yield_suspend(msg, false);
                self.flattened.pop_method_scope(msg);
            }
            YieldFromSuspend => {
                self.flattened.push_yield_suspend(msg, true);
                self.flattened.pop_method_scope(msg);
            }
            Return => self.flattened.push_return(msg),
            Assign => self.flattened.push_assign(msg),
            ElementArgument => self.flattened.add_arguments(msg),
            ScopeTime => {
                // The start time always arrives on the scope-opening message
                // in practice; accepted and ignored.
            }
            Log => self.flattened.push_log(msg, false),
            LogHtml => self.flattened.push_log(msg, true),
            Console => self.flattened.push_console(msg),
            StartTraceback | StartThreadDump | TracebackEntry | TracebackVariable => {
                self.tb_assembler.handle(msg);
            }
            EndTraceback => {
                if let Some(tb) = self.tb_assembler.handle(msg) {
                    if !tb.stack.is_empty() {
                        self.flattened.push_exception(tb);
                    }
                }
            }
            EndThreadDump => {
                if let Some(tb) = self.tb_assembler.handle(msg) {
                    if !tb.stack.is_empty() {
                        self.flattened.push_thread_dump(tb);
                    }
                }
            }
            StartProcessSnapshot => self.flattened.push_process_snapshot_scope(msg),
            EndProcessSnapshot => self.flattened.pop_process_snapshot_scope(msg),
            // The decoder never emits these: memorizations only mutate
            // decoder state, and replays were translated or suppressed above.
            Memorize | MemorizePath | RestartRun | RestartTask | RestartElement
            | RestartTraceback | RestartYieldResume | RestartYieldFromResume
            | RestartProcessSnapshot | RestartThreadDump => {}
        }
    }

    fn append_version(&mut self, msg: &Message) {
        let version = msg.decoded.str_field("version").unwrap_or("").to_string();
        if compare_versions(&version, SUPPORTED_VERSION) == std::cmp::Ordering::Greater {
            // Backward compatible, not forward compatible: load what we can
            // and let the viewer warn.
            log::warn!(
                "log format version {} is newer than the supported {}",
                version,
                SUPPORTED_VERSION
            );
            self.run_info.version_too_new = true;
        }
        self.run_info.version = version;
    }

    fn append_info(&mut self, msg: &Message) {
        let Some(info) = msg.decoded.json_field("info") else {
            return;
        };
        let rendered = match info {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.run_info.info_messages.insert(rendered);
    }

    fn update_run_id(&mut self, msg: &Message) {
        let part = msg.decoded.int_field("part").unwrap_or(-1);
        if self.run_info.first_part == -1 {
            self.run_info.first_part = part;
            if part > 1 {
                self.flattened.push_synthetic_log(
                    StatusLevel::WARN,
                    format!(
                        "The contents shown do not include the start of the run: \
                         everything prior to part {} was rotated out.",
                        part
                    ),
                );
            }
        }
        self.run_info.last_part = part;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::entry::{entry_depth, parent_id};

    const CREATE_RUN_AND_TASK: &str = "
V 0.0.2
T 2023-04-30T13:35:49.798+00:00
ID 1|eb887eee-e75b-11ed-bdec-202b20a029af
I \"sys.platform=linux\"
M a:\"Robot1\"
SR a|0.016
M c:\"Simple Task\"
M d:\"Robot1\"
M e:\"/path/to/file.py\"
M f:\"\"
P b:c|d|e|f|0
ST b|0.016
";

    const FINISH_RUN_AND_TASK: &str = "
M g:\"PASS\"
M h:\"Ok\"
ET g|h|0.017
ER g|0.017
";

    const START_ELEMENT: &str = "
M h:\"screenshot\"
M i:\"tests._help_screenshot\"
M j:\"/path/to/_help_screenshot.py\"
P g:h|i|j|f|2
M k:\"METHOD\"
SE g|k|0.012
";

    const END_ELEMENT: &str = "
M r:\"PASS\"
EE k|r|0.016
";

    fn new_builder() -> TreeBuilder {
        TreeBuilder::new(Some("run1".to_string()), SessionManager::new().issue())
    }

    fn build_from(text: &str) -> TreeBuilder {
        let mut builder = new_builder();
        builder.add_initial_contents(text);
        builder
    }

    #[test]
    fn test_sample_decode_scenario() {
        let log = "V 0.0.2
M a:\"Robot1\"
SR a|0.016
M c:\"Simple Task\"
M d:\"Robot1\"
M e:\"/path/to/file.py\"
M f:\"\"
P b:c|d|e|f|0
ST b|0.016
M g:\"PASS\"
M h:\"Ok\"
ET g|h|0.017
ER g|0.017
";
        let builder = build_from(log);
        assert_eq!(builder.flattened.entries.len(), 1);
        assert_eq!(builder.flattened.open_scopes(), 0);

        let task = &builder.flattened.entries[0];
        assert!(matches!(task.data, EntryData::Task { .. }));
        assert_eq!(task.qualified_name(), "Robot1.Simple Task");
        assert_eq!(task.status_level(), StatusLevel::SUCCESS);
        assert_eq!(builder.run_info.status, RunStatus::Pass);
        assert_eq!(builder.run_info.finish_time_delta, Some(0.017));
    }

    #[test]
    fn test_incremental_append_with_cursor() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        assert_eq!(builder.flattened.entries.len(), 1);
        assert_eq!(builder.flattened.open_scopes(), 1);

        builder.append_contents(START_ELEMENT.to_string());
        builder.on_appended_contents();
        assert_eq!(builder.flattened.entries.len(), 2);
        assert_eq!(builder.flattened.open_scopes(), 2);

        builder.append_contents(END_ELEMENT.to_string());
        builder.append_contents(FINISH_RUN_AND_TASK.to_string());
        builder.on_appended_contents();
        // Draining again must not reprocess anything.
        builder.on_appended_contents();

        assert_eq!(builder.flattened.entries.len(), 2);
        assert_eq!(builder.flattened.open_scopes(), 0);

        let method = &builder.flattened.entries[1];
        assert_eq!(method.id, "root0-0");
        assert_eq!(method.title(), "screenshot");
        assert_eq!(method.status_level(), StatusLevel::SUCCESS);
    }

    #[test]
    fn test_scope_nesting_invariant() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        builder.append_contents(START_ELEMENT.to_string());
        builder.append_contents(START_ELEMENT.to_string());
        builder.append_contents(END_ELEMENT.to_string());
        builder.append_contents(END_ELEMENT.to_string());
        builder.append_contents(START_ELEMENT.to_string());
        builder.on_appended_contents();

        let entries = &builder.flattened.entries;
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].id, "root0-0");
        assert_eq!(entries[2].id, "root0-0-0");
        assert_eq!(entries[3].id, "root0-1");

        for entry in entries {
            if let Some(parent) = parent_id(&entry.id) {
                let parent_index = builder.flattened.id_to_index[parent];
                assert!(parent_index < entry.entry_index, "parent after child");
                assert_eq!(entry_depth(parent) + 1, entry_depth(&entry.id));
            }
        }
    }

    #[test]
    fn test_replay_suppressed_after_regular_scope() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        builder.append_contents("RT b|0.016\n".to_string());
        builder.on_appended_contents();

        // The replayed task start is idempotent re-sync, not duplication.
        assert_eq!(builder.flattened.entries.len(), 1);
        assert_eq!(builder.flattened.open_scopes(), 1);
    }

    #[test]
    fn test_replay_promoted_before_regular_scope() {
        let log = "
M c:\"Simple Task\"
M d:\"Robot1\"
M e:\"/path/to/file.py\"
M f:\"\"
P b:c|d|e|f|0
RT b|0.016
";
        let builder = build_from(log);
        // A session resumed mid-stream still gets its initial scope.
        assert_eq!(builder.flattened.entries.len(), 1);
        assert!(matches!(
            builder.flattened.entries[0].data,
            EntryData::Task { .. }
        ));
        assert_eq!(builder.flattened.open_scopes(), 1);
    }

    #[test]
    fn test_mismatched_close_recovers() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        builder.append_contents(START_ELEMENT.to_string());
        // End the task while the method is still open: the method frame is
        // discarded and the task is closed.
        builder.append_contents(FINISH_RUN_AND_TASK.to_string());
        builder.on_appended_contents();

        assert_eq!(builder.flattened.open_scopes(), 0);
        assert_eq!(
            builder.flattened.entries[0].status_level(),
            StatusLevel::SUCCESS
        );

        // A close with nothing open at all is a logged no-op.
        builder.append_contents(END_ELEMENT.to_string());
        builder.on_appended_contents();
        assert_eq!(builder.flattened.open_scopes(), 0);
    }

    #[test]
    fn test_superseded_lease_stops_builder() {
        let manager = SessionManager::new();
        let mut first = TreeBuilder::new(Some("run1".to_string()), manager.issue());
        first.add_initial_contents(CREATE_RUN_AND_TASK);
        assert_eq!(first.flattened.entries.len(), 1);

        let mut second = TreeBuilder::new(Some("run2".to_string()), manager.issue());
        assert!(!first.is_current());
        assert!(second.is_current());

        first.append_contents(START_ELEMENT.to_string());
        first.on_appended_contents();
        assert_eq!(first.flattened.entries.len(), 1, "stale builder mutated state");

        second.add_initial_contents(CREATE_RUN_AND_TASK);
        assert_eq!(second.flattened.entries.len(), 1);
    }

    #[test]
    fn test_arguments_attach_to_current_element() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        builder.append_contents(START_ELEMENT.to_string());
        builder.append_contents(
            "M an:\"path\"\nM at:\"str\"\nM av:\"'/tmp/out.png'\"\nEA an|at|av\n".to_string(),
        );
        builder.on_appended_contents();

        let method = &builder.flattened.entries[1];
        let details = method.data.scope_details().unwrap();
        assert_eq!(details.arguments.len(), 1);
        assert_eq!(details.arguments[0].name, "path");
        assert_eq!(method.value_text(), "path='/tmp/out.png'");
    }

    #[test]
    fn test_assign_and_return_are_leaves() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        builder.append_contents(
            "M t:\"x\"\nM ty:\"int\"\nM tv:\"42\"\nAS b|t|ty|tv|0.02\nR b|ty|tv|0.03\n"
                .to_string(),
        );
        builder.on_appended_contents();

        assert_eq!(builder.flattened.entries.len(), 3);
        // Leaves do not open scopes.
        assert_eq!(builder.flattened.open_scopes(), 1);
        assert_eq!(builder.flattened.entries[1].id, "root0-0");
        assert_eq!(builder.flattened.entries[2].id, "root0-1");
        assert!(matches!(
            builder.flattened.entries[1].data,
            EntryData::Variable { .. }
        ));
        assert_eq!(builder.flattened.entries[1].value_text(), "42 (int)");
    }

    #[test]
    fn test_exception_entry_from_traceback() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        builder.append_contents(
            "M x:\"ValueError: bad input\"
M s1:\"/app/inner.py\"
M m1:\"inner\"
M l1:\"raise ValueError('bad input')\"
M s2:\"/app/outer.py\"
M m2:\"outer\"
M l2:\"inner()\"
STB x|0.1
TBE s1|3|m1|l1
TBE s2|9|m2|l2
ETB 0.2
"
            .to_string(),
        );
        builder.on_appended_contents();

        let exc = &builder.flattened.entries[1];
        match &exc.data {
            EntryData::Exception {
                exc_type,
                exc_msg,
                traceback,
            } => {
                assert_eq!(exc_type, "ValueError");
                assert_eq!(exc_msg, "bad input");
                assert_eq!(traceback.stack[0].method, "outer");
            }
            other => panic!("expected exception entry, got {:?}", other),
        }
        // Source points at the outermost frame.
        assert_eq!(exc.source, "/app/outer.py");
        assert_eq!(exc.lineno, 9);
    }

    #[test]
    fn test_errored_task_is_marked_for_expansion() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        builder.append_contents(
            "M g:\"ERROR\"\nM h:\"failed\"\nET g|h|0.5\nER g|0.5\n".to_string(),
        );
        builder.on_appended_contents();

        assert_eq!(builder.take_new_expanded(), ["root0"]);
        assert!(builder.take_new_expanded().is_empty());
        assert_eq!(builder.run_info.status, RunStatus::Error);
    }

    #[test]
    fn test_console_suppression_assigns_hidden_ids() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        builder.append_contents(
            "M k1:\"stdout\"\nM m1:\"visible output\"\nC k1|m1|0.02
M k2:\"regular\"\nM m2:\"framework chatter\"\nC k2|m2|0.03
M k3:\"stdout\"\nM m3:\"  \"\nC k3|m3|0.04
"
            .to_string(),
        );
        builder.on_appended_contents();

        let ids: Vec<&str> = builder.flattened.entries[1..]
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, ["root0-0", "root0-hide(0)", "root0-hide(1)"]);
    }

    #[test]
    fn test_rotated_first_part_warns_in_tree() {
        let log = "
ID 3|eb887eee-e75b-11ed-bdec-202b20a029af
M a:\"Robot1\"
RR a|0.016
";
        let builder = build_from(log);
        assert_eq!(builder.run_info.first_part, 3);
        assert_eq!(builder.run_info.last_part, 3);
        let warning = &builder.flattened.entries[0];
        assert_eq!(warning.status_level(), StatusLevel::WARN);
        assert!(warning.value_text().contains("part 3"));
        // The replayed run start was still promoted.
        assert_eq!(builder.run_info.description, "Robot1");
    }

    #[test]
    fn test_version_too_new_is_flagged_not_fatal() {
        let builder = build_from("V 9.9.9\nM a:\"Robot1\"\nSR a|0.1\n");
        assert!(builder.run_info.version_too_new);
        assert_eq!(builder.run_info.version, "9.9.9");
        assert_eq!(builder.run_info.description, "Robot1");
    }

    #[test]
    fn test_yield_suspend_closes_generator_scope() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        builder.append_contents(
            "M h:\"gen\"\nM i:\"lib\"\nM j:\"/gen.py\"\nP g:h|i|j|f|5\nM k:\"GENERATOR\"\nSE g|k|0.02
M yv:\"7\"\nM yt:\"int\"\nYS g|yt|yv|0.03\n"
                .to_string(),
        );
        builder.on_appended_contents();

        // Task, generator scope, suspend marker.
        assert_eq!(builder.flattened.entries.len(), 3);
        assert_eq!(builder.flattened.open_scopes(), 1);

        let generator = &builder.flattened.entries[1];
        assert!(matches!(generator.data, EntryData::Generator(_)));
        // No explicit status on YS: generators close as passed.
        assert_eq!(generator.status_level(), StatusLevel::SUCCESS);

        let suspend = &builder.flattened.entries[2];
        assert_eq!(suspend.value_text(), "Yielded: 7 (int)");
        // The suspend marker is a child of the generator scope.
        assert_eq!(suspend.id, "root0-0-0");
    }

    #[test]
    fn test_thread_dump_and_snapshot() {
        let mut builder = new_builder();
        builder.add_initial_contents(CREATE_RUN_AND_TASK);
        builder.append_contents(
            "M pm:\"snapshot\"\nSPS pm|0.1
M tn:\"MainThread|alive, daemon=False\"
M s1:\"/app/t.py\"\nM m1:\"run\"\nM l1:\"loop()\"
STD tn|0.1
TBE s1|12|m1|l1
ETD 0.2
EPS 0.3
"
            .to_string(),
        );
        builder.on_appended_contents();

        assert_eq!(builder.flattened.open_scopes(), 1);
        let snapshot = &builder.flattened.entries[1];
        assert!(matches!(
            snapshot.data,
            EntryData::ProcessSnapshot { end_delta, .. } if end_delta == 0.3
        ));
        let dump = &builder.flattened.entries[2];
        match &dump.data {
            EntryData::ThreadDump {
                thread_name,
                thread_details,
                ..
            } => {
                assert_eq!(thread_name, "MainThread");
                assert_eq!(thread_details, "alive, daemon=False");
            }
            other => panic!("expected thread dump, got {:?}", other),
        }
        assert_eq!(dump.id, "root0-0-0");
    }
}
