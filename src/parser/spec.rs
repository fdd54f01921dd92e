use std::collections::HashMap;
use std::sync::OnceLock;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, space0},
};

/// Decode rule for a single payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    /// Resolve against the values memorized with `M`.
    Oid,
    Int,
    Float,
    Str,
    /// The whole payload is a JSON document.
    Json,
    /// ISO8601 timestamp, rendered in the local timezone.
    DateIso,
    /// Resolve against the locations memorized with `P`.
    LocId,
    /// Same as `LocId` but also unpacks the docstring.
    LocAndDocId,
}

impl DecodeKind {
    fn from_spec(name: &str) -> Self {
        match name {
            "oid" => DecodeKind::Oid,
            "int" => DecodeKind::Int,
            "float" => DecodeKind::Float,
            "str" => DecodeKind::Str,
            "json.loads" => DecodeKind::Json,
            "dateisoformat" => DecodeKind::DateIso,
            "loc_id" => DecodeKind::LocId,
            "loc_and_doc_id" => DecodeKind::LocAndDocId,
            other => panic!("unexpected decode kind in message spec: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: DecodeKind,
}

/// How the payload of one message type is decoded.
#[derive(Debug, Clone)]
pub enum MessageSpec {
    /// `id:jsonvalue` memorization (`M`).
    Memorize,
    /// `id:name|libname|source|doc|lineno` location memorization (`P`).
    MemorizePath,
    /// Ordered `|`-separated fields; splitting is bounded to the declared
    /// field count so a trailing field may contain `|`.
    Fields(Vec<FieldSpec>),
}

/// Wire format of the log: one message per line, `TYPE payload`.
///
/// `oid` fields reference a value memorized with `M`; `loc_id` and
/// `loc_and_doc_id` reference a location memorized with `P`. `X=Y` lines are
/// aliases: the payload decodes with Y's field spec while the message keeps
/// tag X. Each rotated log part is readable on its own: the replayed (`R*`)
/// variants re-emit the open scopes at the start of a new part.
const MESSAGE_SPEC: &str = "
# Format version of the log being read.
V: version:str

# Free-form information (platform, interpreter version).
I: info:json.loads

# Run identifier; the log may be split into multiple rotated parts.
ID: part:int, id:str

# Initial time in UTC; all other times are deltas from it.
T: time:dateisoformat

# Memorize a value / a path location for later reference.
M: memorize
P: memorize_path

# Log entry; LH carries HTML content in the message.
L: level:str, message:oid, loc:loc_id, time_delta_in_seconds:float
LH=L

# Message directed at the console (stdout/stderr or framework output).
C: kind:oid, message:oid, time_delta_in_seconds:float

# Run scope.
SR: name:oid, time_delta_in_seconds:float
ER: status:oid, time_delta_in_seconds:float

# Task scope.
ST: loc:loc_id, time_delta_in_seconds:float
ET: status:oid, message:oid, time_delta_in_seconds:float

# Element scope (method, generator, for/while, if/else, assert, ...).
SE: loc:loc_and_doc_id, type:oid, time_delta_in_seconds:float
EE: type:oid, status:oid, time_delta_in_seconds:float

# Generator frames being resumed / suspended.
YR: loc:loc_id, time_delta_in_seconds:float
YFR: loc:loc_id, time_delta_in_seconds:float
YS: loc:loc_id, type:oid, value:oid, time_delta_in_seconds:float
YFS: loc:loc_id, time_delta_in_seconds:float

# Return value reported by an element.
R: loc:loc_id, type:oid, value:oid, time_delta_in_seconds:float

# Variable assignment / element argument.
AS: loc:loc_id, target:oid, type:oid, value:oid, time_delta_in_seconds:float
EA: name:oid, type:oid, value:oid

# Backfill the start time of the current scope.
S: start_time_delta:float

# Tracebacks (may nest for exception causes).
STB: message:oid, time_delta_in_seconds:float
TBE: source:oid, lineno:int, method:oid, line_content:oid
TBV: name:oid, type:oid, value:oid
ETB: time_delta_in_seconds:float

# Process snapshot bracket.
SPS: message:oid, time_delta_in_seconds:float
EPS: time_delta_in_seconds:float

# Thread dump bracket (message carries the thread name/info).
STD=STB
ETD=ETB

# Replayed messages emitted after a log rotation boundary.
RR=SR
RT=ST
RE=SE
RTB=STB
RYR=YR
RYFR=YFR
RPS=SPS
RTD=STD
";

/// Parse `CODE: fields` or `CODE=ALIAS` out of one spec-table line.
fn spec_line(input: &'static str) -> IResult<&'static str, (&'static str, char, &'static str)> {
    let (rest, code) = take_while1(|c: char| c.is_ascii_alphanumeric())(input)?;
    let (rest, _) = space0(rest)?;
    let (rest, sep) = alt((char(':'), char('='))).parse(rest)?;
    let (rest, _) = space0(rest)?;
    Ok(("", (code, sep, rest.trim())))
}

fn parse_field_specs(rhs: &'static str) -> Vec<FieldSpec> {
    rhs.split(',')
        .map(|part| {
            let part = part.trim();
            let (name, kind) = part
                .split_once(':')
                .unwrap_or_else(|| panic!("field spec without ':' in message spec: {}", part));
            FieldSpec {
                name: name.trim(),
                kind: DecodeKind::from_spec(kind.trim()),
            }
        })
        .collect()
}

fn build_registry() -> HashMap<&'static str, MessageSpec> {
    let mut registry: HashMap<&'static str, MessageSpec> = HashMap::new();
    for line in MESSAGE_SPEC.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (_, (code, sep, rhs)) =
            spec_line(line).unwrap_or_else(|_| panic!("invalid message spec line: {}", line));
        let spec = if sep == '=' {
            // Aliases always come after their target in the table.
            registry
                .get(rhs)
                .unwrap_or_else(|| panic!("alias {}={} targets an unknown code", code, rhs))
                .clone()
        } else {
            match rhs {
                "memorize" => MessageSpec::Memorize,
                "memorize_path" => MessageSpec::MemorizePath,
                _ => MessageSpec::Fields(parse_field_specs(rhs)),
            }
        };
        registry.insert(code, spec);
    }
    registry
}

/// The decode-rule registry, built once from the declarative table above.
pub fn registry() -> &'static HashMap<&'static str, MessageSpec> {
    static REGISTRY: OnceLock<HashMap<&'static str, MessageSpec>> = OnceLock::new();
    REGISTRY.get_or_init(build_registry)
}

/// Every known message tag of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Version,
    Info,
    RunId,
    InitialTime,
    Memorize,
    MemorizePath,
    Log,
    LogHtml,
    Console,
    StartRun,
    EndRun,
    StartTask,
    EndTask,
    StartElement,
    EndElement,
    YieldResume,
    YieldFromResume,
    YieldSuspend,
    YieldFromSuspend,
    Return,
    Assign,
    ElementArgument,
    ScopeTime,
    StartTraceback,
    TracebackEntry,
    TracebackVariable,
    EndTraceback,
    StartProcessSnapshot,
    EndProcessSnapshot,
    StartThreadDump,
    EndThreadDump,
    RestartRun,
    RestartTask,
    RestartElement,
    RestartTraceback,
    RestartYieldResume,
    RestartYieldFromResume,
    RestartProcessSnapshot,
    RestartThreadDump,
}

impl MessageType {
    pub fn from_code(code: &str) -> Option<Self> {
        use MessageType::*;
        Some(match code {
            "V" => Version,
            "I" => Info,
            "ID" => RunId,
            "T" => InitialTime,
            "M" => Memorize,
            "P" => MemorizePath,
            "L" => Log,
            "LH" => LogHtml,
            "C" => Console,
            "SR" => StartRun,
            "ER" => EndRun,
            "ST" => StartTask,
            "ET" => EndTask,
            "SE" => StartElement,
            "EE" => EndElement,
            "YR" => YieldResume,
            "YFR" => YieldFromResume,
            "YS" => YieldSuspend,
            "YFS" => YieldFromSuspend,
            "R" => Return,
            "AS" => Assign,
            "EA" => ElementArgument,
            "S" => ScopeTime,
            "STB" => StartTraceback,
            "TBE" => TracebackEntry,
            "TBV" => TracebackVariable,
            "ETB" => EndTraceback,
            "SPS" => StartProcessSnapshot,
            "EPS" => EndProcessSnapshot,
            "STD" => StartThreadDump,
            "ETD" => EndThreadDump,
            "RR" => RestartRun,
            "RT" => RestartTask,
            "RE" => RestartElement,
            "RTB" => RestartTraceback,
            "RYR" => RestartYieldResume,
            "RYFR" => RestartYieldFromResume,
            "RPS" => RestartProcessSnapshot,
            "RTD" => RestartThreadDump,
            _ => return None,
        })
    }

    pub fn code(&self) -> &'static str {
        use MessageType::*;
        match self {
            Version => "V",
            Info => "I",
            RunId => "ID",
            InitialTime => "T",
            Memorize => "M",
            MemorizePath => "P",
            Log => "L",
            LogHtml => "LH",
            Console => "C",
            StartRun => "SR",
            EndRun => "ER",
            StartTask => "ST",
            EndTask => "ET",
            StartElement => "SE",
            EndElement => "EE",
            YieldResume => "YR",
            YieldFromResume => "YFR",
            YieldSuspend => "YS",
            YieldFromSuspend => "YFS",
            Return => "R",
            Assign => "AS",
            ElementArgument => "EA",
            ScopeTime => "S",
            StartTraceback => "STB",
            TracebackEntry => "TBE",
            TracebackVariable => "TBV",
            EndTraceback => "ETB",
            StartProcessSnapshot => "SPS",
            EndProcessSnapshot => "EPS",
            StartThreadDump => "STD",
            EndThreadDump => "ETD",
            RestartRun => "RR",
            RestartTask => "RT",
            RestartElement => "RE",
            RestartTraceback => "RTB",
            RestartYieldResume => "RYR",
            RestartYieldFromResume => "RYFR",
            RestartProcessSnapshot => "RPS",
            RestartThreadDump => "RTD",
        }
    }

    /// For replay variants, the regular message type they stand in for.
    pub fn replay_target(&self) -> Option<Self> {
        use MessageType::*;
        Some(match self {
            RestartRun => StartRun,
            RestartTask => StartTask,
            RestartElement => StartElement,
            RestartTraceback => StartTraceback,
            RestartYieldResume => YieldResume,
            RestartYieldFromResume => YieldFromResume,
            RestartProcessSnapshot => StartProcessSnapshot,
            RestartThreadDump => StartThreadDump,
            _ => return None,
        })
    }

    /// Whether this message opens a regular (non-replayed) context. Once one
    /// has been seen, replay variants are suppressed instead of promoted.
    pub fn opens_regular_context(&self) -> bool {
        use MessageType::*;
        matches!(
            self,
            StartRun
                | StartTask
                | StartElement
                | StartTraceback
                | YieldResume
                | YieldFromResume
                | StartProcessSnapshot
                | StartThreadDump
        )
    }

    pub fn spec(&self) -> &'static MessageSpec {
        registry()
            .get(self.code())
            .unwrap_or_else(|| panic!("message type {} missing from spec table", self.code()))
    }
}
