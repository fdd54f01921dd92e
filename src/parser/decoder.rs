use std::collections::HashMap;

use nom::{
    IResult,
    bytes::complete::take_while1,
    character::complete::{char, space1},
};

use super::spec::{DecodeKind, FieldSpec, MessageSpec, MessageType};
use super::types::{DecodedFields, FieldValue, Location, Message};
use super::{ParseError, ParseResult};

/// Highest wire-format version this build understands. Newer logs are still
/// decoded best-effort; the run info just flags them (see `RunInfo`).
pub const SUPPORTED_VERSION: &str = "0.0.4";

/// Numeric-aware comparison of dotted version strings.
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (va, vb) = (parse(a), parse(b));
    for i in 0..va.len().max(vb.len()) {
        let x = va.get(i).copied().unwrap_or(0);
        let y = vb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

/// Parse the `TYPE ` prefix of a wire line.
fn message_prefix(input: &str) -> IResult<&str, &str> {
    let (rest, code) = take_while1(|c: char| c.is_ascii_alphanumeric())(input)?;
    let (rest, _) = space1(rest)?;
    Ok((rest, code))
}

/// Parse an `id:rest` payload, splitting on the first `:` only.
fn memo_payload(input: &str) -> IResult<&str, (&str, &str)> {
    let (rest, id) = take_while1(|c: char| c != ':')(input)?;
    let (rest, _) = char(':')(rest)?;
    Ok(("", (id, rest)))
}

fn decode_iso_timestamp(raw: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(parsed) => parsed.with_timezone(&chrono::Local).to_string(),
        Err(err) => {
            log::debug!("unparseable ISO timestamp {:?}: {}", raw, err);
            raw.to_string()
        }
    }
}

/// Stateful decoder for one log session.
///
/// `memo` and `location_memo` are append-only for the session lifetime and
/// are mutated only by `M`/`P` messages; decoding every other message type is
/// a pure function of the current state and one input line.
#[derive(Debug, Default)]
pub struct Decoder {
    memo: HashMap<String, serde_json::Value>,
    location_memo: HashMap<String, Location>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a single line. Returns `None` for blank lines and for the
    /// memorization messages, which only mutate decoder state.
    pub fn decode_line(&mut self, line: &str) -> ParseResult<Option<Message>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (payload, code) = message_prefix(line).map_err(|_| {
            ParseError::InvalidFormat(format!("missing message type prefix: {}", line))
        })?;
        let Some(message_type) = MessageType::from_code(code) else {
            return Err(ParseError::UnknownMessageType(code.to_string()));
        };

        match message_type.spec() {
            MessageSpec::Memorize => {
                self.decode_memorize(payload)?;
                Ok(None)
            }
            MessageSpec::MemorizePath => {
                self.decode_memorize_path(payload)?;
                Ok(None)
            }
            MessageSpec::Fields(fields) => {
                let decoded = self.decode_fields(fields, payload)?;
                Ok(Some(Message {
                    message_type,
                    decoded,
                    raw: line.to_string(),
                }))
            }
        }
    }

    /// `M id:jsonvalue` — memorize a value for later oid references.
    fn decode_memorize(&mut self, payload: &str) -> ParseResult<()> {
        let (_, (id, raw_value)) = memo_payload(payload).map_err(|_| {
            ParseError::InvalidFormat(format!("memorize payload without ':': {}", payload))
        })?;
        let value: serde_json::Value = serde_json::from_str(raw_value)
            .map_err(|err| ParseError::InvalidJson(format!("{}: {}", raw_value, err)))?;
        self.memo.insert(id.to_string(), value);
        Ok(())
    }

    /// `P id:name|libname|source|doc|lineno` — the four refs are themselves
    /// oids resolved against `memo`.
    fn decode_memorize_path(&mut self, payload: &str) -> ParseResult<()> {
        let (_, (id, refs)) = memo_payload(payload).map_err(|_| {
            ParseError::InvalidFormat(format!("memorize_path payload without ':': {}", payload))
        })?;
        let parts: Vec<&str> = refs.splitn(5, '|').collect();
        if parts.len() != 5 {
            return Err(ParseError::InvalidFormat(format!(
                "memorize_path expects 5 fields: {}",
                payload
            )));
        }
        let lineno = parts[4]
            .trim()
            .parse::<i64>()
            .map_err(|_| ParseError::InvalidNumber(parts[4].to_string()))?;
        let location = Location {
            name: self.resolve_oid(parts[0]),
            libname: self.resolve_oid(parts[1]),
            source: self.resolve_oid(parts[2]),
            doc: Some(self.resolve_oid(parts[3])),
            lineno,
        };
        self.location_memo.insert(id.to_string(), location);
        Ok(())
    }

    /// Splitting is bounded to the declared field count so that a trailing
    /// field keeps any `|` it legitimately contains. Missing trailing fields
    /// are simply absent from the result.
    fn decode_fields(&self, fields: &[FieldSpec], payload: &str) -> ParseResult<DecodedFields> {
        let mut decoded = DecodedFields::default();
        for (spec, piece) in fields.iter().zip(payload.splitn(fields.len(), '|')) {
            match spec.kind {
                DecodeKind::Oid => {
                    decoded.push(spec.name, FieldValue::Str(self.resolve_oid(piece)));
                }
                DecodeKind::Str => {
                    decoded.push(spec.name, FieldValue::Str(piece.to_string()));
                }
                DecodeKind::Int => {
                    let parsed = piece
                        .trim()
                        .parse()
                        .map_err(|_| ParseError::InvalidNumber(piece.to_string()))?;
                    decoded.push(spec.name, FieldValue::Int(parsed));
                }
                DecodeKind::Float => {
                    let parsed = piece
                        .trim()
                        .parse()
                        .map_err(|_| ParseError::InvalidNumber(piece.to_string()))?;
                    decoded.push(spec.name, FieldValue::Float(parsed));
                }
                DecodeKind::Json => {
                    let parsed = serde_json::from_str(piece)
                        .map_err(|err| ParseError::InvalidJson(format!("{}: {}", piece, err)))?;
                    decoded.push(spec.name, FieldValue::Json(parsed));
                }
                DecodeKind::DateIso => {
                    decoded.push(spec.name, FieldValue::Str(decode_iso_timestamp(piece)));
                }
                DecodeKind::LocId => {
                    decoded.set_location(self.resolve_location(piece, false));
                }
                DecodeKind::LocAndDocId => {
                    decoded.set_location(self.resolve_location(piece, true));
                }
            }
        }
        Ok(decoded)
    }

    fn resolve_oid(&self, oid: &str) -> String {
        match self.memo.get(oid) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => format!("<ref not found: {}>", oid),
        }
    }

    fn resolve_location(&self, loc_id: &str, with_doc: bool) -> Location {
        let mut location = match self.location_memo.get(loc_id) {
            Some(location) => location.clone(),
            None => Location::unresolved(loc_id),
        };
        if !with_doc {
            location.doc = None;
        }
        location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut Decoder, text: &str) -> Vec<Message> {
        text.lines()
            .filter_map(|line| decoder.decode_line(line).ok().flatten())
            .collect()
    }

    #[test]
    fn test_memo_round_trip() {
        let mut decoder = Decoder::new();
        decoder.decode_line("M a:\"Robot1\"").unwrap();
        let msg = decoder.decode_line("SR a|0.016").unwrap().unwrap();

        assert_eq!(msg.message_type, MessageType::StartRun);
        assert_eq!(msg.decoded.str_field("name"), Some("Robot1"));
        assert_eq!(msg.decoded.time_delta(), 0.016);
    }

    #[test]
    fn test_unresolved_oid_yields_placeholder() {
        let mut decoder = Decoder::new();
        let msg = decoder.decode_line("SR zz|0.1").unwrap().unwrap();
        assert_eq!(msg.decoded.str_field("name"), Some("<ref not found: zz>"));

        // The stream keeps decoding afterwards.
        decoder.decode_line("M a:\"later\"").unwrap();
        let msg = decoder.decode_line("SR a|0.2").unwrap().unwrap();
        assert_eq!(msg.decoded.str_field("name"), Some("later"));
    }

    #[test]
    fn test_unresolved_location_yields_placeholder() {
        let mut decoder = Decoder::new();
        let msg = decoder.decode_line("ST nope|0.1").unwrap().unwrap();
        let loc = msg.decoded.location().unwrap();
        assert_eq!(loc.name, "<ref not found: nope>");
        assert_eq!(loc.lineno, -1);
    }

    #[test]
    fn test_memorize_path_resolves_refs() {
        let mut decoder = Decoder::new();
        for line in [
            "M c:\"Simple Task\"",
            "M d:\"Robot1\"",
            "M e:\"/path/to/file.py\"",
            "M f:\"\"",
            "P b:c|d|e|f|0",
        ] {
            decoder.decode_line(line).unwrap();
        }
        let msg = decoder.decode_line("ST b|0.016").unwrap().unwrap();
        let loc = msg.decoded.location().unwrap();
        assert_eq!(loc.name, "Simple Task");
        assert_eq!(loc.libname, "Robot1");
        assert_eq!(loc.source, "/path/to/file.py");
        assert_eq!(loc.lineno, 0);
        // `loc_id` fields do not unpack the docstring.
        assert_eq!(loc.doc, None);

        // `loc_and_doc_id` fields do.
        decoder.decode_line("M k:\"METHOD\"").unwrap();
        let msg = decoder.decode_line("SE b|k|0.02").unwrap().unwrap();
        assert_eq!(msg.decoded.location().unwrap().doc.as_deref(), Some(""));
    }

    #[test]
    fn test_malformed_memorize_is_error_but_state_unchanged() {
        let mut decoder = Decoder::new();
        assert!(decoder.decode_line("M a:{not json").is_err());
        assert!(decoder.memo.is_empty());

        // A malformed line does not poison the decoder.
        decoder.decode_line("M a:\"ok\"").unwrap();
        assert_eq!(decoder.resolve_oid("a"), "ok");
    }

    #[test]
    fn test_unknown_message_type() {
        let mut decoder = Decoder::new();
        match decoder.decode_line("XX whatever") {
            Err(ParseError::UnknownMessageType(code)) => assert_eq!(code, "XX"),
            other => panic!("expected UnknownMessageType, got {:?}", other),
        }
    }

    #[test]
    fn test_whole_payload_json_keeps_pipes() {
        let mut decoder = Decoder::new();
        let msg = decoder.decode_line("I \"sys.path=a|b|c\"").unwrap().unwrap();
        assert_eq!(
            msg.decoded.json_field("info"),
            Some(&serde_json::Value::String("sys.path=a|b|c".to_string()))
        );
    }

    #[test]
    fn test_alias_keeps_original_tag() {
        let mut decoder = Decoder::new();
        decoder.decode_line("M m:\"<b>hi</b>\"").unwrap();
        decoder.decode_line("M c:\"x\"").unwrap();
        decoder.decode_line("M d:\"y\"").unwrap();
        decoder.decode_line("M e:\"z\"").unwrap();
        decoder.decode_line("M f:\"\"").unwrap();
        decoder.decode_line("P p:c|d|e|f|1").unwrap();
        let msg = decoder.decode_line("LH I|m|p|0.5").unwrap().unwrap();
        assert_eq!(msg.message_type, MessageType::LogHtml);
        assert_eq!(msg.decoded.str_field("message"), Some("<b>hi</b>"));
    }

    #[test]
    fn test_iso_timestamp_renders_local() {
        let mut decoder = Decoder::new();
        let msg = decoder
            .decode_line("T 2022-10-03T11:30:54.927+00:00")
            .unwrap()
            .unwrap();
        let rendered = msg.decoded.str_field("time").unwrap();
        // Rendered in the local timezone, whatever that is.
        assert!(rendered.starts_with("2022-10-"));
        assert!(!rendered.contains('T'));
    }

    #[test]
    fn test_numeric_memo_value_renders_as_text() {
        let mut decoder = Decoder::new();
        decoder.decode_line("M n:42").unwrap();
        let msg = decoder.decode_line("SR n|0.0").unwrap().unwrap();
        assert_eq!(msg.decoded.str_field("name"), Some("42"));
    }

    #[test]
    fn test_decode_all_sample() {
        let mut decoder = Decoder::new();
        let messages = decode_all(
            &mut decoder,
            "V 0.0.2\nM a:\"Robot1\"\nSR a|0.016\nM g:\"PASS\"\nER g|0.017",
        );
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].message_type, MessageType::Version);
        assert_eq!(messages[0].decoded.str_field("version"), Some("0.0.2"));
    }

    #[test]
    fn test_compare_versions() {
        use std::cmp::Ordering::*;
        assert_eq!(compare_versions("0.0.2", "0.0.4"), Less);
        assert_eq!(compare_versions("0.0.4", "0.0.4"), Equal);
        assert_eq!(compare_versions("0.0.10", "0.0.4"), Greater);
        assert_eq!(compare_versions("1.0", "1.0.0"), Equal);
    }
}
