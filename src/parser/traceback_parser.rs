use std::collections::HashMap;

use serde::Serialize;

use super::spec::MessageType;
use super::types::Message;

/// A single stack frame of an assembled traceback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TracebackFrame {
    pub source: String,
    pub lineno: i64,
    pub method: String,
    pub line_content: String,
    /// Captured from `TBV` messages and kept for completeness. The tree gets
    /// variable values from `AS`/`EA` messages instead, so nothing downstream
    /// renders these.
    pub variables: HashMap<String, (String, String)>,
}

/// A fully assembled traceback (also used for thread dumps, which share the
/// same bracket structure on the wire).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Traceback {
    pub exception_msg: String,
    pub stack: Vec<TracebackFrame>,
}

impl Traceback {
    fn new(exception_msg: String) -> Self {
        Self {
            exception_msg,
            stack: Vec::new(),
        }
    }

    fn push_frame(&mut self, source: &str, lineno: i64, method: &str, line_content: &str) {
        self.stack.push(TracebackFrame {
            source: source.to_string(),
            lineno,
            method: method.to_string(),
            line_content: line_content.to_string(),
            variables: HashMap::new(),
        });
    }

    fn push_variable(&mut self, name: &str, var_type: &str, value: &str) -> bool {
        match self.stack.last_mut() {
            Some(frame) => {
                frame.variables.insert(
                    name.to_string(),
                    (var_type.to_string(), value.to_string()),
                );
                true
            }
            None => false,
        }
    }
}

/// Accumulates traceback bracket messages into structured tracebacks.
///
/// Keeps a stack of in-progress tracebacks so an exception cause can open a
/// nested traceback inside another one. Frames arrive innermost-first while
/// streaming; the finished traceback is reversed so consumers always see the
/// outermost frame first.
#[derive(Debug, Default)]
pub struct TracebackAssembler {
    stack: Vec<Traceback>,
}

impl TracebackAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fully assembled traceback when the closing message
    /// arrives; every other message returns `None`. Unbalanced brackets are
    /// logged and recovered from.
    pub fn handle(&mut self, msg: &Message) -> Option<Traceback> {
        match msg.message_type {
            MessageType::StartTraceback | MessageType::StartThreadDump => {
                let message = msg
                    .decoded
                    .str_field("message")
                    .unwrap_or_default()
                    .to_string();
                self.stack.push(Traceback::new(message));
                None
            }
            MessageType::TracebackEntry => {
                let Some(tb) = self.stack.last_mut() else {
                    log::warn!("traceback entry arrived with no traceback open");
                    return None;
                };
                tb.push_frame(
                    msg.decoded.str_field("source").unwrap_or_default(),
                    msg.decoded.int_field("lineno").unwrap_or(-1),
                    msg.decoded.str_field("method").unwrap_or_default(),
                    msg.decoded.str_field("line_content").unwrap_or_default(),
                );
                None
            }
            MessageType::TracebackVariable => {
                let Some(tb) = self.stack.last_mut() else {
                    log::warn!("traceback variable arrived with no traceback open");
                    return None;
                };
                let attached = tb.push_variable(
                    msg.decoded.str_field("name").unwrap_or_default(),
                    msg.decoded.str_field("type").unwrap_or_default(),
                    msg.decoded.str_field("value").unwrap_or_default(),
                );
                if !attached {
                    log::warn!("traceback variable arrived before any frame");
                }
                None
            }
            MessageType::EndTraceback | MessageType::EndThreadDump => {
                let Some(mut tb) = self.stack.pop() else {
                    log::warn!("traceback end arrived with no traceback open");
                    return None;
                };
                tb.stack.reverse();
                Some(tb)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Decoder;

    fn feed(assembler: &mut TracebackAssembler, decoder: &mut Decoder, line: &str) -> Option<Traceback> {
        let msg = decoder.decode_line(line).unwrap()?;
        assembler.handle(&msg)
    }

    fn setup_decoder() -> Decoder {
        let mut decoder = Decoder::new();
        for line in [
            "M x:\"ValueError: bad input\"",
            "M s1:\"/app/inner.py\"",
            "M s2:\"/app/middle.py\"",
            "M s3:\"/app/outer.py\"",
            "M m1:\"inner\"",
            "M m2:\"middle\"",
            "M m3:\"outer\"",
            "M l1:\"raise ValueError('bad input')\"",
            "M l2:\"inner()\"",
            "M l3:\"middle()\"",
        ] {
            decoder.decode_line(line).unwrap();
        }
        decoder
    }

    #[test]
    fn test_frames_are_reversed_to_outermost_first() {
        let mut decoder = setup_decoder();
        let mut assembler = TracebackAssembler::new();

        assert!(feed(&mut assembler, &mut decoder, "STB x|0.1").is_none());
        // Streaming order is innermost-first: inner, middle, outer.
        assert!(feed(&mut assembler, &mut decoder, "TBE s1|3|m1|l1").is_none());
        assert!(feed(&mut assembler, &mut decoder, "TBE s2|7|m2|l2").is_none());
        assert!(feed(&mut assembler, &mut decoder, "TBE s3|11|m3|l3").is_none());
        let tb = feed(&mut assembler, &mut decoder, "ETB 0.2").unwrap();

        assert_eq!(tb.exception_msg, "ValueError: bad input");
        let methods: Vec<&str> = tb.stack.iter().map(|f| f.method.as_str()).collect();
        assert_eq!(methods, ["outer", "middle", "inner"]);
        assert_eq!(tb.stack[0].lineno, 11);
        assert_eq!(tb.stack[2].line_content, "raise ValueError('bad input')");
    }

    #[test]
    fn test_nested_traceback_pops_inner_first() {
        let mut decoder = setup_decoder();
        let mut assembler = TracebackAssembler::new();
        decoder.decode_line("M y:\"KeyError: 'cause'\"").unwrap();

        feed(&mut assembler, &mut decoder, "STB x|0.1");
        feed(&mut assembler, &mut decoder, "TBE s1|3|m1|l1");
        feed(&mut assembler, &mut decoder, "STB y|0.1");
        feed(&mut assembler, &mut decoder, "TBE s2|7|m2|l2");

        let inner = feed(&mut assembler, &mut decoder, "ETB 0.2").unwrap();
        assert_eq!(inner.exception_msg, "KeyError: 'cause'");
        assert_eq!(inner.stack.len(), 1);

        let outer = feed(&mut assembler, &mut decoder, "ETB 0.3").unwrap();
        assert_eq!(outer.exception_msg, "ValueError: bad input");
        assert_eq!(outer.stack[0].method, "inner");
    }

    #[test]
    fn test_unbalanced_pop_is_recoverable() {
        let mut decoder = setup_decoder();
        let mut assembler = TracebackAssembler::new();

        assert!(feed(&mut assembler, &mut decoder, "ETB 0.1").is_none());
        assert!(feed(&mut assembler, &mut decoder, "TBE s1|3|m1|l1").is_none());

        // Still works after the unbalanced messages.
        feed(&mut assembler, &mut decoder, "STB x|0.2");
        feed(&mut assembler, &mut decoder, "TBE s1|3|m1|l1");
        assert!(feed(&mut assembler, &mut decoder, "ETB 0.3").is_some());
    }

    #[test]
    fn test_variables_are_stored_but_not_required() {
        let mut decoder = setup_decoder();
        let mut assembler = TracebackAssembler::new();
        for line in ["M vn:\"count\"", "M vt:\"int\"", "M vv:\"10\""] {
            decoder.decode_line(line).unwrap();
        }

        feed(&mut assembler, &mut decoder, "STB x|0.1");
        feed(&mut assembler, &mut decoder, "TBE s1|3|m1|l1");
        feed(&mut assembler, &mut decoder, "TBV vn|vt|vv");
        let tb = feed(&mut assembler, &mut decoder, "ETB 0.2").unwrap();

        assert_eq!(
            tb.stack[0].variables.get("count"),
            Some(&("int".to_string(), "10".to_string()))
        );
    }
}
