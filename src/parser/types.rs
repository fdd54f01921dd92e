use super::spec::MessageType;

/// A single decoded payload field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

/// A memorized code location (resolved from a `P` message).
///
/// `doc` is only carried when the field was declared `loc_and_doc_id`;
/// plain `loc_id` references leave it unset.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub name: String,
    pub libname: String,
    pub source: String,
    pub doc: Option<String>,
    pub lineno: i64,
}

impl Location {
    /// Placeholder used when a `loc_id` reference was never memorized.
    pub fn unresolved(loc_id: &str) -> Self {
        Self {
            name: format!("<ref not found: {}>", loc_id),
            libname: String::new(),
            source: String::new(),
            doc: None,
            lineno: -1,
        }
    }
}

/// Ordered field-name to value map produced by decoding one payload.
///
/// Field names come from the declarative message spec, so lookups are by
/// plain `&str`. Location-typed fields are unpacked into `location` instead
/// of the value list, mirroring how the wire format treats them.
#[derive(Debug, Clone, Default)]
pub struct DecodedFields {
    values: Vec<(&'static str, FieldValue)>,
    location: Option<Location>,
}

impl DecodedFields {
    pub fn push(&mut self, name: &'static str, value: FieldValue) {
        self.values.push((name, value));
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = Some(location);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn int_field(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn float_field(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn json_field(&self, name: &str) -> Option<&serde_json::Value> {
        match self.get(name)? {
            FieldValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// The time delta carried by most messages, in seconds from the run start.
    pub fn time_delta(&self) -> f64 {
        self.float_field("time_delta_in_seconds").unwrap_or(-1.0)
    }
}

/// One decoded protocol message.
///
/// `message_type` keeps the original wire tag even for aliased specs
/// (`LH` decodes with the `L` field spec but stays `LogHtml` here, so
/// downstream dispatch can still tell HTML-flagged logs apart).
#[derive(Debug, Clone)]
pub struct Message {
    pub message_type: MessageType,
    pub decoded: DecodedFields,
    pub raw: String,
}
