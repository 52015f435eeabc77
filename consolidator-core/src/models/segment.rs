use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The smallest unit of activity: one timestamped event from any source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Event tag, e.g. `ChatMessage`, `RemoteConnection`, `TicketComment`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Source-specific scalars that were not promoted to fields.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// A grouping key resolved against a segment.
///
/// Absent fields, absent attributes and JSON `null` all collapse to `Missing`,
/// so two segments that both lack a key compare equal.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue<'a> {
    Missing,
    Text(&'a str),
    Time(DateTime<Utc>),
    Attribute(&'a Value),
}

impl Segment {
    pub fn new(
        id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            start_time,
            end_time,
            kind: kind.into(),
            author: None,
            content: None,
            attributes: Map::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Resolve `key` against the first-class fields, then the attribute map.
    ///
    /// A first-class field always shadows an attribute of the same name, even
    /// when the field itself is empty.
    pub fn key_value(&self, key: &str) -> KeyValue<'_> {
        match key {
            "id" => KeyValue::Text(&self.id),
            "type" | "kind" => KeyValue::Text(&self.kind),
            "author" => opt_text(self.author.as_deref()),
            "content" => opt_text(self.content.as_deref()),
            "start_time" => KeyValue::Time(self.start_time),
            "end_time" => KeyValue::Time(self.end_time),
            _ => match self.attributes.get(key) {
                None | Some(Value::Null) => KeyValue::Missing,
                Some(value) => KeyValue::Attribute(value),
            },
        }
    }

    /// String form of an attribute, for guessed names and titles.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

fn opt_text(value: Option<&str>) -> KeyValue<'_> {
    match value {
        Some(s) => KeyValue::Text(s),
        None => KeyValue::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    #[test]
    fn test_first_class_field_shadows_attribute() {
        let segment = Segment::new("s1", at(0), at(1), "ChatMessage")
            .with_author("alice")
            .with_attribute("author", "mallory");

        assert_eq!(segment.key_value("author"), KeyValue::Text("alice"));
    }

    #[test]
    fn test_empty_field_still_shadows_attribute() {
        let segment =
            Segment::new("s1", at(0), at(1), "ChatMessage").with_attribute("author", "mallory");

        assert_eq!(segment.key_value("author"), KeyValue::Missing);
    }

    #[test]
    fn test_falls_back_to_attribute_map() {
        let segment =
            Segment::new("s1", at(0), at(1), "RemoteConnection").with_attribute("machine", "PC-7");

        assert_eq!(segment.key_value("machine"), KeyValue::Attribute(&json!("PC-7")));
        assert_eq!(segment.key_value("absent"), KeyValue::Missing);
    }

    #[test]
    fn test_null_attribute_equals_missing() {
        let a = Segment::new("a", at(0), at(1), "x").with_attribute("ticket", Value::Null);
        let b = Segment::new("b", at(2), at(3), "x");

        assert_eq!(a.key_value("ticket"), b.key_value("ticket"));
    }

    #[test]
    fn test_kind_serializes_as_type() {
        let segment = Segment::new("s1", at(0), at(5), "TicketComment").with_content("hello");
        let value = serde_json::to_value(&segment).unwrap();

        assert_eq!(value["type"], "TicketComment");
        let back: Segment = serde_json::from_value(value).unwrap();
        assert_eq!(back, segment);
    }

    #[test]
    fn test_attribute_str_ignores_blank_and_non_string() {
        let segment = Segment::new("s1", at(0), at(1), "x")
            .with_attribute("customer_name", "  ")
            .with_attribute("count", 3)
            .with_attribute("title", " Printer jam ");

        assert_eq!(segment.attribute_str("customer_name"), None);
        assert_eq!(segment.attribute_str("count"), None);
        assert_eq!(segment.attribute_str("title"), Some("Printer jam"));
    }
}
