use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque record from the document store. The engine never assumes a schema
/// beyond the narrow typed views below; everything else travels untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(pub Map<String, Value>);

impl Document {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Document(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Dotted-path lookup, descending into nested objects.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }
}

/// Typed view over a `sip_call_index` document.
#[derive(Debug, Clone, PartialEq)]
pub struct SipLeg {
    pub call_id: String,
    pub x_call_id: Option<String>,
    pub caller: String,
    pub callee: String,
    pub created_at: i64,
    pub terminated_at: Option<i64>,
    pub state: String,
    pub duration: Option<i64>,
    pub error_code: Option<String>,
    pub src_addr: String,
    pub dst_addr: String,
    pub src_host: Option<String>,
    pub dst_host: Option<String>,
}

impl SipLeg {
    pub fn from_document(doc: &Document) -> Result<Self> {
        Ok(SipLeg {
            call_id: required_str(doc, "call_id")?,
            x_call_id: doc.get_str("x_call_id").map(str::to_string),
            caller: required_str(doc, "caller")?,
            callee: required_str(doc, "callee")?,
            created_at: doc
                .get_i64("created_at")
                .ok_or(Error::MalformedDocument("created_at"))?,
            terminated_at: doc.get_i64("terminated_at"),
            state: required_str(doc, "state")?,
            duration: doc.get_i64("duration"),
            error_code: doc.get_str("error_code").map(str::to_string),
            src_addr: required_str(doc, "src_addr")?,
            dst_addr: required_str(doc, "dst_addr")?,
            src_host: doc.get_str("src_host").map(str::to_string),
            dst_host: doc.get_str("dst_host").map(str::to_string),
        })
    }

    /// Ordering key for the leg set; also the tie-break for "first leg".
    pub fn order_key(&self) -> (i64, String) {
        (self.created_at, self.dst_addr.clone())
    }
}

/// Typed view over an RTP/RTCP report document.
#[derive(Debug, Clone, PartialEq)]
pub struct RtprReport {
    pub call_id: Option<String>,
    pub started_at: i64,
}

impl RtprReport {
    pub fn from_document(doc: &Document) -> Result<Self> {
        Ok(RtprReport {
            call_id: doc.get_str("call_id").map(str::to_string),
            started_at: doc
                .get_i64("started_at")
                .ok_or(Error::MalformedDocument("started_at"))?,
        })
    }
}

fn required_str(doc: &Document, field: &'static str) -> Result<String> {
    doc.get_str(field)
        .map(str::to_string)
        .ok_or(Error::MalformedDocument(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leg_doc() -> Document {
        Document::from_value(json!({
            "call_id": "abc",
            "caller": "alice",
            "callee": "bob",
            "created_at": 1000,
            "terminated_at": 2000,
            "state": "answered",
            "src_addr": "10.0.0.1:5060",
            "dst_addr": "10.0.0.2:5060",
        }))
        .unwrap()
    }

    #[test]
    fn test_dotted_path_lookup() {
        let doc = Document::from_value(json!({
            "rtt": {"avg": 12, "max": 30},
            "mos": 4.1,
        }))
        .unwrap();
        assert_eq!(doc.get_i64("rtt.avg"), Some(12));
        assert_eq!(doc.get_i64("rtt.missing"), None);
        assert!(doc.get("mos").unwrap().is_number());
    }

    #[test]
    fn test_sip_leg_from_document() {
        let leg = SipLeg::from_document(&leg_doc()).unwrap();
        assert_eq!(leg.call_id, "abc");
        assert_eq!(leg.terminated_at, Some(2000));
        assert_eq!(leg.x_call_id, None);
        assert_eq!(leg.duration, None);
    }

    #[test]
    fn test_sip_leg_missing_required_field() {
        let mut doc = leg_doc();
        doc.0.remove("caller");
        let err = SipLeg::from_document(&doc).unwrap_err();
        assert!(matches!(err, Error::MalformedDocument("caller")));
    }

    #[test]
    fn test_rtpr_report_requires_started_at() {
        let doc = Document::from_value(json!({"call_id": "abc"})).unwrap();
        assert!(RtprReport::from_document(&doc).is_err());

        let doc = Document::from_value(json!({"started_at": 5000})).unwrap();
        let report = RtprReport::from_document(&doc).unwrap();
        assert_eq!(report.call_id, None);
        assert_eq!(report.started_at, 5000);
    }
}
