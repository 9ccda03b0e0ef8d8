use crate::attributes::{AttributeCatalog, AttributeKind};
use crate::store::{CompareOp, Filter};
use serde_json::Value;
use tracing::warn;

/// Which index family a predicate addresses, derived from the first
/// dotted segment of its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Sip,
    Rtp,
    Rtcp,
    Generic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub path: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn domain(&self) -> Domain {
        if self.path.starts_with("sip.") {
            Domain::Sip
        } else if self.path.starts_with("rtp.") {
            Domain::Rtp
        } else if self.path.starts_with("rtcp.") {
            Domain::Rtcp
        } else {
            Domain::Generic
        }
    }

    /// Document field addressed by this predicate: the path with its
    /// domain prefix stripped. Generic paths address the field verbatim.
    pub fn field(&self) -> &str {
        match self.domain() {
            Domain::Sip => &self.path["sip.".len()..],
            Domain::Rtp => &self.path["rtp.".len()..],
            Domain::Rtcp => &self.path["rtcp.".len()..],
            Domain::Generic => &self.path,
        }
    }

    /// The method axis is suppressed at scan time; the projector pins the
    /// method label instead.
    pub fn is_method_axis(&self) -> bool {
        self.path == "sip.method"
    }

    pub fn to_filter(&self) -> Filter {
        Filter::cmp(self.field(), self.op, self.value.clone())
    }
}

/// Parse a free-text query into predicates.
///
/// Tokens are whitespace-separated `path OP value` triples with
/// `OP ∈ {!=, >=, <=, =, >, <}`. A `*` anywhere in the value turns the
/// predicate into a substring match. Literals are coerced to the catalog
/// type of the path when one is known; paths the catalog does not know,
/// and literals that fail coercion, become string equality regardless of
/// the written operator. Tokens without an operator are dropped.
pub fn parse(query: &str, catalog: &AttributeCatalog) -> Vec<Predicate> {
    query
        .split_whitespace()
        .filter_map(|token| parse_token(token, catalog))
        .collect()
}

fn parse_token(token: &str, catalog: &AttributeCatalog) -> Option<Predicate> {
    let Some((path, op, literal)) = split_operator(token) else {
        warn!(token, "dropping query token without comparison operator");
        return None;
    };
    if path.is_empty() {
        warn!(token, "dropping query token without attribute path");
        return None;
    }

    if literal.contains('*') {
        return Some(Predicate {
            path: path.to_string(),
            op: CompareOp::Contains,
            value: Value::String(literal.replace('*', "")),
        });
    }

    let Some(descriptor) = catalog.lookup(path) else {
        // unknown paths stay in string space as plain equality
        return Some(Predicate {
            path: path.to_string(),
            op: CompareOp::Eq,
            value: Value::String(literal.to_string()),
        });
    };

    let value = match descriptor.kind {
        AttributeKind::String => Value::String(literal.to_string()),
        AttributeKind::Integer => match literal.parse::<i64>() {
            Ok(v) => Value::from(v),
            Err(_) => return Some(degrade(path, literal)),
        },
        AttributeKind::Float => match literal.parse::<f64>() {
            Ok(v) => Value::from(v),
            Err(_) => return Some(degrade(path, literal)),
        },
        AttributeKind::Boolean => match literal.parse::<bool>() {
            Ok(v) => Value::from(v),
            Err(_) => return Some(degrade(path, literal)),
        },
    };

    Some(Predicate {
        path: path.to_string(),
        op,
        value,
    })
}

fn degrade(path: &str, literal: &str) -> Predicate {
    warn!(path, literal, "literal does not match attribute type, degrading to string equality");
    Predicate {
        path: path.to_string(),
        op: CompareOp::Eq,
        value: Value::String(literal.to_string()),
    }
}

fn split_operator(token: &str) -> Option<(&str, CompareOp, &str)> {
    let bytes = token.as_bytes();
    for i in 0..bytes.len() {
        let two = match token.get(i..i + 2) {
            Some("!=") => Some((CompareOp::Ne, 2)),
            Some(">=") => Some((CompareOp::Ge, 2)),
            Some("<=") => Some((CompareOp::Le, 2)),
            _ => None,
        };
        let found = two.or(match bytes[i] {
            b'=' => Some((CompareOp::Eq, 1)),
            b'>' => Some((CompareOp::Gt, 1)),
            b'<' => Some((CompareOp::Lt, 1)),
            _ => None,
        });
        if let Some((op, len)) = found {
            return Some((&token[..i], op, &token[i + len..]));
        }
    }
    None
}
