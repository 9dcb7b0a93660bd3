//! Admin-comment annotations
//!
//! Queries issued through admin tooling can carry a JSON metadata blob in a
//! SQL comment: `/* Audit-{"unix_milli":...}-Audit */`. The recorder strips
//! the comment from the logged SQL and keeps the parsed metadata for
//! diagnostics.

use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;
use serde::Deserialize;

/// Metadata extracted from an admin comment
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryAnnotation {
    /// Millisecond timestamp stamped by the issuing tool; filled with the
    /// capture time when the tool sent none
    #[serde(default)]
    pub unix_milli: i64,
    /// The query with the admin comment stripped
    #[serde(default)]
    pub query: String,
    /// Wall-clock capture time, stamped when the annotation is parsed
    #[serde(default)]
    pub create_time: String,
}

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/\*\s+Audit-([\s\S]+)-Audit\s+\*/").expect("static regex"))
}

/// Extract the admin annotation from a query, if present.
///
/// Returns the query with the comment stripped plus the parsed metadata,
/// with the annotation's `query` replaced by the cleaned SQL and its
/// timestamps filled in. Queries without the marker, and queries whose
/// metadata fails to parse, come back unchanged.
pub fn extract(query: &str) -> (String, Option<QueryAnnotation>) {
    if !query.contains(" Audit-") {
        return (query.to_string(), None);
    }

    let re = comment_regex();
    let Some(captures) = re.captures(query) else {
        return (query.to_string(), None);
    };

    match serde_json::from_str::<QueryAnnotation>(&captures[1]) {
        Ok(mut annotation) => {
            let cleaned = re.replace(query, "").trim().to_string();
            annotation.query = cleaned.clone();
            if annotation.unix_milli == 0 {
                annotation.unix_milli = Local::now().timestamp_millis();
            }
            annotation.create_time = Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
            (cleaned, Some(annotation))
        }
        Err(e) => {
            warn!("failed to parse admin comment metadata: {}", e);
            (query.to_string(), None)
        }
    }
}
