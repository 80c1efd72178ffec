//! Typed filter expressions for record queries.
//!
//! A filter is a boolean predicate tree over record fields. The embedded sled
//! adapter evaluates it locally against the JSON form of each record; adapters
//! backed by a remote query engine render it to the textual form instead
//! (`user = "u1" && confirmed = true`). Rendered values come only from
//! validated identifiers; free-text search keywords must pass through
//! [`sanitize_keyword`] before they may be interpolated.

use serde_json::Value;

/// Boolean predicate over record fields.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Field equals a JSON value.
    Eq(&'static str, Value),
    /// Field equals any of the listed values.
    In(&'static str, Vec<Value>),
    /// Multi-value field contains the value (or single-value field equals it).
    Contains(&'static str, Value),
    /// All sub-filters hold.
    And(Vec<Filter>),
    /// At least one sub-filter holds.
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(field, value.into())
    }

    pub fn any_of(field: &'static str, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Filter::In(field, values.into_iter().map(Into::into).collect())
    }

    pub fn contains(field: &'static str, value: impl Into<Value>) -> Self {
        Filter::Contains(field, value.into())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            current => Filter::And(vec![current, other]),
        }
    }

    /// Evaluate against the JSON form of a record. Unknown fields never match.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Filter::Eq(field, value) => record.get(field) == Some(value),
            Filter::In(field, values) => record
                .get(field)
                .is_some_and(|actual| values.iter().any(|v| v == actual)),
            Filter::Contains(field, value) => record.get(field).is_some_and(|actual| {
                match actual {
                    Value::Array(entries) => entries.contains(value),
                    single => single == value,
                }
            }),
            Filter::And(filters) => filters.iter().all(|f| f.matches(record)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(record)),
        }
    }

    /// Render the textual query form used by remote-backed adapters and logs.
    pub fn render(&self) -> String {
        match self {
            Filter::Eq(field, value) => format!("{} = {}", field, render_value(value)),
            Filter::In(field, values) => {
                let alternatives: Vec<String> = values
                    .iter()
                    .map(|v| format!("{} = {}", field, render_value(v)))
                    .collect();
                format!("({})", alternatives.join(" || "))
            }
            Filter::Contains(field, value) => format!("{} ~ {}", field, render_value(value)),
            Filter::And(filters) => filters
                .iter()
                .map(Filter::render)
                .collect::<Vec<_>>()
                .join(" && "),
            Filter::Or(filters) => {
                let parts: Vec<String> = filters.iter().map(Filter::render).collect();
                format!("({})", parts.join(" || "))
            }
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", sanitize_keyword(s)),
        other => other.to_string(),
    }
}

/// Strip quote and backslash characters from user-supplied free text so it can
/// never break out of a rendered string literal.
pub fn sanitize_keyword(keyword: &str) -> String {
    keyword
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\\'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_and_in_match_json_fields() {
        let record = json!({"user": "u1", "confirmed": true, "progress": 0.5});
        assert!(Filter::eq("user", "u1").matches(&record));
        assert!(!Filter::eq("user", "u2").matches(&record));
        assert!(Filter::any_of("user", ["u2", "u1"]).matches(&record));
        assert!(Filter::eq("user", "u1")
            .and(Filter::eq("confirmed", true))
            .matches(&record));
        assert!(!Filter::eq("missing", "x").matches(&record));
    }

    #[test]
    fn contains_matches_array_and_scalar_fields() {
        let record = json!({"organizations": ["o1", "o2"], "user": "u1"});
        assert!(Filter::contains("organizations", "o1").matches(&record));
        assert!(!Filter::contains("organizations", "o3").matches(&record));
        assert!(Filter::contains("user", "u1").matches(&record));
    }

    #[test]
    fn renders_textual_query_form() {
        let filter = Filter::eq("user", "u1").and(Filter::eq("confirmed", true));
        assert_eq!(filter.render(), "user = \"u1\" && confirmed = true");
    }

    #[test]
    fn sanitize_strips_quotes_and_backslashes() {
        assert_eq!(sanitize_keyword("plain text"), "plain text");
        assert_eq!(sanitize_keyword(r#"a" || user = "x"#), "a || user = x");
        assert_eq!(sanitize_keyword(r"back\slash'"), "backslash");
    }

    #[test]
    fn injection_attempt_cannot_escape_literal() {
        let rendered = Filter::eq("note", r#"x" && leader = "me"#.to_string()).render();
        assert_eq!(rendered, "note = \"x && leader = me\"");
    }
}
