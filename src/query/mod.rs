use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryBuildError {
    #[error("invalid label selector '{0}' (expected key=value, key!=value, key=~value, or key!~value)")]
    InvalidSelector(String),

    #[error("invalid regex keyword '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("no keywords provided")]
    NoKeywords,
}

/// How keywords are matched against log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Keywords are literal substrings.
    Contains,
    /// Keywords are raw regex fragments.
    Regex,
}

/// How multiple keywords combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordLogic {
    /// Any keyword may match.
    Or,
    /// Every keyword must match.
    And,
}

/// The search criteria, built once from user input and immutable afterwards.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    pub keywords: Vec<String>,
    pub mode: MatchMode,
    pub logic: KeywordLogic,
    pub labels: Vec<String>,
    pub limit: usize,
}

/// Compile a spec into a single LogQL expression: conjunctive stream
/// selector first, then content filters.
///
/// Regex fragments are compile-checked locally so a bad pattern fails the
/// run before any request is sent, instead of failing once per batch as a
/// backend 400.
pub fn build_query(spec: &SearchSpec) -> Result<String, QueryBuildError> {
    if spec.keywords.is_empty() {
        return Err(QueryBuildError::NoKeywords);
    }

    let selector = build_selector(&spec.labels)?;
    let filters = match spec.mode {
        MatchMode::Contains => build_contains_filters(&spec.keywords, spec.logic),
        MatchMode::Regex => build_regex_filters(&spec.keywords, spec.logic)?,
    };

    Ok(format!("{}{}", selector, filters))
}

/// Build the stream selector from `key<op>value` label strings.
///
/// An empty label set yields a match-all selector, since the backend
/// rejects queries without at least one stream matcher.
fn build_selector(labels: &[String]) -> Result<String, QueryBuildError> {
    if labels.is_empty() {
        return Ok(r#"{job=~".+"}"#.to_string());
    }

    let matchers: Vec<String> = labels
        .iter()
        .map(|label| parse_label(label))
        .collect::<Result<_, _>>()?;

    Ok(format!("{{{}}}", matchers.join(", ")))
}

fn parse_label(label: &str) -> Result<String, QueryBuildError> {
    // Two-character operators first so `!=` is not split as `!` + `=`.
    for op in ["=~", "!=", "!~"] {
        if let Some((key, value)) = label.split_once(op) {
            return format_matcher(label, key, op, value);
        }
    }
    if let Some((key, value)) = label.split_once('=') {
        return format_matcher(label, key, "=", value);
    }
    Err(QueryBuildError::InvalidSelector(label.to_string()))
}

fn format_matcher(
    original: &str,
    key: &str,
    op: &str,
    value: &str,
) -> Result<String, QueryBuildError> {
    let key = key.trim();
    let value = value.trim();
    if key.is_empty()
        || value.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(QueryBuildError::InvalidSelector(original.to_string()));
    }
    Ok(format!("{}{}\"{}\"", key, op, escape_string(value)))
}

fn build_contains_filters(keywords: &[String], logic: KeywordLogic) -> String {
    match logic {
        // Single keyword needs no alternation; use a plain literal filter.
        KeywordLogic::Or if keywords.len() > 1 => {
            let alternation = keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            format!(" |~ \"{}\"", escape_string(&alternation))
        }
        KeywordLogic::Or => format!(" |= \"{}\"", escape_string(&keywords[0])),
        KeywordLogic::And => keywords
            .iter()
            .map(|k| format!(" |= \"{}\"", escape_string(k)))
            .collect(),
    }
}

/// Regex mode: `or` joins fragments with alternation; `and` chains one
/// filter per fragment so each pattern must independently match somewhere
/// in the line.
fn build_regex_filters(
    keywords: &[String],
    logic: KeywordLogic,
) -> Result<String, QueryBuildError> {
    for pattern in keywords {
        Regex::new(pattern).map_err(|source| QueryBuildError::InvalidRegex {
            pattern: pattern.clone(),
            source,
        })?;
    }

    Ok(match logic {
        KeywordLogic::Or => {
            let alternation = keywords.to_vec().join("|");
            format!(" |~ \"{}\"", escape_string(&alternation))
        }
        KeywordLogic::And => keywords
            .iter()
            .map(|k| format!(" |~ \"{}\"", escape_string(k)))
            .collect(),
    })
}

/// Escape a value for embedding in a double-quoted LogQL string.
fn escape_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
