use crate::source::DocRange;
use serde::Serialize;
use std::fmt;

/// Pass that raised a [`DefinitionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Syntax,
    Compile,
    Resolve,
    Types,
    Init,
    Check,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Syntax => "syntax",
            Stage::Compile => "compile",
            Stage::Resolve => "resolve",
            Stage::Types => "types",
            Stage::Init => "init",
            Stage::Check => "check",
        };
        f.write_str(s)
    }
}

/// A grammar definition error. Errors accumulate in order; any error makes
/// the compiled grammar unusable for parsing.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{stage} error{}: {message}", .rule.as_ref().map(|r| format!(" in '{r}'")).unwrap_or_default())]
pub struct DefinitionError {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Line in the grammar source, when the error has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
}

impl DefinitionError {
    pub fn new(stage: Stage, rule: Option<&str>, message: impl Into<String>) -> Self {
        DefinitionError {
            stage,
            rule: rule.map(str::to_owned),
            line: None,
            message: message.into(),
        }
    }

    pub fn syntax(line: u32, message: impl Into<String>) -> Self {
        DefinitionError {
            stage: Stage::Syntax,
            rule: None,
            line: Some(line),
            message: message.into(),
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Serialize with every field present (null for missing).
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "line":    self.line,
            "message": self.message,
            "rule":    self.rule,
            "stage":   self.stage,
        })
    }
}

/// A root-level match failure. Recoverable: parsing continues past it.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("'{rule}' could not match '{text}' at {range}")]
pub struct ParseError {
    pub rule: String,
    pub range: DocRange,
    pub text: String,
}

/// Conditions that abort a parse.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseFatal {
    #[error("parse node pool exhausted ({limit} nodes)")]
    NodePoolExhausted { limit: usize },
    #[error("grammar has no 'root-command' rule")]
    NoRootRule,
    #[error("grammar has {} definition error(s)", .errors.len())]
    UnusableGrammar { errors: Vec<DefinitionError> },
    #[error("source not found: {path}")]
    SourceNotFound { path: String },
    #[error("backtrack needs more than {recall} words of history")]
    HistoryExhausted { recall: usize },
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("cannot encode configuration: {0}")]
    Encode(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceId;

    #[test]
    fn definition_error_display_names_rule() {
        let e = DefinitionError::new(Stage::Resolve, Some("platform.body"), "unresolved 'x'");
        assert_eq!(e.to_string(), "resolve error in 'platform.body': unresolved 'x'");
        let bare = DefinitionError::syntax(3, "unexpected ')'");
        assert_eq!(bare.to_string(), "syntax error: unexpected ')'");
    }

    #[test]
    fn definition_error_json_has_all_fields() {
        let e = DefinitionError::new(Stage::Check, None, "bad");
        let v = e.to_json_value();
        assert_eq!(v["stage"], "check");
        assert!(v["rule"].is_null());
        assert!(v["line"].is_null());
    }

    #[test]
    fn parse_error_display() {
        let e = ParseError {
            rule: "root-command".into(),
            range: DocRange::new(SourceId(0), 9, 21),
            text: "end_platform".into(),
        };
        assert_eq!(
            e.to_string(),
            "'root-command' could not match 'end_platform' at #0[9..21)"
        );
    }
}
