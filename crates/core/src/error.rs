use crate::span::Span;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Stable diagnostic codes. A code is never reused for an unrelated
/// condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Code {
    UndefinedReference,
    UseBeforeDefinition,
    DuplicateDefinition,
    TypeMismatch,
    ImportNotFound,
    CircularImport,
    Syntax,
    IndentationMismatch,
    InvalidGuardrailContext,
    MissingRequiredProperty,
    CircularReference,
    InvalidParallelStatement,
    UnboundedLoop,
    DelegateAndUse,
    Internal,
}

impl Code {
    pub const ALL: [Code; 15] = [
        Code::UndefinedReference,
        Code::UseBeforeDefinition,
        Code::DuplicateDefinition,
        Code::TypeMismatch,
        Code::ImportNotFound,
        Code::CircularImport,
        Code::Syntax,
        Code::IndentationMismatch,
        Code::InvalidGuardrailContext,
        Code::MissingRequiredProperty,
        Code::CircularReference,
        Code::InvalidParallelStatement,
        Code::UnboundedLoop,
        Code::DelegateAndUse,
        Code::Internal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Code::UndefinedReference => "E0001",
            Code::UseBeforeDefinition => "E0002",
            Code::DuplicateDefinition => "E0003",
            Code::TypeMismatch => "E0004",
            Code::ImportNotFound => "E0005",
            Code::CircularImport => "E0006",
            Code::Syntax => "E0007",
            Code::IndentationMismatch => "E0008",
            Code::InvalidGuardrailContext => "E0009",
            Code::MissingRequiredProperty => "E0010",
            Code::CircularReference => "E0011",
            Code::InvalidParallelStatement => "E0012",
            Code::UnboundedLoop => "W0001",
            Code::DelegateAndUse => "W0002",
            Code::Internal => "ICE",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Code::UnboundedLoop | Code::DelegateAndUse => Severity::Warning,
            Code::Internal => Severity::Internal,
            _ => Severity::Error,
        }
    }

    /// Short registry title, used in documentation and tooling.
    pub fn title(self) -> &'static str {
        match self {
            Code::UndefinedReference => "undefined reference",
            Code::UseBeforeDefinition => "variable used before definition",
            Code::DuplicateDefinition => "duplicate definition",
            Code::TypeMismatch => "type mismatch",
            Code::ImportNotFound => "import not found",
            Code::CircularImport => "circular import",
            Code::Syntax => "syntax error",
            Code::IndentationMismatch => "indentation mismatch",
            Code::InvalidGuardrailContext => "invalid guardrail context",
            Code::MissingRequiredProperty => "missing required property",
            Code::CircularReference => "circular reference",
            Code::InvalidParallelStatement => "invalid statement in parallel block",
            Code::UnboundedLoop => "loop without bound",
            Code::DelegateAndUse => "agent has both delegate and use",
            Code::Internal => "internal compiler error",
        }
    }

    pub fn parse(s: &str) -> Option<Code> {
        Code::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Code {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Code {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Code::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown diagnostic code '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Internal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Internal => "internal error",
        })
    }
}

/// A secondary location attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub file: String,
    pub span: Span,
    pub message: String,
}

/// A compiler diagnostic. Value object; collected into an ordered list per
/// compilation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: Code,
    pub severity: Severity,
    pub message: String,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(code: Code, file: &str, span: Option<Span>, message: impl Into<String>) -> Self {
        Diagnostic {
            code,
            severity: code.severity(),
            message: message.into(),
            file: file.to_owned(),
            span,
            labels: Vec::new(),
            help: None,
        }
    }

    pub fn lex(code: Code, file: &str, span: Span, message: impl Into<String>) -> Self {
        Diagnostic::new(code, file, Some(span), message)
    }

    pub fn syntax(file: &str, span: Span, message: impl Into<String>) -> Self {
        Diagnostic::new(Code::Syntax, file, Some(span), message)
    }

    pub fn internal(file: &str, span: Option<Span>, message: impl Into<String>) -> Self {
        Diagnostic::new(Code::Internal, file, span, message)
    }

    pub fn with_label(mut self, file: &str, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(Label {
            file: file.to_owned(),
            span,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Errors and internal errors block compilation; warnings never do.
    pub fn is_error(&self) -> bool {
        self.severity != Severity::Warning
    }

    pub fn line(&self) -> u32 {
        self.span.map_or(0, |s| s.start.line)
    }

    pub fn column(&self) -> u32 {
        self.span.map_or(0, |s| s.start.column)
    }

    /// Machine-oriented form with the stable field set.
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "code":     self.code.as_str(),
            "severity": self.severity,
            "message":  self.message,
            "file":     self.file,
            "line":     self.line(),
            "column":   self.column(),
            "help":     self.help,
        })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}[{}]: {}",
            self.file,
            self.line(),
            self.column(),
            self.severity,
            self.code,
            self.message
        )
    }
}

impl std::error::Error for Diagnostic {}
