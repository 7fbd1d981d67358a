//! Abstract syntax tree for agentflow source files.
//!
//! Produced by the transformer from a parse tree and consumed, read-only, by
//! the analyzer and the code generator. Declarations carry a `Provenance`
//! (file + span) so diagnostics and source maps can point back into the
//! file a declaration came from, including imported files.

use crate::span::Span;
use serde::Serialize;

// ──────────────────────────────────────────────
// Provenance
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub file: String,
    pub span: Span,
}

/// A name as written in the source, with its location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ──────────────────────────────────────────────
// Compilation unit
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompilationUnit {
    pub file: String,
    pub imports: Vec<ImportDecl>,
    pub declarations: Vec<Declaration>,
}

impl CompilationUnit {
    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Model(m) => Some(m),
            _ => None,
        })
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentDef> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Agent(a) => Some(a),
            _ => None,
        })
    }

    pub fn flows(&self) -> impl Iterator<Item = &FlowDef> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Flow(f) => Some(f),
            _ => None,
        })
    }

    pub fn prompts(&self) -> impl Iterator<Item = &PromptDef> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Prompt(p) => Some(p),
            _ => None,
        })
    }

    pub fn handlers(&self) -> impl Iterator<Item = &HandlerDef> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Handler(h) => Some(h),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportDecl {
    pub path: String,
    pub prov: Provenance,
}

// ──────────────────────────────────────────────
// Declarations
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Model,
    Tool,
    Schema,
    Prompt,
    Agent,
    Flow,
    Handler,
    Policy,
    Retry,
    Timeout,
}

impl DeclKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeclKind::Model => "model",
            DeclKind::Tool => "tool",
            DeclKind::Schema => "schema",
            DeclKind::Prompt => "prompt",
            DeclKind::Agent => "agent",
            DeclKind::Flow => "flow",
            DeclKind::Handler => "handler",
            DeclKind::Policy => "policy",
            DeclKind::Retry => "retry",
            DeclKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for DeclKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Declaration {
    Model(ModelDef),
    Tool(ToolDef),
    Schema(SchemaDef),
    Prompt(PromptDef),
    Agent(AgentDef),
    Flow(FlowDef),
    Handler(HandlerDef),
    Policy(PolicyDef),
    Retry(RetryDef),
    Timeout(TimeoutDef),
}

impl Declaration {
    /// Declared name; handlers are named by the event they handle.
    pub fn name(&self) -> &Ident {
        match self {
            Declaration::Model(d) => &d.name,
            Declaration::Tool(d) => &d.name,
            Declaration::Schema(d) => &d.name,
            Declaration::Prompt(d) => &d.name,
            Declaration::Agent(d) => &d.name,
            Declaration::Flow(d) => &d.name,
            Declaration::Handler(d) => &d.event,
            Declaration::Policy(d) => &d.name,
            Declaration::Retry(d) => &d.name,
            Declaration::Timeout(d) => &d.name,
        }
    }

    pub fn kind(&self) -> DeclKind {
        match self {
            Declaration::Model(_) => DeclKind::Model,
            Declaration::Tool(_) => DeclKind::Tool,
            Declaration::Schema(_) => DeclKind::Schema,
            Declaration::Prompt(_) => DeclKind::Prompt,
            Declaration::Agent(_) => DeclKind::Agent,
            Declaration::Flow(_) => DeclKind::Flow,
            Declaration::Handler(_) => DeclKind::Handler,
            Declaration::Policy(_) => DeclKind::Policy,
            Declaration::Retry(_) => DeclKind::Retry,
            Declaration::Timeout(_) => DeclKind::Timeout,
        }
    }

    pub fn prov(&self) -> &Provenance {
        match self {
            Declaration::Model(d) => &d.prov,
            Declaration::Tool(d) => &d.prov,
            Declaration::Schema(d) => &d.prov,
            Declaration::Prompt(d) => &d.prov,
            Declaration::Agent(d) => &d.prov,
            Declaration::Flow(d) => &d.prov,
            Declaration::Handler(d) => &d.prov,
            Declaration::Policy(d) => &d.prov,
            Declaration::Retry(d) => &d.prov,
            Declaration::Timeout(d) => &d.prov,
        }
    }
}

/// `key: value` entry of a long-form model, tool or policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub key: Ident,
    pub value: Expr,
}

pub fn find_property<'p>(props: &'p [Property], key: &str) -> Option<&'p Property> {
    props.iter().find(|p| p.key.name == key)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDef {
    pub name: Ident,
    /// Set by the short form `provider/name`; the long form carries both as
    /// properties.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub properties: Vec<Property>,
    pub prov: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Builtin,
    Mcp,
    Http,
}

impl ToolKind {
    pub fn parse(s: &str) -> Option<ToolKind> {
        match s {
            "builtin" => Some(ToolKind::Builtin),
            "mcp" => Some(ToolKind::Mcp),
            "http" => Some(ToolKind::Http),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::Builtin => "builtin",
            ToolKind::Mcp => "mcp",
            ToolKind::Http => "http",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDef {
    pub name: Ident,
    pub kind: Option<ToolKind>,
    pub target: Option<String>,
    pub properties: Vec<Property>,
    pub prov: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TypeRef {
    Named { name: String, span: Span },
    List { item: Box<TypeRef> },
    Optional { inner: Box<TypeRef> },
}

impl TypeRef {
    /// The named type at the bottom of any list/optional wrappers.
    pub fn base(&self) -> (&str, Span) {
        match self {
            TypeRef::Named { name, span } => (name, *span),
            TypeRef::List { item } => item.base(),
            TypeRef::Optional { inner } => inner.base(),
        }
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeRef::Named { name, .. } => f.write_str(name),
            TypeRef::List { item } => write!(f, "list[{}]", item),
            TypeRef::Optional { inner } => write!(f, "{}?", inner),
        }
    }
}

/// Scalar type names a schema field or prompt may use without declaring
/// them.
pub const PRIMITIVE_TYPES: [&str; 6] = ["string", "int", "float", "bool", "any", "object"];

/// Functions callable from expressions, with their minimum and maximum
/// argument counts.
pub const BUILTIN_FUNCTIONS: [(&str, usize, usize); 11] = [
    ("len", 1, 1),
    ("lower", 1, 1),
    ("upper", 1, 1),
    ("trim", 1, 1),
    ("str", 1, 1),
    ("int", 1, 1),
    ("float", 1, 1),
    ("keys", 1, 1),
    ("values", 1, 1),
    ("join", 1, 2),
    ("round", 1, 2),
];

/// Variables the runtime binds before a flow body runs.
pub const FLOW_BUILTINS: [&str; 1] = ["input_prompt"];

/// Variables the runtime binds before a handler body runs.
pub const HANDLER_BUILTINS: [&str; 2] = ["input_prompt", "message"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaField {
    pub name: Ident,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDef {
    pub name: Ident,
    pub fields: Vec<SchemaField>,
    pub prov: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptDef {
    pub name: Ident,
    pub model: Option<Ident>,
    pub expecting: Option<TypeRef>,
    /// Template text; `{{name}}` composes another prompt, `$var` and
    /// `${var}` are filled in by the runtime.
    pub body: String,
    pub body_span: Span,
    pub prov: Provenance,
}

impl PromptDef {
    /// Names composed with `{{name}}`, in order of appearance.
    pub fn compositions(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut rest = self.body.as_str();
        while let Some(start) = rest.find("{{") {
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let name = after[..end].trim();
                    if !name.is_empty() {
                        out.push(name.to_owned());
                    }
                    rest = &after[end + 2..];
                }
                None => break,
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationOp {
    /// `~`: case- and whitespace-insensitive equality
    Normalized,
    Exact,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationRule {
    pub op: EscalationOp,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "prop", rename_all = "lowercase")]
pub enum AgentProp {
    Model { model: Ident, span: Span },
    Instruction { prompt: Ident, span: Span },
    Description { text: String, span: Span },
    Tools { tools: Vec<Ident>, span: Span },
    Delegate { agents: Vec<Ident>, span: Span },
    Use { agents: Vec<Ident>, span: Span },
    Retry { policy: Ident, span: Span },
    Timeout { policy: Ident, span: Span },
    Escalate { rule: EscalationRule, span: Span },
}

impl AgentProp {
    pub fn key(&self) -> &'static str {
        match self {
            AgentProp::Model { .. } => "model",
            AgentProp::Instruction { .. } => "instruction",
            AgentProp::Description { .. } => "description",
            AgentProp::Tools { .. } => "tools",
            AgentProp::Delegate { .. } => "delegate",
            AgentProp::Use { .. } => "use",
            AgentProp::Retry { .. } => "retry",
            AgentProp::Timeout { .. } => "timeout",
            AgentProp::Escalate { .. } => "escalate",
        }
    }

    pub fn span(&self) -> Span {
        match self {
            AgentProp::Model { span, .. }
            | AgentProp::Instruction { span, .. }
            | AgentProp::Description { span, .. }
            | AgentProp::Tools { span, .. }
            | AgentProp::Delegate { span, .. }
            | AgentProp::Use { span, .. }
            | AgentProp::Retry { span, .. }
            | AgentProp::Timeout { span, .. }
            | AgentProp::Escalate { span, .. } => *span,
        }
    }

    /// List-valued properties may repeat; every other key may appear once.
    pub fn is_single_valued(&self) -> bool {
        !matches!(
            self,
            AgentProp::Tools { .. } | AgentProp::Delegate { .. } | AgentProp::Use { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentDef {
    pub name: Ident,
    pub props: Vec<AgentProp>,
    pub prov: Provenance,
}

impl AgentDef {
    pub fn model(&self) -> Option<&Ident> {
        self.props.iter().find_map(|p| match p {
            AgentProp::Model { model, .. } => Some(model),
            _ => None,
        })
    }

    pub fn instruction(&self) -> Option<&Ident> {
        self.props.iter().find_map(|p| match p {
            AgentProp::Instruction { prompt, .. } => Some(prompt),
            _ => None,
        })
    }

    pub fn description(&self) -> Option<&str> {
        self.props.iter().find_map(|p| match p {
            AgentProp::Description { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn tools(&self) -> impl Iterator<Item = &Ident> {
        self.props.iter().flat_map(|p| match p {
            AgentProp::Tools { tools, .. } => tools.as_slice(),
            _ => &[] as &[Ident],
        })
    }

    pub fn delegates(&self) -> impl Iterator<Item = &Ident> {
        self.props.iter().flat_map(|p| match p {
            AgentProp::Delegate { agents, .. } => agents.as_slice(),
            _ => &[] as &[Ident],
        })
    }

    pub fn uses(&self) -> impl Iterator<Item = &Ident> {
        self.props.iter().flat_map(|p| match p {
            AgentProp::Use { agents, .. } => agents.as_slice(),
            _ => &[] as &[Ident],
        })
    }

    pub fn retry(&self) -> Option<&Ident> {
        self.props.iter().find_map(|p| match p {
            AgentProp::Retry { policy, .. } => Some(policy),
            _ => None,
        })
    }

    pub fn timeout(&self) -> Option<&Ident> {
        self.props.iter().find_map(|p| match p {
            AgentProp::Timeout { policy, .. } => Some(policy),
            _ => None,
        })
    }

    pub fn escalation(&self) -> Option<&EscalationRule> {
        self.props.iter().find_map(|p| match p {
            AgentProp::Escalate { rule, .. } => Some(rule),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowDef {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: Vec<Stmt>,
    pub prov: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerTiming {
    On,
    After,
}

impl HandlerTiming {
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerTiming::On => "on",
            HandlerTiming::After => "after",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerDef {
    pub timing: HandlerTiming,
    pub event: Ident,
    pub body: Vec<Stmt>,
    pub prov: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDef {
    pub name: Ident,
    pub properties: Vec<Property>,
    pub prov: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryDef {
    pub name: Ident,
    pub attempts: i64,
    pub backoff: Option<String>,
    pub prov: Provenance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeoutDef {
    pub name: Ident,
    pub value: f64,
    pub unit: String,
    pub prov: Provenance,
}

// ──────────────────────────────────────────────
// Statements
// ──────────────────────────────────────────────

/// Assignment target: a variable with an optional property path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub var: String,
    pub path: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Agent,
    Flow,
    /// `run NAME`: the analyzer decides from what NAME is bound to.
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OnEscalate {
    Return { value: Option<Expr> },
    Continue,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "guard", rename_all = "lowercase")]
pub enum Guardrail {
    Mask { entity: Ident },
    Block { condition: Expr },
    Warn { condition: Expr },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchArm {
    pub pattern: Literal,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum Stmt {
    Assignment {
        target: Target,
        value: Expr,
        span: Span,
    },
    Run {
        target: Option<Target>,
        kind: RunKind,
        callee: Ident,
        args: Vec<Expr>,
        on_escalate: Option<OnEscalate>,
        span: Span,
    },
    Call {
        target: Option<Target>,
        prompt: Ident,
        args: Vec<Expr>,
        model: Option<Ident>,
        span: Span,
    },
    ForLoop {
        var: Ident,
        iterable: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    Parallel {
        body: Vec<Stmt>,
        span: Span,
    },
    Loop {
        max: Option<i64>,
        body: Vec<Stmt>,
        span: Span,
    },
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        span: Span,
    },
    Match {
        subject: Expr,
        arms: Vec<MatchArm>,
        default: Option<Vec<Stmt>>,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Push {
        value: Expr,
        target: Target,
        span: Span,
    },
    Escalate {
        to: Option<Ident>,
        payload: Option<Expr>,
        span: Span,
    },
    Guardrail {
        guard: Guardrail,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Assignment { span, .. }
            | Stmt::Run { span, .. }
            | Stmt::Call { span, .. }
            | Stmt::ForLoop { span, .. }
            | Stmt::Parallel { span, .. }
            | Stmt::Loop { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Match { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Push { span, .. }
            | Stmt::Escalate { span, .. }
            | Stmt::Guardrail { span, .. } => *span,
        }
    }

    /// Statement keyword, used in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            Stmt::Assignment { .. } => "assignment",
            Stmt::Run { .. } => "run",
            Stmt::Call { .. } => "call llm",
            Stmt::ForLoop { .. } => "for",
            Stmt::Parallel { .. } => "parallel",
            Stmt::Loop { .. } => "loop",
            Stmt::If { .. } => "if",
            Stmt::Match { .. } => "match",
            Stmt::Return { .. } => "return",
            Stmt::Push { .. } => "push",
            Stmt::Escalate { .. } => "escalate",
            Stmt::Guardrail { guard, .. } => match guard {
                Guardrail::Mask { .. } => "mask",
                Guardrail::Block { .. } => "block",
                Guardrail::Warn { .. } => "warn",
            },
        }
    }
}

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// `~`
    NormEq,
    Contains,
    Add,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "or",
            BinOp::And => "and",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::NormEq => "~",
            BinOp::Contains => "contains",
            BinOp::Add => "+",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum Expr {
    VarRef {
        name: String,
        span: Span,
    },
    Literal {
        value: Literal,
        span: Span,
    },
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    PropertyAccess {
        object: Box<Expr>,
        property: String,
        span: Span,
    },
    FunctionCall {
        name: Ident,
        args: Vec<Expr>,
        span: Span,
    },
    ObjectLiteral {
        entries: Vec<(String, Expr)>,
        span: Span,
    },
    ListLiteral {
        items: Vec<Expr>,
        span: Span,
    },
    /// `.field` inside a filter condition
    ImplicitProperty {
        property: String,
        span: Span,
    },
    Filter {
        source: Box<Expr>,
        condition: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::VarRef { span, .. }
            | Expr::Literal { span, .. }
            | Expr::BinaryOp { span, .. }
            | Expr::UnaryOp { span, .. }
            | Expr::PropertyAccess { span, .. }
            | Expr::FunctionCall { span, .. }
            | Expr::ObjectLiteral { span, .. }
            | Expr::ListLiteral { span, .. }
            | Expr::ImplicitProperty { span, .. }
            | Expr::Filter { span, .. } => *span,
        }
    }

    /// Visit this expression and every sub-expression, parents first.
    pub fn walk<'e>(&'e self, f: &mut impl FnMut(&'e Expr)) {
        f(self);
        match self {
            Expr::VarRef { .. } | Expr::Literal { .. } | Expr::ImplicitProperty { .. } => {}
            Expr::BinaryOp { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::UnaryOp { operand, .. } => operand.walk(f),
            Expr::PropertyAccess { object, .. } => object.walk(f),
            Expr::FunctionCall { args, .. } => args.iter().for_each(|a| a.walk(f)),
            Expr::ObjectLiteral { entries, .. } => entries.iter().for_each(|(_, v)| v.walk(f)),
            Expr::ListLiteral { items, .. } => items.iter().for_each(|i| i.walk(f)),
            Expr::Filter {
                source, condition, ..
            } => {
                source.walk(f);
                condition.walk(f);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    fn prompt(body: &str) -> PromptDef {
        PromptDef {
            name: Ident {
                name: "p".into(),
                span: Span::point(1, 8),
            },
            model: None,
            expecting: None,
            body: body.into(),
            body_span: Span::point(1, 11),
            prov: Provenance {
                file: "p.af".into(),
                span: Span::point(1, 1),
            },
        }
    }

    #[test]
    fn compositions_skip_runtime_variables() {
        let p = prompt("Hi $name, {{ tone }} and ${other} then {{rules}} {{unterminated");
        assert_eq!(p.compositions(), vec!["tone".to_string(), "rules".to_string()]);
    }

    #[test]
    fn type_ref_display_and_base() {
        let span = Span::new(Position::new(2, 5), Position::new(2, 11));
        let ty = TypeRef::Optional {
            inner: Box::new(TypeRef::List {
                item: Box::new(TypeRef::Named {
                    name: "Finding".into(),
                    span,
                }),
            }),
        };
        assert_eq!(ty.to_string(), "list[Finding]?");
        assert_eq!(ty.base(), ("Finding", span));
    }

    #[test]
    fn walk_visits_nested_expressions() {
        let leaf = |name: &str| Expr::VarRef {
            name: name.into(),
            span: Span::point(1, 1),
        };
        let expr = Expr::Filter {
            source: Box::new(leaf("items")),
            condition: Box::new(Expr::BinaryOp {
                op: BinOp::Gt,
                left: Box::new(Expr::ImplicitProperty {
                    property: "score".into(),
                    span: Span::point(1, 1),
                }),
                right: Box::new(leaf("limit")),
                span: Span::point(1, 1),
            }),
            span: Span::point(1, 1),
        };
        let mut vars = Vec::new();
        expr.walk(&mut |e| {
            if let Expr::VarRef { name, .. } = e {
                vars.push(name.as_str());
            }
        });
        assert_eq!(vars, vec!["items", "limit"]);
    }
}
