//! Concrete parse tree.
//!
//! Every grammar production the parser accepts becomes a `ParseNode` tagged
//! with its `Rule`, keeping all consumed tokens (keywords, punctuation and
//! layout tokens included) in source order. The tree only lives until the
//! AST transformer has consumed it.

use crate::lexer::{Token, TokenKind};
use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    File,
    // Declarations
    Import,
    Model,
    ModelRef,
    Tool,
    ToolTarget,
    Props,
    Property,
    Schema,
    Field,
    TypeRef,
    Prompt,
    PromptClause,
    Agent,
    AgentProp,
    NameList,
    Flow,
    Params,
    Handler,
    Policy,
    Retry,
    Timeout,
    // Statements
    Block,
    Assignment,
    Target,
    RunStmt,
    Run,
    Args,
    OnEscalate,
    CallStmt,
    Call,
    UsingModel,
    For,
    Parallel,
    Loop,
    If,
    Else,
    Match,
    When,
    MatchElse,
    Arm,
    Return,
    Push,
    Escalate,
    Mask,
    Guard,
    // Expressions
    Filter,
    Or,
    And,
    Not,
    Compare,
    Add,
    Member,
    CallExpr,
    Ref,
    Implicit,
    Literal,
    List,
    Object,
    Entry,
    Group,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseChild {
    Node(ParseNode),
    Token(Token),
}

impl From<Token> for ParseChild {
    fn from(t: Token) -> Self {
        ParseChild::Token(t)
    }
}

impl From<ParseNode> for ParseChild {
    fn from(n: ParseNode) -> Self {
        ParseChild::Node(n)
    }
}

impl ParseChild {
    pub fn span(&self) -> Span {
        match self {
            ParseChild::Node(n) => n.span,
            ParseChild::Token(t) => t.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseNode {
    pub rule: Rule,
    pub children: Vec<ParseChild>,
    pub span: Span,
}

impl ParseNode {
    /// Build a node whose span covers its children. Layout tokens carry
    /// zero-width or line-end spans and are left out of the covering span
    /// unless the node has nothing else.
    pub fn new(rule: Rule, children: Vec<ParseChild>) -> Self {
        let mut span: Option<Span> = None;
        for child in &children {
            if let ParseChild::Token(t) = child {
                if matches!(
                    t.kind,
                    TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof
                ) {
                    continue;
                }
            }
            let s = child.span();
            span = Some(span.map_or(s, |acc| acc.to(s)));
        }
        let span = span
            .or_else(|| children.first().map(ParseChild::span))
            .unwrap_or_default();
        ParseNode {
            rule,
            children,
            span,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ParseNode> {
        self.children.iter().filter_map(|c| match c {
            ParseChild::Node(n) => Some(n),
            ParseChild::Token(_) => None,
        })
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.children.iter().filter_map(|c| match c {
            ParseChild::Token(t) => Some(t),
            ParseChild::Node(_) => None,
        })
    }

    /// Direct child tokens of the given kind.
    pub fn tokens_of(&self, kind: TokenKind) -> impl Iterator<Item = &Token> {
        self.tokens().filter(move |t| t.kind == kind)
    }

    pub fn find(&self, rule: Rule) -> Option<&ParseNode> {
        self.nodes().find(|n| n.rule == rule)
    }

    pub fn has_word(&self, word: &str) -> bool {
        self.tokens().any(|t| t.is_word(word))
    }

    /// Number of nodes in the tree, this one included.
    pub fn size(&self) -> usize {
        1 + self.nodes().map(ParseNode::size).sum::<usize>()
    }
}
