use super::{ident, Transformer};
use crate::ast::*;
use crate::cst::{ParseChild, ParseNode, Rule};
use crate::error::Diagnostic;
use crate::lexer::{Token, TokenKind};
use crate::span::Span;

impl Transformer<'_> {
    pub(super) fn block(&self, node: &ParseNode) -> Result<Vec<Stmt>, Diagnostic> {
        if node.rule != Rule::Block {
            return Err(self.shape(node, "expected a block"));
        }
        node.nodes().map(|n| self.stmt(n)).collect()
    }

    fn stmt(&self, node: &ParseNode) -> Result<Stmt, Diagnostic> {
        let span = node.span;
        Ok(match node.rule {
            Rule::Assignment => {
                let target = self.target(self.child(node, Rule::Target)?)?;
                let value = self.nth_node(node, 1)?;
                match value.rule {
                    Rule::Run => self.run(value, Some(target), span)?,
                    Rule::Call => self.call(value, Some(target), span)?,
                    _ => Stmt::Assignment {
                        target,
                        value: self.expr(value)?,
                        span,
                    },
                }
            }
            Rule::RunStmt => self.run(self.child(node, Rule::Run)?, None, span)?,
            Rule::CallStmt => self.call(self.child(node, Rule::Call)?, None, span)?,
            Rule::For => {
                let var = node
                    .tokens()
                    .nth(1)
                    .filter(|t| matches!(t.kind, TokenKind::Var | TokenKind::Name))
                    .map(ident)
                    .ok_or_else(|| self.shape(node, "missing loop variable"))?;
                Stmt::ForLoop {
                    var,
                    iterable: self.expr(self.nth_node(node, 0)?)?,
                    body: self.block(self.child(node, Rule::Block)?)?,
                    span,
                }
            }
            Rule::Parallel => Stmt::Parallel {
                body: self.block(self.child(node, Rule::Block)?)?,
                span,
            },
            Rule::Loop => {
                let max = match node.tokens_of(TokenKind::Int).next() {
                    Some(t) => Some(self.int(node, t)?),
                    None => None,
                };
                Stmt::Loop {
                    max,
                    body: self.block(self.child(node, Rule::Block)?)?,
                    span,
                }
            }
            Rule::If => {
                let else_body = match node.find(Rule::Else) {
                    Some(otherwise) => Some(self.block(self.child(otherwise, Rule::Block)?)?),
                    None => None,
                };
                Stmt::If {
                    condition: self.expr(self.nth_node(node, 0)?)?,
                    then_body: self.block(self.child(node, Rule::Block)?)?,
                    else_body,
                    span,
                }
            }
            Rule::Match => self.match_block(node)?,
            Rule::Return => Stmt::Return {
                value: match node.nodes().next() {
                    Some(value) => Some(self.expr(value)?),
                    None => None,
                },
                span,
            },
            Rule::Push => Stmt::Push {
                value: self.expr(self.nth_node(node, 0)?)?,
                target: self.target(self.child(node, Rule::Target)?)?,
                span,
            },
            Rule::Escalate => {
                // escalate [to NAME] [with expr]: the destination is the
                // token right after `to`, whatever it is spelled.
                let to = match node.children.get(1) {
                    Some(ParseChild::Token(t)) if t.is_word("to") => match node.children.get(2) {
                        Some(ParseChild::Token(dest)) => Some(ident(dest)),
                        _ => return Err(self.shape(node, "missing escalation target")),
                    },
                    _ => None,
                };
                Stmt::Escalate {
                    to,
                    payload: match node.nodes().next() {
                        Some(payload) => Some(self.expr(payload)?),
                        None => None,
                    },
                    span,
                }
            }
            Rule::Mask => Stmt::Guardrail {
                guard: Guardrail::Mask {
                    entity: self.name_at(node, 1)?,
                },
                span,
            },
            Rule::Guard => {
                let condition = self.expr(self.nth_node(node, 0)?)?;
                let guard = if node.tokens().next().is_some_and(|t| t.is_word("block")) {
                    Guardrail::Block { condition }
                } else {
                    Guardrail::Warn { condition }
                };
                Stmt::Guardrail { guard, span }
            }
            _ => return Err(self.shape(node, "not a statement")),
        })
    }

    fn target(&self, node: &ParseNode) -> Result<Target, Diagnostic> {
        let mut tokens = node.tokens();
        let var = tokens
            .next()
            .ok_or_else(|| self.shape(node, "empty target"))?;
        Ok(Target {
            var: ident(var).name,
            path: tokens
                .filter(|t| t.kind == TokenKind::Name)
                .map(|t| t.text.clone())
                .collect(),
            span: node.span,
        })
    }

    fn args(&self, node: &ParseNode) -> Result<Vec<Expr>, Diagnostic> {
        match node.find(Rule::Args) {
            Some(args) => args.nodes().map(|a| self.expr(a)).collect(),
            None => Ok(Vec::new()),
        }
    }

    fn run(&self, node: &ParseNode, target: Option<Target>, span: Span) -> Result<Stmt, Diagnostic> {
        // run [agent|flow] NAME: two or three name tokens.
        let names: Vec<&Token> = node.tokens_of(TokenKind::Name).collect();
        let (kind, callee) = match names.as_slice() {
            [_, callee] => (RunKind::Unspecified, callee),
            [_, kw, callee] if kw.is_word("agent") => (RunKind::Agent, callee),
            [_, kw, callee] if kw.is_word("flow") => (RunKind::Flow, callee),
            _ => return Err(self.shape(node, "malformed run")),
        };
        let on_escalate = match node.find(Rule::OnEscalate) {
            Some(on) if on.has_word("return") => Some(OnEscalate::Return {
                value: match on.nodes().next() {
                    Some(value) => Some(self.expr(value)?),
                    None => None,
                },
            }),
            Some(on) if on.has_word("continue") => Some(OnEscalate::Continue),
            Some(_) => Some(OnEscalate::Abort),
            None => None,
        };
        Ok(Stmt::Run {
            target,
            kind,
            callee: ident(callee),
            args: self.args(node)?,
            on_escalate,
            span,
        })
    }

    fn call(&self, node: &ParseNode, target: Option<Target>, span: Span) -> Result<Stmt, Diagnostic> {
        let model = match node.find(Rule::UsingModel) {
            Some(using) => Some(self.name_at(using, 2)?),
            None => None,
        };
        Ok(Stmt::Call {
            target,
            prompt: self.name_at(node, 2)?,
            args: self.args(node)?,
            model,
            span,
        })
    }

    fn match_block(&self, node: &ParseNode) -> Result<Stmt, Diagnostic> {
        let mut arms = Vec::new();
        let mut default = None;
        for child in node.nodes().skip(1) {
            match child.rule {
                Rule::When => {
                    let literal = self.child(child, Rule::Literal)?;
                    let pattern = match self.expr(literal)? {
                        Expr::Literal { value, .. } => value,
                        _ => return Err(self.shape(child, "pattern is not a literal")),
                    };
                    arms.push(MatchArm {
                        pattern,
                        body: self.arm(self.child(child, Rule::Arm)?)?,
                        span: child.span,
                    });
                }
                Rule::MatchElse => default = Some(self.arm(self.child(child, Rule::Arm)?)?),
                _ => return Err(self.shape(child, "not a match arm")),
            }
        }
        Ok(Stmt::Match {
            subject: self.expr(self.nth_node(node, 0)?)?,
            arms,
            default,
            span: node.span,
        })
    }

    fn arm(&self, node: &ParseNode) -> Result<Vec<Stmt>, Diagnostic> {
        let inner = self.nth_node(node, 0)?;
        if inner.rule == Rule::Block {
            self.block(inner)
        } else {
            Ok(vec![self.stmt(inner)?])
        }
    }

    fn int(&self, node: &ParseNode, t: &Token) -> Result<i64, Diagnostic> {
        t.text
            .parse::<i64>()
            .map_err(|_| self.shape(node, "integer literal out of range"))
    }

    // -- expressions ----------------------------------------------

    pub(super) fn expr(&self, node: &ParseNode) -> Result<Expr, Diagnostic> {
        let span = node.span;
        Ok(match node.rule {
            Rule::Filter => Expr::Filter {
                source: Box::new(self.expr(self.nth_node(node, 0)?)?),
                condition: Box::new(self.expr(self.nth_node(node, 1)?)?),
                span,
            },
            Rule::Or | Rule::And | Rule::Compare | Rule::Add => {
                let op = node
                    .tokens()
                    .next()
                    .and_then(binary_op)
                    .ok_or_else(|| self.shape(node, "missing operator"))?;
                Expr::BinaryOp {
                    op,
                    left: Box::new(self.expr(self.nth_node(node, 0)?)?),
                    right: Box::new(self.expr(self.nth_node(node, 1)?)?),
                    span,
                }
            }
            Rule::Not => Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(self.expr(self.nth_node(node, 0)?)?),
                span,
            },
            Rule::Member => Expr::PropertyAccess {
                object: Box::new(self.expr(self.nth_node(node, 0)?)?),
                property: self.name_at(node, 0)?.name,
                span,
            },
            Rule::CallExpr => Expr::FunctionCall {
                name: self.name_at(node, 0)?,
                args: node.nodes().map(|a| self.expr(a)).collect::<Result<_, _>>()?,
                span,
            },
            Rule::Ref => {
                let t = node
                    .tokens()
                    .next()
                    .ok_or_else(|| self.shape(node, "empty reference"))?;
                Expr::VarRef {
                    name: ident(t).name,
                    span,
                }
            }
            Rule::Implicit => Expr::ImplicitProperty {
                property: self.name_at(node, 0)?.name,
                span,
            },
            Rule::Literal => {
                let t = node
                    .tokens()
                    .next()
                    .ok_or_else(|| self.shape(node, "empty literal"))?;
                let value = match t.kind {
                    TokenKind::Str | TokenKind::RawStr => Literal::Str(t.text.clone()),
                    TokenKind::Int => Literal::Int(self.int(node, t)?),
                    TokenKind::Float => Literal::Float(
                        t.text
                            .parse::<f64>()
                            .map_err(|_| self.shape(node, "malformed number"))?,
                    ),
                    _ if t.is_word("true") => Literal::Bool(true),
                    _ if t.is_word("false") => Literal::Bool(false),
                    _ if t.is_word("null") => Literal::Null,
                    _ => return Err(self.shape(node, "not a literal")),
                };
                Expr::Literal { value, span }
            }
            Rule::List => Expr::ListLiteral {
                items: node.nodes().map(|i| self.expr(i)).collect::<Result<_, _>>()?,
                span,
            },
            Rule::Object => {
                let entries = node
                    .nodes()
                    .map(|entry| {
                        let key = entry
                            .tokens()
                            .next()
                            .ok_or_else(|| self.shape(entry, "missing key"))?;
                        Ok((key.text.clone(), self.expr(self.nth_node(entry, 0)?)?))
                    })
                    .collect::<Result<Vec<_>, Diagnostic>>()?;
                Expr::ObjectLiteral { entries, span }
            }
            Rule::Group => self.expr(self.nth_node(node, 0)?)?,
            _ => return Err(self.shape(node, "not an expression")),
        })
    }
}

fn binary_op(t: &Token) -> Option<BinOp> {
    Some(match t.kind {
        TokenKind::Eq => BinOp::Eq,
        TokenKind::Neq => BinOp::Neq,
        TokenKind::Lt => BinOp::Lt,
        TokenKind::Lte => BinOp::Lte,
        TokenKind::Gt => BinOp::Gt,
        TokenKind::Gte => BinOp::Gte,
        TokenKind::Tilde => BinOp::NormEq,
        TokenKind::Plus => BinOp::Add,
        TokenKind::Name => match t.text.as_str() {
            "or" => BinOp::Or,
            "and" => BinOp::And,
            "contains" => BinOp::Contains,
            _ => return None,
        },
        _ => return None,
    })
}
