//! Parse tree → AST.
//!
//! A structural, non-validating mapping: grammar-only wrapper nodes are
//! collapsed, spans are carried over unchanged and `$name` / `name` variable
//! spellings both become `Expr::VarRef { name }`. A tree shape the parser
//! cannot produce is reported as an internal diagnostic, never a panic.

use crate::ast::*;
use crate::cst::{ParseNode, Rule};
use crate::error::Diagnostic;
use crate::lexer::{Token, TokenKind};

mod body;

/// Build the compilation unit for one parsed file.
pub fn transform(tree: &ParseNode, file: &str) -> Result<CompilationUnit, Diagnostic> {
    let t = Transformer { file };
    if tree.rule != Rule::File {
        return Err(t.shape(tree, "expected a file node"));
    }
    let mut unit = CompilationUnit {
        file: file.to_owned(),
        imports: Vec::new(),
        declarations: Vec::new(),
    };
    for node in tree.nodes() {
        if node.rule == Rule::Import {
            let path = t.token(node, TokenKind::Str)?;
            unit.imports.push(ImportDecl {
                path: path.text.clone(),
                prov: t.prov(node),
            });
        } else {
            unit.declarations.push(t.declaration(node)?);
        }
    }
    tracing::trace!(
        file,
        declarations = unit.declarations.len(),
        imports = unit.imports.len(),
        "transformed"
    );
    Ok(unit)
}

pub(crate) struct Transformer<'a> {
    file: &'a str,
}

impl Transformer<'_> {
    fn shape(&self, node: &ParseNode, what: &str) -> Diagnostic {
        Diagnostic::internal(
            self.file,
            Some(node.span),
            format!("unexpected {:?} node shape: {}", node.rule, what),
        )
    }

    fn prov(&self, node: &ParseNode) -> Provenance {
        Provenance {
            file: self.file.to_owned(),
            span: node.span,
        }
    }

    fn token<'n>(&self, node: &'n ParseNode, kind: TokenKind) -> Result<&'n Token, Diagnostic> {
        node.tokens_of(kind)
            .next()
            .ok_or_else(|| self.shape(node, &format!("missing {}", kind.describe())))
    }

    /// The `n`th `Name` token directly under `node`. Keywords count.
    fn name_at(&self, node: &ParseNode, n: usize) -> Result<Ident, Diagnostic> {
        node.tokens_of(TokenKind::Name)
            .nth(n)
            .map(ident)
            .ok_or_else(|| self.shape(node, &format!("missing name #{}", n)))
    }

    fn child<'n>(&self, node: &'n ParseNode, rule: Rule) -> Result<&'n ParseNode, Diagnostic> {
        node.find(rule)
            .ok_or_else(|| self.shape(node, &format!("missing {:?}", rule)))
    }

    fn nth_node<'n>(&self, node: &'n ParseNode, n: usize) -> Result<&'n ParseNode, Diagnostic> {
        node.nodes()
            .nth(n)
            .ok_or_else(|| self.shape(node, &format!("missing child node #{}", n)))
    }

    // -- declarations ---------------------------------------------

    fn declaration(&self, node: &ParseNode) -> Result<Declaration, Diagnostic> {
        Ok(match node.rule {
            Rule::Model => Declaration::Model(self.model(node)?),
            Rule::Tool => Declaration::Tool(self.tool(node)?),
            Rule::Schema => Declaration::Schema(self.schema(node)?),
            Rule::Prompt => Declaration::Prompt(self.prompt(node)?),
            Rule::Agent => Declaration::Agent(self.agent(node)?),
            Rule::Flow => Declaration::Flow(self.flow(node)?),
            Rule::Handler => Declaration::Handler(self.handler(node)?),
            Rule::Policy => Declaration::Policy(PolicyDef {
                name: self.name_at(node, 1)?,
                properties: self.props(self.child(node, Rule::Props)?)?,
                prov: self.prov(node),
            }),
            Rule::Retry => Declaration::Retry(self.retry(node)?),
            Rule::Timeout => Declaration::Timeout(self.timeout(node)?),
            _ => return Err(self.shape(node, "not a declaration")),
        })
    }

    fn model(&self, node: &ParseNode) -> Result<ModelDef, Diagnostic> {
        let name = self.name_at(node, 1)?;
        if let Some(model_ref) = node.find(Rule::ModelRef) {
            let (provider, model) = self.model_ref(model_ref)?;
            return Ok(ModelDef {
                name,
                provider,
                model: Some(model),
                properties: Vec::new(),
                prov: self.prov(node),
            });
        }
        let properties = self.props(self.child(node, Rule::Props)?)?;
        let provider = find_property(&properties, "provider").and_then(|p| text_of(&p.value));
        let model = find_property(&properties, "name").and_then(|p| text_of(&p.value));
        Ok(ModelDef {
            name,
            provider,
            model,
            properties,
            prov: self.prov(node),
        })
    }

    /// `provider/name` or `"provider/name"`; a string without `/` is a bare
    /// model name.
    fn model_ref(&self, node: &ParseNode) -> Result<(Option<String>, String), Diagnostic> {
        if let Some(s) = node.tokens_of(TokenKind::Str).next() {
            return Ok(match s.text.split_once('/') {
                Some((provider, model)) => (Some(provider.to_owned()), model.to_owned()),
                None => (None, s.text.clone()),
            });
        }
        let mut tokens = node.tokens();
        let provider = tokens
            .next()
            .ok_or_else(|| self.shape(node, "empty model reference"))?;
        let model: String = tokens
            .skip_while(|t| t.kind != TokenKind::Slash)
            .skip(1)
            .map(|t| t.text.as_str())
            .collect();
        Ok((Some(provider.text.clone()), model))
    }

    fn tool(&self, node: &ParseNode) -> Result<ToolDef, Diagnostic> {
        let name = self.name_at(node, 1)?;
        if let Some(target) = node.find(Rule::ToolTarget) {
            let kind_word = self.name_at(node, 2)?;
            let kind = ToolKind::parse(&kind_word.name)
                .ok_or_else(|| self.shape(node, "unknown tool kind"))?;
            let target_text: String = match target.tokens_of(TokenKind::Str).next() {
                Some(s) => s.text.clone(),
                None => target.tokens().map(|t| t.text.as_str()).collect(),
            };
            return Ok(ToolDef {
                name,
                kind: Some(kind),
                target: Some(target_text),
                properties: Vec::new(),
                prov: self.prov(node),
            });
        }
        let properties = self.props(self.child(node, Rule::Props)?)?;
        let kind = find_property(&properties, "type")
            .and_then(|p| text_of(&p.value))
            .and_then(|s| ToolKind::parse(&s));
        let target = ["target", "url", "server"]
            .iter()
            .find_map(|key| find_property(&properties, key).and_then(|p| text_of(&p.value)));
        Ok(ToolDef {
            name,
            kind,
            target,
            properties,
            prov: self.prov(node),
        })
    }

    fn props(&self, node: &ParseNode) -> Result<Vec<Property>, Diagnostic> {
        node.nodes()
            .map(|prop| {
                Ok(Property {
                    key: self.name_at(prop, 0)?,
                    value: self.expr(self.nth_node(prop, 0)?)?,
                })
            })
            .collect()
    }

    fn schema(&self, node: &ParseNode) -> Result<SchemaDef, Diagnostic> {
        let fields = node
            .nodes()
            .map(|field| {
                Ok(SchemaField {
                    name: self.name_at(field, 0)?,
                    ty: self.type_ref(self.child(field, Rule::TypeRef)?)?,
                })
            })
            .collect::<Result<Vec<_>, Diagnostic>>()?;
        Ok(SchemaDef {
            name: self.name_at(node, 1)?,
            fields,
            prov: self.prov(node),
        })
    }

    fn type_ref(&self, node: &ParseNode) -> Result<TypeRef, Diagnostic> {
        let base = match node.find(Rule::TypeRef) {
            Some(item) => TypeRef::List {
                item: Box::new(self.type_ref(item)?),
            },
            None => {
                let name = self.name_at(node, 0)?;
                let named = TypeRef::Named {
                    name: name.name,
                    span: name.span,
                };
                if node.tokens_of(TokenKind::LBracket).next().is_some() {
                    TypeRef::List {
                        item: Box::new(named),
                    }
                } else {
                    named
                }
            }
        };
        Ok(if node.tokens_of(TokenKind::Question).next().is_some() {
            TypeRef::Optional {
                inner: Box::new(base),
            }
        } else {
            base
        })
    }

    fn prompt(&self, node: &ParseNode) -> Result<PromptDef, Diagnostic> {
        let mut model = None;
        let mut expecting = None;
        for clause in node.nodes().filter(|n| n.rule == Rule::PromptClause) {
            if clause.has_word("using") {
                model = Some(self.name_at(clause, 2)?);
            } else {
                expecting = Some(self.type_ref(self.child(clause, Rule::TypeRef)?)?);
            }
        }
        let body_token = node
            .tokens()
            .find(|t| matches!(t.kind, TokenKind::Str | TokenKind::RawStr))
            .ok_or_else(|| self.shape(node, "missing prompt body"))?;
        let body = match body_token.kind {
            TokenKind::RawStr => dedent(&body_token.text),
            _ => body_token.text.clone(),
        };
        Ok(PromptDef {
            name: self.name_at(node, 1)?,
            model,
            expecting,
            body,
            body_span: body_token.span,
            prov: self.prov(node),
        })
    }

    fn agent(&self, node: &ParseNode) -> Result<AgentDef, Diagnostic> {
        let props = node
            .nodes()
            .map(|prop| self.agent_prop(prop))
            .collect::<Result<Vec<_>, Diagnostic>>()?;
        Ok(AgentDef {
            name: self.name_at(node, 1)?,
            props,
            prov: self.prov(node),
        })
    }

    fn agent_prop(&self, node: &ParseNode) -> Result<AgentProp, Diagnostic> {
        let key = self.name_at(node, 0)?;
        let span = node.span;
        let names = |n: &ParseNode| -> Result<Vec<Ident>, Diagnostic> {
            Ok(self
                .child(n, Rule::NameList)?
                .tokens_of(TokenKind::Name)
                .map(ident)
                .collect())
        };
        Ok(match key.name.as_str() {
            "model" => AgentProp::Model {
                model: self.name_at(node, 1)?,
                span,
            },
            "instruction" => AgentProp::Instruction {
                prompt: self.name_at(node, 1)?,
                span,
            },
            "description" => AgentProp::Description {
                text: self.token(node, TokenKind::Str)?.text.clone(),
                span,
            },
            "tools" => AgentProp::Tools {
                tools: names(node)?,
                span,
            },
            "delegate" => AgentProp::Delegate {
                agents: names(node)?,
                span,
            },
            "use" => AgentProp::Use {
                agents: names(node)?,
                span,
            },
            "retry" => AgentProp::Retry {
                policy: self.name_at(node, 1)?,
                span,
            },
            "timeout" => AgentProp::Timeout {
                policy: self.name_at(node, 1)?,
                span,
            },
            "escalate" => {
                let op = if node.tokens_of(TokenKind::Tilde).next().is_some() {
                    EscalationOp::Normalized
                } else if node.tokens_of(TokenKind::Eq).next().is_some() {
                    EscalationOp::Exact
                } else if node.has_word("contains") {
                    EscalationOp::Contains
                } else {
                    return Err(self.shape(node, "missing escalation operator"));
                };
                AgentProp::Escalate {
                    rule: EscalationRule {
                        op,
                        text: self.token(node, TokenKind::Str)?.text.clone(),
                    },
                    span,
                }
            }
            _ => return Err(self.shape(node, "unknown agent property")),
        })
    }

    fn flow(&self, node: &ParseNode) -> Result<FlowDef, Diagnostic> {
        let params = match node.find(Rule::Params) {
            Some(params) => params.tokens_of(TokenKind::Var).map(ident).collect(),
            None => Vec::new(),
        };
        Ok(FlowDef {
            name: self.name_at(node, 1)?,
            params,
            body: self.block(self.child(node, Rule::Block)?)?,
            prov: self.prov(node),
        })
    }

    fn handler(&self, node: &ParseNode) -> Result<HandlerDef, Diagnostic> {
        let timing = if node.tokens().next().is_some_and(|t| t.is_word("after")) {
            HandlerTiming::After
        } else {
            HandlerTiming::On
        };
        Ok(HandlerDef {
            timing,
            event: self.name_at(node, 1)?,
            body: self.block(self.child(node, Rule::Block)?)?,
            prov: self.prov(node),
        })
    }

    fn retry(&self, node: &ParseNode) -> Result<RetryDef, Diagnostic> {
        let count = self.token(node, TokenKind::Int)?;
        let attempts = count
            .text
            .parse::<i64>()
            .map_err(|_| self.shape(node, "retry count is not an integer"))?;
        let backoff = if node.tokens_of(TokenKind::Comma).next().is_some() {
            Some(self.name_at(node, 3)?.name)
        } else {
            None
        };
        Ok(RetryDef {
            name: self.name_at(node, 1)?,
            attempts,
            backoff,
            prov: self.prov(node),
        })
    }

    fn timeout(&self, node: &ParseNode) -> Result<TimeoutDef, Diagnostic> {
        let amount = node
            .tokens()
            .find(|t| matches!(t.kind, TokenKind::Int | TokenKind::Float))
            .ok_or_else(|| self.shape(node, "missing timeout value"))?;
        let value = amount
            .text
            .parse::<f64>()
            .map_err(|_| self.shape(node, "timeout value is not a number"))?;
        Ok(TimeoutDef {
            name: self.name_at(node, 1)?,
            value,
            unit: self.name_at(node, 2)?.name,
            prov: self.prov(node),
        })
    }
}

fn ident(t: &Token) -> Ident {
    Ident {
        name: t.text.trim_start_matches('$').to_owned(),
        span: t.span,
    }
}

/// Plain text of a property value written as a bare word or a string.
fn text_of(expr: &Expr) -> Option<String> {
    match expr {
        Expr::VarRef { name, .. } => Some(name.clone()),
        Expr::Literal {
            value: Literal::Str(s),
            ..
        } => Some(s.clone()),
        _ => None,
    }
}

/// Strip the newline after the opening quotes and the indentation common to
/// every non-blank line of a triple-quoted body.
fn dedent(raw: &str) -> String {
    let text = raw.strip_prefix('\n').unwrap_or(raw);
    let text = text.trim_end_matches([' ', '\t']);
    let indent = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let stripped = match (line.get(..indent), line.get(indent..)) {
            (Some(head), Some(rest)) if head.trim().is_empty() => rest,
            _ => line.trim_start(),
        };
        out.push_str(stripped);
    }
    out
}
