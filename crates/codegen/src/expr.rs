//! Expression emission.
//!
//! Every binary operation is parenthesized, so the Python precedence rules
//! never come into play. Variables read from `ctx.vars`; names that are
//! not local but name a declaration become string literals, which is how
//! the runtime refers to agents, prompts and tools.

use crate::python::{py_float, py_str};
use agentflow_core::ast::{BinOp, DeclKind, Expr, Literal, UnaryOp};
use std::collections::{HashMap, HashSet};

pub struct ExprEmitter<'a> {
    pub locals: &'a HashSet<String>,
    pub globals: &'a HashMap<String, DeclKind>,
}

impl ExprEmitter<'_> {
    pub fn emit(&self, expr: &Expr) -> String {
        self.emit_in(expr, &mut Vec::new())
    }

    /// `items` holds the per-item bindings of the enclosing filters,
    /// innermost last.
    fn emit_in(&self, expr: &Expr, items: &mut Vec<String>) -> String {
        match expr {
            Expr::VarRef { name, .. } => self.var(name),
            Expr::Literal { value, .. } => literal(value),
            Expr::BinaryOp {
                op, left, right, ..
            } => {
                let l = self.emit_in(left, items);
                let r = self.emit_in(right, items);
                match op {
                    BinOp::NormEq => format!("_norm_eq({}, {})", l, r),
                    BinOp::Contains => format!("_contains({}, {})", l, r),
                    BinOp::Add => format!("_add({}, {})", l, r),
                    BinOp::Or => format!("({} or {})", l, r),
                    BinOp::And => format!("({} and {})", l, r),
                    BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
                        format!("({} {} {})", l, op.symbol(), r)
                    }
                }
            }
            Expr::UnaryOp {
                op: UnaryOp::Not,
                operand,
                ..
            } => format!("(not {})", self.emit_in(operand, items)),
            Expr::PropertyAccess {
                object, property, ..
            } => format!("_prop({}, {})", self.emit_in(object, items), py_str(property)),
            Expr::FunctionCall { name, args, .. } => {
                let args: Vec<String> = args.iter().map(|a| self.emit_in(a, items)).collect();
                builtin_call(&name.name, &args)
            }
            Expr::ObjectLiteral { entries, .. } => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", py_str(k), self.emit_in(v, items)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Expr::ListLiteral { items: elems, .. } => {
                let parts: Vec<String> = elems.iter().map(|e| self.emit_in(e, items)).collect();
                format!("[{}]", parts.join(", "))
            }
            Expr::ImplicitProperty { property, .. } => match items.last() {
                Some(item) => format!("_prop({}, {})", item, py_str(property)),
                None => "None".to_owned(),
            },
            Expr::Filter {
                source, condition, ..
            } => {
                let src = self.emit_in(source, items);
                let item = match items.len() {
                    0 => "_item".to_owned(),
                    n => format!("_item{}", n),
                };
                items.push(item.clone());
                let cond = self.emit_in(condition, items);
                items.pop();
                format!("[{item} for {item} in ({src} or []) if {cond}]")
            }
        }
    }

    fn var(&self, name: &str) -> String {
        if !self.locals.contains(name) && self.globals.contains_key(name) {
            py_str(name)
        } else {
            format!("ctx.vars[{}]", py_str(name))
        }
    }
}

pub fn literal(value: &Literal) -> String {
    match value {
        Literal::Str(s) => py_str(s),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => py_float(*f),
        Literal::Bool(true) => "True".to_owned(),
        Literal::Bool(false) => "False".to_owned(),
        Literal::Null => "None".to_owned(),
    }
}

fn builtin_call(name: &str, args: &[String]) -> String {
    let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or("None");
    match name {
        "len" => format!("len({} or [])", arg(0)),
        "lower" => format!("str({}).lower()", arg(0)),
        "upper" => format!("str({}).upper()", arg(0)),
        "trim" => format!("str({}).strip()", arg(0)),
        "str" => format!("str({})", arg(0)),
        "int" => format!("int({})", arg(0)),
        "float" => format!("float({})", arg(0)),
        "keys" => format!("list(({} or {{}}).keys())", arg(0)),
        "values" => format!("list(({} or {{}}).values())", arg(0)),
        "join" => {
            let sep = if args.len() > 1 { arg(1) } else { "\"\"" };
            format!("str({}).join(map(str, {} or []))", sep, arg(0))
        }
        "round" if args.len() > 1 => format!("round({}, {})", arg(0), arg(1)),
        "round" => format!("round({})", arg(0)),
        other => format!("{}({})", other, args.join(", ")),
    }
}

/// Static value of a declaration property, as a Python literal. Bare names
/// become strings; anything computed becomes `None`.
pub fn const_value(expr: &Expr) -> String {
    match expr {
        Expr::Literal { value, .. } => literal(value),
        Expr::VarRef { name, .. } => py_str(name),
        Expr::ListLiteral { items, .. } => {
            let parts: Vec<String> = items.iter().map(const_value).collect();
            format!("[{}]", parts.join(", "))
        }
        Expr::ObjectLiteral { entries, .. } => {
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", py_str(k), const_value(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
        _ => "None".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::ast::Ident;
    use agentflow_core::Span;

    fn sp() -> Span {
        Span::point(1, 1)
    }

    fn var(name: &str) -> Expr {
        Expr::VarRef {
            name: name.into(),
            span: sp(),
        }
    }

    fn int(i: i64) -> Expr {
        Expr::Literal {
            value: Literal::Int(i),
            span: sp(),
        }
    }

    fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(l),
            right: Box::new(r),
            span: sp(),
        }
    }

    fn implicit(p: &str) -> Expr {
        Expr::ImplicitProperty {
            property: p.into(),
            span: sp(),
        }
    }

    fn emitter<'a>(
        locals: &'a HashSet<String>,
        globals: &'a HashMap<String, DeclKind>,
    ) -> ExprEmitter<'a> {
        ExprEmitter { locals, globals }
    }

    #[test]
    fn filter_binds_implicit_item() {
        let locals: HashSet<String> = ["findings".to_string()].into();
        let globals = HashMap::new();
        let e = Expr::Filter {
            source: Box::new(var("findings")),
            condition: Box::new(bin(BinOp::Gte, implicit("confidence"), int(80))),
            span: sp(),
        };
        assert_eq!(
            emitter(&locals, &globals).emit(&e),
            "[_item for _item in (ctx.vars[\"findings\"] or []) if (_prop(_item, \"confidence\") >= 80)]"
        );
    }

    #[test]
    fn nested_filters_get_distinct_items() {
        let locals = HashSet::new();
        let globals = HashMap::new();
        let inner = Expr::Filter {
            source: Box::new(Expr::PropertyAccess {
                object: Box::new(implicit("ignored")),
                property: "tags".into(),
                span: sp(),
            }),
            condition: Box::new(bin(BinOp::NormEq, implicit("name"), var("wanted"))),
            span: sp(),
        };
        let outer = Expr::Filter {
            source: Box::new(var("docs")),
            condition: Box::new(Expr::FunctionCall {
                name: Ident {
                    name: "len".into(),
                    span: sp(),
                },
                args: vec![inner],
                span: sp(),
            }),
            span: sp(),
        };
        let out = emitter(&locals, &globals).emit(&outer);
        assert!(out.starts_with("[_item for _item in (ctx.vars[\"docs\"] or []) if len([_item1 for _item1 in (_prop(_prop(_item, \"ignored\"), \"tags\") or []) if _norm_eq(_prop(_item1, \"name\"), ctx.vars[\"wanted\"])] or [])]"), "{}", out);
    }

    #[test]
    fn global_names_become_strings_unless_shadowed() {
        let mut locals = HashSet::new();
        let globals: HashMap<String, DeclKind> = [("helper".to_string(), DeclKind::Agent)].into();
        assert_eq!(emitter(&locals, &globals).emit(&var("helper")), "\"helper\"");
        locals.insert("helper".to_string());
        assert_eq!(
            emitter(&locals, &globals).emit(&var("helper")),
            "ctx.vars[\"helper\"]"
        );
    }

    #[test]
    fn builtins_map_to_python() {
        assert_eq!(builtin_call("join", &["x".into()]), "str(\"\").join(map(str, x or []))");
        assert_eq!(builtin_call("round", &["x".into(), "2".into()]), "round(x, 2)");
        assert_eq!(builtin_call("keys", &["x".into()]), "list((x or {}).keys())");
    }

    #[test]
    fn property_values_are_constants() {
        let obj = Expr::ObjectLiteral {
            entries: vec![("tier".into(), var("gold")), ("max".into(), int(3))],
            span: sp(),
        };
        assert_eq!(const_value(&obj), "{\"tier\": \"gold\", \"max\": 3}");
        assert_eq!(const_value(&bin(BinOp::Add, int(1), int(2))), "None");
    }
}
