use super::{Alt, PResult, Parser};
use crate::cst::{ParseChild, ParseNode, Rule};
use crate::lexer::TokenKind;

type Children = Vec<ParseChild>;

const STATEMENT_START: [&str; 14] = [
    "variable",
    "`run`",
    "`call`",
    "`for`",
    "`parallel`",
    "`loop`",
    "`if`",
    "`match`",
    "`return`",
    "`push`",
    "`escalate`",
    "`mask`",
    "`block`",
    "`warn`",
];

impl<'a> Parser<'a> {
    pub(super) fn parse_block(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![
            self.expect(TokenKind::Indent)?.into(),
            self.parse_statement()?.into(),
        ];
        for stmt in self.many(|p| !p.at(TokenKind::Dedent), Self::parse_statement)? {
            children.push(stmt.into());
        }
        children.push(self.expect(TokenKind::Dedent)?.into());
        Ok(ParseNode::new(Rule::Block, children))
    }

    fn parse_statement(&mut self) -> PResult<ParseNode> {
        let alts = [
            Alt {
                predict: Self::at_assignment,
                parse: Self::parse_assignment,
            },
            Alt {
                predict: |p| p.at_word("run") && p.nth_is(1, TokenKind::Name),
                parse: Self::parse_run_stmt,
            },
            Alt {
                predict: |p| p.at_word("call") && p.nth_word(1, "llm"),
                parse: Self::parse_call_stmt,
            },
            Alt {
                predict: |p| {
                    p.at_word("for")
                        && (p.nth_is(1, TokenKind::Var) || p.nth_is(1, TokenKind::Name))
                        && p.nth_word(2, "in")
                },
                parse: Self::parse_for,
            },
            Alt {
                predict: |p| p.at_word("parallel") && p.nth_word(1, "do"),
                parse: Self::parse_parallel,
            },
            Alt {
                predict: |p| p.at_word("loop") && (p.nth_word(1, "do") || p.nth_word(1, "max")),
                parse: Self::parse_loop,
            },
            Alt {
                predict: |p| p.at_word("if") && p.starts_operand(1),
                parse: Self::parse_if,
            },
            Alt {
                predict: |p| p.at_word("match") && p.starts_operand(1),
                parse: Self::parse_match,
            },
            Alt {
                predict: |p| p.at_word("return"),
                parse: Self::parse_return,
            },
            Alt {
                predict: |p| p.at_word("push") && p.starts_operand(1),
                parse: Self::parse_push,
            },
            Alt {
                predict: Self::at_escalate,
                parse: Self::parse_escalate,
            },
            Alt {
                predict: |p| p.at_word("mask") && p.nth_is(1, TokenKind::Name),
                parse: Self::parse_mask,
            },
            Alt {
                predict: |p| (p.at_word("block") || p.at_word("warn")) && p.nth_word(1, "if"),
                parse: Self::parse_guard,
            },
        ];
        self.choice(&alts, &STATEMENT_START)
    }

    /// The statement forms allowed after `->` in a match arm.
    fn parse_simple_statement(&mut self) -> PResult<ParseNode> {
        let alts = [
            Alt {
                predict: Self::at_assignment,
                parse: Self::parse_assignment,
            },
            Alt {
                predict: |p| p.at_word("run") && p.nth_is(1, TokenKind::Name),
                parse: Self::parse_run_stmt,
            },
            Alt {
                predict: |p| p.at_word("call") && p.nth_word(1, "llm"),
                parse: Self::parse_call_stmt,
            },
            Alt {
                predict: |p| p.at_word("return"),
                parse: Self::parse_return,
            },
            Alt {
                predict: |p| p.at_word("push") && p.starts_operand(1),
                parse: Self::parse_push,
            },
            Alt {
                predict: Self::at_escalate,
                parse: Self::parse_escalate,
            },
        ];
        self.choice(
            &alts,
            &["variable", "`run`", "`call`", "`return`", "`push`", "`escalate`"],
        )
    }

    fn at_assignment(&self) -> bool {
        self.at(TokenKind::Var)
            || (self.at(TokenKind::Name)
                && (self.nth_is(1, TokenKind::Assign) || self.nth_is(1, TokenKind::Dot)))
    }

    fn at_escalate(&self) -> bool {
        self.at_word("escalate")
            && (self.nth_is(1, TokenKind::Newline) || self.nth_word(1, "to") || self.nth_word(1, "with"))
    }

    // -- assignment -----------------------------------------------

    fn parse_assignment(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![
            self.parse_target()?.into(),
            self.expect(TokenKind::Assign)?.into(),
        ];
        let alts = [
            Alt {
                predict: |p| p.at_word("run") && p.nth_is(1, TokenKind::Name),
                parse: Self::parse_run,
            },
            Alt {
                predict: |p| p.at_word("call") && p.nth_word(1, "llm"),
                parse: Self::parse_call,
            },
            Alt {
                predict: |p| p.starts_operand(0),
                parse: Self::parse_expr,
            },
        ];
        children.push(self.choice(&alts, &["expression", "`run`", "`call`"])?.into());
        children.push(self.expect(TokenKind::Newline)?.into());
        Ok(ParseNode::new(Rule::Assignment, children))
    }

    fn parse_target(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![self.one_of(&[TokenKind::Var, TokenKind::Name])?.into()];
        let path = self.many(
            |p| p.at(TokenKind::Dot),
            |p| Ok([p.expect(TokenKind::Dot)?, p.name()?]),
        )?;
        children.extend(path.into_iter().flatten().map(ParseChild::from));
        Ok(ParseNode::new(Rule::Target, children))
    }

    // -- run / call -----------------------------------------------

    fn parse_run_stmt(&mut self) -> PResult<ParseNode> {
        let children: Children = vec![
            self.parse_run()?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ];
        Ok(ParseNode::new(Rule::RunStmt, children))
    }

    fn parse_run(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![self.keyword("run")?.into()];
        // `run agent` on its own runs something named `agent`.
        let kind = self.optional(
            |p| (p.at_word("agent") || p.at_word("flow")) && p.nth_is(1, TokenKind::Name),
            |p| {
                let kw = if p.at_word("agent") {
                    p.keyword("agent")?
                } else {
                    p.keyword("flow")?
                };
                if p.at(TokenKind::Name) {
                    Ok(kw)
                } else {
                    p.fail(&["identifier"])
                }
            },
        )?;
        children.extend(kind.map(ParseChild::from));
        children.push(self.name()?.into());
        if let Some(args) = self.optional(Self::at_args, Self::parse_args)? {
            children.push(args.into());
        }
        if let Some(on) = self.optional(
            |p| p.at_word("on") && p.nth_word(1, "escalate"),
            Self::parse_on_escalate,
        )? {
            children.push(on.into());
        }
        Ok(ParseNode::new(Rule::Run, children))
    }

    fn at_args(&self) -> bool {
        self.at_word("with") && self.starts_operand(1)
    }

    fn parse_args(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![
            self.keyword("with")?.into(),
            self.parse_expr()?.into(),
        ];
        let more = self.many(
            |p| p.at(TokenKind::Comma),
            |p| Ok((p.expect(TokenKind::Comma)?, p.parse_expr()?)),
        )?;
        for (comma, arg) in more {
            children.push(comma.into());
            children.push(arg.into());
        }
        Ok(ParseNode::new(Rule::Args, children))
    }

    fn parse_on_escalate(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![
            self.keyword("on")?.into(),
            self.keyword("escalate")?.into(),
        ];
        let alts: [Alt<Children>; 2] = [
            Alt {
                predict: |p| p.at_word("return"),
                parse: |p| {
                    let mut children: Children = vec![p.keyword("return")?.into()];
                    if let Some(value) = p.optional(|p| p.starts_operand(0), Self::parse_expr)? {
                        children.push(value.into());
                    }
                    Ok(children)
                },
            },
            Alt {
                predict: |p| p.at_word("continue") || p.at_word("abort"),
                parse: |p| {
                    let word = if p.at_word("continue") {
                        p.keyword("continue")?
                    } else {
                        p.keyword("abort")?
                    };
                    Ok(vec![word.into()])
                },
            },
        ];
        children.extend(self.choice(&alts, &["`return`", "`continue`", "`abort`"])?);
        Ok(ParseNode::new(Rule::OnEscalate, children))
    }

    fn parse_call_stmt(&mut self) -> PResult<ParseNode> {
        let children: Children = vec![
            self.parse_call()?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ];
        Ok(ParseNode::new(Rule::CallStmt, children))
    }

    fn parse_call(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![
            self.keyword("call")?.into(),
            self.keyword("llm")?.into(),
            self.name()?.into(),
        ];
        if let Some(args) = self.optional(Self::at_args, Self::parse_args)? {
            children.push(args.into());
        }
        if let Some(using) = self.optional(
            |p| p.at_word("using") && p.nth_word(1, "model"),
            |p| {
                let children: Children = vec![
                    p.keyword("using")?.into(),
                    p.keyword("model")?.into(),
                    p.name()?.into(),
                ];
                Ok(ParseNode::new(Rule::UsingModel, children))
            },
        )? {
            children.push(using.into());
        }
        Ok(ParseNode::new(Rule::Call, children))
    }

    // -- compound statements --------------------------------------

    /// `do NEWLINE block end NEWLINE`
    fn do_block(&mut self) -> PResult<Children> {
        Ok(vec![
            self.keyword("do")?.into(),
            self.expect(TokenKind::Newline)?.into(),
            self.parse_block()?.into(),
            self.keyword("end")?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ])
    }

    fn parse_for(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![
            self.keyword("for")?.into(),
            self.one_of(&[TokenKind::Var, TokenKind::Name])?.into(),
            self.keyword("in")?.into(),
            self.parse_expr()?.into(),
        ];
        children.extend(self.do_block()?);
        Ok(ParseNode::new(Rule::For, children))
    }

    fn parse_parallel(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![self.keyword("parallel")?.into()];
        children.extend(self.do_block()?);
        Ok(ParseNode::new(Rule::Parallel, children))
    }

    fn parse_loop(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![self.keyword("loop")?.into()];
        let max = self.optional(
            |p| p.at_word("max"),
            |p| Ok([p.keyword("max")?, p.expect(TokenKind::Int)?]),
        )?;
        children.extend(max.into_iter().flatten().map(ParseChild::from));
        children.extend(self.do_block()?);
        Ok(ParseNode::new(Rule::Loop, children))
    }

    /// `: NEWLINE block`
    fn colon_block(&mut self) -> PResult<Children> {
        Ok(vec![
            self.expect(TokenKind::Colon)?.into(),
            self.expect(TokenKind::Newline)?.into(),
            self.parse_block()?.into(),
        ])
    }

    fn parse_if(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![
            self.keyword("if")?.into(),
            self.parse_expr()?.into(),
        ];
        children.extend(self.colon_block()?);
        if let Some(otherwise) = self.optional(
            |p| p.at_word("else") && p.nth_is(1, TokenKind::Colon),
            |p| {
                let mut children: Children = vec![p.keyword("else")?.into()];
                children.extend(p.colon_block()?);
                Ok(ParseNode::new(Rule::Else, children))
            },
        )? {
            children.push(otherwise.into());
        }
        Ok(ParseNode::new(Rule::If, children))
    }

    fn parse_match(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![
            self.keyword("match")?.into(),
            self.parse_expr()?.into(),
            self.expect(TokenKind::Colon)?.into(),
            self.expect(TokenKind::Newline)?.into(),
            self.expect(TokenKind::Indent)?.into(),
            self.parse_when()?.into(),
        ];
        for arm in self.many(|p| p.at_word("when"), Self::parse_when)? {
            children.push(arm.into());
        }
        if let Some(default) = self.optional(
            |p| p.at_word("else"),
            |p| {
                let children: Children = vec![p.keyword("else")?.into(), p.parse_arm()?.into()];
                Ok(ParseNode::new(Rule::MatchElse, children))
            },
        )? {
            children.push(default.into());
        }
        children.push(self.expect(TokenKind::Dedent)?.into());
        Ok(ParseNode::new(Rule::Match, children))
    }

    fn parse_when(&mut self) -> PResult<ParseNode> {
        let children: Children = vec![
            self.keyword("when")?.into(),
            self.parse_literal()?.into(),
            self.parse_arm()?.into(),
        ];
        Ok(ParseNode::new(Rule::When, children))
    }

    fn parse_arm(&mut self) -> PResult<ParseNode> {
        let alts: [Alt<Children>; 2] = [
            Alt {
                predict: |p| p.at(TokenKind::Arrow),
                parse: |p| {
                    Ok(vec![
                        p.expect(TokenKind::Arrow)?.into(),
                        p.parse_simple_statement()?.into(),
                    ])
                },
            },
            Alt {
                predict: |p| p.at(TokenKind::Colon),
                parse: Self::colon_block,
            },
        ];
        let children = self.choice(&alts, &["`->`", "`:`"])?;
        Ok(ParseNode::new(Rule::Arm, children))
    }

    // -- simple statements ----------------------------------------

    fn parse_return(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![self.keyword("return")?.into()];
        if let Some(value) = self.optional(|p| p.starts_operand(0), Self::parse_expr)? {
            children.push(value.into());
        }
        children.push(self.expect(TokenKind::Newline)?.into());
        Ok(ParseNode::new(Rule::Return, children))
    }

    fn parse_push(&mut self) -> PResult<ParseNode> {
        let children: Children = vec![
            self.keyword("push")?.into(),
            self.parse_expr()?.into(),
            self.keyword("to")?.into(),
            self.parse_target()?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ];
        Ok(ParseNode::new(Rule::Push, children))
    }

    fn parse_escalate(&mut self) -> PResult<ParseNode> {
        let mut children: Children = vec![self.keyword("escalate")?.into()];
        let to = self.optional(
            |p| p.at_word("to") && p.nth_is(1, TokenKind::Name),
            |p| Ok([p.keyword("to")?, p.name()?]),
        )?;
        children.extend(to.into_iter().flatten().map(ParseChild::from));
        if let Some(payload) = self.optional(Self::at_args, |p| {
            let children: Children = vec![p.keyword("with")?.into(), p.parse_expr()?.into()];
            Ok(children)
        })? {
            children.extend(payload);
        }
        children.push(self.expect(TokenKind::Newline)?.into());
        Ok(ParseNode::new(Rule::Escalate, children))
    }

    fn parse_mask(&mut self) -> PResult<ParseNode> {
        let children: Children = vec![
            self.keyword("mask")?.into(),
            self.name()?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ];
        Ok(ParseNode::new(Rule::Mask, children))
    }

    fn parse_guard(&mut self) -> PResult<ParseNode> {
        let action = if self.at_word("block") || self.at_word("warn") {
            self.bump()
        } else {
            return self.fail(&["`block`", "`warn`"]);
        };
        let children: Children = vec![
            action.into(),
            self.keyword("if")?.into(),
            self.parse_expr()?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ];
        Ok(ParseNode::new(Rule::Guard, children))
    }
}
