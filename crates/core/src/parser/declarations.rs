use super::{Alt, PResult, Parser};
use crate::cst::{ParseChild, ParseNode, Rule};
use crate::lexer::{Token, TokenKind};

type Children = Vec<ParseChild>;

const DECLARATION_START: [&str; 12] = [
    "`import`",
    "`model`",
    "`tool`",
    "`schema`",
    "`prompt`",
    "`agent`",
    "`flow`",
    "`on`",
    "`after`",
    "`policy`",
    "`retry`",
    "`timeout`",
];

const AGENT_PROPERTIES: [&str; 9] = [
    "`model`",
    "`instruction`",
    "`description`",
    "`tools`",
    "`delegate`",
    "`use`",
    "`retry`",
    "`timeout`",
    "`escalate`",
];

impl<'a> Parser<'a> {
    pub(super) fn parse_declaration(&mut self) -> PResult<ParseNode> {
        let alts = [
            Alt {
                predict: |p| p.at_word("import"),
                parse: Self::parse_import,
            },
            Alt {
                predict: |p| p.at_word("model"),
                parse: Self::parse_model,
            },
            Alt {
                predict: |p| p.at_word("tool"),
                parse: Self::parse_tool,
            },
            Alt {
                predict: |p| p.at_word("schema"),
                parse: Self::parse_schema,
            },
            Alt {
                predict: |p| p.at_word("prompt"),
                parse: Self::parse_prompt,
            },
            Alt {
                predict: |p| p.at_word("agent"),
                parse: Self::parse_agent,
            },
            Alt {
                predict: |p| p.at_word("flow"),
                parse: Self::parse_flow,
            },
            Alt {
                predict: |p| p.at_word("on") || p.at_word("after"),
                parse: Self::parse_handler,
            },
            Alt {
                predict: |p| p.at_word("policy"),
                parse: Self::parse_policy,
            },
            Alt {
                predict: |p| p.at_word("retry"),
                parse: Self::parse_retry,
            },
            Alt {
                predict: |p| p.at_word("timeout"),
                parse: Self::parse_timeout,
            },
        ];
        self.choice(&alts, &DECLARATION_START)
    }

    fn parse_import(&mut self) -> PResult<ParseNode> {
        let children = vec![
            self.keyword("import")?.into(),
            self.expect(TokenKind::Str)?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ];
        Ok(ParseNode::new(Rule::Import, children))
    }

    // -- model ----------------------------------------------------

    fn parse_model(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> =
            vec![self.keyword("model")?.into(), self.name()?.into()];
        let alts: [Alt<Children>; 2] = [
            Alt {
                predict: |p| p.at(TokenKind::Assign),
                parse: |p| {
                    Ok(vec![
                        p.expect(TokenKind::Assign)?.into(),
                        p.parse_model_ref()?.into(),
                        p.expect(TokenKind::Newline)?.into(),
                    ])
                },
            },
            Alt {
                predict: |p| p.at(TokenKind::Colon),
                parse: Self::props_body,
            },
        ];
        children.extend(self.choice(&alts, &["`=`", "`:`"])?);
        Ok(ParseNode::new(Rule::Model, children))
    }

    fn parse_model_ref(&mut self) -> PResult<ParseNode> {
        let alts: [Alt<Children>; 2] = [
            Alt {
                predict: |p| p.at(TokenKind::Str),
                parse: |p| Ok(vec![p.expect(TokenKind::Str)?.into()]),
            },
            Alt {
                predict: |p| p.at(TokenKind::Name),
                parse: Self::model_path,
            },
        ];
        let children = self.choice(&alts, &["string literal", "identifier"])?;
        Ok(ParseNode::new(Rule::ModelRef, children))
    }

    /// `provider/name` where the name may contain dotted version segments.
    fn model_path(&mut self) -> PResult<Children> {
        let segment = [TokenKind::Name, TokenKind::Int, TokenKind::Float];
        let mut children: Vec<ParseChild> = vec![
            self.name()?.into(),
            self.expect(TokenKind::Slash)?.into(),
            self.one_of(&segment)?.into(),
        ];
        let more = self.many(
            |p| p.at(TokenKind::Dot),
            |p| Ok([p.expect(TokenKind::Dot)?, p.one_of(&segment)?]),
        )?;
        for pair in more {
            children.extend(pair.into_iter().map(ParseChild::from));
        }
        Ok(children)
    }

    /// `: NEWLINE props`, the long form shared by model, tool and policy.
    fn props_body(&mut self) -> PResult<Children> {
        Ok(vec![
            self.expect(TokenKind::Colon)?.into(),
            self.expect(TokenKind::Newline)?.into(),
            self.parse_props()?.into(),
        ])
    }

    fn parse_props(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> = vec![
            self.expect(TokenKind::Indent)?.into(),
            self.parse_property()?.into(),
        ];
        for prop in self.many(|p| p.at(TokenKind::Name), Self::parse_property)? {
            children.push(prop.into());
        }
        children.push(self.expect(TokenKind::Dedent)?.into());
        Ok(ParseNode::new(Rule::Props, children))
    }

    fn parse_property(&mut self) -> PResult<ParseNode> {
        let children = vec![
            self.name()?.into(),
            self.expect(TokenKind::Colon)?.into(),
            self.parse_expr()?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ];
        Ok(ParseNode::new(Rule::Property, children))
    }

    // -- tool -----------------------------------------------------

    fn parse_tool(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> =
            vec![self.keyword("tool")?.into(), self.name()?.into()];
        let alts: [Alt<Children>; 2] = [
            Alt {
                predict: |p| p.at(TokenKind::Assign),
                parse: |p| {
                    Ok(vec![
                        p.expect(TokenKind::Assign)?.into(),
                        p.tool_kind()?.into(),
                        p.parse_tool_target()?.into(),
                        p.expect(TokenKind::Newline)?.into(),
                    ])
                },
            },
            Alt {
                predict: |p| p.at(TokenKind::Colon),
                parse: Self::props_body,
            },
        ];
        children.extend(self.choice(&alts, &["`=`", "`:`"])?);
        Ok(ParseNode::new(Rule::Tool, children))
    }

    fn tool_kind(&mut self) -> PResult<Token> {
        let alts = [
            Alt {
                predict: |p| p.at_word("builtin"),
                parse: |p| p.keyword("builtin"),
            },
            Alt {
                predict: |p| p.at_word("mcp"),
                parse: |p| p.keyword("mcp"),
            },
            Alt {
                predict: |p| p.at_word("http"),
                parse: |p| p.keyword("http"),
            },
        ];
        self.choice(&alts, &["`builtin`", "`mcp`", "`http`"])
    }

    fn parse_tool_target(&mut self) -> PResult<ParseNode> {
        let alts: [Alt<Children>; 2] = [
            Alt {
                predict: |p| p.at(TokenKind::Str),
                parse: |p| Ok(vec![p.expect(TokenKind::Str)?.into()]),
            },
            Alt {
                predict: |p| p.at(TokenKind::Name),
                parse: Self::dotted_name,
            },
        ];
        let children = self.choice(&alts, &["string literal", "identifier"])?;
        Ok(ParseNode::new(Rule::ToolTarget, children))
    }

    fn dotted_name(&mut self) -> PResult<Children> {
        let mut children: Vec<ParseChild> = vec![self.name()?.into()];
        let more = self.many(
            |p| p.at(TokenKind::Dot) && p.nth_is(1, TokenKind::Name),
            |p| Ok([p.expect(TokenKind::Dot)?, p.name()?]),
        )?;
        for pair in more {
            children.extend(pair.into_iter().map(ParseChild::from));
        }
        Ok(children)
    }

    // -- schema ---------------------------------------------------

    fn parse_schema(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> = vec![
            self.keyword("schema")?.into(),
            self.name()?.into(),
            self.expect(TokenKind::Colon)?.into(),
            self.expect(TokenKind::Newline)?.into(),
            self.expect(TokenKind::Indent)?.into(),
            self.parse_field()?.into(),
        ];
        for field in self.many(|p| p.at(TokenKind::Name), Self::parse_field)? {
            children.push(field.into());
        }
        children.push(self.expect(TokenKind::Dedent)?.into());
        Ok(ParseNode::new(Rule::Schema, children))
    }

    fn parse_field(&mut self) -> PResult<ParseNode> {
        let children = vec![
            self.name()?.into(),
            self.expect(TokenKind::Colon)?.into(),
            self.parse_type_ref()?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ];
        Ok(ParseNode::new(Rule::Field, children))
    }

    pub(super) fn parse_type_ref(&mut self) -> PResult<ParseNode> {
        let alts: [Alt<Children>; 2] = [
            Alt {
                predict: |p| {
                    p.at_word("list")
                        && p.nth_is(1, TokenKind::LBracket)
                        && !p.nth_is(2, TokenKind::RBracket)
                },
                parse: |p| {
                    Ok(vec![
                        p.keyword("list")?.into(),
                        p.expect(TokenKind::LBracket)?.into(),
                        p.parse_type_ref()?.into(),
                        p.expect(TokenKind::RBracket)?.into(),
                    ])
                },
            },
            Alt {
                predict: |p| p.at(TokenKind::Name),
                parse: |p| {
                    let mut children: Vec<ParseChild> = vec![p.name()?.into()];
                    let array = p.optional(
                        |p| p.at(TokenKind::LBracket) && p.nth_is(1, TokenKind::RBracket),
                        |p| Ok([p.expect(TokenKind::LBracket)?, p.expect(TokenKind::RBracket)?]),
                    )?;
                    if let Some(pair) = array {
                        children.extend(pair.into_iter().map(ParseChild::from));
                    }
                    Ok(children)
                },
            },
        ];
        let mut children = self.choice(&alts, &["type name"])?;
        if let Some(q) = self.optional(
            |p| p.at(TokenKind::Question),
            |p| p.expect(TokenKind::Question),
        )? {
            children.push(q.into());
        }
        Ok(ParseNode::new(Rule::TypeRef, children))
    }

    // -- prompt ---------------------------------------------------

    fn parse_prompt(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> =
            vec![self.keyword("prompt")?.into(), self.name()?.into()];
        let clauses = self.many(
            |p| p.at_word("using") || p.at_word("expecting"),
            Self::parse_prompt_clause,
        )?;
        children.extend(clauses.into_iter().map(ParseChild::from));
        children.push(self.expect(TokenKind::Colon)?.into());

        let alts: [Alt<Children>; 2] = [
            Alt {
                predict: |p| p.at(TokenKind::Str) || p.at(TokenKind::RawStr),
                parse: |p| {
                    Ok(vec![
                        p.one_of(&[TokenKind::Str, TokenKind::RawStr])?.into(),
                        p.expect(TokenKind::Newline)?.into(),
                    ])
                },
            },
            Alt {
                predict: |p| p.at(TokenKind::Newline),
                parse: |p| {
                    Ok(vec![
                        p.expect(TokenKind::Newline)?.into(),
                        p.expect(TokenKind::Indent)?.into(),
                        p.one_of(&[TokenKind::Str, TokenKind::RawStr])?.into(),
                        p.expect(TokenKind::Newline)?.into(),
                        p.expect(TokenKind::Dedent)?.into(),
                    ])
                },
            },
        ];
        children.extend(self.choice(&alts, &["string literal", "triple-quoted string"])?);
        Ok(ParseNode::new(Rule::Prompt, children))
    }

    fn parse_prompt_clause(&mut self) -> PResult<ParseNode> {
        let alts: [Alt<Children>; 2] = [
            Alt {
                predict: |p| p.at_word("using"),
                parse: |p| {
                    Ok(vec![
                        p.keyword("using")?.into(),
                        p.keyword("model")?.into(),
                        p.name()?.into(),
                    ])
                },
            },
            Alt {
                predict: |p| p.at_word("expecting"),
                parse: |p| {
                    Ok(vec![
                        p.keyword("expecting")?.into(),
                        p.parse_type_ref()?.into(),
                    ])
                },
            },
        ];
        let children = self.choice(&alts, &["`using`", "`expecting`"])?;
        Ok(ParseNode::new(Rule::PromptClause, children))
    }

    // -- agent ----------------------------------------------------

    fn parse_agent(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> = vec![
            self.keyword("agent")?.into(),
            self.name()?.into(),
            self.expect(TokenKind::Colon)?.into(),
            self.expect(TokenKind::Newline)?.into(),
            self.expect(TokenKind::Indent)?.into(),
            self.parse_agent_prop()?.into(),
        ];
        for prop in self.many(|p| !p.at(TokenKind::Dedent), Self::parse_agent_prop)? {
            children.push(prop.into());
        }
        children.push(self.expect(TokenKind::Dedent)?.into());
        Ok(ParseNode::new(Rule::Agent, children))
    }

    fn parse_agent_prop(&mut self) -> PResult<ParseNode> {
        let alts: [Alt<Children>; 9] = [
            Alt {
                predict: |p| p.at_word("model"),
                parse: |p| p.keyed("model", Self::name_value),
            },
            Alt {
                predict: |p| p.at_word("instruction"),
                parse: |p| p.keyed("instruction", Self::name_value),
            },
            Alt {
                predict: |p| p.at_word("description"),
                parse: |p| p.keyed("description", Self::string_value),
            },
            Alt {
                predict: |p| p.at_word("tools"),
                parse: |p| p.keyed("tools", Self::name_list_value),
            },
            Alt {
                predict: |p| p.at_word("delegate"),
                parse: |p| p.keyed("delegate", Self::name_list_value),
            },
            Alt {
                predict: |p| p.at_word("use"),
                parse: |p| p.keyed("use", Self::name_list_value),
            },
            Alt {
                predict: |p| p.at_word("retry"),
                parse: |p| p.keyed("retry", Self::name_value),
            },
            Alt {
                predict: |p| p.at_word("timeout"),
                parse: |p| p.keyed("timeout", Self::name_value),
            },
            Alt {
                predict: |p| p.at_word("escalate"),
                parse: |p| p.keyed("escalate", Self::escalation_value),
            },
        ];
        let children = self.choice(&alts, &AGENT_PROPERTIES)?;
        Ok(ParseNode::new(Rule::AgentProp, children))
    }

    /// `key [":"] value NEWLINE`
    fn keyed(
        &mut self,
        key: &str,
        value: fn(&mut Self) -> PResult<Children>,
    ) -> PResult<Children> {
        let mut children: Vec<ParseChild> = vec![self.keyword(key)?.into()];
        if let Some(colon) =
            self.optional(|p| p.at(TokenKind::Colon), |p| p.expect(TokenKind::Colon))?
        {
            children.push(colon.into());
        }
        children.extend(value(self)?);
        children.push(self.expect(TokenKind::Newline)?.into());
        Ok(children)
    }

    fn name_value(&mut self) -> PResult<Children> {
        Ok(vec![self.name()?.into()])
    }

    fn string_value(&mut self) -> PResult<Children> {
        Ok(vec![self.expect(TokenKind::Str)?.into()])
    }

    fn name_list_value(&mut self) -> PResult<Children> {
        Ok(vec![self.parse_name_list()?.into()])
    }

    fn escalation_value(&mut self) -> PResult<Children> {
        let cond = self.keyword("if")?;
        let op = if self.at(TokenKind::Tilde) || self.at(TokenKind::Eq) || self.at_word("contains")
        {
            self.bump()
        } else {
            return self.fail(&["`~`", "`==`", "`contains`"]);
        };
        Ok(vec![
            cond.into(),
            op.into(),
            self.expect(TokenKind::Str)?.into(),
        ])
    }

    fn parse_name_list(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> = vec![self.name()?.into()];
        let more = self.many(
            |p| p.at(TokenKind::Comma),
            |p| Ok([p.expect(TokenKind::Comma)?, p.name()?]),
        )?;
        for pair in more {
            children.extend(pair.into_iter().map(ParseChild::from));
        }
        Ok(ParseNode::new(Rule::NameList, children))
    }

    // -- flow / handler -------------------------------------------

    fn parse_flow(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> =
            vec![self.keyword("flow")?.into(), self.name()?.into()];
        if let Some(params) = self.optional(|p| p.at(TokenKind::LParen), Self::parse_params)? {
            children.push(params.into());
        }
        children.push(self.expect(TokenKind::Colon)?.into());
        children.push(self.expect(TokenKind::Newline)?.into());
        children.push(self.parse_block()?.into());
        Ok(ParseNode::new(Rule::Flow, children))
    }

    fn parse_params(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> = vec![self.expect(TokenKind::LParen)?.into()];
        let vars = self.optional(
            |p| p.at(TokenKind::Var),
            |p| {
                let mut vars = vec![p.expect(TokenKind::Var)?];
                let more = p.many(
                    |p| p.at(TokenKind::Comma),
                    |p| Ok([p.expect(TokenKind::Comma)?, p.expect(TokenKind::Var)?]),
                )?;
                vars.extend(more.into_iter().flatten());
                Ok(vars)
            },
        )?;
        children.extend(vars.into_iter().flatten().map(ParseChild::from));
        children.push(self.expect(TokenKind::RParen)?.into());
        Ok(ParseNode::new(Rule::Params, children))
    }

    fn parse_handler(&mut self) -> PResult<ParseNode> {
        let timing = if self.at_word("on") || self.at_word("after") {
            self.bump()
        } else {
            return self.fail(&["`on`", "`after`"]);
        };
        let children = vec![
            timing.into(),
            self.name()?.into(),
            self.keyword("do")?.into(),
            self.expect(TokenKind::Newline)?.into(),
            self.parse_block()?.into(),
            self.keyword("end")?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ];
        Ok(ParseNode::new(Rule::Handler, children))
    }

    // -- policy / retry / timeout ---------------------------------

    fn parse_policy(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> =
            vec![self.keyword("policy")?.into(), self.name()?.into()];
        children.extend(self.props_body()?);
        Ok(ParseNode::new(Rule::Policy, children))
    }

    fn parse_retry(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> = vec![
            self.keyword("retry")?.into(),
            self.name()?.into(),
            self.expect(TokenKind::Assign)?.into(),
            self.expect(TokenKind::Int)?.into(),
            self.keyword("times")?.into(),
        ];
        let backoff = self.optional(
            |p| p.at(TokenKind::Comma),
            |p| {
                Ok([
                    p.expect(TokenKind::Comma)?,
                    p.name()?,
                    p.keyword("backoff")?,
                ])
            },
        )?;
        children.extend(backoff.into_iter().flatten().map(ParseChild::from));
        children.push(self.expect(TokenKind::Newline)?.into());
        Ok(ParseNode::new(Rule::Retry, children))
    }

    fn parse_timeout(&mut self) -> PResult<ParseNode> {
        let children = vec![
            self.keyword("timeout")?.into(),
            self.name()?.into(),
            self.expect(TokenKind::Assign)?.into(),
            self.one_of(&[TokenKind::Int, TokenKind::Float])?.into(),
            self.name()?.into(),
            self.expect(TokenKind::Newline)?.into(),
        ];
        Ok(ParseNode::new(Rule::Timeout, children))
    }
}
