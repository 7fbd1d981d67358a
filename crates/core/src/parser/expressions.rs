use super::{Alt, PResult, Parser};
use crate::cst::{ParseChild, ParseNode, Rule};
use crate::lexer::{Token, TokenKind};

const COMPARISON: [TokenKind; 7] = [
    TokenKind::Eq,
    TokenKind::Neq,
    TokenKind::Lt,
    TokenKind::Lte,
    TokenKind::Gt,
    TokenKind::Gte,
    TokenKind::Tilde,
];

impl<'a> Parser<'a> {
    /// Whether the token `n` ahead can begin an operand.
    pub(super) fn starts_operand(&self, n: usize) -> bool {
        matches!(
            self.nth(n).kind,
            TokenKind::Var
                | TokenKind::Str
                | TokenKind::RawStr
                | TokenKind::Int
                | TokenKind::Float
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Name
                | TokenKind::Dot
        )
    }

    pub(super) fn parse_expr(&mut self) -> PResult<ParseNode> {
        let alts = [
            Alt {
                predict: |p| p.at_word("filter") && p.starts_operand(1),
                parse: Self::parse_filter,
            },
            Alt {
                predict: |p| p.starts_operand(0),
                parse: Self::parse_or,
            },
        ];
        self.choice(&alts, &["expression"])
    }

    fn parse_filter(&mut self) -> PResult<ParseNode> {
        let filter = self.keyword("filter")?;
        let source = self.parse_or()?;
        let keyword = self.keyword("where")?;
        self.filter_depth += 1;
        let condition = self.parse_or();
        self.filter_depth -= 1;
        let children: Vec<ParseChild> =
            vec![filter.into(), source.into(), keyword.into(), condition?.into()];
        Ok(ParseNode::new(Rule::Filter, children))
    }

    /// Fold `operand (op operand)*` into left-nested nodes of `rule`.
    fn fold_left(rule: Rule, first: ParseNode, rest: Vec<(Token, ParseNode)>) -> ParseNode {
        rest.into_iter().fold(first, |left, (op, right)| {
            ParseNode::new(rule, vec![left.into(), op.into(), right.into()])
        })
    }

    fn parse_or(&mut self) -> PResult<ParseNode> {
        let first = self.parse_and()?;
        let rest = self.many(
            |p| p.at_word("or") && p.starts_operand(1),
            |p| Ok((p.keyword("or")?, p.parse_and()?)),
        )?;
        Ok(Self::fold_left(Rule::Or, first, rest))
    }

    fn parse_and(&mut self) -> PResult<ParseNode> {
        let first = self.parse_not()?;
        let rest = self.many(
            |p| p.at_word("and") && p.starts_operand(1),
            |p| Ok((p.keyword("and")?, p.parse_not()?)),
        )?;
        Ok(Self::fold_left(Rule::And, first, rest))
    }

    fn parse_not(&mut self) -> PResult<ParseNode> {
        let alts = [
            Alt {
                predict: |p| p.at_word("not") && p.starts_operand(1),
                parse: |p| {
                    let children: Vec<ParseChild> =
                        vec![p.keyword("not")?.into(), p.parse_not()?.into()];
                    Ok(ParseNode::new(Rule::Not, children))
                },
            },
            Alt {
                predict: |p| p.starts_operand(0),
                parse: Self::parse_compare,
            },
        ];
        self.choice(&alts, &["expression"])
    }

    /// Comparisons do not chain: `a < b < c` is a syntax error.
    fn parse_compare(&mut self) -> PResult<ParseNode> {
        let left = self.parse_add()?;
        let tail = self.optional(
            |p| COMPARISON.iter().any(|k| p.at(*k)) || (p.at_word("contains") && p.starts_operand(1)),
            |p| {
                let op = if p.at_word("contains") {
                    p.keyword("contains")?
                } else {
                    p.one_of(&COMPARISON)?
                };
                Ok((op, p.parse_add()?))
            },
        )?;
        Ok(match tail {
            Some((op, right)) => ParseNode::new(Rule::Compare, vec![left.into(), op.into(), right.into()]),
            None => left,
        })
    }

    fn parse_add(&mut self) -> PResult<ParseNode> {
        let first = self.parse_member()?;
        let rest = self.many(
            |p| p.at(TokenKind::Plus),
            |p| Ok((p.expect(TokenKind::Plus)?, p.parse_member()?)),
        )?;
        Ok(Self::fold_left(Rule::Add, first, rest))
    }

    fn parse_member(&mut self) -> PResult<ParseNode> {
        let base = self.parse_primary()?;
        let fields = self.many(
            |p| p.at(TokenKind::Dot) && p.nth_is(1, TokenKind::Name),
            |p| Ok((p.expect(TokenKind::Dot)?, p.name()?)),
        )?;
        Ok(fields.into_iter().fold(base, |left, (dot, name)| {
            ParseNode::new(Rule::Member, vec![left.into(), dot.into(), name.into()])
        }))
    }

    fn parse_primary(&mut self) -> PResult<ParseNode> {
        let alts = [
            Alt {
                predict: |p| {
                    matches!(
                        p.nth(0).kind,
                        TokenKind::Str | TokenKind::RawStr | TokenKind::Int | TokenKind::Float
                    ) || p.at_word("true")
                        || p.at_word("false")
                        || p.at_word("null")
                },
                parse: Self::parse_literal,
            },
            Alt {
                predict: |p| p.at(TokenKind::Var),
                parse: |p| Ok(ParseNode::new(Rule::Ref, vec![p.expect(TokenKind::Var)?.into()])),
            },
            Alt {
                predict: |p| p.at(TokenKind::Name) && p.nth_is(1, TokenKind::LParen),
                parse: Self::parse_call_expr,
            },
            Alt {
                predict: |p| p.at(TokenKind::Name),
                parse: |p| Ok(ParseNode::new(Rule::Ref, vec![p.name()?.into()])),
            },
            Alt {
                predict: |p| p.filter_depth > 0 && p.at(TokenKind::Dot),
                parse: Self::parse_implicit,
            },
            Alt {
                predict: |p| p.at(TokenKind::LBracket),
                parse: Self::parse_list,
            },
            Alt {
                predict: |p| p.at(TokenKind::LBrace),
                parse: Self::parse_object,
            },
            Alt {
                predict: |p| p.at(TokenKind::LParen),
                parse: Self::parse_group,
            },
        ];
        self.choice(&alts, &["expression"])
    }

    pub(super) fn parse_literal(&mut self) -> PResult<ParseNode> {
        let tok = if matches!(
            self.nth(0).kind,
            TokenKind::Str | TokenKind::RawStr | TokenKind::Int | TokenKind::Float
        ) || self.at_word("true")
            || self.at_word("false")
            || self.at_word("null")
        {
            self.bump()
        } else {
            return self.fail(&["literal"]);
        };
        Ok(ParseNode::new(Rule::Literal, vec![tok.into()]))
    }

    fn parse_call_expr(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> = vec![
            self.name()?.into(),
            self.expect(TokenKind::LParen)?.into(),
        ];
        let args = self.optional(|p| !p.at(TokenKind::RParen), |p| p.comma_separated(Self::parse_expr))?;
        children.extend(args.into_iter().flatten());
        children.push(self.expect(TokenKind::RParen)?.into());
        Ok(ParseNode::new(Rule::CallExpr, children))
    }

    fn parse_implicit(&mut self) -> PResult<ParseNode> {
        if self.filter_depth == 0 {
            return self.fail(&["expression"]);
        }
        let children: Vec<ParseChild> = vec![self.expect(TokenKind::Dot)?.into(), self.name()?.into()];
        Ok(ParseNode::new(Rule::Implicit, children))
    }

    fn parse_list(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> = vec![self.expect(TokenKind::LBracket)?.into()];
        let items = self.optional(|p| !p.at(TokenKind::RBracket), |p| p.comma_separated(Self::parse_expr))?;
        children.extend(items.into_iter().flatten());
        children.push(self.expect(TokenKind::RBracket)?.into());
        Ok(ParseNode::new(Rule::List, children))
    }

    fn parse_object(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> = vec![self.expect(TokenKind::LBrace)?.into()];
        let entries = self.optional(|p| !p.at(TokenKind::RBrace), |p| p.comma_separated(Self::parse_entry))?;
        children.extend(entries.into_iter().flatten());
        children.push(self.expect(TokenKind::RBrace)?.into());
        Ok(ParseNode::new(Rule::Object, children))
    }

    fn parse_entry(&mut self) -> PResult<ParseNode> {
        let children: Vec<ParseChild> = vec![
            self.one_of(&[TokenKind::Name, TokenKind::Str])?.into(),
            self.expect(TokenKind::Colon)?.into(),
            self.parse_expr()?.into(),
        ];
        Ok(ParseNode::new(Rule::Entry, children))
    }

    fn parse_group(&mut self) -> PResult<ParseNode> {
        let children: Vec<ParseChild> = vec![
            self.expect(TokenKind::LParen)?.into(),
            self.parse_expr()?.into(),
            self.expect(TokenKind::RParen)?.into(),
        ];
        Ok(ParseNode::new(Rule::Group, children))
    }

    /// `item ("," item)* ","?`, used inside brackets where a trailing comma
    /// is allowed.
    fn comma_separated(
        &mut self,
        item: fn(&mut Self) -> PResult<ParseNode>,
    ) -> PResult<Vec<ParseChild>> {
        let mut children: Vec<ParseChild> = vec![item(self)?.into()];
        let more = self.many(
            |p| p.at(TokenKind::Comma) && !p.nth_is(1, TokenKind::RParen)
                && !p.nth_is(1, TokenKind::RBracket)
                && !p.nth_is(1, TokenKind::RBrace),
            |p| Ok((p.expect(TokenKind::Comma)?, item(p)?)),
        )?;
        for (comma, node) in more {
            children.push(comma.into());
            children.push(node.into());
        }
        if let Some(comma) = self.optional(|p| p.at(TokenKind::Comma), |p| p.expect(TokenKind::Comma))? {
            children.push(comma.into());
        }
        Ok(children)
    }
}
