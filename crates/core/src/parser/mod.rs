//! Grammar-driven parser producing a concrete parse tree.
//!
//! One set of productions serves both strategies. Every point where the
//! grammar offers alternatives goes through `choice`, `optional` or `many`:
//!
//! - `Predictive` decides with a bounded lookahead predicate and commits.
//! - `Backtracking` tries alternatives in order, restoring the position after
//!   each failure, and reports the furthest failure seen.
//!
//! Alternatives are listed so that on unambiguous input the first one that
//! succeeds is the one the predicate selects, which keeps the two strategies'
//! trees identical.

use crate::cst::{ParseChild, ParseNode, Rule};
use crate::error::Diagnostic;
use crate::lexer::{self, Token, TokenKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

mod declarations;
mod expressions;
mod statements;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStrategy {
    /// Deterministic, at most three tokens of lookahead.
    #[default]
    Predictive,
    /// Ordered choice with backtracking; tolerant of grammar changes.
    Backtracking,
}

/// Parse a token stream (as produced by [`lexer::tokenize`]).
pub fn parse(tokens: &[Token], file: &str, strategy: ParseStrategy) -> Result<ParseNode, Diagnostic> {
    if !matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
        return Err(Diagnostic::internal(
            file,
            None,
            "token stream is not terminated by end of input",
        ));
    }
    let mut parser = Parser::new(tokens, file, strategy);
    match parser.parse_file() {
        Ok(tree) => {
            tracing::trace!(file, ?strategy, nodes = tree.size(), "parsed");
            Ok(tree)
        }
        Err(err) => Err(parser.to_diagnostic(err)),
    }
}

/// Tokenize and parse one source file.
pub fn parse_source(src: &str, file: &str, strategy: ParseStrategy) -> Result<ParseNode, Diagnostic> {
    let tokens = lexer::tokenize(src, file)?;
    parse(&tokens, file, strategy)
}

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

type PResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone)]
struct ParseError {
    pos: usize,
    expected: BTreeSet<String>,
}

/// One alternative at a choice point.
struct Alt<'a, T> {
    predict: fn(&Parser<'a>) -> bool,
    parse: fn(&mut Parser<'a>) -> PResult<T>,
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    file: &'a str,
    strategy: ParseStrategy,
    furthest: Option<ParseError>,
    /// Nesting depth of filter conditions; `.field` is legal only inside one.
    filter_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], file: &'a str, strategy: ParseStrategy) -> Self {
        Parser {
            tokens,
            pos: 0,
            file,
            strategy,
            furthest: None,
            filter_depth: 0,
        }
    }

    fn nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.nth(0).kind == kind
    }

    fn nth_is(&self, n: usize, kind: TokenKind) -> bool {
        self.nth(n).kind == kind
    }

    fn at_word(&self, word: &str) -> bool {
        self.nth(0).is_word(word)
    }

    fn nth_word(&self, n: usize, word: &str) -> bool {
        self.nth(n).is_word(word)
    }

    fn bump(&mut self) -> Token {
        let tok = self.nth(0).clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn fail<T>(&mut self, expected: &[&str]) -> PResult<T> {
        let err = ParseError {
            pos: self.pos,
            expected: expected.iter().map(|s| (*s).to_owned()).collect(),
        };
        self.record(&err);
        Err(err)
    }

    fn record(&mut self, err: &ParseError) {
        match &mut self.furthest {
            Some(f) if f.pos > err.pos => {}
            Some(f) if f.pos == err.pos => f.expected.extend(err.expected.iter().cloned()),
            _ => self.furthest = Some(err.clone()),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            self.fail(&[kind.describe()])
        }
    }

    fn keyword(&mut self, word: &str) -> PResult<Token> {
        if self.at_word(word) {
            Ok(self.bump())
        } else {
            let expected = format!("`{}`", word);
            self.fail(&[expected.as_str()])
        }
    }

    fn name(&mut self) -> PResult<Token> {
        self.expect(TokenKind::Name)
    }

    /// Consume one token of any of the given kinds.
    fn one_of(&mut self, kinds: &[TokenKind]) -> PResult<Token> {
        if kinds.iter().any(|k| self.at(*k)) {
            Ok(self.bump())
        } else {
            let expected: Vec<&str> = kinds.iter().map(|k| k.describe()).collect();
            self.fail(&expected)
        }
    }

    // -- Strategy combinators -----------------------------------

    fn choice<T>(&mut self, alts: &[Alt<'a, T>], expected: &[&str]) -> PResult<T> {
        match self.strategy {
            ParseStrategy::Predictive => {
                for alt in alts {
                    if (alt.predict)(self) {
                        return (alt.parse)(self);
                    }
                }
                self.fail(expected)
            }
            ParseStrategy::Backtracking => {
                let start = self.pos;
                let mut best: Option<ParseError> = None;
                for alt in alts {
                    match (alt.parse)(self) {
                        Ok(value) => return Ok(value),
                        Err(err) => {
                            self.pos = start;
                            best = match best {
                                Some(b) if b.pos >= err.pos => Some(b),
                                _ => Some(err),
                            };
                        }
                    }
                }
                match best {
                    Some(err) => Err(err),
                    None => self.fail(expected),
                }
            }
        }
    }

    fn optional<T>(
        &mut self,
        predict: impl Fn(&Self) -> bool,
        parse: impl FnOnce(&mut Self) -> PResult<T>,
    ) -> PResult<Option<T>> {
        match self.strategy {
            ParseStrategy::Predictive => {
                if predict(self) {
                    parse(self).map(Some)
                } else {
                    Ok(None)
                }
            }
            ParseStrategy::Backtracking => {
                let start = self.pos;
                match parse(self) {
                    Ok(value) => Ok(Some(value)),
                    Err(_) => {
                        self.pos = start;
                        Ok(None)
                    }
                }
            }
        }
    }

    fn many<T>(
        &mut self,
        predict: impl Fn(&Self) -> bool,
        mut parse: impl FnMut(&mut Self) -> PResult<T>,
    ) -> PResult<Vec<T>> {
        let mut items = Vec::new();
        loop {
            let before = self.pos;
            match self.optional(&predict, &mut parse)? {
                Some(item) if self.pos > before => items.push(item),
                _ => break,
            }
        }
        Ok(items)
    }

    fn to_diagnostic(&self, err: ParseError) -> Diagnostic {
        let err = match &self.furthest {
            Some(f) if f.pos >= err.pos => f.clone(),
            _ => err,
        };
        let found = &self.tokens[err.pos.min(self.tokens.len() - 1)];
        Diagnostic::syntax(
            self.file,
            found.span,
            format!(
                "expected {}, found {}",
                describe_expected(&err.expected),
                found.describe()
            ),
        )
    }

    // -- File ---------------------------------------------------

    fn parse_file(&mut self) -> PResult<ParseNode> {
        let mut children: Vec<ParseChild> = self
            .many(|p| !p.at(TokenKind::Eof), Self::parse_declaration)?
            .into_iter()
            .map(ParseChild::from)
            .collect();
        children.push(self.expect(TokenKind::Eof)?.into());
        Ok(ParseNode::new(Rule::File, children))
    }
}

fn describe_expected(expected: &BTreeSet<String>) -> String {
    let items: Vec<&str> = expected.iter().map(String::as_str).collect();
    match items.as_slice() {
        [] => "more input".to_owned(),
        [one] => (*one).to_owned(),
        many => format!("one of {}", many.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;

    const CORPUS: &str = r#"
import "shared/models.af"

model main = anthropic/claude-3.5-sonnet
model backup:
    provider: openai
    name: "gpt-4o"
    temperature: 0.2

tool search = builtin web.search
tool tracker = mcp "https://mcp.example.com/tracker"

schema Finding:
    title: string
    confidence: int
    tags: list[string]
    notes: string?
    related: Finding[]

prompt triage using model main expecting Finding[]: """
Classify $ticket and explain.
{{tone}}
"""
prompt tone: "Be concise."

retry standard = 3 times, exponential backoff
timeout short = 30 seconds

agent triager:
    model main
    instruction: triage
    tools search, tracker
    use helper
    retry standard
    timeout short
    escalate if ~ "talk to a human"

agent helper:
    instruction tone
    description "Answers follow-up questions"

policy safety:
    max_cost: 5
    allow: ["search"]

flow review($ticket, $limit):
    $findings = run agent triager with $ticket on escalate return "escalated"
    $strong = filter $findings where .confidence >= 80 and not .tags contains "noise"
    $summary = call llm tone with {text: $ticket.body, count: len($strong)} using model main
    $report.total = len($findings) + 1
    for $f in $strong do
        push $f.title to $titles
    end
    parallel do
        $a = run agent triager with $ticket
        run agent helper
    end
    loop max 3 do
        if $summary ~ "done":
            return $summary
        else:
            escalate to human with $summary
    end
    match $ticket.priority:
        when "high" -> return "urgent"
        when 2:
            $x = [1, 2, 3,]
        else -> escalate
    return null

on message do
    mask EMAIL
    block if message contains "password"
    warn if len(message) > 1000
end
"#;

    #[test]
    fn both_strategies_build_identical_trees() {
        let predictive = parse_source(CORPUS, "corpus.af", ParseStrategy::Predictive).unwrap();
        let backtracking = parse_source(CORPUS, "corpus.af", ParseStrategy::Backtracking).unwrap();
        assert_eq!(predictive, backtracking);
        assert_eq!(predictive.rule, Rule::File);
        // import, 2 models, 2 tools, schema, 2 prompts, retry, timeout,
        // 2 agents, policy, flow, handler
        assert_eq!(predictive.nodes().count(), 15);
    }

    #[test]
    fn every_node_carries_a_span() {
        fn walk(node: &ParseNode) {
            assert!(node.span.start.line >= 1, "{:?} has no span", node.rule);
            for child in node.nodes() {
                walk(child);
            }
        }
        walk(&parse_source(CORPUS, "corpus.af", ParseStrategy::Predictive).unwrap());
    }

    #[test]
    fn syntax_error_reports_expected_and_found() {
        for strategy in [ParseStrategy::Predictive, ParseStrategy::Backtracking] {
            let err = parse_source("agent a\n    instruction p\n", "bad.af", strategy).unwrap_err();
            assert_eq!(err.code, Code::Syntax);
            assert!(err.message.contains("expected `:`"), "{}", err.message);
            assert!(err.message.contains("found newline"), "{}", err.message);
            assert_eq!(err.span.unwrap().start.line, 1);
        }
    }

    #[test]
    fn unknown_declaration_lists_keywords() {
        let err = parse_source("agnet a:\n", "bad.af", ParseStrategy::Predictive).unwrap_err();
        assert!(err.message.starts_with("expected one of"), "{}", err.message);
        assert!(err.message.contains("`agent`"));
        assert!(err.message.contains("found `agnet`"));
    }

    #[test]
    fn backtracking_reports_furthest_failure() {
        let src = "flow f:\n    if $x:\n        return 1\n    else\n        return 2\n";
        let err = parse_source(src, "bad.af", ParseStrategy::Backtracking).unwrap_err();
        assert_eq!(err.span.unwrap().start.line, 4);
        assert!(err.message.contains("`:`"), "{}", err.message);
    }

    #[test]
    fn implicit_property_outside_filter_is_rejected() {
        for strategy in [ParseStrategy::Predictive, ParseStrategy::Backtracking] {
            let err = parse_source("flow f:\n    $x = .confidence\n", "bad.af", strategy).unwrap_err();
            assert_eq!(err.code, Code::Syntax);
            assert!(err.message.contains("found `.`"), "{}", err.message);
        }
    }

    #[test]
    fn contextual_keywords_remain_identifiers() {
        let src = "agent delegate:\n    instruction use\n\nflow loop:\n    run = 1\n    $prompt = run\n    run agent delegate\n";
        for strategy in [ParseStrategy::Predictive, ParseStrategy::Backtracking] {
            let tree = parse_source(src, "kw.af", strategy).unwrap();
            assert_eq!(tree.nodes().count(), 2);
        }
    }

    #[test]
    fn lexical_errors_pass_through() {
        let err = parse_source("model m = a/b @\n", "bad.af", ParseStrategy::Predictive).unwrap_err();
        assert!(err.message.contains("invalid character"));
    }
}
