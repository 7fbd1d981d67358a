//! Tokenizer with off-side rule handling.
//!
//! The lexer is a lazy iterator over one source file. Indentation is tracked
//! with an explicit stack owned by the lexer instance; increases produce an
//! `Indent` token, decreases one `Dedent` per popped level. Keywords are not
//! reserved here: every word is a `Name` and the parser decides what it means
//! in each position.

use crate::error::{Code, Diagnostic};
use crate::span::{Position, Span};
use std::collections::VecDeque;

const TAB_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Identifiers and keywords
    Name,
    /// `$name` variable spelling (text keeps the sigil)
    Var,
    /// Quoted string literal (text is the unescaped content)
    Str,
    /// Triple-quoted prompt body, kept verbatim
    RawStr,
    Int,
    Float,
    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    Slash,
    Question,
    // Operators
    Assign,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// `~` normalized equality
    Tilde,
    Plus,
    Arrow,
    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Name => "identifier",
            TokenKind::Var => "variable",
            TokenKind::Str => "string literal",
            TokenKind::RawStr => "triple-quoted string",
            TokenKind::Int => "integer",
            TokenKind::Float => "number",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::LBracket => "`[`",
            TokenKind::RBracket => "`]`",
            TokenKind::LBrace => "`{`",
            TokenKind::RBrace => "`}`",
            TokenKind::Colon => "`:`",
            TokenKind::Comma => "`,`",
            TokenKind::Dot => "`.`",
            TokenKind::Slash => "`/`",
            TokenKind::Question => "`?`",
            TokenKind::Assign => "`=`",
            TokenKind::Eq => "`==`",
            TokenKind::Neq => "`!=`",
            TokenKind::Lt => "`<`",
            TokenKind::Lte => "`<=`",
            TokenKind::Gt => "`>`",
            TokenKind::Gte => "`>=`",
            TokenKind::Tilde => "`~`",
            TokenKind::Plus => "`+`",
            TokenKind::Arrow => "`->`",
            TokenKind::Newline => "newline",
            TokenKind::Indent => "indented block",
            TokenKind::Dedent => "end of block",
            TokenKind::Eof => "end of input",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Name && self.text == word
    }

    /// Description used in "found X" messages.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Name | TokenKind::Var => format!("`{}`", self.text),
            TokenKind::Int | TokenKind::Float => format!("number `{}`", self.text),
            other => other.describe().to_owned(),
        }
    }
}

pub struct Lexer<'a> {
    file: &'a str,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    indents: Vec<usize>,
    brackets: Vec<(char, Span)>,
    pending: VecDeque<Token>,
    at_line_start: bool,
    last: Option<TokenKind>,
    done: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &str, file: &'a str) -> Self {
        let mut chars: Vec<char> = src.chars().collect();
        if chars.first() == Some(&'\u{feff}') {
            chars.remove(0);
        }
        Lexer {
            file,
            chars,
            pos: 0,
            line: 1,
            column: 1,
            indents: vec![0],
            brackets: Vec::new(),
            pending: VecDeque::new(),
            at_line_start: true,
            last: None,
            done: false,
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn here(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn emit(&mut self, kind: TokenKind, text: impl Into<String>, span: Span) {
        self.pending.push_back(Token {
            kind,
            text: text.into(),
            span,
        });
        self.last = Some(kind);
    }

    /// Emit a token running from `start` to the current position.
    fn emit_from(&mut self, kind: TokenKind, text: impl Into<String>, start: Position) {
        let span = Span::new(start, self.here());
        self.emit(kind, text, span);
    }

    fn error(&self, code: Code, span: Span, message: impl Into<String>) -> Diagnostic {
        Diagnostic::lex(code, self.file, span, message)
    }

    fn fill(&mut self) -> Result<(), Diagnostic> {
        if self.at_line_start && self.brackets.is_empty() {
            return self.line_start();
        }
        while matches!(self.peek_char(), Some(' ' | '\t' | '\r' | '\x0c')) {
            self.bump();
        }
        let Some(c) = self.peek_char() else {
            return self.finish();
        };
        match c {
            '#' => {
                self.skip_comment();
                Ok(())
            }
            '\n' => {
                let start = self.here();
                self.bump();
                // Newlines inside brackets join lines.
                if self.brackets.is_empty() {
                    let end = Position::new(start.line, start.column + 1);
                    self.emit(TokenKind::Newline, "\n", Span::new(start, end));
                    self.at_line_start = true;
                }
                Ok(())
            }
            _ => self.lex_token(c),
        }
    }

    fn line_start(&mut self) -> Result<(), Diagnostic> {
        let mut width = 0usize;
        while let Some(c) = self.peek_char() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\r' | '\x0c' => {}
                _ => break,
            }
            self.bump();
        }
        match self.peek_char() {
            None => self.finish(),
            Some('\n') => {
                self.bump();
                Ok(())
            }
            Some('#') => {
                self.skip_comment();
                Ok(())
            }
            Some(_) => {
                self.at_line_start = false;
                self.indent_to(width)
            }
        }
    }

    fn indent_to(&mut self, width: usize) -> Result<(), Diagnostic> {
        let here = self.here();
        let marker = Span::new(here, here);
        let top = self.indents.last().copied().unwrap_or(0);
        if width > top {
            self.indents.push(width);
            self.emit(TokenKind::Indent, "", marker);
        } else if width < top {
            while self.indents.last().copied().unwrap_or(0) > width {
                self.indents.pop();
                self.emit(TokenKind::Dedent, "", marker);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(self.error(
                    Code::IndentationMismatch,
                    marker,
                    format!(
                        "unindent to column {} does not match any outer indentation level",
                        here.column
                    ),
                ));
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Diagnostic> {
        if let Some((open, span)) = self.brackets.last() {
            return Err(self.error(
                Code::Syntax,
                *span,
                format!("unterminated block: '{}' is never closed", open),
            ));
        }
        let here = self.here();
        let marker = Span::new(here, here);
        if matches!(self.last, Some(k) if k != TokenKind::Newline) {
            self.emit(TokenKind::Newline, "", marker);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.emit(TokenKind::Dedent, "", marker);
        }
        self.emit(TokenKind::Eof, "", marker);
        self.done = true;
        Ok(())
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek_char() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_token(&mut self, c: char) -> Result<(), Diagnostic> {
        let start = self.here();
        let next = self.peek_at(1);
        match c {
            '"' => return self.lex_string(start),
            '$' => return self.lex_var(start),
            c if c.is_ascii_digit() => return self.lex_number(start),
            '-' if next.is_some_and(|n| n.is_ascii_digit()) => return self.lex_number(start),
            c if is_ident_start(c) => {
                self.lex_name(start);
                return Ok(());
            }
            '(' | '[' | '{' => {
                self.bump();
                let span = Span::new(start, self.here());
                self.brackets.push((c, span));
                let kind = match c {
                    '(' => TokenKind::LParen,
                    '[' => TokenKind::LBracket,
                    _ => TokenKind::LBrace,
                };
                self.emit(kind, c.to_string(), span);
                return Ok(());
            }
            ')' | ']' | '}' => return self.close_bracket(c, start),
            _ => {}
        }

        let (kind, len) = match (c, next) {
            ('-', Some('>')) => (TokenKind::Arrow, 2),
            ('=', Some('=')) => (TokenKind::Eq, 2),
            ('!', Some('=')) => (TokenKind::Neq, 2),
            ('<', Some('=')) => (TokenKind::Lte, 2),
            ('>', Some('=')) => (TokenKind::Gte, 2),
            ('=', _) => (TokenKind::Assign, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            (':', _) => (TokenKind::Colon, 1),
            (',', _) => (TokenKind::Comma, 1),
            ('.', _) => (TokenKind::Dot, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('?', _) => (TokenKind::Question, 1),
            ('~', _) => (TokenKind::Tilde, 1),
            ('+', _) => (TokenKind::Plus, 1),
            _ => {
                let end = Position::new(start.line, start.column + 1);
                return Err(self.error(
                    Code::Syntax,
                    Span::new(start, end),
                    format!("invalid character '{}'", c.escape_debug()),
                ));
            }
        };
        let mut text = String::new();
        for _ in 0..len {
            if let Some(ch) = self.bump() {
                text.push(ch);
            }
        }
        self.emit_from(kind, text, start);
        Ok(())
    }

    fn close_bracket(&mut self, c: char, start: Position) -> Result<(), Diagnostic> {
        self.bump();
        let span = Span::new(start, self.here());
        let expected_open = match c {
            ')' => '(',
            ']' => '[',
            _ => '{',
        };
        match self.brackets.pop() {
            None => Err(self.error(
                Code::Syntax,
                span,
                format!("unexpected closing '{}'", c),
            )),
            Some((open, _)) if open != expected_open => Err(self.error(
                Code::Syntax,
                span,
                format!("mismatched closing '{}' for '{}'", c, open),
            )),
            Some(_) => {
                let kind = match c {
                    ')' => TokenKind::RParen,
                    ']' => TokenKind::RBracket,
                    _ => TokenKind::RBrace,
                };
                self.emit(kind, c.to_string(), span);
                Ok(())
            }
        }
    }

    /// Consume identifier characters. `-` is part of a word when it is
    /// followed by an alphanumeric, so `claude-sonnet` is one name.
    fn eat_word_chars(&mut self) {
        while let Some(c) = self.peek_char() {
            let continues = is_ident_char(c)
                || (c == '-' && self.peek_at(1).is_some_and(|n| n.is_alphanumeric()));
            if !continues {
                break;
            }
            self.bump();
        }
    }

    fn text_from(&self, begin: usize) -> String {
        self.chars[begin..self.pos].iter().collect()
    }

    fn lex_name(&mut self, start: Position) {
        let begin = self.pos;
        self.eat_word_chars();
        let text = self.text_from(begin);
        self.emit_from(TokenKind::Name, text, start);
    }

    fn lex_var(&mut self, start: Position) -> Result<(), Diagnostic> {
        let begin = self.pos;
        self.bump();
        if !self.peek_char().is_some_and(is_ident_start) {
            return Err(self.error(
                Code::Syntax,
                Span::new(start, self.here()),
                "expected a variable name after '$'",
            ));
        }
        self.eat_word_chars();
        let text = self.text_from(begin);
        self.emit_from(TokenKind::Var, text, start);
        Ok(())
    }

    fn lex_number(&mut self, start: Position) -> Result<(), Diagnostic> {
        let begin = self.pos;
        let negative = self.peek_char() == Some('-');
        if negative {
            self.bump();
        }
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek_char() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
            let text = self.text_from(begin);
            self.emit_from(TokenKind::Float, text, start);
            return Ok(());
        }

        // Words that start with digits, such as `4o` in a model name.
        let word_follows = self.peek_char().is_some_and(is_ident_start)
            || (self.peek_char() == Some('-')
                && self.peek_at(1).is_some_and(|n| n.is_alphanumeric()));
        if !negative && word_follows {
            self.eat_word_chars();
            let text = self.text_from(begin);
            self.emit_from(TokenKind::Name, text, start);
            return Ok(());
        }

        let text = self.text_from(begin);
        if text.parse::<i64>().is_err() {
            return Err(self.error(
                Code::Syntax,
                Span::new(start, self.here()),
                format!("integer literal '{}' is out of range", text),
            ));
        }
        self.emit_from(TokenKind::Int, text, start);
        Ok(())
    }

    fn lex_string(&mut self, start: Position) -> Result<(), Diagnostic> {
        self.bump();
        if self.peek_char() == Some('"') && self.peek_at(1) == Some('"') {
            self.bump();
            self.bump();
            return self.lex_raw_string(start);
        }
        let mut s = String::new();
        loop {
            match self.peek_char() {
                None | Some('\n') => {
                    return Err(self.error(
                        Code::Syntax,
                        Span::new(start, self.here()),
                        "unterminated string literal",
                    ));
                }
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    let Some(escaped) = self.bump() else {
                        return Err(self.error(
                            Code::Syntax,
                            Span::new(start, self.here()),
                            "unterminated string literal",
                        ));
                    };
                    match escaped {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        'r' => s.push('\r'),
                        '"' => s.push('"'),
                        '\\' => s.push('\\'),
                        '$' => s.push('$'),
                        other => {
                            s.push('\\');
                            s.push(other);
                        }
                    }
                }
                Some(c) => {
                    self.bump();
                    s.push(c);
                }
            }
        }
        self.emit_from(TokenKind::Str, s, start);
        Ok(())
    }

    fn lex_raw_string(&mut self, start: Position) -> Result<(), Diagnostic> {
        let begin = self.pos;
        loop {
            match self.peek_char() {
                None => {
                    return Err(self.error(
                        Code::Syntax,
                        Span::new(start, self.here()),
                        "unterminated triple-quoted string",
                    ));
                }
                Some('"') if self.peek_at(1) == Some('"') && self.peek_at(2) == Some('"') => {
                    let body = self.text_from(begin);
                    self.bump();
                    self.bump();
                    self.bump();
                    self.emit_from(TokenKind::RawStr, body, start);
                    return Ok(());
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, Diagnostic>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tok) = self.pending.pop_front() {
                return Some(Ok(tok));
            }
            if self.done {
                return None;
            }
            if let Err(diag) = self.fill() {
                // Fail fast: nothing after the first lexical error.
                self.done = true;
                self.pending.clear();
                return Some(Err(diag));
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Tokenize a whole file, stopping at the first lexical error.
pub fn tokenize(src: &str, file: &str) -> Result<Vec<Token>, Diagnostic> {
    let tokens: Vec<Token> = Lexer::new(src, file).collect::<Result<_, _>>()?;
    tracing::trace!(file, tokens = tokens.len(), "tokenized");
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src, "test.af")
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn lex_err(src: &str) -> Diagnostic {
        tokenize(src, "test.af").unwrap_err()
    }

    #[test]
    fn indentation_produces_block_tokens() {
        assert_eq!(
            kinds("agent a:\n    instruction p\n"),
            vec![Name, Name, Colon, Newline, Indent, Name, Name, Newline, Dedent, Eof]
        );
    }

    #[test]
    fn nested_blocks_close_at_end_of_input() {
        assert_eq!(
            kinds("a:\n  b:\n    c"),
            vec![
                Name, Colon, Newline, Indent, Name, Colon, Newline, Indent, Name, Newline,
                Dedent, Dedent, Eof
            ]
        );
    }

    #[test]
    fn inconsistent_dedent_reports_column() {
        let err = lex_err("flow f:\n    if x:\n        y = 1\n      z = 2\n");
        assert_eq!(err.code, Code::IndentationMismatch);
        let span = err.span.unwrap();
        assert_eq!(span.start.line, 4);
        assert_eq!(span.start.column, 7);
    }

    #[test]
    fn tabs_advance_to_multiples_of_eight() {
        // A tab and eight spaces are the same level.
        assert_eq!(
            kinds("a:\n\tb\n        c\n"),
            vec![Name, Colon, Newline, Indent, Name, Newline, Name, Newline, Dedent, Eof]
        );
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        assert_eq!(
            kinds("a\n\n# note\n      # indented note\nb # trailing\n"),
            vec![Name, Newline, Name, Newline, Eof]
        );
    }

    #[test]
    fn brackets_join_lines() {
        assert_eq!(
            kinds("x = [1,\n      2]\n"),
            vec![Name, Assign, LBracket, Int, Comma, Int, RBracket, Newline, Eof]
        );
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let err = lex_err("x = \"abc\ny = 1\n");
        assert_eq!(err.code, Code::Syntax);
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn unclosed_bracket_is_fatal() {
        let err = lex_err("x = (1\n");
        assert_eq!(err.code, Code::Syntax);
        assert!(err.message.contains("unterminated block"));
    }

    #[test]
    fn invalid_character_is_fatal() {
        let err = lex_err("x = 1 @\n");
        assert_eq!(err.code, Code::Syntax);
        assert!(err.message.contains('@'));
        assert_eq!(err.span.unwrap().start.column, 7);
    }

    #[test]
    fn lexing_is_lazy_and_stops_after_error() {
        let mut lexer = Lexer::new("a @ b", "test.af");
        assert_eq!(lexer.next().unwrap().unwrap().text, "a");
        assert!(lexer.next().unwrap().is_err());
        assert!(lexer.next().is_none());
    }

    #[test]
    fn raw_strings_are_opaque() {
        let tokens = tokenize("prompt p: \"\"\"Hello\n  $name # not a comment\n\"\"\"\n", "t")
            .unwrap();
        let raw = tokens.iter().find(|t| t.kind == RawStr).unwrap();
        assert_eq!(raw.text, "Hello\n  $name # not a comment\n");
        assert_eq!(raw.span.start.line, 1);
        assert_eq!(raw.span.end.line, 3);
        // The lines inside the body produce no layout tokens.
        assert_eq!(tokens.iter().filter(|t| t.kind == Newline).count(), 1);
    }

    #[test]
    fn string_escapes_are_resolved() {
        let tokens = tokenize(r#"x = "a\"b\n""#, "t").unwrap();
        assert_eq!(tokens[2].kind, Str);
        assert_eq!(tokens[2].text, "a\"b\n");
    }

    #[test]
    fn escaped_dollar_is_a_plain_dollar() {
        let tokens = tokenize(r#"x = "costs \$5, \q""#, "t").unwrap();
        assert_eq!(tokens[2].text, "costs $5, \\q");
    }

    #[test]
    fn keywords_are_plain_names() {
        let tokens = tokenize("delegate = loop\n", "t").unwrap();
        assert!(tokens[0].is_word("delegate"));
        assert!(tokens[2].is_word("loop"));
    }

    #[test]
    fn hyphenated_names_and_model_versions() {
        let tokens = tokenize("model m = anthropic/claude-3.5-sonnet\n", "t").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["model", "m", "=", "anthropic", "/", "claude-3", ".", "5-sonnet", "\n", ""]
        );
        assert_eq!(tokens[7].kind, Name);
    }

    #[test]
    fn operators_and_negative_numbers() {
        assert_eq!(
            kinds("when -1 -> return\n"),
            vec![Name, Int, Arrow, Name, Newline, Eof]
        );
        assert_eq!(
            kinds("a ~ b == c != d <= e >= f < g > h + i\n"),
            vec![
                Name, Tilde, Name, Eq, Name, Neq, Name, Lte, Name, Gte, Name, Lt, Name, Gt,
                Name, Plus, Name, Newline, Eof
            ]
        );
    }

    #[test]
    fn variables_keep_sigil_and_floats_parse() {
        let tokens = tokenize("$score >= 0.75\n", "t").unwrap();
        assert_eq!(tokens[0].kind, Var);
        assert_eq!(tokens[0].text, "$score");
        assert_eq!(tokens[2].kind, Float);
        assert_eq!(tokens[2].text, "0.75");
    }

    #[test]
    fn token_positions_are_one_based() {
        let tokens = tokenize("model main\n", "t").unwrap();
        assert_eq!(tokens[1].span.start, Position::new(1, 7));
        assert_eq!(tokens[1].span.end, Position::new(1, 11));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn lexing_never_panics_and_balances_blocks(src in "[a-z$\"#:=() \\t\\n-]{0,80}") {
                if let Ok(tokens) = tokenize(&src, "prop.af") {
                    let indents = tokens.iter().filter(|t| t.kind == Indent).count();
                    let dedents = tokens.iter().filter(|t| t.kind == Dedent).count();
                    prop_assert_eq!(indents, dedents);
                    prop_assert_eq!(tokens.last().map(|t| t.kind), Some(Eof));
                }
            }
        }
    }
}
