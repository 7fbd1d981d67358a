//! agentflow-core: front end of the agentflow compiler.
//!
//! Source text goes through [`lexer::tokenize`], [`parser::parse`] and
//! [`transform::transform`] to become an [`ast::CompilationUnit`]. Every
//! stage reports faults as [`Diagnostic`] values; [`report`] renders them.
//!
//! Lexical and syntax errors are fatal for a file and produce exactly one
//! diagnostic. Later stages (in `agentflow-analyze`) accumulate.

pub mod ast;
pub mod cst;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod report;
pub mod source;
pub mod span;
pub mod transform;

pub use ast::CompilationUnit;
pub use error::{Code, Diagnostic, Label, Severity};
pub use parser::ParseStrategy;
pub use source::{FileSystemProvider, InMemoryProvider, SourceProvider};
pub use span::{Position, Span};

/// Lex, parse and transform one file.
pub fn parse_unit(
    src: &str,
    file: &str,
    strategy: ParseStrategy,
) -> Result<CompilationUnit, Diagnostic> {
    let tree = parser::parse_source(src, file, strategy)?;
    transform::transform(&tree, file)
}
