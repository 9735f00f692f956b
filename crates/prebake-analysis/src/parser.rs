//! Parse façade over oxc.
//!
//! Thin wrapper that turns source text into a [`ParsedModule`] with
//! collected diagnostics. Callers keep the `Allocator` on their stack frame;
//! nothing long-lived holds AST lifetimes.

use oxc_allocator::Allocator;
use oxc_ast::ast::Program;
use oxc_parser::Parser;
use oxc_span::SourceType;
use thiserror::Error;

/// Options for reading source code.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub source_type: SourceType,
    /// Tolerate syntax errors and return the partial AST.
    pub allow_errors: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            source_type: SourceType::mjs(),
            allow_errors: false,
        }
    }
}

impl ParseOptions {
    /// Auto-detect the source type from a file path, defaulting to module
    /// JavaScript.
    pub fn from_path(path: &str) -> Self {
        Self {
            source_type: SourceType::from_path(path).unwrap_or(SourceType::mjs()),
            allow_errors: false,
        }
    }
}

/// A single parser diagnostic.
#[derive(Debug, Clone)]
pub struct ParseDiagnostic {
    pub message: String,
}

/// Parse failure.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("syntax error ({count} total): {first}")]
    Syntax { count: usize, first: String },
}

/// A parsed module: the AST plus its source text and diagnostics.
pub struct ParsedModule<'a> {
    pub program: Program<'a>,
    pub source_text: &'a str,
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl<'a> ParsedModule<'a> {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Parse source code into an AST.
pub fn parse<'a>(
    allocator: &'a Allocator,
    source: &'a str,
    options: ParseOptions,
) -> Result<ParsedModule<'a>, ParseError> {
    let ret = Parser::new(allocator, source, options.source_type).parse();

    let diagnostics: Vec<ParseDiagnostic> = ret
        .errors
        .iter()
        .map(|error| ParseDiagnostic {
            message: error.to_string(),
        })
        .collect();

    if !diagnostics.is_empty() && !options.allow_errors {
        return Err(ParseError::Syntax {
            count: diagnostics.len(),
            first: diagnostics[0].message.clone(),
        });
    }

    Ok(ParsedModule {
        program: ret.program,
        source_text: source,
        diagnostics,
    })
}

/// Precomputed newline offsets for byte-offset → line lookups.
#[derive(Debug)]
pub struct LineIndex {
    newlines: Vec<u32>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let newlines = source
            .bytes()
            .enumerate()
            .filter(|(_, b)| *b == b'\n')
            .map(|(i, _)| i as u32)
            .collect();
        Self { newlines }
    }

    /// 1-based line containing the byte offset.
    pub fn line_of(&self, offset: u32) -> u32 {
        (self.newlines.partition_point(|&nl| nl < offset) + 1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_module_syntax() {
        let allocator = Allocator::default();
        let parsed = parse(
            &allocator,
            "import x from './x.js'; export default x;",
            ParseOptions::default(),
        )
        .unwrap();
        assert!(!parsed.has_errors());
        assert_eq!(parsed.program.body.len(), 2);
    }

    #[test]
    fn parse_reports_syntax_errors() {
        let allocator = Allocator::default();
        let err = parse(&allocator, "import from from;", ParseOptions::default());
        assert!(err.is_err());
    }

    #[test]
    fn line_index_is_one_based() {
        let index = LineIndex::new("a\nbb\nccc\n");
        assert_eq!(index.line_of(0), 1);
        assert_eq!(index.line_of(2), 2);
        assert_eq!(index.line_of(5), 3);
    }
}
