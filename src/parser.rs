//! Parse schema source into a concrete syntax tree using PEST.
//!
//! Line comments are rewritten to [`COMMENT_PLACEHOLDER`] before tokenizing so
//! that the grammar's comment token never collides with `//` elsewhere;
//! [`restore_comments`] undoes the rewrite for text captured verbatim.

use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

use crate::error::CompileError;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct SchemaParser;

/// What `//` is rewritten to before parsing.
pub const COMMENT_PLACEHOLDER: &str = "#//";

/// Schema text prepared for the grammar. Syntax nodes borrow from it.
#[derive(Debug, Clone)]
pub struct SchemaSource {
    patched: String,
}

impl SchemaSource {
    pub fn new(text: &str) -> Self {
        SchemaSource {
            patched: text.replace("//", COMMENT_PLACEHOLDER),
        }
    }

    /// Source text as handed to the grammar (placeholders in place).
    pub fn patched(&self) -> &str {
        &self.patched
    }

    /// Parse into the root `file` node. Syntax errors are fatal and carry the
    /// line and column of the offending token in the unpatched text.
    pub fn parse(&self) -> Result<Pair<'_, Rule>, CompileError> {
        let mut pairs = SchemaParser::parse(Rule::file, &self.patched).map_err(parse_error)?;
        pairs.next().ok_or_else(|| CompileError::syntax("empty parse"))
    }
}

/// Undo the comment rewrite in a captured fragment of patched source.
pub fn restore_comments(text: &str) -> String {
    text.replace(COMMENT_PLACEHOLDER, "//")
}

fn parse_error(err: pest::error::Error<Rule>) -> CompileError {
    let err = err.renamed_rules(|rule| rule_label(*rule).to_string());
    let (line, column) = match err.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    let column = source_column(err.line(), column);
    CompileError::Parse {
        line,
        column,
        message: restore_comments(&err.variant.message()),
    }
}

/// Map a 1-based column in a patched line back to the unpatched text: every
/// placeholder that starts before the column added one character.
fn source_column(patched_line: &str, column: usize) -> usize {
    let prefix: String = patched_line.chars().take(column.saturating_sub(1)).collect();
    let shifted = prefix.matches(COMMENT_PLACEHOLDER).count();
    column - shifted
}

fn rule_label(rule: Rule) -> &'static str {
    match rule {
        Rule::EOI => "end of input",
        Rule::ident => "identifier",
        Rule::full_ident => "dotted name",
        Rule::user_type => "type name",
        Rule::kw_package => "`package`",
        Rule::kw_import => "`import`",
        Rule::kw_option => "`option`",
        Rule::kw_message => "`message`",
        Rule::kw_enum => "`enum`",
        Rule::kw_extend => "`extend`",
        Rule::kw_extensions => "`extensions`",
        Rule::kw_to => "`to`",
        Rule::kw_service => "`service`",
        Rule::kw_rpc => "`rpc`",
        Rule::kw_returns => "`returns`",
        Rule::number => "number",
        Rule::string => "string",
        Rule::constant => "constant",
        Rule::option_path => "option name",
        Rule::enum_value => "enum value",
        Rule::extension => "extension range",
        Rule::max => "`max`",
        Rule::field => "field",
        Rule::label => "`required`, `optional` or `repeated`",
        Rule::scalar_type => "scalar type",
        Rule::field_option => "field option",
        Rule::rpc => "rpc",
        _ => "declaration",
    }
}
