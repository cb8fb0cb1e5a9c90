//! Operation documents
//!
//! Parses the subset of GraphQL the schema needs: `query` and `mutation`
//! operations (the keyword is optional for a lone query), variable
//! definitions with defaults, aliases, arguments and nested selections.
//! Fragments, directives and subscriptions are rejected.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A syntax error, located in the source text
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Syntax Error: {message} ({line}:{column})")]
pub struct DocumentError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl DocumentError {
    fn at(pos: Pos, message: impl Into<String>) -> Self {
        DocumentError {
            message: message.into(),
            line: pos.line,
            column: pos.column,
        }
    }
}

/// 1-based source position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub operations: Vec<OperationDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationDefinition {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDefinition>,
    pub selection: Vec<Field>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    /// Type as written, e.g. `[ID!]!`
    pub type_name: String,
    pub default: Option<InputValue>,
    pub pos: Pos,
}

impl VariableDefinition {
    pub fn is_required(&self) -> bool {
        self.type_name.ends_with('!')
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub selection: Vec<Field>,
    pub pos: Pos,
}

impl Field {
    /// Key of this field in the response object.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Argument or default value literal
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Enum(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
    Variable(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Punct(char),
    Spread,
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Punct(c) => format!("\"{c}\""),
            Token::Spread => "\"...\"".to_string(),
            Token::Name(n) => format!("Name \"{n}\""),
            Token::Int(i) => format!("Int \"{i}\""),
            Token::Float(f) => format!("Float \"{f}\""),
            Token::Str(s) => format!("String \"{s}\""),
            Token::Eof => "<EOF>".to_string(),
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    pos: Pos,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer {
            chars: source.chars().peekable(),
            pos: Pos { line: 1, column: 1 },
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.pos.line += 1;
            self.pos.column = 1;
        } else {
            self.pos.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_ignored(&mut self) {
        while let Some(&c) = self.chars.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' | ',' | '\u{feff}' => {
                    self.bump();
                }
                '#' => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn tokenize(mut self) -> Result<Vec<(Token, Pos)>, DocumentError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ignored();
            let start = self.pos;
            let Some(&c) = self.chars.peek() else {
                tokens.push((Token::Eof, start));
                return Ok(tokens);
            };

            let token = match c {
                '!' | '$' | '(' | ')' | ':' | '=' | '@' | '[' | ']' | '{' | '}' | '|' | '&' => {
                    self.bump();
                    Token::Punct(c)
                }
                '.' => {
                    self.bump();
                    if self.eat('.') && self.eat('.') {
                        Token::Spread
                    } else {
                        return Err(DocumentError::at(start, "Unexpected \".\""));
                    }
                }
                '"' => self.string(start)?,
                '-' | '0'..='9' => self.number(start)?,
                c if c == '_' || c.is_ascii_alphabetic() => {
                    let mut name = String::new();
                    while let Some(&c) = self.chars.peek() {
                        if c == '_' || c.is_ascii_alphanumeric() {
                            name.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    Token::Name(name)
                }
                other => {
                    return Err(DocumentError::at(
                        start,
                        format!("Unexpected character \"{other}\""),
                    ))
                }
            };
            tokens.push((token, start));
        }
    }

    fn number(&mut self, start: Pos) -> Result<Token, DocumentError> {
        let mut text = String::new();
        let mut is_float = false;
        if self.eat('-') {
            text.push('-');
        }
        self.digits(&mut text, start)?;
        if self.eat('.') {
            is_float = true;
            text.push('.');
            self.digits(&mut text, start)?;
        }
        if let Some(&e) = self.chars.peek() {
            if e == 'e' || e == 'E' {
                is_float = true;
                self.bump();
                text.push('e');
                if let Some(&sign) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        self.bump();
                        text.push(sign);
                    }
                }
                self.digits(&mut text, start)?;
            }
        }

        if is_float {
            text.parse()
                .map(Token::Float)
                .map_err(|_| DocumentError::at(start, format!("Invalid number \"{text}\"")))
        } else {
            text.parse()
                .map(Token::Int)
                .map_err(|_| DocumentError::at(start, format!("Int out of range \"{text}\"")))
        }
    }

    fn digits(&mut self, text: &mut String, start: Pos) -> Result<(), DocumentError> {
        let before = text.len();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if text.len() == before {
            return Err(DocumentError::at(start, "Invalid number, expected digit"));
        }
        Ok(())
    }

    fn string(&mut self, start: Pos) -> Result<Token, DocumentError> {
        self.bump();
        if self.eat('"') {
            if self.eat('"') {
                return self.block_string(start);
            }
            return Ok(Token::Str(String::new()));
        }

        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(DocumentError::at(start, "Unterminated string")),
                Some('"') => return Ok(Token::Str(value)),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('b') => '\u{8}',
                        Some('f') => '\u{c}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('u') => {
                            let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                            u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| {
                                    DocumentError::at(start, format!("Invalid unicode escape \"\\u{hex}\""))
                                })?
                        }
                        other => {
                            return Err(DocumentError::at(
                                start,
                                format!("Invalid escape \"\\{}\"", other.unwrap_or(' ')),
                            ))
                        }
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn block_string(&mut self, start: Pos) -> Result<Token, DocumentError> {
        let mut raw = String::new();
        loop {
            match self.bump() {
                None => return Err(DocumentError::at(start, "Unterminated string")),
                Some('"') if self.eat('"') => {
                    if self.eat('"') {
                        return Ok(Token::Str(dedent_block(&raw)));
                    }
                    raw.push_str("\"\"");
                }
                Some('\\') if self.chars.peek() == Some(&'"') => {
                    // `\"""` is an escaped delimiter; anything else stays raw.
                    let mut quotes = 0;
                    while quotes < 3 && self.eat('"') {
                        quotes += 1;
                    }
                    if quotes < 3 {
                        raw.push('\\');
                    }
                    raw.extend(std::iter::repeat('"').take(quotes));
                }
                Some(c) => raw.push(c),
            }
        }
    }
}

/// Strip common indentation and surrounding blank lines of a block string.
///
/// Only spaces and tabs count as indentation.
fn dedent_block(raw: &str) -> String {
    fn leading(line: &str) -> usize {
        line.len() - line.trim_start_matches([' ', '\t']).len()
    }
    fn blank(line: &str) -> bool {
        line.trim_matches([' ', '\t']).is_empty()
    }

    let lines: Vec<&str> = raw.lines().collect();
    let indent = lines
        .iter()
        .skip(1)
        .filter(|l| !blank(l))
        .map(|l| leading(l))
        .min()
        .unwrap_or(0);

    let mut out: Vec<&str> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| {
            let strip = if i == 0 { leading(l) } else { leading(l).min(indent) };
            &l[strip..]
        })
        .collect();
    while out.first().is_some_and(|l| blank(l)) {
        out.remove(0);
    }
    while out.last().is_some_and(|l| blank(l)) {
        out.pop();
    }
    out.join("\n")
}

/// Deepest nesting of selections, list/object values and list types.
pub const MAX_DEPTH: usize = 64;

struct Parser {
    tokens: Vec<(Token, Pos)>,
    index: usize,
    depth: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<(), DocumentError> {
        if self.depth >= MAX_DEPTH {
            return Err(DocumentError::at(
                self.pos(),
                format!("Document nesting exceeds {MAX_DEPTH} levels"),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)].0
    }

    fn pos(&self) -> Pos {
        self.tokens[self.index.min(self.tokens.len() - 1)].1
    }

    fn next(&mut self) -> (Token, Pos) {
        let item = self.tokens[self.index.min(self.tokens.len() - 1)].clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        item
    }

    fn unexpected(&self) -> DocumentError {
        DocumentError::at(self.pos(), format!("Unexpected {}", self.peek().describe()))
    }

    fn at_punct(&self, c: char) -> bool {
        *self.peek() == Token::Punct(c)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.at_punct(c) {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), DocumentError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(DocumentError::at(
                self.pos(),
                format!("Expected \"{c}\", found {}", self.peek().describe()),
            ))
        }
    }

    fn expect_name(&mut self) -> Result<String, DocumentError> {
        match self.next() {
            (Token::Name(name), _) => Ok(name),
            (other, pos) => Err(DocumentError::at(
                pos,
                format!("Expected Name, found {}", other.describe()),
            )),
        }
    }

    fn document(&mut self) -> Result<Document, DocumentError> {
        let mut operations = Vec::new();
        while *self.peek() != Token::Eof {
            operations.push(self.operation()?);
        }
        if operations.is_empty() {
            return Err(DocumentError::at(self.pos(), "Document contains no operations"));
        }
        Ok(Document { operations })
    }

    fn operation(&mut self) -> Result<OperationDefinition, DocumentError> {
        let pos = self.pos();
        if self.at_punct('{') {
            return Ok(OperationDefinition {
                kind: OperationKind::Query,
                name: None,
                variables: Vec::new(),
                selection: self.selection_set()?,
                pos,
            });
        }

        let kind = match self.peek() {
            Token::Name(n) if n == "query" => OperationKind::Query,
            Token::Name(n) if n == "mutation" => OperationKind::Mutation,
            Token::Name(n) if n == "subscription" => {
                return Err(DocumentError::at(pos, "Subscriptions are not supported"))
            }
            Token::Name(n) if n == "fragment" => {
                return Err(DocumentError::at(pos, "Fragments are not supported"))
            }
            _ => return Err(self.unexpected()),
        };
        self.next();

        let name = match self.peek() {
            Token::Name(_) => Some(self.expect_name()?),
            _ => None,
        };
        let variables = if self.at_punct('(') {
            self.variable_definitions()?
        } else {
            Vec::new()
        };
        self.reject_directives()?;

        Ok(OperationDefinition {
            kind,
            name,
            variables,
            selection: self.selection_set()?,
            pos,
        })
    }

    fn variable_definitions(&mut self) -> Result<Vec<VariableDefinition>, DocumentError> {
        self.expect_punct('(')?;
        let mut definitions = Vec::new();
        while !self.eat_punct(')') {
            let pos = self.pos();
            self.expect_punct('$')?;
            let name = self.expect_name()?;
            self.expect_punct(':')?;
            let type_name = self.type_reference()?;
            let default = if self.eat_punct('=') {
                Some(self.value(true)?)
            } else {
                None
            };
            definitions.push(VariableDefinition {
                name,
                type_name,
                default,
                pos,
            });
        }
        if definitions.is_empty() {
            return Err(DocumentError::at(self.pos(), "Expected a variable definition"));
        }
        Ok(definitions)
    }

    fn type_reference(&mut self) -> Result<String, DocumentError> {
        let mut rendered = if self.eat_punct('[') {
            self.descend()?;
            let inner = self.type_reference()?;
            self.expect_punct(']')?;
            self.ascend();
            format!("[{inner}]")
        } else {
            self.expect_name()?
        };
        if self.eat_punct('!') {
            rendered.push('!');
        }
        Ok(rendered)
    }

    fn reject_directives(&self) -> Result<(), DocumentError> {
        if self.at_punct('@') {
            return Err(DocumentError::at(self.pos(), "Directives are not supported"));
        }
        Ok(())
    }

    fn selection_set(&mut self) -> Result<Vec<Field>, DocumentError> {
        self.descend()?;
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        while !self.eat_punct('}') {
            if *self.peek() == Token::Spread {
                return Err(DocumentError::at(self.pos(), "Fragments are not supported"));
            }
            fields.push(self.field()?);
        }
        if fields.is_empty() {
            return Err(DocumentError::at(self.pos(), "Expected a field selection"));
        }
        self.ascend();
        Ok(fields)
    }

    fn field(&mut self) -> Result<Field, DocumentError> {
        let pos = self.pos();
        let first = self.expect_name()?;
        let (alias, name) = if self.eat_punct(':') {
            (Some(first), self.expect_name()?)
        } else {
            (None, first)
        };

        let mut arguments = Vec::new();
        if self.eat_punct('(') {
            while !self.eat_punct(')') {
                let arg = self.expect_name()?;
                self.expect_punct(':')?;
                arguments.push((arg, self.value(false)?));
            }
        }
        self.reject_directives()?;

        let selection = if self.at_punct('{') {
            self.selection_set()?
        } else {
            Vec::new()
        };

        Ok(Field {
            alias,
            name,
            arguments,
            selection,
            pos,
        })
    }

    fn value(&mut self, constant: bool) -> Result<InputValue, DocumentError> {
        let pos = self.pos();
        match self.next().0 {
            Token::Punct('$') if !constant => Ok(InputValue::Variable(self.expect_name()?)),
            Token::Int(i) => Ok(InputValue::Int(i)),
            Token::Float(f) => Ok(InputValue::Float(f)),
            Token::Str(s) => Ok(InputValue::String(s)),
            Token::Name(n) => Ok(match n.as_str() {
                "true" => InputValue::Boolean(true),
                "false" => InputValue::Boolean(false),
                "null" => InputValue::Null,
                _ => InputValue::Enum(n),
            }),
            Token::Punct('[') => {
                self.descend()?;
                let mut items = Vec::new();
                while !self.eat_punct(']') {
                    items.push(self.value(constant)?);
                }
                self.ascend();
                Ok(InputValue::List(items))
            }
            Token::Punct('{') => {
                self.descend()?;
                let mut fields = Vec::new();
                while !self.eat_punct('}') {
                    let key = self.expect_name()?;
                    self.expect_punct(':')?;
                    fields.push((key, self.value(constant)?));
                }
                self.ascend();
                Ok(InputValue::Object(fields))
            }
            other => Err(DocumentError::at(
                pos,
                format!("Unexpected {}", other.describe()),
            )),
        }
    }
}

/// Parse an operation document.
pub fn parse(source: &str) -> Result<Document, DocumentError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser {
        tokens,
        index: 0,
        depth: 0,
    }
    .document()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthand_query_with_nested_selection() {
        let doc = parse("{ edgeTxReleases { id name assets { url } } }").unwrap();
        assert_eq!(doc.operations.len(), 1);
        let op = &doc.operations[0];
        assert_eq!(op.kind, OperationKind::Query);
        assert_eq!(op.selection[0].name, "edgeTxReleases");
        assert_eq!(op.selection[0].selection[2].selection[0].name, "url");
    }

    #[test]
    fn named_mutation_with_variables_and_defaults() {
        let doc = parse(
            r#"
            # upload a custom build
            mutation Register($data: String!, $name: String = "firmware.bin") {
              uploaded: registerLocalFirmware(firmwareBase64Data: $data, fileName: $name) {
                id
              }
            }
            "#,
        )
        .unwrap();

        let op = &doc.operations[0];
        assert_eq!(op.kind, OperationKind::Mutation);
        assert_eq!(op.name.as_deref(), Some("Register"));
        assert_eq!(op.variables.len(), 2);
        assert!(op.variables[0].is_required());
        assert_eq!(
            op.variables[1].default,
            Some(InputValue::String("firmware.bin".into()))
        );

        let field = &op.selection[0];
        assert_eq!(field.response_key(), "uploaded");
        assert_eq!(field.name, "registerLocalFirmware");
        assert_eq!(
            field.arguments[0],
            ("firmwareBase64Data".to_string(), InputValue::Variable("data".into()))
        );
    }

    #[test]
    fn literal_values() {
        let doc = parse(
            r#"{ f(a: -12, b: 1.5e3, c: true, d: null, e: ENUM, g: [1 2], h: {k: "v\n\u0041"}) }"#,
        )
        .unwrap();
        let args = &doc.operations[0].selection[0].arguments;
        assert_eq!(args[0].1, InputValue::Int(-12));
        assert_eq!(args[1].1, InputValue::Float(1500.0));
        assert_eq!(args[2].1, InputValue::Boolean(true));
        assert_eq!(args[3].1, InputValue::Null);
        assert_eq!(args[4].1, InputValue::Enum("ENUM".into()));
        assert_eq!(
            args[5].1,
            InputValue::List(vec![InputValue::Int(1), InputValue::Int(2)])
        );
        assert_eq!(
            args[6].1,
            InputValue::Object(vec![("k".into(), InputValue::String("v\nA".into()))])
        );
    }

    #[test]
    fn block_string_is_dedented() {
        let doc = parse("{ f(s: \"\"\"\n    first\n      second\n  \"\"\") }").unwrap();
        assert_eq!(
            doc.operations[0].selection[0].arguments[0].1,
            InputValue::String("first\n  second".into())
        );
    }

    #[test]
    fn block_string_keeps_non_ascii_leading_characters() {
        let doc = parse("{ f(s: \"\"\"\n\u{3000}a\n b\n\"\"\") }").unwrap();
        assert_eq!(
            doc.operations[0].selection[0].arguments[0].1,
            InputValue::String("\u{3000}a\n b".into())
        );

        let doc = parse("{ f(s: \"\"\"\n  \u{a0}x\n  y\"\"\") }").unwrap();
        assert_eq!(
            doc.operations[0].selection[0].arguments[0].1,
            InputValue::String("\u{a0}x\ny".into())
        );
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let lists = format!(
            "{{ f(v: {}{}) }}",
            "[".repeat(200_000),
            "]".repeat(200_000)
        );
        assert!(parse(&lists).unwrap_err().message.contains("nesting"));

        let selections = format!("{}{}", "{ f ".repeat(100_000), "}".repeat(100_000));
        assert!(parse(&selections).unwrap_err().message.contains("nesting"));

        let types = format!("query($v: {}ID{}) {{ f }}", "[".repeat(1_000), "]".repeat(1_000));
        assert!(parse(&types).unwrap_err().message.contains("nesting"));
    }

    #[test]
    fn nesting_up_to_the_limit_parses() {
        let value = format!("{}1{}", "[".repeat(MAX_DEPTH - 1), "]".repeat(MAX_DEPTH - 1));
        assert!(parse(&format!("{{ f(v: {value}) }}")).is_ok());

        let selections = format!("{}{}", "{ f ".repeat(MAX_DEPTH), "}".repeat(MAX_DEPTH));
        assert!(parse(&selections).is_ok());
    }

    #[test]
    fn errors_carry_positions() {
        let err = parse("{\n  edgeTxRelease(id: ) { id }\n}").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 21);
        assert!(err.message.contains("\")\""));
    }

    #[test]
    fn fragments_and_directives_are_rejected() {
        assert!(parse("{ ...F }").unwrap_err().message.contains("Fragments"));
        assert!(parse("fragment F on Query { id }").is_err());
        assert!(parse("{ id @skip(if: true) }")
            .unwrap_err()
            .message
            .contains("Directives"));
    }

    #[test]
    fn empty_and_unterminated_documents_fail() {
        assert!(parse("   # nothing\n").is_err());
        assert!(parse("{ edgeTxReleases { id }").is_err());
        assert!(parse("{ f(s: \"open) }").is_err());
        assert!(parse("{ }").is_err());
    }

    #[test]
    fn default_values_must_be_constant() {
        assert!(parse("query($a: ID = $b) { f }").is_err());
    }
}
