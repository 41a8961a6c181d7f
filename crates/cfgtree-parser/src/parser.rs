//! Explicit-stack parser producing class definitions.
//!
//! Class bodies and arrays are tracked on heap stacks rather than the call
//! stack, so nesting depth is limited only by [`ParseOptions::max_depth`].

use std::path::{Path, PathBuf};

use cfgtree_core::{
    ClassDefinition, ClassKind, Diagnostic, DiagnosticKind, Location, ParsedFile, PropertyValue, SourceId,
};
use tracing::debug;

use crate::lexer::{tokenize, Token, TokenKind};

/// Default limit on nested class bodies plus arrays.
pub const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    pub max_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Parses one file with default options.
pub fn parse_source(text: &str, source: &SourceId, file: &Path) -> ParsedFile {
    parse_with_options(text, source, file, &ParseOptions::default())
}

/// Parses one file. Never fails: syntax problems become diagnostics and the
/// definitions parsed around them are kept.
pub fn parse_with_options(text: &str, source: &SourceId, file: &Path, options: &ParseOptions) -> ParsedFile {
    let parsed = Parser::new(text, source, file, options).run();
    debug!(
        "Parsed {}: {} classes, {} enums, {} diagnostics",
        file.display(),
        parsed.definitions.len(),
        parsed.enums.len(),
        parsed.diagnostics.len()
    );
    parsed
}

/// Parses a scalar value the way bare text is interpreted: a number when it
/// reads as a finite one (optional sign, decimal, exponent or `0x` hex),
/// otherwise the trimmed text.
pub fn scalar_from_raw(raw: &str) -> PropertyValue {
    let raw = raw.trim();
    match parse_number(raw) {
        Some(n) => PropertyValue::Number(n),
        None => PropertyValue::Text(raw.to_string()),
    }
}

pub fn parse_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let sign = if negative { -1.0 } else { 1.0 };

    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().map(|v| sign * v as f64);
    }

    let first = body.chars().next()?;
    if !(first.is_ascii_digit() || first == '.') {
        return None;
    }
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return None;
    }
    body.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| sign * v)
}

/// A syntax error plus how many braces of the failed construct were already
/// consumed, so recovery can find the right closing delimiter.
struct SyntaxError {
    message: String,
    line: u32,
    column: u32,
    open_braces: usize,
}

impl SyntaxError {
    fn at(token: &Token, message: impl Into<String>, open_braces: usize) -> Self {
        Self {
            message: message.into(),
            line: token.line,
            column: token.column,
            open_braces,
        }
    }
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    source: SourceId,
    file: PathBuf,
    max_depth: usize,
    stack: Vec<ClassDefinition>,
    output: ParsedFile,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, source: &SourceId, file: &Path, options: &ParseOptions) -> Self {
        Self {
            text,
            tokens: tokenize(text),
            pos: 0,
            source: source.clone(),
            file: file.to_path_buf(),
            max_depth: options.max_depth.max(1),
            stack: Vec::new(),
            output: ParsedFile::new(file),
        }
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn location(&self, token: &Token) -> Location {
        Location::new(self.file.clone(), token.line, token.column)
    }

    fn report(&mut self, diagnostic: Diagnostic, token: &Token) {
        let location = self.location(token);
        self.output.diagnostics.push(diagnostic.at(location));
    }

    fn run(mut self) -> ParsedFile {
        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::Eof => break,
                TokenKind::RBrace => {
                    self.advance();
                    match self.stack.pop() {
                        Some(definition) => {
                            self.body_terminator(&definition.name);
                            self.finish_class(definition);
                        }
                        None => self.report(
                            Diagnostic::error(DiagnosticKind::ParseError, "unmatched '}'"),
                            &token,
                        ),
                    }
                }
                TokenKind::Directive => {
                    self.advance();
                    self.directive_note(&token);
                }
                TokenKind::Semicolon => {
                    self.advance();
                }
                TokenKind::Error(message) => {
                    let message = message.clone();
                    self.advance();
                    self.report(Diagnostic::error(DiagnosticKind::ParseError, message), &token);
                }
                TokenKind::Word => {
                    if let Err(error) = self.statement() {
                        self.recover(error);
                    }
                }
                _ => {
                    self.advance();
                    let error = SyntaxError::at(&token, format!("unexpected '{}'", token.text(self.text)), 0);
                    self.recover(error);
                }
            }
        }

        while let Some(definition) = self.stack.pop() {
            self.output.diagnostics.push(
                Diagnostic::error(
                    DiagnosticKind::ParseError,
                    format!("class '{}' is not closed before end of input", definition.name),
                )
                .with_class(definition.name.clone())
                .at(definition.location.clone()),
            );
            self.finish_class(definition);
        }
        self.output
    }

    fn statement(&mut self) -> Result<(), SyntaxError> {
        let first = self.advance();
        let word = first.text(self.text);

        if word.eq_ignore_ascii_case("class") {
            if *self.peek_kind() == TokenKind::Word {
                let name = self.advance();
                return self.class_header(&first, &name);
            }
            if !matches!(self.peek_kind(), TokenKind::Equals | TokenKind::PlusEquals | TokenKind::LBracket) {
                return Err(SyntaxError::at(self.peek(), "expected a class name after 'class'", 0));
            }
        }
        if word.eq_ignore_ascii_case("enum") && matches!(self.peek_kind(), TokenKind::Word | TokenKind::LBrace) {
            return self.enum_block(&first);
        }

        match self.peek_kind().clone() {
            TokenKind::LBracket => {
                self.advance();
                self.expect(TokenKind::RBracket, "']'", 0)?;
                if !matches!(self.peek_kind(), TokenKind::Equals | TokenKind::PlusEquals) {
                    return Err(SyntaxError::at(self.peek(), "expected '=' or '+=' after '[]'", 0));
                }
                self.advance();
                if *self.peek_kind() != TokenKind::LBrace {
                    return Err(SyntaxError::at(self.peek(), "expected '{' to start an array", 0));
                }
                let value = self.array_value()?;
                self.value_terminator()?;
                self.set_property(&first, value);
                Ok(())
            }
            TokenKind::Equals | TokenKind::PlusEquals => {
                self.advance();
                let value = if *self.peek_kind() == TokenKind::LBrace {
                    let value = self.array_value()?;
                    self.value_terminator()?;
                    value
                } else {
                    self.raw_value(false, 0)?
                };
                self.set_property(&first, value);
                Ok(())
            }
            TokenKind::Colon | TokenKind::LBrace | TokenKind::Semicolon => self.class_header(&first, &first),
            _ => Err(SyntaxError::at(
                self.peek(),
                format!("expected '=', '[]', ':' or '{{' after '{word}'"),
                0,
            )),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str, open_braces: usize) -> Result<Token, SyntaxError> {
        if *self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(SyntaxError::at(self.peek(), format!("expected {what}"), open_braces))
        }
    }

    fn class_header(&mut self, start: &Token, name: &Token) -> Result<(), SyntaxError> {
        let name = name.text(self.text).to_string();
        let location = self.location(start);

        let mut parent = None;
        if *self.peek_kind() == TokenKind::Colon {
            self.advance();
            let parent_token = self.expect(TokenKind::Word, "a parent class name after ':'", 0)?;
            parent = Some(parent_token.text(self.text).to_string());
        }

        let mut definition = ClassDefinition::new(name, self.source.clone(), location);
        definition.parent = parent;

        let token = self.peek().clone();
        match token.kind {
            TokenKind::LBrace => {
                self.advance();
                if self.stack.len() >= self.max_depth {
                    self.report(
                        Diagnostic::error(
                            DiagnosticKind::ParseError,
                            format!("class nesting exceeds maximum depth {}", self.max_depth),
                        )
                        .with_class(definition.name.clone()),
                        &token,
                    );
                    self.skip_group(1);
                    if *self.peek_kind() == TokenKind::Semicolon {
                        self.advance();
                    }
                    return Ok(());
                }
                self.stack.push(definition);
                Ok(())
            }
            TokenKind::Semicolon => {
                self.advance();
                if definition.parent.is_none() {
                    definition.kind = ClassKind::ForwardDeclaration;
                }
                self.finish_class(definition);
                Ok(())
            }
            _ => Err(SyntaxError::at(
                &token,
                format!("expected '{{' or ';' after class '{}'", definition.name),
                0,
            )),
        }
    }

    /// Attaches a completed class to the enclosing body, or emits it as a
    /// top-level definition.
    fn finish_class(&mut self, definition: ClassDefinition) {
        let Some(parent) = self.stack.last_mut() else {
            self.output.definitions.push(definition);
            return;
        };

        let diagnostic = match parent.properties.get(&definition.name) {
            Some(PropertyValue::Class(existing)) => {
                if definition.is_forward_declaration() {
                    return;
                }
                (!existing.is_forward_declaration()).then(|| {
                    Diagnostic::error(
                        DiagnosticKind::DuplicateClass,
                        format!(
                            "class '{}' is defined more than once in class '{}'",
                            definition.name, parent.name
                        ),
                    )
                    .with_class(definition.name.clone())
                    .at(definition.location.clone())
                    .with_related(existing.location.clone())
                })
            }
            Some(_) => Some(
                Diagnostic::warning(
                    DiagnosticKind::DuplicateProperty,
                    format!("class '{}' replaces a property of the same name in class '{}'", definition.name, parent.name),
                )
                .with_class(parent.name.clone())
                .at(definition.location.clone()),
            ),
            None => None,
        };

        let key = definition.name.clone();
        parent.properties.insert(key, PropertyValue::Class(Box::new(definition)));
        if let Some(diagnostic) = diagnostic {
            self.output.diagnostics.push(diagnostic);
        }
    }

    fn set_property(&mut self, name: &Token, value: PropertyValue) {
        let key = name.text(self.text).to_string();
        let Some(parent) = self.stack.last_mut() else {
            self.report(
                Diagnostic::error(
                    DiagnosticKind::ParseError,
                    format!("property '{key}' is outside of any class body"),
                ),
                name,
            );
            return;
        };
        let class_name = parent.name.clone();
        if parent.properties.insert(key.clone(), value).is_some() {
            self.report(
                Diagnostic::warning(
                    DiagnosticKind::DuplicateProperty,
                    format!("property '{key}' is assigned more than once in class '{class_name}'"),
                )
                .with_class(class_name),
                name,
            );
        }
    }

    /// Collects a scalar written as tokens up to its terminator.
    ///
    /// For properties the terminator is `;` (consumed; a `}` is accepted with
    /// a warning). For array and enum elements it is `,` or `}` (left in
    /// place).
    fn raw_value(&mut self, in_list: bool, open_braces: usize) -> Result<PropertyValue, SyntaxError> {
        let first = self.peek().clone();
        let mut last: Option<Token> = None;
        let mut count = 0;

        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::Semicolon if !in_list => {
                    self.advance();
                    break;
                }
                TokenKind::RBrace if !in_list => {
                    self.report(
                        Diagnostic::warning(DiagnosticKind::ParseError, "missing ';' after value"),
                        &token,
                    );
                    break;
                }
                TokenKind::Comma | TokenKind::RBrace | TokenKind::Directive if in_list => break,
                TokenKind::Error(message) => {
                    let message = message.clone();
                    self.advance();
                    return Err(SyntaxError::at(&token, message, open_braces));
                }
                TokenKind::Eof
                | TokenKind::LBrace
                | TokenKind::Equals
                | TokenKind::PlusEquals
                | TokenKind::Semicolon
                | TokenKind::Directive => {
                    let what = if in_list { "',' or '}'" } else { "';'" };
                    return Err(SyntaxError::at(&token, format!("expected {what} after value"), open_braces));
                }
                _ => {
                    self.advance();
                    count += 1;
                    last = Some(token);
                }
            }
        }

        let Some(last) = last else {
            return Err(SyntaxError::at(&first, "missing value", open_braces));
        };
        if count == 1 {
            if let TokenKind::Str(text) = &first.kind {
                return Ok(PropertyValue::Text(text.clone()));
            }
        }
        Ok(scalar_from_raw(&self.text[first.start..last.end]))
    }

    /// Parses `{ ... }` with nested arrays, using a stack of open arrays.
    fn array_value(&mut self) -> Result<PropertyValue, SyntaxError> {
        self.advance();
        let mut open: Vec<Vec<PropertyValue>> = vec![Vec::new()];

        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::LBrace => {
                    if self.stack.len() + open.len() >= self.max_depth {
                        return Err(SyntaxError::at(
                            &token,
                            format!("array nesting exceeds maximum depth {}", self.max_depth),
                            open.len(),
                        ));
                    }
                    self.advance();
                    open.push(Vec::new());
                }
                TokenKind::RBrace => {
                    self.advance();
                    let done = open.pop().unwrap_or_default();
                    match open.last_mut() {
                        Some(outer) => outer.push(PropertyValue::Array(done)),
                        None => return Ok(PropertyValue::Array(done)),
                    }
                }
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::Directive => {
                    self.advance();
                    self.directive_note(&token);
                }
                TokenKind::Semicolon => {
                    return Err(SyntaxError::at(&token, "unterminated array", 0));
                }
                TokenKind::Eof | TokenKind::Equals | TokenKind::PlusEquals => {
                    return Err(SyntaxError::at(&token, "unterminated array", open.len()));
                }
                _ => {
                    let value = self.raw_value(true, open.len())?;
                    if let Some(items) = open.last_mut() {
                        items.push(value);
                    }
                }
            }
        }
    }

    fn enum_block(&mut self, start: &Token) -> Result<(), SyntaxError> {
        let name = if *self.peek_kind() == TokenKind::Word {
            self.advance().text(self.text).to_string()
        } else {
            String::new()
        };
        self.expect(TokenKind::LBrace, "'{' to start the enum", 0)?;

        let location = self.location(start);
        let mut definition = ClassDefinition::new(name, self.source.clone(), location).with_kind(ClassKind::Enum);
        let mut next_value = 0.0;

        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::Word => {
                    self.advance();
                    let member = token.text(self.text).to_string();
                    let value = if *self.peek_kind() == TokenKind::Equals {
                        self.advance();
                        self.raw_value(true, 1)?
                    } else {
                        PropertyValue::Number(next_value)
                    };
                    if let PropertyValue::Number(n) = value {
                        next_value = n + 1.0;
                    }
                    if definition.properties.insert(member.clone(), value).is_some() {
                        self.report(
                            Diagnostic::warning(
                                DiagnosticKind::DuplicateProperty,
                                format!("enum member '{member}' is declared more than once"),
                            ),
                            &token,
                        );
                    }
                }
                _ => {
                    return Err(SyntaxError::at(
                        &token,
                        format!("unexpected '{}' in enum", token.text(self.text)),
                        1,
                    ));
                }
            }
        }

        self.body_terminator(&definition.name);
        self.output.enums.push(definition);
        Ok(())
    }

    /// Consumes the `;` after a closing `}`; its absence is only a warning.
    fn body_terminator(&mut self, name: &str) {
        if *self.peek_kind() == TokenKind::Semicolon {
            self.advance();
            return;
        }
        let token = self.peek().clone();
        self.report(
            Diagnostic::warning(DiagnosticKind::ParseError, format!("missing ';' after '{name}' body"))
                .with_class(name.to_string()),
            &token,
        );
    }

    fn value_terminator(&mut self) -> Result<(), SyntaxError> {
        match self.peek_kind() {
            TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenKind::RBrace => {
                let token = self.peek().clone();
                self.report(
                    Diagnostic::warning(DiagnosticKind::ParseError, "missing ';' after value"),
                    &token,
                );
                Ok(())
            }
            _ => Err(SyntaxError::at(self.peek(), "expected ';' after array", 0)),
        }
    }

    fn directive_note(&mut self, token: &Token) {
        let line = token.text(self.text).lines().next().unwrap_or_default().trim().to_string();
        self.report(
            Diagnostic::note(DiagnosticKind::Directive, format!("skipped preprocessor directive: {line}")),
            token,
        );
    }

    /// Skips tokens until `depth` open braces are closed.
    fn skip_group(&mut self, mut depth: usize) {
        while depth > 0 {
            match self.advance().kind {
                TokenKind::Eof => break,
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                _ => {}
            }
        }
    }

    /// Records the error and skips ahead. Inside a body this stops before the
    /// `}` that closes it; at top level it stops after the next `;` or after a
    /// balanced `{...}` group.
    fn recover(&mut self, error: SyntaxError) {
        self.output.diagnostics.push(
            Diagnostic::error(DiagnosticKind::ParseError, error.message)
                .at(Location::new(self.file.clone(), error.line, error.column)),
        );

        let mut depth = error.open_braces;
        if self.stack.is_empty() {
            loop {
                match self.peek_kind() {
                    TokenKind::Eof => break,
                    TokenKind::LBrace => {
                        depth += 1;
                        self.advance();
                    }
                    TokenKind::RBrace => {
                        self.advance();
                        if depth <= 1 {
                            if *self.peek_kind() == TokenKind::Semicolon {
                                self.advance();
                            }
                            break;
                        }
                        depth -= 1;
                    }
                    TokenKind::Semicolon if depth == 0 => {
                        self.advance();
                        break;
                    }
                    _ => {
                        self.advance();
                    }
                }
            }
        } else {
            loop {
                match self.peek_kind() {
                    TokenKind::Eof => break,
                    TokenKind::LBrace => {
                        depth += 1;
                        self.advance();
                    }
                    TokenKind::RBrace => {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                        self.advance();
                    }
                    _ => {
                        self.advance();
                    }
                }
            }
        }
    }
}
