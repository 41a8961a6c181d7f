//! Tokenizer for the class-definition language

/// Token categories. Words cover identifiers, keywords and bare numbers;
/// the parser decides what a word means from context.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Word,
    /// Quoted string with escapes already removed.
    Str(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Semicolon,
    Comma,
    Equals,
    PlusEquals,
    /// A whole preprocessor line, continuations included.
    Directive,
    /// Any other single character (operators, `-`, `\`, parentheses...).
    Other(char),
    /// Malformed input such as an unterminated string or comment.
    Error(String),
    Eof,
}

/// A token with its byte span and 1-based start position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Splits `source` into tokens, always ending with [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: u32,
    column: u32,
    line_has_content: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            line: 1,
            column: 1,
            line_has_content: false,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map(|&(i, _)| i).unwrap_or(self.src.len())
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
            self.line_has_content = false;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, start: usize, line: u32, column: u32) {
        let end = self.offset();
        self.tokens.push(Token {
            kind,
            start,
            end,
            line,
            column,
        });
    }

    fn run(mut self) -> Vec<Token> {
        while let Some(c) = self.peek() {
            let (start, line, column) = (self.offset(), self.line, self.column);

            if c.is_whitespace() || c == '\u{feff}' {
                self.bump();
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('/') {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('*') {
                if !self.block_comment() {
                    self.push(TokenKind::Error("unterminated block comment".into()), start, line, column);
                }
                continue;
            }
            if c == '#' && !self.line_has_content {
                self.directive();
                self.push(TokenKind::Directive, start, line, column);
                continue;
            }

            self.line_has_content = true;
            let kind = match c {
                '"' | '\'' => self.string(c),
                '{' => self.single(TokenKind::LBrace),
                '}' => self.single(TokenKind::RBrace),
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                ':' => self.single(TokenKind::Colon),
                ';' => self.single(TokenKind::Semicolon),
                ',' => self.single(TokenKind::Comma),
                '=' => self.single(TokenKind::Equals),
                '+' if self.peek_at(1) == Some('=') => {
                    self.bump();
                    self.bump();
                    TokenKind::PlusEquals
                }
                c if is_word_char(c) => {
                    while self.peek().is_some_and(is_word_char) {
                        self.bump();
                    }
                    TokenKind::Word
                }
                other => self.single(TokenKind::Other(other)),
            };
            self.push(kind, start, line, column);
        }

        let (end, line, column) = (self.src.len(), self.line, self.column);
        self.push(TokenKind::Eof, end, line, column);
        self.tokens
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn block_comment(&mut self) -> bool {
        self.bump();
        self.bump();
        while let Some(c) = self.bump() {
            if c == '*' && self.peek() == Some('/') {
                self.bump();
                return true;
            }
        }
        false
    }

    /// Consumes a preprocessor line including `\` continuations.
    fn directive(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            if c == '\\' && self.continues_line() {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
                self.bump();
                continue;
            }
            self.bump();
        }
    }

    /// True when a `\` at the cursor is followed only by whitespace up to the
    /// end of the line.
    fn continues_line(&self) -> bool {
        let mut i = 1;
        while let Some(c) = self.peek_at(i) {
            match c {
                '\n' => return true,
                c if c.is_whitespace() => i += 1,
                _ => return false,
            }
        }
        false
    }

    /// Reads a quoted string; a doubled quote is an embedded quote.
    fn string(&mut self, quote: char) -> TokenKind {
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return TokenKind::Error("unterminated string".into()),
                Some(c) if c == quote => {
                    self.bump();
                    if self.peek() == Some(quote) {
                        self.bump();
                        value.push(quote);
                    } else {
                        return TokenKind::Str(value);
                    }
                }
                Some(c) => {
                    self.bump();
                    value.push(c);
                }
            }
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn punctuation_and_words() {
        assert_eq!(
            kinds("class A: B { x[] += {1.5}; };"),
            vec![
                TokenKind::Word,
                TokenKind::Word,
                TokenKind::Colon,
                TokenKind::Word,
                TokenKind::LBrace,
                TokenKind::Word,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::PlusEquals,
                TokenKind::LBrace,
                TokenKind::Word,
                TokenKind::RBrace,
                TokenKind::Semicolon,
                TokenKind::RBrace,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_unescape_doubled_quotes() {
        assert_eq!(
            kinds(r#""say ""hi""" 'it''s'"#),
            vec![
                TokenKind::Str("say \"hi\"".into()),
                TokenKind::Str("it's".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("a // line\n/* block\n comment */ b"),
            vec![TokenKind::Word, TokenKind::Word, TokenKind::Eof]
        );
    }

    #[test]
    fn directives_take_continuations() {
        let src = "#define X(a) \\\n  a + 1\nclass Y {};";
        let tokens = tokenize(src);
        assert_eq!(tokens[0].kind, TokenKind::Directive);
        assert_eq!(tokens[1].kind, TokenKind::Word);
        assert_eq!(tokens[1].line, 3);
        assert_eq!(tokens[1].text(src), "class");
    }

    #[test]
    fn hash_inside_a_line_is_not_a_directive() {
        assert_eq!(
            kinds("x = a # b;"),
            vec![
                TokenKind::Word,
                TokenKind::Equals,
                TokenKind::Word,
                TokenKind::Other('#'),
                TokenKind::Word,
                TokenKind::Semicolon,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn unterminated_input_is_reported() {
        assert!(matches!(kinds("\"open")[0], TokenKind::Error(_)));
        assert!(matches!(kinds("/* open")[0], TokenKind::Error(_)));
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = tokenize("\n  class A");
        assert_eq!((tokens[0].line, tokens[0].column), (2, 3));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 9));
    }
}
