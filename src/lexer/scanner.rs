// Foxely Scanner (Lexer)
// Converts source code into tokens

use crate::error::{FoxError, FoxResult, Position, Span};
use crate::lexer::token::{Token, TokenKind};

/// Scanner that tokenizes Foxely source code
pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
    file: String,
}

impl Scanner {
    pub fn new(source: &str, file: impl Into<String>) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
            file: file.into(),
        }
    }

    /// Scan all tokens from the source
    pub fn scan_tokens(mut self) -> FoxResult<Vec<Token>> {
        // A leading shebang line is ignored
        if self.peek() == '#' && self.peek_next() == '!' {
            while self.peek() != '\n' && !self.is_at_end() {
                self.advance();
            }
        }

        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_column = self.column;
            self.scan_token()?;
        }

        self.tokens.push(Token::new(
            TokenKind::Eof,
            "",
            Span::single(self.line, self.column, self.current),
        ));

        Ok(self.tokens)
    }

    fn scan_token(&mut self) -> FoxResult<()> {
        let c = self.advance();

        match c {
            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            '[' => self.add_token(TokenKind::LeftBracket),
            ']' => self.add_token(TokenKind::RightBracket),
            ',' => self.add_token(TokenKind::Comma),
            ';' => self.add_token(TokenKind::Semicolon),
            ':' => self.add_token(TokenKind::Colon),
            '*' => self.add_token(TokenKind::Star),
            '%' => self.add_token(TokenKind::Percent),
            '.' => {
                if self.peek() == '.' && self.peek_next() == '.' {
                    self.advance();
                    self.advance();
                    self.add_token(TokenKind::DotDotDot);
                } else {
                    self.add_token(TokenKind::Dot);
                }
            }
            '+' => {
                let kind = if self.match_char('+') {
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                };
                self.add_token(kind);
            }
            '-' => {
                let kind = if self.match_char('-') {
                    TokenKind::MinusMinus
                } else {
                    TokenKind::Minus
                };
                self.add_token(kind);
            }
            '/' => {
                if self.match_char('/') {
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.match_char('*') {
                    self.block_comment()?;
                } else {
                    self.add_token(TokenKind::Slash);
                }
            }
            '!' => {
                let kind = if self.match_char('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.add_token(kind);
            }
            '=' => {
                let kind = if self.match_char('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.add_token(kind);
            }
            '<' => {
                let kind = if self.match_char('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.add_token(kind);
            }
            '>' => {
                let kind = if self.match_char('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.add_token(kind);
            }

            ' ' | '\r' | '\t' | '\n' => {}

            '"' => self.string()?,

            c if c.is_ascii_digit() => self.number()?,
            c if c.is_alphabetic() || c == '_' => self.identifier(),

            _ => {
                return Err(self
                    .error(&format!("Unexpected character '{}'", c))
                    .with_help("Remove this character or check for typos"));
            }
        }

        Ok(())
    }

    fn block_comment(&mut self) -> FoxResult<()> {
        let mut depth = 1;
        while depth > 0 {
            if self.is_at_end() {
                return Err(self
                    .error("Unterminated block comment")
                    .with_help("Close the comment with '*/'"));
            }
            if self.peek() == '/' && self.peek_next() == '*' {
                self.advance();
                self.advance();
                depth += 1;
            } else if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                depth -= 1;
            } else {
                self.advance();
            }
        }
        Ok(())
    }

    fn string(&mut self) -> FoxResult<()> {
        let mut value = String::new();

        while self.peek() != '"' && !self.is_at_end() {
            let c = self.advance();
            if c != '\\' {
                value.push(c);
                continue;
            }
            if self.is_at_end() {
                break;
            }
            let escaped = self.advance();
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                '"' => value.push('"'),
                '\\' => value.push('\\'),
                other => {
                    return Err(self
                        .error(&format!("Invalid escape sequence '\\{}'", other))
                        .with_help("Supported escapes are \\n, \\t, \\r, \\0, \\\" and \\\\"));
                }
            }
        }

        if self.is_at_end() {
            return Err(FoxError::syntax_error(
                "Unterminated string",
                self.current_span(),
                &self.file,
            )
            .with_help("Add a closing double quote to terminate the string"));
        }

        // Closing quote
        self.advance();
        self.add_token(TokenKind::String(value));
        Ok(())
    }

    fn number(&mut self) -> FoxResult<()> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let text = self.lexeme();
        let value: f64 = text
            .parse()
            .map_err(|_| self.error(&format!("Invalid number literal '{}'", text)))?;
        self.add_token(TokenKind::Number(value));
        Ok(())
    }

    fn identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }

        let text = self.lexeme();
        let kind = Self::keyword_or_identifier(&text);
        self.add_token(kind);
    }

    fn keyword_or_identifier(text: &str) -> TokenKind {
        match text {
            "and" => TokenKind::And,
            "class" => TokenKind::Class,
            "else" => TokenKind::Else,
            "false" => TokenKind::False,
            "for" => TokenKind::For,
            "fun" => TokenKind::Fun,
            "if" => TokenKind::If,
            "import" => TokenKind::Import,
            "is" => TokenKind::Is,
            "nil" => TokenKind::Nil,
            "operator" => TokenKind::Operator,
            "or" => TokenKind::Or,
            "print" => TokenKind::Print,
            "return" => TokenKind::Return,
            "super" => TokenKind::Super,
            "this" => TokenKind::This,
            "true" => TokenKind::True,
            "var" => TokenKind::Var,
            "while" => TokenKind::While,
            _ => TokenKind::Identifier(text.to_string()),
        }
    }

    // ==================== Helpers ====================

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            return false;
        }
        self.advance();
        true
    }

    fn peek(&self) -> char {
        self.source.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.source.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn lexeme(&self) -> String {
        self.source[self.start..self.current].iter().collect()
    }

    fn current_span(&self) -> Span {
        Span::new(
            Position::new(self.start_line, self.start_column, self.start),
            Position::new(self.line, self.column, self.current),
        )
    }

    fn add_token(&mut self, kind: TokenKind) {
        let lexeme = self.lexeme();
        let span = self.current_span();
        self.tokens.push(Token::new(kind, lexeme, span));
    }

    fn error(&self, message: &str) -> FoxError {
        FoxError::syntax_error(message, self.current_span(), &self.file)
    }
}
