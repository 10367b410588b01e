use crate::error::ServoError;
use crate::token::{Literal, Token, TokenType};

/// Check if a character can start an identifier
pub fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Check if a character can continue an identifier
pub fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// All servo keywords with their token types
pub static KEYWORDS: phf::Map<&'static str, TokenType> = phf::phf_map! {
    "and" => TokenType::And,
    "class" => TokenType::Class,
    "else" => TokenType::Else,
    "false" => TokenType::False,
    "for" => TokenType::For,
    "function" => TokenType::Function,
    "if" => TokenType::If,
    "let" => TokenType::Var,
    "nil" => TokenType::Nil,
    "null" => TokenType::Nil,
    "or" => TokenType::Or,
    "print" => TokenType::Print,
    "printl" => TokenType::Print,
    "return" => TokenType::Return,
    "super" => TokenType::Super,
    "this" => TokenType::This,
    "true" => TokenType::True,
    "var" => TokenType::Var,
    "while" => TokenType::While,
};

pub struct Scanner<'a> {
    source: &'a str,
    start: usize,
    current: usize,
    line: usize,
    start_line: usize,
    include_comments: bool,
    finished: bool,
    // Whether the last token was `-`, which lets `-2147483648` be written.
    after_minus: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            start: 0,
            current: 0,
            line: 1,
            start_line: 1,
            include_comments: false,
            finished: false,
            after_minus: false,
        }
    }

    /// Create a scanner that includes comment tokens (for highlighting)
    pub fn with_comments(source: &'a str) -> Self {
        Self {
            include_comments: true,
            ..Self::new(source)
        }
    }
}

impl Iterator for Scanner<'_> {
    type Item = Result<Token, ServoError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.scan_token();
        match &result {
            Some(Ok(token)) if token.token_type == TokenType::Comment => {}
            Some(Ok(token)) => self.after_minus = token.token_type == TokenType::Minus,
            _ => self.after_minus = false,
        }
        result
    }
}

impl Scanner<'_> {
    fn scan_token(&mut self) -> Option<Result<Token, ServoError>> {
        loop {
            if self.finished {
                return None;
            }

            self.start = self.current;
            self.start_line = self.line;

            if self.is_at_end() {
                self.finished = true;
                return Some(Ok(self.add_token(TokenType::Eof)));
            }

            let c = self.advance();

            let token_type = match c {
                ' ' | '\r' | '\t' => continue,
                '\n' => {
                    self.line += 1;
                    continue;
                }
                '(' => TokenType::LeftParen,
                ')' => TokenType::RightParen,
                '{' => TokenType::LeftBrace,
                '}' => TokenType::RightBrace,
                ',' => TokenType::Comma,
                '.' => TokenType::Dot,
                '-' => TokenType::Minus,
                '+' => TokenType::Plus,
                ';' => TokenType::Semicolon,
                '*' => TokenType::Star,
                '%' => TokenType::Percent,
                '^' => TokenType::Caret,
                '/' => {
                    if self.match_char('/') {
                        while self.peek().is_some_and(|c| c != '\n') {
                            self.advance();
                        }
                    } else if self.match_char('*') {
                        if let Err(e) = self.block_comment() {
                            return Some(Err(e));
                        }
                    } else {
                        return Some(Ok(self.add_token(TokenType::Slash)));
                    }
                    if self.include_comments {
                        return Some(Ok(self.add_token(TokenType::Comment)));
                    }
                    continue;
                }
                '!' => self.either('=', TokenType::BangEqual, TokenType::Bang),
                '=' => self.either('=', TokenType::EqualEqual, TokenType::Equal),
                '<' => self.either('=', TokenType::LessEqual, TokenType::Less),
                '>' => self.either('=', TokenType::GreaterEqual, TokenType::Greater),
                '"' | '\'' | '`' => return Some(self.string(c)),
                c if c.is_ascii_digit() => return Some(self.number()),
                c if is_identifier_start(c) => return Some(Ok(self.identifier())),
                _ => {
                    return Some(Err(ServoError::Scan {
                        message: format!("Unexpected character '{}'.", c),
                        line: self.line,
                        span: self.start..self.current,
                    }));
                }
            };

            return Some(Ok(self.add_token(token_type)));
        }
    }
}

impl Scanner<'_> {
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current..].chars().next().unwrap_or('\0');
        self.current += c.len_utf8();
        c
    }

    fn peek(&self) -> Option<char> {
        self.source[self.current..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.current..].chars();
        chars.next();
        chars.next()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn either(&mut self, expected: char, matched: TokenType, otherwise: TokenType) -> TokenType {
        if self.match_char(expected) {
            matched
        } else {
            otherwise
        }
    }

    fn add_token(&self, token_type: TokenType) -> Token {
        Token {
            token_type,
            lexeme: self.source[self.start..self.current].to_string(),
            literal: None,
            line: self.start_line,
            span: self.start..self.current,
        }
    }

    fn add_token_with_literal(&self, token_type: TokenType, literal: Literal) -> Token {
        Token {
            literal: Some(literal),
            ..self.add_token(token_type)
        }
    }

    fn identifier(&mut self) -> Token {
        while self.peek().is_some_and(is_identifier_char) {
            self.advance();
        }

        let text = &self.source[self.start..self.current];
        let token_type = KEYWORDS.get(text).copied().unwrap_or(TokenType::Identifier);
        self.add_token(token_type)
    }

    /// The magnitude of `i32::MIN` only fits once negated. It scans as
    /// `i32::MIN` itself, which wrapping negation maps back to `i32::MIN`.
    fn negated_minimum(&self, text: &str) -> Option<i32> {
        let magnitude = text.parse::<i64>().ok()?;
        (self.after_minus && magnitude == -i64::from(i32::MIN)).then_some(i32::MIN)
    }

    /// Digits alone make an integer; digits, a dot and more digits make a float.
    fn number(&mut self) -> Result<Token, ServoError> {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        let is_float =
            self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit());

        if is_float {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.source[self.start..self.current];
        let parsed = if is_float {
            text.parse::<f64>()
                .map(|n| (TokenType::Float, Literal::Float(n)))
                .ok()
        } else {
            text.parse::<i32>()
                .ok()
                .or_else(|| self.negated_minimum(text))
                .map(|n| (TokenType::Integer, Literal::Int(n)))
        };

        match parsed {
            Some((token_type, literal)) => Ok(self.add_token_with_literal(token_type, literal)),
            None => Err(ServoError::Scan {
                message: format!("Number '{}' is out of range.", text),
                line: self.start_line,
                span: self.start..self.current,
            }),
        }
    }

    fn string(&mut self, delimiter: char) -> Result<Token, ServoError> {
        let content_start = self.current;

        loop {
            match self.peek() {
                None => {
                    return Err(ServoError::Scan {
                        message: "Unterminated string.".to_string(),
                        line: self.start_line,
                        span: self.start..self.current,
                    });
                }
                Some(c) if c == delimiter => {
                    let value = self.source[content_start..self.current].to_string();
                    self.advance();
                    return Ok(self.add_token_with_literal(TokenType::String, Literal::String(value)));
                }
                Some('\n') => {
                    self.line += 1;
                    self.advance();
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn block_comment(&mut self) -> Result<(), ServoError> {
        let mut depth = 1;

        while depth > 0 && !self.is_at_end() {
            let c = self.advance();

            if c == '\n' {
                self.line += 1;
            } else if c == '/' && self.peek() == Some('*') {
                self.advance();
                depth += 1;
            } else if c == '*' && self.peek() == Some('/') {
                self.advance();
                depth -= 1;
            }
        }

        if depth > 0 {
            return Err(ServoError::Scan {
                message: "Unterminated block comment.".to_string(),
                line: self.start_line,
                span: self.start..self.current,
            });
        }

        Ok(())
    }
}
