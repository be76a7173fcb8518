use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word(String),
    LBrace,
    RBrace,
    Semicolon,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Loc,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub loc: Option<Loc>,
}

impl ConfigError {
    pub fn new(message: String, loc: Option<Loc>) -> Self {
        ConfigError { message, loc }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[1;31mConfiguration Error\x1b[0m: {}", self.message)?;
        if let Some(loc) = self.loc {
            write!(f, " (at line {}, col {})", loc.line, loc.col)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input.next();
        if let Some(c) = c {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn peek(&mut self) -> Option<&char> {
        self.input.peek()
    }

    fn current_loc(&self) -> Loc {
        Loc {
            line: self.line,
            col: self.col,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, ConfigError> {
        let mut tokens = Vec::new();

        while let Some(&c) = self.peek() {
            let loc = self.current_loc();
            match c {
                '#' => self.skip_comment(),
                '{' => {
                    tokens.push(Token {
                        kind: TokenKind::LBrace,
                        loc,
                    });
                    self.advance();
                }
                '}' => {
                    tokens.push(Token {
                        kind: TokenKind::RBrace,
                        loc,
                    });
                    self.advance();
                }
                ';' => {
                    tokens.push(Token {
                        kind: TokenKind::Semicolon,
                        loc,
                    });
                    self.advance();
                }
                q if q == '"' || q == '\'' => {
                    tokens.push(self.quoted_word(loc, q)?);
                }
                c if c.is_whitespace() => {
                    self.advance();
                }
                _ => {
                    tokens.push(self.bare_word(loc));
                }
            }
        }

        Ok(tokens)
    }

    fn skip_comment(&mut self) {
        while let Some(&c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn quoted_word(&mut self, loc: Loc, quote: char) -> Result<Token, ConfigError> {
        self.advance();
        let mut val = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => break,
                Some(c) => val.push(c),
                None => {
                    return Err(ConfigError::new(
                        "unterminated quoted string".to_string(),
                        Some(loc),
                    ));
                }
            }
        }
        Ok(Token {
            kind: TokenKind::Word(val),
            loc,
        })
    }

    fn bare_word(&mut self, loc: Loc) -> Token {
        let mut val = String::new();
        while let Some(&c) = self.peek() {
            if c.is_whitespace() || "{};#'\"".contains(c) {
                break;
            }
            val.push(c);
            self.advance();
        }
        Token {
            kind: TokenKind::Word(val),
            loc,
        }
    }
}
