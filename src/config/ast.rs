//! Validated syntax tree handed to the resolver. The grammar is the usual
//! block style: `server { directive args...; location <path> { ... } }`.
//! Structural errors abort the load; directive-level problems are left for
//! the resolver, which warns and drops instead.

use super::lexer::{ConfigError, Lexer, Loc, Token, TokenKind};

#[derive(Debug, Clone)]
pub struct DirectiveNode {
    pub name: String,
    pub args: Vec<String>,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct LocationNode {
    pub path: String,
    pub directives: Vec<DirectiveNode>,
    pub line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ServerNode {
    pub directives: Vec<DirectiveNode>,
    pub locations: Vec<LocationNode>,
    pub line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigAst {
    pub servers: Vec<ServerNode>,
}

impl ConfigAst {
    pub fn parse(input: &str) -> Result<ConfigAst, ConfigError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = AstParser { tokens, cursor: 0 };
        parser.parse_config()
    }
}

struct AstParser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl AstParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.cursor).cloned();
        if t.is_some() {
            self.cursor += 1;
        }
        t
    }

    fn loc(&self) -> Option<Loc> {
        self.peek().map(|t| t.loc)
    }

    fn expect_lbrace(&mut self, what: &str) -> Result<(), ConfigError> {
        match self.next() {
            Some(Token {
                kind: TokenKind::LBrace,
                ..
            }) => Ok(()),
            other => Err(ConfigError::new(
                format!("expected '{{' after {}", what),
                other.map(|t| t.loc),
            )),
        }
    }

    fn parse_config(&mut self) -> Result<ConfigAst, ConfigError> {
        let mut ast = ConfigAst::default();

        while let Some(token) = self.next() {
            match token.kind {
                TokenKind::Word(w) if w == "server" => {
                    ast.servers.push(self.parse_server(token.loc)?);
                }
                TokenKind::Word(w) => {
                    return Err(ConfigError::new(
                        format!("unexpected top-level directive '{}'", w),
                        Some(token.loc),
                    ));
                }
                _ => {
                    return Err(ConfigError::new(
                        "expected 'server' block".to_string(),
                        Some(token.loc),
                    ));
                }
            }
        }

        Ok(ast)
    }

    fn parse_server(&mut self, loc: Loc) -> Result<ServerNode, ConfigError> {
        self.expect_lbrace("'server'")?;

        let mut node = ServerNode {
            line: loc.line,
            ..Default::default()
        };

        loop {
            match self.next() {
                Some(Token {
                    kind: TokenKind::RBrace,
                    ..
                }) => break,
                Some(Token {
                    kind: TokenKind::Word(w),
                    loc,
                }) if w == "location" => {
                    node.locations.push(self.parse_location(loc)?);
                }
                Some(Token {
                    kind: TokenKind::Word(w),
                    loc,
                }) => {
                    node.directives.push(self.parse_directive(w, loc)?);
                }
                Some(token) => {
                    return Err(ConfigError::new(
                        "expected directive or 'location' block".to_string(),
                        Some(token.loc),
                    ));
                }
                None => {
                    return Err(ConfigError::new(
                        "unterminated 'server' block".to_string(),
                        Some(loc),
                    ));
                }
            }
        }

        Ok(node)
    }

    fn parse_location(&mut self, loc: Loc) -> Result<LocationNode, ConfigError> {
        let path = match self.next() {
            Some(Token {
                kind: TokenKind::Word(w),
                ..
            }) => w,
            other => {
                return Err(ConfigError::new(
                    "expected path after 'location'".to_string(),
                    other.map(|t| t.loc).or(Some(loc)),
                ));
            }
        };

        self.expect_lbrace("location path")?;

        let mut node = LocationNode {
            path,
            directives: Vec::new(),
            line: loc.line,
        };

        loop {
            match self.next() {
                Some(Token {
                    kind: TokenKind::RBrace,
                    ..
                }) => break,
                Some(Token {
                    kind: TokenKind::Word(w),
                    loc,
                }) => {
                    node.directives.push(self.parse_directive(w, loc)?);
                }
                Some(token) => {
                    return Err(ConfigError::new(
                        "expected directive inside location block".to_string(),
                        Some(token.loc),
                    ));
                }
                None => {
                    return Err(ConfigError::new(
                        "unterminated 'location' block".to_string(),
                        Some(loc),
                    ));
                }
            }
        }

        Ok(node)
    }

    fn parse_directive(&mut self, name: String, loc: Loc) -> Result<DirectiveNode, ConfigError> {
        let mut args = Vec::new();

        loop {
            match self.next() {
                Some(Token {
                    kind: TokenKind::Semicolon,
                    ..
                }) => break,
                Some(Token {
                    kind: TokenKind::Word(w),
                    ..
                }) => args.push(w),
                Some(token) => {
                    return Err(ConfigError::new(
                        format!("directive '{}' is missing its ';'", name),
                        Some(token.loc),
                    ));
                }
                None => {
                    return Err(ConfigError::new(
                        format!("directive '{}' is missing its ';'", name),
                        self.loc().or(Some(loc)),
                    ));
                }
            }
        }

        Ok(DirectiveNode {
            name,
            args,
            line: loc.line,
        })
    }
}
