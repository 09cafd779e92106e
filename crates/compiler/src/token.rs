//! Tokenizer for Pico source.
//!
//! Produces a flat token stream terminated by a single [`TokenTag::Eof`]
//! token. Every token carries its source location (line, column, byte
//! span) plus the byte offset of the start of its line so the driver can
//! render the full source line in diagnostics.

use crate::error::PicoError;

/// Closed set of token tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTag {
    Unknown,
    Eof,
    Id,
    IntLit,
    LongLit,
    StrLit,

    LParen,
    RParen,
    LBrace,
    RBrace,

    Plus,
    PlusPlus,
    PlusEqual,

    Minus,
    MinusMinus,
    MinusEqual,

    Asterisk,
    AsteriskEqual,
    Slash,
    SlashEqual,

    Modulus,
    ModulusEqual,

    Less,
    LessLess,
    LessEqual,

    Greater,
    GreaterGreater,
    GreaterEqual,

    Equal,
    EqualEqual,
    Not,
    NotEqual,

    Ampersand,
    AmpersandAmpersand,

    Pipe,
    PipePipe,

    Semicolon,
    Comma,
    Colon,
    ColonColon,

    Caret,
    At,
    Dot,

    KwFn,
    KwLet,
    KwLog,
    KwReturn,
    KwIf,
    KwElse,
    KwWhile,
    KwLoop,
    KwBreak,
    KwContinue,
    KwDo,
    KwExtern,
    KwTrue,
    KwFalse,
    KwStruct,
}

/// Byte-accurate source span. `line` and `col` are 1-indexed; `start`
/// and `end` are absolute byte offsets into the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub col: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub tag: TokenTag,
    /// Literal text for identifiers and literals, empty otherwise.
    /// Long literals keep their `l`/`L` suffix; the parser strips it.
    pub value: String,
    pub loc: Location,
    /// Byte offset of the first character of the token's line.
    pub line_start: usize,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Token({:?}, \"{}\", line={}, col={})",
            self.tag, self.value, self.loc.line, self.loc.col
        )
    }
}

fn keyword_tag(ident: &str) -> Option<TokenTag> {
    let tag = match ident {
        "fn" => TokenTag::KwFn,
        "let" => TokenTag::KwLet,
        "return" => TokenTag::KwReturn,
        "log" => TokenTag::KwLog,
        "if" => TokenTag::KwIf,
        "else" => TokenTag::KwElse,
        "while" => TokenTag::KwWhile,
        "loop" => TokenTag::KwLoop,
        "do" => TokenTag::KwDo,
        "break" => TokenTag::KwBreak,
        "continue" => TokenTag::KwContinue,
        "extern" => TokenTag::KwExtern,
        "true" => TokenTag::KwTrue,
        "false" => TokenTag::KwFalse,
        "struct" => TokenTag::KwStruct,
        _ => return None,
    };
    Some(tag)
}

pub struct Tokenizer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    col: usize,
    line_start: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Tokenizer {
            source,
            pos: 0,
            line: 1,
            col: 1,
            line_start: 0,
        }
    }

    /// Tokenize the whole source, including the trailing Eof token.
    pub fn tokenize(source: &'a str) -> Result<Vec<Token>, PicoError> {
        let mut tokenizer = Tokenizer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = tokenizer.next_token()?;
            let is_eof = token.tag == TokenTag::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn current(&self) -> char {
        self.source[self.pos..].chars().next().unwrap_or('\0')
    }

    fn check(&self, target: char) -> bool {
        self.pos < self.source.len() && self.current() == target
    }

    fn advance(&mut self) {
        if let Some(c) = self.source[self.pos..].chars().next() {
            self.pos += c.len_utf8();
            self.col += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.current() {
                '\t' | ' ' | '\r' => self.advance(),
                '\n' => {
                    self.pos += 1;
                    self.line += 1;
                    self.col = 1;
                    self.line_start = self.pos;
                }
                _ => break,
            }
        }
    }

    /// Pick between a one-char tag and a two-char tag depending on the
    /// character following the one already consumed.
    fn one_or_two(&mut self, next: char, two: TokenTag, one: TokenTag) -> TokenTag {
        if self.check(next) {
            self.advance();
            two
        } else {
            one
        }
    }

    fn error_token(&self, start: usize, start_line: usize, start_col: usize) -> Token {
        Token {
            tag: TokenTag::Unknown,
            value: String::new(),
            loc: Location {
                line: start_line,
                col: start_col,
                start,
                end: self.pos.max(start + 1),
            },
            line_start: self.line_start,
        }
    }

    fn next_token(&mut self) -> Result<Token, PicoError> {
        self.skip_whitespace();

        let start = self.pos;
        let start_line = self.line;
        let start_col = self.col;
        let line_start = self.line_start;

        let mut value = String::new();
        let c = self.current();

        let tag = match c {
            '\0' => {
                self.advance();
                TokenTag::Eof
            }
            '{' => {
                self.advance();
                TokenTag::LBrace
            }
            '}' => {
                self.advance();
                TokenTag::RBrace
            }
            '(' => {
                self.advance();
                TokenTag::LParen
            }
            ')' => {
                self.advance();
                TokenTag::RParen
            }
            ';' => {
                self.advance();
                TokenTag::Semicolon
            }
            ',' => {
                self.advance();
                TokenTag::Comma
            }
            '^' => {
                self.advance();
                TokenTag::Caret
            }
            '@' => {
                self.advance();
                TokenTag::At
            }
            '.' => {
                self.advance();
                TokenTag::Dot
            }
            '+' => {
                self.advance();
                if self.check('+') {
                    self.advance();
                    TokenTag::PlusPlus
                } else if self.check('=') {
                    self.advance();
                    TokenTag::PlusEqual
                } else {
                    TokenTag::Plus
                }
            }
            '-' => {
                self.advance();
                if self.check('-') {
                    self.advance();
                    TokenTag::MinusMinus
                } else if self.check('=') {
                    self.advance();
                    TokenTag::MinusEqual
                } else {
                    TokenTag::Minus
                }
            }
            '*' => {
                self.advance();
                self.one_or_two('=', TokenTag::AsteriskEqual, TokenTag::Asterisk)
            }
            '/' => {
                self.advance();
                self.one_or_two('=', TokenTag::SlashEqual, TokenTag::Slash)
            }
            '%' => {
                self.advance();
                self.one_or_two('=', TokenTag::ModulusEqual, TokenTag::Modulus)
            }
            '<' => {
                self.advance();
                if self.check('=') {
                    self.advance();
                    TokenTag::LessEqual
                } else if self.check('<') {
                    self.advance();
                    TokenTag::LessLess
                } else {
                    TokenTag::Less
                }
            }
            '>' => {
                self.advance();
                if self.check('=') {
                    self.advance();
                    TokenTag::GreaterEqual
                } else if self.check('>') {
                    self.advance();
                    TokenTag::GreaterGreater
                } else {
                    TokenTag::Greater
                }
            }
            '=' => {
                self.advance();
                self.one_or_two('=', TokenTag::EqualEqual, TokenTag::Equal)
            }
            '!' => {
                self.advance();
                self.one_or_two('=', TokenTag::NotEqual, TokenTag::Not)
            }
            '&' => {
                self.advance();
                self.one_or_two('&', TokenTag::AmpersandAmpersand, TokenTag::Ampersand)
            }
            '|' => {
                self.advance();
                self.one_or_two('|', TokenTag::PipePipe, TokenTag::Pipe)
            }
            ':' => {
                self.advance();
                self.one_or_two(':', TokenTag::ColonColon, TokenTag::Colon)
            }
            '"' => {
                self.advance();
                loop {
                    match self.current() {
                        '"' => {
                            self.advance();
                            break;
                        }
                        '\\' => {
                            self.advance();
                            let esc = self.current();
                            let resolved = match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '\\' => '\\',
                                '"' => '"',
                                _ => {
                                    return Err(PicoError::lex(
                                        format!("unknown escape sequence '\\{}'", esc),
                                        self.error_token(start, start_line, start_col),
                                    ));
                                }
                            };
                            value.push(resolved);
                            self.advance();
                        }
                        '\0' => {
                            return Err(PicoError::lex(
                                "unterminated string literal",
                                self.error_token(start, start_line, start_col),
                            ));
                        }
                        c => {
                            value.push(c);
                            self.advance();
                        }
                    }
                }
                TokenTag::StrLit
            }
            c if c.is_ascii_digit() => {
                while self.current().is_ascii_digit() {
                    self.advance();
                }
                let tag = if matches!(self.current(), 'l' | 'L') {
                    self.advance();
                    TokenTag::LongLit
                } else {
                    TokenTag::IntLit
                };
                value = self.source[start..self.pos].to_string();
                tag
            }
            c if c.is_alphabetic() || c == '_' => {
                while self.current().is_alphanumeric() || self.current() == '_' {
                    self.advance();
                }
                value = self.source[start..self.pos].to_string();
                keyword_tag(&value).unwrap_or(TokenTag::Id)
            }
            c => {
                self.advance();
                return Err(PicoError::lex(
                    format!("unknown character '{}'", c),
                    self.error_token(start, start_line, start_col),
                ));
            }
        };

        Ok(Token {
            tag,
            value,
            loc: Location {
                line: start_line,
                col: start_col,
                start,
                end: self.pos,
            },
            line_start,
        })
    }
}
