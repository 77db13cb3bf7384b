//! Tokenizer for the expression language.

use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Question,
    Arrow,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Eof,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Number(n) => format!("number {n}"),
            Self::Str(s) => format!("string \"{s}\""),
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::Eof => "end of expression".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::Colon => ":",
            Self::Question => "?",
            Self::Arrow => "=>",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Bang => "!",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Number(_) | Self::Str(_) | Self::Ident(_) | Self::Eof => "",
        }
    }
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let mut lexer = Lexer {
        source,
        chars: source.char_indices().peekable(),
    };
    let mut tokens = Vec::new();
    loop {
        let spanned = lexer.next_token()?;
        let done = spanned.token == Token::Eof;
        tokens.push(spanned);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl Lexer<'_> {
    fn next_token(&mut self) -> Result<Spanned, ExpressionError> {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let Some((pos, c)) = self.chars.next() else {
            return Ok(Spanned {
                token: Token::Eof,
                pos: self.source.len(),
            });
        };

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            '.' => Token::Dot,
            ':' => Token::Colon,
            '?' => Token::Question,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' => {
                if self.eat('>') {
                    Token::Arrow
                } else if self.eat('=') {
                    // `===` is accepted as an alias of `==`
                    self.eat('=');
                    Token::EqEq
                } else {
                    return Err(syntax(pos, "assignment is not supported, use '=='"));
                }
            }
            '!' => {
                if self.eat('=') {
                    self.eat('=');
                    Token::NotEq
                } else {
                    Token::Bang
                }
            }
            '<' => {
                if self.eat('=') {
                    Token::LtEq
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    Token::AndAnd
                } else {
                    return Err(syntax(pos, "expected '&&'"));
                }
            }
            '|' => {
                if self.eat('|') {
                    Token::OrOr
                } else {
                    return Err(syntax(pos, "expected '||'"));
                }
            }
            '"' | '\'' => Token::Str(self.string(pos, c)?),
            c if c.is_ascii_digit() => self.number(pos)?,
            c if c.is_alphabetic() || c == '_' || c == '$' => self.word(pos, c),
            other => return Err(syntax(pos, format!("unexpected character '{other}'"))),
        };

        Ok(Spanned { token, pos })
    }

    fn eat(&mut self, expected: char) -> bool {
        self.chars.next_if(|(_, c)| *c == expected).is_some()
    }

    fn end_of_run(&mut self, start: usize, accept: impl Fn(char) -> bool) -> usize {
        let mut end = start;
        while let Some((i, c)) = self.chars.next_if(|(_, c)| accept(*c)) {
            end = i + c.len_utf8();
        }
        end
    }

    fn number(&mut self, start: usize) -> Result<Token, ExpressionError> {
        let mut end = self.end_of_run(start + 1, |c| c.is_ascii_digit());

        // A dot only belongs to the number when a digit follows it, so that
        // `items.0` style member access is not swallowed.
        let mut lookahead = self.chars.clone();
        if let (Some((_, '.')), Some((_, d))) = (lookahead.next(), lookahead.next()) {
            if d.is_ascii_digit() {
                self.chars.next();
                end = self.end_of_run(end + 1, |c| c.is_ascii_digit());
            }
        }

        if let Some(&(_, 'e' | 'E')) = self.chars.peek() {
            let mut lookahead = self.chars.clone();
            lookahead.next();
            let has_exponent = match lookahead.next() {
                Some((_, '+' | '-')) => matches!(lookahead.next(), Some((_, d)) if d.is_ascii_digit()),
                Some((_, d)) => d.is_ascii_digit(),
                None => false,
            };
            if has_exponent {
                self.chars.next();
                let sign_end = match self.chars.next_if(|(_, c)| *c == '+' || *c == '-') {
                    Some((i, _)) => i + 1,
                    None => end + 1,
                };
                end = self.end_of_run(sign_end, |c| c.is_ascii_digit());
            }
        }

        let text = &self.source[start..end];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| syntax(start, format!("invalid number '{text}'")))
    }

    fn word(&mut self, start: usize, first: char) -> Token {
        let end = self.end_of_run(start + first.len_utf8(), |c| {
            c.is_alphanumeric() || c == '_' || c == '$'
        });
        match &self.source[start..end] {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            word => Token::Ident(word.to_string()),
        }
    }

    fn string(&mut self, start: usize, quote: char) -> Result<String, ExpressionError> {
        let mut out = String::new();
        loop {
            let Some((pos, c)) = self.chars.next() else {
                return Err(syntax(start, "unterminated string"));
            };
            match c {
                c if c == quote => return Ok(out),
                '\\' => {
                    let Some((_, escaped)) = self.chars.next() else {
                        return Err(syntax(pos, "unterminated escape"));
                    };
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '\\' | '\'' | '"' => out.push(escaped),
                        'u' => out.push(self.unicode_escape(pos)?),
                        other => {
                            return Err(syntax(pos, format!("unknown escape '\\{other}'")));
                        }
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn unicode_escape(&mut self, pos: usize) -> Result<char, ExpressionError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .chars
                .next()
                .and_then(|(_, c)| c.to_digit(16))
                .ok_or_else(|| syntax(pos, "invalid unicode escape"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| syntax(pos, "invalid unicode escape"))
    }
}

fn syntax(position: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        position,
        message: message.into(),
    }
}
