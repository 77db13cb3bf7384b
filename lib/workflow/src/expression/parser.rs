//! Pratt parser producing the expression AST.

use super::eval;
use super::lexer::{Spanned, Token, tokenize};
use super::{ExpressionError, MAX_DEPTH, MAX_HEIGHT};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    fn binding_power(self) -> u8 {
        match self {
            Self::Eq | Self::NotEq => EQUALITY_BP,
            Self::Lt | Self::LtEq | Self::Gt | Self::GtEq => COMPARISON_BP,
            Self::Add | Self::Sub => ADDITIVE_BP,
            Self::Mul | Self::Div | Self::Rem => MULTIPLICATIVE_BP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
}

/// Expression syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
}

impl Expr {
    fn children(&self) -> Vec<&Self> {
        match self {
            Self::Literal(_) | Self::Ident(_) => Vec::new(),
            Self::Member { object, .. } => vec![&**object],
            Self::Index { object, index } => vec![&**object, &**index],
            Self::Unary { operand, .. } => vec![&**operand],
            Self::Binary { left, right, .. } | Self::Logical { left, right, .. } => {
                vec![&**left, &**right]
            }
            Self::Conditional {
                test,
                consequent,
                alternate,
            } => vec![&**test, &**consequent, &**alternate],
            Self::Array(items) => items.iter().collect(),
            Self::Object(entries) => entries.iter().map(|(_, value)| value).collect(),
            Self::Call { args, .. } => args.iter().collect(),
            Self::Lambda { body, .. } => vec![&**body],
        }
    }

    fn binding_power(&self) -> Option<u8> {
        match self {
            Self::Binary { op, .. } => Some(op.binding_power()),
            Self::Logical { op, .. } => Some(match op {
                LogicalOp::And => AND_BP,
                LogicalOp::Or => OR_BP,
            }),
            _ => None,
        }
    }

    /// Nesting depth. The operands of a left-associative chain such as
    /// `a + b - c` share one level.
    pub(crate) fn depth(&self) -> usize {
        match self {
            Self::Binary { left, right, .. } | Self::Logical { left, right, .. } => {
                let left = if left.binding_power() == self.binding_power() {
                    left.depth()
                } else {
                    left.depth() + 1
                };
                left.max(right.depth() + 1)
            }
            other => {
                other
                    .children()
                    .into_iter()
                    .map(Self::depth)
                    .max()
                    .unwrap_or(0)
                    + 1
            }
        }
    }

    /// Height of the tree rooted at this node.
    pub(crate) fn height(&self) -> usize {
        self.children()
            .into_iter()
            .map(Self::height)
            .max()
            .unwrap_or(0)
            + 1
    }
}

// Binding powers, lowest first.
const TERNARY_BP: u8 = 2;
const OR_BP: u8 = 3;
const AND_BP: u8 = 4;
const EQUALITY_BP: u8 = 5;
const COMPARISON_BP: u8 = 6;
const ADDITIVE_BP: u8 = 7;
const MULTIPLICATIVE_BP: u8 = 8;
const PREFIX_BP: u8 = 9;

pub(crate) fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression(0)?;
    parser.expect(&Token::Eof)?;
    if expr.depth() > MAX_DEPTH {
        return Err(ExpressionError::TooDeep { max: MAX_DEPTH });
    }
    if expr.height() > MAX_HEIGHT {
        return Err(ExpressionError::TooDeep { max: MAX_HEIGHT });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map_or(&Token::Eof, |spanned| &spanned.token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |spanned| spanned.pos)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", expected.describe())))
        }
    }

    fn unexpected(&self, context: &str) -> ExpressionError {
        ExpressionError::Syntax {
            position: self.position(),
            message: format!("{context}, found {}", self.peek().describe()),
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep { max: MAX_DEPTH });
        }
        let result = self.expression_inner(min_bp);
        self.depth -= 1;
        result
    }

    fn expression_inner(&mut self, min_bp: u8) -> Result<Expr, ExpressionError> {
        let mut lhs = self.prefix()?;

        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let property = match self.advance() {
                        Token::Ident(name) => name,
                        Token::True => "true".to_string(),
                        Token::False => "false".to_string(),
                        Token::Null => "null".to_string(),
                        Token::Number(n) if n.fract() == 0.0 && n >= 0.0 => format!("{n}"),
                        _ => {
                            self.pos = self.pos.saturating_sub(1);
                            return Err(self.unexpected("expected property name after '.'"));
                        }
                    };
                    lhs = Expr::Member {
                        object: Box::new(lhs),
                        property,
                    };
                    continue;
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.expression(0)?;
                    self.expect(&Token::RBracket)?;
                    lhs = Expr::Index {
                        object: Box::new(lhs),
                        index: Box::new(index),
                    };
                    continue;
                }
                Token::LParen => {
                    let Expr::Ident(function) = lhs else {
                        return Err(self.unexpected("only built-in functions can be called"));
                    };
                    if !eval::is_builtin(&function) {
                        return Err(ExpressionError::UnknownFunction { name: function });
                    }
                    self.advance();
                    let args = self.list(&Token::RParen, |parser| parser.expression(0))?;
                    lhs = Expr::Call { function, args };
                    continue;
                }
                Token::Question => {
                    if TERNARY_BP < min_bp {
                        break;
                    }
                    self.advance();
                    let consequent = self.expression(0)?;
                    self.expect(&Token::Colon)?;
                    let alternate = self.expression(TERNARY_BP)?;
                    lhs = Expr::Conditional {
                        test: Box::new(lhs),
                        consequent: Box::new(consequent),
                        alternate: Box::new(alternate),
                    };
                    continue;
                }
                _ => {}
            }

            let Some((bp, op)) = infix(self.peek()) else {
                break;
            };
            if bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.expression(bp + 1)?;
            lhs = match op {
                Infix::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
                Infix::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
            };
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ExpressionError> {
        if self.at_lambda() {
            return self.lambda();
        }

        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(number_literal(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::Bang => Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(self.expression(PREFIX_BP)?),
            }),
            Token::Minus => Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(self.expression(PREFIX_BP)?),
            }),
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let items = self.list(&Token::RBracket, |parser| parser.expression(0))?;
                Ok(Expr::Array(items))
            }
            Token::LBrace => {
                let entries = self.list(&Token::RBrace, Parser::object_entry)?;
                Ok(Expr::Object(entries))
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected("expected an expression"))
            }
        }
    }

    fn object_entry(&mut self) -> Result<(String, Expr), ExpressionError> {
        let key = match self.advance() {
            Token::Ident(name) => name,
            Token::Str(s) => s,
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.unexpected("expected object key"));
            }
        };
        if !self.eat(&Token::Colon) {
            // `{ name }` shorthand reads the variable of the same name
            return Ok((key.clone(), Expr::Ident(key)));
        }
        Ok((key, self.expression(0)?))
    }

    /// Parses comma-separated items up to `close`, allowing a trailing comma.
    fn list<T>(
        &mut self,
        close: &Token,
        mut item: impl FnMut(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<Vec<T>, ExpressionError> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(item(self)?);
            if !self.eat(&Token::Comma) {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn at_lambda(&self) -> bool {
        match self.peek() {
            Token::Ident(_) => self.peek_at(1) == &Token::Arrow,
            Token::LParen => {
                let mut offset = 1;
                if self.peek_at(offset) == &Token::RParen {
                    return self.peek_at(offset + 1) == &Token::Arrow;
                }
                loop {
                    if !matches!(self.peek_at(offset), Token::Ident(_)) {
                        return false;
                    }
                    offset += 1;
                    match self.peek_at(offset) {
                        Token::Comma => offset += 1,
                        Token::RParen => return self.peek_at(offset + 1) == &Token::Arrow,
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn lambda(&mut self) -> Result<Expr, ExpressionError> {
        let params = match self.advance() {
            Token::Ident(name) => vec![name],
            _ => {
                let mut params = Vec::new();
                while let Token::Ident(name) = self.peek().clone() {
                    self.advance();
                    params.push(name);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RParen)?;
                params
            }
        };
        self.expect(&Token::Arrow)?;
        let body = self.expression(0)?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }
}

enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn infix(token: &Token) -> Option<(u8, Infix)> {
    let entry = match token {
        Token::OrOr => (OR_BP, Infix::Logical(LogicalOp::Or)),
        Token::AndAnd => (AND_BP, Infix::Logical(LogicalOp::And)),
        Token::EqEq => (EQUALITY_BP, Infix::Binary(BinaryOp::Eq)),
        Token::NotEq => (EQUALITY_BP, Infix::Binary(BinaryOp::NotEq)),
        Token::Lt => (COMPARISON_BP, Infix::Binary(BinaryOp::Lt)),
        Token::LtEq => (COMPARISON_BP, Infix::Binary(BinaryOp::LtEq)),
        Token::Gt => (COMPARISON_BP, Infix::Binary(BinaryOp::Gt)),
        Token::GtEq => (COMPARISON_BP, Infix::Binary(BinaryOp::GtEq)),
        Token::Plus => (ADDITIVE_BP, Infix::Binary(BinaryOp::Add)),
        Token::Minus => (ADDITIVE_BP, Infix::Binary(BinaryOp::Sub)),
        Token::Star => (MULTIPLICATIVE_BP, Infix::Binary(BinaryOp::Mul)),
        Token::Slash => (MULTIPLICATIVE_BP, Infix::Binary(BinaryOp::Div)),
        Token::Percent => (MULTIPLICATIVE_BP, Infix::Binary(BinaryOp::Rem)),
        _ => return None,
    };
    Some(entry)
}

fn number_literal(n: f64) -> Value {
    eval::number_value(n).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("a + b * c").expect("parse");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: ident("a"),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: ident("b"),
                    right: ident("c"),
                }),
            }
        );
    }

    #[test]
    fn subtraction_is_left_associative() {
        let expr = parse("a - b - c").expect("parse");
        let Expr::Binary { left, right, .. } = expr else {
            panic!("expected binary expression");
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Sub, .. }));
        assert_eq!(right, ident("c"));
    }

    #[test]
    fn member_chain_and_index() {
        let expr = parse("input.items[0].name").expect("parse");
        let Expr::Member { object, property } = expr else {
            panic!("expected member access");
        };
        assert_eq!(property, "name");
        assert!(matches!(*object, Expr::Index { .. }));
    }

    #[test]
    fn ternary_nests_to_the_right() {
        let expr = parse("a ? 1 : b ? 2 : 3").expect("parse");
        let Expr::Conditional { alternate, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(*alternate, Expr::Conditional { .. }));
    }

    #[test]
    fn lambdas_as_arguments() {
        let expr = parse("reduce(input.xs, (acc, x) => acc + x, 0)").expect("parse");
        let Expr::Call { function, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(function, "reduce");
        assert_eq!(args.len(), 3);
        assert!(matches!(&args[1], Expr::Lambda { params, .. } if params == &["acc", "x"]));
    }

    #[test]
    fn parenthesized_expression_is_not_a_lambda() {
        let expr = parse("(a) + 1").expect("parse");
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn object_literal_with_shorthand() {
        let expr = parse("{ total: 1, name, 'quoted key': true }").expect("parse");
        let Expr::Object(entries) = expr else {
            panic!("expected object");
        };
        let keys: Vec<&str> = entries.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["total", "name", "quoted key"]);
    }

    #[test]
    fn unknown_function_is_rejected() {
        assert_eq!(
            parse("eval('1')"),
            Err(ExpressionError::UnknownFunction {
                name: "eval".to_string()
            })
        );
    }

    #[test]
    fn calling_a_non_function_is_rejected() {
        assert!(parse("input.f(1)").is_err());
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(matches!(
            parse("1 2"),
            Err(ExpressionError::Syntax { position: 2, .. })
        ));
    }

    #[test]
    fn nesting_is_bounded() {
        let source = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(
            parse(&source),
            Err(ExpressionError::TooDeep { max: MAX_DEPTH })
        );
    }

    #[test]
    fn operator_chains_share_one_level() {
        let chain = vec!["a"; 100].join(" + ");
        let expr = parse(&chain).expect("parse");
        assert_eq!(expr.depth(), 2);
        assert_eq!(expr.height(), 100);

        let mixed = parse("a + (b && c) * d").expect("parse");
        assert_eq!(mixed.depth(), 4);
    }

    #[test]
    fn chain_height_is_bounded() {
        let chain = vec!["a"; MAX_HEIGHT + 1].join(" - ");
        assert_eq!(
            parse(&chain),
            Err(ExpressionError::TooDeep { max: MAX_HEIGHT })
        );
    }
}
