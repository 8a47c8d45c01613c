//! Tokens: the smallest pieces of emitted SQL.
//!
//! Expressions and queries push tokens into a [`TokenStream`]; only
//! serialization looks at the dialect, so the same stream renders for any
//! target.

use std::fmt::Write as _;

use super::dialect::{ConcatStyle, Dialect, SqlDialect};
use super::expr::BinaryOperator;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Keyword or keyword phrase, emitted as written (`GROUP BY`, `OVER`).
    Keyword(&'static str),
    /// Single punctuation character: `,` `.` `(` `)` `*`.
    Punct(char),
    Op(BinaryOperator),

    Space,
    Newline,
    Indent(usize),

    Ident(String),
    /// `schema.name`, or just `name`.
    QualifiedIdent {
        schema: Option<String>,
        name: String,
    },
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    /// ISO date, `YYYY-MM-DD`
    Date(String),
    /// ISO datetime, `YYYY-MM-DD HH:MM:SS`
    Datetime(String),
    Null,

    /// Function name; the dialect may rename it.
    FunctionName(String),
    /// Dialect-native CAST target, emitted verbatim.
    TypeName(String),
}

impl Token {
    /// Append the dialect spelling of this token to `out`.
    pub fn write_to(&self, out: &mut String, dialect: Dialect) {
        match self {
            Token::Keyword(kw) => out.push_str(kw),
            Token::Punct(c) => out.push(*c),
            Token::Op(op) => out.push_str(operator_symbol(*op, dialect)),
            Token::Space => out.push(' '),
            Token::Newline => out.push('\n'),
            Token::Indent(n) => {
                for _ in 0..*n {
                    out.push_str("  ");
                }
            }
            Token::Ident(name) => out.push_str(&dialect.quote_identifier(name)),
            Token::QualifiedIdent { schema, name } => {
                if let Some(schema) = schema {
                    out.push_str(&dialect.quote_identifier(schema));
                    out.push('.');
                }
                out.push_str(&dialect.quote_identifier(name));
            }
            Token::Int(n) => {
                let _ = write!(out, "{n}");
            }
            // Non-finite floats have no literal form; lowering rejects them
            // earlier, this only keeps the output parseable.
            Token::Float(f) if !f.is_finite() => out.push_str(dialect.format_null()),
            Token::Float(f) => out.push_str(ryu::Buffer::new().format_finite(*f)),
            Token::Str(s) => out.push_str(&dialect.quote_string(s)),
            Token::Bool(b) => out.push_str(dialect.format_bool(*b)),
            Token::Date(d) => out.push_str(&dialect.format_date_literal(d)),
            Token::Datetime(d) => out.push_str(&dialect.format_datetime_literal(d)),
            Token::Null => out.push_str(dialect.format_null()),
            Token::FunctionName(name) => out.push_str(dialect.remap_function(name).unwrap_or(name.as_str())),
            Token::TypeName(name) => out.push_str(name),
        }
    }
}

fn operator_symbol(op: BinaryOperator, dialect: Dialect) -> &'static str {
    match op {
        BinaryOperator::Eq => "=",
        BinaryOperator::Ne => "<>",
        BinaryOperator::Lt => "<",
        BinaryOperator::Gt => ">",
        BinaryOperator::Lte => "<=",
        BinaryOperator::Gte => ">=",
        BinaryOperator::And => "AND",
        BinaryOperator::Or => "OR",
        BinaryOperator::Plus => "+",
        BinaryOperator::Minus => "-",
        BinaryOperator::Mul => "*",
        BinaryOperator::Div => "/",
        BinaryOperator::Concat => match dialect.concat_style() {
            ConcatStyle::Operator(symbol) => symbol,
            // Expressions rewrite concatenation into CONCAT() for these
            // dialects before it reaches a token.
            ConcatStyle::Function => "||",
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: Token) -> &mut Self {
        self.tokens.push(token);
        self
    }

    pub fn keyword(&mut self, kw: &'static str) -> &mut Self {
        self.push(Token::Keyword(kw))
    }

    pub fn ident(&mut self, name: &str) -> &mut Self {
        self.push(Token::Ident(name.to_string()))
    }

    /// Push `items` separated by `, `.
    pub fn comma_separated<T>(&mut self, items: &[T], mut each: impl FnMut(&mut Self, &T)) -> &mut Self {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.comma().space();
            }
            each(self, item);
        }
        self
    }

    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }

    pub fn newline(&mut self) -> &mut Self {
        self.push(Token::Newline)
    }

    pub fn indent(&mut self, n: usize) -> &mut Self {
        self.push(Token::Indent(n))
    }

    pub fn comma(&mut self) -> &mut Self {
        self.push(Token::Punct(','))
    }

    pub fn lparen(&mut self) -> &mut Self {
        self.push(Token::Punct('('))
    }

    pub fn rparen(&mut self) -> &mut Self {
        self.push(Token::Punct(')'))
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn serialize(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            token.write_to(&mut out, dialect);
        }
        out
    }
}
