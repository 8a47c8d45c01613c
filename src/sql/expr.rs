//! SQL expression tree produced by the function registry.
//!
//! Renderers build these nodes out of already-lowered arguments and the
//! query renderer places them into clauses. Nodes emit themselves into a
//! shared [`TokenStream`].

use super::dialect::{ConcatStyle, Dialect, SqlDialect};
use super::token::{Token, TokenStream};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `column` or `table.column`
    Column {
        table: Option<String>,
        column: String,
    },
    Literal(Literal),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    /// `CASE [subject] WHEN .. THEN .. [ELSE ..] END`; without a subject the
    /// branch conditions are predicates.
    Case {
        subject: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// `type_name` is already the dialect's spelling.
    Cast {
        expr: Box<Expr>,
        type_name: String,
    },
    Star,
    Paren(Box<Expr>),
    /// `function OVER (PARTITION BY .. ORDER BY .. frame)`
    Window {
        function: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<WindowOrderBy>,
        frame: Option<WindowFrame>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Date(String),
    Datetime(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    And,
    Or,
    Plus,
    Minus,
    Mul,
    Div,
    Concat,
}

impl BinaryOperator {
    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        use BinaryOperator::*;
        match self {
            Or => 1,
            And => 2,
            Eq | Ne | Lt | Gt | Lte | Gte => 3,
            Plus | Minus | Concat => 4,
            Mul | Div => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
}

/// One `ORDER BY` item inside `OVER (...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOrderBy {
    pub expr: Expr,
    pub descending: bool,
}

impl WindowOrderBy {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            descending: false,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            descending: true,
        }
    }
}

/// Row frames used by running and moving windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFrame {
    /// `ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW`
    RowsToCurrent,
    /// `ROWS BETWEEN n PRECEDING AND CURRENT ROW`
    RowsPreceding(u64),
}

impl WindowFrame {
    pub fn rows_to_current() -> Self {
        WindowFrame::RowsToCurrent
    }

    pub fn preceding_to_current(rows: u64) -> Self {
        WindowFrame::RowsPreceding(rows)
    }

    fn emit(self, ts: &mut TokenStream) {
        ts.keyword("ROWS BETWEEN").space();
        match self {
            WindowFrame::RowsToCurrent => {
                ts.keyword("UNBOUNDED PRECEDING");
            }
            WindowFrame::RowsPreceding(n) => {
                ts.push(Token::Int(n as i64)).space().keyword("PRECEDING");
            }
        }
        ts.space().keyword("AND CURRENT ROW");
    }
}

impl Expr {
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        self.emit(&mut ts, dialect);
        ts
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Push the tokens of this expression onto `ts`.
    ///
    /// The dialect is consulted only where the tree shape itself differs,
    /// which is concatenation on dialects that spell it as a function.
    pub fn emit(&self, ts: &mut TokenStream, dialect: Dialect) {
        match self {
            Expr::Column { table, column } => {
                ts.push(Token::QualifiedIdent {
                    schema: table.clone(),
                    name: column.clone(),
                });
            }
            Expr::Literal(lit) => {
                ts.push(lit.token());
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Concat,
                right,
            } if dialect.concat_style() == ConcatStyle::Function => {
                ts.push(Token::FunctionName("CONCAT".into())).lparen();
                left.emit(ts, dialect);
                ts.comma().space();
                right.emit(ts, dialect);
                ts.rparen();
            }
            Expr::BinaryOp { left, op, right } => {
                emit_operand(ts, left, *op, false, dialect);
                ts.space().push(Token::Op(*op)).space();
                emit_operand(ts, right, *op, true, dialect);
            }
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => {
                ts.keyword("NOT").space();
                if matches!(**expr, Expr::BinaryOp { .. }) {
                    ts.lparen();
                    expr.emit(ts, dialect);
                    ts.rparen();
                } else {
                    expr.emit(ts, dialect);
                }
            }
            Expr::Function {
                name,
                args,
                distinct,
            } => {
                ts.push(Token::FunctionName(name.clone())).lparen();
                if *distinct {
                    ts.keyword("DISTINCT").space();
                }
                ts.comma_separated(args, |ts, arg| arg.emit(ts, dialect));
                ts.rparen();
            }
            Expr::Case {
                subject,
                branches,
                otherwise,
            } => {
                ts.keyword("CASE");
                if let Some(subject) = subject {
                    ts.space();
                    subject.emit(ts, dialect);
                }
                for (when, then) in branches {
                    ts.space().keyword("WHEN").space();
                    when.emit(ts, dialect);
                    ts.space().keyword("THEN").space();
                    then.emit(ts, dialect);
                }
                if let Some(otherwise) = otherwise {
                    ts.space().keyword("ELSE").space();
                    otherwise.emit(ts, dialect);
                }
                ts.space().keyword("END");
            }
            Expr::IsNull { expr, negated } => {
                expr.emit(ts, dialect);
                ts.space()
                    .keyword(if *negated { "IS NOT NULL" } else { "IS NULL" });
            }
            Expr::Cast { expr, type_name } => {
                ts.keyword("CAST").lparen();
                expr.emit(ts, dialect);
                ts.space()
                    .keyword("AS")
                    .space()
                    .push(Token::TypeName(type_name.clone()))
                    .rparen();
            }
            Expr::Star => {
                ts.push(Token::Punct('*'));
            }
            Expr::Paren(inner) => {
                ts.lparen();
                inner.emit(ts, dialect);
                ts.rparen();
            }
            Expr::Window {
                function,
                partition_by,
                order_by,
                frame,
            } => {
                function.emit(ts, dialect);
                ts.space().keyword("OVER").space().lparen();
                let mut started = false;
                if !partition_by.is_empty() {
                    ts.keyword("PARTITION BY").space();
                    ts.comma_separated(partition_by, |ts, p| p.emit(ts, dialect));
                    started = true;
                }
                if !order_by.is_empty() {
                    if started {
                        ts.space();
                    }
                    ts.keyword("ORDER BY").space();
                    ts.comma_separated(order_by, |ts, o| {
                        o.expr.emit(ts, dialect);
                        ts.space().keyword(if o.descending { "DESC" } else { "ASC" });
                    });
                    started = true;
                }
                if let Some(frame) = frame {
                    if started {
                        ts.space();
                    }
                    frame.emit(ts);
                }
                ts.rparen();
            }
        }
    }
}

impl Literal {
    fn token(&self) -> Token {
        match self {
            Literal::Int(n) => Token::Int(*n),
            Literal::Float(f) => Token::Float(*f),
            Literal::String(s) => Token::Str(s.clone()),
            Literal::Bool(b) => Token::Bool(*b),
            Literal::Date(d) => Token::Date(d.clone()),
            Literal::Datetime(d) => Token::Datetime(d.clone()),
            Literal::Null => Token::Null,
        }
    }
}

/// Operands binding looser than `parent` get parentheses, as do equal
/// precedence operands on the right (`a - (b - c)`).
fn emit_operand(ts: &mut TokenStream, operand: &Expr, parent: BinaryOperator, is_right: bool, dialect: Dialect) {
    let wrap = match operand {
        Expr::BinaryOp { op, .. } => {
            let (inner, outer) = (op.precedence(), parent.precedence());
            inner < outer || (is_right && inner == outer)
        }
        _ => false,
    };
    if wrap {
        ts.lparen();
        operand.emit(ts, dialect);
        ts.rparen();
    } else {
        operand.emit(ts, dialect);
    }
}

// =============================================================================
// Constructors
// =============================================================================

pub fn col(name: &str) -> Expr {
    Expr::Column {
        table: None,
        column: name.into(),
    }
}

pub fn lit_int(n: i64) -> Expr {
    Expr::Literal(Literal::Int(n))
}

pub fn lit_float(f: f64) -> Expr {
    Expr::Literal(Literal::Float(f))
}

pub fn lit_str(s: &str) -> Expr {
    Expr::Literal(Literal::String(s.into()))
}

pub fn lit_bool(b: bool) -> Expr {
    Expr::Literal(Literal::Bool(b))
}

pub fn lit_null() -> Expr {
    Expr::Literal(Literal::Null)
}

pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function {
        name: name.into(),
        args,
        distinct: false,
    }
}

/// `name(DISTINCT args..)`
pub fn func_distinct(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function {
        name: name.into(),
        args,
        distinct: true,
    }
}

pub fn count_star() -> Expr {
    func("COUNT", vec![Expr::Star])
}

pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

/// Left-deep `AND` of `exprs`; `None` when there is nothing to join.
pub fn and_all(exprs: Vec<Expr>) -> Option<Expr> {
    exprs
        .into_iter()
        .reduce(|acc, e| binary(acc, BinaryOperator::And, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn over(function: Expr, partition_by: Vec<Expr>, order_by: Vec<WindowOrderBy>, frame: Option<WindowFrame>) -> Expr {
        Expr::Window {
            function: Box::new(function),
            partition_by,
            order_by,
            frame,
        }
    }

    #[test]
    fn test_columns() {
        assert_eq!(col("amount").to_sql(Dialect::Postgres), "\"amount\"");
        let qualified = Expr::Column {
            table: Some("q_0_0_0".into()),
            column: "res_0_0_0".into(),
        };
        assert_eq!(qualified.to_sql(Dialect::MySql), "`q_0_0_0`.`res_0_0_0`");
    }

    #[test]
    fn test_comparison() {
        let expr = binary(col("qty"), BinaryOperator::Gt, lit_int(18));
        assert_eq!(expr.to_sql(Dialect::Postgres), "\"qty\" > 18");
    }

    #[test]
    fn test_parentheses_follow_precedence() {
        let sum_ab = binary(col("a"), BinaryOperator::Plus, col("b"));
        let expr = binary(sum_ab, BinaryOperator::Mul, col("c"));
        assert_eq!(expr.to_sql(Dialect::DuckDb), "(\"a\" + \"b\") * \"c\"");

        let diff_bc = binary(col("b"), BinaryOperator::Minus, col("c"));
        let expr = binary(col("a"), BinaryOperator::Minus, diff_bc);
        assert_eq!(expr.to_sql(Dialect::DuckDb), "\"a\" - (\"b\" - \"c\")");

        let prod_ab = binary(col("a"), BinaryOperator::Mul, col("b"));
        let expr = binary(prod_ab, BinaryOperator::Plus, col("c"));
        assert_eq!(expr.to_sql(Dialect::DuckDb), "\"a\" * \"b\" + \"c\"");
    }

    #[test]
    fn test_not_wraps_binary_operand() {
        let expr = Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(binary(col("a"), BinaryOperator::Eq, lit_int(1))),
        };
        assert_eq!(expr.to_sql(Dialect::Postgres), "NOT (\"a\" = 1)");
    }

    #[test]
    fn test_count_distinct() {
        let expr = func_distinct("COUNT", vec![col("user_id")]);
        assert_eq!(expr.to_sql(Dialect::Postgres), "COUNT(DISTINCT \"user_id\")");
        assert_eq!(count_star().to_sql(Dialect::Postgres), "COUNT(*)");
    }

    #[test]
    fn test_cast() {
        let expr = Expr::Cast {
            expr: Box::new(col("qty")),
            type_name: "DOUBLE PRECISION".into(),
        };
        assert_eq!(expr.to_sql(Dialect::Postgres), "CAST(\"qty\" AS DOUBLE PRECISION)");
    }

    #[test]
    fn test_searched_case() {
        let expr = Expr::Case {
            subject: None,
            branches: vec![(
                binary(col("status"), BinaryOperator::Eq, lit_str("A")),
                lit_str("Active"),
            )],
            otherwise: Some(Box::new(lit_str("Unknown"))),
        };
        assert_eq!(
            expr.to_sql(Dialect::Postgres),
            "CASE WHEN \"status\" = 'A' THEN 'Active' ELSE 'Unknown' END"
        );
    }

    #[test]
    fn test_running_sum() {
        let expr = over(
            func("SUM", vec![col("amount")]),
            vec![col("region")],
            vec![WindowOrderBy::asc(col("day"))],
            Some(WindowFrame::rows_to_current()),
        );
        assert_eq!(
            expr.to_sql(Dialect::Postgres),
            "SUM(\"amount\") OVER (PARTITION BY \"region\" ORDER BY \"day\" ASC \
             ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW)"
        );
    }

    #[test]
    fn test_moving_frame() {
        let expr = over(
            func("AVG", vec![col("x")]),
            vec![],
            vec![WindowOrderBy::desc(col("day"))],
            Some(WindowFrame::preceding_to_current(2)),
        );
        assert_eq!(
            expr.to_sql(Dialect::DuckDb),
            "AVG(\"x\") OVER (ORDER BY \"day\" DESC ROWS BETWEEN 2 PRECEDING AND CURRENT ROW)"
        );
    }

    #[test]
    fn test_total_window_has_empty_over() {
        let expr = over(func("AVG", vec![col("x")]), vec![], vec![], None);
        assert_eq!(expr.to_sql(Dialect::DuckDb), "AVG(\"x\") OVER ()");
    }

    #[test]
    fn test_concat_per_dialect() {
        let expr = binary(col("first_name"), BinaryOperator::Concat, col("last_name"));
        assert_eq!(expr.to_sql(Dialect::Postgres), "\"first_name\" || \"last_name\"");
        assert_eq!(expr.to_sql(Dialect::TSql), "[first_name] + [last_name]");
        assert_eq!(expr.to_sql(Dialect::MySql), "CONCAT(`first_name`, `last_name`)");
    }

    #[test]
    fn test_and_all() {
        assert!(and_all(vec![]).is_none());
        let eq = |c: &str, n: i64| binary(col(c), BinaryOperator::Eq, lit_int(n));
        let joined = and_all(vec![eq("a", 1), eq("b", 2), eq("c", 3)]);
        assert_eq!(
            joined.map(|e| e.to_sql(Dialect::DuckDb)).as_deref(),
            Some("\"a\" = 1 AND \"b\" = 2 AND \"c\" = 3")
        );
    }
}
