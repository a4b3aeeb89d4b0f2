//! Purpose: Parse selection conditions into a typed expression tree.
//! Exports: `Condition`, `Term`, `CompareOp`, `ArithOp`, `Func`, `parse_condition`.
//! Role: Front end for query evaluation; evaluation lives in `core::eval`.
//! Invariants: Keywords are case-insensitive; constant sub-terms are folded at parse time.
//! Invariants: Parse failures are usage errors that name the byte offset.
use std::collections::BTreeSet;
use std::fmt;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    /// IEEE comparison, except that NaN never satisfies any operator.
    pub fn apply(self, left: f64, right: f64) -> bool {
        if left.is_nan() || right.is_nan() {
            return false;
        }
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
        }
    }

    /// Operator with operands swapped: `c < x` is `x > c`.
    pub fn flip(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl ArithOp {
    pub fn apply(self, left: f64, right: f64) -> f64 {
        match self {
            ArithOp::Add => left + right,
            ArithOp::Sub => left - right,
            ArithOp::Mul => left * right,
            ArithOp::Div => left / right,
            ArithOp::Rem => left % right,
            ArithOp::Pow => left.powf(right),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
            ArithOp::Pow => "^",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Func {
    Abs,
    Sqrt,
    Exp,
    Log,
    Log10,
    Floor,
    Ceil,
    Round,
    Pow,
    Min,
    Max,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        let func = match name.to_ascii_lowercase().as_str() {
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "pow" => Func::Pow,
            "min" => Func::Min,
            "max" => Func::Max,
            _ => return None,
        };
        Some(func)
    }

    pub fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            _ => 1,
        }
    }

    pub fn apply(self, args: &[f64]) -> f64 {
        let x = args.first().copied().unwrap_or(f64::NAN);
        let y = args.get(1).copied().unwrap_or(f64::NAN);
        match self {
            Func::Abs => x.abs(),
            Func::Sqrt => x.sqrt(),
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Log10 => x.log10(),
            Func::Floor => x.floor(),
            Func::Ceil => x.ceil(),
            Func::Round => x.round(),
            Func::Pow => x.powf(y),
            Func::Min => x.min(y),
            Func::Max => x.max(y),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Sqrt => "sqrt",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Log10 => "log10",
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Round => "round",
            Func::Pow => "pow",
            Func::Min => "min",
            Func::Max => "max",
        }
    }
}

/// Arithmetic expression over column values.
#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    Number(f64),
    Column(String),
    Neg(Box<Term>),
    Binary {
        op: ArithOp,
        left: Box<Term>,
        right: Box<Term>,
    },
    Call {
        func: Func,
        args: Vec<Term>,
    },
}

impl Term {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Term::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_column(&self) -> Option<&str> {
        match self {
            Term::Column(name) => Some(name),
            _ => None,
        }
    }

    pub fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Term::Number(_) => {}
            Term::Column(name) => {
                out.insert(name.clone());
            }
            Term::Neg(inner) => inner.collect_columns(out),
            Term::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Term::Call { args, .. } => args.iter().for_each(|arg| arg.collect_columns(out)),
        }
    }

    /// Evaluates with `lookup` supplying column values.
    pub fn eval(&self, lookup: &impl Fn(&str) -> f64) -> f64 {
        match self {
            Term::Number(value) => *value,
            Term::Column(name) => lookup(name),
            Term::Neg(inner) => -inner.eval(lookup),
            Term::Binary { op, left, right } => op.apply(left.eval(lookup), right.eval(lookup)),
            Term::Call { func, args } => {
                let values: Vec<f64> = args.iter().map(|arg| arg.eval(lookup)).collect();
                func.apply(&values)
            }
        }
    }

    fn fold(self) -> Term {
        match self {
            Term::Neg(inner) => match inner.fold() {
                Term::Number(value) => Term::Number(-value),
                other => Term::Neg(Box::new(other)),
            },
            Term::Binary { op, left, right } => {
                let left = left.fold();
                let right = right.fold();
                match (left.as_number(), right.as_number()) {
                    (Some(l), Some(r)) => Term::Number(op.apply(l, r)),
                    _ => Term::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                }
            }
            Term::Call { func, args } => {
                let args: Vec<Term> = args.into_iter().map(Term::fold).collect();
                let constants: Option<Vec<f64>> = args.iter().map(Term::as_number).collect();
                match constants {
                    Some(values) => Term::Number(func.apply(&values)),
                    None => Term::Call { func, args },
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Number(value) => write!(f, "{value}"),
            Term::Column(name) => f.write_str(name),
            Term::Neg(inner) => write!(f, "-{inner}"),
            Term::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Term::Call { func, args } => {
                write!(f, "{}(", func.name())?;
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Boolean selection condition.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Const(bool),
    Compare {
        left: Term,
        op: CompareOp,
        right: Term,
    },
    Range {
        low: Term,
        low_op: CompareOp,
        mid: Term,
        high_op: CompareOp,
        high: Term,
    },
    In {
        term: Term,
        values: Vec<f64>,
    },
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Xor(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Columns referenced anywhere in the condition.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Condition::Const(_) => {}
            Condition::Compare { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Condition::Range { low, mid, high, .. } => {
                low.collect_columns(out);
                mid.collect_columns(out);
                high.collect_columns(out);
            }
            Condition::In { term, .. } => term.collect_columns(out),
            Condition::Not(inner) => inner.collect_columns(out),
            Condition::And(l, r) | Condition::Or(l, r) | Condition::Xor(l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
        }
    }

    fn fold(self) -> Condition {
        match self {
            Condition::Compare { left, op, right } => {
                let left = left.fold();
                let right = right.fold();
                match (left.as_number(), right.as_number()) {
                    (Some(l), Some(r)) => Condition::Const(op.apply(l, r)),
                    _ => Condition::Compare { left, op, right },
                }
            }
            Condition::Range {
                low,
                low_op,
                mid,
                high_op,
                high,
            } => Condition::Range {
                low: low.fold(),
                low_op,
                mid: mid.fold(),
                high_op,
                high: high.fold(),
            },
            Condition::In { term, values } => Condition::In {
                term: term.fold(),
                values,
            },
            Condition::Not(inner) => match inner.fold() {
                Condition::Const(value) => Condition::Const(!value),
                other => Condition::Not(Box::new(other)),
            },
            Condition::And(l, r) => Condition::And(Box::new(l.fold()), Box::new(r.fold())),
            Condition::Or(l, r) => Condition::Or(Box::new(l.fold()), Box::new(r.fold())),
            Condition::Xor(l, r) => Condition::Xor(Box::new(l.fold()), Box::new(r.fold())),
            other => other,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Const(true) => f.write_str("TRUE"),
            Condition::Const(false) => f.write_str("FALSE"),
            Condition::Compare { left, op, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
            Condition::Range {
                low,
                low_op,
                mid,
                high_op,
                high,
            } => write!(
                f,
                "{low} {} {mid} {} {high}",
                low_op.symbol(),
                high_op.symbol()
            ),
            Condition::In { term, values } => {
                write!(f, "{term} IN (")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
            Condition::Not(inner) => write!(f, "NOT {inner}"),
            Condition::And(l, r) => write!(f, "({l} AND {r})"),
            Condition::Or(l, r) => write!(f, "({l} OR {r})"),
            Condition::Xor(l, r) => write!(f, "({l} XOR {r})"),
        }
    }
}

/// Parses a condition; an empty string selects every row.
pub fn parse_condition(input: &str) -> Result<Condition, Error> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(Condition::Const(true));
    }
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let condition = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(parser.error_at(token.offset, "unexpected trailing input"));
    }
    Ok(condition.fold())
}

#[derive(Clone, Debug, PartialEq)]
enum TokenKind {
    Number(f64),
    Ident(String),
    Symbol(&'static str),
}

#[derive(Clone, Debug, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

const SYMBOLS: [&str; 21] = [
    "**", "<=", ">=", "==", "!=", "<>", "&&", "||", "(", ")", ",", "+", "-", "*", "/", "%", "^",
    "<", ">", "=", "!",
];

fn tokenize(input: &str) -> Result<Vec<Token>, Error> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) {
            let start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                pos += 1;
            }
            if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
                let mut ahead = pos + 1;
                if ahead < bytes.len() && (bytes[ahead] == b'+' || bytes[ahead] == b'-') {
                    ahead += 1;
                }
                if ahead < bytes.len() && bytes[ahead].is_ascii_digit() {
                    pos = ahead;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
            }
            let text = &input[start..pos];
            let value = text.parse::<f64>().map_err(|_| {
                parse_error(input, start, &format!("invalid number \"{text}\""))
            })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                offset: start,
            });
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = pos;
            while pos < bytes.len()
                && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'.')
            {
                pos += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(input[start..pos].to_string()),
                offset: start,
            });
            continue;
        }
        let rest = &input[pos..];
        let Some(symbol) = SYMBOLS.iter().find(|symbol| rest.starts_with(**symbol)) else {
            let ch = rest.chars().next().unwrap_or('?');
            return Err(parse_error(input, pos, &format!("unexpected character '{ch}'")));
        };
        tokens.push(Token {
            kind: TokenKind::Symbol(symbol),
            offset: pos,
        });
        pos += symbol.len();
    }
    Ok(tokens)
}

fn parse_error(input: &str, offset: usize, message: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("invalid condition at offset {offset}: {message}"))
        .with_hint(format!("while parsing \"{input}\""))
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|token| &token.kind)
    }

    fn offset(&self) -> usize {
        self.peek()
            .map(|token| token.offset)
            .unwrap_or(self.input.len())
    }

    fn error_at(&self, offset: usize, message: &str) -> Error {
        parse_error(self.input, offset, message)
    }

    fn error_here(&self, message: &str) -> Error {
        self.error_at(self.offset(), message)
    }

    fn at_symbol(&self, symbol: &str) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Symbol(s)) if *s == symbol)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if self.at_symbol(symbol) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), Error> {
        if self.eat_symbol(symbol) {
            return Ok(());
        }
        Err(self.error_here(&format!("expected '{symbol}'")))
    }

    fn parse_or(&mut self) -> Result<Condition, Error> {
        let mut left = self.parse_xor()?;
        while self.eat_keyword("or") || self.eat_symbol("||") {
            let right = self.parse_xor()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_xor(&mut self) -> Result<Condition, Error> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("xor") {
            let right = self.parse_and()?;
            left = Condition::Xor(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, Error> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") || self.eat_symbol("&&") {
            let right = self.parse_not()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Condition, Error> {
        if self.eat_keyword("not") || self.eat_symbol("!") {
            let inner = self.parse_not()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Condition, Error> {
        if self.at_symbol("(") {
            let saved = self.pos;
            self.pos += 1;
            let grouped = self
                .parse_or()
                .and_then(|cond| self.expect_symbol(")").map(|_| cond));
            match grouped {
                Ok(cond) => return Ok(cond),
                // Not a grouped condition; reparse as a term such as `(a + b) > 3`.
                Err(_) => self.pos = saved,
            }
        }
        for (keyword, value) in [("true", true), ("false", false)] {
            if self.at_keyword(keyword) && !self.next_is_operator() {
                self.pos += 1;
                return Ok(Condition::Const(value));
            }
        }
        self.parse_predicate()
    }

    fn next_is_operator(&self) -> bool {
        matches!(
            self.tokens.get(self.pos + 1).map(|token| &token.kind),
            Some(TokenKind::Symbol(s)) if *s != ")" && *s != "&&" && *s != "||"
        )
    }

    fn parse_predicate(&mut self) -> Result<Condition, Error> {
        let left = self.parse_term()?;

        let negated = self.at_keyword("not")
            && matches!(
                self.tokens.get(self.pos + 1).map(|token| &token.kind),
                Some(TokenKind::Ident(word))
                    if word.eq_ignore_ascii_case("between") || word.eq_ignore_ascii_case("in")
            );
        if negated {
            self.pos += 1;
        }

        let predicate = if self.eat_keyword("between") {
            let low = self.parse_term()?;
            if !self.eat_keyword("and") && !self.eat_symbol("&&") {
                return Err(self.error_here("expected AND in BETWEEN"));
            }
            let high = self.parse_term()?;
            Condition::Range {
                low,
                low_op: CompareOp::Le,
                mid: left,
                high_op: CompareOp::Le,
                high,
            }
        } else if self.eat_keyword("in") {
            Condition::In {
                term: left,
                values: self.parse_number_list()?,
            }
        } else {
            let Some(op) = self.parse_compare_op() else {
                return Err(self.error_here("expected a comparison operator"));
            };
            let right = self.parse_term()?;
            match self.parse_compare_op() {
                Some(high_op) => {
                    let high = self.parse_term()?;
                    Condition::Range {
                        low: left,
                        low_op: op,
                        mid: right,
                        high_op,
                        high,
                    }
                }
                None => Condition::Compare { left, op, right },
            }
        };

        if negated {
            return Ok(Condition::Not(Box::new(predicate)));
        }
        Ok(predicate)
    }

    fn parse_number_list(&mut self) -> Result<Vec<f64>, Error> {
        self.expect_symbol("(")?;
        let mut values = Vec::new();
        loop {
            let offset = self.offset();
            let value = self
                .parse_term()?
                .fold()
                .as_number()
                .ok_or_else(|| self.error_at(offset, "IN list accepts only constants"))?;
            values.push(value);
            if self.eat_symbol(")") {
                break;
            }
            self.expect_symbol(",")?;
        }
        Ok(values)
    }

    fn parse_compare_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek_kind()? {
            TokenKind::Symbol("<") => CompareOp::Lt,
            TokenKind::Symbol("<=") => CompareOp::Le,
            TokenKind::Symbol(">") => CompareOp::Gt,
            TokenKind::Symbol(">=") => CompareOp::Ge,
            TokenKind::Symbol("=") | TokenKind::Symbol("==") => CompareOp::Eq,
            TokenKind::Symbol("!=") | TokenKind::Symbol("<>") => CompareOp::Ne,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn parse_term(&mut self) -> Result<Term, Error> {
        let mut left = self.parse_product()?;
        loop {
            let op = if self.eat_symbol("+") {
                ArithOp::Add
            } else if self.eat_symbol("-") {
                ArithOp::Sub
            } else {
                break;
            };
            let right = self.parse_product()?;
            left = Term::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Term, Error> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol("*") {
                ArithOp::Mul
            } else if self.eat_symbol("/") {
                ArithOp::Div
            } else if self.eat_symbol("%") {
                ArithOp::Rem
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Term::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Term, Error> {
        if self.eat_symbol("-") {
            let inner = self.parse_unary()?;
            return Ok(Term::Neg(Box::new(inner)));
        }
        if self.eat_symbol("+") {
            return self.parse_unary();
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Term, Error> {
        let base = self.parse_primary()?;
        if self.eat_symbol("^") || self.eat_symbol("**") {
            let exponent = self.parse_unary()?;
            return Ok(Term::Binary {
                op: ArithOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Term, Error> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_here("unexpected end of condition"));
        };
        match token.kind {
            TokenKind::Number(value) => {
                self.pos += 1;
                Ok(Term::Number(value))
            }
            TokenKind::Symbol("(") => {
                self.pos += 1;
                let inner = self.parse_term()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                if is_reserved(&name) {
                    return Err(self.error_at(
                        token.offset,
                        &format!("unexpected keyword \"{name}\""),
                    ));
                }
                self.pos += 1;
                if !self.at_symbol("(") {
                    return Ok(Term::Column(name));
                }
                let Some(func) = Func::lookup(&name) else {
                    return Err(self.error_at(
                        token.offset,
                        &format!("unknown function \"{name}\""),
                    ));
                };
                self.pos += 1;
                let mut args = Vec::new();
                if !self.at_symbol(")") {
                    loop {
                        args.push(self.parse_term()?);
                        if !self.eat_symbol(",") {
                            break;
                        }
                    }
                }
                self.expect_symbol(")")?;
                if args.len() != func.arity() {
                    return Err(self.error_at(
                        token.offset,
                        &format!("{name} expects {} argument(s)", func.arity()),
                    ));
                }
                Ok(Term::Call { func, args })
            }
            TokenKind::Symbol(symbol) => Err(self.error_at(
                token.offset,
                &format!("unexpected '{symbol}'"),
            )),
        }
    }
}

fn is_reserved(word: &str) -> bool {
    ["and", "or", "xor", "not", "between", "in"]
        .iter()
        .any(|keyword| word.eq_ignore_ascii_case(keyword))
}
