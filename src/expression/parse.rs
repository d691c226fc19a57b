//! Textual condition syntax.
//!
//! Parses expressions like:
//! - percent >= 50
//! - status == "open" & !(tags contains "home")
//! - lower(title) contains "release" | due_date < "2024-06-01T00:00:00Z"
//!
//! `&` binds tighter than `|`. Identifiers resolve against a [`Schema`];
//! string literals compared against a time variable are read as RFC 3339.

use chrono::{DateTime, Utc};

use super::condition::{Clause, CompareOp, Condition, ConditionList, LogicalOp};
use super::formula::{Formula, FormulaOp, Operand};
use super::schema::Schema;
use super::value::{Value, ValueType};
use super::ExpressionError;

/// Parse `input` into a condition tree over the variables of `schema`.
pub fn parse_condition(input: &str, schema: &impl Schema) -> Result<Clause, ExpressionError> {
    let mut parser = Parser::new(input, schema)?;
    let clause = parser.parse_expr()?;
    parser.expect(TokenKind::Eof)?;
    Ok(clause)
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Compare(CompareOp),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Pipe,
    Amp,
    Bang,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

fn parse_error(message: impl Into<String>, position: usize) -> ExpressionError {
    ExpressionError::Parse {
        message: message.into(),
        position,
    }
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.input[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn next_token(&mut self) -> Result<Token, ExpressionError> {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
        let pos = self.pos;
        let Some(ch) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                pos,
            });
        };

        let single = match ch {
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            ',' => Some(TokenKind::Comma),
            '|' => Some(TokenKind::Pipe),
            '&' => Some(TokenKind::Amp),
            _ => None,
        };
        if let Some(kind) = single {
            self.bump();
            return Ok(Token { kind, pos });
        }

        let kind = match (ch, self.peek_second()) {
            ('=', Some('=')) => self.operator(2, CompareOp::Eq),
            ('!', Some('=')) => self.operator(2, CompareOp::Ne),
            ('<', Some('=')) => self.operator(2, CompareOp::Le),
            ('>', Some('=')) => self.operator(2, CompareOp::Ge),
            ('<', _) => self.operator(1, CompareOp::Lt),
            ('>', _) => self.operator(1, CompareOp::Gt),
            ('!', _) => {
                self.bump();
                TokenKind::Bang
            }
            ('"', _) => self.read_string()?,
            ('-', Some(next)) if next.is_ascii_digit() => self.read_number()?,
            _ if ch.is_ascii_digit() => self.read_number()?,
            _ if is_ident_start(ch) => self.read_ident(),
            _ => return Err(parse_error(format!("Unexpected character '{ch}'"), pos)),
        };
        Ok(Token { kind, pos })
    }

    fn operator(&mut self, width: usize, op: CompareOp) -> TokenKind {
        self.pos += width;
        TokenKind::Compare(op)
    }

    fn read_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.bump();
        }
        TokenKind::Ident(self.input[start..self.pos].to_string())
    }

    fn read_number(&mut self) -> Result<TokenKind, ExpressionError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        let mut is_float = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                self.bump();
            } else if ch == '.' && !is_float {
                is_float = true;
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.input[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| parse_error(format!("Invalid number '{text}'"), start))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| parse_error(format!("Invalid number '{text}'"), start))
        }
    }

    fn read_string(&mut self) -> Result<TokenKind, ExpressionError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        while let Some(ch) = self.bump() {
            match ch {
                '"' => return Ok(TokenKind::Str(out)),
                '\\' => {
                    let Some(esc) = self.bump() else {
                        break;
                    };
                    out.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                other => out.push(other),
            }
        }
        Err(parse_error("Unterminated string literal", start))
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-'
}

struct Parser<'a, S> {
    tokens: Vec<Token>,
    index: usize,
    schema: &'a S,
}

impl<'a, S: Schema> Parser<'a, S> {
    fn new(input: &str, schema: &'a S) -> Result<Self, ExpressionError> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let is_eof = matches!(token.kind, TokenKind::Eof);
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(Self {
            tokens,
            index: 0,
            schema,
        })
    }

    fn parse_expr(&mut self) -> Result<Clause, ExpressionError> {
        self.parse_chain(LogicalOp::Or)
    }

    /// One operator level: `operand (sep operand)*`, flattened into one list.
    fn parse_chain(&mut self, op: LogicalOp) -> Result<Clause, ExpressionError> {
        let (separator, next) = match op {
            LogicalOp::Or => (TokenKind::Pipe, Some(LogicalOp::And)),
            LogicalOp::And => (TokenKind::Amp, None),
        };
        let mut clauses = vec![self.parse_level(next)?];
        while self.peek_kind() == &separator {
            self.next_token();
            clauses.push(self.parse_level(next)?);
        }
        if clauses.len() == 1 {
            return Ok(clauses.remove(0));
        }
        Ok(Clause::List(ConditionList::new(op, clauses)))
    }

    fn parse_level(&mut self, op: Option<LogicalOp>) -> Result<Clause, ExpressionError> {
        match op {
            Some(op) => self.parse_chain(op),
            None => self.parse_unary(),
        }
    }

    fn parse_unary(&mut self) -> Result<Clause, ExpressionError> {
        match self.peek_kind() {
            TokenKind::Bang => {
                self.next_token();
                Ok(self.parse_unary()?.negate())
            }
            TokenKind::LParen => {
                self.next_token();
                let clause = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(clause)
            }
            TokenKind::Ident(name)
                if (name == "true" || name == "false")
                    && !matches!(self.peek_kind_at(1), TokenKind::Compare(_))
                    && !self.peek_contains_at(1) =>
            {
                let value = name == "true";
                self.next_token();
                Ok(Clause::Const(value))
            }
            _ => self.parse_comparison().map(Clause::Condition),
        }
    }

    fn parse_comparison(&mut self) -> Result<Condition, ExpressionError> {
        let left_pos = self.peek_pos();
        let left = self.parse_operand()?;
        let token = self.next_token();
        let op = match token.kind {
            TokenKind::Compare(op) => op,
            TokenKind::Ident(word) if word == "contains" => CompareOp::Contains,
            _ => return Err(parse_error("Expected comparison operator", token.pos)),
        };
        let right_pos = self.peek_pos();
        let right = self.parse_operand()?;
        let right = coerce_time(right, &left, right_pos)?;
        let left = coerce_time(left, &right, left_pos)?;
        Ok(Condition::new(op, left, right))
    }

    fn parse_operand(&mut self) -> Result<Operand, ExpressionError> {
        let token = self.next_token();
        match token.kind {
            TokenKind::Str(value) => Ok(Operand::from(value)),
            TokenKind::Int(value) => Ok(Operand::from(value)),
            TokenKind::Float(value) => Ok(Operand::from(value)),
            TokenKind::LBracket => self.parse_list(token.pos),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Operand::from(true)),
                "false" => Ok(Operand::from(false)),
                "null" => Ok(Operand::Literal(Value::Null)),
                _ if self.peek_kind() == &TokenKind::LParen => self.parse_call(&name, token.pos),
                _ => self
                    .schema
                    .lookup(&name)
                    .map(Operand::Variable)
                    .ok_or_else(|| parse_error(format!("Unknown field '{name}'"), token.pos)),
            },
            _ => Err(parse_error("Expected operand", token.pos)),
        }
    }

    fn parse_call(&mut self, name: &str, pos: usize) -> Result<Operand, ExpressionError> {
        let op = FormulaOp::from_name(name)
            .ok_or_else(|| parse_error(format!("Unknown function '{name}'"), pos))?;
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if self.peek_kind() != &TokenKind::RParen {
            loop {
                args.push(self.parse_operand()?);
                if self.peek_kind() == &TokenKind::Comma {
                    self.next_token();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let formula = Formula::new(op, args)?;
        formula.validate()?;
        Ok(Operand::from(formula))
    }

    fn parse_list(&mut self, pos: usize) -> Result<Operand, ExpressionError> {
        let mut items = Vec::new();
        if self.peek_kind() != &TokenKind::RBracket {
            loop {
                match self.next_token().kind {
                    TokenKind::Str(item) => items.push(item),
                    _ => return Err(parse_error("List items must be strings", pos)),
                }
                if self.peek_kind() == &TokenKind::Comma {
                    self.next_token();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Operand::Literal(Value::List(items)))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ExpressionError> {
        let token = self.next_token();
        if std::mem::discriminant(&token.kind) == std::mem::discriminant(&kind) {
            Ok(())
        } else {
            Err(parse_error(
                format!("Expected {}", token_name(&kind)),
                token.pos,
            ))
        }
    }

    fn next_token(&mut self) -> Token {
        let last = self.tokens.len().saturating_sub(1);
        let token = self.tokens[self.index.min(last)].clone();
        self.index = (self.index + 1).min(last);
        token
    }

    fn peek_kind(&self) -> &TokenKind {
        self.peek_kind_at(0)
    }

    fn peek_kind_at(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.index + offset).min(last)].kind
    }

    fn peek_contains_at(&self, offset: usize) -> bool {
        matches!(self.peek_kind_at(offset), TokenKind::Ident(word) if word == "contains")
    }

    fn peek_pos(&self) -> usize {
        self.tokens.get(self.index).map(|t| t.pos).unwrap_or(0)
    }
}

/// Read a string literal as a timestamp when the other side is a time.
fn coerce_time(operand: Operand, other: &Operand, pos: usize) -> Result<Operand, ExpressionError> {
    match (&operand, other.static_type()) {
        (Operand::Literal(Value::Str(text)), ValueType::Time) => DateTime::parse_from_rfc3339(text)
            .map(|at| Operand::Literal(Value::Time(at.with_timezone(&Utc))))
            .map_err(|err| parse_error(format!("Invalid timestamp '{text}': {err}"), pos)),
        _ => Ok(operand),
    }
}

fn token_name(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::Ident(_) => "identifier",
        TokenKind::Str(_) => "string",
        TokenKind::Int(_) | TokenKind::Float(_) => "number",
        TokenKind::Compare(_) => "comparison operator",
        TokenKind::LParen => "'('",
        TokenKind::RParen => "')'",
        TokenKind::LBracket => "'['",
        TokenKind::RBracket => "']'",
        TokenKind::Comma => "','",
        TokenKind::Pipe => "'|'",
        TokenKind::Amp => "'&'",
        TokenKind::Bang => "'!'",
        TokenKind::Eof => "end of input",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Bindings, Variable};
    use chrono::TimeZone;

    struct Fields;

    impl Schema for Fields {
        fn variables(&self) -> Vec<Variable> {
            vec![
                Variable::field("title", ValueType::Str),
                Variable::field("percent", ValueType::Int),
                Variable::field("tags", ValueType::List),
                Variable::field("due", ValueType::Time),
                Variable::field("active", ValueType::Bool),
            ]
        }

        fn lookup(&self, name: &str) -> Option<Variable> {
            self.variables().into_iter().find(|v| v.name() == name)
        }
    }

    fn bindings() -> Bindings {
        let mut bindings = Bindings::new();
        bindings.insert("title".into(), Value::from("Ship Release"));
        bindings.insert("percent".into(), Value::Int(60));
        bindings.insert(
            "tags".into(),
            Value::List(vec!["work".to_string(), "q3".to_string()]),
        );
        bindings.insert(
            "due".into(),
            Value::Time(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
        );
        bindings.insert("active".into(), Value::Bool(true));
        bindings
    }

    fn eval(input: &str) -> bool {
        parse_condition(input, &Fields)
            .unwrap()
            .evaluate(&bindings())
            .unwrap()
    }

    #[test]
    fn parses_comparisons() {
        assert!(eval("percent >= 50"));
        assert!(!eval("percent < 50"));
        assert!(eval("title == \"Ship Release\""));
        assert!(eval("tags contains \"work\""));
        assert!(eval("active == true"));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert!(eval("percent < 10 & active == false | percent == 60"));
        assert!(!eval("percent < 10 & (active == false | percent == 60)"));
    }

    #[test]
    fn bang_negates() {
        assert!(eval("!(tags contains \"home\")"));
        assert!(!eval("!(percent == 60)"));
        assert!(eval("!false"));
    }

    #[test]
    fn formulas_in_operands() {
        assert!(eval("lower(title) contains \"release\""));
        assert!(eval("add(percent, 40) == 100"));
        assert!(eval("len(tags) == 2"));
    }

    #[test]
    fn time_literals_are_coerced() {
        assert!(eval("due < \"2024-06-02T00:00:00Z\""));
        assert!(eval("\"2024-05-01T00:00:00Z\" < due"));
        let err = parse_condition("due < \"tomorrow\"", &Fields).unwrap_err();
        assert!(matches!(err, ExpressionError::Parse { .. }));
    }

    #[test]
    fn unknown_field_reports_position() {
        let err = parse_condition("percent > 1 & colour == \"red\"", &Fields).unwrap_err();
        assert_eq!(
            err,
            ExpressionError::Parse {
                message: "Unknown field 'colour'".to_string(),
                position: 14,
            }
        );
    }

    #[test]
    fn rejects_bad_formula_arguments() {
        assert!(matches!(
            parse_condition("add(title, 1) == 2", &Fields),
            Err(ExpressionError::TypeMismatch { .. })
        ));
        assert!(matches!(
            parse_condition("concat(title) == \"x\"", &Fields),
            Err(ExpressionError::Arity { .. })
        ));
    }

    #[test]
    fn trailing_input_is_an_error() {
        assert!(parse_condition("percent > 1 )", &Fields).is_err());
        assert!(parse_condition("percent >", &Fields).is_err());
        assert!(parse_condition("\"open", &Fields).is_err());
    }

    #[test]
    fn display_round_trips() {
        for input in [
            "percent >= 50",
            "(percent == 1 | title != \"x\")",
            "((percent < 3 & active == true) | tags contains \"home\")",
            "!(tags contains \"home\")",
            "!(percent < 3)",
            "!(percent == 1 | percent == 2)",
            "len(tags) > 1",
            "tags == [\"a\", \"b\"]",
        ] {
            let parsed = parse_condition(input, &Fields).unwrap();
            assert_eq!(parsed.to_string(), input);
            assert_eq!(parse_condition(&parsed.to_string(), &Fields).unwrap(), parsed);
        }
    }
}
