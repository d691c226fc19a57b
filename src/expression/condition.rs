//! Comparison conditions and boolean combinators.
//!
//! Trees are plain data. They are built with [`Compare`] methods and the
//! [`and`]/[`or`] constructors, and re-evaluated against different bindings.

use std::fmt;

use super::formula::{Formula, Operand};
use super::value::{Bindings, Value};
use super::variable::Variable;
use super::ExpressionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Contains => "contains",
        }
    }

    /// The operator whose result is always the opposite, when one exists.
    ///
    /// Orderings have none: `x < y` and `x >= y` are both false when either
    /// side is `null`.
    pub fn inverse(self) -> Option<CompareOp> {
        match self {
            CompareOp::Eq => Some(CompareOp::Ne),
            CompareOp::Ne => Some(CompareOp::Eq),
            CompareOp::Lt
            | CompareOp::Le
            | CompareOp::Gt
            | CompareOp::Ge
            | CompareOp::Contains => None,
        }
    }

    /// Apply the operator to two resolved values.
    ///
    /// Ordering against `null` is false rather than an error so optional
    /// fields can be filtered on.
    pub fn apply(self, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
        use std::cmp::Ordering;

        let ordered = |accept: fn(Ordering) -> bool| -> Result<bool, ExpressionError> {
            if left.is_null() || right.is_null() {
                return Ok(false);
            }
            left.compare(right)
                .map(accept)
                .ok_or_else(|| ExpressionError::TypeMismatch {
                    op: self.symbol().to_string(),
                    left: left.value_type(),
                    right: right.value_type(),
                })
        };

        match self {
            CompareOp::Eq => Ok(left.loose_eq(right)),
            CompareOp::Ne => Ok(!left.loose_eq(right)),
            CompareOp::Lt => ordered(|o| o == Ordering::Less),
            CompareOp::Le => ordered(|o| o != Ordering::Greater),
            CompareOp::Gt => ordered(|o| o == Ordering::Greater),
            CompareOp::Ge => ordered(|o| o != Ordering::Less),
            CompareOp::Contains => {
                left.contains(right)
                    .ok_or_else(|| ExpressionError::TypeMismatch {
                        op: self.symbol().to_string(),
                        left: left.value_type(),
                        right: right.value_type(),
                    })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    /// `all`: true when every clause is true.
    And,
    /// `any`: true when at least one clause is true.
    Or,
}

impl LogicalOp {
    pub fn symbol(self) -> &'static str {
        match self {
            LogicalOp::And => "&",
            LogicalOp::Or => "|",
        }
    }

    fn identity(self) -> bool {
        matches!(self, LogicalOp::And)
    }
}

/// A binary comparison such as `percent >= 50`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    op: CompareOp,
    left: Operand,
    right: Operand,
    negated: bool,
}

impl Condition {
    pub fn new(op: CompareOp, left: impl Into<Operand>, right: impl Into<Operand>) -> Self {
        Self {
            op,
            left: left.into(),
            right: right.into(),
            negated: false,
        }
    }

    pub fn op(&self) -> CompareOp {
        self.op
    }

    pub fn left(&self) -> &Operand {
        &self.left
    }

    pub fn right(&self) -> &Operand {
        &self.right
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Resolve both operands, compare, then apply the negation flag.
    pub fn evaluate(&self, bindings: &Bindings) -> Result<bool, ExpressionError> {
        let left = self.left.resolve(bindings)?;
        let right = self.right.resolve(bindings)?;
        let result = self.op.apply(&left, &right)?;
        Ok(result != self.negated)
    }

    /// Logical negation: swaps to the inverse operator where one exists,
    /// otherwise flips the negation flag.
    pub fn negate(&self) -> Condition {
        let mut negated = self.clone();
        match self.op.inverse() {
            Some(inverse) => negated.op = inverse,
            None => negated.negated = !self.negated,
        }
        negated
    }

    pub fn and(self, other: impl Into<Clause>) -> ConditionList {
        ConditionList::new(LogicalOp::And, vec![self.into(), other.into()])
    }

    pub fn or(self, other: impl Into<Clause>) -> ConditionList {
        ConditionList::new(LogicalOp::Or, vec![self.into(), other.into()])
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "!({} {} {})", self.left, self.op.symbol(), self.right)
        } else {
            write!(f, "{} {} {}", self.left, self.op.symbol(), self.right)
        }
    }
}

/// Clauses joined by a single logical operator, with a lazy negation flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionList {
    op: LogicalOp,
    clauses: Vec<Clause>,
    negated: bool,
}

impl ConditionList {
    pub fn new(op: LogicalOp, clauses: Vec<Clause>) -> Self {
        Self {
            op,
            clauses,
            negated: false,
        }
    }

    pub fn op(&self) -> LogicalOp {
        self.op
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Evaluate clauses in order, stopping at the first decisive one.
    pub fn evaluate(&self, bindings: &Bindings) -> Result<bool, ExpressionError> {
        let decisive = !self.op.identity();
        let mut result = self.op.identity();
        for clause in &self.clauses {
            if clause.evaluate(bindings)? == decisive {
                result = decisive;
                break;
            }
        }
        Ok(result != self.negated)
    }

    /// Negation flips the flag; children are left untouched.
    pub fn negate(&self) -> ConditionList {
        let mut negated = self.clone();
        negated.negated = !self.negated;
        negated
    }

    pub fn and(self, other: impl Into<Clause>) -> ConditionList {
        ConditionList::new(LogicalOp::And, vec![self.into(), other.into()])
    }

    pub fn or(self, other: impl Into<Clause>) -> ConditionList {
        ConditionList::new(LogicalOp::Or, vec![self.into(), other.into()])
    }
}

impl fmt::Display for ConditionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        f.write_str("(")?;
        for (idx, clause) in self.clauses.iter().enumerate() {
            if idx > 0 {
                write!(f, " {} ", self.op.symbol())?;
            }
            write!(f, "{clause}")?;
        }
        f.write_str(")")
    }
}

/// Any node of a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Const(bool),
    Condition(Condition),
    List(ConditionList),
}

impl Clause {
    pub fn evaluate(&self, bindings: &Bindings) -> Result<bool, ExpressionError> {
        match self {
            Clause::Const(value) => Ok(*value),
            Clause::Condition(condition) => condition.evaluate(bindings),
            Clause::List(list) => list.evaluate(bindings),
        }
    }

    pub fn negate(&self) -> Clause {
        match self {
            Clause::Const(value) => Clause::Const(!value),
            Clause::Condition(condition) => Clause::Condition(condition.negate()),
            Clause::List(list) => Clause::List(list.negate()),
        }
    }

    pub fn and(self, other: impl Into<Clause>) -> Clause {
        Clause::List(ConditionList::new(LogicalOp::And, vec![self, other.into()]))
    }

    pub fn or(self, other: impl Into<Clause>) -> Clause {
        Clause::List(ConditionList::new(LogicalOp::Or, vec![self, other.into()]))
    }

    /// Every variable mentioned anywhere in the tree.
    pub fn variables(&self) -> Vec<&Variable> {
        fn walk_operand<'a>(operand: &'a Operand, out: &mut Vec<&'a Variable>) {
            match operand {
                Operand::Literal(_) => {}
                Operand::Variable(variable) => out.push(variable),
                Operand::Formula(formula) => {
                    for arg in formula.args() {
                        walk_operand(arg, out);
                    }
                }
            }
        }

        fn walk<'a>(clause: &'a Clause, out: &mut Vec<&'a Variable>) {
            match clause {
                Clause::Const(_) => {}
                Clause::Condition(condition) => {
                    walk_operand(condition.left(), out);
                    walk_operand(condition.right(), out);
                }
                Clause::List(list) => {
                    for child in list.clauses() {
                        walk(child, out);
                    }
                }
            }
        }

        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Const(value) => write!(f, "{value}"),
            Clause::Condition(condition) => write!(f, "{condition}"),
            Clause::List(list) => write!(f, "{list}"),
        }
    }
}

impl From<bool> for Clause {
    fn from(value: bool) -> Self {
        Clause::Const(value)
    }
}

impl From<Condition> for Clause {
    fn from(value: Condition) -> Self {
        Clause::Condition(value)
    }
}

impl From<ConditionList> for Clause {
    fn from(value: ConditionList) -> Self {
        Clause::List(value)
    }
}

fn combine<I, C>(op: LogicalOp, clauses: I) -> ConditionList
where
    I: IntoIterator<Item = C>,
    C: Into<Clause>,
{
    let mut clauses: Vec<Clause> = clauses.into_iter().map(Into::into).collect();
    if clauses.len() == 1 {
        clauses.insert(0, Clause::Const(op.identity()));
    }
    ConditionList::new(op, clauses)
}

/// All of `clauses` must hold.
///
/// A single clause is seeded with `true` so the result is still a list.
pub fn and<I, C>(clauses: I) -> ConditionList
where
    I: IntoIterator<Item = C>,
    C: Into<Clause>,
{
    combine(LogicalOp::And, clauses)
}

/// At least one of `clauses` must hold.
///
/// A single clause is seeded with `false` so the result is still a list.
pub fn or<I, C>(clauses: I) -> ConditionList
where
    I: IntoIterator<Item = C>,
    C: Into<Clause>,
{
    combine(LogicalOp::Or, clauses)
}

/// Negate any clause.
pub fn not(clause: impl Into<Clause>) -> Clause {
    clause.into().negate()
}

/// Builders that turn an operand into a [`Condition`].
///
/// Implemented for variables, formulas, literal values and operands, so the
/// variable may appear on either side: `title.equals("x")` or
/// `Value::from("x").equals(&title)`.
pub trait Compare: Into<Operand> + Sized {
    fn equals(self, rhs: impl Into<Operand>) -> Condition {
        Condition::new(CompareOp::Eq, self, rhs)
    }

    fn not_equals(self, rhs: impl Into<Operand>) -> Condition {
        Condition::new(CompareOp::Ne, self, rhs)
    }

    fn less_than(self, rhs: impl Into<Operand>) -> Condition {
        Condition::new(CompareOp::Lt, self, rhs)
    }

    fn at_most(self, rhs: impl Into<Operand>) -> Condition {
        Condition::new(CompareOp::Le, self, rhs)
    }

    fn greater_than(self, rhs: impl Into<Operand>) -> Condition {
        Condition::new(CompareOp::Gt, self, rhs)
    }

    fn at_least(self, rhs: impl Into<Operand>) -> Condition {
        Condition::new(CompareOp::Ge, self, rhs)
    }
}

impl Compare for Variable {}
impl Compare for &Variable {}
impl Compare for Formula {}
impl Compare for Value {}
impl Compare for Operand {}

/// `left contains right`: substring or list membership.
pub fn contains(left: impl Into<Operand>, right: impl Into<Operand>) -> Condition {
    Condition::new(CompareOp::Contains, left, right)
}
