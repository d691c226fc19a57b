//! Operands and formulas: arithmetic and string operations over operands.

use std::fmt;

use super::value::{Bindings, Value, ValueType};
use super::variable::Variable;
use super::ExpressionError;

/// One side of a comparison or one argument of a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Variable(Variable),
    Formula(Box<Formula>),
}

impl Operand {
    /// Resolve to a concrete value against `bindings`.
    pub fn resolve(&self, bindings: &Bindings) -> Result<Value, ExpressionError> {
        match self {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Variable(variable) => variable.resolve(bindings).cloned(),
            Operand::Formula(formula) => formula.evaluate(bindings),
        }
    }

    /// Type known without evaluating anything.
    pub fn static_type(&self) -> ValueType {
        match self {
            Operand::Literal(value) => value.value_type(),
            Operand::Variable(variable) => variable.value_type(),
            Operand::Formula(formula) => formula.return_type(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::Variable(variable) => write!(f, "{variable}"),
            Operand::Formula(formula) => write!(f, "{formula}"),
        }
    }
}

impl From<Variable> for Operand {
    fn from(value: Variable) -> Self {
        Operand::Variable(value)
    }
}

impl From<&Variable> for Operand {
    fn from(value: &Variable) -> Self {
        Operand::Variable(value.clone())
    }
}

impl From<Formula> for Operand {
    fn from(value: Formula) -> Self {
        Operand::Formula(Box::new(value))
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Literal(value)
    }
}

macro_rules! literal_operand {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::Literal(Value::from(value))
                }
            }
        )+
    };
}

literal_operand!(
    bool,
    i32,
    i64,
    u8,
    usize,
    f64,
    &str,
    String,
    &String,
    Vec<String>,
    chrono::DateTime<chrono::Utc>,
);

/// Built-in formula operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormulaOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Replace,
    Lower,
    Upper,
    Len,
}

const NUMBER_PAIR: &[ValueType] = &[ValueType::Number, ValueType::Number];
const STR_PAIR: &[ValueType] = &[ValueType::Str, ValueType::Str];
const STR_TRIPLE: &[ValueType] = &[ValueType::Str, ValueType::Str, ValueType::Str];
const STR_ONE: &[ValueType] = &[ValueType::Str];

impl FormulaOp {
    pub const ALL: [FormulaOp; 10] = [
        FormulaOp::Add,
        FormulaOp::Sub,
        FormulaOp::Mul,
        FormulaOp::Div,
        FormulaOp::Mod,
        FormulaOp::Concat,
        FormulaOp::Replace,
        FormulaOp::Lower,
        FormulaOp::Upper,
        FormulaOp::Len,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FormulaOp::Add => "add",
            FormulaOp::Sub => "sub",
            FormulaOp::Mul => "mul",
            FormulaOp::Div => "div",
            FormulaOp::Mod => "mod",
            FormulaOp::Concat => "concat",
            FormulaOp::Replace => "replace",
            FormulaOp::Lower => "lower",
            FormulaOp::Upper => "upper",
            FormulaOp::Len => "len",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// Declared result type.
    pub fn return_type(self) -> ValueType {
        match self {
            FormulaOp::Add | FormulaOp::Sub | FormulaOp::Mul | FormulaOp::Mod => {
                ValueType::Number
            }
            FormulaOp::Div => ValueType::Float,
            FormulaOp::Concat | FormulaOp::Replace | FormulaOp::Lower | FormulaOp::Upper => {
                ValueType::Str
            }
            FormulaOp::Len => ValueType::Int,
        }
    }

    /// Declared argument types, one per argument.
    pub fn arg_types(self) -> &'static [ValueType] {
        match self {
            FormulaOp::Add | FormulaOp::Sub | FormulaOp::Mul | FormulaOp::Div | FormulaOp::Mod => {
                NUMBER_PAIR
            }
            FormulaOp::Concat => STR_PAIR,
            FormulaOp::Replace => STR_TRIPLE,
            FormulaOp::Lower | FormulaOp::Upper => STR_ONE,
            FormulaOp::Len => &[ValueType::List],
        }
    }
}

/// A typed operation over operands, e.g. `concat(title, "!")`.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    op: FormulaOp,
    args: Vec<Operand>,
}

impl Formula {
    /// Build a formula, checking only the argument count.
    pub fn new(op: FormulaOp, args: Vec<Operand>) -> Result<Self, ExpressionError> {
        let expected = op.arg_types().len();
        if args.len() != expected {
            return Err(ExpressionError::Arity {
                op: op.name().to_string(),
                expected,
                actual: args.len(),
            });
        }
        Ok(Self { op, args })
    }

    fn binary(op: FormulaOp, a: impl Into<Operand>, b: impl Into<Operand>) -> Self {
        Self {
            op,
            args: vec![a.into(), b.into()],
        }
    }

    pub fn add(a: impl Into<Operand>, b: impl Into<Operand>) -> Self {
        Self::binary(FormulaOp::Add, a, b)
    }

    pub fn sub(a: impl Into<Operand>, b: impl Into<Operand>) -> Self {
        Self::binary(FormulaOp::Sub, a, b)
    }

    pub fn mul(a: impl Into<Operand>, b: impl Into<Operand>) -> Self {
        Self::binary(FormulaOp::Mul, a, b)
    }

    pub fn div(a: impl Into<Operand>, b: impl Into<Operand>) -> Self {
        Self::binary(FormulaOp::Div, a, b)
    }

    pub fn rem(a: impl Into<Operand>, b: impl Into<Operand>) -> Self {
        Self::binary(FormulaOp::Mod, a, b)
    }

    pub fn concat(a: impl Into<Operand>, b: impl Into<Operand>) -> Self {
        Self::binary(FormulaOp::Concat, a, b)
    }

    pub fn replace(
        text: impl Into<Operand>,
        from: impl Into<Operand>,
        to: impl Into<Operand>,
    ) -> Self {
        Self {
            op: FormulaOp::Replace,
            args: vec![text.into(), from.into(), to.into()],
        }
    }

    pub fn lower(text: impl Into<Operand>) -> Self {
        Self {
            op: FormulaOp::Lower,
            args: vec![text.into()],
        }
    }

    pub fn upper(text: impl Into<Operand>) -> Self {
        Self {
            op: FormulaOp::Upper,
            args: vec![text.into()],
        }
    }

    pub fn length(items: impl Into<Operand>) -> Self {
        Self {
            op: FormulaOp::Len,
            args: vec![items.into()],
        }
    }

    pub fn op(&self) -> FormulaOp {
        self.op
    }

    pub fn args(&self) -> &[Operand] {
        &self.args
    }

    pub fn return_type(&self) -> ValueType {
        self.op.return_type()
    }

    /// Check every argument's declared type against the operation's signature.
    ///
    /// Evaluation does not call this; callers that want a static check do.
    pub fn validate(&self) -> Result<(), ExpressionError> {
        let expected = self.op.arg_types();
        if expected.len() != self.args.len() {
            return Err(ExpressionError::Arity {
                op: self.op.name().to_string(),
                expected: expected.len(),
                actual: self.args.len(),
            });
        }
        for (arg, ty) in self.args.iter().zip(expected) {
            if let Operand::Formula(inner) = arg {
                inner.validate()?;
            }
            let actual = arg.static_type();
            let fits = ty.accepts(actual) || (*ty == ValueType::List && actual == ValueType::Str);
            if !fits {
                return Err(ExpressionError::TypeMismatch {
                    op: self.op.name().to_string(),
                    left: *ty,
                    right: actual,
                });
            }
        }
        Ok(())
    }

    pub fn evaluate(&self, bindings: &Bindings) -> Result<Value, ExpressionError> {
        let values = self
            .args
            .iter()
            .map(|arg| arg.resolve(bindings))
            .collect::<Result<Vec<_>, _>>()?;
        self.apply(&values)
    }

    fn mismatch(&self, values: &[Value]) -> ExpressionError {
        ExpressionError::TypeMismatch {
            op: self.op.name().to_string(),
            left: values.first().map(Value::value_type).unwrap_or(ValueType::Null),
            right: values.get(1).map(Value::value_type).unwrap_or(ValueType::Null),
        }
    }

    fn apply(&self, values: &[Value]) -> Result<Value, ExpressionError> {
        let name = self.op.name();
        match (self.op, values) {
            (FormulaOp::Add, [Value::Int(a), Value::Int(b)]) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| ExpressionError::Overflow(name.to_string())),
            (FormulaOp::Sub, [Value::Int(a), Value::Int(b)]) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| ExpressionError::Overflow(name.to_string())),
            (FormulaOp::Mul, [Value::Int(a), Value::Int(b)]) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| ExpressionError::Overflow(name.to_string())),
            (FormulaOp::Mod, [Value::Int(a), Value::Int(b)]) => {
                if *b == 0 {
                    return Err(ExpressionError::DivisionByZero(name.to_string()));
                }
                a.checked_rem_euclid(*b)
                    .map(Value::Int)
                    .ok_or_else(|| ExpressionError::Overflow(name.to_string()))
            }
            (FormulaOp::Add | FormulaOp::Sub | FormulaOp::Mul | FormulaOp::Div | FormulaOp::Mod, [a, b]) => {
                let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                    return Err(self.mismatch(values));
                };
                let result = match self.op {
                    FormulaOp::Add => a + b,
                    FormulaOp::Sub => a - b,
                    FormulaOp::Mul => a * b,
                    _ if b == 0.0 => {
                        return Err(ExpressionError::DivisionByZero(name.to_string()))
                    }
                    FormulaOp::Div => a / b,
                    _ => a.rem_euclid(b),
                };
                Ok(Value::Float(result))
            }
            (FormulaOp::Concat, [Value::Str(a), Value::Str(b)]) => Ok(Value::Str(format!("{a}{b}"))),
            (FormulaOp::Replace, [Value::Str(text), Value::Str(from), Value::Str(to)]) => {
                Ok(Value::Str(text.replace(from.as_str(), to)))
            }
            (FormulaOp::Lower, [Value::Str(text)]) => Ok(Value::Str(text.to_lowercase())),
            (FormulaOp::Upper, [Value::Str(text)]) => Ok(Value::Str(text.to_uppercase())),
            (FormulaOp::Len, [Value::List(items)]) => Ok(Value::from(items.len())),
            (FormulaOp::Len, [Value::Str(text)]) => Ok(Value::from(text.chars().count())),
            _ => Err(self.mismatch(values)),
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.op.name())?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}
