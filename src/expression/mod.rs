//! Typed filter expressions.
//!
//! Conditions are built from [`Variable`]s that are only looked up by name
//! when evaluated, so one tree can be evaluated against many records:
//!
//! ```
//! use tasknote::expression::{and, Compare, Bindings, Value, Variable, ValueType};
//!
//! let percent = Variable::new("percent", ValueType::Int);
//! let filter = and([percent.clone().at_least(50), percent.less_than(100)]);
//!
//! let mut bindings = Bindings::new();
//! bindings.insert("percent".into(), Value::Int(60));
//! assert!(filter.evaluate(&bindings).unwrap());
//! ```

mod condition;
mod formula;
mod parse;
mod schema;
mod value;
mod variable;

use thiserror::Error;

pub use condition::{
    and, contains, not, or, Clause, Compare, CompareOp, Condition, ConditionList, LogicalOp,
};
pub use formula::{Formula, FormulaOp, Operand};
pub use parse::parse_condition;
pub use schema::{Bindable, Schema};
pub use value::{Bindings, Value, ValueType};
pub use variable::{Binding, Variable};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),

    #[error("Cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: ValueType,
        right: ValueType,
    },

    #[error("Cannot bind {actual} to '{name}' of type {expected}")]
    BindType {
        name: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("'{op}' takes {expected} argument(s), got {actual}")]
    Arity {
        op: String,
        expected: usize,
        actual: usize,
    },

    #[error("Division by zero in '{0}'")]
    DivisionByZero(String),

    #[error("Integer overflow in '{0}'")]
    Overflow(String),

    #[error("{message} at {position}")]
    Parse { message: String, position: usize },
}
