//! Named, typed slots resolved at evaluation time.

use std::borrow::Cow;
use std::fmt;

use super::formula::Operand;
use super::value::{Bindings, Value, ValueType};
use super::ExpressionError;

/// A variable such as `percent` or `update_time`.
///
/// A variable never carries a value itself; conditions that mention it look
/// the value up by name in the bindings they are evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    name: Cow<'static, str>,
    ty: ValueType,
}

impl Variable {
    /// Variable over a static field name, usable in `const` schemas.
    pub const fn field(name: &'static str, ty: ValueType) -> Self {
        Self {
            name: Cow::Borrowed(name),
            ty,
        }
    }

    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    /// Look up this variable's value; absence is always an error.
    pub fn resolve<'a>(&self, bindings: &'a Bindings) -> Result<&'a Value, ExpressionError> {
        bindings
            .get(self.name())
            .ok_or_else(|| ExpressionError::UnboundVariable(self.name().to_string()))
    }

    /// Assign a value, variable or formula to this variable.
    ///
    /// The assigned operand's declared type must fit the variable's type.
    pub fn bind(&self, value: impl Into<Operand>) -> Result<Binding, ExpressionError> {
        let value = value.into();
        let actual = value.static_type();
        if !self.ty.accepts(actual) {
            return Err(ExpressionError::BindType {
                name: self.name().to_string(),
                expected: self.ty,
                actual,
            });
        }
        Ok(Binding {
            variable: self.clone(),
            value,
        })
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A type-checked assignment `variable = operand`.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    variable: Variable,
    value: Operand,
}

impl Binding {
    pub fn variable(&self) -> &Variable {
        &self.variable
    }

    pub fn value(&self) -> &Operand {
        &self.value
    }

    /// Compute the assigned value against `bindings`.
    pub fn evaluate(&self, bindings: &Bindings) -> Result<Value, ExpressionError> {
        self.value.resolve(bindings)
    }

    /// Evaluate and store the result under the variable's name.
    pub fn apply(&self, bindings: &mut Bindings) -> Result<(), ExpressionError> {
        let value = self.evaluate(bindings)?;
        bindings.insert(self.variable.name().to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Formula;

    #[test]
    fn resolve_reports_unbound_name() {
        let a = Variable::new("a", ValueType::Int);
        let err = a.resolve(&Bindings::new()).unwrap_err();
        assert!(matches!(err, ExpressionError::UnboundVariable(name) if name == "a"));
    }

    #[test]
    fn bind_rejects_mismatched_literal() {
        let a = Variable::new("a", ValueType::Int);
        assert!(a.bind(1).is_ok());
        assert!(matches!(
            a.bind("one"),
            Err(ExpressionError::BindType { .. })
        ));
    }

    #[test]
    fn bind_checks_formula_return_type() {
        let title = Variable::new("title", ValueType::Str);
        let percent = Variable::new("percent", ValueType::Int);

        let concat = Formula::concat(&title, "!");
        assert!(title.bind(concat.clone()).is_ok());
        assert!(matches!(
            percent.bind(concat),
            Err(ExpressionError::BindType { expected: ValueType::Int, actual: ValueType::Str, .. })
        ));

        assert!(percent.bind(Formula::add(&percent, 10)).is_ok());
    }

    #[test]
    fn apply_writes_computed_value() {
        let percent = Variable::new("percent", ValueType::Int);
        let binding = percent.bind(Formula::add(&percent, 10)).unwrap();

        let mut bindings = Bindings::new();
        bindings.insert("percent".to_string(), Value::Int(40));
        binding.apply(&mut bindings).unwrap();
        assert_eq!(bindings["percent"], Value::Int(50));
    }
}
