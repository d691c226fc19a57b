//! Record schemas: one [`Variable`] per record field.
//!
//! A record type and its schema are declared together with
//! [`record_schema!`](crate::record_schema). The record stays a plain struct;
//! the schema is reachable as `Record::FIELDS` for building queries, e.g.
//! `Task::FIELDS.percent.clone().at_least(50)`.

use super::value::Bindings;
use super::variable::Variable;

/// A record that can supply the bindings its schema's variables refer to.
pub trait Bindable {
    /// Insert this record's field values into `bindings`.
    fn bind_fields(&self, bindings: &mut Bindings);

    fn bindings(&self) -> Bindings {
        let mut bindings = Bindings::new();
        self.bind_fields(&mut bindings);
        bindings
    }
}

/// Name resolution for the textual condition syntax.
pub trait Schema {
    /// Every declared variable, parents first.
    fn variables(&self) -> Vec<Variable>;

    fn lookup(&self, name: &str) -> Option<Variable>;
}

/// Declare the schema companion of a record struct.
///
/// ```ignore
/// record_schema! {
///     pub struct NoteFields for Note extends task: TaskFields {
///         version: Str,
///         note_time: Time,
///     }
/// }
/// ```
///
/// Generates the schema struct (one public `Variable` per field), a `Schema`
/// impl, `Record::FIELDS`, and `Record::bind_declared`, which binds every
/// declared field (and the parent record's fields through its `Bindable`
/// impl). `dynamic "prefix"` makes `prefix.<key>` resolve to an untyped
/// variable for open-ended maps.
#[macro_export]
macro_rules! record_schema {
    (
        $(#[$meta:meta])*
        $vis:vis struct $schema:ident for $record:ident
        $(extends $parent_field:ident : $parent_schema:ident)?
        $(dynamic $prefix:literal)?
        {
            $($field:ident : $kind:ident),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $schema {
            $(pub $parent_field: $parent_schema,)?
            $(pub $field: $crate::expression::Variable,)*
        }

        impl $schema {
            pub const fn new() -> Self {
                Self {
                    $($parent_field: $parent_schema::new(),)?
                    $($field: $crate::expression::Variable::field(
                        stringify!($field),
                        $crate::expression::ValueType::$kind,
                    ),)*
                }
            }
        }

        impl ::std::default::Default for $schema {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $crate::expression::Schema for $schema {
            fn variables(&self) -> Vec<$crate::expression::Variable> {
                #[allow(unused_mut)]
                let mut out = Vec::new();
                $(out.extend($crate::expression::Schema::variables(&self.$parent_field));)?
                $(out.push(self.$field.clone());)*
                out
            }

            fn lookup(&self, name: &str) -> Option<$crate::expression::Variable> {
                $(
                    if name == stringify!($field) {
                        return Some(self.$field.clone());
                    }
                )*
                $(
                    if let Some(variable) = $crate::expression::Schema::lookup(&self.$parent_field, name) {
                        return Some(variable);
                    }
                )?
                $(
                    if let Some(key) = name.strip_prefix(concat!($prefix, ".")) {
                        if !key.is_empty() {
                            return Some($crate::expression::Variable::new(
                                name,
                                $crate::expression::ValueType::Any,
                            ));
                        }
                    }
                )?
                None
            }
        }

        impl $record {
            pub const FIELDS: $schema = $schema::new();

            /// Bind every field declared in the schema.
            pub fn bind_declared(&self, bindings: &mut $crate::expression::Bindings) {
                $($crate::expression::Bindable::bind_fields(&self.$parent_field, bindings);)?
                $(
                    bindings.insert(
                        stringify!($field).to_string(),
                        $crate::expression::Value::from(self.$field.clone()),
                    );
                )*
            }
        }
    };
}
