//! Interprocedural hooks of the partial evaluator.
//!
//! The evaluator asks an [`InvocationUnit`] for the values of parameters at method entry, of
//! fields read by `getfield`/`getstatic`, and of values returned by invocations. Answering
//! `None` lets the evaluator fall back to a fresh symbolic value.
//!
//! - [`BasicInvocationUnit`] never knows anything
//! - [`SeededInvocationUnit`] answers from tables filled by the caller, for example with the
//!   `static final` constants of a [`ClassPool`]

use rustc_hash::FxHashMap;

use crate::{
    classfile::{ClassPool, Constant, FieldAccessFlags, MemberRef, ProgramMethod},
    evaluation::Value,
};

/// Supplies parameter, field and return values to the evaluator.
pub trait InvocationUnit: Send + Sync {
    /// The value of parameter slot `slot` when `method` of `class` is entered.
    fn parameter_value(&self, class: &str, method: &ProgramMethod, slot: u16) -> Option<Value>;

    /// The value read from `field`.
    fn field_value(&self, field: &MemberRef) -> Option<Value>;

    /// The value returned by an invocation of `method`.
    fn return_value(&self, method: &MemberRef) -> Option<Value>;
}

/// An invocation unit without any knowledge.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicInvocationUnit;

impl InvocationUnit for BasicInvocationUnit {
    fn parameter_value(&self, _class: &str, _method: &ProgramMethod, _slot: u16) -> Option<Value> {
        None
    }

    fn field_value(&self, _field: &MemberRef) -> Option<Value> {
        None
    }

    fn return_value(&self, _method: &MemberRef) -> Option<Value> {
        None
    }
}

type MemberKey = (String, String, String);

fn key(class: &str, name: &str, descriptor: &str) -> MemberKey {
    (class.to_string(), name.to_string(), descriptor.to_string())
}

/// An invocation unit answering from explicit tables.
///
/// Member references are matched exactly by the class named in the reference, so a value
/// registered for `a/Base.f` is not found through a reference to `a/Sub.f`.
#[derive(Debug, Default, Clone)]
pub struct SeededInvocationUnit {
    parameters: FxHashMap<(MemberKey, u16), Value>,
    fields: FxHashMap<MemberKey, Value>,
    returns: FxHashMap<MemberKey, Value>,
}

impl SeededInvocationUnit {
    /// Creates an empty unit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the `static final` fields with a `ConstantValue` of numeric type.
    #[must_use]
    pub fn from_class_pool(pool: &ClassPool) -> Self {
        let mut unit = Self::new();
        for class in pool.iter() {
            for field in &class.fields {
                if !field
                    .access
                    .contains(FieldAccessFlags::STATIC | FieldAccessFlags::FINAL)
                {
                    continue;
                }
                let Some(index) = field.constant_value else {
                    continue;
                };
                let value = match (class.constant_pool.get(index), field.descriptor.as_str()) {
                    (Ok(Constant::Integer(v)), "I" | "S" | "C" | "B" | "Z") => Value::int(*v),
                    (Ok(Constant::Long(v)), "J") => Value::long(*v),
                    (Ok(Constant::Float(v)), "F") => Value::float(*v),
                    (Ok(Constant::Double(v)), "D") => Value::double(*v),
                    _ => continue,
                };
                unit.fields
                    .insert(key(&class.name, &field.name, &field.descriptor), value);
            }
        }
        unit
    }

    /// Registers the value of parameter slot `slot` of a method.
    pub fn set_parameter(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        slot: u16,
        value: Value,
    ) -> &mut Self {
        self.parameters
            .insert((key(class, name, descriptor), slot), value);
        self
    }

    /// Registers the value of a field.
    pub fn set_field(&mut self, class: &str, name: &str, descriptor: &str, value: Value) -> &mut Self {
        self.fields.insert(key(class, name, descriptor), value);
        self
    }

    /// Registers the value returned by a method.
    pub fn set_return(&mut self, class: &str, name: &str, descriptor: &str, value: Value) -> &mut Self {
        self.returns.insert(key(class, name, descriptor), value);
        self
    }

    /// Number of registered field values.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

impl InvocationUnit for SeededInvocationUnit {
    fn parameter_value(&self, class: &str, method: &ProgramMethod, slot: u16) -> Option<Value> {
        self.parameters
            .get(&(key(class, &method.name, &method.descriptor), slot))
            .cloned()
    }

    fn field_value(&self, field: &MemberRef) -> Option<Value> {
        self.fields
            .get(&key(&field.class, &field.name, &field.descriptor))
            .cloned()
    }

    fn return_value(&self, method: &MemberRef) -> Option<Value> {
        self.returns
            .get(&key(&method.class, &method.name, &method.descriptor))
            .cloned()
    }
}
