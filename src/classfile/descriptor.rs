//! Field and method descriptors.
//!
//! The evaluator needs descriptors for three things: how many stack slots an invocation or
//! field access pops and pushes, which abstract value kind a result has, and how parameters
//! map onto local variable slots at method entry. The single-implementation pass additionally
//! rewrites class names embedded in descriptors.

use std::fmt;

use crate::{Error, Result};

/// The type of a field, parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `D`
    Double,
    /// `F`
    Float,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `S`
    Short,
    /// `Z`
    Boolean,
    /// `L<internal name>;`
    Object(String),
    /// `[<component>`
    Array(Box<FieldType>),
}

/// The computational type a value of some [`FieldType`] has on the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputationalType {
    /// `int`, and everything narrower
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
    /// Any reference
    Reference,
}

impl ComputationalType {
    /// Number of stack or variable slots a value of this type occupies.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            ComputationalType::Long | ComputationalType::Double => 2,
            _ => 1,
        }
    }
}

impl FieldType {
    /// Parses a complete field descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] if `descriptor` is not exactly one field type.
    pub fn parse(descriptor: &str) -> Result<FieldType> {
        let (ty, rest) = Self::parse_prefix(descriptor)
            .ok_or_else(|| Error::InvalidDescriptor(descriptor.to_string()))?;
        if rest.is_empty() {
            Ok(ty)
        } else {
            Err(Error::InvalidDescriptor(descriptor.to_string()))
        }
    }

    fn parse_prefix(input: &str) -> Option<(FieldType, &str)> {
        let mut chars = input.chars();
        let ty = match chars.next()? {
            'B' => FieldType::Byte,
            'C' => FieldType::Char,
            'D' => FieldType::Double,
            'F' => FieldType::Float,
            'I' => FieldType::Int,
            'J' => FieldType::Long,
            'S' => FieldType::Short,
            'Z' => FieldType::Boolean,
            'L' => {
                let end = input.find(';')?;
                if end < 2 {
                    return None;
                }
                return Some((FieldType::Object(input[1..end].to_string()), &input[end + 1..]));
            }
            '[' => {
                let (component, rest) = Self::parse_prefix(&input[1..])?;
                return Some((FieldType::Array(Box::new(component)), rest));
            }
            _ => return None,
        };
        Some((ty, chars.as_str()))
    }

    /// The computational type of values of this type.
    #[must_use]
    pub fn computational_type(&self) -> ComputationalType {
        match self {
            FieldType::Long => ComputationalType::Long,
            FieldType::Float => ComputationalType::Float,
            FieldType::Double => ComputationalType::Double,
            FieldType::Object(_) | FieldType::Array(_) => ComputationalType::Reference,
            _ => ComputationalType::Int,
        }
    }

    /// Number of slots a value of this type occupies.
    #[must_use]
    pub fn size(&self) -> usize {
        self.computational_type().size()
    }

    /// Returns a copy with every occurrence of class `from` replaced by `to`.
    #[must_use]
    pub fn retarget(&self, from: &str, to: &str) -> FieldType {
        match self {
            FieldType::Object(name) if name == from => FieldType::Object(to.to_string()),
            FieldType::Array(component) => FieldType::Array(Box::new(component.retarget(from, to))),
            other => other.clone(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => f.write_str("B"),
            FieldType::Char => f.write_str("C"),
            FieldType::Double => f.write_str("D"),
            FieldType::Float => f.write_str("F"),
            FieldType::Int => f.write_str("I"),
            FieldType::Long => f.write_str("J"),
            FieldType::Short => f.write_str("S"),
            FieldType::Boolean => f.write_str("Z"),
            FieldType::Object(name) => write!(f, "L{name};"),
            FieldType::Array(component) => write!(f, "[{component}"),
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order
    pub parameters: Vec<FieldType>,
    /// Return type, `None` for `void`
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    /// Parses a method descriptor such as `(IJLjava/lang/String;)V`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] if the descriptor is malformed.
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor> {
        let invalid = || Error::InvalidDescriptor(descriptor.to_string());
        let mut rest = descriptor.strip_prefix('(').ok_or_else(invalid)?;
        let mut parameters = Vec::new();
        while !rest.starts_with(')') {
            let (ty, tail) = FieldType::parse_prefix(rest).ok_or_else(invalid)?;
            parameters.push(ty);
            rest = tail;
        }
        let rest = &rest[1..];
        let return_type = if rest == "V" {
            None
        } else {
            Some(FieldType::parse(rest).map_err(|_| invalid())?)
        };
        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }

    /// Total number of slots the parameters occupy, excluding any receiver.
    #[must_use]
    pub fn parameter_slots(&self) -> usize {
        self.parameters.iter().map(FieldType::size).sum()
    }

    /// Number of slots the return value occupies (0 for `void`).
    #[must_use]
    pub fn return_slots(&self) -> usize {
        self.return_type.as_ref().map_or(0, FieldType::size)
    }

    /// Returns a copy with every occurrence of class `from` replaced by `to`.
    #[must_use]
    pub fn retarget(&self, from: &str, to: &str) -> MethodDescriptor {
        MethodDescriptor {
            parameters: self
                .parameters
                .iter()
                .map(|p| p.retarget(from, to))
                .collect(),
            return_type: self.return_type.as_ref().map(|r| r.retarget(from, to)),
        }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for parameter in &self.parameters {
            write!(f, "{parameter}")?;
        }
        f.write_str(")")?;
        match &self.return_type {
            Some(ty) => write!(f, "{ty}"),
            None => f.write_str("V"),
        }
    }
}

/// Rewrites any field or method descriptor, replacing class `from` with `to`.
///
/// Returns `None` if the descriptor does not mention `from` (or cannot be parsed).
#[must_use]
pub fn retarget_descriptor(descriptor: &str, from: &str, to: &str) -> Option<String> {
    if !descriptor.contains(&format!("L{from};")) {
        return None;
    }
    if descriptor.starts_with('(') {
        MethodDescriptor::parse(descriptor)
            .ok()
            .map(|d| d.retarget(from, to).to_string())
    } else {
        FieldType::parse(descriptor)
            .ok()
            .map(|t| t.retarget(from, to).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_descriptor_slots() {
        let descriptor = MethodDescriptor::parse("(IJ[Ljava/lang/String;D)J").unwrap();
        assert_eq!(descriptor.parameters.len(), 4);
        assert_eq!(descriptor.parameter_slots(), 6);
        assert_eq!(descriptor.return_slots(), 2);
        assert_eq!(descriptor.to_string(), "(IJ[Ljava/lang/String;D)J");
    }

    #[test]
    fn test_invalid_descriptors() {
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(FieldType::parse("L;").is_err());
        assert!(FieldType::parse("II").is_err());
        assert!(FieldType::parse("Q").is_err());
    }

    #[test]
    fn test_retarget_descriptor() {
        assert_eq!(
            retarget_descriptor("(La/I;[La/I;)La/I;", "a/I", "a/Impl").as_deref(),
            Some("(La/Impl;[La/Impl;)La/Impl;")
        );
        assert_eq!(retarget_descriptor("(La/IX;)V", "a/I", "a/Impl"), None);
    }
}
