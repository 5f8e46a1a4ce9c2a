//! The constant pool of a class.
//!
//! Entries are addressed by their 1-based index exactly as in the class-file format. `Long`
//! and `Double` entries occupy two indices; the second one is unusable and stored as `None`.
//!
//! The optimizer only ever appends to a pool (new numeric constants for `ldc`, new names and
//! descriptors for retargeted references). [`ConstantPool::truncate`] rolls such additions
//! back when the edits of a method are abandoned.

use std::fmt;

use strum::IntoStaticStr;

use crate::{Error, Result};

/// A single constant pool entry.
#[derive(Debug, Clone, IntoStaticStr)]
pub enum Constant {
    /// Modified UTF-8 string
    Utf8(String),
    /// `int` constant
    Integer(i32),
    /// `float` constant
    Float(f32),
    /// `long` constant, occupies two slots
    Long(i64),
    /// `double` constant, occupies two slots
    Double(f64),
    /// Class or array type reference
    Class {
        /// Index of the internal name
        name_index: u16,
    },
    /// `java.lang.String` literal
    String {
        /// Index of the string contents
        string_index: u16,
    },
    /// Field reference
    Fieldref {
        /// Index of the owning class
        class_index: u16,
        /// Index of the name and descriptor
        name_and_type_index: u16,
    },
    /// Class method reference
    Methodref {
        /// Index of the owning class
        class_index: u16,
        /// Index of the name and descriptor
        name_and_type_index: u16,
    },
    /// Interface method reference
    InterfaceMethodref {
        /// Index of the owning interface
        class_index: u16,
        /// Index of the name and descriptor
        name_and_type_index: u16,
    },
    /// Name and descriptor pair
    NameAndType {
        /// Index of the member name
        name_index: u16,
        /// Index of the descriptor
        descriptor_index: u16,
    },
    /// Method handle
    MethodHandle {
        /// Kind of the handle (1..=9)
        reference_kind: u8,
        /// Index of the referenced member
        reference_index: u16,
    },
    /// Method type
    MethodType {
        /// Index of the method descriptor
        descriptor_index: u16,
    },
    /// Dynamically computed constant
    Dynamic {
        /// Index into the bootstrap method table
        bootstrap_method_attr_index: u16,
        /// Index of the name and field descriptor
        name_and_type_index: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// Index into the bootstrap method table
        bootstrap_method_attr_index: u16,
        /// Index of the name and method descriptor
        name_and_type_index: u16,
    },
    /// Module name
    Module {
        /// Index of the module name
        name_index: u16,
    },
    /// Package name
    Package {
        /// Index of the package name
        name_index: u16,
    },
}

impl Constant {
    /// Returns `true` for `Long` and `Double`, which take two pool slots.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    /// Returns the kind name of this entry, e.g. `"Methodref"`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Bitwise equality, so that `NaN` and signed zero constants are told apart correctly.
    fn same_as(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Utf8(a), Constant::Utf8(b)) => a == b,
            (Constant::Integer(a), Constant::Integer(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Long(a), Constant::Long(b)) => a == b,
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::Class { name_index: a }, Constant::Class { name_index: b })
            | (Constant::String { string_index: a }, Constant::String { string_index: b })
            | (
                Constant::MethodType { descriptor_index: a },
                Constant::MethodType { descriptor_index: b },
            ) => a == b,
            (
                Constant::NameAndType {
                    name_index: a,
                    descriptor_index: c,
                },
                Constant::NameAndType {
                    name_index: b,
                    descriptor_index: d,
                },
            ) => a == b && c == d,
            (
                Constant::Fieldref {
                    class_index: a,
                    name_and_type_index: c,
                },
                Constant::Fieldref {
                    class_index: b,
                    name_and_type_index: d,
                },
            )
            | (
                Constant::Methodref {
                    class_index: a,
                    name_and_type_index: c,
                },
                Constant::Methodref {
                    class_index: b,
                    name_and_type_index: d,
                },
            )
            | (
                Constant::InterfaceMethodref {
                    class_index: a,
                    name_and_type_index: c,
                },
                Constant::InterfaceMethodref {
                    class_index: b,
                    name_and_type_index: d,
                },
            ) => a == b && c == d,
            _ => false,
        }
    }
}

/// The kind of member a reference constant points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// `Fieldref`
    Field,
    /// `Methodref`
    Method,
    /// `InterfaceMethodref`
    InterfaceMethod,
}

/// A resolved symbolic member reference: owner, name and descriptor as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Internal name of the class named by the reference
    pub class: String,
    /// Member name
    pub name: String,
    /// Field or method descriptor
    pub descriptor: String,
    /// Which reference constant this came from
    pub kind: MemberKind,
}

impl MemberRef {
    /// Returns `true` if this is a reference to an instance or class initializer.
    #[must_use]
    pub fn is_initializer(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MemberKind::Field => write!(f, "{}.{}:{}", self.class, self.name, self.descriptor),
            _ => write!(f, "{}.{}{}", self.class, self.name, self.descriptor),
        }
    }
}

/// The constant pool of a class.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    /// Slot 0 and the upper halves of wide entries are `None`
    entries: Vec<Option<Constant>>,
}

impl ConstantPool {
    /// Creates an empty pool (only the reserved slot 0).
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![None],
        }
    }

    /// Returns the `constant_pool_count` of this pool, i.e. one more than the highest index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Removes every entry at or above `len`, undoing appends made after `len()` returned it.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len.max(1));
    }

    /// Iterates over `(index, constant)` for all usable entries.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i as u16, c)))
    }

    /// Returns the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstantPoolIndex`] for index 0, out-of-range indices and the unusable
    /// upper half of a wide entry.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        self.entries
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::ConstantPoolIndex {
                index,
                reason: "no usable entry",
            })
    }

    /// Returns a mutable reference to the entry at `index`.
    ///
    /// # Errors
    ///
    /// See [`ConstantPool::get`].
    pub fn get_mut(&mut self, index: u16) -> Result<&mut Constant> {
        self.entries
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::ConstantPoolIndex {
                index,
                reason: "no usable entry",
            })
    }

    /// Appends an entry and returns its index.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool would exceed 65535 slots.
    pub fn add(&mut self, constant: Constant) -> Result<u16> {
        let slots = if constant.is_wide() { 2 } else { 1 };
        let index = self.entries.len();
        if index + slots > usize::from(u16::MAX) {
            return Err(Error::Error("constant pool overflow".to_string()));
        }
        self.entries.push(Some(constant));
        if slots == 2 {
            self.entries.push(None);
        }
        Ok(index as u16)
    }

    /// Returns the index of an equal entry, appending one if none exists.
    ///
    /// # Errors
    ///
    /// See [`ConstantPool::add`].
    pub fn find_or_add(&mut self, constant: Constant) -> Result<u16> {
        let found = self
            .iter()
            .find(|(_, c)| c.same_as(&constant))
            .map(|(index, _)| index);
        match found {
            Some(index) => Ok(index),
            None => self.add(constant),
        }
    }

    /// Find-or-add for a `Utf8` entry.
    ///
    /// # Errors
    ///
    /// See [`ConstantPool::add`].
    pub fn utf8_index(&mut self, value: &str) -> Result<u16> {
        self.find_or_add(Constant::Utf8(value.to_string()))
    }

    /// Find-or-add for a `Class` entry with the given internal name.
    ///
    /// # Errors
    ///
    /// See [`ConstantPool::add`].
    pub fn class_index(&mut self, name: &str) -> Result<u16> {
        let name_index = self.utf8_index(name)?;
        self.find_or_add(Constant::Class { name_index })
    }

    /// Find-or-add for a `NameAndType` entry.
    ///
    /// # Errors
    ///
    /// See [`ConstantPool::add`].
    pub fn name_and_type_index(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.utf8_index(name)?;
        let descriptor_index = self.utf8_index(descriptor)?;
        self.find_or_add(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    /// Find-or-add for a member reference of the given kind.
    ///
    /// # Errors
    ///
    /// See [`ConstantPool::add`].
    pub fn member_ref_index(&mut self, member: &MemberRef) -> Result<u16> {
        let class_index = self.class_index(&member.class)?;
        let name_and_type_index = self.name_and_type_index(&member.name, &member.descriptor)?;
        self.find_or_add(match member.kind {
            MemberKind::Field => Constant::Fieldref {
                class_index,
                name_and_type_index,
            },
            MemberKind::Method => Constant::Methodref {
                class_index,
                name_and_type_index,
            },
            MemberKind::InterfaceMethod => Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            },
        })
    }

    /// Returns the `Utf8` string at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstantPoolIndex`] if the entry is missing or not `Utf8`.
    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value),
            _ => Err(Error::ConstantPoolIndex {
                index,
                reason: "expected Utf8",
            }),
        }
    }

    /// Returns the internal name of the `Class` entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstantPoolIndex`] if the entry is missing or not `Class`.
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => Err(Error::ConstantPoolIndex {
                index,
                reason: "expected Class",
            }),
        }
    }

    /// Returns the `(name, descriptor)` of the `NameAndType` entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstantPoolIndex`] if the entry is missing or not `NameAndType`.
    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(Error::ConstantPoolIndex {
                index,
                reason: "expected NameAndType",
            }),
        }
    }

    /// Resolves the field or method reference at `index` into owner, name and descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstantPoolIndex`] if the entry is not a member reference.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class_index, name_and_type_index, kind) = match self.get(index)? {
            Constant::Fieldref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, MemberKind::Field),
            Constant::Methodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, MemberKind::Method),
            Constant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, MemberKind::InterfaceMethod),
            _ => {
                return Err(Error::ConstantPoolIndex {
                    index,
                    reason: "expected a member reference",
                })
            }
        };
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            class: self.class_name(class_index)?.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            kind,
        })
    }

    /// Returns the method descriptor of the `InvokeDynamic` entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstantPoolIndex`] if the entry is not `InvokeDynamic`.
    pub fn invoke_dynamic_descriptor(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::InvokeDynamic {
                name_and_type_index,
                ..
            } => Ok(self.name_and_type(*name_and_type_index)?.1),
            _ => Err(Error::ConstantPoolIndex {
                index,
                reason: "expected InvokeDynamic",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_entries_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.add(Constant::Long(7)).unwrap();
        let int = pool.add(Constant::Integer(1)).unwrap();

        assert_eq!(long, 1);
        assert_eq!(int, 3);
        assert!(pool.get(2).is_err());
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn test_find_or_add_compares_float_bits() {
        let mut pool = ConstantPool::new();
        let nan = pool.find_or_add(Constant::Float(f32::NAN)).unwrap();
        assert_eq!(pool.find_or_add(Constant::Float(f32::NAN)).unwrap(), nan);

        let zero = pool.find_or_add(Constant::Float(0.0)).unwrap();
        let negative_zero = pool.find_or_add(Constant::Float(-0.0)).unwrap();
        assert_ne!(zero, negative_zero);
    }

    #[test]
    fn test_member_ref_resolution() {
        let mut pool = ConstantPool::new();
        let member = MemberRef {
            class: "a/B".to_string(),
            name: "run".to_string(),
            descriptor: "(I)V".to_string(),
            kind: MemberKind::InterfaceMethod,
        };
        let index = pool.member_ref_index(&member).unwrap();

        assert_eq!(pool.member_ref(index).unwrap(), member);
        assert_eq!(pool.get(index).unwrap().kind(), "InterfaceMethodref");
        assert_eq!(pool.member_ref_index(&member).unwrap(), index);
        assert_eq!(member.to_string(), "a/B.run(I)V");
    }

    #[test]
    fn test_truncate_rolls_back_appends() {
        let mut pool = ConstantPool::new();
        pool.utf8_index("kept").unwrap();
        let mark = pool.len();
        pool.add(Constant::Integer(5)).unwrap();

        pool.truncate(mark);
        assert_eq!(pool.len(), mark);
        assert_eq!(pool.utf8(1).unwrap(), "kept");
    }
}
