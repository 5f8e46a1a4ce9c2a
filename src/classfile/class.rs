//! Classes, members and the class pool.

use rustc_hash::FxHashMap;

use crate::{
    classfile::{
        ClassAccessFlags, CodeAttribute, ConstantPool, FieldAccessFlags, MethodAccessFlags,
        MethodDescriptor,
    },
    Result,
};

/// A method of a [`ProgramClass`].
#[derive(Debug, Clone)]
pub struct ProgramMethod {
    /// Access flags
    pub access: MethodAccessFlags,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Body, absent for abstract and native methods
    pub code: Option<CodeAttribute>,
}

impl ProgramMethod {
    /// Creates a method.
    #[must_use]
    pub fn new(
        access: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        code: Option<CodeAttribute>,
    ) -> Self {
        Self {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code,
        }
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccessFlags::STATIC)
    }

    /// Returns `true` for instance initializers.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    /// Returns `true` for `<init>` and `<clinit>`.
    #[must_use]
    pub fn is_initializer(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    /// Parses the method descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is malformed.
    pub fn parsed_descriptor(&self) -> Result<MethodDescriptor> {
        MethodDescriptor::parse(&self.descriptor)
    }
}

/// A field of a [`ProgramClass`].
#[derive(Debug, Clone)]
pub struct ProgramField {
    /// Access flags
    pub access: FieldAccessFlags,
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
    /// Constant pool index of the `ConstantValue` attribute, if any
    pub constant_value: Option<u16>,
}

impl ProgramField {
    /// Creates a field without a constant value.
    #[must_use]
    pub fn new(access: FieldAccessFlags, name: &str, descriptor: &str) -> Self {
        Self {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            constant_value: None,
        }
    }
}

/// A class or interface, either part of the program being optimized or a library class
/// that is only consulted for hierarchy and resolution information.
#[derive(Debug, Clone)]
pub struct ProgramClass {
    /// Internal name, e.g. `java/lang/Object`
    pub name: String,
    /// Internal name of the superclass, `None` only for `java/lang/Object`
    pub super_name: Option<String>,
    /// Internal names of the directly implemented interfaces
    pub interfaces: Vec<String>,
    /// Access flags
    pub access: ClassAccessFlags,
    /// Constant pool
    pub constant_pool: ConstantPool,
    /// Declared fields
    pub fields: Vec<ProgramField>,
    /// Declared methods
    pub methods: Vec<ProgramMethod>,
    /// Library classes are never modified
    pub is_library: bool,
}

impl ProgramClass {
    /// Creates an empty program class extending `super_name`.
    #[must_use]
    pub fn new(name: &str, super_name: Option<&str>, access: ClassAccessFlags) -> Self {
        Self {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            access,
            constant_pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            is_library: false,
        }
    }

    /// Creates an empty library class.
    #[must_use]
    pub fn library(name: &str, super_name: Option<&str>, access: ClassAccessFlags) -> Self {
        Self {
            is_library: true,
            ..Self::new(name, super_name, access)
        }
    }

    /// Returns `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access.contains(ClassAccessFlags::INTERFACE)
    }

    /// Finds a declared method by name and descriptor.
    #[must_use]
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&ProgramMethod> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Finds a declared method by name and descriptor, mutably.
    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut ProgramMethod> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Finds a declared field by name and descriptor.
    #[must_use]
    pub fn field(&self, name: &str, descriptor: &str) -> Option<&ProgramField> {
        self.fields
            .iter()
            .find(|f| f.name == name && f.descriptor == descriptor)
    }

    /// Returns `true` if the class declares a static initializer.
    #[must_use]
    pub fn has_static_initializer(&self) -> bool {
        self.methods.iter().any(|m| m.name == "<clinit>")
    }
}

/// All classes known to the optimizer, in insertion order, with lookup by name.
#[derive(Debug, Clone, Default)]
pub struct ClassPool {
    classes: Vec<ProgramClass>,
    index: FxHashMap<String, usize>,
}

impl ClassPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class, replacing any class with the same name.
    pub fn add(&mut self, class: ProgramClass) {
        match self.index.get(&class.name) {
            Some(&slot) => self.classes[slot] = class,
            None => {
                self.index.insert(class.name.clone(), self.classes.len());
                self.classes.push(class);
            }
        }
    }

    /// Removes the class `name`, keeping the order of the others.
    pub fn remove(&mut self, name: &str) -> Option<ProgramClass> {
        let slot = self.index.remove(name)?;
        let class = self.classes.remove(slot);
        for position in self.index.values_mut() {
            if *position > slot {
                *position -= 1;
            }
        }
        Some(class)
    }

    /// Looks up a class by internal name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProgramClass> {
        self.index.get(name).map(|&slot| &self.classes[slot])
    }

    /// Looks up a class by internal name, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ProgramClass> {
        self.index.get(name).map(|&slot| &mut self.classes[slot])
    }

    /// Iterates over all classes.
    pub fn iter(&self) -> std::slice::Iter<'_, ProgramClass> {
        self.classes.iter()
    }

    /// Iterates mutably over all classes.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ProgramClass> {
        self.classes.iter_mut()
    }

    /// All classes as a mutable slice, for parallel processing.
    pub fn classes_mut(&mut self) -> &mut [ProgramClass] {
        &mut self.classes
    }

    /// Iterates over the program (non-library) classes.
    pub fn program_classes(&self) -> impl Iterator<Item = &ProgramClass> {
        self.classes.iter().filter(|c| !c.is_library)
    }

    /// Number of classes in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if the pool holds no classes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
