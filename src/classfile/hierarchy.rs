//! Immutable snapshot of the class hierarchy.
//!
//! Passes that mutate classes (in parallel, one worker per class) still need to ask questions
//! about other classes: does a class have a static initializer, does a method override or get
//! overridden, which classes implement an interface. [`ClassHierarchy`] answers them from a
//! snapshot taken before the pass starts, so workers never borrow the [`ClassPool`] itself.
//!
//! Missing classes are answered conservatively: an unknown superclass may declare anything
//! and an unknown class may have a static initializer.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::classfile::{
    ClassAccessFlags, ClassPool, FieldAccessFlags, MemberKind, MemberRef, MethodAccessFlags,
};

/// A method as seen by the hierarchy.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Access flags
    pub access: MethodAccessFlags,
}

/// A field as seen by the hierarchy.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
    /// Access flags
    pub access: FieldAccessFlags,
}

/// Per-class facts captured by the snapshot.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    /// Internal name
    pub name: String,
    /// Superclass
    pub super_name: Option<String>,
    /// Direct superinterfaces
    pub interfaces: Vec<String>,
    /// Access flags
    pub access: ClassAccessFlags,
    /// Library classes are never modified
    pub is_library: bool,
    /// Declared methods
    pub methods: Vec<MethodInfo>,
    /// Declared fields
    pub fields: Vec<FieldInfo>,
}

impl ClassInfo {
    /// Returns `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access.contains(ClassAccessFlags::INTERFACE)
    }

    fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    fn field(&self, name: &str, descriptor: &str) -> Option<&FieldInfo> {
        self.fields
            .iter()
            .find(|f| f.name == name && f.descriptor == descriptor)
    }

    fn has_static_initializer(&self) -> bool {
        self.methods.iter().any(|m| m.name == "<clinit>")
    }
}

/// The class that declares a resolved member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMember {
    /// Declaring class
    pub class: String,
    /// Member name
    pub name: String,
    /// Member descriptor
    pub descriptor: String,
}

/// Immutable hierarchy snapshot of a [`ClassPool`].
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    classes: FxHashMap<String, ClassInfo>,
    subclasses: FxHashMap<String, Vec<String>>,
    implementors: FxHashMap<String, Vec<String>>,
}

impl ClassHierarchy {
    /// Takes a snapshot of `pool`.
    #[must_use]
    pub fn from_pool(pool: &ClassPool) -> Self {
        let mut hierarchy = ClassHierarchy::default();
        for class in pool.iter() {
            let info = ClassInfo {
                name: class.name.clone(),
                super_name: class.super_name.clone(),
                interfaces: class.interfaces.clone(),
                access: class.access,
                is_library: class.is_library,
                methods: class
                    .methods
                    .iter()
                    .map(|m| MethodInfo {
                        name: m.name.clone(),
                        descriptor: m.descriptor.clone(),
                        access: m.access,
                    })
                    .collect(),
                fields: class
                    .fields
                    .iter()
                    .map(|f| FieldInfo {
                        name: f.name.clone(),
                        descriptor: f.descriptor.clone(),
                        access: f.access,
                    })
                    .collect(),
            };
            if let Some(super_name) = &info.super_name {
                hierarchy
                    .subclasses
                    .entry(super_name.clone())
                    .or_default()
                    .push(info.name.clone());
            }
            for interface in &info.interfaces {
                hierarchy
                    .implementors
                    .entry(interface.clone())
                    .or_default()
                    .push(info.name.clone());
            }
            hierarchy.classes.insert(info.name.clone(), info);
        }
        hierarchy
    }

    /// Looks up a class.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    /// Direct subclasses of `name`.
    #[must_use]
    pub fn direct_subclasses(&self, name: &str) -> &[String] {
        self.subclasses.get(name).map_or(&[], Vec::as_slice)
    }

    /// Classes and interfaces that list `name` among their direct superinterfaces.
    #[must_use]
    pub fn direct_implementors(&self, name: &str) -> &[String] {
        self.implementors.get(name).map_or(&[], Vec::as_slice)
    }

    /// All transitive subclasses of `name`, not including `name` itself.
    #[must_use]
    pub fn all_subclasses(&self, name: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut seen = FxHashSet::default();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            for sub in self.direct_subclasses(&current) {
                if seen.insert(sub.clone()) {
                    result.push(sub.clone());
                    pending.push(sub.clone());
                }
            }
        }
        result
    }

    /// Returns `true` if `sub` is `sup` or inherits from it through classes or interfaces.
    #[must_use]
    pub fn is_assignable(&self, sub: &str, sup: &str) -> bool {
        let mut seen = FxHashSet::default();
        let mut pending = vec![sub];
        while let Some(current) = pending.pop() {
            if current == sup {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(info) = self.classes.get(current) {
                pending.extend(info.super_name.as_deref());
                pending.extend(info.interfaces.iter().map(String::as_str));
            }
        }
        false
    }

    /// Resolves a member reference to the class that declares the member.
    ///
    /// Methods are looked up in the class and its superclasses first, then in the
    /// superinterfaces. Fields are looked up in the class, its superinterfaces, then its
    /// superclass. Returns `None` if the member cannot be found among known classes.
    #[must_use]
    pub fn resolve(&self, member: &MemberRef) -> Option<ResolvedMember> {
        let declaring = match member.kind {
            MemberKind::Field => self.resolve_field(&member.class, &member.name, &member.descriptor),
            _ => self.resolve_method(&member.class, &member.name, &member.descriptor),
        }?;
        Some(ResolvedMember {
            class: declaring.to_string(),
            name: member.name.clone(),
            descriptor: member.descriptor.clone(),
        })
    }

    fn resolve_method<'a>(&'a self, class: &'a str, name: &str, descriptor: &str) -> Option<&'a str> {
        let mut current = Some(class);
        while let Some(name_of) = current {
            let info = self.classes.get(name_of)?;
            if info.method(name, descriptor).is_some() {
                return Some(&info.name);
            }
            current = info.super_name.as_deref();
        }
        self.resolve_in_interfaces(class, name, descriptor, &mut FxHashSet::default())
    }

    fn resolve_in_interfaces<'a>(
        &'a self,
        class: &'a str,
        name: &str,
        descriptor: &str,
        seen: &mut FxHashSet<&'a str>,
    ) -> Option<&'a str> {
        let info = self.classes.get(class)?;
        for interface in &info.interfaces {
            if !seen.insert(interface) {
                continue;
            }
            if let Some(found) = self.classes.get(interface.as_str()) {
                if found.method(name, descriptor).is_some() {
                    return Some(&found.name);
                }
            }
            if let Some(found) = self.resolve_in_interfaces(interface, name, descriptor, seen) {
                return Some(found);
            }
        }
        info.super_name
            .as_deref()
            .and_then(|s| self.resolve_in_interfaces(s, name, descriptor, seen))
    }

    fn resolve_field<'a>(&'a self, class: &'a str, name: &str, descriptor: &str) -> Option<&'a str> {
        let info = self.classes.get(class)?;
        if info.field(name, descriptor).is_some() {
            return Some(&info.name);
        }
        for interface in &info.interfaces {
            if let Some(found) = self.resolve_field(interface, name, descriptor) {
                return Some(found);
            }
        }
        info.super_name
            .as_deref()
            .and_then(|s| self.resolve_field(s, name, descriptor))
    }

    /// Returns `true` if touching `target` from code in `from` may run a static initializer
    /// that has not necessarily run yet.
    ///
    /// `from` and its superclasses are initialized by the time its code runs.
    #[must_use]
    pub fn may_trigger_initializer(&self, from: &str, target: &str) -> bool {
        let mut current = Some(from);
        while let Some(name) = current {
            if name == target {
                return false;
            }
            current = self
                .classes
                .get(name)
                .and_then(|info| info.super_name.as_deref());
        }

        let mut current = Some(target);
        while let Some(name) = current {
            let Some(info) = self.classes.get(name) else {
                return true;
            };
            if info.has_static_initializer() {
                return true;
            }
            current = info.super_name.as_deref();
        }
        false
    }

    /// Returns `true` if some supertype of `class` declares an overridable method with the
    /// same name and descriptor. Unknown supertypes count as declaring it.
    #[must_use]
    pub fn overrides(&self, class: &str, name: &str, descriptor: &str) -> bool {
        let Some(info) = self.classes.get(class) else {
            return true;
        };
        let mut pending: Vec<&str> = info.super_name.iter().map(String::as_str).collect();
        pending.extend(info.interfaces.iter().map(String::as_str));
        let mut seen = FxHashSet::default();
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(info) = self.classes.get(current) else {
                return true;
            };
            if info.method(name, descriptor).is_some_and(|m| {
                !m.access
                    .intersects(MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC)
            }) {
                return true;
            }
            pending.extend(info.super_name.as_deref());
            pending.extend(info.interfaces.iter().map(String::as_str));
        }
        false
    }

    /// Returns `true` if some transitive subclass of `class` declares a method with the same
    /// name and descriptor.
    #[must_use]
    pub fn is_overridden(&self, class: &str, name: &str, descriptor: &str) -> bool {
        self.all_subclasses(class).iter().any(|sub| {
            self.classes
                .get(sub.as_str())
                .is_some_and(|info| info.method(name, descriptor).is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{ProgramClass, ProgramMethod};

    fn pool() -> ClassPool {
        let mut pool = ClassPool::new();
        pool.add(ProgramClass::library(
            "java/lang/Object",
            None,
            ClassAccessFlags::PUBLIC,
        ));

        let mut base = ProgramClass::new("a/Base", Some("java/lang/Object"), ClassAccessFlags::PUBLIC);
        base.methods.push(ProgramMethod::new(
            MethodAccessFlags::PUBLIC,
            "run",
            "()V",
            None,
        ));
        base.methods.push(ProgramMethod::new(
            MethodAccessFlags::STATIC,
            "<clinit>",
            "()V",
            None,
        ));
        pool.add(base);

        let mut derived = ProgramClass::new("a/Derived", Some("a/Base"), ClassAccessFlags::PUBLIC);
        derived.methods.push(ProgramMethod::new(
            MethodAccessFlags::PUBLIC,
            "run",
            "()V",
            None,
        ));
        pool.add(derived);
        pool
    }

    #[test]
    fn test_override_queries() {
        let hierarchy = ClassHierarchy::from_pool(&pool());
        assert!(hierarchy.overrides("a/Derived", "run", "()V"));
        assert!(!hierarchy.overrides("a/Base", "run", "()V"));
        assert!(hierarchy.is_overridden("a/Base", "run", "()V"));
        assert!(!hierarchy.is_overridden("a/Derived", "run", "()V"));
    }

    #[test]
    fn test_initializer_queries() {
        let hierarchy = ClassHierarchy::from_pool(&pool());
        assert!(!hierarchy.may_trigger_initializer("a/Derived", "a/Base"));
        assert!(hierarchy.may_trigger_initializer("java/lang/Object", "a/Derived"));
        assert!(hierarchy.may_trigger_initializer("a/Base", "x/Unknown"));
        assert!(!hierarchy.may_trigger_initializer("a/Base", "java/lang/Object"));
    }

    #[test]
    fn test_method_resolution_walks_superclasses() {
        let hierarchy = ClassHierarchy::from_pool(&pool());
        let member = MemberRef {
            class: "a/Derived".to_string(),
            name: "<clinit>".to_string(),
            descriptor: "()V".to_string(),
            kind: MemberKind::Method,
        };
        assert_eq!(hierarchy.resolve(&member).unwrap().class, "a/Base");
        assert!(hierarchy.is_assignable("a/Derived", "java/lang/Object"));
        assert_eq!(hierarchy.all_subclasses("java/lang/Object").len(), 2);
    }
}
