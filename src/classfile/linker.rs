//! Cross-reference checking of constant pools against the class hierarchy.
//!
//! The optimizer treats an unresolvable reference as "unknown behaviour": it never breaks
//! optimization, but it is counted and reported so that an incomplete library configuration
//! is visible. References to classes missing from the pool are warnings when they come from a
//! program class; a member that cannot be found on a known class is a note, since library
//! classes are often registered without their members.

use std::fmt;

use crate::classfile::{ClassHierarchy, ClassPool, Constant};

/// Counts and messages for unresolved references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Number of references to unknown classes
    pub warnings: usize,
    /// Number of references to unknown members of known classes
    pub notes: usize,
    /// Human readable messages, one per reported reference
    pub messages: Vec<String>,
}

impl Diagnostics {
    /// Returns `true` if nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.warnings == 0 && self.notes == 0
    }

    fn warn(&mut self, message: String) {
        log::warn!("{message}");
        self.warnings += 1;
        self.messages.push(message);
    }

    fn note(&mut self, message: String) {
        log::debug!("{message}");
        self.notes += 1;
        self.messages.push(message);
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} warning(s), {} note(s)", self.warnings, self.notes)
    }
}

/// Checks every class and member reference of every program class.
#[derive(Debug, Default)]
pub struct Linker;

impl Linker {
    /// Walks all program constant pools and reports references that do not resolve.
    ///
    /// Array class constants and references into array types are skipped; their members are
    /// those of `java/lang/Object`.
    #[must_use]
    pub fn link(pool: &ClassPool, hierarchy: &ClassHierarchy) -> Diagnostics {
        let mut diagnostics = Diagnostics::default();
        for class in pool.program_classes() {
            for (index, constant) in class.constant_pool.iter() {
                match constant {
                    Constant::Class { .. } => {
                        let Ok(name) = class.constant_pool.class_name(index) else {
                            diagnostics.warn(format!(
                                "{}: broken class constant #{index}",
                                class.name
                            ));
                            continue;
                        };
                        if !name.starts_with('[') && hierarchy.class(name).is_none() {
                            diagnostics.warn(format!(
                                "{} references unknown class {name}",
                                class.name
                            ));
                        }
                    }
                    Constant::Fieldref { .. }
                    | Constant::Methodref { .. }
                    | Constant::InterfaceMethodref { .. } => {
                        let Ok(member) = class.constant_pool.member_ref(index) else {
                            diagnostics.warn(format!(
                                "{}: broken member reference #{index}",
                                class.name
                            ));
                            continue;
                        };
                        if member.class.starts_with('[') || hierarchy.class(&member.class).is_none()
                        {
                            // The class constant itself is reported separately.
                            continue;
                        }
                        if hierarchy.resolve(&member).is_none() {
                            diagnostics
                                .note(format!("{} references unknown member {member}", class.name));
                        }
                    }
                    _ => {}
                }
            }
        }
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::{ClassAccessFlags, MemberKind, MemberRef, ProgramClass};

    #[test]
    fn test_unresolved_references_are_counted() {
        let mut pool = ClassPool::new();
        pool.add(ProgramClass::library(
            "java/lang/Object",
            None,
            ClassAccessFlags::PUBLIC,
        ));
        let mut class = ProgramClass::new("a/A", Some("java/lang/Object"), ClassAccessFlags::PUBLIC);
        class.constant_pool.class_index("a/Missing").unwrap();
        class
            .constant_pool
            .member_ref_index(&MemberRef {
                class: "java/lang/Object".to_string(),
                name: "hashCode".to_string(),
                descriptor: "()I".to_string(),
                kind: MemberKind::Method,
            })
            .unwrap();
        pool.add(class);

        let hierarchy = ClassHierarchy::from_pool(&pool);
        let diagnostics = Linker::link(&pool, &hierarchy);

        assert_eq!(diagnostics.warnings, 1);
        assert_eq!(diagnostics.notes, 1);
        assert_eq!(diagnostics.to_string(), "1 warning(s), 1 note(s)");
    }
}
