use crate::{
    classfile::{ClassAccessFlags, ClassHierarchy, ClassPool},
    optimize::{finalizers::ClassPass, KeepMarker},
    Result,
};

/// Marks program classes without subclasses as `final`.
///
/// Abstract classes, interfaces and kept classes are left alone.
#[derive(Debug, Default)]
pub struct ClassFinalizer;

impl ClassFinalizer {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        ClassFinalizer
    }
}

impl ClassPass for ClassFinalizer {
    fn name(&self) -> &'static str {
        "class-finalizer"
    }

    fn description(&self) -> &'static str {
        "Marks leaf classes final"
    }

    fn run(
        &self,
        pool: &mut ClassPool,
        hierarchy: &ClassHierarchy,
        keep: &KeepMarker,
    ) -> Result<usize> {
        let mut finalized = 0;
        for class in pool.iter_mut() {
            if class.is_library
                || keep.is_class_kept(&class.name)
                || class.access.intersects(
                    ClassAccessFlags::FINAL
                        | ClassAccessFlags::ABSTRACT
                        | ClassAccessFlags::INTERFACE,
                )
                || !hierarchy.direct_subclasses(&class.name).is_empty()
            {
                continue;
            }
            log::trace!("making {} final", class.name);
            class.access |= ClassAccessFlags::FINAL;
            finalized += 1;
        }
        Ok(finalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classfile::ProgramClass,
        test::{object_pool, program_class},
    };

    #[test]
    fn test_only_leaf_classes_become_final() {
        let mut pool = object_pool();
        pool.add(program_class("a/Base", "java/lang/Object"));
        pool.add(program_class("a/Leaf", "a/Base"));
        pool.add(ProgramClass::new(
            "a/Shape",
            Some("java/lang/Object"),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT,
        ));
        pool.add(program_class("a/Api", "java/lang/Object"));
        let hierarchy = ClassHierarchy::from_pool(&pool);
        let mut keep = KeepMarker::new();
        keep.keep_class("a/Api");

        let finalized = ClassFinalizer::new().run(&mut pool, &hierarchy, &keep).unwrap();

        assert_eq!(finalized, 1);
        let is_final = |name: &str| {
            pool.get(name)
                .unwrap()
                .access
                .contains(ClassAccessFlags::FINAL)
        };
        assert!(is_final("a/Leaf"));
        assert!(!is_final("a/Base"));
        assert!(!is_final("a/Shape"));
        assert!(!is_final("a/Api"));
        assert!(!is_final("java/lang/Object"));
    }
}
