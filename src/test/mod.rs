//! Shared helpers for the unit tests.

use crate::{
    classfile::{
        ClassAccessFlags, ClassPool, CodeAttribute, ConstantPool, MethodAccessFlags,
        ProgramClass, ProgramMethod,
    },
    evaluation::{BasicInvocationUnit, Evaluation, PartialEvaluator},
};

/// Name of the class test methods are evaluated in.
pub const TEST_CLASS: &str = "a/A";

/// A static method `m` without code.
pub fn static_method(descriptor: &str) -> ProgramMethod {
    ProgramMethod::new(MethodAccessFlags::STATIC, "m", descriptor, None)
}

/// Evaluates `code` as the body of a static method of [`TEST_CLASS`].
pub fn evaluate_static(pool: &ConstantPool, descriptor: &str, code: &CodeAttribute) -> Evaluation {
    PartialEvaluator::new(&BasicInvocationUnit)
        .evaluate(pool, TEST_CLASS, &static_method(descriptor), code)
        .unwrap()
}

/// A class pool holding only the library class `java/lang/Object`.
pub fn object_pool() -> ClassPool {
    let mut pool = ClassPool::new();
    pool.add(ProgramClass::library(
        "java/lang/Object",
        None,
        ClassAccessFlags::PUBLIC,
    ));
    pool
}

/// A public program class extending `super_name`.
pub fn program_class(name: &str, super_name: &str) -> ProgramClass {
    ProgramClass::new(name, Some(super_name), ClassAccessFlags::PUBLIC)
}
