//! Whole-pool optimization: structural passes followed by code rounds.

mod common;

use classopt::prelude::*;
use classopt::assembly::opcodes::*;
use common::{method_code, run, Outcome, Word};

fn method_ref(class: &str, name: &str, descriptor: &str, kind: MemberKind) -> MemberRef {
    MemberRef {
        class: class.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        kind,
    }
}

/// `a/Base`, its leaf subclass `a/Leaf` with a locally used `helper`, the interface
/// `a/Shape` implemented only by `a/Square`, and `a/Main` using the shape.
fn program() -> ClassPool {
    let mut pool = ClassPool::new();
    pool.add(ProgramClass::library(
        "java/lang/Object",
        None,
        ClassAccessFlags::PUBLIC,
    ));
    pool.add(ProgramClass::new(
        "a/Base",
        Some("java/lang/Object"),
        ClassAccessFlags::PUBLIC,
    ));

    let mut leaf = ProgramClass::new("a/Leaf", Some("a/Base"), ClassAccessFlags::PUBLIC);
    let helper_code = InstructionAssembler::new()
        .iconst(2)
        .iconst(3)
        .op(IADD)
        .op(IRETURN)
        .finish(1, &leaf.constant_pool)
        .unwrap();
    leaf.methods.push(ProgramMethod::new(
        MethodAccessFlags::PUBLIC,
        "helper",
        "()I",
        Some(helper_code),
    ));
    let helper = leaf
        .constant_pool
        .member_ref_index(&method_ref("a/Leaf", "helper", "()I", MemberKind::Method))
        .unwrap();
    let run_code = InstructionAssembler::new()
        .load(ComputationalType::Reference, 0)
        .constant(INVOKEVIRTUAL, helper)
        .op(IRETURN)
        .finish(1, &leaf.constant_pool)
        .unwrap();
    leaf.methods.push(ProgramMethod::new(
        MethodAccessFlags::PUBLIC,
        "run",
        "()I",
        Some(run_code),
    ));
    pool.add(leaf);

    let mut shape = ProgramClass::new(
        "a/Shape",
        Some("java/lang/Object"),
        ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
    );
    shape.methods.push(ProgramMethod::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        "area",
        "()I",
        None,
    ));
    pool.add(shape);

    let mut square = ProgramClass::new(
        "a/Square",
        Some("java/lang/Object"),
        ClassAccessFlags::PUBLIC,
    );
    square.interfaces.push("a/Shape".to_string());
    let area_code = InstructionAssembler::new()
        .iconst(4)
        .store(ComputationalType::Int, 1)
        .load(ComputationalType::Int, 1)
        .load(ComputationalType::Int, 1)
        .op(IMUL)
        .op(IRETURN)
        .finish(2, &square.constant_pool)
        .unwrap();
    square.methods.push(ProgramMethod::new(
        MethodAccessFlags::PUBLIC,
        "area",
        "()I",
        Some(area_code),
    ));
    pool.add(square);

    let mut main = ProgramClass::new("a/Main", Some("java/lang/Object"), ClassAccessFlags::PUBLIC);
    let area = main
        .constant_pool
        .member_ref_index(&method_ref(
            "a/Shape",
            "area",
            "()I",
            MemberKind::InterfaceMethod,
        ))
        .unwrap();
    let measure_code = InstructionAssembler::new()
        .load(ComputationalType::Reference, 0)
        .constant(INVOKEINTERFACE, area)
        .op(IRETURN)
        .finish(1, &main.constant_pool)
        .unwrap();
    main.methods.push(ProgramMethod::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "measure",
        "(La/Shape;)I",
        Some(measure_code),
    ));
    pool.add(main);
    pool
}

fn keep() -> KeepMarker {
    let mut keep = KeepMarker::new();
    keep.keep_class("a/Main").keep_member("a/Leaf", "run", "()I");
    keep
}

#[test]
fn test_full_optimization() {
    let mut pool = program();

    let stats = Optimizer::new(OptimizerConfig::default(), keep())
        .optimize(&mut pool)
        .unwrap();

    assert_eq!(stats.link_warnings, 0, "{stats}");
    assert_eq!(stats.interfaces_inlined, 1);
    assert!(pool.get("a/Shape").is_none());
    let main = pool.get("a/Main").unwrap();
    let measure = main.method("measure", "(La/Square;)I").unwrap();
    assert_eq!(measure.code.as_ref().unwrap().code[1], INVOKEVIRTUAL);

    // a/Leaf and a/Square are leaves; a/Main is kept and a/Base has a subclass.
    assert_eq!(stats.classes_finalized, 2);
    let is_final = |name: &str| {
        pool.get(name)
            .unwrap()
            .access
            .contains(ClassAccessFlags::FINAL)
    };
    assert!(is_final("a/Leaf"));
    assert!(is_final("a/Square"));
    assert!(!is_final("a/Base"));
    assert!(!is_final("a/Main"));

    // `helper` is only called by `run`; `measure` is not called at all. `area` is called
    // from `a/Main` and `run` is kept.
    assert_eq!(stats.methods_privatized, 2);
    let is_private = |class: &str, name: &str, descriptor: &str| {
        pool.get(class)
            .unwrap()
            .method(name, descriptor)
            .unwrap()
            .access
            .contains(MethodAccessFlags::PRIVATE)
    };
    assert!(is_private("a/Leaf", "helper", "()I"));
    assert!(is_private("a/Main", "measure", "(La/Square;)I"));
    assert!(!is_private("a/Square", "area", "()I"));
    assert!(!is_private("a/Leaf", "run", "()I"));
    assert_eq!(method_code(&pool, "a/Leaf", "run", "()I").code[1], INVOKESPECIAL);

    assert_eq!(method_code(&pool, "a/Leaf", "helper", "()I").code, vec![ICONST_5, IRETURN]);
    let area = method_code(&pool, "a/Square", "area", "()I");
    assert_eq!(area.code, vec![BIPUSH, 16, IRETURN]);
    let constants = &pool.get("a/Square").unwrap().constant_pool;
    assert_eq!(
        run(area, constants, &[Word::Unset], 100),
        Outcome::Returned(Some(Word::Int(16)))
    );

    assert_eq!(stats.methods_skipped, 0);
    assert!(stats.methods_changed >= 2);
    assert!(stats.bytes_saved() > 0);
    assert!(stats.has_changes());
}

#[test]
fn test_kept_classes_stay_untouched_by_structural_passes() {
    let mut pool = program();
    let mut keep = keep();
    keep.keep_class_and_members("a/Leaf")
        .keep_class("a/Square")
        .keep_class("a/Shape");

    let config = OptimizerConfig {
        simplify_code: false,
        ..OptimizerConfig::default()
    };
    let stats = Optimizer::new(config, keep).optimize(&mut pool).unwrap();

    assert_eq!(stats.interfaces_inlined, 0);
    assert_eq!(stats.classes_finalized, 0);
    assert_eq!(stats.rounds, 0);
    assert!(!pool
        .get("a/Leaf")
        .unwrap()
        .method("helper", "()I")
        .unwrap()
        .access
        .contains(MethodAccessFlags::PRIVATE));
    assert!(pool.get("a/Shape").is_some());
    assert_eq!(method_code(&pool, "a/Leaf", "run", "()I").code[1], INVOKEVIRTUAL);
}

#[test]
fn test_unresolved_references_are_reported_and_tolerated() {
    let mut pool = program();
    let main = pool.get_mut("a/Main").unwrap();
    let missing = main
        .constant_pool
        .member_ref_index(&method_ref("a/Gone", "call", "()V", MemberKind::Method))
        .unwrap();
    let code = InstructionAssembler::new()
        .constant(INVOKESTATIC, missing)
        .iconst(1)
        .iconst(1)
        .op(IADD)
        .op(POP)
        .op(RETURN)
        .finish(0, &main.constant_pool)
        .unwrap();
    main.methods.push(ProgramMethod::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "start",
        "()V",
        Some(code),
    ));

    let stats = Optimizer::new(OptimizerConfig::code_only(), keep())
        .optimize(&mut pool)
        .unwrap();

    assert!(stats.link_warnings > 0, "{stats}");
    assert_eq!(stats.methods_skipped, 0);
    let start = method_code(&pool, "a/Main", "start", "()V");
    assert_eq!(start.code[0], INVOKESTATIC);
    assert_eq!(*start.code.last().unwrap(), RETURN);
    assert!(start.code.len() < 8);
}
