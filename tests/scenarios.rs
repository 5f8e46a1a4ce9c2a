//! End-to-end simplification of small method bodies.

mod common;

use classopt::{
    assembly::{decode_all, opcodes::*, InstructionAssembler},
    classfile::{
        ClassAccessFlags, ClassHierarchy, ClassPool, CodeAttribute, ComputationalType,
        ConstantPool, MethodAccessFlags, ProgramClass, ProgramMethod,
    },
    evaluation::{BasicInvocationUnit, PartialEvaluator},
    optimize::{EvaluationSimplifier, KeepMarker, Optimizer, OptimizerConfig, SideEffectChecker},
};
use common::{method_code, run, Outcome, Word};

const CLASS: &str = "t/Scenario";

fn pool_with(name: &str, descriptor: &str, code: CodeAttribute) -> ClassPool {
    let mut pool = ClassPool::new();
    pool.add(ProgramClass::library(
        "java/lang/Object",
        None,
        ClassAccessFlags::PUBLIC,
    ));
    let mut class = ProgramClass::new(CLASS, Some("java/lang/Object"), ClassAccessFlags::PUBLIC);
    class.methods.push(ProgramMethod::new(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        name,
        descriptor,
        Some(code),
    ));
    pool.add(class);
    pool
}

fn optimize(pool: &mut ClassPool) -> classopt::optimize::OptimizationStats {
    Optimizer::new(OptimizerConfig::code_only(), KeepMarker::new())
        .optimize(pool)
        .unwrap()
}

#[test]
fn test_dead_arithmetic_folds_to_its_result() {
    let code = InstructionAssembler::new()
        .op(ICONST_0)
        .op(ICONST_1)
        .op(IADD)
        .op(IRETURN)
        .finish(0, &ConstantPool::new())
        .unwrap();
    let mut pool = pool_with("one", "()I", code);

    let stats = optimize(&mut pool);

    assert_eq!(method_code(&pool, CLASS, "one", "()I").code, vec![ICONST_1, IRETURN]);
    assert_eq!(stats.methods_changed, 1);
    assert!(stats.simplification.constants_folded >= 1);
}

#[test]
fn test_constant_variable_is_replaced_by_its_value() {
    let code = InstructionAssembler::new()
        .iconst(42)
        .store(ComputationalType::Int, 0)
        .load(ComputationalType::Int, 0)
        .op(IRETURN)
        .finish(1, &ConstantPool::new())
        .unwrap();
    let original = code.clone();
    let mut pool = pool_with("answer", "()I", code);

    optimize(&mut pool);

    let optimized = method_code(&pool, CLASS, "answer", "()I");
    assert_eq!(optimized.code, vec![BIPUSH, 42, IRETURN]);
    let constants = &pool.get(CLASS).unwrap().constant_pool;
    assert_eq!(
        run(optimized, constants, &[], 100),
        run(&original, constants, &[], 100)
    );
}

#[test]
fn test_dup_and_pops_collapse_to_a_balanced_stack() {
    let code = InstructionAssembler::new()
        .load(ComputationalType::Int, 0)
        .op(DUP)
        .op(POP)
        .op(POP)
        .load(ComputationalType::Int, 0)
        .op(IRETURN)
        .finish(1, &ConstantPool::new())
        .unwrap();
    let mut constants = ConstantPool::new();
    let method = ProgramMethod::new(MethodAccessFlags::STATIC, "same", "(I)I", None);
    let unit = BasicInvocationUnit;
    let evaluation = PartialEvaluator::new(&unit)
        .evaluate(&constants, CLASS, &method, &code)
        .unwrap();

    let pool = ClassPool::new();
    let hierarchy = ClassHierarchy::from_pool(&pool);
    let config = OptimizerConfig::default();
    let keep = KeepMarker::new();
    let checker = SideEffectChecker::new(&hierarchy, &config, &keep);
    let (simplified, report) = EvaluationSimplifier::new(&config.simplifier, &checker, &unit)
        .simplify(&mut constants, CLASS, &method, &code, &evaluation)
        .unwrap()
        .unwrap();

    assert_eq!(simplified.code, vec![ILOAD_0, IRETURN]);
    assert!(report.instructions_deleted >= 4);

    let again = PartialEvaluator::new(&unit)
        .evaluate(&constants, CLASS, &method, &simplified)
        .unwrap();
    let end = again
        .instructions()
        .map(|(offset, _)| offset)
        .last()
        .unwrap();
    assert_eq!(again.stack_after(end).unwrap().size(), 0);
    assert_eq!(run(&simplified, &constants, &[Word::Int(9)], 100), Outcome::Returned(Some(Word::Int(9))));
}

#[test]
fn test_self_loop_is_kept_verbatim() {
    let code = InstructionAssembler::new()
        .label("spin")
        .branch(GOTO, "spin")
        .finish(0, &ConstantPool::new())
        .unwrap();
    let original = code.code.clone();
    let mut pool = pool_with("spin", "()V", code);

    let stats = optimize(&mut pool);

    assert_eq!(stats.methods_changed, 0);
    assert_eq!(stats.methods_skipped, 0);
    assert_eq!(method_code(&pool, CLASS, "spin", "()V").code, original);
}

#[test]
fn test_switch_with_one_feasible_case_becomes_a_jump() {
    let code = InstructionAssembler::new()
        .iconst(1)
        .table_switch(0, &["zero", "one", "two"], "other")
        .label("zero")
        .iconst(10)
        .op(IRETURN)
        .label("one")
        .iconst(11)
        .op(IRETURN)
        .label("two")
        .iconst(12)
        .op(IRETURN)
        .label("other")
        .iconst(99)
        .op(IRETURN)
        .finish(0, &ConstantPool::new())
        .unwrap();
    let original_length = code.len();
    let mut pool = pool_with("pick", "()I", code);

    let stats = optimize(&mut pool);

    let optimized = method_code(&pool, CLASS, "pick", "()I");
    let instructions = decode_all(&optimized.code).unwrap();
    assert!(instructions
        .iter()
        .all(|(_, instruction)| instruction.opcode != TABLESWITCH));
    let pushes: Vec<_> = instructions
        .iter()
        .filter(|(_, instruction)| instruction.opcode == BIPUSH)
        .map(|(_, instruction)| instruction.operand.clone())
        .collect();
    assert_eq!(pushes, vec![classopt::assembly::Operand::Byte(11)]);
    assert!(instructions
        .iter()
        .all(|(_, instruction)| !matches!(instruction.opcode, ICONST_1 | GOTO | GOTO_W)));
    // The jump to the only feasible case lands on the next instruction once the other
    // cases are gone, so nothing of the switch remains.
    assert_eq!(optimized.code, vec![BIPUSH, 11, IRETURN]);
    assert!(optimized.len() < original_length);
    assert!(stats.simplification.branches_simplified >= 1);

    let constants = &pool.get(CLASS).unwrap().constant_pool;
    assert_eq!(
        run(optimized, constants, &[], 100),
        Outcome::Returned(Some(Word::Int(11)))
    );
}

#[test]
fn test_discarded_division_result_is_left_alone() {
    let code = InstructionAssembler::new()
        .iconst(100)
        .load(ComputationalType::Int, 0)
        .op(IDIV)
        .op(POP)
        .iconst(1)
        .op(IRETURN)
        .finish(1, &ConstantPool::new())
        .unwrap();
    let original = code.clone();
    let mut pool = pool_with("divide", "(I)I", code);

    let stats = optimize(&mut pool);

    assert_eq!(stats.methods_changed, 0, "{stats}");
    assert_eq!(method_code(&pool, CLASS, "divide", "(I)I"), &original);
    let constants = &pool.get(CLASS).unwrap().constant_pool;
    assert_eq!(
        run(&original, constants, &[Word::Int(0)], 100),
        Outcome::Threw
    );
}
