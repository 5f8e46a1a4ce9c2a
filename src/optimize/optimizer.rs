//! The optimizer driver.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    time::Instant,
};

use rayon::prelude::*;

use crate::{
    classfile::{
        ClassHierarchy, ClassPool, CodeAttribute, ConstantPool, Linker, ProgramClass,
        ProgramMethod,
    },
    evaluation::{InvocationUnit, PartialEvaluator, SeededInvocationUnit},
    optimize::{
        finalizers::{ClassFinalizer, ClassPass, MethodPrivatizer, SingleImplementationInliner},
        EvaluationSimplifier, KeepMarker, OptimizationStats, OptimizerConfig, SideEffectChecker,
        SimplificationReport,
    },
    Error, Result,
};

/// Runs the configured passes over a class pool.
///
/// The optimizer works in three stages:
///
/// 1. **Linking**: references of all program classes are resolved against a hierarchy
///    snapshot. Unresolved references are logged and counted; code touching them is treated
///    as having unknown behaviour.
/// 2. **Finalizers**: the enabled [`ClassPass`]es run once, each against a fresh snapshot.
/// 3. **Code rounds**: every method body is partially evaluated and simplified. Rounds
///    repeat up to [`OptimizerConfig::passes`] times and stop once a round changes nothing.
///
/// A method whose evaluation or simplification fails, or panics, keeps its code; constants
/// appended to its class's pool on the way are dropped again.
///
/// # Example
///
/// ```rust,no_run
/// use classopt::prelude::*;
///
/// # fn example(mut pool: ClassPool) -> classopt::Result<()> {
/// let mut keep = KeepMarker::new();
/// keep.keep_class_and_members("com/example/Main");
///
/// let optimizer = Optimizer::new(OptimizerConfig::default(), keep);
/// let stats = optimizer.optimize(&mut pool)?;
/// println!("{stats}");
/// # Ok(())
/// # }
/// ```
pub struct Optimizer {
    config: OptimizerConfig,
    keep: KeepMarker,
    seeds: Option<SeededInvocationUnit>,
}

impl Optimizer {
    /// Creates an optimizer.
    #[must_use]
    pub fn new(config: OptimizerConfig, keep: KeepMarker) -> Self {
        Optimizer {
            config,
            keep,
            seeds: None,
        }
    }

    /// Evaluates with `unit` instead of the `static final` constants of the pool.
    #[must_use]
    pub fn with_invocation_unit(mut self, unit: SeededInvocationUnit) -> Self {
        self.seeds = Some(unit);
        self
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Optimizes every program class of `pool` in place.
    ///
    /// # Errors
    ///
    /// Returns an error if a finalizer fails. Failures of individual methods are logged and
    /// counted in [`OptimizationStats::methods_skipped`] instead.
    pub fn optimize(&self, pool: &mut ClassPool) -> Result<OptimizationStats> {
        let start = Instant::now();
        let mut stats = OptimizationStats::default();
        if !self.config.any_enabled() {
            return Ok(stats);
        }

        let hierarchy = ClassHierarchy::from_pool(pool);
        let diagnostics = Linker::link(pool, &hierarchy);
        if !diagnostics.is_empty() {
            log::warn!("linking: {diagnostics}");
            for message in &diagnostics.messages {
                log::debug!("{message}");
            }
        }
        stats.link_warnings = diagnostics.warnings;
        stats.link_notes = diagnostics.notes;

        if self.config.inline_single_implementations {
            stats.interfaces_inlined = self.run_pass(&SingleImplementationInliner::new(), pool)?;
        }
        if self.config.finalize_classes {
            stats.classes_finalized = self.run_pass(&ClassFinalizer::new(), pool)?;
        }
        if self.config.privatize_methods {
            stats.methods_privatized = self.run_pass(&MethodPrivatizer::new(), pool)?;
        }

        if self.config.simplify_code {
            for round in 0..self.config.passes {
                let round_stats = self.run_round(pool);
                stats.rounds += 1;
                log::debug!(
                    "round {}: {} of {} method bodies changed",
                    round + 1,
                    round_stats.methods_changed,
                    round_stats.methods_processed
                );
                stats.merge(&round_stats);
                if round_stats.methods_changed == 0 {
                    break;
                }
            }
        }

        stats.elapsed = start.elapsed();
        Ok(stats)
    }

    fn run_pass(&self, pass: &dyn ClassPass, pool: &mut ClassPool) -> Result<usize> {
        let hierarchy = ClassHierarchy::from_pool(pool);
        let changed = pass.run(pool, &hierarchy, &self.keep)?;
        log::debug!("{}: {} change(s)", pass.name(), changed);
        Ok(changed)
    }

    fn run_round(&self, pool: &mut ClassPool) -> OptimizationStats {
        let hierarchy = ClassHierarchy::from_pool(pool);
        let seeded;
        let unit: &dyn InvocationUnit = match &self.seeds {
            Some(unit) => unit,
            None => {
                seeded = SeededInvocationUnit::from_class_pool(pool);
                &seeded
            }
        };

        let classes = pool.classes_mut();
        if self.config.parallel {
            classes
                .par_iter_mut()
                .map(|class| self.optimize_class(class, &hierarchy, unit))
                .reduce(OptimizationStats::default, |mut total, class| {
                    total.merge(&class);
                    total
                })
        } else {
            let mut total = OptimizationStats::default();
            for class in classes {
                total.merge(&self.optimize_class(class, &hierarchy, unit));
            }
            total
        }
    }

    fn optimize_class(
        &self,
        class: &mut ProgramClass,
        hierarchy: &ClassHierarchy,
        unit: &dyn InvocationUnit,
    ) -> OptimizationStats {
        let mut stats = OptimizationStats::default();
        if class.is_library {
            return stats;
        }
        let ProgramClass {
            name,
            constant_pool,
            methods,
            ..
        } = class;

        for method in methods.iter_mut() {
            let Some(before) = method.code.as_ref().map(CodeAttribute::len) else {
                continue;
            };
            stats.methods_processed += 1;
            match self.optimize_method(constant_pool, name, method, hierarchy, unit) {
                Ok(Some(report)) => {
                    stats.methods_changed += 1;
                    stats.code_bytes_before += before;
                    stats.code_bytes_after += method.code.as_ref().map_or(0, CodeAttribute::len);
                    stats.simplification.merge(&report);
                }
                Ok(None) => {}
                Err(error) => {
                    log::warn!(
                        "skipping {}.{}{}: {}",
                        name,
                        method.name,
                        method.descriptor,
                        error
                    );
                    stats.methods_skipped += 1;
                }
            }
        }
        stats
    }

    /// Evaluates and simplifies one method body, replacing it only on success.
    ///
    /// # Arguments
    ///
    /// * `pool` - The constant pool of the declaring class.
    /// * `class_name` - Internal name of the declaring class.
    /// * `method` - The method; nothing happens if it has no code.
    /// * `hierarchy` - Snapshot used to decide which instructions have side effects.
    /// * `unit` - Supplies parameter, field and return values to the evaluator.
    ///
    /// # Returns
    ///
    /// What changed, or `None` if the body stayed the same.
    ///
    /// # Errors
    ///
    /// Returns the evaluation or simplification error, or [`Error::MethodPanicked`]. The
    /// method and `pool` are unchanged in that case.
    pub fn optimize_method(
        &self,
        pool: &mut ConstantPool,
        class_name: &str,
        method: &mut ProgramMethod,
        hierarchy: &ClassHierarchy,
        unit: &dyn InvocationUnit,
    ) -> Result<Option<SimplificationReport>> {
        let Some(code) = method.code.as_ref() else {
            return Ok(None);
        };
        let checkpoint = pool.len();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.simplify(pool, class_name, method, code, hierarchy, unit)
        }))
        .unwrap_or_else(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::MethodPanicked(format!(
                "{}.{}{}: {}",
                class_name, method.name, method.descriptor, reason
            )))
        });

        match outcome {
            Ok(Some((simplified, report))) => {
                method.code = Some(simplified);
                Ok(Some(report))
            }
            Ok(None) => {
                pool.truncate(checkpoint);
                Ok(None)
            }
            Err(error) => {
                pool.truncate(checkpoint);
                Err(error)
            }
        }
    }

    fn simplify(
        &self,
        pool: &mut ConstantPool,
        class_name: &str,
        method: &ProgramMethod,
        code: &CodeAttribute,
        hierarchy: &ClassHierarchy,
        unit: &dyn InvocationUnit,
    ) -> Result<Option<(CodeAttribute, SimplificationReport)>> {
        let evaluation = PartialEvaluator::new(unit)
            .with_max_visits(self.config.max_visits)
            .evaluate(pool, class_name, method, code)?;
        log::trace!(
            "{}.{}{}: {} of {} bytes traced",
            class_name,
            method.name,
            method.descriptor,
            evaluation.traced_count(),
            code.len()
        );
        let checker = SideEffectChecker::new(hierarchy, &self.config, &self.keep);
        EvaluationSimplifier::new(&self.config.simplifier, &checker, unit)
            .with_max_visits(self.config.max_visits)
            .simplify(pool, class_name, method, code, &evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{opcodes::*, InstructionAssembler},
        classfile::{ComputationalType, MethodAccessFlags},
        test::{object_pool, program_class},
    };

    fn class_with(name: &str, descriptor: &str, code: CodeAttribute) -> ClassPool {
        let mut pool = object_pool();
        let mut class = program_class("a/A", "java/lang/Object");
        class.methods.push(ProgramMethod::new(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            name,
            descriptor,
            Some(code),
        ));
        pool.add(class);
        pool
    }

    #[test]
    fn test_rounds_stop_when_nothing_changes() {
        let constants = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(2)
            .store(ComputationalType::Int, 0)
            .load(ComputationalType::Int, 0)
            .load(ComputationalType::Int, 0)
            .op(IMUL)
            .op(IRETURN)
            .finish(1, &constants)
            .unwrap();
        let mut pool = class_with("four", "()I", code);

        let config = OptimizerConfig {
            passes: 5,
            ..OptimizerConfig::code_only()
        };
        let stats = Optimizer::new(config, KeepMarker::new())
            .optimize(&mut pool)
            .unwrap();

        let code = pool.get("a/A").unwrap().method("four", "()I").unwrap().code.as_ref().unwrap();
        assert_eq!(code.code, vec![ICONST_4, IRETURN]);
        assert_eq!(stats.rounds, 2);
        assert_eq!(stats.methods_changed, 1);
        assert_eq!(stats.methods_skipped, 0);
        assert!(stats.bytes_saved() > 0);
    }

    #[test]
    fn test_failed_methods_are_skipped_untouched() {
        let constants = ConstantPool::new();
        let code = InstructionAssembler::new()
            .label("head")
            .iinc(0, 1)
            .branch(GOTO, "head")
            .finish(1, &constants)
            .unwrap();
        let original = code.clone();
        let mut pool = class_with("spin", "(I)V", code);

        let config = OptimizerConfig {
            max_visits: 0,
            ..OptimizerConfig::code_only()
        };
        let stats = Optimizer::new(config, KeepMarker::new())
            .optimize(&mut pool)
            .unwrap();

        assert_eq!(stats.methods_skipped, 1);
        let method = pool.get("a/A").unwrap().method("spin", "(I)V").unwrap();
        assert_eq!(method.code.as_ref().unwrap().code, original.code);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let constants = ConstantPool::new();
        let code = InstructionAssembler::new()
            .iconst(3)
            .iconst(4)
            .op(IADD)
            .op(IRETURN)
            .finish(0, &constants)
            .unwrap();
        let mut sequential = class_with("seven", "()I", code.clone());
        let mut parallel = class_with("seven", "()I", code);

        let run = |pool: &mut ClassPool, parallel: bool| {
            let config = OptimizerConfig {
                parallel,
                ..OptimizerConfig::default()
            };
            Optimizer::new(config, KeepMarker::new())
                .optimize(pool)
                .unwrap()
        };
        let a = run(&mut sequential, false);
        let b = run(&mut parallel, true);
        assert_eq!(a.methods_changed, b.methods_changed);
        assert_eq!(a.simplification, b.simplification);
        assert_eq!(a.classes_finalized, 1);
        let body = |pool: &ClassPool| {
            pool.get("a/A").unwrap().method("seven", "()I").unwrap().code.clone().unwrap().code
        };
        assert_eq!(body(&sequential), body(&parallel));
        assert_eq!(body(&parallel), vec![BIPUSH, 7, IRETURN]);
    }
}
