//! Configuration for the optimizer.
//!
//! [`OptimizerConfig`] controls which passes run, how often, and how conservatively the
//! simplifier treats instructions that may throw. [`SimplifierOptions`] is threaded into the
//! evaluation simplifier explicitly and selects its individual rewrites.

use rustc_hash::FxHashSet;

use crate::{classfile::MemberRef, evaluation::DEFAULT_MAX_VISITS};

/// Rewrites performed by the evaluation simplifier.
#[derive(Debug, Clone)]
pub struct SimplifierOptions {
    /// Replace instructions producing a known constant by a constant push.
    pub fold_constants: bool,

    /// Replace loads of a value already held by a lower variable slot by a load of that slot.
    pub alias_loads: bool,

    /// Replace conditional branches and switches with a single feasible target by a `goto`.
    pub simplify_branches: bool,

    /// Log the necessity marks of every simplified method at `trace` level.
    pub dump_marks: bool,
}

impl Default for SimplifierOptions {
    fn default() -> Self {
        Self {
            fold_constants: true,
            alias_loads: true,
            simplify_branches: true,
            dump_marks: false,
        }
    }
}

/// Configuration for the optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of evaluation/simplification rounds (default: 2).
    ///
    /// Rounds stop early once a round changes no method.
    pub passes: usize,

    /// Enable partial evaluation and code simplification.
    pub simplify_code: bool,

    /// Enable marking leaf classes `final`.
    pub finalize_classes: bool,

    /// Enable making methods `private` when only their own class calls them.
    pub privatize_methods: bool,

    /// Enable retargeting interfaces with a single implementation to that implementation.
    pub inline_single_implementations: bool,

    /// Treat instructions that may throw as side effects (default: true).
    ///
    /// When disabled, a division by an unknown divisor, an array access or a `getfield` on a
    /// possibly-null receiver may be removed if its result is unused, which removes the
    /// exception it could have thrown.
    pub conservative: bool,

    /// Process classes in parallel using rayon (default: false).
    pub parallel: bool,

    /// Maximum evaluations of a single instruction before a method is given up.
    pub max_visits: usize,

    /// Rewrites of the evaluation simplifier.
    pub simplifier: SimplifierOptions,

    /// Methods whose invocation has no side effects, as `class.name descriptor` keys.
    ///
    /// Filled by [`OptimizerConfig::assume_no_side_effects`].
    pub side_effect_free: FxHashSet<String>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            passes: 2,
            simplify_code: true,
            finalize_classes: true,
            privatize_methods: true,
            inline_single_implementations: true,
            conservative: true,
            parallel: false,
            max_visits: DEFAULT_MAX_VISITS,
            simplifier: SimplifierOptions::default(),
            side_effect_free: FxHashSet::default(),
        }
    }
}

impl OptimizerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that only simplifies code, without structural passes.
    #[must_use]
    pub fn code_only() -> Self {
        Self {
            finalize_classes: false,
            privatize_methods: false,
            inline_single_implementations: false,
            ..Self::default()
        }
    }

    /// Declares that invoking `class.name descriptor` has no side effects.
    ///
    /// Invocations of such methods may be removed when their result is unused.
    #[must_use]
    pub fn assume_no_side_effects(mut self, class: &str, name: &str, descriptor: &str) -> Self {
        self.side_effect_free
            .insert(format!("{class}.{name}{descriptor}"));
        self
    }

    /// Returns `true` if invocations of `method` are declared free of side effects.
    #[must_use]
    pub fn is_side_effect_free(&self, method: &MemberRef) -> bool {
        self.side_effect_free.contains(&format!(
            "{}.{}{}",
            method.class, method.name, method.descriptor
        ))
    }

    /// Returns true if any pass is enabled.
    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.simplify_code
            || self.finalize_classes
            || self.privatize_methods
            || self.inline_single_implementations
    }
}
