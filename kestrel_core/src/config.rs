//! Compiler configuration.
//!
//! All settings are read once when a dispatcher or selector is constructed
//! and never change afterwards. Every struct deserializes with defaults for
//! missing fields, so a partial JSON document is a valid configuration.

use crate::error::{KestrelError, KestrelResult};
use serde::{Deserialize, Serialize};

/// Upper bound on background compile threads accepted by validation.
pub const MAX_THREADS_LIMIT: usize = 256;

// =============================================================================
// Dispatcher
// =============================================================================

/// Settings for the background compile dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Run compile jobs on background threads at all.
    pub concurrent_recompilation: bool,
    /// Maximum number of concurrent worker threads (0 = no cap beyond
    /// queue length plus running workers).
    pub max_threads: usize,
    /// Artificial delay before each job, in milliseconds. Testing only.
    pub recompilation_delay_ms: u64,
    /// Input queue capacity (0 = unbounded).
    pub queue_capacity: usize,
    /// Log every queue and install step at info level.
    pub trace_concurrent_recompilation: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrent_recompilation: true,
            max_threads: 4,
            recompilation_delay_ms: 0,
            queue_capacity: 8,
            trace_concurrent_recompilation: false,
        }
    }
}

impl DispatcherConfig {
    /// Set the worker thread cap.
    #[must_use]
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set the input queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the per-job artificial delay.
    #[must_use]
    pub fn with_recompilation_delay_ms(mut self, delay_ms: u64) -> Self {
        self.recompilation_delay_ms = delay_ms;
        self
    }

    /// Enable or disable dispatcher tracing.
    #[must_use]
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.trace_concurrent_recompilation = enabled;
        self
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::Config`] if `max_threads` exceeds
    /// [`MAX_THREADS_LIMIT`].
    pub fn validate(&self) -> KestrelResult<()> {
        if self.max_threads > MAX_THREADS_LIMIT {
            return Err(KestrelError::config(format!(
                "max_threads {} exceeds limit {MAX_THREADS_LIMIT}",
                self.max_threads
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Switch Cost Model
// =============================================================================

/// Cost model deciding between a jump table and a binary search of compares.
///
/// A table is chosen when
/// `table_space + weight * table_time <= lookup_space + weight * lookup_time`
/// and the value range fits `max_table_range`. The constants are heuristics
/// tuned per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchCostModel {
    /// Fixed space cost of a table dispatch sequence.
    pub table_space_base: u64,
    /// Space cost per value in the table range.
    pub table_space_per_value: u64,
    /// Time cost of a table dispatch.
    pub table_time: u64,
    /// Fixed space cost of a compare tree.
    pub lookup_space_base: u64,
    /// Space cost per case of a compare tree.
    pub lookup_space_per_case: u64,
    /// Time cost per case of a compare tree.
    pub lookup_time_per_case: u64,
    /// Weight of time relative to space.
    pub time_weight: u64,
    /// Largest value range a table may span.
    pub max_table_range: u64,
}

impl Default for SwitchCostModel {
    fn default() -> Self {
        Self::aarch64()
    }
}

impl SwitchCostModel {
    /// Constants tuned for AArch64 (`adr` + `ldr` + `br` dispatch).
    #[must_use]
    pub const fn aarch64() -> Self {
        Self {
            table_space_base: 4,
            table_space_per_value: 1,
            table_time: 3,
            lookup_space_base: 3,
            lookup_space_per_case: 2,
            lookup_time_per_case: 1,
            time_weight: 3,
            max_table_range: 2 << 16,
        }
    }

    /// Constants tuned for RISC-V, where table entries take two words.
    #[must_use]
    pub const fn riscv() -> Self {
        Self {
            table_space_base: 10,
            table_space_per_value: 2,
            table_time: 3,
            lookup_space_base: 2,
            lookup_space_per_case: 2,
            lookup_time_per_case: 1,
            time_weight: 3,
            max_table_range: 2 << 16,
        }
    }

    /// Space cost of a table covering `value_range` values.
    #[must_use]
    pub const fn table_space_cost(&self, value_range: u64) -> u64 {
        self.table_space_base
            .saturating_add(self.table_space_per_value.saturating_mul(value_range))
    }

    /// Space cost of a compare tree over `case_count` cases.
    #[must_use]
    pub const fn lookup_space_cost(&self, case_count: u64) -> u64 {
        self.lookup_space_base
            .saturating_add(self.lookup_space_per_case.saturating_mul(case_count))
    }

    /// Time cost of a compare tree over `case_count` cases.
    #[must_use]
    pub const fn lookup_time_cost(&self, case_count: u64) -> u64 {
        self.lookup_time_per_case.saturating_mul(case_count)
    }

    /// Weighted total for a table.
    #[must_use]
    pub const fn table_cost(&self, value_range: u64) -> u64 {
        self.table_space_cost(value_range)
            .saturating_add(self.time_weight.saturating_mul(self.table_time))
    }

    /// Weighted total for a compare tree.
    #[must_use]
    pub const fn lookup_cost(&self, case_count: u64) -> u64 {
        self.lookup_space_cost(case_count)
            .saturating_add(self.time_weight.saturating_mul(self.lookup_time_cost(case_count)))
    }

    /// Whether a switch with these parameters should be lowered to a table.
    ///
    /// `value_range` is `max - min + 1`.
    #[must_use]
    pub fn prefers_table(&self, case_count: u64, value_range: u64, min_value: i32) -> bool {
        case_count > 0
            && self.table_cost(value_range) <= self.lookup_cost(case_count)
            && min_value > i32::MIN
            && value_range <= self.max_table_range
    }
}

// =============================================================================
// Code Generation
// =============================================================================

/// Settings for instruction selection and code generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// Switch lowering heuristics.
    pub switch_cost_model: SwitchCostModel,
    /// Allow jump tables at all.
    pub enable_jump_tables: bool,
    /// Emit extra runtime assertions (object type checks before bounds checks).
    pub debug_code: bool,
    /// Print generated code after each compile. Forces synchronous compiles.
    pub print_code: bool,
    /// Log register allocation decisions. Forces synchronous compiles.
    pub trace_regalloc: bool,
    /// Spill slot limit before a job bails out.
    pub max_spill_slots: u32,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            switch_cost_model: SwitchCostModel::aarch64(),
            enable_jump_tables: true,
            debug_code: cfg!(debug_assertions),
            print_code: false,
            trace_regalloc: false,
            max_spill_slots: 1024,
        }
    }
}

// =============================================================================
// Compiler Configuration
// =============================================================================

/// Top-level configuration aggregating dispatcher and codegen settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Dispatcher settings.
    pub dispatcher: DispatcherConfig,
    /// Code generation settings.
    pub codegen: CodegenConfig,
}

impl CompilerConfig {
    /// Parse a configuration from JSON and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::Config`] on malformed JSON or out-of-range values.
    pub fn from_json(text: &str) -> KestrelResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| KestrelError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> KestrelResult<()> {
        self.dispatcher.validate()?;
        if self.codegen.switch_cost_model.max_table_range == 0 {
            return Err(KestrelError::config("max_table_range must be non-zero"));
        }
        Ok(())
    }

    /// Whether compile jobs may run off the main thread.
    ///
    /// Tracing flags write to shared output from inside the job, so they
    /// force synchronous compilation.
    #[must_use]
    pub fn concurrency_allowed(&self) -> bool {
        self.dispatcher.concurrent_recompilation
            && !self.codegen.print_code
            && !self.codegen.trace_regalloc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert!(config.concurrent_recompilation);
        assert_eq!(config.max_threads, 4);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.recompilation_delay_ms, 0);
    }

    #[test]
    fn test_dispatcher_builders() {
        let config = DispatcherConfig::default()
            .with_max_threads(2)
            .with_queue_capacity(0)
            .with_recompilation_delay_ms(5)
            .with_tracing(true);
        assert_eq!(config.max_threads, 2);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.recompilation_delay_ms, 5);
        assert!(config.trace_concurrent_recompilation);
    }

    #[test]
    fn test_max_threads_validation() {
        let config = DispatcherConfig::default().with_max_threads(MAX_THREADS_LIMIT + 1);
        assert!(matches!(config.validate(), Err(KestrelError::Config { .. })));
    }

    #[test]
    fn test_switch_dense_prefers_table() {
        let model = SwitchCostModel::aarch64();
        // 4 + 6 + 9 = 19 vs 3 + 10 + 15 = 28
        assert_eq!(model.table_cost(6), 19);
        assert_eq!(model.lookup_cost(5), 28);
        assert!(model.prefers_table(5, 6, 0));
    }

    #[test]
    fn test_switch_sparse_prefers_lookup() {
        let model = SwitchCostModel::aarch64();
        assert!(model.table_cost(1_000_000) > model.lookup_cost(3));
        assert!(!model.prefers_table(3, 1_000_000, 0));
    }

    #[test]
    fn test_switch_gates() {
        let model = SwitchCostModel::aarch64();
        assert!(!model.prefers_table(0, 0, 0));
        assert!(!model.prefers_table(5, 6, i32::MIN));
        let wide = SwitchCostModel {
            max_table_range: 4,
            ..model
        };
        assert!(!wide.prefers_table(5, 6, 0));
    }

    #[test]
    fn test_riscv_model_is_stricter() {
        let model = SwitchCostModel::riscv();
        // 10 + 12 + 9 = 31 vs 2 + 10 + 15 = 27
        assert!(!model.prefers_table(5, 6, 0));
        assert!(model.prefers_table(8, 8, 0));
    }

    #[test]
    fn test_cost_saturates() {
        let model = SwitchCostModel::aarch64();
        assert_eq!(model.table_space_cost(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            CompilerConfig::from_json(r#"{ "dispatcher": { "max_threads": 2 } }"#).unwrap();
        assert_eq!(config.dispatcher.max_threads, 2);
        assert_eq!(config.dispatcher.queue_capacity, 8);
        assert_eq!(config.codegen.switch_cost_model, SwitchCostModel::aarch64());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(CompilerConfig::from_json("{ not json").is_err());
        assert!(
            CompilerConfig::from_json(r#"{ "dispatcher": { "max_threads": 100000 } }"#).is_err()
        );
    }

    #[test]
    fn test_tracing_disables_concurrency() {
        let mut config = CompilerConfig::default();
        assert!(config.concurrency_allowed());
        config.codegen.print_code = true;
        assert!(!config.concurrency_allowed());
    }
}
