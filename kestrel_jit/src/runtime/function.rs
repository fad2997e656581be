//! JavaScript function objects as seen by the compiler.
//!
//! A function carries its installed code, the tier that code belongs to, a
//! tiering state saying whether an optimized compile is underway, and a cache
//! of on-stack-replacement entries keyed by loop offset.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::codegen::CompiledCode;

/// Execution tier of a function's installed code. Ordered by optimization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CodeTier {
    Interpreter,
    Baseline,
    MidTier,
    TopTier,
}

impl CodeTier {
    pub const fn is_optimized(self) -> bool {
        matches!(self, CodeTier::MidTier | CodeTier::TopTier)
    }

    pub const fn name(self) -> &'static str {
        match self {
            CodeTier::Interpreter => "interpreter",
            CodeTier::Baseline => "baseline",
            CodeTier::MidTier => "mid-tier",
            CodeTier::TopTier => "top-tier",
        }
    }
}

impl fmt::Display for CodeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether an optimized compile for the function is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieringState {
    None,
    /// A job is queued or running.
    InProgress,
}

#[derive(Debug)]
struct FunctionState {
    tier: CodeTier,
    code: Option<Arc<CompiledCode>>,
    /// Bumped on every code change.
    code_version: u64,
    tiering: TieringState,
    osr_cache: FxHashMap<u32, Arc<CompiledCode>>,
}

/// A function that can be tiered up.
pub struct JsFunction {
    name: String,
    state: Mutex<FunctionState>,
}

impl JsFunction {
    /// A function running in the interpreter.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_tier(name, CodeTier::Interpreter)
    }

    pub fn with_tier(name: impl Into<String>, tier: CodeTier) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(FunctionState {
                tier,
                code: None,
                code_version: 0,
                tiering: TieringState::None,
                osr_cache: FxHashMap::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tier(&self) -> CodeTier {
        self.state.lock().tier
    }

    pub fn code(&self) -> Option<Arc<CompiledCode>> {
        self.state.lock().code.clone()
    }

    pub fn code_version(&self) -> u64 {
        self.state.lock().code_version
    }

    /// Whether code of `tier` or better is installed.
    pub fn has_code_at_least(&self, tier: CodeTier) -> bool {
        self.state.lock().tier >= tier
    }

    pub fn has_optimized_code(&self) -> bool {
        self.state.lock().tier.is_optimized()
    }

    pub fn tiering_state(&self) -> TieringState {
        self.state.lock().tiering
    }

    pub fn set_tiering_state(&self, tiering: TieringState) {
        self.state.lock().tiering = tiering;
    }

    /// Install `code` as the function's entry code.
    pub fn install_code(&self, tier: CodeTier, code: Arc<CompiledCode>) {
        let mut state = self.state.lock();
        state.tier = tier;
        state.code = Some(code);
        state.code_version += 1;
        state.tiering = TieringState::None;
    }

    /// Drop optimized code and fall back to `tier`, as a deopt would.
    pub fn reset_code(&self, tier: CodeTier) {
        let mut state = self.state.lock();
        state.tier = tier;
        state.code = None;
        state.code_version += 1;
    }

    pub fn install_osr_code(&self, osr_offset: u32, code: Arc<CompiledCode>) {
        let mut state = self.state.lock();
        state.osr_cache.insert(osr_offset, code);
        state.tiering = TieringState::None;
    }

    pub fn osr_code(&self, osr_offset: u32) -> Option<Arc<CompiledCode>> {
        self.state.lock().osr_cache.get(&osr_offset).cloned()
    }

    /// Forget the pending compile after its job was thrown away.
    pub fn restore_function_code(&self) {
        self.state.lock().tiering = TieringState::None;
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("JsFunction")
            .field("name", &self.name)
            .field("tier", &state.tier)
            .field("code_version", &state.code_version)
            .field("tiering", &state.tiering)
            .field("osr_entries", &state.osr_cache.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
