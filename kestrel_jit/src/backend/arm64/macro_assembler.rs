//! Macro-assembler used by node code generation.
//!
//! Adds to the plain [`Assembler`]:
//! - immediate-aware helpers that fall back to a scratch register
//! - deferred (out-of-line) code, emitted after the main body
//! - eager deopt exits, one per (node, reason), emitted after deferred code
//! - safepoints and lazy deopt exits recorded at calls
//!
//! ```text
//!   +----------------------+
//!   | main body            |  straight-line fast paths
//!   +----------------------+
//!   | deferred code        |  slow paths, each ends with a branch back
//!   +----------------------+
//!   | eager deopt exits    |  bl DeoptimizationEntry_Eager
//!   | lazy deopt exits     |  bl DeoptimizationEntry_Lazy
//!   +----------------------+
//! ```

use std::collections::VecDeque;

use kestrel_core::KestrelResult;
use rustc_hash::FxHashMap;

use super::assembler::{AssembledCode, Assembler, Label};
use super::condition::Condition;
use super::immediates::{is_arithmetic_immediate, is_load_store_offset};
use super::instr::{Instr, Operand};
use super::registers::{Gpr, GprSet, MemOperand, OperandSize};
use crate::ir::{DeoptReason, NodeId};
use crate::runtime::entries::{Builtin, CallTarget};
use crate::runtime::layout::{RootIndex, TAGGED_SIZE};

/// Out-of-line code generator.
pub type DeferredFn = Box<dyn FnOnce(&mut MacroAssembler)>;

/// Byte offset from the frame pointer of spill slot `slot`.
#[inline]
pub const fn spill_slot_operand(slot: u32) -> MemOperand {
    MemOperand::frame(-(TAGGED_SIZE * (slot as i32 + 1)))
}

struct DeferredCode {
    label: Label,
    node: Option<NodeId>,
    snapshot: GprSet,
    emit: DeferredFn,
}

/// Whether a deopt exit is reached by a branch or by returning from a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeoptKind {
    Eager,
    Lazy,
}

/// A deopt exit in the finished code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeoptExit {
    pub kind: DeoptKind,
    /// Node whose deopt info describes the frames.
    pub node: NodeId,
    /// Reason for eager exits.
    pub reason: Option<DeoptReason>,
    /// Offset of the exit stub.
    pub exit_offset: u32,
    /// Return address of the call, for lazy exits.
    pub call_return_offset: Option<u32>,
}

/// A call site at which the GC may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Safepoint {
    /// Return address of the call.
    pub pc_offset: u32,
    pub node: NodeId,
    /// Registers saved on the stack around the call.
    pub pushed_registers: GprSet,
    /// Index into the deopt exits of the lazy exit for this call.
    pub lazy_deopt: Option<usize>,
}

/// Output of [`MacroAssembler::finish`].
#[derive(Debug, Clone)]
pub struct MacroOutput {
    pub code: AssembledCode,
    pub safepoints: Vec<Safepoint>,
    pub deopt_exits: Vec<DeoptExit>,
    /// `(offset, node)` at the start of each node's code.
    pub source_positions: Vec<(u32, NodeId)>,
}

struct PendingExit {
    label: Label,
    kind: DeoptKind,
    node: NodeId,
    reason: Option<DeoptReason>,
    call_index: Option<usize>,
}

struct PendingSafepoint {
    call_index: usize,
    node: NodeId,
    pushed_registers: GprSet,
    lazy_exit: Option<usize>,
}

/// Macro-assembler.
pub struct MacroAssembler {
    asm: Assembler,
    deferred: VecDeque<DeferredCode>,
    exits: Vec<PendingExit>,
    eager_exit_labels: FxHashMap<(NodeId, DeoptReason), Label>,
    safepoints: Vec<PendingSafepoint>,
    source_positions: Vec<(usize, NodeId)>,
    scratch_available: GprSet,
    pushed: GprSet,
    current_node: Option<NodeId>,
    current_snapshot: GprSet,
}

impl Default for MacroAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroAssembler {
    pub fn new() -> Self {
        Self {
            asm: Assembler::new(),
            deferred: VecDeque::new(),
            exits: Vec::new(),
            eager_exit_labels: FxHashMap::default(),
            safepoints: Vec::new(),
            source_positions: Vec::new(),
            scratch_available: GprSet::SCRATCH,
            pushed: GprSet::EMPTY,
            current_node: None,
            current_snapshot: GprSet::EMPTY,
        }
    }

    /// Instructions emitted so far.
    pub fn instructions(&self) -> &[Instr] {
        self.asm.instructions()
    }

    pub fn create_label(&mut self) -> Label {
        self.asm.create_label()
    }

    pub fn bind(&mut self, label: Label) {
        self.asm.bind(label);
    }

    pub fn emit(&mut self, instr: Instr) {
        match &instr {
            Instr::Push { regs } => self.pushed = self.pushed.union(*regs),
            Instr::Pop { regs } => self.pushed = self.pushed.difference(*regs),
            _ => {}
        }
        self.asm.emit(instr);
    }

    // =========================================================================
    // Node Context
    // =========================================================================

    /// Start emitting code for `node`, whose deferred calls must save `snapshot`.
    pub fn set_current_node(&mut self, node: NodeId, snapshot: GprSet) {
        self.current_node = Some(node);
        self.current_snapshot = snapshot;
        self.source_positions.push((self.asm.position(), node));
    }

    pub fn current_node(&self) -> Option<NodeId> {
        self.current_node
    }

    /// Live registers a deferred call of the current node must preserve.
    pub fn register_snapshot(&self) -> GprSet {
        self.current_snapshot
    }

    /// Run `f` with a scratch register (`x16`/`x17`) reserved.
    pub fn with_scratch<R>(&mut self, f: impl FnOnce(&mut Self, Gpr) -> R) -> R {
        let Some(reg) = self.scratch_available.first() else {
            panic!("macro-assembler scratch registers exhausted");
        };
        self.scratch_available.remove(reg);
        let result = f(self, reg);
        self.scratch_available.insert(reg);
        result
    }

    // =========================================================================
    // Data Processing
    // =========================================================================

    pub fn add(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Add {
            size,
            rd,
            rn,
            op,
            set_flags: false,
        });
    }

    pub fn adds(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Add {
            size,
            rd,
            rn,
            op,
            set_flags: true,
        });
    }

    pub fn sub(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Sub {
            size,
            rd,
            rn,
            op,
            set_flags: false,
        });
    }

    pub fn subs(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Sub {
            size,
            rd,
            rn,
            op,
            set_flags: true,
        });
    }

    pub fn cmp(&mut self, size: OperandSize, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Cmp { size, rn, op });
    }

    pub fn tst(&mut self, size: OperandSize, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Tst { size, rn, op });
    }

    pub fn and(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::And { size, rd, rn, op });
    }

    pub fn orr(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Orr { size, rd, rn, op });
    }

    pub fn eor(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Eor { size, rd, rn, op });
    }

    pub fn lsl(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Lsl { size, rd, rn, op });
    }

    pub fn lsr(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Lsr { size, rd, rn, op });
    }

    pub fn asr(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, op: impl Into<Operand>) {
        let op = op.into();
        self.emit(Instr::Asr { size, rd, rn, op });
    }

    pub fn mvn(&mut self, size: OperandSize, rd: Gpr, rm: Gpr) {
        self.emit(Instr::Mvn { size, rd, rm });
    }

    pub fn negs(&mut self, size: OperandSize, rd: Gpr, rm: Gpr) {
        self.emit(Instr::Neg {
            size,
            rd,
            rm,
            set_flags: true,
        });
    }

    pub fn smull(&mut self, rd: Gpr, rn: Gpr, rm: Gpr) {
        self.emit(Instr::Smull { rd, rn, rm });
    }

    pub fn sdiv(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, rm: Gpr) {
        self.emit(Instr::Sdiv { size, rd, rn, rm });
    }

    pub fn msub(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, rm: Gpr, ra: Gpr) {
        self.emit(Instr::Msub {
            size,
            rd,
            rn,
            rm,
            ra,
        });
    }

    pub fn sxtb(&mut self, size: OperandSize, rd: Gpr, rn: Gpr) {
        self.emit(Instr::Sxtb { size, rd, rn });
    }

    pub fn sxth(&mut self, size: OperandSize, rd: Gpr, rn: Gpr) {
        self.emit(Instr::Sxth { size, rd, rn });
    }

    pub fn sxtw(&mut self, rd: Gpr, rn: Gpr) {
        self.emit(Instr::Sxtw { rd, rn });
    }

    pub fn csel(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, rm: Gpr, cond: Condition) {
        self.emit(Instr::Csel {
            size,
            rd,
            rn,
            rm,
            cond,
        });
    }

    /// Register move; nothing is emitted when `rd == rm`.
    pub fn mov(&mut self, size: OperandSize, rd: Gpr, rm: Gpr) {
        if rd != rm {
            self.emit(Instr::Mov { size, rd, rm });
        }
    }

    pub fn mov_imm(&mut self, size: OperandSize, rd: Gpr, imm: i64) {
        self.emit(Instr::MovImm { size, rd, imm });
    }

    /// `cmp sp, rm`
    pub fn cmp_sp(&mut self, rm: Gpr) {
        self.emit(Instr::CmpSp { rm });
    }

    /// `cmp rn, #imm`, using `cmn` or a scratch register when `imm` does not encode.
    pub fn cmp_imm(&mut self, size: OperandSize, rn: Gpr, imm: i64) {
        if is_arithmetic_immediate(imm) {
            self.emit(Instr::Cmp {
                size,
                rn,
                op: Operand::Imm(imm),
            });
        } else if is_arithmetic_immediate(-imm) {
            self.emit(Instr::Cmn {
                size,
                rn,
                op: Operand::Imm(-imm),
            });
        } else {
            self.with_scratch(|masm, scratch| {
                masm.mov_imm(size, scratch, imm);
                masm.cmp(size, rn, scratch);
            });
        }
    }

    /// `add rd, rn, #imm` (or `sub` with the negated value), optionally setting flags.
    pub fn add_imm(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, imm: i64, set_flags: bool) {
        if is_arithmetic_immediate(imm) {
            self.emit(Instr::Add {
                size,
                rd,
                rn,
                op: Operand::Imm(imm),
                set_flags,
            });
        } else if is_arithmetic_immediate(-imm) {
            self.emit(Instr::Sub {
                size,
                rd,
                rn,
                op: Operand::Imm(-imm),
                set_flags,
            });
        } else {
            self.with_scratch(|masm, scratch| {
                masm.mov_imm(size, scratch, imm);
                masm.emit(Instr::Add {
                    size,
                    rd,
                    rn,
                    op: Operand::Reg(scratch),
                    set_flags,
                });
            });
        }
    }

    /// `sub rd, rn, #imm`, see [`Self::add_imm`].
    pub fn sub_imm(&mut self, size: OperandSize, rd: Gpr, rn: Gpr, imm: i64, set_flags: bool) {
        self.add_imm(size, rd, rn, -imm, set_flags);
    }

    // =========================================================================
    // Memory
    // =========================================================================

    pub fn ldr(&mut self, size: OperandSize, rt: Gpr, mem: MemOperand) {
        self.emit(Instr::Ldr { size, rt, mem });
    }

    pub fn str(&mut self, size: OperandSize, rt: Gpr, mem: MemOperand) {
        self.emit(Instr::Str { size, rt, mem });
    }

    /// Load an entry of the roots table.
    pub fn load_root(&mut self, rd: Gpr, root: RootIndex) {
        self.ldr(OperandSize::X, rd, MemOperand::new(Gpr::ROOT, root.offset()));
    }

    /// Load a field of a heap object.
    pub fn load_field(&mut self, size: OperandSize, rd: Gpr, object: Gpr, offset: i32) {
        let mem = MemOperand::field(object, offset);
        if is_load_store_offset(i64::from(mem.offset), size.bytes()) {
            self.ldr(size, rd, mem);
        } else {
            self.with_scratch(|masm, scratch| {
                masm.add_imm(OperandSize::X, scratch, object, i64::from(mem.offset), false);
                masm.ldr(size, rd, MemOperand::new(scratch, 0));
            });
        }
    }

    /// Store a field of a heap object, without barrier.
    pub fn store_field(&mut self, size: OperandSize, value: Gpr, object: Gpr, offset: i32) {
        let mem = MemOperand::field(object, offset);
        if is_load_store_offset(i64::from(mem.offset), size.bytes()) {
            self.str(size, value, mem);
        } else {
            self.with_scratch(|masm, scratch| {
                masm.add_imm(OperandSize::X, scratch, object, i64::from(mem.offset), false);
                masm.str(size, value, MemOperand::new(scratch, 0));
            });
        }
    }

    /// Load a tagged field of a heap object.
    pub fn load_tagged_field(&mut self, rd: Gpr, object: Gpr, offset: i32) {
        self.load_field(OperandSize::X, rd, object, offset);
    }

    /// Store a tagged field of a heap object, without barrier.
    pub fn store_tagged_field(&mut self, value: Gpr, object: Gpr, offset: i32) {
        self.store_field(OperandSize::X, value, object, offset);
    }

    pub fn push(&mut self, regs: GprSet) {
        if !regs.is_empty() {
            self.emit(Instr::Push { regs });
        }
    }

    pub fn pop(&mut self, regs: GprSet) {
        if !regs.is_empty() {
            self.emit(Instr::Pop { regs });
        }
    }

    pub fn enter_frame(&mut self, frame_size: u32) {
        self.emit(Instr::EnterFrame { frame_size });
    }

    pub fn leave_frame(&mut self) {
        self.emit(Instr::LeaveFrame);
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    pub fn b(&mut self, label: Label) {
        self.emit(Instr::B { label });
    }

    pub fn b_cond(&mut self, cond: Condition, label: Label) {
        self.emit(Instr::BCond { cond, label });
    }

    pub fn cbz(&mut self, size: OperandSize, rt: Gpr, label: Label) {
        self.emit(Instr::Cbz { size, rt, label });
    }

    pub fn cbnz(&mut self, size: OperandSize, rt: Gpr, label: Label) {
        self.emit(Instr::Cbnz { size, rt, label });
    }

    pub fn tbz(&mut self, rt: Gpr, bit: u8, label: Label) {
        self.emit(Instr::Tbz { rt, bit, label });
    }

    pub fn tbnz(&mut self, rt: Gpr, bit: u8, label: Label) {
        self.emit(Instr::Tbnz { rt, bit, label });
    }

    pub fn adr(&mut self, rd: Gpr, label: Label) {
        self.emit(Instr::Adr { rd, label });
    }

    pub fn br(&mut self, rn: Gpr) {
        self.emit(Instr::Br { rn });
    }

    pub fn ret(&mut self) {
        self.emit(Instr::Ret);
    }

    pub fn brk(&mut self, imm: u16) {
        self.emit(Instr::Brk { imm });
    }

    /// Call `target` from the current node.
    ///
    /// Records a safepoint covering the registers currently pushed and, when
    /// `lazy_deopt` is set, a lazy deopt exit for the call's return address.
    pub fn call(&mut self, target: CallTarget, lazy_deopt: bool) {
        let Some(node) = self.current_node else {
            unreachable!("call emitted outside of a node");
        };
        let call_index = self.asm.position();
        self.emit(Instr::Bl { target });
        let lazy_exit = lazy_deopt.then(|| {
            let label = self.asm.create_label();
            self.exits.push(PendingExit {
                label,
                kind: DeoptKind::Lazy,
                node,
                reason: None,
                call_index: Some(call_index),
            });
            self.exits.len() - 1
        });
        self.safepoints.push(PendingSafepoint {
            call_index,
            node,
            pushed_registers: self.pushed,
            lazy_exit,
        });
    }

    // =========================================================================
    // Deferred Code
    // =========================================================================

    /// Branch to out-of-line code produced by `f` when `cond` holds.
    ///
    /// `f` runs after the main body with the current node and its register
    /// snapshot restored.
    pub fn jump_to_deferred_if(
        &mut self,
        cond: Condition,
        f: impl FnOnce(&mut MacroAssembler) + 'static,
    ) {
        let label = self.asm.create_label();
        self.b_cond(cond, label);
        self.deferred.push_back(DeferredCode {
            label,
            node: self.current_node,
            snapshot: self.current_snapshot,
            emit: Box::new(f),
        });
    }

    // =========================================================================
    // Deoptimization
    // =========================================================================

    fn eager_exit_label(&mut self, reason: DeoptReason) -> Label {
        let Some(node) = self.current_node else {
            unreachable!("eager deopt emitted outside of a node");
        };
        if let Some(label) = self.eager_exit_labels.get(&(node, reason)) {
            return *label;
        }
        let label = self.asm.create_label();
        self.eager_exit_labels.insert((node, reason), label);
        self.exits.push(PendingExit {
            label,
            kind: DeoptKind::Eager,
            node,
            reason: Some(reason),
            call_index: None,
        });
        label
    }

    /// Deoptimize the current node if `cond` holds.
    pub fn emit_eager_deopt_if(&mut self, cond: Condition, reason: DeoptReason) {
        let label = self.eager_exit_label(reason);
        self.b_cond(cond, label);
    }

    /// Deoptimize the current node unconditionally.
    pub fn emit_eager_deopt(&mut self, reason: DeoptReason) {
        let label = self.eager_exit_label(reason);
        self.b(label);
    }

    /// Deoptimize the current node unless `reg` holds a Smi.
    pub fn emit_eager_deopt_if_not_smi(&mut self, reg: Gpr, reason: DeoptReason) {
        let label = self.eager_exit_label(reason);
        self.tbnz(reg, 0, label);
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Emit deferred code and deopt exits, then lay out the code.
    pub fn finish(mut self) -> KestrelResult<MacroOutput> {
        while let Some(deferred) = self.deferred.pop_front() {
            self.current_node = deferred.node;
            self.current_snapshot = deferred.snapshot;
            self.asm.bind(deferred.label);
            (deferred.emit)(&mut self);
            debug_assert!(self.pushed.is_empty(), "deferred code left registers pushed");
        }

        let mut exit_indices = Vec::with_capacity(self.exits.len());
        for exit in &self.exits {
            self.asm.bind(exit.label);
            exit_indices.push(self.asm.position());
            let builtin = match exit.kind {
                DeoptKind::Eager => Builtin::DeoptimizationEntryEager,
                DeoptKind::Lazy => Builtin::DeoptimizationEntryLazy,
            };
            self.asm.emit(Instr::Bl {
                target: CallTarget::Builtin(builtin),
            });
        }

        let code = self.asm.finalize()?;

        let deopt_exits = self
            .exits
            .iter()
            .zip(&exit_indices)
            .map(|(exit, &index)| DeoptExit {
                kind: exit.kind,
                node: exit.node,
                reason: exit.reason,
                exit_offset: code.offsets[index],
                call_return_offset: exit.call_index.map(|call| code.offset_after(call)),
            })
            .collect();

        let safepoints = self
            .safepoints
            .iter()
            .map(|sp| Safepoint {
                pc_offset: code.offset_after(sp.call_index),
                node: sp.node,
                pushed_registers: sp.pushed_registers,
                lazy_deopt: sp.lazy_exit,
            })
            .collect();

        let source_positions = self
            .source_positions
            .iter()
            .map(|&(index, node)| (code.offsets.get(index).copied().unwrap_or(code.code_size), node))
            .collect();

        Ok(MacroOutput {
            code,
            safepoints,
            deopt_exits,
            source_positions,
        })
    }
}
