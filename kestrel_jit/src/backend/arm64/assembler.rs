//! AArch64 assembler over symbolic instructions, with label support.
//!
//! Instructions are appended to a buffer and labels are bound to instruction
//! indices. `finalize` lays the buffer out, resolves every label to a byte
//! offset and checks each reference against its branch range.

use std::fmt;

use kestrel_core::{KestrelError, KestrelResult};

use super::instr::Instr;

// =============================================================================
// Labels
// =============================================================================

/// A position in the code, bound once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl Label {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Label(id)
    }

    #[inline]
    pub const fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Reach of a PC-relative label reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationType {
    /// Branch26: ±128MB (B)
    Branch26,
    /// Branch19: ±1MB (B.cond, CBZ, CBNZ)
    Branch19,
    /// Branch14: ±32KB (TBZ, TBNZ)
    Branch14,
    /// ADR: ±1MB
    Adr21,
}

impl RelocationType {
    fn for_instr(instr: &Instr) -> Option<Self> {
        match instr {
            Instr::B { .. } => Some(RelocationType::Branch26),
            Instr::BCond { .. } | Instr::Cbz { .. } | Instr::Cbnz { .. } => {
                Some(RelocationType::Branch19)
            }
            Instr::Tbz { .. } | Instr::Tbnz { .. } => Some(RelocationType::Branch14),
            Instr::Adr { .. } => Some(RelocationType::Adr21),
            _ => None,
        }
    }

    /// Largest reachable distance in bytes.
    pub const fn range(self) -> i64 {
        match self {
            RelocationType::Branch26 => 1 << 27,
            RelocationType::Branch19 | RelocationType::Adr21 => 1 << 20,
            RelocationType::Branch14 => 1 << 15,
        }
    }
}

/// A label reference awaiting layout.
#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    /// Index of the referencing instruction.
    pub index: usize,
    /// Referenced label.
    pub label: Label,
    /// Reference kind.
    pub kind: RelocationType,
}

// =============================================================================
// Assembler
// =============================================================================

/// Instruction buffer with labels.
#[derive(Debug, Default)]
pub struct Assembler {
    instrs: Vec<Instr>,
    labels: Vec<Option<usize>>,
    relocations: Vec<Relocation>,
}

/// Laid-out code produced by [`Assembler::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledCode {
    /// Instructions in emission order.
    pub instructions: Vec<Instr>,
    /// Byte offset of each instruction.
    pub offsets: Vec<u32>,
    /// Byte offset of each label.
    pub label_offsets: Vec<u32>,
    /// Total size in bytes.
    pub code_size: u32,
}

impl AssembledCode {
    /// Byte offset just past the instruction at `index` (a call's return address).
    pub fn offset_after(&self, index: usize) -> u32 {
        self.offsets[index] + self.instructions[index].size_in_bytes()
    }
}

impl Assembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create with room for `cap` instructions.
    pub fn with_capacity(cap: usize) -> Self {
        Assembler {
            instrs: Vec::with_capacity(cap),
            labels: Vec::new(),
            relocations: Vec::new(),
        }
    }

    /// Index the next instruction will get.
    #[inline]
    pub fn position(&self) -> usize {
        self.instrs.len()
    }

    /// Instructions emitted so far.
    pub fn instructions(&self) -> &[Instr] {
        &self.instrs
    }

    /// Create a new unbound label.
    pub fn create_label(&mut self) -> Label {
        let id = self.labels.len() as u32;
        self.labels.push(None);
        Label::new(id)
    }

    /// Bind a label to the current position.
    pub fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.id() as usize];
        debug_assert!(slot.is_none(), "{label} bound twice");
        *slot = Some(self.instrs.len());
    }

    /// Whether `label` has been bound.
    pub fn is_bound(&self, label: Label) -> bool {
        self.labels[label.id() as usize].is_some()
    }

    /// Append an instruction.
    pub fn emit(&mut self, instr: Instr) {
        if let (Some(label), Some(kind)) = (instr.label(), RelocationType::for_instr(&instr)) {
            self.relocations.push(Relocation {
                index: self.instrs.len(),
                label,
                kind,
            });
        }
        self.instrs.push(instr);
    }

    // =========================================================================
    // Finalization
    // =========================================================================

    /// Lay out the code and resolve every label reference.
    pub fn finalize(self) -> KestrelResult<AssembledCode> {
        let mut offsets = Vec::with_capacity(self.instrs.len());
        let mut pc = 0u32;
        for instr in &self.instrs {
            offsets.push(pc);
            pc += instr.size_in_bytes();
        }
        let offset_of = |index: usize| offsets.get(index).copied().unwrap_or(pc);

        // Unreferenced unbound labels are harmless; references are checked below.
        let label_offsets = self
            .labels
            .iter()
            .map(|bound| bound.map_or(u32::MAX, offset_of))
            .collect();

        for reloc in &self.relocations {
            let label = reloc.label.id();
            let target =
                self.labels[label as usize].ok_or(KestrelError::UnboundLabel { label })?;
            let diff = i64::from(offset_of(target)) - i64::from(offsets[reloc.index]);
            if diff.abs() >= reloc.kind.range() {
                return Err(KestrelError::compile(
                    format!("branch to {} out of range ({diff} bytes)", reloc.label),
                    None,
                ));
            }
        }

        Ok(AssembledCode {
            instructions: self.instrs,
            offsets,
            label_offsets,
            code_size: pc,
        })
    }
}
