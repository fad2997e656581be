//! Opcodes and their static shape.
//!
//! Every opcode is declared once in the table below. The table fixes the
//! result representation, side effects, input count and representations, the
//! payload kind, and whether the opcode ends a block.

use std::fmt;

use super::deopt::DeoptReason;
use super::node::{BlockId, SwitchId};
use super::properties::{OpProperties, ValueRepresentation};
use crate::runtime::entries::RuntimeFunction;

/// Number of inputs an opcode takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCount {
    /// Exactly this many.
    Fixed(u8),
    /// Determined by the payload (`CallRuntime` argument count).
    Variadic,
}

/// Kind of the per-node payload an opcode carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    None,
    Int32,
    Parameter,
    Compare,
    Field,
    Element,
    Runtime,
    Budget,
    Jump,
    Branch,
    Switch,
    Deopt,
}

/// Static description of an opcode.
#[derive(Debug)]
pub struct OpcodeInfo {
    /// Opcode name.
    pub name: &'static str,
    /// Effects and result representation.
    pub properties: OpProperties,
    /// Input arity.
    pub inputs: InputCount,
    /// Expected representation of each fixed input. Variadic inputs are Tagged.
    pub input_representations: &'static [ValueRepresentation],
    /// Payload kind.
    pub payload: PayloadKind,
    /// Whether the opcode terminates a block.
    pub is_control: bool,
}

macro_rules! define_opcodes {
    ($(
        $name:ident {
            props: $props:expr,
            result: $result:ident,
            inputs: $inputs:expr,
            input_reprs: [$($repr:ident),*],
            payload: $payload:ident,
            control: $control:expr $(,)?
        }
    ),* $(,)?) => {
        /// IR operation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $($name,)*
        }

        /// Number of opcodes.
        pub const OPCODE_COUNT: usize = [$(stringify!($name)),*].len();

        static OPCODE_INFO: [OpcodeInfo; OPCODE_COUNT] = [$(
            OpcodeInfo {
                name: stringify!($name),
                properties: $props.with_representation(ValueRepresentation::$result),
                inputs: $inputs,
                input_representations: &[$(ValueRepresentation::$repr),*],
                payload: PayloadKind::$payload,
                is_control: $control,
            },
        )*];

        impl Opcode {
            /// Every opcode, in declaration order.
            pub const ALL: [Opcode; OPCODE_COUNT] = [$(Opcode::$name,)*];
        }
    };
}

const P: OpProperties = OpProperties::PURE;
const EAGER: OpProperties = OpProperties::EAGER_DEOPT;

define_opcodes! {
    // Values
    Int32Constant {
        props: P, result: Int32, inputs: InputCount::Fixed(0), input_reprs: [],
        payload: Int32, control: false,
    },
    SmiConstant {
        props: P, result: Tagged, inputs: InputCount::Fixed(0), input_reprs: [],
        payload: Int32, control: false,
    },
    Parameter {
        props: P, result: Tagged, inputs: InputCount::Fixed(0), input_reprs: [],
        payload: Parameter, control: false,
    },
    LoadClosure {
        props: P, result: Tagged, inputs: InputCount::Fixed(0), input_reprs: [],
        payload: None, control: false,
    },
    LoadContext {
        props: P, result: Tagged, inputs: InputCount::Fixed(0), input_reprs: [],
        payload: None, control: false,
    },

    // Conversions
    CheckedSmiUntag {
        props: EAGER, result: Int32, inputs: InputCount::Fixed(1), input_reprs: [Tagged],
        payload: None, control: false,
    },
    CheckedSmiTagInt32 {
        props: EAGER, result: Tagged, inputs: InputCount::Fixed(1), input_reprs: [Int32],
        payload: None, control: false,
    },
    Int32ToNumber {
        props: OpProperties::DEFERRED_CALL.union(OpProperties::CAN_ALLOCATE),
        result: Tagged, inputs: InputCount::Fixed(1), input_reprs: [Int32],
        payload: None, control: false,
    },
    Uint32ToNumber {
        props: OpProperties::DEFERRED_CALL.union(OpProperties::CAN_ALLOCATE),
        result: Tagged, inputs: InputCount::Fixed(1), input_reprs: [Uint32],
        payload: None, control: false,
    },

    // Checked int32 arithmetic
    Int32AddWithOverflow {
        props: EAGER, result: Int32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32SubtractWithOverflow {
        props: EAGER, result: Int32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32MultiplyWithOverflow {
        props: EAGER, result: Int32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32DivideWithOverflow {
        props: EAGER, result: Int32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32ModulusWithOverflow {
        props: EAGER, result: Int32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32NegateWithOverflow {
        props: EAGER, result: Int32, inputs: InputCount::Fixed(1), input_reprs: [Int32],
        payload: None, control: false,
    },
    Int32IncrementWithOverflow {
        props: EAGER, result: Int32, inputs: InputCount::Fixed(1), input_reprs: [Int32],
        payload: None, control: false,
    },
    Int32DecrementWithOverflow {
        props: EAGER, result: Int32, inputs: InputCount::Fixed(1), input_reprs: [Int32],
        payload: None, control: false,
    },

    // Bitwise
    Int32BitwiseAnd {
        props: P, result: Int32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32BitwiseOr {
        props: P, result: Int32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32BitwiseXor {
        props: P, result: Int32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32BitwiseNot {
        props: P, result: Int32, inputs: InputCount::Fixed(1), input_reprs: [Int32],
        payload: None, control: false,
    },
    Int32ShiftLeft {
        props: P, result: Int32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32ShiftRight {
        props: P, result: Int32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32ShiftRightLogical {
        props: P, result: Uint32, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: None, control: false,
    },
    Int32Compare {
        props: P, result: Tagged, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: Compare, control: false,
    },

    // Memory
    LoadTaggedField {
        props: OpProperties::CAN_READ, result: Tagged, inputs: InputCount::Fixed(1),
        input_reprs: [Tagged], payload: Field, control: false,
    },
    StoreTaggedFieldWithWriteBarrier {
        props: OpProperties::CAN_WRITE.union(OpProperties::DEFERRED_CALL), result: None,
        inputs: InputCount::Fixed(2), input_reprs: [Tagged, Tagged], payload: Field,
        control: false,
    },
    StoreTaggedFieldNoWriteBarrier {
        props: OpProperties::CAN_WRITE, result: None, inputs: InputCount::Fixed(2),
        input_reprs: [Tagged, Tagged], payload: Field, control: false,
    },
    CheckTypedArrayBounds {
        props: EAGER.union(OpProperties::CAN_READ), result: None,
        inputs: InputCount::Fixed(2), input_reprs: [Tagged, Int32], payload: Element,
        control: false,
    },
    CheckDataViewBounds {
        props: EAGER.union(OpProperties::CAN_READ), result: None,
        inputs: InputCount::Fixed(2), input_reprs: [Tagged, Int32], payload: Element,
        control: false,
    },

    // Calls and checks
    CallRuntime {
        props: OpProperties::JS_CALL, result: Tagged, inputs: InputCount::Variadic,
        input_reprs: [], payload: Runtime, control: false,
    },
    FunctionEntryStackCheck {
        props: OpProperties::CAN_LAZY_DEOPT.union(OpProperties::DEFERRED_CALL), result: None,
        inputs: InputCount::Fixed(0), input_reprs: [], payload: None, control: false,
    },
    ReduceInterruptBudget {
        props: OpProperties::CAN_LAZY_DEOPT
            .union(OpProperties::DEFERRED_CALL)
            .union(OpProperties::CAN_READ)
            .union(OpProperties::CAN_WRITE),
        result: None, inputs: InputCount::Fixed(1), input_reprs: [Tagged], payload: Budget,
        control: false,
    },

    // Control
    Jump {
        props: P, result: None, inputs: InputCount::Fixed(0), input_reprs: [],
        payload: Jump, control: true,
    },
    BranchIfInt32Compare {
        props: P, result: None, inputs: InputCount::Fixed(2), input_reprs: [Int32, Int32],
        payload: Branch, control: true,
    },
    Switch {
        props: P, result: None, inputs: InputCount::Fixed(1), input_reprs: [Int32],
        payload: Switch, control: true,
    },
    Return {
        props: P, result: None, inputs: InputCount::Fixed(1), input_reprs: [Tagged],
        payload: None, control: true,
    },
    Deopt {
        props: EAGER, result: None, inputs: InputCount::Fixed(0), input_reprs: [],
        payload: Deopt, control: true,
    },
}

impl Opcode {
    /// Static description.
    #[inline]
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODE_INFO[self as usize]
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    #[inline]
    pub fn properties(self) -> OpProperties {
        self.info().properties
    }

    /// Representation of the produced value.
    #[inline]
    pub fn result_representation(self) -> ValueRepresentation {
        self.properties().value_representation()
    }

    #[inline]
    pub fn is_control(self) -> bool {
        self.info().is_control
    }

    /// Expected representation of input `index`.
    pub fn input_representation(self, index: usize) -> ValueRepresentation {
        match self.info().inputs {
            InputCount::Variadic => ValueRepresentation::Tagged,
            InputCount::Fixed(_) => self.info().input_representations[index],
        }
    }

    /// Whether the operation produces the same value with its inputs swapped.
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            Opcode::Int32AddWithOverflow
                | Opcode::Int32MultiplyWithOverflow
                | Opcode::Int32BitwiseAnd
                | Opcode::Int32BitwiseOr
                | Opcode::Int32BitwiseXor
        )
    }

    /// Whether the node is a compile-time constant.
    pub const fn is_constant(self) -> bool {
        matches!(self, Opcode::Int32Constant | Opcode::SmiConstant)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Signed 32-bit comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl CompareOp {
    /// Evaluate on concrete values.
    pub const fn evaluate(self, lhs: i32, rhs: i32) -> bool {
        match self {
            CompareOp::Equal => lhs == rhs,
            CompareOp::NotEqual => lhs != rhs,
            CompareOp::LessThan => lhs < rhs,
            CompareOp::LessThanOrEqual => lhs <= rhs,
            CompareOp::GreaterThan => lhs > rhs,
            CompareOp::GreaterThanOrEqual => lhs >= rhs,
        }
    }
}

/// Opcode-specific data stored inline in a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    None,
    /// Constant value.
    Int32(i32),
    /// Parameter index.
    Parameter(u16),
    /// Comparison kind.
    Compare(CompareOp),
    /// Untagged field offset in bytes.
    Field(i32),
    /// Element size as a power of two.
    Element { log2_size: u8 },
    /// Runtime call target and argument count.
    Runtime { function: RuntimeFunction, argc: u8 },
    /// Interrupt budget decrement.
    Budget(i32),
    /// Jump target.
    Jump(BlockId),
    /// Branch comparison and targets.
    Branch {
        op: CompareOp,
        if_true: BlockId,
        if_false: BlockId,
    },
    /// Switch table.
    Switch(SwitchId),
    /// Unconditional deopt reason.
    Deopt(DeoptReason),
}

impl Payload {
    /// Kind tag.
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Payload::None => PayloadKind::None,
            Payload::Int32(_) => PayloadKind::Int32,
            Payload::Parameter(_) => PayloadKind::Parameter,
            Payload::Compare(_) => PayloadKind::Compare,
            Payload::Field(_) => PayloadKind::Field,
            Payload::Element { .. } => PayloadKind::Element,
            Payload::Runtime { .. } => PayloadKind::Runtime,
            Payload::Budget(_) => PayloadKind::Budget,
            Payload::Jump(_) => PayloadKind::Jump,
            Payload::Branch { .. } => PayloadKind::Branch,
            Payload::Switch(_) => PayloadKind::Switch,
            Payload::Deopt(_) => PayloadKind::Deopt,
        }
    }

    /// Bytes of node storage the payload occupies.
    pub const fn size(&self) -> usize {
        match self {
            Payload::None => 0,
            Payload::Compare(_) | Payload::Element { .. } | Payload::Deopt(_) => 1,
            Payload::Parameter(_) | Payload::Runtime { .. } => 2,
            Payload::Int32(_)
            | Payload::Field(_)
            | Payload::Budget(_)
            | Payload::Jump(_)
            | Payload::Switch(_) => 4,
            Payload::Branch { .. } => 9,
        }
    }
}
