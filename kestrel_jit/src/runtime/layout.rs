//! Heap object layout constants shared with the object model.
//!
//! Tagging scheme: Smis carry a 31-bit payload shifted left by one with tag
//! bit 0 clear; heap object pointers have bit 0 set.

/// Low bit set on heap object pointers.
pub const HEAP_OBJECT_TAG: i32 = 1;

/// Number of tag bits below a Smi payload.
pub const SMI_SHIFT: u8 = 1;

/// Largest Smi payload.
pub const SMI_MAX: i32 = (1 << 30) - 1;

/// Smallest Smi payload.
pub const SMI_MIN: i32 = -(1 << 30);

/// Size of a tagged slot in bytes.
pub const TAGGED_SIZE: i32 = 8;

/// Offset of the map word in every heap object.
pub const MAP_OFFSET: i32 = 0;

/// `JSFunction` feedback cell field.
pub const JS_FUNCTION_FEEDBACK_CELL_OFFSET: i32 = 24;

/// Interrupt budget (int32) in a feedback cell.
pub const FEEDBACK_CELL_INTERRUPT_BUDGET_OFFSET: i32 = 16;

/// Byte length (uint32 used) of a typed array.
pub const JS_TYPED_ARRAY_BYTE_LENGTH_OFFSET: i32 = 32;

/// Byte length of a data view.
pub const JS_DATA_VIEW_BYTE_LENGTH_OFFSET: i32 = 24;

/// Mask clearing the in-page offset of an address.
pub const PAGE_ALIGNMENT_MASK: i64 = !((1 << 18) - 1);

/// Offset of the flags word in a page header.
pub const PAGE_FLAGS_OFFSET: i32 = 8;

/// Page flag: stores into objects on this page must be recorded.
pub const POINTERS_FROM_HERE_ARE_INTERESTING: i64 = 1 << 2;

/// Offset from the frame pointer of the caller-pushed closure.
pub const FRAME_CLOSURE_OFFSET: i32 = 16;

/// Offset from the frame pointer of the first parameter.
pub const FRAME_FIRST_PARAMETER_OFFSET: i32 = 24;

/// Entries of the roots table addressed through the root register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RootIndex {
    /// `undefined`
    UndefinedValue = 0,
    /// `true`
    TrueValue = 1,
    /// `false`
    FalseValue = 2,
    /// JS stack limit for the current thread.
    StackLimit = 3,
}

impl RootIndex {
    /// Byte offset from the root register.
    pub const fn offset(self) -> i32 {
        self as i32 * TAGGED_SIZE
    }
}

/// Whether `value` can be represented as a Smi.
#[inline]
pub const fn is_smi(value: i64) -> bool {
    value >= SMI_MIN as i64 && value <= SMI_MAX as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smi_range() {
        assert!(is_smi(0));
        assert!(is_smi(i64::from(SMI_MAX)));
        assert!(!is_smi(i64::from(SMI_MAX) + 1));
        assert!(is_smi(i64::from(SMI_MIN)));
        assert!(!is_smi(i64::from(i32::MAX)));
    }

    #[test]
    fn test_root_offsets() {
        assert_eq!(RootIndex::UndefinedValue.offset(), 0);
        assert_eq!(RootIndex::StackLimit.offset(), 24);
    }
}
