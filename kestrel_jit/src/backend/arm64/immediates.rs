//! A64 immediate encodability.

/// `add`/`sub`/`cmp`/`cmn` immediate: 12 bits, optionally shifted left by 12.
#[inline]
pub const fn is_arithmetic_immediate(value: i64) -> bool {
    if value < 0 {
        return false;
    }
    value <= 0xFFF || ((value & 0xFFF) == 0 && (value >> 12) <= 0xFFF)
}

/// `and`/`orr`/`eor`/`tst` bitmask immediate of the given register width.
///
/// Encodable values are a power-of-two sized element, repeated to fill the
/// register, whose bits form a single (possibly wrapping) run of ones.
pub fn is_logical_immediate(value: u64, width: u32) -> bool {
    let mask = if width == 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    };
    let value = value & mask;
    if value == 0 || value == mask {
        return false;
    }

    let mut size = width;
    while size > 2 {
        let half = size / 2;
        let half_mask = (1u64 << half) - 1;
        if (value & half_mask) != ((value >> half) & half_mask) {
            break;
        }
        size = half;
    }

    let elem_mask = if size == 64 {
        u64::MAX
    } else {
        (1u64 << size) - 1
    };
    let elem = value & elem_mask;
    let rotated = ((elem << 1) | (elem >> (size - 1))) & elem_mask;
    // Exactly one run of ones means exactly two bit transitions around the element.
    (elem ^ rotated).count_ones() == 2
}

/// Unsigned scaled or signed unscaled load/store offset for an access of `size` bytes.
#[inline]
pub const fn is_load_store_offset(offset: i64, size: u32) -> bool {
    let size = size as i64;
    let scaled = offset >= 0 && offset % size == 0 && offset / size <= 0xFFF;
    let unscaled = offset >= -256 && offset <= 255;
    scaled || unscaled
}
