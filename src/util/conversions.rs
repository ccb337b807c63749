use crate::util::constants::*;

/* Alignment */

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/e620d0f337d0643c757bab791fc7d88d63217704/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/// Round `size` up to the allocator alignment.
pub const fn roundup_to_alignment(size: usize) -> usize {
    raw_align_up(size, ALLOCATOR_ALIGNMENT)
}

/* Powers of two */

/// The next power of two that is not smaller than `v`. Zero stays zero.
pub const fn next_power_of_two(v: u32) -> u32 {
    if v == 0 {
        return 0;
    }
    let mut v = v - 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v.wrapping_add(1)
}

/// log2 of a power of two.
pub const fn log2(v: u32) -> u32 {
    debug_assert!(v.is_power_of_two());
    v.trailing_zeros()
}

/// Number of bits needed to represent `v`, at least 1.
pub const fn bits_needed(v: u32) -> u32 {
    if v == 0 {
        1
    } else {
        u32::BITS - v.leading_zeros()
    }
}

/* Conversion */

pub const fn pages_to_bytes(pages: usize, log_page_size: u32) -> usize {
    pages << log_page_size
}

pub const fn bytes_to_pages_up(bytes: usize, log_page_size: u32) -> usize {
    (bytes + (1 << log_page_size) - 1) >> log_page_size
}

/// Bytes needed for a bitset of `members` bits, in whole words.
pub const fn bitset_bytes(members: usize) -> usize {
    raw_align_up(members, BITS_IN_WORD) >> LOG_BITS_IN_BYTE
}

#[cfg(test)]
mod tests {
    use crate::util::conversions::*;

    #[test]
    fn test_align() {
        assert_eq!(raw_align_up(257, 64), 320);
        assert_eq!(raw_align_up(256, 64), 256);
        assert_eq!(raw_align_down(257, 64), 256);
        assert!(raw_is_aligned(512, 512));
        assert!(!raw_is_aligned(511, 512));
        assert_eq!(roundup_to_alignment(1), ALLOCATOR_ALIGNMENT);
        assert_eq!(roundup_to_alignment(0), 0);
    }

    #[test]
    fn test_next_power_of_two() {
        assert_eq!(next_power_of_two(0), 0);
        assert_eq!(next_power_of_two(1), 1);
        assert_eq!(next_power_of_two(511), 512);
        assert_eq!(next_power_of_two(512), 512);
        assert_eq!(next_power_of_two(513), 1024);
        // overflow wraps to zero, which every caller rejects
        assert_eq!(next_power_of_two(u32::MAX), 0);
    }

    #[test]
    fn test_bits() {
        assert_eq!(log2(4096), 12);
        assert_eq!(bits_needed(0), 1);
        assert_eq!(bits_needed(1), 1);
        assert_eq!(bits_needed(4), 3);
        assert_eq!(bits_needed(255), 8);
        assert_eq!(bits_needed(u32::MAX), 32);
    }

    #[test]
    fn test_pages() {
        assert_eq!(bytes_to_pages_up(1, 9), 1);
        assert_eq!(bytes_to_pages_up(512, 9), 1);
        assert_eq!(bytes_to_pages_up(513, 9), 2);
        assert_eq!(pages_to_bytes(3, 9), 1536);
        assert_eq!(bitset_bytes(1), 8);
        assert_eq!(bitset_bytes(64), 8);
        assert_eq!(bitset_bytes(65), 16);
    }
}
