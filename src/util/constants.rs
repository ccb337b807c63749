/// log2 of the number of bytes in a byte
pub const LOG_BYTES_IN_BYTE: u8 = 0;
/// The number of bytes in a byte
pub const BYTES_IN_BYTE: usize = 1;
/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a gigabyte
pub const LOG_BYTES_IN_GBYTE: u8 = 30;
/// The number of bytes in a gigabyte
pub const BYTES_IN_GBYTE: usize = 1 << LOG_BYTES_IN_GBYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

/// log2 of the number of bytes in a bitset word
pub const LOG_BYTES_IN_WORD: u8 = 3;
/// The number of bytes in a bitset word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
/// log2 of the number of bits in a bitset word
pub const LOG_BITS_IN_WORD: u8 = LOG_BITS_IN_BYTE + LOG_BYTES_IN_WORD;
/// The number of bits in a bitset word
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// log2 of the number of bytes in a page id (and a moved-page mapping slot)
pub const LOG_BYTES_IN_PAGE_ID: u8 = 2;
/// The number of bytes in a page id
pub const BYTES_IN_PAGE_ID: usize = 1 << LOG_BYTES_IN_PAGE_ID;

/// log2 of the assumed cache line size
pub const LOG_CACHE_LINE_SIZE: u8 = 6;
/// The assumed cache line size in bytes
pub const CACHE_LINE_SIZE: usize = 1 << LOG_CACHE_LINE_SIZE;

/// Minimum alignment of every allocation handed out by a page manager.
pub const ALLOCATOR_ALIGNMENT: usize = CACHE_LINE_SIZE;

/// Maintenance bytes (header plus page bitset) are rounded up to this boundary.
pub const MAINTENANCE_ALIGNMENT: usize = 64;

/// A page must hold at least this many union objects.
pub const MIN_NUMBER_OF_OBJECTS_PER_PAGE: usize = 8;

/// Pre-seed union objects for at least `n_pages / UNION_OBJECT_RESERVE_DIVISOR` pages
/// (0.5% of the page count).
pub const UNION_OBJECT_RESERVE_DIVISOR: usize = 200;

/// Default total memory of the measurement allocator (16000 KiB).
pub const DEFAULT_TOTAL_MEMORY: usize = 16000 * BYTES_IN_KBYTE;
/// Default page size of the measurement allocator (8 KiB).
pub const DEFAULT_PAGE_SIZE: usize = 8 * BYTES_IN_KBYTE;
/// Default number of buckets in a location's thread team table.
pub const DEFAULT_TEAM_TABLE_BUCKETS: usize = 128;
