//! Small additions to the standard library.

pub mod zeroed_alloc;

// Branch hint on stable Rust: calling a `#[cold]` function marks the path as unlikely.
#[cold]
fn cold() {}

#[inline]
pub fn unlikely(b: bool) -> bool {
    if b {
        cold();
    }
    b
}
