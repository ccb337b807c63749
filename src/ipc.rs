//! Inter-process communication needed by unification.

/// The collectives unification needs from the multi-process layer.
///
/// All ranks have to call a collective in the same order.
pub trait Ipc {
    fn rank(&self) -> u32;

    fn size(&self) -> u32;

    /// Sum of `value` over all ranks below this one.
    fn exclusive_scan_sum(&self, value: u32) -> u32;
}

/// A measurement without a multi-process paradigm: one rank.
#[derive(Copy, Clone, Debug, Default)]
pub struct SingleProcess;

impl Ipc for SingleProcess {
    fn rank(&self) -> u32 {
        0
    }

    fn size(&self) -> u32 {
        1
    }

    fn exclusive_scan_sum(&self, _value: u32) -> u32 {
        0
    }
}
