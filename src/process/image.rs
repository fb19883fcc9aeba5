use alloc::vec::Vec;

use super::SegmentKind;
use crate::memory::VirtAddr;

/// One loadable segment of an already parsed user program.
#[derive(Debug, Clone)]
pub struct ProgramSegment {
    pub va: VirtAddr,
    pub data: Vec<u8>,
    /// Bytes to reserve; the tail beyond `data` stays zero.
    pub mem_size: u64,
    pub kind: SegmentKind,
}

#[derive(Debug, Clone)]
pub struct ProgramImage {
    pub entry: VirtAddr,
    pub segments: Vec<ProgramSegment>,
}

impl ProgramImage {
    pub fn new(entry: VirtAddr) -> Self {
        ProgramImage { entry, segments: Vec::new() }
    }

    pub fn with_segment(mut self, va: VirtAddr, data: &[u8], mem_size: u64, kind: SegmentKind) -> Self {
        self.segments.push(ProgramSegment { va, data: data.to_vec(), mem_size, kind });
        self
    }
}
