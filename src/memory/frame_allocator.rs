#[cfg(not(target_os = "none"))]
use alloc::boxed::Box;
use alloc::vec::Vec;

use super::{page_align_down, page_offset, PhysAddr, PAGE_SIZE};
use crate::error::{fatal, KResult, KernelError};

/// One 4 KiB physical page.
#[repr(C, align(4096))]
pub struct Frame {
    bytes: [u8; PAGE_SIZE],
}

impl Frame {
    pub const ZERO: Frame = Frame { bytes: [0; PAGE_SIZE] };

    pub fn bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.bytes
    }
}

/// Handle to an allocated physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysFrame(usize);

impl PhysFrame {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where the frames of a pool live.
enum Storage {
    /// The RAM at the pool's base; a frame's address is its storage address.
    Physical(&'static mut [Frame]),
    /// A heap arena standing in for the range at the pool's base.
    #[cfg(not(target_os = "none"))]
    Arena(Box<[Frame]>),
}

impl Storage {
    fn frames(&self) -> &[Frame] {
        match self {
            Storage::Physical(frames) => frames,
            #[cfg(not(target_os = "none"))]
            Storage::Arena(frames) => frames,
        }
    }

    fn frames_mut(&mut self) -> &mut [Frame] {
        match self {
            Storage::Physical(frames) => frames,
            #[cfg(not(target_os = "none"))]
            Storage::Arena(frames) => frames,
        }
    }
}

/// Physical page pool.
///
/// Frames are handed out bump-style until the pool has been walked once,
/// after that released frames are recycled. Every frame comes back zeroed.
pub struct FrameAllocator {
    base: PhysAddr,
    storage: Storage,
    allocated: Vec<bool>,
    next_free_frame: usize,
    free_list: Vec<usize>,
    in_use: usize,
}

impl FrameAllocator {
    /// Pool over `frame_count` frames of RAM starting at `base`.
    ///
    /// # Safety
    /// `base..base + frame_count * PAGE_SIZE` must be page aligned, readable
    /// and writable at those very addresses, and used by nothing else for
    /// the rest of the program.
    pub unsafe fn from_physical(base: PhysAddr, frame_count: usize) -> Self {
        let frames = core::slice::from_raw_parts_mut(base as *mut Frame, frame_count);
        Self::with_storage(base, Storage::Physical(frames))
    }

    /// Pool of `frame_count` frames named as if they started at `base`.
    ///
    /// The bytes live in a heap arena, so these addresses only mean
    /// something to this pool. Hardware must be given a
    /// [`from_physical`](Self::from_physical) pool instead.
    #[cfg(not(target_os = "none"))]
    pub fn new(base: PhysAddr, frame_count: usize) -> Self {
        let frames: Vec<Frame> = (0..frame_count).map(|_| Frame::ZERO).collect();
        Self::with_storage(base, Storage::Arena(frames.into_boxed_slice()))
    }

    fn with_storage(base: PhysAddr, storage: Storage) -> Self {
        debug_assert_eq!(page_offset(base), 0, "frame pool base must be page aligned");
        let frame_count = storage.frames().len();
        FrameAllocator {
            base,
            storage,
            allocated: alloc::vec![false; frame_count],
            next_free_frame: 0,
            free_list: Vec::new(),
            in_use: 0,
        }
    }

    pub fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None if self.next_free_frame < self.allocated.len() => {
                self.next_free_frame += 1;
                self.next_free_frame - 1
            }
            None => return None,
        };
        self.storage.frames_mut()[index].bytes.fill(0);
        self.allocated[index] = true;
        self.in_use += 1;
        Some(PhysFrame(index))
    }

    /// Return a frame to the pool. Releasing a frame twice is fatal.
    pub fn deallocate_frame(&mut self, frame: PhysFrame) {
        if self.allocated.get(frame.0) != Some(&true) {
            fatal(KernelError::BadAddress(self.start_address(frame)));
        }
        self.allocated[frame.0] = false;
        self.free_list.push(frame.0);
        self.in_use -= 1;
    }

    pub fn start_address(&self, frame: PhysFrame) -> PhysAddr {
        self.base + (frame.0 * PAGE_SIZE) as u64
    }

    /// The allocated frame holding `pa`, if any.
    pub fn containing_address(&self, pa: PhysAddr) -> Option<PhysFrame> {
        let start = page_align_down(pa);
        if start < self.base {
            return None;
        }
        let index = ((start - self.base) / PAGE_SIZE as u64) as usize;
        match self.allocated.get(index) {
            Some(true) => Some(PhysFrame(index)),
            _ => None,
        }
    }

    pub fn frame(&self, frame: PhysFrame) -> &Frame {
        match self.allocated.get(frame.0) {
            Some(true) => &self.storage.frames()[frame.0],
            _ => fatal(KernelError::BadAddress(self.start_address(frame))),
        }
    }

    pub fn frame_mut(&mut self, frame: PhysFrame) -> &mut Frame {
        match self.allocated.get(frame.0) {
            Some(true) => &mut self.storage.frames_mut()[frame.0],
            _ => fatal(KernelError::BadAddress(self.start_address(frame))),
        }
    }

    /// Copy `buf.len()` bytes starting at `pa`; the range must stay inside one frame.
    pub fn read(&self, pa: PhysAddr, buf: &mut [u8]) -> KResult<()> {
        let frame = self.containing_address(pa).ok_or(KernelError::BadAddress(pa))?;
        let offset = page_offset(pa);
        let end = offset + buf.len();
        if end > PAGE_SIZE {
            return Err(KernelError::BadAddress(pa + buf.len() as u64));
        }
        buf.copy_from_slice(&self.frame(frame).bytes()[offset..end]);
        Ok(())
    }

    /// Write `data` at `pa`; the range must stay inside one frame.
    pub fn write(&mut self, pa: PhysAddr, data: &[u8]) -> KResult<()> {
        let frame = self.containing_address(pa).ok_or(KernelError::BadAddress(pa))?;
        let offset = page_offset(pa);
        let end = offset + data.len();
        if end > PAGE_SIZE {
            return Err(KernelError::BadAddress(pa + data.len() as u64));
        }
        self.frame_mut(frame).bytes_mut()[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn copy_frame(&mut self, src: PhysFrame, dst: PhysFrame) {
        let mut page = [0u8; PAGE_SIZE];
        page.copy_from_slice(self.frame(src).bytes());
        self.frame_mut(dst).bytes_mut().copy_from_slice(&page);
    }

    pub fn used_frames(&self) -> usize {
        self.in_use
    }

    pub fn free_frames(&self) -> usize {
        self.allocated.len() - self.in_use
    }
}
