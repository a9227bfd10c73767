use alloc::collections::BTreeSet;

/// 物理页帧分配器
///
/// 以伙伴系统管理页号区间 `[left, right)`，每次只分配一个页帧。
/// 另记下已分配出去的页号，以便拦截重复回收与野回收。
pub struct FrameAllocator {
    buddy: buddy_system_allocator::FrameAllocator,
    /// 已分配的物理页号
    allocated: BTreeSet<usize>,
    total: usize,
}

impl FrameAllocator {
    pub fn new(left: usize, right: usize) -> Self {
        let mut buddy: buddy_system_allocator::FrameAllocator =
            buddy_system_allocator::FrameAllocator::new();
        if left < right {
            buddy.add_frame(left, right);
        }

        Self {
            buddy,
            allocated: BTreeSet::new(),
            total: right.saturating_sub(left),
        }
    }

    pub fn alloc(&mut self) -> Option<usize> {
        let ppn = self.buddy.alloc(1)?;
        self.allocated.insert(ppn);
        log::trace!("alloc frame ppn={ppn:#x}");
        Some(ppn)
    }

    /// 合法的被回收页帧之前一定被分配出去过，且尚未回收
    pub fn dealloc(&mut self, ppn: usize) {
        if !self.allocated.remove(&ppn) {
            panic!("Frame ppn={ppn:#x} has not been allocated!");
        }
        log::trace!("dealloc frame ppn={ppn:#x}");
        self.buddy.dealloc(ppn, 1);
    }

    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated.len()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.total - self.allocated.len()
    }
}

impl core::fmt::Debug for FrameAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameAllocator")
            .field("total", &self.total)
            .field("allocated", &self.allocated.len())
            .finish()
    }
}
