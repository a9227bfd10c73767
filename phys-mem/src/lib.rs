//! # 物理内存
//!
//! 以主机内存模拟一台机器的物理内存：按页帧惰性分配的 RAM，
//! 外加一个伙伴系统物理页帧分配器。
//!
//! 页帧以物理页号 (ppn) 表示，页号左移 [`PAGE_SIZE_BITS`] 位即物理地址。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod frame_allocator;
mod ram;

pub use self::{frame_allocator::FrameAllocator, ram::Ram};

use spin::Mutex;

/// 物理页大小
pub const PAGE_SIZE: usize = 0x1000;
/// 物理页内寻址的位数
pub const PAGE_SIZE_BITS: usize = 12;

/// 被回收的页帧会被填满此字节，悬空的引用读到的便是垃圾
pub const JUNK: u8 = 0x01;

/// 一台机器的物理内存：`[0, top)` 的 RAM 与管理 `[free_start, top)` 的页帧分配器
#[derive(Debug)]
pub struct PhysMemory {
    ram: Ram,
    allocator: Mutex<FrameAllocator>,
}

impl PhysMemory {
    /// `[0, free_start)` 是内核映像，永不分配
    pub fn new(free_start: usize, top: usize) -> Self {
        let left = free_start.div_ceil(PAGE_SIZE);
        let right = top / PAGE_SIZE;
        assert!(left <= right, "free_start={free_start:#x} lies above top={top:#x}");
        log::debug!("physical memory: frames [{left:#x}, {right:#x})");

        Self {
            ram: Ram::new(top),
            allocator: Mutex::new(FrameAllocator::new(left, right)),
        }
    }

    /// 分配一个页帧，内容未经清零
    #[inline]
    pub fn alloc_frame(&self) -> Option<usize> {
        self.allocator.lock().alloc()
    }

    /// 回收页帧，先以 [`JUNK`] 填满
    pub fn free_frame(&mut self, ppn: usize) {
        self.ram.page_mut(ppn).fill(JUNK);
        self.allocator.lock().dealloc(ppn);
    }

    #[inline]
    pub fn free_frames(&self) -> usize {
        self.allocator.lock().available()
    }

    #[inline]
    pub fn allocated_frames(&self) -> usize {
        self.allocator.lock().allocated()
    }

    /// RAM 的上界 (字节)
    #[inline]
    pub fn top(&self) -> usize {
        self.ram.top()
    }

    #[inline]
    pub fn contains(&self, pa: usize) -> bool {
        pa < self.ram.top()
    }

    #[inline]
    pub fn page(&self, ppn: usize) -> &[u8] {
        self.ram.page(ppn)
    }

    #[inline]
    pub fn page_mut(&mut self, ppn: usize) -> &mut [u8] {
        self.ram.page_mut(ppn)
    }

    pub fn copy_page(&mut self, src: usize, dst: usize) {
        if src == dst {
            return;
        }
        let mut buf = [0; PAGE_SIZE];
        buf.copy_from_slice(self.ram.page(src));
        self.ram.page_mut(dst).copy_from_slice(&buf);
    }

    /// 以小端序读出物理地址`pa`处的32位字
    pub fn read_word(&self, pa: usize) -> u32 {
        assert_eq!(pa % 4, 0, "unaligned word at {pa:#x}");
        let offset = pa % PAGE_SIZE;
        let bytes = &self.ram.page(pa / PAGE_SIZE)[offset..offset + 4];
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn write_word(&mut self, pa: usize, word: u32) {
        assert_eq!(pa % 4, 0, "unaligned word at {pa:#x}");
        let offset = pa % PAGE_SIZE;
        self.ram.page_mut(pa / PAGE_SIZE)[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
    }
}
