//! 虚拟内存布局的常量，以及描述一台机器的 [`Layout`]
//!
//! ```text
//!   0..KERNBASE                  用户内存 (代码、数据、栈、堆)，页帧由内核分配
//!   KERNBASE..KERNBASE+EXTMEM    映射到 0..EXTMEM (I/O 空间)
//!   KERNLINK..P2V(kernel_data)   映射到 EXTMEM..kernel_data，内核代码与只读数据
//!   P2V(kernel_data)..P2V(top)   映射到 kernel_data..top，内核读写数据与空闲物理内存
//!   DEVSPACE..4G                 直接映射 (ioapic 等设备)
//! ```

use phys_mem::PhysMemory;

pub use phys_mem::{PAGE_SIZE, PAGE_SIZE_BITS};

/// 用户空间与内核空间的分界
pub const KERNBASE: usize = 0x8000_0000;
/// 扩展内存的起点，其下为 I/O 空间
pub const EXTMEM: usize = 0x10_0000;
/// 内核被链接到的虚拟地址
pub const KERNLINK: usize = KERNBASE + EXTMEM;
/// 设备窗口，物理地址与虚拟地址相同
pub const DEVSPACE: usize = 0xFE00_0000;
/// 32位虚拟地址空间的大小，32位的 `usize` 容纳不下
pub const ADDRESS_SPACE_TOP: u64 = 1 << 32;

/// 一级索引 (页目录) 的偏移位数
pub const PDX_SHIFT: usize = 22;
/// 二级索引 (页表) 的偏移位数
pub const PTX_SHIFT: usize = 12;
/// 一张页目录/页表所含的表项数
pub const ENTRIES_PER_TABLE: usize = 1024;
/// 一个页目录项覆盖的字节数
pub const DIRECTORY_SPAN: usize = PAGE_SIZE * ENTRIES_PER_TABLE;

/// 加密页面所用的单字节密钥，异或两次即还原
pub const XOR_KEY: u8 = 0xFF;
/// 工作集时钟队列的默认容量
pub const WORKING_SET_CAPACITY: usize = 8;

/// 一台机器的物理布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// 物理内存上界
    pub phys_top: usize,
    /// 内核可写数据段的物理起点，其下为代码与只读数据
    pub kernel_data: usize,
    /// 内核映像的物理终点，其上的页帧交给分配器
    pub kernel_end: usize,
    /// 每个地址空间的工作集容量
    pub working_set_capacity: usize,
}

impl Default for Layout {
    /// 224M 内存的标准机器
    fn default() -> Self {
        Self::new(0x0E00_0000, 0x0010_8000, 0x0020_0000, WORKING_SET_CAPACITY)
    }
}

impl Layout {
    pub fn new(
        phys_top: usize,
        kernel_data: usize,
        kernel_end: usize,
        working_set_capacity: usize,
    ) -> Self {
        assert!(
            working_set_capacity > 0,
            "working set capacity must not be zero"
        );
        assert!(
            EXTMEM <= kernel_data && kernel_data <= kernel_end && kernel_end <= phys_top,
            "kernel image [{EXTMEM:#x}, {kernel_data:#x}, {kernel_end:#x}) does not fit below {phys_top:#x}"
        );

        Self {
            phys_top,
            kernel_data,
            kernel_end,
            working_set_capacity,
        }
    }

    /// 按本布局建立物理内存
    pub fn memory(&self) -> PhysMemory {
        PhysMemory::new(self.kernel_end, self.phys_top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_machine() {
        let layout = Layout::default();
        assert!(KERNBASE + layout.phys_top <= DEVSPACE);
        assert_eq!(layout.working_set_capacity, WORKING_SET_CAPACITY);
    }

    #[test]
    #[should_panic(expected = "working set capacity")]
    fn zero_capacity() {
        Layout::new(0x40_0000, 0x10_8000, 0x20_0000, 0);
    }
}
