//! 两级页表的地址约定
//!
//! 虚拟地址 (32位)
//! - [22:31] 一级索引，指示页目录中的页表
//! - [12:21] 二级索引，指示页表中的表项
//! - [0:11]  页内偏移

use core::fmt::LowerHex;
use core::ops::Add;

use crate::config::{ENTRIES_PER_TABLE, PAGE_SIZE, PAGE_SIZE_BITS, PDX_SHIFT, PTX_SHIFT};

#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(usize);

/// 虚拟页号 (20位)
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPageNum(usize);

#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(usize);

#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysPageNum(usize);

/// 32位地址的掩码，`usize` 只有32位时也不会溢出
const ADDR_MASK: usize = u32::MAX as usize;
/// 20位页号的掩码
const PAGE_NUM_MASK: usize = ADDR_MASK >> PAGE_SIZE_BITS;

/// 向上取整到页边界
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// 向下取整到页边界
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

impl VirtAddr {
    /// 本虚拟地址所在的页
    pub fn page_number(&self) -> VirtPageNum {
        VirtPageNum(self.0 >> PAGE_SIZE_BITS)
    }

    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    pub fn is_aligned(&self) -> bool {
        self.page_offset() == 0
    }

    /// 页目录索引
    pub fn pdx(&self) -> usize {
        (self.0 >> PDX_SHIFT) & (ENTRIES_PER_TABLE - 1)
    }

    /// 页表索引
    pub fn ptx(&self) -> usize {
        (self.0 >> PTX_SHIFT) & (ENTRIES_PER_TABLE - 1)
    }
}

impl VirtPageNum {
    const INDEX_MASK: usize = ENTRIES_PER_TABLE - 1;

    /// 取出两个级别的索引：(页目录索引, 页表索引)
    pub fn indexes(&self) -> [usize; 2] {
        [self.0 >> 10 & Self::INDEX_MASK, self.0 & Self::INDEX_MASK]
    }
}

impl PhysAddr {
    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    pub fn floor(&self) -> PhysPageNum {
        PhysPageNum(self.0 >> PAGE_SIZE_BITS)
    }
}

impl PhysPageNum {
    pub const fn from_raw(ppn: usize) -> Self {
        Self(ppn)
    }
}

impl core::fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("0x")?;
        LowerHex::fmt(&self.0, f)
    }
}

impl core::fmt::Debug for VirtPageNum {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        LowerHex::fmt(&self.0, f)
    }
}

impl core::fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("0x")?;
        LowerHex::fmt(&self.0, f)
    }
}

impl core::fmt::Debug for PhysPageNum {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        LowerHex::fmt(&self.0, f)
    }
}

// ========== VirtAddr * usize ==========

impl From<usize> for VirtAddr {
    fn from(v: usize) -> Self {
        Self(v & ADDR_MASK)
    }
}

impl From<VirtAddr> for usize {
    fn from(va: VirtAddr) -> Self {
        va.0
    }
}

impl Add<usize> for VirtAddr {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self::from(self.0 + rhs)
    }
}

// ========== VirtPageNum * usize ==========

impl From<usize> for VirtPageNum {
    fn from(v: usize) -> Self {
        Self(v & PAGE_NUM_MASK)
    }
}

impl From<VirtPageNum> for usize {
    fn from(vpn: VirtPageNum) -> Self {
        vpn.0
    }
}

// ========== PhysAddr * usize ==========

impl From<usize> for PhysAddr {
    fn from(v: usize) -> Self {
        Self(v & ADDR_MASK)
    }
}

impl From<PhysAddr> for usize {
    fn from(pa: PhysAddr) -> Self {
        pa.0
    }
}

impl Add<usize> for PhysAddr {
    type Output = PhysAddr;

    fn add(self, rhs: usize) -> Self::Output {
        Self::from(self.0 + rhs)
    }
}

// ========== PhysPageNum * usize ==========

impl From<usize> for PhysPageNum {
    fn from(v: usize) -> Self {
        Self(v & PAGE_NUM_MASK)
    }
}

impl From<PhysPageNum> for usize {
    fn from(ppn: PhysPageNum) -> Self {
        ppn.0
    }
}

// ========== Va <=> Vpn, Pa <=> Ppn ==========

impl From<VirtPageNum> for VirtAddr {
    fn from(vpn: VirtPageNum) -> Self {
        Self(vpn.0 << PAGE_SIZE_BITS)
    }
}

impl From<PhysPageNum> for PhysAddr {
    fn from(ppn: PhysPageNum) -> Self {
        Self(ppn.0 << PAGE_SIZE_BITS)
    }
}
