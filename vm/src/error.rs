use core::fmt;

use crate::address::{PhysAddr, VirtAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 物理页帧耗尽
    OutOfMemory,
    /// 该页既不在位也未加密
    NoMapping(VirtAddr),
    /// 该页不允许用户访问
    NotUserAccessible(VirtAddr),
    /// 写只读页面
    Protection(VirtAddr),
    /// 用户空间不得越过 KERNBASE
    AboveUserLimit(usize),
    /// 可执行映像读出的字节不足
    ShortRead { expected: usize, actual: usize },
    /// 物理地址不在 RAM 内
    PhysOutOfRange(PhysAddr),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::NoMapping(va) => write!(f, "no mapping at {va:?}"),
            Self::NotUserAccessible(va) => write!(f, "{va:?} is not user accessible"),
            Self::Protection(va) => write!(f, "protection violation at {va:?}"),
            Self::AboveUserLimit(size) => write!(f, "size {size:#x} crosses the kernel base"),
            Self::ShortRead { expected, actual } => {
                write!(f, "short read: expected {expected} bytes, got {actual}")
            }
            Self::PhysOutOfRange(pa) => write!(f, "physical address {pa:?} is outside RAM"),
        }
    }
}

impl core::error::Error for VmError {}
