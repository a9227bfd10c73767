//! 缺页的分派
//!
//! [`AddressSpace::access`] 模拟 MMU 对一次用户访问的处理：页面在位则置访问位
//! (写则同置脏位)，否则报告缺页。加密页面的缺页交给解密处理，
//! 其余缺页意味着进程越界访问。

use phys_mem::PhysMemory;

use crate::address::VirtAddr;
use crate::address_space::AddressSpace;
use crate::cpu::Cpu;
use crate::error::VmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 没有映射
    NotMapped(VirtAddr),
    /// 页面已加密
    Encrypted(VirtAddr),
    /// 权限不足
    Protection(VirtAddr),
}

/// 缺页处理之后仍未消除的缺页
impl From<Fault> for VmError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::NotMapped(va) | Fault::Encrypted(va) => Self::NoMapping(va),
            Fault::Protection(va) => Self::Protection(va),
        }
    }
}

impl AddressSpace {
    pub fn access(&self, mem: &mut PhysMemory, va: VirtAddr, access: Access) -> Result<(), Fault> {
        let pte = self
            .page_table
            .find(mem, va)
            .ok_or(Fault::NotMapped(va))?;
        let entry = pte.read(mem);

        if entry.is_encrypted() {
            return Err(Fault::Encrypted(va));
        }
        if !entry.is_present() {
            return Err(Fault::NotMapped(va));
        }
        if !entry.is_user() || (access == Access::Write && !entry.is_writable()) {
            return Err(Fault::Protection(va));
        }

        pte.update(mem, |e| {
            e.set_accessed(true);
            if access == Access::Write {
                e.set_dirty();
            }
        });
        Ok(())
    }

    pub fn handle_fault(
        &mut self,
        mem: &mut PhysMemory,
        cpu: &mut Cpu,
        fault: Fault,
    ) -> Result<(), VmError> {
        match fault {
            Fault::Encrypted(va) => self.decrypt(mem, cpu, va),
            Fault::NotMapped(va) => {
                log::warn!("access violation at {va:?}");
                Err(fault.into())
            }
            Fault::Protection(va) => {
                log::warn!("protection violation at {va:?}");
                Err(fault.into())
            }
        }
    }

    /// 一次用户访问：缺页则处理之并重试一次
    pub fn user_access(
        &mut self,
        mem: &mut PhysMemory,
        cpu: &mut Cpu,
        va: VirtAddr,
        access: Access,
    ) -> Result<(), VmError> {
        match self.access(mem, va, access) {
            Ok(()) => Ok(()),
            Err(fault) => {
                self.handle_fault(mem, cpu, fault)?;
                self.access(mem, va, access).map_err(VmError::from)
            }
        }
    }
}
