//! # 加密工作集
//!
//! 冷页面不写回外存，而是就地以单字节密钥异或，并清除其 P 位；
//! 下次访问陷入缺页处理，由 [`AddressSpace::decrypt`] 还原并纳入工作集。
//!
//! 页面的状态只在“在位明文”与“加密”之间往返，本模块从不回收页帧。

use alloc::vec::Vec;

use log::{debug, trace};
use phys_mem::PhysMemory;

use crate::address::{PhysPageNum, VirtAddr, VirtPageNum, page_round_down};
use crate::address_space::AddressSpace;
use crate::config::{PAGE_SIZE, XOR_KEY};
use crate::cpu::Cpu;
use crate::error::VmError;
use crate::page_table::{Entry, EntryRef};
use crate::working_set::Resident;

impl AddressSpace {
    /// 解密`va`所在的页面并纳入工作集
    ///
    /// 已是明文的页面不再异或，只置访问位并确保其在工作集中。
    pub fn decrypt(
        &mut self,
        mem: &mut PhysMemory,
        cpu: &mut Cpu,
        va: VirtAddr,
    ) -> Result<(), VmError> {
        let va = VirtAddr::from(page_round_down(va.into()));
        let pte = self
            .page_table
            .find(mem, va)
            .ok_or(VmError::NoMapping(va))?;
        let entry = pte.read(mem);
        if !entry.is_mapped() {
            return Err(VmError::NoMapping(va));
        }
        if !entry.is_user() {
            return Err(VmError::NotUserAccessible(va));
        }

        if entry.is_encrypted() {
            xor_page(mem, entry.ppn());
            pte.update(mem, Entry::decrypt);
            debug!("decrypt: {va:?} restored");
        } else {
            pte.update(mem, |e| e.set_accessed(true));
            trace!("decrypt: {va:?} already plaintext");
        }

        self.admit(mem, va.page_number(), pte);
        cpu.activate(self);
        Ok(())
    }

    /// 加密从`va`起的`pages`个页面
    ///
    /// 先确认每一页都已映射且允许用户访问，任何一页不合格则不做任何修改。
    /// 已加密的页面跳过；被加密的页面离开工作集。
    pub fn encrypt_range(
        &mut self,
        mem: &mut PhysMemory,
        cpu: &mut Cpu,
        va: VirtAddr,
        pages: usize,
    ) -> Result<(), VmError> {
        let base = page_round_down(va.into());

        let targets = (0..pages)
            .map(|i| {
                let va = VirtAddr::from(base + i * PAGE_SIZE);
                self.user_entry(mem, va).map(|pte| (va.page_number(), pte))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (vpn, pte) in targets {
            if seal(mem, pte) {
                self.working_set.remove(vpn);
                debug!("encrypt: {:?} sealed", VirtAddr::from(vpn));
            }
        }

        cpu.activate(self);
        Ok(())
    }

    /// 页表项是否属于工作集
    #[inline]
    pub fn in_working_set(&self, pte: EntryRef) -> bool {
        self.working_set.contains(pte)
    }

    /// 时钟算法纳入新页面
    ///
    /// 有空槽则直接放入；队列已满则扫描出牺牲者，加密它并让出槽位。
    fn admit(&mut self, mem: &mut PhysMemory, vpn: VirtPageNum, pte: EntryRef) {
        if self.working_set.contains(pte) {
            return;
        }

        let resident = Resident { vpn, pte };
        let Err(resident) = self.working_set.try_insert(resident) else {
            return;
        };

        let victim = self.working_set.sweep(|r| {
            let entry = r.pte.read(mem);
            if entry.is_accessed() {
                r.pte.update(mem, |e| e.set_accessed(false));
                true
            } else {
                false
            }
        });

        if let Some(evicted) = self.working_set.replace(victim, resident) {
            seal(mem, evicted.pte);
            debug!(
                "clock: evicted {:?} for {:?}",
                VirtAddr::from(evicted.vpn),
                VirtAddr::from(vpn)
            );
        }
    }

    /// 已映射且允许用户访问的页表项
    fn user_entry(&self, mem: &PhysMemory, va: VirtAddr) -> Result<EntryRef, VmError> {
        let pte = self
            .page_table
            .find(mem, va)
            .filter(|pte| pte.read(mem).is_mapped())
            .ok_or(VmError::NoMapping(va))?;
        if !pte.read(mem).is_user() {
            return Err(VmError::NotUserAccessible(va));
        }

        Ok(pte)
    }
}

/// 加密一个在位页面，已加密则什么也不做；返回是否加密了
fn seal(mem: &mut PhysMemory, pte: EntryRef) -> bool {
    let entry = pte.read(mem);
    if entry.is_encrypted() {
        return false;
    }

    xor_page(mem, entry.ppn());
    pte.update(mem, Entry::encrypt);
    true
}

fn xor_page(mem: &mut PhysMemory, ppn: PhysPageNum) {
    mem.page_mut(ppn.into())
        .iter_mut()
        .for_each(|byte| *byte ^= XOR_KEY);
}
