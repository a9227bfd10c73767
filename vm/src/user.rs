//! 用户空间与内核之间的数据搬运
//!
//! 用户缓冲区在物理上未必连续，须逐页翻译、逐页拷贝。

use phys_mem::PhysMemory;

use crate::address::{PhysAddr, PhysPageNum, VirtAddr, page_round_down};
use crate::address_space::AddressSpace;
use crate::config::PAGE_SIZE;
use crate::error::VmError;

impl AddressSpace {
    /// 把用户虚拟地址翻译成内核可直接访问的物理地址
    ///
    /// 页面须在位或已加密，且允许用户访问。
    pub fn translate_user(&self, mem: &PhysMemory, va: VirtAddr) -> Option<PhysAddr> {
        self.user_frame(mem, va)
            .ok()
            .map(|ppn| PhysAddr::from(ppn) + va.page_offset())
    }

    /// 将`src`拷贝到用户空间`dest`处
    ///
    /// 某页翻译失败即返回错误，此前各页已写入的字节不会撤回。
    pub fn copy_to_user(
        &self,
        mem: &mut PhysMemory,
        dest: VirtAddr,
        src: &[u8],
    ) -> Result<(), VmError> {
        let mut va = usize::from(dest);
        let mut src = src;

        while !src.is_empty() {
            let page_va = page_round_down(va);
            let ppn = self.user_frame(mem, VirtAddr::from(page_va))?;
            let offset = va - page_va;
            let n = (PAGE_SIZE - offset).min(src.len());

            mem.page_mut(ppn.into())[offset..offset + n].copy_from_slice(&src[..n]);
            src = &src[n..];
            va = page_va + PAGE_SIZE;
        }

        Ok(())
    }

    /// 将用户空间`src`处的字节读入`dest`
    pub fn copy_from_user(
        &self,
        mem: &PhysMemory,
        src: VirtAddr,
        dest: &mut [u8],
    ) -> Result<(), VmError> {
        let mut va = usize::from(src);
        let mut dest = dest;

        while !dest.is_empty() {
            let page_va = page_round_down(va);
            let ppn = self.user_frame(mem, VirtAddr::from(page_va))?;
            let offset = va - page_va;
            let n = (PAGE_SIZE - offset).min(dest.len());

            let (head, tail) = dest.split_at_mut(n);
            head.copy_from_slice(&mem.page(ppn.into())[offset..offset + n]);
            dest = tail;
            va = page_va + PAGE_SIZE;
        }

        Ok(())
    }

    /// 把`pa`所在物理页的原始内容拷贝到用户缓冲区，供调试之用
    pub fn dump_physical_page(
        &self,
        mem: &mut PhysMemory,
        pa: PhysAddr,
        dest: VirtAddr,
    ) -> Result<(), VmError> {
        let page = PhysAddr::from(page_round_down(pa.into()));
        if !mem.contains(page.into()) {
            return Err(VmError::PhysOutOfRange(pa));
        }

        let mut buf = [0; PAGE_SIZE];
        buf.copy_from_slice(mem.page(page.floor().into()));
        self.copy_to_user(mem, dest, &buf)
    }

    fn user_frame(&self, mem: &PhysMemory, va: VirtAddr) -> Result<PhysPageNum, VmError> {
        let pte = self
            .page_table
            .translate(mem, va)
            .filter(|pte| pte.is_mapped())
            .ok_or(VmError::NoMapping(va))?;
        if !pte.is_user() {
            return Err(VmError::NotUserAccessible(va));
        }

        Ok(pte.ppn())
    }
}
