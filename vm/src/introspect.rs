use phys_mem::PhysMemory;

use crate::address::{VirtAddr, page_round_down};
use crate::address_space::AddressSpace;
use crate::config::PAGE_SIZE;
use crate::page_table::Entry;

/// 交给用户态工具的页表项记录
///
/// 布局固定：字段顺序不得更改，布尔字段以 1 表示置位。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PtEntry {
    /// 页目录索引
    pub pdx: u16,
    /// 页表索引
    pub ptx: u16,
    /// 物理页号
    pub ppage: u32,
    pub present: u8,
    pub writable: u8,
    pub encrypted: u8,
    /// 访问位
    pub referenced: u8,
}

impl PtEntry {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    fn new(va: VirtAddr, entry: Entry) -> Self {
        let [pdx, ptx] = va.page_number().indexes();
        Self {
            pdx: pdx as u16,
            ptx: ptx as u16,
            ppage: usize::from(entry.ppn()) as u32,
            present: entry.is_present() as u8,
            writable: entry.is_writable() as u8,
            encrypted: entry.is_encrypted() as u8,
            referenced: entry.is_accessed() as u8,
        }
    }

    /// 按小端序排出的字节，可直接拷贝到用户空间
    pub fn as_bytes(&self) -> [u8; PtEntry::SIZE] {
        let mut bytes = [0; PtEntry::SIZE];
        bytes[0..2].copy_from_slice(&self.pdx.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.ptx.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.ppage.to_le_bytes());
        bytes[8] = self.present;
        bytes[9] = self.writable;
        bytes[10] = self.encrypted;
        bytes[11] = self.referenced;
        bytes
    }
}

impl AddressSpace {
    /// 自用户内存顶端向下，列出允许用户访问且在位或加密的页面
    ///
    /// `working_set_only` 为真时只列出工作集中的页面。
    /// 写满`out`或到达虚拟地址 0 即止，返回写入的条数。
    pub fn enumerate_entries(
        &self,
        mem: &PhysMemory,
        out: &mut [PtEntry],
        working_set_only: bool,
    ) -> usize {
        if self.size == 0 || out.is_empty() {
            return 0;
        }

        let mut va = page_round_down(self.size - 1);
        let mut count = 0;
        loop {
            let page = VirtAddr::from(va);
            if let Some(pte) = self.page_table.find(mem, page) {
                let entry = pte.read(mem);
                if entry.is_user()
                    && entry.is_mapped()
                    && (!working_set_only || self.working_set.contains(pte))
                {
                    out[count] = PtEntry::new(page, entry);
                    count += 1;
                    if count == out.len() {
                        break;
                    }
                }
            }

            if va == 0 {
                break;
            }
            va -= PAGE_SIZE;
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Layout;
    use crate::cpu::Cpu;

    fn setup(pages: usize) -> (PhysMemory, AddressSpace, Cpu) {
        let layout = Layout::new(0x40_0000, 0x10_8000, 0x20_0000, 4);
        let mut mem = layout.memory();
        let mut space = AddressSpace::new(&mut mem, &layout).unwrap();
        space.grow(&mut mem, pages * PAGE_SIZE).unwrap();
        (mem, space, Cpu::new(0))
    }

    #[test]
    fn walks_from_the_top_down() {
        let (mem, space, _) = setup(3);
        let mut out = [PtEntry::default(); 8];
        assert_eq!(space.enumerate_entries(&mem, &mut out, false), 3);
        assert_eq!(
            out[..3].iter().map(|e| e.ptx).collect::<Vec<_>>(),
            [2, 1, 0]
        );
        assert!(out[..3].iter().all(|e| e.present == 1 && e.writable == 1));
        assert!(out[..3].iter().all(|e| e.encrypted == 0 && e.referenced == 0));

        let frame = space.translate(&mem, VirtAddr::from(PAGE_SIZE)).unwrap().ppn();
        assert_eq!(out[1].ppage as usize, usize::from(frame));
    }

    #[test]
    fn stops_at_max_count() {
        let (mem, space, _) = setup(3);
        let mut out = [PtEntry::default(); 2];
        assert_eq!(space.enumerate_entries(&mem, &mut out, false), 2);
        assert_eq!(out[1].ptx, 1);
    }

    #[test]
    fn unaligned_size_includes_the_partial_page() {
        let layout = Layout::new(0x40_0000, 0x10_8000, 0x20_0000, 4);
        let mut mem = layout.memory();
        let mut space = AddressSpace::new(&mut mem, &layout).unwrap();
        space.grow(&mut mem, PAGE_SIZE + 1).unwrap();

        let mut out = [PtEntry::default(); 4];
        assert_eq!(space.enumerate_entries(&mem, &mut out, false), 2);
        assert_eq!(out[0].ptx, 1);
    }

    #[test]
    fn empty_space_has_no_entries() {
        let (mem, space, _) = setup(0);
        let mut out = [PtEntry::default(); 4];
        assert_eq!(space.enumerate_entries(&mem, &mut out, false), 0);
    }

    #[test]
    fn skips_pages_without_user_access() {
        let (mut mem, mut space, _) = setup(3);
        space.clear_user(&mut mem, VirtAddr::from(0));
        let mut out = [PtEntry::default(); 4];
        assert_eq!(space.enumerate_entries(&mem, &mut out, false), 2);
    }

    #[test]
    fn record_bytes() {
        let record = PtEntry {
            pdx: 0x201,
            ptx: 3,
            ppage: 0x12345,
            present: 1,
            writable: 0,
            encrypted: 1,
            referenced: 0,
        };
        assert_eq!(
            record.as_bytes(),
            [0x01, 0x02, 0x03, 0x00, 0x45, 0x23, 0x01, 0x00, 1, 0, 1, 0]
        );
    }
}
