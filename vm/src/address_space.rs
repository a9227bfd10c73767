//! 地址空间的生灭
//!
//! 每个地址空间都含有相同的内核映射，`[0, KERNBASE)` 为用户内存。
//! 用户页帧为本地址空间独占：复制地址空间时逐页拷贝，不共享、不计数。

use alloc::vec::Vec;

use enumflags2::BitFlags;
use log::{debug, info, warn};
use phys_mem::PhysMemory;

use crate::address::{PhysAddr, PhysPageNum, VirtAddr, page_round_up};
use crate::config::{
    ADDRESS_SPACE_TOP, DEVSPACE, DIRECTORY_SPAN, EXTMEM, KERNBASE, KERNLINK, Layout, PAGE_SIZE,
};
use crate::error::VmError;
use crate::page_table::{self, Entry, PageTable, PteFlag};
use crate::working_set::WorkingSet;

/// 可执行映像的读取者，由文件系统实现
pub trait ImageReader {
    /// 自`offset`起读满`buf`，返回实际读出的字节数
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> usize;
}

impl ImageReader for &[u8] {
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> usize {
        let Some(src) = self.get(offset..) else {
            return 0;
        };
        let len = src.len().min(buf.len());
        buf[..len].copy_from_slice(&src[..len]);
        len
    }
}

#[derive(Debug)]
pub struct AddressSpace {
    pub(crate) page_table: PageTable,
    /// 用户内存的大小，`[0, size)` 均已映射
    pub(crate) size: usize,
    pub(crate) working_set: WorkingSet,
    layout: Layout,
}

/// 内核映射表中的一段
struct KernelMap {
    virt: usize,
    phys_start: usize,
    size: usize,
    permission: BitFlags<PteFlag>,
}

fn kernel_maps(layout: &Layout) -> [KernelMap; 4] {
    [
        // I/O 空间
        KernelMap {
            virt: KERNBASE,
            phys_start: 0,
            size: EXTMEM,
            permission: PteFlag::W.into(),
        },
        // 内核代码与只读数据
        KernelMap {
            virt: KERNLINK,
            phys_start: EXTMEM,
            size: layout.kernel_data - EXTMEM,
            permission: BitFlags::empty(),
        },
        // 内核读写数据与空闲物理内存
        KernelMap {
            virt: KERNBASE + layout.kernel_data,
            phys_start: layout.kernel_data,
            size: layout.phys_top - layout.kernel_data,
            permission: PteFlag::W.into(),
        },
        // 设备
        KernelMap {
            virt: DEVSPACE,
            phys_start: DEVSPACE,
            size: (ADDRESS_SPACE_TOP - DEVSPACE as u64) as usize,
            permission: PteFlag::W.into(),
        },
    ]
}

impl AddressSpace {
    /// 创建仅含内核映射的地址空间
    ///
    /// 没有进程运行时 CPU 所用的内核页表也由此而来。
    pub fn new(mem: &mut PhysMemory, layout: &Layout) -> Result<Self, VmError> {
        if KERNBASE + layout.phys_top > DEVSPACE {
            panic!("phys_top={:#x} too high", layout.phys_top);
        }

        let mut page_table = PageTable::new(mem)?;
        for map in kernel_maps(layout) {
            let mapped = page_table.map_range(
                mem,
                VirtAddr::from(map.virt),
                map.size,
                PhysAddr::from(map.phys_start),
                map.permission,
            );
            if let Err(e) = mapped {
                warn!("kernel mappings: {e}");
                page_table.free(mem);
                return Err(e);
            }
        }
        debug!("address space created, root={:?}", page_table.root());

        Ok(Self {
            page_table,
            size: 0,
            working_set: WorkingSet::new(layout.working_set_capacity),
            layout: *layout,
        })
    }

    /// 为首个进程建立一页用户内存，并放入其代码
    pub fn init_first_page(&mut self, mem: &mut PhysMemory, code: &[u8]) -> Result<(), VmError> {
        if code.len() >= PAGE_SIZE {
            panic!("init_first_page: more than a page");
        }

        let frame = page_table::alloc_zeroed(mem)?;
        if let Err(e) = self.page_table.map_range(
            mem,
            VirtAddr::from(0),
            PAGE_SIZE,
            PhysAddr::from(frame),
            PteFlag::W | PteFlag::U,
        ) {
            mem.free_frame(frame.into());
            return Err(e);
        }
        mem.page_mut(frame.into())[..code.len()].copy_from_slice(code);
        self.size = PAGE_SIZE;

        Ok(())
    }

    /// 自`reader`的`offset`处读出`len`字节，写入从`va`起的已映射页面
    pub fn load_segment<R>(
        &mut self,
        mem: &mut PhysMemory,
        va: VirtAddr,
        reader: &mut R,
        offset: usize,
        len: usize,
    ) -> Result<(), VmError>
    where
        R: ImageReader + ?Sized,
    {
        if !va.is_aligned() {
            panic!("load_segment: address {va:?} must be page aligned");
        }

        for start in (0..len).step_by(PAGE_SIZE) {
            let page_va = va + start;
            let pte = self
                .page_table
                .translate(mem, page_va)
                .filter(Entry::is_mapped)
                .ok_or(VmError::NoMapping(page_va))?;

            let n = PAGE_SIZE.min(len - start);
            let dst = &mut mem.page_mut(pte.ppn().into())[..n];
            let actual = reader.read_at(offset + start, dst);
            if actual != n {
                return Err(VmError::ShortRead {
                    expected: n,
                    actual,
                });
            }
        }

        Ok(())
    }

    /// 将用户内存扩展到`new_size`，返回新的大小
    ///
    /// 中途页帧耗尽，则回退到原来的大小。
    pub fn grow(&mut self, mem: &mut PhysMemory, new_size: usize) -> Result<usize, VmError> {
        if new_size >= KERNBASE {
            return Err(VmError::AboveUserLimit(new_size));
        }
        let old_size = self.size;
        if new_size < old_size {
            return Ok(old_size);
        }

        for va in (page_round_up(old_size)..new_size).step_by(PAGE_SIZE) {
            let Some(frame) = mem.alloc_frame() else {
                warn!("grow: out of memory at {va:#x}");
                self.dealloc(mem, new_size, old_size);
                return Err(VmError::OutOfMemory);
            };
            mem.page_mut(frame).fill(0);

            if let Err(e) = self.page_table.map_range(
                mem,
                VirtAddr::from(va),
                PAGE_SIZE,
                PhysAddr::from(PhysPageNum::from_raw(frame)),
                PteFlag::W | PteFlag::U,
            ) {
                warn!("grow: out of memory for page tables at {va:#x}");
                self.dealloc(mem, new_size, old_size);
                mem.free_frame(frame);
                return Err(e);
            }
        }

        debug!("grow: {old_size:#x} -> {new_size:#x}");
        self.size = new_size;
        Ok(new_size)
    }

    /// 将用户内存收缩到`new_size`，返回新的大小
    pub fn shrink(&mut self, mem: &mut PhysMemory, new_size: usize) -> usize {
        let old_size = self.size;
        if new_size >= old_size {
            return old_size;
        }

        self.dealloc(mem, old_size, new_size);
        debug!("shrink: {old_size:#x} -> {new_size:#x}");
        self.size = new_size;
        new_size
    }

    /// 复制地址空间：内核映射重新建立，用户页面逐页拷贝
    pub fn duplicate(&self, mem: &mut PhysMemory) -> Result<Self, VmError> {
        let mut child = Self::new(mem, &self.layout)?;

        for va in (0..self.size).step_by(PAGE_SIZE) {
            let va = VirtAddr::from(va);
            // 每一页都重新解析源页表项
            let pte = self
                .page_table
                .translate(mem, va)
                .filter(Entry::is_mapped)
                .unwrap_or_else(|| panic!("duplicate: page {va:?} not mapped"));

            let Some(frame) = mem.alloc_frame() else {
                warn!("duplicate: out of memory at {va:?}");
                child.destroy(mem);
                return Err(VmError::OutOfMemory);
            };
            mem.copy_page(pte.ppn().into(), frame);

            if let Err(e) = child.page_table.map_range(
                mem,
                va,
                PAGE_SIZE,
                PhysAddr::from(PhysPageNum::from_raw(frame)),
                pte.flags(),
            ) {
                warn!("duplicate: out of memory for page tables at {va:?}");
                mem.free_frame(frame);
                child.destroy(mem);
                return Err(e);
            }
        }

        child.size = self.size;
        child.working_set = self
            .working_set
            .rebind(|vpn| child.page_table.find(mem, vpn.into()));
        debug!(
            "duplicate: {:#x} bytes, root {:?} -> {:?}",
            self.size,
            self.page_table.root(),
            child.page_table.root()
        );

        Ok(child)
    }

    /// 销毁地址空间，归还所有页帧：用户页面、页表、页目录
    pub fn destroy(mut self, mem: &mut PhysMemory) {
        self.dealloc(mem, KERNBASE, 0);
        let root = self.page_table.root();
        self.page_table.free(mem);
        info!("address space destroyed, root={root:?}");
    }

    /// 清除用户访问位，使该页成为用户栈下方的保护页
    pub fn clear_user(&mut self, mem: &mut PhysMemory, va: VirtAddr) {
        let Some(pte) = self.page_table.find(mem, va) else {
            panic!("clear_user: no page table for {va:?}");
        };
        pte.update(mem, Entry::clear_user);
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn root(&self) -> PhysPageNum {
        self.page_table.root()
    }

    #[inline]
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    #[inline]
    pub fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn translate(&self, mem: &PhysMemory, va: VirtAddr) -> Option<Entry> {
        self.page_table.translate(mem, va)
    }

    /// 用户内存中已映射 (在位或加密) 的页面
    pub fn mapped_pages(&self, mem: &PhysMemory) -> Vec<VirtAddr> {
        (0..page_round_up(self.size))
            .step_by(PAGE_SIZE)
            .map(VirtAddr::from)
            .filter(|&va| self.translate(mem, va).is_some_and(|pte| pte.is_mapped()))
            .collect()
    }
}

impl AddressSpace {
    /// 回收`[new_size, old_size)`内的用户页帧
    ///
    /// 页表不存在的区段整段跳过；被回收的页面同时离开工作集。
    fn dealloc(&mut self, mem: &mut PhysMemory, old_size: usize, new_size: usize) -> usize {
        if new_size >= old_size {
            return old_size;
        }

        let mut va = page_round_up(new_size);
        while va < old_size {
            let Some(pte) = self.page_table.find(mem, VirtAddr::from(va)) else {
                va = (va / DIRECTORY_SPAN + 1) * DIRECTORY_SPAN;
                continue;
            };

            let entry = pte.read(mem);
            if entry.is_mapped() {
                let ppn = usize::from(entry.ppn());
                if ppn == 0 {
                    panic!("dealloc: entry at {va:#x} maps frame 0");
                }
                mem.free_frame(ppn);
                pte.write(mem, Entry::EMPTY);
            }
            va += PAGE_SIZE;
        }

        let limit = page_round_up(new_size);
        self.working_set
            .retain(|resident| usize::from(VirtAddr::from(resident.vpn)) < limit);

        new_size
    }
}
