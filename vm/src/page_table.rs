//! 两级页表：页目录 → 页表 → 页帧
//!
//! 页目录与页表各占一个页帧，内含 1024 个 32 位表项。
//! 表项只存放在物理内存里，外界借 [`EntryRef`] (页表所在页帧 + 表内下标)
//! 读写它；所有对标志位的修改都经由 [`Entry`] 的方法，
//! 由此保证 `P` 与 `E` 永不同时置位。

use enumflags2::{BitFlags, bitflags};
use phys_mem::PhysMemory;

use crate::address::{PhysAddr, PhysPageNum, VirtAddr, page_round_down};
use crate::config::{ENTRIES_PER_TABLE, PAGE_SIZE, PAGE_SIZE_BITS};
use crate::error::VmError;

#[derive(Debug)]
pub struct PageTable {
    /// 页目录所在的页帧，要交给 cr3
    root: PhysPageNum,
}

/// 页表项
///
/// - [12:31] 物理页号
/// - [0:11]  标志位
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(u32);

/// 标志位
/// - P(Present)：仅当 P 为 1 时，硬件才认为表项合法；
/// - W(Writable)/U(User)：是否可写、用户态是否可访问；
/// - Wt/Cd：写穿与禁用缓存，暂且不理会；
/// - A(Accessed)/D(Dirty)：自该位被清零后，对应页面是否被访问/修改过；
/// - Ps/G：大页与全局页，暂且不理会；
/// - E(Encrypted)：借用硬件留给软件的空闲位，表示页面内容已被异或混淆。
///   此时 P 必须为 0，任何访问都会陷入缺页处理。
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PteFlag {
    P = 0x001,
    W = 0x002,
    U = 0x004,
    Wt = 0x008,
    Cd = 0x010,
    A = 0x020,
    D = 0x040,
    Ps = 0x080,
    G = 0x100,
    E = 0x400,
}

/// 表项的位置，即一张页表 (或页目录) 所在的页帧与表内下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRef {
    table: PhysPageNum,
    index: usize,
}

impl PageTable {
    /// 可容纳的表项数量
    pub const CAPACITY: usize = ENTRIES_PER_TABLE;

    pub fn new(mem: &mut PhysMemory) -> Result<Self, VmError> {
        Ok(Self {
            root: alloc_zeroed(mem)?,
        })
    }

    #[inline]
    pub fn root(&self) -> PhysPageNum {
        self.root
    }

    /// 页目录的第`pdx`项
    pub fn directory_entry(&self, mem: &PhysMemory, pdx: usize) -> Entry {
        EntryRef::new(self.root, pdx).read(mem)
    }

    /// 根据虚拟地址查找页表项，页表尚不存在则返回 None
    ///
    /// 注意：返回的页表项未做检查，可能为空
    pub fn find(&self, mem: &PhysMemory, va: VirtAddr) -> Option<EntryRef> {
        let pde = self.directory_entry(mem, va.pdx());
        if !pde.is_present() {
            return None;
        }

        Some(EntryRef::new(pde.ppn(), va.ptx()))
    }

    /// 根据虚拟地址查找页表项，并沿途创建尚不存在的页表
    ///
    /// 注意：返回的页表项未做检查，可能为空
    pub fn find_or_insert(
        &mut self,
        mem: &mut PhysMemory,
        va: VirtAddr,
    ) -> Result<EntryRef, VmError> {
        let pde_ref = EntryRef::new(self.root, va.pdx());
        let mut pde = pde_ref.read(mem);

        if !pde.is_present() {
            // 新页表的权限放宽，由末级表项决定实际权限
            let table = alloc_zeroed(mem)?;
            log::trace!("page table for pdx={:#x} at ppn={table:?}", va.pdx());
            pde = Entry::new(table, PteFlag::P | PteFlag::W | PteFlag::U);
            pde_ref.write(mem, pde);
        }

        Ok(EntryRef::new(pde.ppn(), va.ptx()))
    }

    /// 凭借虚拟地址读出页表项
    #[inline]
    pub fn translate(&self, mem: &PhysMemory, va: VirtAddr) -> Option<Entry> {
        self.find(mem, va).map(|pte| pte.read(mem))
    }

    /// 把`[va, va + size)`所覆盖的页依次映射到从`pa`起的连续页帧
    ///
    /// 除非`flags`含`E`，否则总会加上`P`。
    /// 中途失败时，已建立的映射原样保留，由调用者整体销毁地址空间。
    pub fn map_range(
        &mut self,
        mem: &mut PhysMemory,
        va: VirtAddr,
        size: usize,
        pa: PhysAddr,
        flags: BitFlags<PteFlag>,
    ) -> Result<(), VmError> {
        if size == 0 {
            return Ok(());
        }

        let flags = if flags.contains(PteFlag::E) {
            flags
        } else {
            flags | PteFlag::P
        };

        let mut current = page_round_down(usize::from(va));
        let last = page_round_down(usize::from(va) + size - 1);
        let mut pa = page_round_down(usize::from(pa));

        loop {
            let pte = self.find_or_insert(mem, VirtAddr::from(current))?;
            pte.write(mem, Entry::new(PhysAddr::from(pa).floor(), flags));

            if current == last {
                break;
            }
            current += PAGE_SIZE;
            pa += PAGE_SIZE;
        }

        Ok(())
    }

    /// 回收全部页表与页目录
    ///
    /// 调用前用户空间的页帧应已全部回收；页表项所指的内核页帧不属于本地址空间。
    pub(crate) fn free(self, mem: &mut PhysMemory) {
        for pdx in 0..Self::CAPACITY {
            let pde = self.directory_entry(mem, pdx);
            if pde.is_mapped() {
                mem.free_frame(pde.ppn().into());
            }
        }
        mem.free_frame(self.root.into());
    }
}

/// 分配一个清零的页帧
pub(crate) fn alloc_zeroed(mem: &mut PhysMemory) -> Result<PhysPageNum, VmError> {
    let ppn = mem.alloc_frame().ok_or(VmError::OutOfMemory)?;
    mem.page_mut(ppn).fill(0);
    Ok(PhysPageNum::from_raw(ppn))
}

impl EntryRef {
    const ENTRY_SIZE: usize = core::mem::size_of::<Entry>();

    fn new(table: PhysPageNum, index: usize) -> Self {
        debug_assert!(index < PageTable::CAPACITY);
        Self { table, index }
    }

    /// 页表项所在的页表
    #[inline]
    pub fn table(&self) -> PhysPageNum {
        self.table
    }

    /// 表内下标
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    fn addr(&self) -> usize {
        usize::from(PhysAddr::from(self.table)) + self.index * Self::ENTRY_SIZE
    }

    #[inline]
    pub fn read(&self, mem: &PhysMemory) -> Entry {
        Entry(mem.read_word(self.addr()))
    }

    #[inline]
    pub fn write(&self, mem: &mut PhysMemory, entry: Entry) {
        mem.write_word(self.addr(), entry.0);
    }

    /// 就地修改表项，返回修改后的值
    pub fn update<F>(&self, mem: &mut PhysMemory, f: F) -> Entry
    where
        F: FnOnce(&mut Entry),
    {
        let mut entry = self.read(mem);
        f(&mut entry);
        self.write(mem, entry);
        entry
    }
}

impl Entry {
    pub const EMPTY: Self = Self(0);

    const FLAGS_MASK: u32 = (1 << PAGE_SIZE_BITS) - 1;

    pub fn new(ppn: PhysPageNum, flags: impl Into<BitFlags<PteFlag>>) -> Self {
        let flags = flags.into();
        assert!(
            !flags.contains(PteFlag::P | PteFlag::E),
            "an entry cannot be both present and encrypted"
        );
        Self(((usize::from(ppn) << PAGE_SIZE_BITS) as u32) | flags.bits() as u32)
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn clean(&mut self) {
        *self = Self::EMPTY;
    }

    pub fn ppn(&self) -> PhysPageNum {
        PhysPageNum::from_raw((self.0 >> PAGE_SIZE_BITS) as usize)
    }

    pub fn flags(&self) -> BitFlags<PteFlag> {
        // 截取低12位，未命名的空闲位被丢弃
        BitFlags::from_bits_truncate((self.0 & Self::FLAGS_MASK) as u16)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        self.flags().contains(PteFlag::P)
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.flags().contains(PteFlag::E)
    }

    /// 在位或加密，即页帧归本表项所有
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.flags().intersects(PteFlag::P | PteFlag::E)
    }

    #[inline]
    pub fn is_user(&self) -> bool {
        self.flags().contains(PteFlag::U)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags().contains(PteFlag::W)
    }

    #[inline]
    pub fn is_accessed(&self) -> bool {
        self.flags().contains(PteFlag::A)
    }

    /// 在位 → 加密：清除 P 与 A，置 E
    pub fn encrypt(&mut self) {
        self.set_flags((self.flags() | PteFlag::E) & !(PteFlag::P | PteFlag::A));
    }

    /// 加密 → 在位：清除 E，置 P 与 A
    pub fn decrypt(&mut self) {
        self.set_flags((self.flags() | PteFlag::P | PteFlag::A) & !BitFlags::from(PteFlag::E));
    }

    pub fn set_accessed(&mut self, accessed: bool) {
        self.toggle(PteFlag::A, accessed);
    }

    pub fn set_dirty(&mut self) {
        self.toggle(PteFlag::D, true);
    }

    pub fn clear_user(&mut self) {
        self.toggle(PteFlag::U, false);
    }

    fn toggle(&mut self, flag: PteFlag, on: bool) {
        let flags = self.flags();
        self.set_flags(if on {
            flags | flag
        } else {
            flags & !BitFlags::from(flag)
        });
    }

    fn set_flags(&mut self, flags: BitFlags<PteFlag>) {
        debug_assert!(!flags.contains(PteFlag::P | PteFlag::E));
        self.0 = (self.0 & !Self::FLAGS_MASK) | flags.bits() as u32;
    }
}

impl core::fmt::Debug for Entry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Entry")
            .field("ppn", &self.ppn())
            .field("flags", &self.flags())
            .finish()
    }
}
