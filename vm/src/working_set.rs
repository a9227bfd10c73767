//! # 工作集
//!
//! 定长的环形时钟队列，记录一个地址空间里“热”的页面。
//! 队列未满时，新页面落入首个空槽，指针不动；
//! 队列已满时，指针从当前位置扫过各槽：访问位为 1 者清零并放过 (第二次机会)，
//! 首个访问位为 0 者即为牺牲者。每扫一槽必令其访问位为 0，故至多两圈必有结果。

use alloc::vec;
use alloc::vec::Vec;

use crate::address::VirtPageNum;
use crate::page_table::EntryRef;

/// 驻留在工作集中的页面
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resident {
    pub vpn: VirtPageNum,
    /// 缓存的末级页表项位置
    pub pte: EntryRef,
}

#[derive(Debug, Clone)]
pub struct WorkingSet {
    slots: Vec<Option<Resident>>,
    /// 时钟指针
    hand: usize,
    len: usize,
}

impl WorkingSet {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "working set capacity must not be zero");
        Self {
            slots: vec![None; capacity],
            hand: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    #[inline]
    pub fn hand(&self) -> usize {
        self.hand
    }

    /// 按槽的顺序遍历驻留页面
    pub fn iter(&self) -> impl Iterator<Item = &Resident> {
        self.slots.iter().flatten()
    }

    /// 第`index`槽的内容
    pub fn slot(&self, index: usize) -> Option<&Resident> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// 某页表项是否属于工作集
    pub fn contains(&self, pte: EntryRef) -> bool {
        self.iter().any(|resident| resident.pte == pte)
    }

    pub fn contains_page(&self, vpn: VirtPageNum) -> bool {
        self.iter().any(|resident| resident.vpn == vpn)
    }

    /// 放入首个空槽，队列已满则原样退回
    pub fn try_insert(&mut self, resident: Resident) -> Result<usize, Resident> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Err(resident);
        };

        self.slots[index] = Some(resident);
        self.len += 1;
        Ok(index)
    }

    /// 时钟扫描，返回牺牲者所在的槽，指针停在该槽
    ///
    /// `referenced` 须读出并清零页面的访问位：返回 true 表示该页被放过。
    pub fn sweep<F>(&mut self, mut referenced: F) -> usize
    where
        F: FnMut(&Resident) -> bool,
    {
        assert!(!self.is_empty(), "sweeping an empty working set");

        let capacity = self.capacity();
        let mut steps = 0;
        loop {
            if let Some(resident) = &self.slots[self.hand] {
                if !referenced(resident) {
                    return self.hand;
                }
            }
            steps += 1;
            debug_assert!(steps <= 2 * capacity, "clock sweep did not terminate");
            self.hand = (self.hand + 1) % capacity;
        }
    }

    /// 以新页面覆盖第`index`槽，指针移过该槽，返回被换出的页面
    pub fn replace(&mut self, index: usize, resident: Resident) -> Option<Resident> {
        let evicted = self.slots[index].replace(resident);
        if evicted.is_none() {
            self.len += 1;
        }
        self.hand = (index + 1) % self.capacity();
        evicted
    }

    pub fn remove(&mut self, vpn: VirtPageNum) -> Option<Resident> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_some_and(|resident| resident.vpn == vpn))?;
        self.len -= 1;
        slot.take()
    }

    /// 只保留满足条件的页面，槽位与指针不变
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Resident) -> bool,
    {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|resident| !keep(resident)) {
                *slot = None;
                self.len -= 1;
            }
        }
    }

    /// 为另一地址空间复制本工作集，页表项位置逐一重新解析
    pub fn rebind<F>(&self, mut resolve: F) -> Self
    where
        F: FnMut(VirtPageNum) -> Option<EntryRef>,
    {
        let slots: Vec<_> = self
            .slots
            .iter()
            .map(|slot| {
                slot.and_then(|resident| {
                    resolve(resident.vpn).map(|pte| Resident {
                        vpn: resident.vpn,
                        pte,
                    })
                })
            })
            .collect();
        let len = slots.iter().flatten().count();

        Self {
            slots,
            hand: self.hand,
            len,
        }
    }
}
