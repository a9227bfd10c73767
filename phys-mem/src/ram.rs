use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use crate::PAGE_SIZE;

static ZERO_PAGE: [u8; PAGE_SIZE] = [0; PAGE_SIZE];

/// 模拟的随机存储器
///
/// 页帧在首次写入时才真正分配主机内存，未触及的页帧读出全零。
#[derive(Debug)]
pub struct Ram {
    top: usize,
    frames: BTreeMap<usize, Box<[u8; PAGE_SIZE]>>,
}

impl Ram {
    pub fn new(top: usize) -> Self {
        Self {
            top,
            frames: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    pub fn page(&self, ppn: usize) -> &[u8] {
        self.check(ppn);
        self.frames
            .get(&ppn)
            .map_or(&ZERO_PAGE[..], |frame| &frame[..])
    }

    pub fn page_mut(&mut self, ppn: usize) -> &mut [u8] {
        self.check(ppn);
        &mut self
            .frames
            .entry(ppn)
            .or_insert_with(|| Box::new([0; PAGE_SIZE]))[..]
    }

    fn check(&self, ppn: usize) {
        assert!(
            ppn < self.top / PAGE_SIZE,
            "ppn={ppn:#x} lies beyond RAM top={:#x}",
            self.top
        );
    }
}
