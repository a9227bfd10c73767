use clap::Parser;
use clap::builder::RangedU64ValueParser;
use std::path::PathBuf;
use vm::config::{DEVSPACE, KERNBASE};

/// 内核映像之外至少留出 2 MiB 的页帧
const MIN_PHYS_MIB: u64 = 4;
/// RAM 的直接映射不得伸入设备窗口
const MAX_PHYS_MIB: u64 = ((DEVSPACE - KERNBASE) >> 20) as u64;

#[derive(Parser)]
pub struct Cli {
    /// Number of user pages to grow the probe process to
    #[arg(long, short, default_value_t = 6)]
    pub pages: usize,

    /// Working set capacity
    #[arg(long, short, default_value_t = 4,
          value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub capacity: usize,

    /// Top of physical memory, in MiB
    #[arg(long, default_value_t = 16,
          value_parser = RangedU64ValueParser::<usize>::new().range(MIN_PHYS_MIB..=MAX_PHYS_MIB))]
    pub phys_mib: usize,

    /// Executable image loaded at virtual address 0 instead of the test pattern
    #[arg(long, short)]
    pub image: Option<PathBuf>,

    /// User pages to read after every page has been encrypted
    #[arg(long, short, value_delimiter = ',')]
    pub touch: Vec<usize>,

    /// Only list pages in the working set
    #[arg(long, short)]
    pub working_set: bool,

    /// Dump the raw frame behind this user page
    #[arg(long, short)]
    pub dump: Option<usize>,
}
