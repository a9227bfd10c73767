//! # 虚拟内存管理
//!
//! 两级页表上的地址空间管理：建立与销毁地址空间、用户与内核间的数据搬运，
//! 以及以异或混淆代替换出的加密工作集。
//!
//! 物理内存由 [`phys_mem::PhysMemory`] 模拟；所有操作都显式接收
//! 地址空间、物理内存与处理器核心，不依赖“当前进程”之类的全局状态。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod address;
mod address_space;
pub mod config;
mod cpu;
mod crypt;
mod error;
pub mod fault;
mod introspect;
mod page_table;
mod user;
mod working_set;

pub use self::{
    address::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum},
    address_space::{AddressSpace, ImageReader},
    config::Layout,
    cpu::{Cpu, TaskState},
    error::VmError,
    fault::{Access, Fault},
    introspect::PtEntry,
    page_table::{Entry, EntryRef, PageTable, PteFlag},
    working_set::{Resident, WorkingSet},
};

pub use phys_mem::PhysMemory;
