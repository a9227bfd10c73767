//! 处理器核心的状态：当前的页表根与任务状态段
//!
//! 切换地址空间时须屏蔽中断：若在更新核心状态的几条指令之间被抢占，
//! 装入的既非旧地址空间也非新地址空间。

use crate::address::PhysPageNum;
use crate::address_space::AddressSpace;

#[derive(Debug)]
pub struct Cpu {
    id: usize,
    /// 中断使能
    interrupts: bool,
    guard: InterruptGuard,
    task_state: TaskState,
    /// 装入 cr3 的页目录
    root: Option<PhysPageNum>,
    /// 页表根被装入的次数，每次都会清空快表
    reloads: usize,
}

/// 任务状态段中与地址空间切换相关的部分
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskState {
    /// 陷入内核时使用的栈顶
    pub esp0: usize,
    /// I/O 位图偏移，越界即禁止用户态端口访问
    pub iomb: u16,
}

/// 中断守卫，负责中断的屏蔽与启用
#[derive(Debug, Default)]
struct InterruptGuard {
    nested_level: usize,
    /// 屏蔽之前的中断使能
    enabled_before_shield: bool,
}

impl Cpu {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            interrupts: true,
            guard: InterruptGuard::default(),
            task_state: TaskState::default(),
            root: None,
            reloads: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// 屏蔽中断，可嵌套
    pub fn push_off(&mut self) {
        let enabled = self.interrupts;
        self.interrupts = false;
        if self.guard.nested_level == 0 {
            self.guard.enabled_before_shield = enabled;
        }
        self.guard.nested_level += 1;
    }

    /// 与`push_off`配对，最外层退出时恢复原先的中断使能
    pub fn pop_off(&mut self) {
        if self.interrupts {
            panic!("pop_off: interruptible");
        }
        if self.guard.nested_level == 0 {
            panic!("pop_off: not shielded");
        }
        self.guard.nested_level -= 1;
        if self.guard.nested_level == 0 && self.guard.enabled_before_shield {
            self.interrupts = true;
        }
    }

    #[inline]
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts
    }

    /// 没有进程运行时，切换到内核页表
    pub fn switch_kvm(&mut self, kernel: &AddressSpace) {
        self.push_off();
        self.load_root(kernel.root());
        self.pop_off();
    }

    /// 切换到进程的地址空间，并令陷入时使用其内核栈
    pub fn switch_uvm(&mut self, kstack_top: usize, space: &AddressSpace) {
        if kstack_top == 0 {
            panic!("switch_uvm: no kstack");
        }

        self.push_off();
        self.task_state = TaskState {
            esp0: kstack_top,
            iomb: u16::MAX,
        };
        self.load_root(space.root());
        self.pop_off();
    }

    /// 重新装入地址空间的页表根，令修改过的页表项生效
    pub fn activate(&mut self, space: &AddressSpace) {
        self.push_off();
        self.load_root(space.root());
        self.pop_off();
    }

    #[inline]
    pub fn active_root(&self) -> Option<PhysPageNum> {
        self.root
    }

    #[inline]
    pub fn task_state(&self) -> TaskState {
        self.task_state
    }

    #[inline]
    pub fn reloads(&self) -> usize {
        self.reloads
    }

    fn load_root(&mut self, root: PhysPageNum) {
        debug_assert!(!self.interrupts, "loading cr3 with interrupts enabled");
        log::trace!("cpu{}: cr3 <- {root:?}", self.id);
        self.root = Some(root);
        self.reloads += 1;
    }
}
