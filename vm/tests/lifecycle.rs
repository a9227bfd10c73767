use vm::config::{DEVSPACE, KERNBASE, KERNLINK, PAGE_SIZE};
use vm::{AddressSpace, Cpu, Layout, PhysMemory, VirtAddr, VmError};

fn layout() -> Layout {
    Layout::new(0x40_0000, 0x10_8000, 0x20_0000, 4)
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn kernel_mappings_are_installed() {
    let layout = layout();
    let mut mem = layout.memory();
    let space = AddressSpace::new(&mut mem, &layout).unwrap();

    let io = space.translate(&mem, VirtAddr::from(KERNBASE)).unwrap();
    assert!(io.is_present() && io.is_writable() && !io.is_user());
    assert_eq!(usize::from(io.ppn()), 0);

    let text = space.translate(&mem, VirtAddr::from(KERNLINK)).unwrap();
    assert!(text.is_present() && !text.is_writable());
    assert_eq!(usize::from(text.ppn()), 0x100);

    let data = space.translate(&mem, VirtAddr::from(KERNBASE + 0x10_8000)).unwrap();
    assert!(data.is_writable());
    assert_eq!(usize::from(data.ppn()), 0x108);

    let dev = space.translate(&mem, VirtAddr::from(DEVSPACE)).unwrap();
    assert!(dev.is_present() && dev.is_writable());
    assert_eq!(usize::from(dev.ppn()), DEVSPACE / PAGE_SIZE);
    let last = space.translate(&mem, VirtAddr::from(0xFFFF_F000)).unwrap();
    assert!(last.is_present());

    assert_eq!(space.size(), 0);
    assert!(space.translate(&mem, VirtAddr::from(0)).is_none());
}

#[test]
#[should_panic(expected = "too high")]
fn ram_overlapping_devices_is_fatal() {
    let layout = Layout::new(0x7F00_0000, 0x10_8000, 0x7EFF_0000, 4);
    let mut mem = PhysMemory::new(layout.kernel_end, layout.phys_top);
    let _ = AddressSpace::new(&mut mem, &layout);
}

#[test]
fn create_fails_when_frames_run_out() {
    let layout = layout();
    let mut mem = PhysMemory::new(layout.phys_top - 4 * PAGE_SIZE, layout.phys_top);
    assert_eq!(
        AddressSpace::new(&mut mem, &layout).unwrap_err(),
        VmError::OutOfMemory
    );
    // 已分配的页表全部归还
    assert_eq!(mem.allocated_frames(), 0);
}

#[test]
fn grow_zero_fills_and_maps_user_pages() {
    init_logger();
    let layout = layout();
    let mut mem = layout.memory();
    let mut space = AddressSpace::new(&mut mem, &layout).unwrap();

    assert_eq!(space.grow(&mut mem, 3 * PAGE_SIZE), Ok(3 * PAGE_SIZE));
    assert_eq!(space.mapped_pages(&mem).len(), 3);
    for va in space.mapped_pages(&mem) {
        let entry = space.translate(&mem, va).unwrap();
        assert!(entry.is_present() && entry.is_writable() && entry.is_user());
        assert!(mem.page(entry.ppn().into()).iter().all(|&b| b == 0));
    }

    // 缩小的请求不算增长
    assert_eq!(space.grow(&mut mem, PAGE_SIZE), Ok(3 * PAGE_SIZE));
    assert_eq!(
        space.grow(&mut mem, KERNBASE),
        Err(VmError::AboveUserLimit(KERNBASE))
    );
}

#[test]
fn failed_grow_rolls_back() {
    let layout = layout();
    let mut mem = layout.memory();
    let mut space = AddressSpace::new(&mut mem, &layout).unwrap();
    space.grow(&mut mem, 2 * PAGE_SIZE).unwrap();

    let free = mem.free_frames();
    let too_much = (free + 1) * PAGE_SIZE + 2 * PAGE_SIZE;
    assert_eq!(space.grow(&mut mem, too_much), Err(VmError::OutOfMemory));
    assert_eq!(space.size(), 2 * PAGE_SIZE);
    assert_eq!(mem.free_frames(), free);
    assert_eq!(space.mapped_pages(&mem).len(), 2);
}

#[test]
fn grow_shrink_destroy_leaks_nothing() {
    let layout = layout();
    let mut mem = layout.memory();
    let untouched = mem.free_frames();

    let mut space = AddressSpace::new(&mut mem, &layout).unwrap();
    let baseline = mem.free_frames();
    // 5个用户页面，外加一张用户页表
    space.grow(&mut mem, 5 * PAGE_SIZE).unwrap();
    assert_eq!(mem.free_frames(), baseline - 6);

    // 页表留到销毁时才回收
    assert_eq!(space.shrink(&mut mem, 0), 0);
    assert_eq!(mem.free_frames(), baseline - 1);
    assert!(space.mapped_pages(&mem).is_empty());

    space.grow(&mut mem, 7 * PAGE_SIZE).unwrap();
    space.destroy(&mut mem);
    assert_eq!(mem.free_frames(), untouched);
}

#[test]
fn shrink_frees_tail_pages() {
    let layout = layout();
    let mut mem = layout.memory();
    let mut space = AddressSpace::new(&mut mem, &layout).unwrap();
    space.grow(&mut mem, 2 * PAGE_SIZE).unwrap();

    assert_eq!(space.shrink(&mut mem, PAGE_SIZE), PAGE_SIZE);
    assert_eq!(space.mapped_pages(&mem).len(), 1);
    // 扩大的请求不算收缩
    assert_eq!(space.shrink(&mut mem, 4 * PAGE_SIZE), PAGE_SIZE);

    space.destroy(&mut mem);
    assert_eq!(mem.allocated_frames(), 0);
}

#[test]
fn duplicate_copies_every_page() {
    let layout = layout();
    let mut mem = layout.memory();
    let mut parent = AddressSpace::new(&mut mem, &layout).unwrap();
    parent.grow(&mut mem, 3 * PAGE_SIZE).unwrap();
    parent
        .copy_to_user(&mut mem, VirtAddr::from(PAGE_SIZE - 3), b"across pages")
        .unwrap();

    let child = parent.duplicate(&mut mem).unwrap();
    assert_eq!(child.size(), parent.size());

    let mut buf = [0; 12];
    child
        .copy_from_user(&mem, VirtAddr::from(PAGE_SIZE - 3), &mut buf)
        .unwrap();
    assert_eq!(&buf, b"across pages");

    // 页帧各自独占
    for va in parent.mapped_pages(&mem) {
        let mine = parent.translate(&mem, va).unwrap();
        let theirs = child.translate(&mem, va).unwrap();
        assert_ne!(mine.ppn(), theirs.ppn());
        assert_eq!(mine.flags(), theirs.flags());
    }

    child
        .copy_to_user(&mut mem, VirtAddr::from(0), b"child")
        .unwrap();
    let mut parent_view = [0; 5];
    parent
        .copy_from_user(&mem, VirtAddr::from(0), &mut parent_view)
        .unwrap();
    assert_eq!(parent_view, [0; 5]);

    child.destroy(&mut mem);
    parent.destroy(&mut mem);
    assert_eq!(mem.allocated_frames(), 0);
}

#[test]
fn duplicate_carries_ciphertext_and_working_set() {
    let layout = layout();
    let mut mem = layout.memory();
    let mut cpu = Cpu::new(0);
    let mut parent = AddressSpace::new(&mut mem, &layout).unwrap();
    parent.grow(&mut mem, 6 * PAGE_SIZE).unwrap();
    let pattern: Vec<u8> = (0..6 * PAGE_SIZE).map(|i| (i % 251) as u8).collect();
    parent
        .copy_to_user(&mut mem, VirtAddr::from(0), &pattern)
        .unwrap();
    parent
        .encrypt_range(&mut mem, &mut cpu, VirtAddr::from(0), 6)
        .unwrap();
    // 容量为4：第5个页面挤掉槽0的页面0，指针停在槽1
    for page in 0..5 {
        parent
            .decrypt(&mut mem, &mut cpu, VirtAddr::from(page * PAGE_SIZE))
            .unwrap();
    }
    assert_eq!(parent.working_set().hand(), 1);

    let mut child = parent.duplicate(&mut mem).unwrap();

    let (mine, theirs) = (parent.working_set(), child.working_set());
    assert_eq!(theirs.len(), mine.len());
    assert_eq!(theirs.hand(), mine.hand());
    for index in 0..mine.capacity() {
        let (p, c) = (mine.slot(index).unwrap(), theirs.slot(index).unwrap());
        assert_eq!(c.vpn, p.vpn);
        let va = VirtAddr::from(c.vpn);
        assert_eq!(child.page_table().find(&mem, va), Some(c.pte));
        assert_ne!(c.pte, p.pte);
    }

    for page in [0, 5] {
        let va = VirtAddr::from(page * PAGE_SIZE);
        let (p, c) = (
            parent.translate(&mem, va).unwrap(),
            child.translate(&mem, va).unwrap(),
        );
        assert!(c.is_encrypted());
        assert_eq!(c.flags(), p.flags());
        assert_ne!(c.ppn(), p.ppn());
        assert_eq!(
            mem.page(c.ppn().into()),
            mem.page(p.ppn().into()),
            "page {page} not copied as ciphertext"
        );
    }

    let va = VirtAddr::from(5 * PAGE_SIZE);
    child.decrypt(&mut mem, &mut cpu, va).unwrap();
    let mut plain = vec![0; PAGE_SIZE];
    child.copy_from_user(&mem, va, &mut plain).unwrap();
    assert_eq!(&plain[..], &pattern[5 * PAGE_SIZE..]);
    assert!(parent.translate(&mem, va).unwrap().is_encrypted());
    assert!(!parent.working_set().contains_page(va.page_number()));

    child.destroy(&mut mem);
    parent.destroy(&mut mem);
    assert_eq!(mem.allocated_frames(), 0);
}

#[test]
fn duplicate_out_of_memory_discards_the_copy() {
    let layout = layout();
    let mut mem = layout.memory();
    let before = mem.free_frames();
    let probe = AddressSpace::new(&mut mem, &layout).unwrap();
    let kernel_cost = before - mem.free_frames();
    probe.destroy(&mut mem);

    let mut parent = AddressSpace::new(&mut mem, &layout).unwrap();
    // 留下的页帧够建内核映射，但不够复制全部用户页面
    let spare = mem.free_frames() - kernel_cost - 4 - 1;
    parent.grow(&mut mem, spare * PAGE_SIZE).unwrap();
    assert_eq!(mem.free_frames(), kernel_cost + 4);

    let before = mem.free_frames();
    assert_eq!(parent.duplicate(&mut mem).unwrap_err(), VmError::OutOfMemory);
    assert_eq!(mem.free_frames(), before);
}

#[test]
fn load_segment_reads_into_mapped_pages() {
    let layout = layout();
    let mut mem = layout.memory();
    let mut space = AddressSpace::new(&mut mem, &layout).unwrap();
    space.grow(&mut mem, 2 * PAGE_SIZE).unwrap();

    let image: Vec<u8> = (0..PAGE_SIZE + 100).map(|i| i as u8).collect();
    let mut reader = &image[..];
    space
        .load_segment(&mut mem, VirtAddr::from(0), &mut reader, 50, PAGE_SIZE + 50)
        .unwrap();

    let mut buf = vec![0; PAGE_SIZE + 50];
    space.copy_from_user(&mem, VirtAddr::from(0), &mut buf).unwrap();
    assert_eq!(&buf[..], &image[50..]);
}

#[test]
fn load_segment_failures() {
    let layout = layout();
    let mut mem = layout.memory();
    let mut space = AddressSpace::new(&mut mem, &layout).unwrap();
    space.grow(&mut mem, PAGE_SIZE).unwrap();

    let image = [0x90; 64];
    let mut reader = &image[..];
    assert_eq!(
        space.load_segment(&mut mem, VirtAddr::from(0), &mut reader, 0, 128),
        Err(VmError::ShortRead {
            expected: 128,
            actual: 64
        })
    );
    assert_eq!(
        space.load_segment(&mut mem, VirtAddr::from(0), &mut reader, 0, 2 * PAGE_SIZE),
        Err(VmError::ShortRead {
            expected: PAGE_SIZE,
            actual: 64
        })
    );
    assert_eq!(
        space.load_segment(&mut mem, VirtAddr::from(PAGE_SIZE), &mut reader, 0, 16),
        Err(VmError::NoMapping(VirtAddr::from(PAGE_SIZE)))
    );
}

#[test]
fn first_process_page() {
    let layout = layout();
    let mut mem = layout.memory();
    let mut space = AddressSpace::new(&mut mem, &layout).unwrap();
    space.init_first_page(&mut mem, b"\x90\x90\xcd\x40").unwrap();

    assert_eq!(space.size(), PAGE_SIZE);
    let mut code = [0; 6];
    space.copy_from_user(&mem, VirtAddr::from(0), &mut code).unwrap();
    assert_eq!(code, [0x90, 0x90, 0xcd, 0x40, 0, 0]);
}

#[test]
#[should_panic(expected = "more than a page")]
fn first_process_code_must_fit_a_page() {
    let layout = layout();
    let mut mem = layout.memory();
    let mut space = AddressSpace::new(&mut mem, &layout).unwrap();
    let _ = space.init_first_page(&mut mem, &[0; PAGE_SIZE]);
}
