mod cli;
mod image_file;

use std::error::Error;

use clap::Parser;
use vm::config::PAGE_SIZE;
use vm::{Access, AddressSpace, Cpu, Layout, PtEntry, VirtAddr};

pub use self::{cli::Cli, image_file::ImageFile};

/// 探测进程内核栈的栈顶
const KSTACK_TOP: usize = 0x8040_0000;

/// 每页以页号打头，其后是递增的字节
fn page_pattern(page: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..PAGE_SIZE).map(|i| i as u8).collect();
    bytes[..8].copy_from_slice(&(page as u64).to_le_bytes());
    bytes
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let layout = Layout::new(cli.phys_mib << 20, 0x10_8000, 0x20_0000, cli.capacity);
    let mut mem = layout.memory();
    let mut cpu = Cpu::new(0);
    println!(
        "phys_top={:#x} frames={} capacity={}",
        layout.phys_top,
        mem.free_frames(),
        layout.working_set_capacity
    );

    let kernel = AddressSpace::new(&mut mem, &layout)?;
    cpu.switch_kvm(&kernel);

    let mut space = AddressSpace::new(&mut mem, &layout)?;
    let size = space.grow(&mut mem, cli.pages * PAGE_SIZE)?;
    match &cli.image {
        Some(path) => {
            let mut image = ImageFile::open(path)?;
            let len = image.size()?.min(size);
            if let Err(e) = space.load_segment(&mut mem, VirtAddr::from(0), &mut image, 0, len) {
                // 读取不足多半源于 I/O 错误，优先报告之
                return Err(match image.take_error() {
                    Some(io) => io.into(),
                    None => e.into(),
                });
            }
            log::info!("loaded {len:#x} bytes from {path:?}");
        }
        None => {
            for page in 0..cli.pages {
                let va = VirtAddr::from(page * PAGE_SIZE);
                space.copy_to_user(&mut mem, va, &page_pattern(page))?;
            }
        }
    }

    cpu.switch_uvm(KSTACK_TOP, &space);
    space.encrypt_range(&mut mem, &mut cpu, VirtAddr::from(0), cli.pages)?;
    for &page in &cli.touch {
        space.user_access(&mut mem, &mut cpu, VirtAddr::from(page * PAGE_SIZE), Access::Read)?;
    }

    let mut entries = vec![PtEntry::default(); cli.pages];
    let count = space.enumerate_entries(&mem, &mut entries, cli.working_set);
    println!("pdx  ptx  ppage    P W E A");
    for e in &entries[..count] {
        println!(
            "{:<4} {:<4} {:#07x}  {} {} {} {}",
            e.pdx, e.ptx, e.ppage, e.present, e.writable, e.encrypted, e.referenced
        );
    }
    println!(
        "working set {}/{}, hand={}, cr3 reloads={}",
        space.working_set().len(),
        space.working_set().capacity(),
        space.working_set().hand(),
        cpu.reloads()
    );

    if let Some(page) = cli.dump {
        let target = space
            .translate_user(&mem, VirtAddr::from(page * PAGE_SIZE))
            .ok_or_else(|| format!("page {page} is not mapped"))?;
        // 在用户内存末尾另开一页接收内容
        let scratch = VirtAddr::from(space.size());
        space.grow(&mut mem, space.size() + PAGE_SIZE)?;
        space.dump_physical_page(&mut mem, target, scratch)?;

        let mut head = [0; 64];
        space.copy_from_user(&mem, scratch, &mut head)?;
        println!("frame {:?}:", target.floor());
        for line in head.chunks(16) {
            let hex: Vec<_> = line.iter().map(|b| format!("{b:02x}")).collect();
            println!("  {}", hex.join(" "));
        }
    }

    space.destroy(&mut mem);
    kernel.destroy(&mut mem);
    println!("frames in use after teardown: {}", mem.allocated_frames());

    Ok(())
}
