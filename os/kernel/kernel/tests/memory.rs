mod common;

use common::{TIMEOUT, boot, boot_with, run};
use kernel::process::EXIT_WRITE_PROTECTED;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::VirtualAddress;
use kernel_sim::{Image, SimConfig, TEXT_BASE};
use kernel_syscall::{EINVAL, ENOMEM};
use kernel_vmem::FrameAlloc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

const DATA: u32 = 0x0040_1000;
const HEAP: u32 = 0x0040_2000;

fn addr(va: u32) -> i32 {
    va.cast_signed()
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap()
}

#[test]
fn segments_are_loaded() {
    let (machine, kernel) = boot();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let image = Image::new(move |p| {
        let text = p.load(TEXT_BASE.as_u32(), 4);
        let data = p.load(DATA, 5);
        p.store(DATA, b"HELLO");
        let stored = p.load(DATA, 5);
        let bss = p.load(DATA + PAGE_SIZE + 100, 16);
        s.lock().unwrap().extend([text, data, stored, bss]);
        0
    })
    .text(&[0x24, 0x02, 0x00, 0x0a])
    .data(b"hello")
    .data_pages(2);
    assert_eq!(image.heap_start(), VirtualAddress::new(0x0040_3000));
    machine.install("prog", image);

    assert_eq!(run(kernel, "prog"), 0);
    assert_eq!(
        *seen.lock().unwrap(),
        [
            vec![0x24, 0x02, 0x00, 0x0a],
            b"hello".to_vec(),
            b"HELLO".to_vec(),
            vec![0; 16]
        ]
    );
}

#[test]
fn writing_to_text_kills_the_process() {
    let (machine, kernel) = boot();
    machine.install("vandal", Image::new(|p| {
        p.store(TEXT_BASE.as_u32() + 8, &[0xff]);
        0
    }));
    let frames = machine.free_frames();

    assert_eq!(run(kernel, "vandal"), EXIT_WRITE_PROTECTED);
    assert_eq!(machine.free_frames(), frames);
    assert_eq!(machine.halted(), None);
}

#[test]
fn recycled_frames_are_zeroed() {
    let (machine, kernel) = boot();
    machine.install("scribble", Image::new(|p| {
        if p.memlimit(HEAP + 4 * PAGE_SIZE) < 0 {
            return 1;
        }
        for page in 0..4 {
            p.store(HEAP + page * PAGE_SIZE, &[0xff; 64]);
        }
        p.store(DATA, &[0xff; 64]);
        0
    }));
    machine.install("check", Image::new(|p| {
        if p.memlimit(HEAP + 4 * PAGE_SIZE) < 0 {
            return 1;
        }
        let heap = (0..4).all(|page| p.load(HEAP + page * PAGE_SIZE, 64).iter().all(|&b| b == 0));
        let data = p.load(DATA, 64).iter().all(|&b| b == 0);
        i32::from(!(heap && data))
    }));

    assert_eq!(run(kernel, "scribble"), 0);
    assert_eq!(run(kernel, "check"), 0);
}

#[test]
fn evicted_entries_are_refilled() {
    let (machine, kernel) = boot();
    let m = Arc::clone(&machine);
    let seen = Arc::new(Mutex::new(None));
    let s = Arc::clone(&seen);
    machine.install("prog", Image::new(move |p| {
        p.store_word(DATA, 0xdead_beef);
        kernel_vmem::tlb::flush_all(&*m);
        let value = p.load_word(DATA);
        let asid = p.asid();
        let resident = m
            .tlb()
            .slots()
            .iter()
            .any(|e| e.vpn2() == VirtualAddress::new(DATA).vpn2() && e.asid() == asid);
        *s.lock().unwrap() = Some((value, resident));
        0
    }));

    assert_eq!(run(kernel, "prog"), 0);
    assert_eq!(*seen.lock().unwrap(), Some((0xdead_beef, true)));
}

#[test]
fn concurrent_processes_keep_their_own_memory() {
    let (machine, kernel) = boot();
    let image = |marker: u32| {
        Image::new(move |p| {
            let mut wrong = 0;
            for i in 0..200 {
                p.store_word(DATA, marker + i);
                std::thread::yield_now();
                if p.load_word(DATA) != marker + i {
                    wrong += 1;
                }
            }
            wrong
        })
    };
    machine.install("a", image(0x1000_0000));
    machine.install("b", image(0x2000_0000));

    let a = kernel.spawn("a").unwrap();
    let b = kernel.spawn("b").unwrap();
    assert_eq!(kernel.join(a.as_i32()), Ok(0));
    assert_eq!(kernel.join(b.as_i32()), Ok(0));
}

#[test]
fn asids_wrap_without_stale_translations() {
    let (machine, kernel) = boot();
    let counter = Arc::new(AtomicU32::new(1));
    let c = Arc::clone(&counter);
    machine.install("prog", Image::new(move |p| {
        let fresh = p.load_word(DATA) == 0;
        let n = c.fetch_add(1, Ordering::Relaxed);
        p.store_word(DATA, n);
        i32::from(!(fresh && p.load_word(DATA) == n))
    }));

    for _ in 0..300 {
        assert_eq!(run(kernel, "prog"), 0);
    }
    assert_eq!(counter.load(Ordering::Relaxed), 301);
}

#[test]
fn unmapped_access_stops_the_machine() {
    let (machine, kernel) = boot();
    machine.install("wild", Image::new(|p| {
        p.load(0x1000_0000, 1);
        0
    }));

    kernel.spawn("wild").unwrap();
    let halt = machine.wait_for_halt(TIMEOUT).unwrap();
    assert!(halt.is_panic_containing("unmapped address 0x10000000"), "{halt:?}");
}

#[test]
fn heap_grows_and_shrinks() {
    let (machine, kernel) = boot();
    let m = Arc::clone(&machine);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    machine.install("heap", Image::new(move |p| {
        let start = m.free_frames();
        let mut codes = vec![p.memlimit(0), p.memlimit(HEAP + 5000)];
        p.store(HEAP, b"y");
        p.store(HEAP + 4999, b"x");
        codes.push(p.memlimit(0));
        let grown = start - m.free_frames();

        codes.push(p.memlimit(HEAP + 10));
        let kept = p.load(HEAP, 1)[0];
        let shrunk = start - m.free_frames();
        *s.lock().unwrap() = vec![codes, vec![count(grown), count(shrunk), i32::from(kept)]];
        0
    }));

    assert_eq!(run(kernel, "heap"), 0);
    let seen = seen.lock().unwrap();
    assert_eq!(
        seen[0],
        [addr(HEAP), addr(HEAP + 5000), addr(HEAP + 5000), addr(HEAP + 10)]
    );
    assert_eq!(seen[1], [2, 1, i32::from(b'y')]);
}

#[test]
fn shrunk_heap_is_unmapped() {
    let (machine, kernel) = boot();
    machine.install("heap", Image::new(|p| {
        p.memlimit(HEAP + PAGE_SIZE);
        p.store(HEAP, b"z");
        p.memlimit(HEAP);
        p.load(HEAP, 1);
        0
    }));

    kernel.spawn("heap").unwrap();
    let halt = machine.wait_for_halt(TIMEOUT).unwrap();
    assert!(halt.is_panic_containing("unmapped"), "{halt:?}");
}

#[test]
fn memlimit_rejects_ends_outside_the_heap() {
    let (machine, kernel) = boot();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    machine.install("heap", Image::new(move |p| {
        let codes = [
            p.memlimit(HEAP - 4),
            p.memlimit(0x7fff_e001),
            p.memlimit(0x8000_0000),
            p.memlimit(0),
        ];
        s.lock().unwrap().extend(codes);
        0
    }));

    assert_eq!(run(kernel, "heap"), 0);
    assert_eq!(*seen.lock().unwrap(), [EINVAL, EINVAL, EINVAL, addr(HEAP)]);
}

#[test]
fn memlimit_failure_leaves_the_heap_unchanged() {
    let (machine, kernel) = boot();
    let m = Arc::clone(&machine);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    machine.install("greedy", Image::new(move |p| {
        let before = m.free_frames();
        let too_many = p.memlimit(HEAP + 40 * PAGE_SIZE);
        let restored = m.free_frames() == before;
        let end = p.memlimit(0);
        let fits = p.memlimit(HEAP + 4 * PAGE_SIZE);
        p.store(HEAP + 3 * PAGE_SIZE, b"ok");
        s.lock()
            .unwrap()
            .extend([too_many, i32::from(restored), end, fits]);
        0
    }));

    assert_eq!(run(kernel, "greedy"), 0);
    assert_eq!(
        *seen.lock().unwrap(),
        [ENOMEM, 1, addr(HEAP), addr(HEAP + 4 * PAGE_SIZE)]
    );
}

#[test]
fn memlimit_out_of_frames() {
    // Frame 0 is reserved and the process takes three.
    let (machine, kernel) = boot_with(SimConfig {
        frames: 8,
        ..SimConfig::default()
    });
    let m = Arc::clone(&machine);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    machine.install("greedy", Image::new(move |p| {
        let free = m.free_frames();
        let codes = [
            p.memlimit(HEAP + 6 * PAGE_SIZE),
            count(m.free_frames()),
            p.memlimit(HEAP + 4 * PAGE_SIZE),
            count(free),
        ];
        s.lock().unwrap().extend(codes);
        0
    }));

    assert_eq!(run(kernel, "greedy"), 0);
    assert_eq!(
        *seen.lock().unwrap(),
        [ENOMEM, 4, addr(HEAP + 4 * PAGE_SIZE), 4]
    );
    assert_eq!(machine.free_frames(), 7);
}
