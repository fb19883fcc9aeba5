mod common;

use common::{Machine, CODE_VA, DATA_VA};
use pke_kernel::config::{USER_FREE_ADDRESS_START, USER_STACK_TOP};
use pke_kernel::memory::PAGE_SIZE;
use pke_kernel::syscalls::{SYS_USER_ALLOCATE_PAGE, SYS_USER_FORK, SYS_USER_FREE_PAGE, SYS_USER_PRINT};

#[test]
fn allocate_page_hands_out_consecutive_user_pages() {
    let mut m = Machine::new(2, 256);
    let pid = m.load(b"x");
    m.start();

    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    let first = m.a0(pid) as u64;
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    let second = m.a0(pid) as u64;
    assert_eq!(first, USER_FREE_ADDRESS_START);
    assert_eq!(second, first + PAGE_SIZE as u64);

    m.write_user(pid, second + 10, b"heap");
    assert_eq!(m.read_user(pid, second + 10, 4), b"heap");
}

#[test]
fn freed_page_no_longer_translates() {
    let mut m = Machine::new(2, 256);
    let pid = m.load(b"x");
    m.start();
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    let va = m.a0(pid) as u64;
    let used = m.kernel.mem.used_frames();

    m.syscall(SYS_USER_FREE_PAGE, &[va]);
    assert_eq!(m.a0(pid), 0);
    assert_eq!(m.kernel.mem.used_frames(), used - 1);

    let slot = m.kernel.current_slot().unwrap();
    let pagetable = m.kernel.procs.get(slot).pagetable().unwrap();
    assert_eq!(pagetable.translate(&m.kernel.mem, va), None);
}

#[test]
#[should_panic(expected = "Cannot translate address")]
fn printing_from_a_freed_page_is_fatal() {
    let mut m = Machine::new(2, 256);
    let pid = m.load(b"x");
    m.start();
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    let va = m.a0(pid) as u64;
    m.syscall(SYS_USER_FREE_PAGE, &[va]);
    m.syscall(SYS_USER_PRINT, &[va, 4]);
}

#[test]
fn print_crosses_page_boundaries() {
    let mut m = Machine::new(2, 256);
    let pid = m.load(b"x");
    m.start();
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    let first = m.a0(pid) as u64;
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);

    let start = first + PAGE_SIZE as u64 - 3;
    m.write_user(pid, start, b"split!");
    m.syscall(SYS_USER_PRINT, &[start, 6]);
    assert_eq!(m.console(), "split!");
}

#[test]
fn forked_heap_is_copied_not_shared() {
    let mut m = Machine::new(3, 256);
    let parent = m.load(b"data");
    m.start();
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    let heap = m.a0(parent) as u64;
    m.write_user(parent, heap, b"before");

    m.syscall(SYS_USER_FORK, &[]);
    let child = pke_kernel::ProcessId(m.a0(parent) as u64);
    assert_eq!(m.read_user(child, heap, 6), b"before");
    assert_eq!(m.read_user(child, DATA_VA, 4), b"data");

    m.write_user(parent, heap, b"after!");
    assert_eq!(m.read_user(child, heap, 6), b"before");

    // Both sides continue handing out pages from the same heap top.
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    assert_eq!(m.a0(parent) as u64, heap + PAGE_SIZE as u64);
}

#[test]
fn exit_returns_every_user_frame() {
    let mut m = Machine::new(2, 256);
    m.load(b"x");
    let baseline = m.kernel.mem.used_frames();
    m.start();
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    assert!(m.kernel.mem.used_frames() > baseline);

    m.syscall(pke_kernel::syscalls::SYS_USER_EXIT, &[0]);
    // Trapframe and kernel stack wait for a parent that never comes.
    assert_eq!(m.kernel.mem.used_frames(), 2);
}

#[test]
#[should_panic(expected = "Cannot translate address")]
fn free_page_rejects_unaligned_addresses() {
    let mut m = Machine::new(2, 256);
    let pid = m.load(b"x");
    m.start();
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    let va = m.a0(pid) as u64;
    m.syscall(SYS_USER_FREE_PAGE, &[va + 8]);
}

#[test]
#[should_panic(expected = "is not mapped")]
fn free_page_refuses_the_user_stack() {
    let mut m = Machine::new(2, 256);
    m.load(b"x");
    m.start();
    m.syscall(SYS_USER_FREE_PAGE, &[USER_STACK_TOP - PAGE_SIZE as u64]);
}

#[test]
#[should_panic(expected = "is not mapped")]
fn free_page_refuses_program_code() {
    let mut m = Machine::new(2, 256);
    m.load(b"x");
    m.start();
    m.syscall(SYS_USER_FREE_PAGE, &[CODE_VA]);
}

#[test]
#[should_panic(expected = "is not mapped")]
fn free_page_refuses_program_data() {
    let mut m = Machine::new(2, 256);
    m.load(b"x");
    m.start();
    m.syscall(SYS_USER_FREE_PAGE, &[DATA_VA]);
}

#[test]
#[should_panic(expected = "is not mapped")]
fn free_page_refuses_heap_pages_not_yet_handed_out() {
    let mut m = Machine::new(2, 256);
    let pid = m.load(b"x");
    m.start();
    m.syscall(SYS_USER_ALLOCATE_PAGE, &[]);
    let va = m.a0(pid) as u64;
    m.syscall(SYS_USER_FREE_PAGE, &[va + PAGE_SIZE as u64]);
}
