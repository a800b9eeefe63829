#![no_std]
#![no_main]

use aya_ebpf::helpers::{
    bpf_get_current_pid_tgid, bpf_probe_read_kernel, bpf_probe_read_kernel_str_bytes,
};
use aya_ebpf::macros::{kprobe, kretprobe};
use aya_ebpf::programs::{ProbeContext, RetProbeContext};
use aya_log_ebpf::info;

#[no_mangle]
#[link_section = "license"]
static LICENSE: [u8; 4] = *b"GPL\0";

/// First field of the kernel's `struct filename`: the resolved path.
#[repr(C)]
struct Filename {
    name: *const u8,
}

/// Logs entry into do_unlinkat with the path being unlinked.
#[kprobe]
pub fn unlinkat_enter(ctx: ProbeContext) -> u32 {
    match try_unlinkat_enter(&ctx) {
        Some(ret) => ret,
        None => 0,
    }
}

fn try_unlinkat_enter(ctx: &ProbeContext) -> Option<u32> {
    let pid = (bpf_get_current_pid_tgid() >> 32) as u32;
    let filename: *const Filename = ctx.arg(1)?;
    let name_ptr = unsafe { bpf_probe_read_kernel(&(*filename).name) }.ok()?;
    let mut buf = [0u8; 64];
    let name = unsafe {
        let bytes = bpf_probe_read_kernel_str_bytes(name_ptr, &mut buf).ok()?;
        core::str::from_utf8_unchecked(bytes)
    };
    info!(ctx, "do_unlinkat entry, pid {} path {}", pid, name);
    Some(0)
}

/// Logs the return value of do_unlinkat.
#[kretprobe]
pub fn unlinkat_exit(ctx: RetProbeContext) -> u32 {
    let pid = (bpf_get_current_pid_tgid() >> 32) as u32;
    let ret: i64 = ctx.ret().unwrap_or_default();
    info!(&ctx, "do_unlinkat exit, pid {} ret {}", pid, ret);
    0
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
