#![no_std]
#![no_main]

use aya_ebpf::macros::cgroup_skb;
use aya_ebpf::programs::SkBuffContext;

use skbguard_common::{classify, PacketView, BLOCKED_TCP_PORT};

#[no_mangle]
#[link_section = "license"]
static LICENSE: [u8; 4] = *b"GPL\0";

/// The skb context seen through the classifier's window. Reads go via
/// `bpf_skb_load_bytes`, so each access carries its own bounds check.
struct SkbView<'a>(&'a SkBuffContext);

impl PacketView for SkbView<'_> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.0.len() as usize
    }

    #[inline(always)]
    fn read_u8(&self, offset: usize) -> Option<u8> {
        self.0.load::<u8>(offset).ok()
    }

    #[inline(always)]
    fn read_u16_be(&self, offset: usize) -> Option<u16> {
        self.0.load::<u16>(offset).ok().map(u16::from_be)
    }
}

#[cgroup_skb]
pub fn ingress_filter(ctx: SkBuffContext) -> i32 {
    classify(&SkbView(&ctx), BLOCKED_TCP_PORT) as i32
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
