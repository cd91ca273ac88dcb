//! AArch64 architecture support

use aarch64_cpu::asm::barrier;

use crate::ffa::{FfaArgs, FfaConduit};

/// FF-A conduit trapping into the SPM with `svc #0`
#[derive(Debug, Default, Clone, Copy)]
pub struct SvcConduit;

impl FfaConduit for SvcConduit {
    fn call(&self, args: FfaArgs) -> FfaArgs {
        let mut x = args.x;
        // SAFETY: SMCCC calls clobber only x0-x17; x0-x7 carry the result.
        unsafe {
            core::arch::asm!(
                "svc #0",
                inout("x0") x[0],
                inout("x1") x[1],
                inout("x2") x[2],
                inout("x3") x[3],
                inout("x4") x[4],
                inout("x5") x[5],
                inout("x6") x[6],
                inout("x7") x[7],
                out("x8") _, out("x9") _, out("x10") _, out("x11") _,
                out("x12") _, out("x13") _, out("x14") _, out("x15") _,
                out("x16") _, out("x17") _,
                options(nostack),
            );
        }
        FfaArgs { x }
    }
}

/// Wait for outstanding translation changes, then resynchronize fetch
pub fn memory_attributes_barrier() {
    barrier::dsb(barrier::ISH);
    barrier::isb(barrier::SY);
}
