//! # AArch64 Port Layer
//!
//! Context switching for the AAPCS64 ABI: `x19`–`x28`, the frame pointer,
//! the link register, `sp` and the low halves of `v8`–`v15`. The link
//! register doubles as the resume address.

use core::arch::naked_asm;

/// Saved callee-saved state of a suspended thread.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    /// x19..=x28
    x: [u64; 10],
    fp: u64,
    lr: u64,
    sp: u64,
    /// d8..=d15
    d: [u64; 8],
}

impl Context {
    pub const EMPTY: Context = Context {
        x: [0; 10],
        fp: 0,
        lr: 0,
        sp: 0,
        d: [0; 8],
    };

    /// Build a context that starts executing `start` on a fresh stack
    /// whose highest address is `stack_top`.
    ///
    /// # Safety
    /// `stack_top` must be the end of a writable stack region.
    pub unsafe fn prepare(&mut self, stack_top: *mut u8, start: extern "C" fn() -> !) {
        *self = Context::EMPTY;
        self.sp = (stack_top as usize as u64) & !0xF;
        self.lr = start as usize as u64;
    }
}

/// Save the running thread's state into `_save` and resume `_restore`.
///
/// Returns when some later switch restores `_save`.
///
/// # Safety
/// - Preemption must be masked.
/// - `_save` must be writable; `_restore` must hold a context produced by a
///   previous `switch` or by [`Context::prepare`], whose stack is still
///   mapped.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_save: *mut Context, _restore: *const Context) {
    naked_asm!(
        // --- Save current context (x0) ---
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // --- Restore next context (x1) ---
        "ldp x19, x20, [x1, #0x00]",
        "ldp x21, x22, [x1, #0x10]",
        "ldp x23, x24, [x1, #0x20]",
        "ldp x25, x26, [x1, #0x30]",
        "ldp x27, x28, [x1, #0x40]",
        "ldp x29, x30, [x1, #0x50]",
        "ldr x9, [x1, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}
