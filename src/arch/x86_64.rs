//! # x86_64 Port Layer
//!
//! Context switching for the System V AMD64 ABI.
//!
//! A switch happens at a function call boundary, so only the callee-saved
//! state has to be preserved: `rsp`, `rbp`, `rbx`, `r12`–`r15`, the MXCSR
//! control bits and the x87 control word. The resume address is the return
//! address already sitting on top of the saved stack.

use core::arch::naked_asm;

/// Saved callee-saved state of a suspended thread.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    mxcsr: u32,
    fpcw: u16,
    _pad: u16,
}

/// MXCSR after reset: all exceptions masked, round to nearest.
const MXCSR_DEFAULT: u32 = 0x1F80;
/// x87 control word after `finit`.
const FPCW_DEFAULT: u16 = 0x037F;

impl Context {
    pub const EMPTY: Context = Context {
        rsp: 0,
        rbp: 0,
        rbx: 0,
        r12: 0,
        r13: 0,
        r14: 0,
        r15: 0,
        mxcsr: MXCSR_DEFAULT,
        fpcw: FPCW_DEFAULT,
        _pad: 0,
    };

    /// Build a context that starts executing `start` on a fresh stack
    /// whose highest address is `stack_top`.
    ///
    /// ## Initial Stack Layout
    ///
    /// ```text
    /// stack_top (16-byte aligned)
    ///   [padding, 8 bytes]
    ///   [start]             <- rsp; popped by `ret` in `switch`
    /// ```
    ///
    /// After the `ret`, `rsp % 16 == 8`, exactly as if `start` had been
    /// reached through a `call`.
    ///
    /// # Safety
    /// `stack_top` must be the end of a writable region of at least 16 bytes.
    pub unsafe fn prepare(&mut self, stack_top: *mut u8, start: extern "C" fn() -> !) {
        let top = (stack_top as usize) & !0xF;
        let sp = (top - 16) as *mut u64;
        sp.write(start as usize as u64);

        *self = Context::EMPTY;
        self.rsp = sp as u64;
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
        // --- Save current context (rdi) ---
        "mov [rdi + 0x00], rsp",
        "mov [rdi + 0x08], rbp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], r12",
        "mov [rdi + 0x20], r13",
        "mov [rdi + 0x28], r14",
        "mov [rdi + 0x30], r15",
        "stmxcsr [rdi + 0x38]",
        "fnstcw [rdi + 0x3c]",
        // --- Restore next context (rsi) ---
        "mov rsp, [rsi + 0x00]",
        "mov rbp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov r12, [rsi + 0x18]",
        "mov r13, [rsi + 0x20]",
        "mov r14, [rsi + 0x28]",
        "mov r15, [rsi + 0x30]",
        "ldmxcsr [rsi + 0x38]",
        "fldcw [rsi + 0x3c]",
        // Resumed thread: back into its `switch` caller.
        // Fresh thread: into its start function.
        "ret",
    );
}
