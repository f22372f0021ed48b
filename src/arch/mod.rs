//! # Architecture Abstraction Layer
//!
//! Each port provides a `Context` holding a suspended thread's
//! callee-saved registers, `Context::prepare` to aim a context at a start
//! function on a fresh stack, and `switch` to move between two contexts.

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{switch, Context};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64::{switch, Context};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("uthread supports x86_64 and aarch64 only");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Stack;
    use core::cell::Cell;

    // The switch is exercised on the test's own OS thread: no scheduler and
    // no signals are involved, only two contexts handing control back and
    // forth.
    thread_local! {
        static MAIN_CTX: Cell<*mut Context> = const { Cell::new(core::ptr::null_mut()) };
        static CHILD_CTX: Cell<*mut Context> = const { Cell::new(core::ptr::null_mut()) };
        static TRACE: Cell<u32> = const { Cell::new(0) };
    }

    extern "C" fn child() -> ! {
        TRACE.with(|t| t.set(t.get() * 10 + 2));
        let (main, me) = (MAIN_CTX.with(Cell::get), CHILD_CTX.with(Cell::get));
        unsafe { switch(me, main) };
        TRACE.with(|t| t.set(t.get() * 10 + 4));
        unsafe { switch(me, main) };
        unreachable!("child resumed after finishing");
    }

    #[test]
    fn test_switch_round_trips() {
        let stack = Stack::new(64 * 1024, 4096).expect("mmap");
        let mut main = Context::EMPTY;
        let mut ctx = Context::EMPTY;
        let main_ptr: *mut Context = &mut main;
        let ctx_ptr: *mut Context = &mut ctx;
        unsafe { (*ctx_ptr).prepare(stack.top(), child) };

        MAIN_CTX.with(|c| c.set(main_ptr));
        CHILD_CTX.with(|c| c.set(ctx_ptr));

        TRACE.with(|t| t.set(1));
        unsafe { switch(main_ptr, ctx_ptr) };
        TRACE.with(|t| t.set(t.get() * 10 + 3));
        unsafe { switch(main_ptr, ctx_ptr) };

        assert_eq!(TRACE.with(Cell::get), 1234);
    }
}
