//! # Thread Stacks
//!
//! Every spawned thread runs on its own anonymous mapping: `GUARD_SIZE`
//! bytes of `PROT_NONE` at the low end, followed by the usable stack.
//! Stacks grow down, so an overflow runs into the guard and faults.

use core::ptr::{self, NonNull};

use crate::error::{errno, Fatal};

#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

/// A fixed-size, guarded stack mapping.
#[derive(Debug)]
pub struct Stack {
    /// Start of the mapping (the guard).
    base: NonNull<u8>,
    /// Total mapping length, guard included.
    len: usize,
    guard: usize,
}

// The mapping is owned exclusively by the slot holding it.
unsafe impl Send for Stack {}

fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

#[inline]
fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

impl Stack {
    /// Map a stack with at least `size` usable bytes above a guard of at
    /// least `guard` bytes. Both are rounded up to whole pages.
    pub fn new(size: usize, guard: usize) -> Result<Stack, Fatal> {
        let page = page_size();
        let size = round_up(size.max(page), page);
        let guard = round_up(guard, page);
        let len = size + guard;

        // SAFETY: anonymous private mapping, no existing memory involved.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_FLAGS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Fatal::StackAlloc { errno: errno() });
        }

        if guard > 0 {
            // SAFETY: the guard range lies inside the mapping just created.
            if unsafe { libc::mprotect(base, guard, libc::PROT_NONE) } != 0 {
                let errno = errno();
                // SAFETY: unmapping what we mapped above.
                unsafe { libc::munmap(base, len) };
                return Err(Fatal::StackAlloc { errno });
            }
        }

        let base = NonNull::new(base.cast::<u8>()).ok_or(Fatal::StackAlloc { errno: 0 })?;
        log::trace!("stack mapped at {:p}, {} bytes + {} guard", base, size, guard);
        Ok(Stack { base, len, guard })
    }

    /// Lowest usable address (just above the guard).
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        // SAFETY: guard < len, stays inside the mapping.
        unsafe { self.base.as_ptr().add(self.guard) }
    }

    /// One past the highest usable address; the initial stack pointer.
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // SAFETY: one-past-the-end of the mapping.
        unsafe { self.base.as_ptr().add(self.len) }
    }

    /// Usable size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.len - self.guard
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` describe a mapping this value owns.
        unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_is_page_rounded_and_writable() {
        let page = page_size();
        let stack = Stack::new(page + 1, 1).expect("mmap");

        assert_eq!(stack.size(), 2 * page);
        assert_eq!(stack.top() as usize - stack.bottom() as usize, stack.size());
        assert_eq!(stack.top() as usize % page, 0);

        // Both ends of the usable region are writable.
        unsafe {
            stack.bottom().write(0xAA);
            stack.top().sub(1).write(0x55);
            assert_eq!(stack.bottom().read(), 0xAA);
            assert_eq!(stack.top().sub(1).read(), 0x55);
        }
    }

    #[test]
    fn test_stacks_are_disjoint() {
        let a = Stack::new(crate::config::STACK_SIZE, crate::config::GUARD_SIZE).expect("mmap");
        let b = Stack::new(crate::config::STACK_SIZE, crate::config::GUARD_SIZE).expect("mmap");

        let (a_lo, a_hi) = (a.bottom() as usize, a.top() as usize);
        let (b_lo, b_hi) = (b.bottom() as usize, b.top() as usize);
        assert!(a_hi <= b_lo || b_hi <= a_lo);
        assert!(a.size() >= crate::config::STACK_SIZE);
    }
}
