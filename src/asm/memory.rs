//! Executable memory for finished code.
//!
//! A `CodeBuffer` is copied into an mmap-backed region that starts out
//! writable, is filled with the generated bytes and is then flipped to
//! read-and-execute. The protection change is one way; once the region
//! is executable it can no longer be written through this type.

use std::ptr::NonNull;

/// Errors raised while mapping or protecting code memory.
#[derive(Debug)]
pub enum MemoryError {
    AllocationFailed,
    ProtectionFailed,
    InvalidSize,
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "memory allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "memory protection change failed"),
            MemoryError::InvalidSize => write!(f, "invalid memory size"),
        }
    }
}

impl std::error::Error for MemoryError {}

/// A page-aligned block of memory that machine code runs from.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    size: usize,
    executable: bool,
}

impl ExecutableMemory {
    /// Map a writable block of at least `size` bytes. The size is
    /// rounded up to a whole number of pages.
    pub fn new(size: usize) -> Result<Self, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize);
        }
        let page_size = Self::page_size();
        let aligned_size = (size + page_size - 1) & !(page_size - 1);
        let ptr = Self::alloc(aligned_size)?;

        Ok(Self {
            ptr,
            size: aligned_size,
            executable: false,
        })
    }

    /// Get the page size of the current system.
    fn page_size() -> usize {
        #[cfg(unix)]
        {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        }
        #[cfg(not(unix))]
        {
            4096
        }
    }

    #[cfg(unix)]
    fn alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed);
        }
        NonNull::new(ptr as *mut u8).ok_or(MemoryError::AllocationFailed)
    }

    /// Plain allocation for targets without mmap. The block is not
    /// actually executable there.
    #[cfg(not(unix))]
    fn alloc(size: usize) -> Result<NonNull<u8>, MemoryError> {
        let layout = std::alloc::Layout::from_size_align(size, Self::page_size())
            .map_err(|_| MemoryError::InvalidSize)?;
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(MemoryError::AllocationFailed)
    }

    /// Get the mapped size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Get a pointer to the start of the block.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Copy bytes into the block at the given offset. Fails once the
    /// block has been made executable or when the bytes do not fit.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        if self.executable {
            return Err(MemoryError::ProtectionFailed);
        }
        if offset + data.len() > self.size {
            return Err(MemoryError::InvalidSize);
        }
        unsafe {
            let dest = self.ptr.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dest, data.len());
        }
        Ok(())
    }

    /// Flip the block to read-and-execute protection. Idempotent.
    #[cfg(unix)]
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        if self.executable {
            return Ok(());
        }
        let result = unsafe {
            libc::mprotect(
                self.ptr.as_ptr() as *mut libc::c_void,
                self.size,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if result != 0 {
            return Err(MemoryError::ProtectionFailed);
        }
        self.executable = true;
        Ok(())
    }

    /// Without mmap the protection cannot be changed; the block is only
    /// marked read-only for `write`.
    #[cfg(not(unix))]
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        self.executable = true;
        Ok(())
    }

    /// Get the start of the block as a callable function pointer, or
    /// `None` while the block is still writable.
    ///
    /// # Safety
    /// The caller must guarantee that the block holds valid machine
    /// code for the executing architecture and that `F` is a function
    /// pointer type with the code's actual signature.
    pub unsafe fn as_fn<F: Copy>(&self) -> Option<F> {
        if !self.executable || std::mem::size_of::<F>() != std::mem::size_of::<fn()>() {
            return None;
        }
        let entry = self.ptr.as_ptr();
        Some(unsafe { std::mem::transmute_copy(&entry) })
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
        #[cfg(not(unix))]
        {
            let layout = std::alloc::Layout::from_size_align(self.size, Self::page_size())
                .expect("layout mismatch with allocation");
            unsafe {
                std::alloc::dealloc(self.ptr.as_ptr(), layout);
            }
        }
    }
}

// The block is exclusively owned and never aliased after construction.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}
