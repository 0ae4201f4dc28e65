//! Persistent, page-aligned device buffers with scoped map/unmap.

use super::*;

use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// Host page size persistent buffers are aligned and rounded to.
pub const PAGE_SIZE: usize = 4096;

/// Number of `T` slots in the smallest whole number of pages (at least
/// one) that holds `count` elements.
pub fn page_rounded_len<T>(count: usize) -> NbResult<usize> {
    let elem = mem::size_of::<T>().max(1);
    let bytes = count
        .checked_mul(elem)
        .ok_or(NbError::TooManyPoints(count))?;
    let pages = bytes.div_ceil(PAGE_SIZE).max(1);
    Ok(pages * PAGE_SIZE / elem)
}

/// Zeroed, page-aligned host memory for `len` elements of `T`.
struct HostPages<T> {
    ptr: NonNull<T>,
    layout: Layout,
    len: usize,
}

// SAFETY: the allocation is uniquely owned; access goes through `&mut`.
unsafe impl<T: Send> Send for HostPages<T> {}

impl<T: Copy> HostPages<T> {
    fn alloc(count: usize) -> NbResult<Self> {
        let len = page_rounded_len::<T>(count)?;
        let bytes = len * mem::size_of::<T>();
        let layout = Layout::from_size_align(bytes.max(PAGE_SIZE), PAGE_SIZE)
            .map_err(|e| NbError::InvalidConfig(format!("buffer layout: {e}")))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw.cast::<T>()).ok_or_else(|| {
            NbError::InvalidConfig(format!("could not allocate {} bytes", layout.size()))
        })?;
        Ok(Self { ptr, layout, len })
    }
}

impl<T> Drop for HostPages<T> {
    fn drop(&mut self) {
        // SAFETY: allocated in `alloc` with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr().cast::<u8>(), self.layout) };
    }
}

/// A device buffer backed by page-aligned host memory
/// (`CL_MEM_USE_HOST_PTR`), allocated once and reused in place.
///
/// The requested capacity is rounded up to whole pages. Contents are only
/// reachable through [`map_read`](Self::map_read) and
/// [`map_write`](Self::map_write); both borrow the buffer mutably, so a
/// second map cannot start before the first guard unmaps.
pub struct PinnedBuffer<T> {
    // Declared before `host`: the OpenCL object must be released before
    // the memory it wraps is freed.
    buffer: Buffer<T>,
    host: HostPages<T>,
    capacity: usize,
}

impl<T: Copy> PinnedBuffer<T> {
    /// Allocate room for `capacity` elements.
    pub fn new(context: &Context, capacity: usize) -> NbResult<Self> {
        let host = HostPages::<T>::alloc(capacity)?;
        // SAFETY: `host` outlives `buffer` (field order) and is exactly
        // `host.len` elements long.
        let buffer = unsafe {
            Buffer::<T>::create(
                context,
                CL_MEM_READ_WRITE | CL_MEM_USE_HOST_PTR,
                host.len,
                host.ptr.as_ptr().cast::<c_void>(),
            )
            .map_err(cl_err("clCreateBuffer"))?
        };
        log::debug!(
            "pinned buffer: {capacity} x {} B requested, {} B allocated",
            mem::size_of::<T>(),
            host.len * mem::size_of::<T>()
        );
        Ok(Self {
            buffer,
            host,
            capacity,
        })
    }

    /// Elements the buffer was sized for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Elements actually allocated after page rounding.
    pub fn allocated_len(&self) -> usize {
        self.host.len
    }

    pub(crate) fn buffer(&self) -> &Buffer<T> {
        &self.buffer
    }

    /// Map the first `len` elements for reading.
    pub fn map_read<'a>(
        &'a mut self,
        queue: &'a CommandQueue,
        len: usize,
    ) -> NbResult<MappedRead<'a, T>> {
        self.map(queue, len, CL_MAP_READ).map(MappedRead)
    }

    /// Map the first `len` elements for writing.
    pub fn map_write<'a>(
        &'a mut self,
        queue: &'a CommandQueue,
        len: usize,
    ) -> NbResult<MappedWrite<'a, T>> {
        self.map(queue, len, CL_MAP_WRITE).map(MappedWrite)
    }

    fn map<'a>(
        &'a mut self,
        queue: &'a CommandQueue,
        len: usize,
        flags: cl_map_flags,
    ) -> NbResult<MappedRegion<'a, T>> {
        check_capacity(len, self.capacity)?;
        let mem_obj = self.buffer.get();
        if len == 0 {
            return Ok(MappedRegion {
                queue,
                mem: mem_obj,
                ptr: NonNull::dangling(),
                len: 0,
                _buffer: PhantomData,
            });
        }

        let mut mapped: cl_mem = ptr::null_mut();
        // SAFETY: the range lies within the allocation (checked above) and
        // the map is blocking, so `mapped` is valid once this returns.
        unsafe {
            queue
                .enqueue_map_buffer(
                    &mut self.buffer,
                    CL_BLOCKING,
                    flags,
                    0,
                    len * mem::size_of::<T>(),
                    &mut mapped,
                    &[],
                )
                .map_err(cl_err("clEnqueueMapBuffer"))?;
        }
        // CL_MAP_FAILURE if the runtime hands back a null pointer.
        let ptr = NonNull::new(mapped.cast::<T>()).ok_or(NbError::OpenCl {
            op: "clEnqueueMapBuffer",
            code: -12,
        })?;
        debug_assert_eq!(ptr.as_ptr() as usize % mem::align_of::<T>(), 0);
        Ok(MappedRegion {
            queue,
            mem: mem_obj,
            ptr,
            len,
            _buffer: PhantomData,
        })
    }
}

/// A host-visible region of a [`PinnedBuffer`]; unmapped on drop.
struct MappedRegion<'a, T> {
    queue: &'a CommandQueue,
    mem: cl_mem,
    ptr: NonNull<T>,
    len: usize,
    _buffer: PhantomData<&'a mut Buffer<T>>,
}

impl<T> MappedRegion<'_, T> {
    fn as_slice(&self) -> &[T] {
        // SAFETY: `ptr` addresses `len` mapped elements (or is dangling
        // with `len == 0`) for as long as the region lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above; the region holds the buffer's only borrow.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> Drop for MappedRegion<'_, T> {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        // SAFETY: `ptr` came from mapping `mem` and is unmapped exactly once.
        let result = unsafe {
            self.queue
                .enqueue_unmap_mem_object(self.mem, self.ptr.as_ptr().cast::<c_void>(), &[])
        };
        if let Err(e) = result.and_then(|event| event.wait()) {
            log::warn!("clEnqueueUnmapMemObject failed with OpenCL error {}", e.0);
        }
    }
}

/// Read-only host view of mapped device memory.
pub struct MappedRead<'a, T>(MappedRegion<'a, T>);

impl<T> MappedRead<'_, T> {
    pub fn as_slice(&self) -> &[T] {
        self.0.as_slice()
    }
}

impl<T> Deref for MappedRead<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.0.as_slice()
    }
}

/// Writable host view of mapped device memory. Writes become visible to
/// the device when the guard is dropped.
pub struct MappedWrite<'a, T>(MappedRegion<'a, T>);

impl<T> Deref for MappedWrite<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.0.as_slice()
    }
}

impl<T> DerefMut for MappedWrite<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.0.as_mut_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounded_len_ints() {
        // 1024 i32 per page.
        assert_eq!(page_rounded_len::<i32>(0).unwrap(), 1024);
        assert_eq!(page_rounded_len::<i32>(1).unwrap(), 1024);
        assert_eq!(page_rounded_len::<i32>(1024).unwrap(), 1024);
        assert_eq!(page_rounded_len::<i32>(1025).unwrap(), 2048);
        assert_eq!(page_rounded_len::<i32>(2000 * 2000).unwrap(), 4_000_768);
    }

    #[test]
    fn test_page_rounded_len_points() {
        // 12-byte points: 2000 points = 24000 B -> 6 pages = 24576 B.
        assert_eq!(page_rounded_len::<Point>(2000).unwrap(), 2048);
        assert!(page_rounded_len::<Point>(341).unwrap() >= 341);
    }

    #[test]
    fn test_page_rounded_len_overflow() {
        assert!(matches!(
            page_rounded_len::<i32>(usize::MAX),
            Err(NbError::TooManyPoints(_))
        ));
    }

    #[test]
    fn test_host_pages_aligned_and_zeroed() {
        let pages = HostPages::<i32>::alloc(5000).unwrap();
        assert_eq!(pages.ptr.as_ptr() as usize % PAGE_SIZE, 0);
        assert!(pages.len >= 5000);
        // SAFETY: freshly allocated, zeroed, `len` elements.
        let slice = unsafe { std::slice::from_raw_parts(pages.ptr.as_ptr(), pages.len) };
        assert!(slice.iter().all(|&v| v == 0));
    }
}
