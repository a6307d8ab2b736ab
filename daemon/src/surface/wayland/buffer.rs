use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use wayland_client::protocol::{wl_buffer, wl_shm, wl_shm_pool};
use wayland_client::{Dispatch, QueueHandle};

/// A shared-memory ARGB8888 buffer.
///
/// The busy flag is the `wl_buffer` user data: set on attach, cleared when
/// the compositor sends `release`.
pub struct ShmBuffer {
    pool: wl_shm_pool::WlShmPool,
    buffer: wl_buffer::WlBuffer,
    mmap: memmap2::MmapMut,
    busy: Arc<AtomicBool>,
    width: u32,
    height: u32,
}

impl ShmBuffer {
    pub fn new<D>(
        shm: &wl_shm::WlShm,
        width: u32,
        height: u32,
        qh: &QueueHandle<D>,
    ) -> anyhow::Result<Self>
    where
        D: Dispatch<wl_shm_pool::WlShmPool, ()>
            + Dispatch<wl_buffer::WlBuffer, Arc<AtomicBool>>
            + 'static,
    {
        let stride = width * 4;
        let size = stride * height;

        let file = tempfile::tempfile()?;
        file.set_len(u64::from(size))?;

        // SAFETY: the file is private to this process and never truncated
        // while mapped.
        let mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };

        let pool = shm.create_pool(file.as_fd(), i32::try_from(size)?, qh, ());
        let busy = Arc::new(AtomicBool::new(false));
        let buffer = pool.create_buffer(
            0,
            i32::try_from(width)?,
            i32::try_from(height)?,
            i32::try_from(stride)?,
            wl_shm::Format::Argb8888,
            qh,
            Arc::clone(&busy),
        );

        Ok(Self {
            pool,
            buffer,
            mmap,
            busy,
            width,
            height,
        })
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    pub fn buffer(&self) -> &wl_buffer::WlBuffer {
        &self.buffer
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn mark_busy(&self) {
        self.busy.store(true, Ordering::Release);
    }

    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
        self.pool.destroy();
    }
}
