//! Keyed GPU buffer pool.
//!
//! Buffers are looked up by a semantic key (`"query"`, `"vectors"`, …) and
//! only reallocated when a request exceeds the pooled size. Growth adds 20%
//! headroom so repeated calls of a slowly growing shape stop reallocating.

use std::collections::HashMap;

use tracing::debug;

use crate::gpu::GpuError;

/// Growth factor applied when a pooled buffer is too small.
pub(crate) const GROWTH_HEADROOM: f64 = 1.2;

/// Round up to wgpu's copy alignment.
pub(crate) fn align4(bytes: u64) -> u64 {
    (bytes + 3) & !3
}

/// Size to allocate for a request of `requested` bytes under `limit`.
pub(crate) fn grown_size(requested: u64, limit: u64) -> Result<u64, GpuError> {
    if requested > limit {
        return Err(GpuError::BufferTooLarge { requested, limit });
    }
    let padded = align4(((requested as f64) * GROWTH_HEADROOM).ceil() as u64);
    Ok(padded.min(align4(limit).max(align4(requested))).max(4))
}

struct PooledBuffer {
    buffer: wgpu::Buffer,
    usage: wgpu::BufferUsages,
}

pub(crate) struct BufferPool {
    buffers: HashMap<&'static str, PooledBuffer>,
    limit: u64,
    allocations: u64,
}

impl BufferPool {
    pub fn new(limit: u64) -> Self {
        Self {
            buffers: HashMap::new(),
            limit,
            allocations: 0,
        }
    }

    /// Make sure `key` holds a buffer of at least `size` bytes with `usage`.
    pub fn ensure(
        &mut self,
        device: &wgpu::Device,
        key: &'static str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<(), GpuError> {
        if let Some(existing) = self.buffers.get(key) {
            if existing.buffer.size() >= size && existing.usage.contains(usage) {
                return Ok(());
            }
        }
        let mut alloc = grown_size(size, self.limit)?;
        if usage.contains(wgpu::BufferUsages::UNIFORM) {
            // Uniform bindings are sized in 16-byte rows.
            alloc = (alloc + 15) & !15;
        }
        debug!(key, requested = size, alloc, "allocating GPU buffer");
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(key),
            size: alloc,
            usage,
            mapped_at_creation: false,
        });
        if let Some(old) = self.buffers.insert(key, PooledBuffer { buffer, usage }) {
            old.buffer.destroy();
        }
        self.allocations += 1;
        Ok(())
    }

    /// Like [`ensure`](Self::ensure), but the first `keep` bytes of the old
    /// buffer survive a reallocation. `usage` must include `COPY_SRC` and
    /// `COPY_DST`.
    pub fn ensure_preserving(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        key: &'static str,
        size: u64,
        keep: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<(), GpuError> {
        let old_size = match self.buffers.get(key) {
            Some(existing) if existing.buffer.size() >= size => return Ok(()),
            Some(existing) => existing.buffer.size(),
            None => 0,
        };
        let alloc = grown_size(size, self.limit)?;
        debug!(key, old_size, alloc, keep, "growing GPU buffer in place");
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(key),
            size: alloc,
            usage,
            mapped_at_creation: false,
        });

        let keep = align4(keep.min(old_size));
        if let Some(old) = self.buffers.remove(key) {
            if keep > 0 {
                let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("holomem-buffer-grow"),
                });
                encoder.copy_buffer_to_buffer(&old.buffer, 0, &buffer, 0, keep);
                queue.submit(Some(encoder.finish()));
            }
            // Dropped, not destroyed: the copy above may still be in flight.
            drop(old);
        }
        self.buffers.insert(key, PooledBuffer { buffer, usage });
        self.allocations += 1;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<&wgpu::Buffer, GpuError> {
        self.buffers
            .get(key)
            .map(|p| &p.buffer)
            .ok_or_else(|| GpuError::Dispatch(format!("buffer '{key}' was never allocated")))
    }

    /// Drop one pooled buffer (e.g. a staging buffer left mapped-pending).
    pub fn discard(&mut self, key: &str) {
        if let Some(old) = self.buffers.remove(key) {
            old.buffer.destroy();
        }
    }

    pub fn destroy_all(&mut self) {
        for (_, pooled) in self.buffers.drain() {
            pooled.buffer.destroy();
        }
    }

    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn total_bytes(&self) -> u64 {
        self.buffers.values().map(|p| p.buffer.size()).sum()
    }
}
