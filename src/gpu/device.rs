//! wgpu device, pipelines and the write → dispatch → map → read cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::gpu::buffers::BufferPool;
use crate::gpu::shaders::{workgroup_count, PipelineKind};
use crate::gpu::{GpuConfig, GpuError, PowerPreference};

const F32_BYTES: u64 = std::mem::size_of::<f32>() as u64;

const STORAGE_IN: wgpu::BufferUsages =
    wgpu::BufferUsages::STORAGE.union(wgpu::BufferUsages::COPY_DST);
const STORAGE_OUT: wgpu::BufferUsages =
    wgpu::BufferUsages::STORAGE.union(wgpu::BufferUsages::COPY_SRC);
const RESIDENT: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::COPY_DST)
    .union(wgpu::BufferUsages::COPY_SRC);
const STAGING: wgpu::BufferUsages =
    wgpu::BufferUsages::MAP_READ.union(wgpu::BufferUsages::COPY_DST);
const UNIFORM: wgpu::BufferUsages =
    wgpu::BufferUsages::UNIFORM.union(wgpu::BufferUsages::COPY_DST);

/// Shared params uniform (16 bytes, matches `struct Params` in WGSL).
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    dims: u32,
    count: u32,
    reserved0: u32,
    reserved1: u32,
}

impl Params {
    fn new(dims: usize, count: usize) -> Self {
        Self {
            dims: dims as u32,
            count: count as u32,
            reserved0: 0,
            reserved1: 0,
        }
    }
}

/// A live device with compiled pipelines and a buffer pool.
pub(crate) struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipelines: HashMap<PipelineKind, wgpu::ComputePipeline>,
    buffers: BufferPool,
    lost: Arc<AtomicBool>,
    workgroup_size: u32,
    max_workgroups: u32,
    readback_timeout: Duration,
    pub adapter_name: String,
}

fn power_preference(pref: PowerPreference) -> wgpu::PowerPreference {
    match pref {
        PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
    }
}

fn instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

/// Whether any adapter is exposed to this process.
/// Largest buffer the pool may hand out. Storage buffers are bound whole,
/// so the binding limit applies as well as the allocation limit.
fn buffer_limit(limits: &wgpu::Limits) -> u64 {
    limits
        .max_buffer_size
        .min(limits.max_storage_buffer_binding_size as u64)
}

pub(crate) fn probe_adapter() -> bool {
    let instance = instance();
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::default(),
        force_fallback_adapter: false,
        compatible_surface: None,
    }))
    .is_some()
}

impl GpuContext {
    /// Request adapter and device, then compile every pipeline.
    pub fn create(config: &GpuConfig) -> Result<Self, GpuError> {
        let instance = instance();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: power_preference(config.preferred_device),
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or(GpuError::Unavailable)?;

        let info = adapter.get_info();
        let supported = adapter.limits();
        let max_bytes = config.max_buffer_bytes();
        let limits = wgpu::Limits {
            max_buffer_size: max_bytes.min(supported.max_buffer_size),
            max_storage_buffer_binding_size: (max_bytes
                .min(supported.max_storage_buffer_binding_size as u64))
                as u32,
            max_compute_workgroup_size_x: config
                .workgroup_size
                .min(supported.max_compute_workgroup_size_x),
            max_compute_invocations_per_workgroup: config
                .workgroup_size
                .min(supported.max_compute_invocations_per_workgroup),
            ..supported.clone()
        };
        if config.workgroup_size > limits.max_compute_workgroup_size_x {
            return Err(GpuError::InitFailed(format!(
                "workgroup size {} exceeds adapter limit {}",
                config.workgroup_size, limits.max_compute_workgroup_size_x
            )));
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("holomem"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
            },
            None,
        ))
        .map_err(|e| GpuError::InitFailed(e.to_string()))?;

        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        device.on_uncaptured_error(Box::new(move |err: wgpu::Error| {
            if matches!(err, wgpu::Error::OutOfMemory { .. }) {
                lost_flag.store(true, Ordering::SeqCst);
            }
            warn!("uncaptured GPU error: {err}");
        }));

        let mut pipelines = HashMap::new();
        for kind in PipelineKind::all() {
            device.push_error_scope(wgpu::ErrorFilter::Validation);
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kind.label()),
                source: wgpu::ShaderSource::Wgsl(kind.source(config.workgroup_size).into()),
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kind.label()),
                layout: None,
                module: &module,
                entry_point: "main",
            });
            if let Some(err) = pollster::block_on(device.pop_error_scope()) {
                return Err(GpuError::InitFailed(format!(
                    "{} failed to compile: {err}",
                    kind.label()
                )));
            }
            pipelines.insert(kind, pipeline);
        }

        info!(
            adapter = %info.name,
            backend = ?info.backend,
            max_buffer = limits.max_buffer_size,
            "GPU pipelines ready"
        );

        Ok(Self {
            device,
            queue,
            pipelines,
            buffers: BufferPool::new(buffer_limit(&limits)),
            lost,
            workgroup_size: config.workgroup_size,
            max_workgroups: limits.max_compute_workgroups_per_dimension,
            readback_timeout: config.readback_timeout(),
            adapter_name: info.name,
        })
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn mark_lost(&self, reason: &str) -> GpuError {
        self.lost.store(true, Ordering::SeqCst);
        GpuError::DeviceLost(reason.to_string())
    }

    pub fn allocations(&self) -> u64 {
        self.buffers.allocations()
    }

    pub fn pooled_bytes(&self) -> u64 {
        self.buffers.total_bytes()
    }

    fn write_f32(&mut self, key: &'static str, data: &[f32], usage: wgpu::BufferUsages) -> Result<(), GpuError> {
        let bytes = data.len() as u64 * F32_BYTES;
        self.buffers.ensure(&self.device, key, bytes, usage)?;
        self.queue
            .write_buffer(self.buffers.get(key)?, 0, bytemuck::cast_slice(data));
        Ok(())
    }

    fn write_params(&mut self, params: Params) -> Result<(), GpuError> {
        let bytes = std::mem::size_of::<Params>() as u64;
        self.buffers.ensure(&self.device, "params", bytes, UNIFORM)?;
        self.queue
            .write_buffer(self.buffers.get("params")?, 0, bytemuck::bytes_of(&params));
        Ok(())
    }

    /// Encode one dispatch over `bindings` (in binding order), copy
    /// `output_len` floats from `output` into staging, and read them back.
    fn dispatch(
        &mut self,
        kind: PipelineKind,
        bindings: &[&'static str],
        output: &'static str,
        invocations: usize,
        output_len: usize,
    ) -> Result<Vec<f32>, GpuError> {
        if self.is_lost() {
            return Err(GpuError::DeviceLost("device reported lost".into()));
        }
        let groups = workgroup_count(invocations, self.workgroup_size);
        if groups > self.max_workgroups {
            return Err(GpuError::Dispatch(format!(
                "{groups} workgroups exceed the per-dimension limit {}",
                self.max_workgroups
            )));
        }
        let out_bytes = output_len as u64 * F32_BYTES;
        self.buffers.ensure(&self.device, "staging", out_bytes, STAGING)?;

        let pipeline = self
            .pipelines
            .get(&kind)
            .ok_or_else(|| GpuError::Dispatch(format!("{} not compiled", kind.label())))?;
        let layout = pipeline.get_bind_group_layout(0);
        let entries = bindings
            .iter()
            .enumerate()
            .map(|(i, key)| {
                Ok(wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: self.buffers.get(key)?.as_entire_binding(),
                })
            })
            .collect::<Result<Vec<_>, GpuError>>()?;
        let output_buffer = self.buffers.get(output)?;
        let staging_buffer = self.buffers.get("staging")?;

        // Nothing between push and pop may return early.
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kind.label()),
            layout: &layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kind.label()),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kind.label()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        encoder.copy_buffer_to_buffer(output_buffer, 0, staging_buffer, 0, out_bytes);
        self.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::Dispatch(err.to_string()));
        }

        self.read_back(out_bytes)
    }

    /// Map the staging buffer and copy `bytes` out, bounded by the
    /// readback deadline.
    fn read_back(&mut self, bytes: u64) -> Result<Vec<f32>, GpuError> {
        let staging = self.buffers.get("staging")?;
        let slice = staging.slice(0..bytes);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });

        let deadline = Instant::now() + self.readback_timeout;
        loop {
            let _ = self.device.poll(wgpu::Maintain::Poll);
            match rx.try_recv() {
                Ok(Ok(())) => break,
                Ok(Err(e)) => return Err(self.mark_lost(&format!("map failed: {e}"))),
                Err(TryRecvError::Disconnected) => {
                    return Err(GpuError::Map("map callback dropped".into()))
                }
                Err(TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        // Still pending: never reuse this staging buffer.
                        self.buffers.discard("staging");
                        return Err(GpuError::Timeout(self.readback_timeout));
                    }
                    std::thread::yield_now();
                }
            }
        }

        let data = {
            let view = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&view).to_vec()
        };
        staging.unmap();
        Ok(data)
    }

    /// Similarity of `query` against `count` vectors packed in `vectors`.
    pub fn similarities(
        &mut self,
        query: &[f32],
        vectors: &[f32],
        count: usize,
    ) -> Result<Vec<f32>, GpuError> {
        let dims = query.len();
        self.write_f32("query", query, STORAGE_IN)?;
        self.write_f32("vectors", vectors, STORAGE_IN)?;
        self.buffers
            .ensure(&self.device, "results", count as u64 * F32_BYTES, STORAGE_OUT)?;
        self.write_params(Params::new(dims, count))?;
        self.dispatch(
            PipelineKind::Similarity,
            &["query", "vectors", "results", "params"],
            "results",
            count,
            count,
        )
    }

    /// Thresholded circular convolution; output is ±1 as floats.
    pub fn convolve(&mut self, a: &[f32], b: &[f32]) -> Result<Vec<f32>, GpuError> {
        let dims = a.len();
        self.write_f32("conv_a", a, STORAGE_IN)?;
        self.write_f32("conv_b", b, STORAGE_IN)?;
        self.buffers
            .ensure(&self.device, "conv_out", dims as u64 * F32_BYTES, STORAGE_OUT)?;
        self.write_params(Params::new(dims, 1))?;
        self.dispatch(
            PipelineKind::Convolution,
            &["conv_a", "conv_b", "conv_out", "params"],
            "conv_out",
            dims,
            dims,
        )
    }

    /// Majority vote over `count` vectors packed in `vectors`.
    pub fn bundle(&mut self, vectors: &[f32], dims: usize, count: usize) -> Result<Vec<f32>, GpuError> {
        self.write_f32("bundle_in", vectors, STORAGE_IN)?;
        self.buffers
            .ensure(&self.device, "bundle_out", dims as u64 * F32_BYTES, STORAGE_OUT)?;
        self.write_params(Params::new(dims, count))?;
        self.dispatch(
            PipelineKind::Bundle,
            &["bundle_in", "bundle_out", "params"],
            "bundle_out",
            dims,
            dims,
        )
    }

    /// Reserve the resident buffer for `slots` vectors of `dims` floats,
    /// keeping the first `live_slots` already written.
    pub fn reserve_resident(&mut self, dims: usize, slots: usize, live_slots: usize) -> Result<(), GpuError> {
        let stride = dims as u64 * F32_BYTES;
        self.buffers.ensure_preserving(
            &self.device,
            &self.queue,
            "resident",
            stride * slots.max(1) as u64,
            stride * live_slots as u64,
            RESIDENT,
        )
    }

    /// Write one vector at slot `slot` of the resident buffer.
    pub fn write_resident(
        &mut self,
        slot: usize,
        data: &[f32],
        live_slots: usize,
    ) -> Result<(), GpuError> {
        let stride = data.len() as u64 * F32_BYTES;
        let needed = stride * (slot as u64 + 1);
        self.buffers.ensure_preserving(
            &self.device,
            &self.queue,
            "resident",
            needed,
            stride * live_slots as u64,
            RESIDENT,
        )?;
        self.queue.write_buffer(
            self.buffers.get("resident")?,
            stride * slot as u64,
            bytemuck::cast_slice(data),
        );
        Ok(())
    }

    /// Overwrite the resident buffer with `packed` (slot-major).
    pub fn rebuild_resident(&mut self, packed: &[f32]) -> Result<(), GpuError> {
        let bytes = packed.len() as u64 * F32_BYTES;
        self.buffers
            .ensure(&self.device, "resident", bytes.max(4), RESIDENT)?;
        if !packed.is_empty() {
            self.queue
                .write_buffer(self.buffers.get("resident")?, 0, bytemuck::cast_slice(packed));
        }
        Ok(())
    }

    /// Similarity of `query` against the first `count` resident slots.
    pub fn resident_similarities(&mut self, query: &[f32], count: usize) -> Result<Vec<f32>, GpuError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.write_f32("query", query, STORAGE_IN)?;
        self.buffers
            .ensure(&self.device, "results", count as u64 * F32_BYTES, STORAGE_OUT)?;
        self.write_params(Params::new(query.len(), count))?;
        self.dispatch(
            PipelineKind::Similarity,
            &["query", "resident", "results", "params"],
            "results",
            count,
            count,
        )
    }

    /// Destroy every buffer, the pipelines and the device.
    pub fn destroy(&mut self) {
        let pooled = self.buffers.total_bytes();
        self.buffers.destroy_all();
        self.pipelines.clear();
        self.device.destroy();
        debug!(pooled_bytes = pooled, adapter = %self.adapter_name, "GPU context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_limit_respects_binding_size() {
        let limits = wgpu::Limits {
            max_buffer_size: 256 << 20,
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        };
        assert_eq!(buffer_limit(&limits), 128 << 20);

        let limits = wgpu::Limits {
            max_buffer_size: 64 << 20,
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        };
        assert_eq!(buffer_limit(&limits), 64 << 20);
    }

    /// Runs only where an adapter is present.
    #[test]
    fn test_failed_binding_leaves_device_usable() {
        let Ok(mut ctx) = GpuContext::create(&GpuConfig::default()) else {
            return;
        };
        let err = ctx
            .dispatch(PipelineKind::Similarity, &["query", "missing"], "results", 1, 1)
            .unwrap_err();
        assert!(matches!(err, GpuError::Dispatch(_)));

        let dims = 64;
        let query = vec![1.0f32; dims];
        let mut vectors = vec![1.0f32; dims * 2];
        vectors[dims..].iter_mut().for_each(|v| *v = -1.0);
        let scores = ctx.similarities(&query, &vectors, 2).unwrap();
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!(scores[1].abs() < 1e-6);
        assert!(!ctx.is_lost());
        ctx.destroy();
    }
}
