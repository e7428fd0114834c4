//! GPU compute backend over wgpu.
//!
//! A [`GpuDevice`] owns one adapter-backed device plus three append-only
//! registries: interned weight tensors, reusable scratch bundles, and
//! compiled compute pipelines. Registration happens up front on one
//! thread; after that the registries are read-only and `gemm` calls may
//! come from any single thread at a time.
//!
//! Failure policy mirrors the CPU side's "leaf below a supervisor"
//! stance: allocation and compilation problems come back as [`GpuError`],
//! while a lost device, an uncaptured error, or a failed readback
//! terminates the process with a distinguished exit code.

mod exec;
mod registry;
pub mod shaders;

pub use registry::{ScratchId, ShaderId, TensorId};

use thiserror::Error;

pub(crate) use registry::Scratch;

/// Exit code for a lost device.
const EXIT_DEVICE_LOST: i32 = 8;

/// Exit code for failed submitted work or an unmappable result.
const EXIT_WORK_FAILED: i32 = 4;

/// Recoverable GPU failures. Everything else exits.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter")]
    NoAdapter,
    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("buffer allocation failed (out of device memory)")]
    OutOfMemory,
    #[error("shader compilation failed")]
    ShaderCompile,
}

/// Adapter limits surfaced to the embedding runtime at init.
#[derive(Debug, Clone, Copy)]
pub struct GpuInfo {
    pub max_buffer_size: u64,
    pub max_bind_groups: u32,
    /// Size in bytes of the kernel uniform, for sizing scratch params
    /// buffers from the host side.
    pub params_size: u32,
}

/// Kernel uniform; must match the WGSL `Params` struct: six little-endian
/// 32-bit words, packed without padding. The `n` field carries the
/// absolute column bound `n0 + n`.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct Params {
    pub m: u32,
    pub n: u32,
    pub k: u32,
    pub lda: u32,
    pub ldb: u32,
    pub ldc: u32,
}

/// One compute device and its registries.
pub struct GpuDevice {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) layout: wgpu::BindGroupLayout,
    pub(crate) info: GpuInfo,
    pub(crate) tensors: Vec<wgpu::Buffer>,
    pub(crate) scratch: Vec<Scratch>,
    pub(crate) pipelines: Vec<wgpu::ComputePipeline>,
}

fn read_only_storage(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuDevice {
    /// Acquire a high-performance adapter, configure a device with the
    /// adapter's limits maxed out, and build the bind-group layout shared
    /// by every kernel pipeline.
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or(GpuError::NoAdapter)?;

        let limits = adapter.limits();
        let info = GpuInfo {
            max_buffer_size: limits.max_buffer_size,
            max_bind_groups: limits.max_bind_groups,
            params_size: std::mem::size_of::<Params>() as u32,
        };

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("qmatmul device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))?;

        device.on_uncaptured_error(Box::new(|err| {
            log::error!("uncaptured device error: {err}");
            std::process::exit(EXIT_WORK_FAILED);
        }));
        device.set_device_lost_callback(Box::new(|reason, message| {
            // Destroyed fires on orderly teardown; everything else is fatal.
            if !matches!(reason, wgpu::DeviceLostReason::Destroyed) {
                log::error!("device lost ({reason:?}): {message}");
                std::process::exit(EXIT_DEVICE_LOST);
            }
        }));

        // Bindings 0-3: A, A-scales, B, B-scales. 4: result. 5: params.
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("gemm bind group layout"),
            entries: &[
                read_only_storage(0),
                read_only_storage(1),
                read_only_storage(2),
                read_only_storage(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        Ok(Self {
            device,
            queue,
            layout,
            info,
            tensors: Vec::new(),
            scratch: Vec::new(),
            pipelines: Vec::new(),
        })
    }

    /// Limits reported by the adapter at init.
    pub fn info(&self) -> GpuInfo {
        self.info
    }
}
