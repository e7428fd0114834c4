//! Device-lifetime registries for tensors, scratch bundles, and pipelines.
//!
//! Handles are dense indices into per-device tables, handed out in
//! registration order and never reused. Registration is a distinct phase:
//! it takes `&mut self` and must be serialized by the caller, after which
//! the tables are read-only.

use crate::gemm::Q8_BLOCK_SIZE;

use super::{GpuDevice, GpuError};

/// Handle to an interned weight tensor (write-once, device lifetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorId(pub(crate) usize);

/// Handle to a reusable scratch bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchId(pub(crate) usize);

/// Handle to a compiled kernel and its compute pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderId(pub(crate) usize);

/// Reusable buffers for one in-flight GEMM.
pub(crate) struct Scratch {
    pub input: wgpu::Buffer,
    pub input2: wgpu::Buffer,
    pub params: wgpu::Buffer,
    pub result: wgpu::Buffer,
    pub result_staging: wgpu::Buffer,
    /// 8-byte placeholder bound in place of absent operands; zero-size
    /// bindings are rejected on some backends.
    pub empty: wgpu::Buffer,
}

impl GpuDevice {
    fn working_buffer(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Upload an immutable weight tensor into a new storage buffer.
    ///
    /// Out-of-memory is caught with a scoped error filter and reported as
    /// `Err(GpuError::OutOfMemory)`; the caller decides whether to fall
    /// back to the CPU path or abort. The length must be 4-byte aligned
    /// (mapped-at-creation requirement).
    pub fn register_tensor(&mut self, bytes: &[u8]) -> Result<TensorId, GpuError> {
        assert_eq!(bytes.len() % 4, 0, "tensor byte length must be 4-aligned");

        // Oversized requests surface as validation errors rather than OOM;
        // checking the limit here keeps them recoverable.
        if bytes.len() as u64 > self.info.max_buffer_size {
            log::error!(
                "tensor of {} bytes exceeds device max buffer size {}",
                bytes.len(),
                self.info.max_buffer_size
            );
            return Err(GpuError::OutOfMemory);
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("weights"),
            size: bytes.len() as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: true,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("failed to allocate {} byte tensor: {err}", bytes.len());
            drop(buffer);
            return Err(GpuError::OutOfMemory);
        }

        if !bytes.is_empty() {
            buffer
                .slice(..)
                .get_mapped_range_mut()
                .copy_from_slice(bytes);
        }
        buffer.unmap();

        self.tensors.push(buffer);
        Ok(TensorId(self.tensors.len() - 1))
    }

    /// Allocate the six-buffer scratch bundle for one in-flight GEMM.
    ///
    /// `input2` is sized for Q8 scales: one F32 per quantization block of
    /// `input`. Buffers persist until device teardown and are reused
    /// across calls that pass the returned id.
    pub fn register_scratch_buffers(
        &mut self,
        params_size: u64,
        input_size: u64,
        result_size: u64,
    ) -> ScratchId {
        let input = self.working_buffer(
            "input",
            input_size,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let input2 = self.working_buffer(
            "input2",
            input_size / Q8_BLOCK_SIZE as u64 * std::mem::size_of::<f32>() as u64,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        let params = self.working_buffer(
            "params",
            params_size,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );
        let result = self.working_buffer(
            "result",
            result_size,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        );
        let result_staging = self.working_buffer(
            "staging",
            result_size,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );
        let empty = self.working_buffer(
            "empty",
            8,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );

        self.scratch.push(Scratch {
            input,
            input2,
            params,
            result,
            result_staging,
            empty,
        });
        ScratchId(self.scratch.len() - 1)
    }

    /// Compile a WGSL kernel and install its compute pipeline.
    ///
    /// Every compilation message is logged; errors (from the compiler or
    /// from pipeline validation) come back as `Err(GpuError::ShaderCompile)`.
    /// The kernel entry point must be named `main`.
    pub fn register_shader(&mut self, source: &str) -> Result<ShaderId, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("gemm shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let info = pollster::block_on(module.get_compilation_info());
        let mut failed = false;
        for msg in &info.messages {
            let line = msg.location.as_ref().map(|l| l.line_number).unwrap_or(0);
            match msg.message_type {
                wgpu::CompilationMessageType::Error => {
                    failed = true;
                    log::error!("shader compilation error at line {line}: {}", msg.message);
                }
                wgpu::CompilationMessageType::Warning => {
                    log::warn!("shader compilation warning at line {line}: {}", msg.message);
                }
                wgpu::CompilationMessageType::Info => {
                    log::info!("shader compilation note at line {line}: {}", msg.message);
                }
            }
        }

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &[&self.layout],
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("gemm pipeline"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("pipeline creation failed: {err}");
            return Err(GpuError::ShaderCompile);
        }
        if failed {
            return Err(GpuError::ShaderCompile);
        }

        self.pipelines.push(pipeline);
        Ok(ShaderId(self.pipelines.len() - 1))
    }
}
