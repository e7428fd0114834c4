//! GEMM execution: bind, dispatch, copy back, block.
//!
//! The host serializes around each call: submit, then wait on the staging
//! map before touching the caller's result slice. The device may overlap
//! work internally, but nothing else runs on this thread while a GEMM is
//! in flight, so a blocking wait on the map future is exactly the event
//! pump the runtime wants.

use crate::gemm::{Q4_BLOCK_SIZE, Q8_BLOCK_SIZE};

use super::{GpuDevice, Params, ScratchId, ShaderId, TensorId, EXIT_WORK_FAILED};

/// General workgroup tile: 8 rows by 8 columns.
const RM: u32 = 8;
const RN: u32 = 8;

/// Workgroup width of the M=1-optimized kernels.
const RN_M1: u32 = 64;

fn buffer_entry(binding: u32, buffer: &wgpu::Buffer, offset: u64, size: u64) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer,
            offset,
            size: wgpu::BufferSize::new(size),
        }),
    }
}

impl GpuDevice {
    /// Execute one GEMM through the pipeline installed for `shader_id`,
    /// reusing the buffers of `scratch_id`.
    ///
    /// `a` is the raw activation byte stream with `[aoffset, alimit)`
    /// selecting the live region; `af` carries Q8 scales when `A` is
    /// quantized. `B` (and its Q4 scales `b2id`) live in registered
    /// tensors, sliced by `[boffset, blimit)` in stream bytes; `boffset`
    /// becomes a buffer binding offset and must respect the device's
    /// storage-buffer offset alignment. Results land in `r` with the
    /// same `roffset` remap as the CPU path:
    /// `r[ldc*i + (n0+j) - roffset]`.
    ///
    /// When `m == 1` and `m1_optimized` is set, the grid switches to the
    /// 64-wide single-row shape; the caller must have registered a kernel
    /// with the matching workgroup size.
    ///
    /// Blocks until the result is host-visible. Readback failure is fatal.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm(
        &self,
        scratch_id: ScratchId,
        shader_id: ShaderId,
        a: &[u8],
        af: Option<&[f32]>,
        aoffset: usize,
        alimit: usize,
        bid: TensorId,
        b2id: Option<TensorId>,
        boffset: usize,
        blimit: usize,
        r: &mut [f32],
        roffset: usize,
        rlimit: usize,
        m: usize,
        n0: usize,
        n: usize,
        k: usize,
        lda: usize,
        ldb: usize,
        ldc: usize,
        m1_optimized: bool,
    ) {
        let s = &self.scratch[scratch_id.0];
        let pipeline = &self.pipelines[shader_id.0];

        let a_size = (alimit - aoffset) as u64;
        self.queue.write_buffer(&s.input, 0, &a[aoffset..alimit]);

        // Q8 scales sit at one float per block of the quanta stream
        let a2_size = match af {
            Some(af) => {
                let a2_offset = aoffset / Q8_BLOCK_SIZE;
                let a2_len = (alimit - aoffset) / Q8_BLOCK_SIZE;
                self.queue.write_buffer(
                    &s.input2,
                    0,
                    bytemuck::cast_slice(&af[a2_offset..a2_offset + a2_len]),
                );
                ((a2_len * std::mem::size_of::<f32>()) as u64).max(8)
            }
            None => 8,
        };
        let a2_buffer = if af.is_some() { &s.input2 } else { &s.empty };

        let params = Params {
            m: m as u32,
            n: (n + n0) as u32,
            k: k as u32,
            lda: lda as u32,
            ldb: ldb as u32,
            ldc: ldc as u32,
        };
        self.queue
            .write_buffer(&s.params, 0, bytemuck::bytes_of(&params));

        let b_size = (blimit - boffset) as u64;
        let b_buffer = &self.tensors[bid.0];

        // Q4 scales: boffset counts packed bytes, two elements per byte
        let (b2_buffer, b2_offset, b2_size) = match b2id {
            Some(id) => (
                &self.tensors[id.0],
                (boffset * 2 * std::mem::size_of::<f32>() / Q4_BLOCK_SIZE) as u64,
                (((blimit - boffset) * 2 * std::mem::size_of::<f32>() / Q4_BLOCK_SIZE) as u64)
                    .max(8),
            ),
            None => (&s.empty, 0, 8),
        };

        let r_size = (rlimit * std::mem::size_of::<f32>()) as u64;

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gemm bind group"),
            layout: &self.layout,
            entries: &[
                buffer_entry(0, &s.input, 0, a_size),
                buffer_entry(1, a2_buffer, 0, a2_size),
                buffer_entry(2, b_buffer, boffset as u64, b_size),
                buffer_entry(3, b2_buffer, b2_offset, b2_size),
                buffer_entry(4, &s.result, 0, r_size),
                buffer_entry(5, &s.params, 0, std::mem::size_of::<Params>() as u64),
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gemm encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("gemm pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);

            let (wx, wy) = if m == 1 && m1_optimized {
                ((n as u32).div_ceil(RN_M1), 1)
            } else {
                ((n as u32).div_ceil(RN), (m as u32).div_ceil(RM))
            };
            pass.dispatch_workgroups(wx, wy, 1);
        }

        // Staging copy: the result buffer is STORAGE|COPY_SRC, the staging
        // buffer MAP_READ|COPY_DST; backends reject mixing MAP_READ into
        // the storage buffer itself.
        encoder.copy_buffer_to_buffer(&s.result, 0, &s.result_staging, 0, r_size);
        self.queue.submit(Some(encoder.finish()));

        let slice = s.result_staging.slice(0..r_size);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        match pollster::block_on(receiver.receive()) {
            Some(Ok(())) => {}
            status => {
                log::error!("result readback failed: {status:?}");
                std::process::exit(EXIT_WORK_FAILED);
            }
        }

        {
            let data = slice.get_mapped_range();
            let staged: &[f32] = bytemuck::cast_slice(&data[..]);
            for rm in 0..m {
                for (rn2, rn) in (n0..n0 + n).enumerate() {
                    r[rm * ldc + rn - roffset] = staged[rm * ldc + n0 + rn2];
                }
            }
        }
        s.result_staging.unmap();
    }

    /// Execute one GEMM per registered right-hand side, in order, reusing
    /// the same activations and scratch bundle throughout.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm_batch(
        &self,
        scratch_id: ScratchId,
        shader_id: ShaderId,
        a: &[u8],
        af: Option<&[f32]>,
        aoffset: usize,
        alimit: usize,
        bids: &[TensorId],
        b2ids: Option<&[TensorId]>,
        boffset: usize,
        blimit: usize,
        rs: &mut [&mut [f32]],
        roffset: usize,
        rlimit: usize,
        m: usize,
        n0: usize,
        n: usize,
        k: usize,
        lda: usize,
        ldb: usize,
        ldc: usize,
        m1_optimized: bool,
    ) {
        for (i, r) in rs.iter_mut().enumerate() {
            self.gemm(
                scratch_id,
                shader_id,
                a,
                af,
                aoffset,
                alimit,
                bids[i],
                b2ids.map(|v| v[i]),
                boffset,
                blimit,
                r,
                roffset,
                rlimit,
                m,
                n0,
                n,
                k,
                lda,
                ldb,
                ldc,
                m1_optimized,
            );
        }
    }
}
