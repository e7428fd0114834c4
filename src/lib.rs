//! Mixed-precision matrix multiplication kernels for transformer inference.
//!
//! The hot path of a transformer forward pass is `R = A · Bᵀ`, where the
//! activations are F32, BF16, or blockwise-quantized Q8 and the weights
//! are F32, BF16, or blockwise-quantized Q4. This crate implements that
//! product twice: register-tiled SIMD microkernels (AVX2, AVX-512, NEON)
//! behind a recursive tile dispatcher, and a wgpu compute backend that
//! runs the same contraction as WGSL pipelines over persistent weight
//! buffers.
//!
//! ## Usage
//!
//! ```
//! use qmatmul::{detect_flags, gemm_f32};
//!
//! // B is stored pre-transposed: R[i,j] = sum_k A[i,k] * B[j,k]
//! let a = vec![1.0f32; 2 * 32];
//! let b: Vec<f32> = (0..2 * 32).map(|i| i as f32).collect();
//! let mut r = vec![0.0f32; 4];
//!
//! gemm_f32(detect_flags(), &a, 0, &b, 0, &mut r, 0, 2, 0, 2, 32, 32, 32, 2);
//!
//! // each output element is the sum over one row of B
//! assert_eq!(r, vec![496.0, 1520.0, 496.0, 1520.0]);
//! ```
//!
//! ## What's inside
//!
//! - Five dtype pairings (`F32·F32`, `F32·Q4`, `Q8·Q4`, `BF16·BF16`,
//!   `F32·BF16`) with batched siblings
//! - A 25-entry tile table driving recursive output decomposition
//! - Scalar reference kernels used as the correctness oracle
//! - BF16 codec with round-to-nearest-even and quiet-NaN handling
//! - A `GpuDevice` wrapping adapter bootstrap, weight interning, scratch
//!   reuse, and blocking GEMM execution

pub mod bf16;
pub mod flags;
pub mod gemm;
pub mod gpu;
pub mod kernels;

pub use bf16::{bf16_to_f32, f32_to_bf16};
pub use flags::{detect_flags, HAS_AVX2, HAS_F16C, IS_M_SERIES_MAC};
pub use gemm::{
    gemm_bf16, gemm_bf16_batch, gemm_f32, gemm_f32_batch, gemm_f32_bf16, gemm_f32_bf16_batch,
    gemm_f32_q4, gemm_f32_q4_batch, gemm_q8_q4, gemm_q8_q4_batch, Q4_BLOCK_SIZE, Q8_BLOCK_SIZE,
};
