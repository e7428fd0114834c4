//! Microkernel registry: one register-tiled family per SIMD tier.
//!
//! Every family exposes the same five dtype-pair kernels, monomorphised
//! over the `(RM, RN)` tile shape chosen by the dispatcher in
//! [`crate::gemm`]. The scalar module is the portable reference the SIMD
//! tiers are tested against, and the fallback when no tier applies.
//!
//! Available tiers:
//! - `scalar`: portable, un-tiled, one element at a time
//! - `avx2`: 256-bit x86 kernels (AVX2 + FMA)
//! - `avx512`: 512-bit x86 kernels when the build enables `avx512f`,
//!   otherwise aliases of the AVX2 family
//! - `neon`: 128-bit aarch64 kernels (`dotprod` for Q8·Q4)

pub mod scalar;

#[cfg(target_arch = "x86_64")]
pub(crate) mod avx2;

#[cfg(target_arch = "x86_64")]
pub(crate) mod avx512;

#[cfg(target_arch = "aarch64")]
pub(crate) mod neon;
