//! Mixed-precision GEMM entry points and the recursive tile dispatcher.
//!
//! Every entry point computes `R = A · Bᵀ` over row-major operands with
//! caller-supplied leading dimensions: `A` is `m×k`, `B` is `n×k` stored
//! pre-transposed, and the produced tile covers rows `[0, m)` and columns
//! `[n0, n0+n)` of `R`, written at `r[ldc*i + (n0+j) - roffset]`.
//!
//! The dispatcher recursively splits the output rectangle into pieces that
//! fit one register-tiled microkernel shape, following J. Tunney,
//! 'LLaMA Now Goes Faster on CPUs', Mar. 2024 (<https://justine.lol/matmul/>).
//! Kernel shapes are monomorphised over `(RM, RN)` so selection costs one
//! branch per dispatch step.
//!
//! Dimensions are not validated beyond slice bounds checks; callers are
//! expected to pre-validate strides and block alignment.

use crate::flags::IS_M_SERIES_MAC;
use crate::kernels::scalar;

#[cfg(target_arch = "x86_64")]
use crate::flags::HAS_AVX2;

#[cfg(target_arch = "x86_64")]
use crate::kernels::{avx2, avx512};

#[cfg(target_arch = "aarch64")]
use crate::kernels::neon;

/// Q8 block width: 32 signed bytes sharing one F32 scale.
pub const Q8_BLOCK_SIZE: usize = 32;

/// Q4 block width: 32 nibbles (16 packed bytes) sharing one F32 scale.
pub const Q4_BLOCK_SIZE: usize = 32;

/// Operand streams and strides shared by every microkernel family.
///
/// Unused streams for a given dtype pair stay empty. Quantized streams
/// carry their scales in `af`/`bf` with strides `ldaf`/`ldbf`; for plain
/// F32 operands `af`/`bf` hold the data itself, so one field serves both
/// roles.
#[derive(Default)]
pub(crate) struct GemmParams<'a> {
    pub flags: u32,
    pub af: &'a [f32],
    pub a: &'a [i8],
    pub a16: &'a [u16],
    pub aoffset: usize,
    pub bf: &'a [f32],
    pub b: &'a [u8],
    pub b16: &'a [u16],
    pub boffset: usize,
    pub roffset: usize,
    pub k: usize,
    pub lda: usize,
    pub ldaf: usize,
    pub ldb: usize,
    pub ldbf: usize,
    pub ldc: usize,
}

/// One register-tiled kernel family, monomorphised per `(RM, RN)` shape.
///
/// `run_tiles` must cover every full `RM×RN` tile of `[m0,m) × [n0,n)`;
/// the dispatcher guarantees the rectangle is an exact multiple of the
/// shape before calling.
pub(crate) trait Microkernel {
    /// # Safety
    ///
    /// Caller must have verified that the SIMD tier selected by the
    /// params' flags is supported by the host CPU.
    unsafe fn run_tiles<const RM: usize, const RN: usize>(
        &mut self,
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    );
}

/// Pick the largest kernel shape fitting a `mr×nr` remainder, preferring
/// larger `RM·RN`, then larger `RN`. Returns `None` for an empty edge.
///
/// The table is written out literally; its order is load-bearing for
/// branch prediction and must not be replaced by arithmetic.
pub(crate) fn kernel_shape(mr: usize, nr: usize, wide_tiles: bool) -> Option<(usize, usize)> {
    let (mut mc, mut nc) = match (mr.min(5) << 4) | nr.min(5) {
        0x55 => (5, 5),
        0x45 => (4, 5),
        0x54 => (5, 4),
        0x44 => (4, 4),
        0x53 => (5, 3),
        0x35 => (3, 5),
        0x43 => (4, 3),
        0x34 => (3, 4),
        0x52 => (5, 2),
        0x33 => (3, 3),
        0x25 => (2, 5),
        0x42 => (4, 2),
        0x24 => (2, 4),
        0x32 => (3, 2),
        0x23 => (2, 3),
        0x51 => (5, 1),
        0x41 => (4, 1),
        0x22 => (2, 2),
        0x15 => (1, 5),
        0x14 => (1, 4),
        0x31 => (3, 1),
        0x13 => (1, 3),
        0x21 => (2, 1),
        0x12 => (1, 2),
        0x11 => (1, 1),
        _ => return None,
    };

    // Without the AVX-512 register file or an M-series core, a tile at or
    // above 4x4 spills; clamp to 4x4.
    if !wide_tiles && mc >= 4 && nc >= 4 {
        mc = 4;
        nc = 4;
    }

    Some((mc, nc))
}

#[inline]
fn wide_tiles(flags: u32) -> bool {
    cfg!(target_feature = "avx512f") || flags & IS_M_SERIES_MAC != 0
}

/// Recursively cover `[m0,m) × [n0,n)` with microkernel tiles.
///
/// The aligned interior runs at the chosen `(RM, RN)`; the two leftover
/// strips recurse with fresh shapes. Depth is bounded by the shape table
/// (at most four levels).
///
/// # Safety
///
/// Same contract as [`Microkernel::run_tiles`].
#[allow(unsafe_op_in_unsafe_fn)]
pub(crate) unsafe fn dispatch<K: Microkernel>(
    kernel: &mut K,
    flags: u32,
    m0: usize,
    m: usize,
    n0: usize,
    n: usize,
) {
    let Some((mc, nc)) = kernel_shape(m - m0, n - n0, wide_tiles(flags)) else {
        return;
    };

    match (mc << 4) | nc {
        0x55 => kernel.run_tiles::<5, 5>(m0, m, n0, n),
        0x45 => kernel.run_tiles::<4, 5>(m0, m, n0, n),
        0x54 => kernel.run_tiles::<5, 4>(m0, m, n0, n),
        0x44 => kernel.run_tiles::<4, 4>(m0, m, n0, n),
        0x53 => kernel.run_tiles::<5, 3>(m0, m, n0, n),
        0x35 => kernel.run_tiles::<3, 5>(m0, m, n0, n),
        0x43 => kernel.run_tiles::<4, 3>(m0, m, n0, n),
        0x34 => kernel.run_tiles::<3, 4>(m0, m, n0, n),
        0x52 => kernel.run_tiles::<5, 2>(m0, m, n0, n),
        0x33 => kernel.run_tiles::<3, 3>(m0, m, n0, n),
        0x25 => kernel.run_tiles::<2, 5>(m0, m, n0, n),
        0x42 => kernel.run_tiles::<4, 2>(m0, m, n0, n),
        0x24 => kernel.run_tiles::<2, 4>(m0, m, n0, n),
        0x32 => kernel.run_tiles::<3, 2>(m0, m, n0, n),
        0x23 => kernel.run_tiles::<2, 3>(m0, m, n0, n),
        0x51 => kernel.run_tiles::<5, 1>(m0, m, n0, n),
        0x41 => kernel.run_tiles::<4, 1>(m0, m, n0, n),
        0x22 => kernel.run_tiles::<2, 2>(m0, m, n0, n),
        0x15 => kernel.run_tiles::<1, 5>(m0, m, n0, n),
        0x14 => kernel.run_tiles::<1, 4>(m0, m, n0, n),
        0x31 => kernel.run_tiles::<3, 1>(m0, m, n0, n),
        0x13 => kernel.run_tiles::<1, 3>(m0, m, n0, n),
        0x21 => kernel.run_tiles::<2, 1>(m0, m, n0, n),
        0x12 => kernel.run_tiles::<1, 2>(m0, m, n0, n),
        0x11 => kernel.run_tiles::<1, 1>(m0, m, n0, n),
        _ => unreachable!(),
    }

    let mp = m0 + (m - m0) / mc * mc;
    let np = n0 + (n - n0) / nc * nc;
    dispatch(kernel, flags, mp, m, n0, np);
    dispatch(kernel, flags, m0, m, np, n);
}

// One wrapper struct per dtype pair; `run_tiles` picks the SIMD family:
// the HAS_AVX2 bit selects the widest x86 build, anything else the 256-bit
// one, and aarch64 always runs NEON. The AVX-512 family degrades to AVX2
// at compile time when the build lacks the feature.

struct F32Tiles<'a, 'r> {
    p: GemmParams<'a>,
    r: &'r mut [f32],
}

impl Microkernel for F32Tiles<'_, '_> {
    unsafe fn run_tiles<const RM: usize, const RN: usize>(
        &mut self,
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    ) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            if self.p.flags & HAS_AVX2 != 0 {
                avx512::gemm_f32_tiles::<RM, RN>(&self.p, self.r, m0, m, n0, n);
            } else {
                avx2::gemm_f32_tiles::<RM, RN>(&self.p, self.r, m0, m, n0, n);
            }
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            neon::gemm_f32_tiles::<RM, RN>(&self.p, self.r, m0, m, n0, n);
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let _ = (m0, m, n0, n);
            unreachable!("no SIMD tier on this architecture");
        }
    }
}

struct F32Q4Tiles<'a, 'r> {
    p: GemmParams<'a>,
    r: &'r mut [f32],
}

impl Microkernel for F32Q4Tiles<'_, '_> {
    unsafe fn run_tiles<const RM: usize, const RN: usize>(
        &mut self,
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    ) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            if self.p.flags & HAS_AVX2 != 0 {
                avx512::gemm_f32_q4_tiles::<RM, RN>(&self.p, self.r, m0, m, n0, n);
            } else {
                avx2::gemm_f32_q4_tiles::<RM, RN>(&self.p, self.r, m0, m, n0, n);
            }
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            neon::gemm_f32_q4_tiles::<RM, RN>(&self.p, self.r, m0, m, n0, n);
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let _ = (m0, m, n0, n);
            unreachable!("no SIMD tier on this architecture");
        }
    }
}

struct Q8Q4Tiles<'a, 'r> {
    p: GemmParams<'a>,
    r: &'r mut [f32],
}

impl Microkernel for Q8Q4Tiles<'_, '_> {
    unsafe fn run_tiles<const RM: usize, const RN: usize>(
        &mut self,
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    ) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            if self.p.flags & HAS_AVX2 != 0 {
                avx512::gemm_q8_q4_tiles::<RM, RN>(&self.p, self.r, m0, m, n0, n);
            } else {
                avx2::gemm_q8_q4_tiles::<RM, RN>(&self.p, self.r, m0, m, n0, n);
            }
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            neon::gemm_q8_q4_tiles::<RM, RN>(&self.p, self.r, m0, m, n0, n);
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let _ = (m0, m, n0, n);
            unreachable!("no SIMD tier on this architecture");
        }
    }
}

struct Bf16Tiles<'a, 'r, 's> {
    p: GemmParams<'a>,
    r: &'r mut [f32],
    rs: Option<&'s mut [u16]>,
}

impl Microkernel for Bf16Tiles<'_, '_, '_> {
    unsafe fn run_tiles<const RM: usize, const RN: usize>(
        &mut self,
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    ) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            if self.p.flags & HAS_AVX2 != 0 {
                avx512::gemm_bf16_tiles::<RM, RN>(
                    &self.p,
                    self.r,
                    self.rs.as_deref_mut(),
                    m0,
                    m,
                    n0,
                    n,
                );
            } else {
                avx2::gemm_bf16_tiles::<RM, RN>(
                    &self.p,
                    self.r,
                    self.rs.as_deref_mut(),
                    m0,
                    m,
                    n0,
                    n,
                );
            }
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            neon::gemm_bf16_tiles::<RM, RN>(&self.p, self.r, self.rs.as_deref_mut(), m0, m, n0, n);
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let _ = (m0, m, n0, n);
            unreachable!("no SIMD tier on this architecture");
        }
    }
}

struct F32Bf16Tiles<'a, 'r, 's> {
    p: GemmParams<'a>,
    r: &'r mut [f32],
    rs: Option<&'s mut [u16]>,
}

impl Microkernel for F32Bf16Tiles<'_, '_, '_> {
    unsafe fn run_tiles<const RM: usize, const RN: usize>(
        &mut self,
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    ) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            if self.p.flags & HAS_AVX2 != 0 {
                avx512::gemm_f32_bf16_tiles::<RM, RN>(
                    &self.p,
                    self.r,
                    self.rs.as_deref_mut(),
                    m0,
                    m,
                    n0,
                    n,
                );
            } else {
                avx2::gemm_f32_bf16_tiles::<RM, RN>(
                    &self.p,
                    self.r,
                    self.rs.as_deref_mut(),
                    m0,
                    m,
                    n0,
                    n,
                );
            }
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            neon::gemm_f32_bf16_tiles::<RM, RN>(&self.p, self.r, self.rs.as_deref_mut(), m0, m, n0, n);
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let _ = (m0, m, n0, n);
            unreachable!("no SIMD tier on this architecture");
        }
    }
}

/// F32 · F32.
///
/// Picks the widest SIMD family the flags allow. The SIMD tiers consume
/// `k` in full vector steps, so callers whose `k` is not a multiple of
/// the 32-element block (and hosts lacking AVX2+FMA) take the scalar
/// reference instead.
#[allow(clippy::too_many_arguments)]
#[allow(unreachable_code)]
pub fn gemm_f32(
    flags: u32,
    a: &[f32],
    aoffset: usize,
    b: &[f32],
    boffset: usize,
    r: &mut [f32],
    roffset: usize,
    m: usize,
    n0: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldb: usize,
    ldc: usize,
) {
    #[cfg(target_arch = "x86_64")]
    if k % Q8_BLOCK_SIZE == 0
        && is_x86_feature_detected!("avx2")
        && is_x86_feature_detected!("fma")
    {
        let p = GemmParams {
            flags,
            af: a,
            aoffset,
            bf: b,
            boffset,
            roffset,
            k,
            lda,
            ldb,
            ldc,
            ..GemmParams::default()
        };
        let mut kern = F32Tiles { p, r };
        unsafe { dispatch(&mut kern, flags, 0, m, n0, n0 + n) };
        return;
    }

    #[cfg(target_arch = "aarch64")]
    if k % Q8_BLOCK_SIZE == 0 {
        let p = GemmParams {
            flags,
            af: a,
            aoffset,
            bf: b,
            boffset,
            roffset,
            k,
            lda,
            ldb,
            ldc,
            ..GemmParams::default()
        };
        let mut kern = F32Tiles { p, r };
        unsafe { dispatch(&mut kern, flags, 0, m, n0, n0 + n) };
        return;
    }

    scalar::gemm_f32(a, aoffset, b, boffset, r, roffset, m, n0, n, k, lda, ldb, ldc);
}

/// F32 · F32 over independent right-hand sides sharing one `A`.
#[allow(clippy::too_many_arguments)]
pub fn gemm_f32_batch(
    flags: u32,
    a: &[f32],
    aoffset: usize,
    bs: &[&[f32]],
    boffset: usize,
    rs: &mut [&mut [f32]],
    roffset: usize,
    m: usize,
    n0: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldb: usize,
    ldc: usize,
) {
    for (b, r) in bs.iter().zip(rs.iter_mut()) {
        gemm_f32(flags, a, aoffset, b, boffset, r, roffset, m, n0, n, k, lda, ldb, ldc);
    }
}

/// F32 · Q4. `boffset` counts packed bytes; `k` must be a block multiple.
#[allow(clippy::too_many_arguments)]
#[allow(unreachable_code)]
pub fn gemm_f32_q4(
    flags: u32,
    a: &[f32],
    aoffset: usize,
    bf: &[f32],
    b: &[u8],
    boffset: usize,
    r: &mut [f32],
    roffset: usize,
    m: usize,
    n0: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldb: usize,
    ldbf: usize,
    ldc: usize,
) {
    assert_eq!(k % Q4_BLOCK_SIZE, 0, "k must be a multiple of the Q4 block");

    #[cfg(target_arch = "x86_64")]
    if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
        let p = GemmParams {
            flags,
            af: a,
            aoffset,
            bf,
            b,
            boffset,
            roffset,
            k,
            lda,
            ldb,
            ldbf,
            ldc,
            ..GemmParams::default()
        };
        let mut kern = F32Q4Tiles { p, r };
        unsafe { dispatch(&mut kern, flags, 0, m, n0, n0 + n) };
        return;
    }

    #[cfg(target_arch = "aarch64")]
    {
        let p = GemmParams {
            flags,
            af: a,
            aoffset,
            bf,
            b,
            boffset,
            roffset,
            k,
            lda,
            ldb,
            ldbf,
            ldc,
            ..GemmParams::default()
        };
        let mut kern = F32Q4Tiles { p, r };
        unsafe { dispatch(&mut kern, flags, 0, m, n0, n0 + n) };
        return;
    }

    scalar::gemm_f32_q4(
        a, aoffset, bf, b, boffset, r, roffset, m, n0, n, k, lda, ldb, ldbf, ldc,
    );
}

/// F32 · Q4 over independent right-hand sides sharing one `A`.
#[allow(clippy::too_many_arguments)]
pub fn gemm_f32_q4_batch(
    flags: u32,
    a: &[f32],
    aoffset: usize,
    bfs: &[&[f32]],
    bs: &[&[u8]],
    boffset: usize,
    rs: &mut [&mut [f32]],
    roffset: usize,
    m: usize,
    n0: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldb: usize,
    ldbf: usize,
    ldc: usize,
) {
    for (i, r) in rs.iter_mut().enumerate() {
        gemm_f32_q4(
            flags, a, aoffset, bfs[i], bs[i], boffset, r, roffset, m, n0, n, k, lda, ldb, ldbf,
            ldc,
        );
    }
}

/// Q8 · Q4. Both offsets count bytes of packed quanta; `k` must be a
/// block multiple. On aarch64 the kernel needs the `dotprod` extension;
/// hosts without it take the scalar reference.
#[allow(clippy::too_many_arguments)]
#[allow(unreachable_code)]
pub fn gemm_q8_q4(
    flags: u32,
    af: &[f32],
    a: &[i8],
    aoffset: usize,
    bf: &[f32],
    b: &[u8],
    boffset: usize,
    r: &mut [f32],
    roffset: usize,
    m: usize,
    n0: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldaf: usize,
    ldb: usize,
    ldbf: usize,
    ldc: usize,
) {
    assert_eq!(k % Q8_BLOCK_SIZE, 0, "k must be a multiple of the Q8 block");

    #[cfg(target_arch = "x86_64")]
    if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
        let p = GemmParams {
            flags,
            af,
            a,
            aoffset,
            bf,
            b,
            boffset,
            roffset,
            k,
            lda,
            ldaf,
            ldb,
            ldbf,
            ldc,
            ..GemmParams::default()
        };
        let mut kern = Q8Q4Tiles { p, r };
        unsafe { dispatch(&mut kern, flags, 0, m, n0, n0 + n) };
        return;
    }

    #[cfg(target_arch = "aarch64")]
    if std::arch::is_aarch64_feature_detected!("dotprod") {
        let p = GemmParams {
            flags,
            af,
            a,
            aoffset,
            bf,
            b,
            boffset,
            roffset,
            k,
            lda,
            ldaf,
            ldb,
            ldbf,
            ldc,
            ..GemmParams::default()
        };
        let mut kern = Q8Q4Tiles { p, r };
        unsafe { dispatch(&mut kern, flags, 0, m, n0, n0 + n) };
        return;
    }

    scalar::gemm_q8_q4(
        af, a, aoffset, bf, b, boffset, r, roffset, m, n0, n, k, lda, ldaf, ldb, ldbf, ldc,
    );
}

/// Q8 · Q4 over independent right-hand sides sharing one `A`.
#[allow(clippy::too_many_arguments)]
pub fn gemm_q8_q4_batch(
    flags: u32,
    af: &[f32],
    a: &[i8],
    aoffset: usize,
    bfs: &[&[f32]],
    bs: &[&[u8]],
    boffset: usize,
    rs: &mut [&mut [f32]],
    roffset: usize,
    m: usize,
    n0: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldaf: usize,
    ldb: usize,
    ldbf: usize,
    ldc: usize,
) {
    for (i, r) in rs.iter_mut().enumerate() {
        gemm_q8_q4(
            flags, af, a, aoffset, bfs[i], bs[i], boffset, r, roffset, m, n0, n, k, lda, ldaf,
            ldb, ldbf, ldc,
        );
    }
}

/// BF16 · BF16.
///
/// When `rs` is `Some`, each dot product is re-encoded to BF16 after
/// reduction and `r` is never touched (it may be empty).
#[allow(clippy::too_many_arguments)]
#[allow(unreachable_code)]
pub fn gemm_bf16(
    flags: u32,
    a: &[u16],
    aoffset: usize,
    b: &[u16],
    boffset: usize,
    rs: Option<&mut [u16]>,
    r: &mut [f32],
    roffset: usize,
    m: usize,
    n0: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldb: usize,
    ldc: usize,
) {
    #[cfg(target_arch = "x86_64")]
    if k % Q8_BLOCK_SIZE == 0
        && is_x86_feature_detected!("avx2")
        && is_x86_feature_detected!("fma")
    {
        let p = GemmParams {
            flags,
            a16: a,
            aoffset,
            b16: b,
            boffset,
            roffset,
            k,
            lda,
            ldb,
            ldc,
            ..GemmParams::default()
        };
        let mut kern = Bf16Tiles { p, r, rs };
        unsafe { dispatch(&mut kern, flags, 0, m, n0, n0 + n) };
        return;
    }

    #[cfg(target_arch = "aarch64")]
    if k % Q8_BLOCK_SIZE == 0 {
        let p = GemmParams {
            flags,
            a16: a,
            aoffset,
            b16: b,
            boffset,
            roffset,
            k,
            lda,
            ldb,
            ldc,
            ..GemmParams::default()
        };
        let mut kern = Bf16Tiles { p, r, rs };
        unsafe { dispatch(&mut kern, flags, 0, m, n0, n0 + n) };
        return;
    }

    scalar::gemm_bf16(a, aoffset, b, boffset, rs, r, roffset, m, n0, n, k, lda, ldb, ldc);
}

/// BF16 · BF16 over independent right-hand sides sharing one `A`.
#[allow(clippy::too_many_arguments)]
pub fn gemm_bf16_batch(
    flags: u32,
    a: &[u16],
    aoffset: usize,
    bs: &[&[u16]],
    boffset: usize,
    mut rss: Option<&mut [&mut [u16]]>,
    rs: &mut [&mut [f32]],
    roffset: usize,
    m: usize,
    n0: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldb: usize,
    ldc: usize,
) {
    for (i, b) in bs.iter().enumerate() {
        let rs_i = rss.as_deref_mut().map(|v| &mut *v[i]);
        gemm_bf16(
            flags, a, aoffset, b, boffset, rs_i, &mut *rs[i], roffset, m, n0, n, k, lda, ldb, ldc,
        );
    }
}

/// F32 · BF16. Output mode matches [`gemm_bf16`].
#[allow(clippy::too_many_arguments)]
#[allow(unreachable_code)]
pub fn gemm_f32_bf16(
    flags: u32,
    a: &[f32],
    aoffset: usize,
    b: &[u16],
    boffset: usize,
    rs: Option<&mut [u16]>,
    r: &mut [f32],
    roffset: usize,
    m: usize,
    n0: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldb: usize,
    ldc: usize,
) {
    #[cfg(target_arch = "x86_64")]
    if k % Q8_BLOCK_SIZE == 0
        && is_x86_feature_detected!("avx2")
        && is_x86_feature_detected!("fma")
    {
        let p = GemmParams {
            flags,
            af: a,
            aoffset,
            b16: b,
            boffset,
            roffset,
            k,
            lda,
            ldb,
            ldc,
            ..GemmParams::default()
        };
        let mut kern = F32Bf16Tiles { p, r, rs };
        unsafe { dispatch(&mut kern, flags, 0, m, n0, n0 + n) };
        return;
    }

    #[cfg(target_arch = "aarch64")]
    if k % Q8_BLOCK_SIZE == 0 {
        let p = GemmParams {
            flags,
            af: a,
            aoffset,
            b16: b,
            boffset,
            roffset,
            k,
            lda,
            ldb,
            ldc,
            ..GemmParams::default()
        };
        let mut kern = F32Bf16Tiles { p, r, rs };
        unsafe { dispatch(&mut kern, flags, 0, m, n0, n0 + n) };
        return;
    }

    scalar::gemm_f32_bf16(a, aoffset, b, boffset, rs, r, roffset, m, n0, n, k, lda, ldb, ldc);
}

/// F32 · BF16 over independent right-hand sides sharing one `A`.
#[allow(clippy::too_many_arguments)]
pub fn gemm_f32_bf16_batch(
    flags: u32,
    a: &[f32],
    aoffset: usize,
    bs: &[&[u16]],
    boffset: usize,
    mut rss: Option<&mut [&mut [u16]]>,
    rs: &mut [&mut [f32]],
    roffset: usize,
    m: usize,
    n0: usize,
    n: usize,
    k: usize,
    lda: usize,
    ldb: usize,
    ldc: usize,
) {
    for (i, b) in bs.iter().enumerate() {
        let rs_i = rss.as_deref_mut().map(|v| &mut *v[i]);
        gemm_f32_bf16(
            flags, a, aoffset, b, boffset, rs_i, &mut *rs[i], roffset, m, n0, n, k, lda, ldb, ldc,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_table_covers_all_remainders() {
        for mr in 1..=5usize {
            for nr in 1..=5usize {
                let (mc, nc) = kernel_shape(mr, nr, true).unwrap();
                assert!(mc <= mr && nc <= nr, "shape ({},{}) exceeds ({},{})", mc, nc, mr, nr);
                assert!(mc >= 1 && nc >= 1);
            }
        }
    }

    #[test]
    fn test_shape_is_deterministic() {
        // The chosen shape depends only on (mr, nr) clamped to 5 and the
        // wide-tile bit; anything larger behaves like the 5-row case.
        for mr in 1..=5usize {
            for nr in 1..=5usize {
                for wide in [false, true] {
                    let first = kernel_shape(mr, nr, wide);
                    assert_eq!(first, kernel_shape(mr, nr, wide));
                    assert_eq!(first, kernel_shape(mr + 100 * (mr / 5), nr + 100 * (nr / 5), wide));
                }
            }
        }
        assert_eq!(kernel_shape(40, 40, true), kernel_shape(5, 5, true));
    }

    #[test]
    fn test_shape_cap_without_wide_registers() {
        assert_eq!(kernel_shape(5, 5, false), Some((4, 4)));
        assert_eq!(kernel_shape(5, 4, false), Some((4, 4)));
        assert_eq!(kernel_shape(4, 5, false), Some((4, 4)));
        // Shapes below the cap threshold are untouched.
        assert_eq!(kernel_shape(5, 3, false), Some((5, 3)));
        assert_eq!(kernel_shape(3, 5, false), Some((3, 5)));
        assert_eq!(kernel_shape(2, 2, false), Some((2, 2)));
    }

    #[test]
    fn test_shape_empty_edges() {
        assert_eq!(kernel_shape(0, 3, true), None);
        assert_eq!(kernel_shape(3, 0, true), None);
        assert_eq!(kernel_shape(0, 0, false), None);
    }

    #[test]
    fn test_seven_by_nine_starts_with_five_five() {
        // A 7x9 tile at the wide tier picks the 5x5 interior first, leaving
        // the [5,7)x[0,5) and [0,5)x[5,9) strips for the recursion.
        assert_eq!(kernel_shape(7, 9, true), Some((5, 5)));
        // Strip remainders.
        assert_eq!(kernel_shape(2, 5, true), Some((2, 5)));
        assert_eq!(kernel_shape(5, 4, true), Some((5, 4)));
    }
}
