//! 512-bit microkernels, compiled only when the build enables AVX-512.
//!
//! Without `avx512f` in the target features these names alias the AVX2
//! family, so the dispatcher's widest branch stays valid on every x86
//! build. The Q8·Q4 kernel keeps its integer math at 256 bits (one block
//! per vector) and upgrades the reduction to `dpbusd` when the build also
//! carries AVX-512 VNNI.

#[cfg(not(target_feature = "avx512f"))]
pub(crate) use super::avx2::{
    gemm_bf16_tiles, gemm_f32_bf16_tiles, gemm_f32_q4_tiles, gemm_f32_tiles, gemm_q8_q4_tiles,
};

#[cfg(target_feature = "avx512f")]
mod enabled {
    use std::arch::x86_64::*;

    use crate::bf16::f32_to_bf16;
    use crate::gemm::{GemmParams, Q4_BLOCK_SIZE, Q8_BLOCK_SIZE};
    use crate::kernels::avx2::hsum256;

    #[target_feature(enable = "avx512f,avx512dq,fma")]
    #[allow(unsafe_op_in_unsafe_fn)]
    pub(crate) unsafe fn gemm_f32_tiles<const RM: usize, const RN: usize>(
        p: &GemmParams<'_>,
        r: &mut [f32],
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    ) {
        let ytiles = (m - m0) / RM;
        let xtiles = (n - n0) / RN;
        let tiles = xtiles * ytiles;

        for job in 0..tiles {
            let ii = m0 + job / xtiles * RM;
            let jj = n0 + job % xtiles * RN;

            let mut sums = [[_mm512_setzero_ps(); RN]; RM];

            for ni in 0..RN {
                let mut ao = p.aoffset;
                let mut bo = p.boffset;
                let mut j = 0;
                while j < p.k {
                    // 512 bits == 16 floats
                    let vb = _mm512_loadu_ps(p.bf.as_ptr().add(p.ldb * (jj + ni) + bo));

                    for mi in 0..RM {
                        let va = _mm512_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao));
                        sums[mi][ni] = _mm512_fmadd_ps(va, vb, sums[mi][ni]);
                    }
                    j += 16;
                    ao += 16;
                    bo += 16;
                }
            }

            for mi in 0..RM {
                for ni in 0..RN {
                    r[p.ldc * (ii + mi) + (jj + ni) - p.roffset] =
                        _mm512_reduce_add_ps(sums[mi][ni]);
                }
            }
        }
    }

    #[target_feature(enable = "avx512f,avx512dq,fma")]
    #[allow(unsafe_op_in_unsafe_fn)]
    pub(crate) unsafe fn gemm_f32_q4_tiles<const RM: usize, const RN: usize>(
        p: &GemmParams<'_>,
        r: &mut [f32],
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    ) {
        let ytiles = (m - m0) / RM;
        let xtiles = (n - n0) / RN;
        let tiles = xtiles * ytiles;

        let mask_first_4bits = _mm_set1_epi8(0xF);
        let eight = _mm_set1_epi8(8);

        for job in 0..tiles {
            let ii = m0 + job / xtiles * RM;
            let jj = n0 + job % xtiles * RN;

            let mut sums = [[_mm512_setzero_ps(); RN]; RM];

            for ni in 0..RN {
                let mut ao = p.aoffset;
                let mut bo = p.boffset;
                let mut j = 0;
                while j < p.k {
                    // One Q4 block: low nibbles are elements 0..16, high
                    // nibbles elements 16..32
                    let scale = p.bf[p.ldbf * (jj + ni) + (bo * 2) / Q4_BLOCK_SIZE];
                    let vb_f32 = _mm512_set1_ps(scale);

                    let int_vb0 =
                        _mm_loadu_si128(p.b.as_ptr().add(p.ldb * (jj + ni) + bo) as *const __m128i);

                    let first_4bits =
                        _mm_sub_epi8(_mm_and_si128(int_vb0, mask_first_4bits), eight);
                    let last_4bits = _mm_sub_epi8(
                        _mm_and_si128(_mm_srli_epi16::<4>(int_vb0), mask_first_4bits),
                        eight,
                    );

                    let vb_scaled_lo = _mm512_mul_ps(
                        vb_f32,
                        _mm512_cvtepi32_ps(_mm512_cvtepi8_epi32(first_4bits)),
                    );
                    let vb_scaled_hi = _mm512_mul_ps(
                        vb_f32,
                        _mm512_cvtepi32_ps(_mm512_cvtepi8_epi32(last_4bits)),
                    );

                    for mi in 0..RM {
                        let va0 = _mm512_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao));
                        let va1 = _mm512_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao + 16));

                        sums[mi][ni] = _mm512_fmadd_ps(va0, vb_scaled_lo, sums[mi][ni]);
                        sums[mi][ni] = _mm512_fmadd_ps(va1, vb_scaled_hi, sums[mi][ni]);
                    }
                    j += Q4_BLOCK_SIZE;
                    ao += Q4_BLOCK_SIZE;
                    bo += Q4_BLOCK_SIZE / 2;
                }
            }

            for mi in 0..RM {
                for ni in 0..RN {
                    r[p.ldc * (ii + mi) + (jj + ni) - p.roffset] =
                        _mm512_reduce_add_ps(sums[mi][ni]);
                }
            }
        }
    }

    #[target_feature(enable = "avx512f,avx512dq,avx2,fma")]
    #[allow(unsafe_op_in_unsafe_fn)]
    pub(crate) unsafe fn gemm_q8_q4_tiles<const RM: usize, const RN: usize>(
        p: &GemmParams<'_>,
        r: &mut [f32],
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    ) {
        let ytiles = (m - m0) / RM;
        let xtiles = (n - n0) / RN;
        let tiles = xtiles * ytiles;

        let mask_first_4bits = _mm256_set1_epi8(0xF);
        let eight = _mm256_set1_epi8(8);

        for job in 0..tiles {
            let ii = m0 + job / xtiles * RM;
            let jj = n0 + job % xtiles * RN;

            let mut sums = [[_mm256_setzero_ps(); RN]; RM];

            for ni in 0..RN {
                let mut ao = p.aoffset;
                let mut bo = p.boffset;
                let mut j = 0;
                while j < p.k {
                    for mi in 0..RM {
                        let scale = p.af[p.ldaf * (ii + mi) + ao / Q8_BLOCK_SIZE]
                            * p.bf[p.ldbf * (jj + ni) + (bo * 2) / Q4_BLOCK_SIZE];

                        let int_va1 = _mm256_loadu_si256(
                            p.a.as_ptr().add(p.lda * (ii + mi) + ao) as *const __m256i,
                        );
                        let int_va0 = _mm256_sign_epi8(int_va1, int_va1);

                        let int_vb0 = _mm_loadu_si128(
                            p.b.as_ptr().add(p.ldb * (jj + ni) + bo) as *const __m128i,
                        );

                        let vb0 = _mm256_and_si256(
                            mask_first_4bits,
                            _mm256_insertf128_si256::<1>(
                                _mm256_castsi128_si256(int_vb0),
                                _mm_srli_epi16::<4>(int_vb0),
                            ),
                        );
                        let vb0 = _mm256_sign_epi8(_mm256_sub_epi8(vb0, eight), int_va1);

                        #[cfg(all(target_feature = "avx512vnni", target_feature = "avx512vl"))]
                        let res = _mm256_dpbusd_epi32(_mm256_setzero_si256(), int_va0, vb0);
                        #[cfg(not(all(target_feature = "avx512vnni", target_feature = "avx512vl")))]
                        let res = _mm256_madd_epi16(
                            _mm256_set1_epi16(1),
                            _mm256_maddubs_epi16(int_va0, vb0),
                        );

                        sums[mi][ni] = _mm256_fmadd_ps(
                            _mm256_set1_ps(scale),
                            _mm256_cvtepi32_ps(res),
                            sums[mi][ni],
                        );
                    }
                    j += Q8_BLOCK_SIZE;
                    ao += Q8_BLOCK_SIZE;
                    bo += Q4_BLOCK_SIZE / 2;
                }
            }

            for mi in 0..RM {
                for ni in 0..RN {
                    r[p.ldc * (ii + mi) + (jj + ni) - p.roffset] = hsum256(sums[mi][ni]);
                }
            }
        }
    }

    #[target_feature(enable = "avx512f,avx512dq,fma")]
    #[allow(unsafe_op_in_unsafe_fn)]
    pub(crate) unsafe fn gemm_bf16_tiles<const RM: usize, const RN: usize>(
        p: &GemmParams<'_>,
        r: &mut [f32],
        mut rs: Option<&mut [u16]>,
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    ) {
        let ytiles = (m - m0) / RM;
        let xtiles = (n - n0) / RN;
        let tiles = xtiles * ytiles;

        for job in 0..tiles {
            let ii = m0 + job / xtiles * RM;
            let jj = n0 + job % xtiles * RN;

            let mut sums = [[_mm512_setzero_ps(); RN]; RM];

            for ni in 0..RN {
                let mut ao = p.aoffset;
                let mut bo = p.boffset;
                let mut j = 0;
                while j < p.k {
                    // 512 bits == 32 bfloats
                    let vb = _mm512_loadu_si512(
                        p.b16.as_ptr().add(p.ldb * (jj + ni) + bo) as *const _,
                    );
                    let vb0 = _mm512_castsi512_ps(_mm512_slli_epi32::<16>(
                        _mm512_cvtepu16_epi32(_mm512_extracti32x8_epi32::<0>(vb)),
                    ));
                    let vb1 = _mm512_castsi512_ps(_mm512_slli_epi32::<16>(
                        _mm512_cvtepu16_epi32(_mm512_extracti32x8_epi32::<1>(vb)),
                    ));

                    for mi in 0..RM {
                        let va = _mm512_loadu_si512(
                            p.a16.as_ptr().add(p.lda * (ii + mi) + ao) as *const _,
                        );
                        let va0 = _mm512_castsi512_ps(_mm512_slli_epi32::<16>(
                            _mm512_cvtepu16_epi32(_mm512_extracti32x8_epi32::<0>(va)),
                        ));
                        let va1 = _mm512_castsi512_ps(_mm512_slli_epi32::<16>(
                            _mm512_cvtepu16_epi32(_mm512_extracti32x8_epi32::<1>(va)),
                        ));

                        sums[mi][ni] = _mm512_fmadd_ps(va0, vb0, sums[mi][ni]);
                        sums[mi][ni] = _mm512_fmadd_ps(va1, vb1, sums[mi][ni]);
                    }
                    j += 32;
                    ao += 32;
                    bo += 32;
                }
            }

            for mi in 0..RM {
                for ni in 0..RN {
                    let dot = _mm512_reduce_add_ps(sums[mi][ni]);
                    match rs.as_deref_mut() {
                        Some(rs) => {
                            rs[p.ldc * (ii + mi) + (jj + ni) - p.roffset] = f32_to_bf16(dot)
                        }
                        None => r[p.ldc * (ii + mi) + (jj + ni) - p.roffset] = dot,
                    }
                }
            }
        }
    }

    #[target_feature(enable = "avx512f,avx512dq,fma")]
    #[allow(unsafe_op_in_unsafe_fn)]
    pub(crate) unsafe fn gemm_f32_bf16_tiles<const RM: usize, const RN: usize>(
        p: &GemmParams<'_>,
        r: &mut [f32],
        mut rs: Option<&mut [u16]>,
        m0: usize,
        m: usize,
        n0: usize,
        n: usize,
    ) {
        let ytiles = (m - m0) / RM;
        let xtiles = (n - n0) / RN;
        let tiles = xtiles * ytiles;

        for job in 0..tiles {
            let ii = m0 + job / xtiles * RM;
            let jj = n0 + job % xtiles * RN;

            let mut sums = [[_mm512_setzero_ps(); RN]; RM];

            for ni in 0..RN {
                let mut ao = p.aoffset;
                let mut bo = p.boffset;
                let mut j = 0;
                while j < p.k {
                    let vb = _mm512_loadu_si512(
                        p.b16.as_ptr().add(p.ldb * (jj + ni) + bo) as *const _,
                    );
                    let vb0 = _mm512_castsi512_ps(_mm512_slli_epi32::<16>(
                        _mm512_cvtepu16_epi32(_mm512_extracti32x8_epi32::<0>(vb)),
                    ));
                    let vb1 = _mm512_castsi512_ps(_mm512_slli_epi32::<16>(
                        _mm512_cvtepu16_epi32(_mm512_extracti32x8_epi32::<1>(vb)),
                    ));

                    for mi in 0..RM {
                        let va0 = _mm512_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao));
                        let va1 = _mm512_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao + 16));

                        sums[mi][ni] = _mm512_fmadd_ps(va0, vb0, sums[mi][ni]);
                        sums[mi][ni] = _mm512_fmadd_ps(va1, vb1, sums[mi][ni]);
                    }
                    j += 32;
                    ao += 32;
                    bo += 32;
                }
            }

            for mi in 0..RM {
                for ni in 0..RN {
                    let dot = _mm512_reduce_add_ps(sums[mi][ni]);
                    match rs.as_deref_mut() {
                        Some(rs) => {
                            rs[p.ldc * (ii + mi) + (jj + ni) - p.roffset] = f32_to_bf16(dot)
                        }
                        None => r[p.ldc * (ii + mi) + (jj + ni) - p.roffset] = dot,
                    }
                }
            }
        }
    }
}

#[cfg(target_feature = "avx512f")]
pub(crate) use enabled::{
    gemm_bf16_tiles, gemm_f32_bf16_tiles, gemm_f32_q4_tiles, gemm_f32_tiles, gemm_q8_q4_tiles,
};
