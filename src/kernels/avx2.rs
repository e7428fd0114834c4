//! 256-bit AVX2 microkernels for every dtype pair.
//!
//! Each kernel walks the full `RM×RN` tiles of its rectangle, keeping an
//! `RM×RN` grid of 256-bit F32 accumulators in registers. The B vector for
//! a column is loaded once per k-step and reused across all `RM` rows.
//! Quantized operands are dequantized in-register: Q4 nibbles unpack and
//! re-bias against the mask, Q8 bytes ride the `sign`/`maddubs`/`madd`
//! sequence that contracts a whole 32-element block into one vector of
//! i32 partial sums.

use std::arch::x86_64::*;

use crate::bf16::f32_to_bf16;
use crate::gemm::{GemmParams, Q4_BLOCK_SIZE, Q8_BLOCK_SIZE};

/// Horizontal sum of a 256-bit accumulator.
#[inline]
#[target_feature(enable = "avx")]
#[allow(unsafe_op_in_unsafe_fn)]
pub(crate) unsafe fn hsum256(v: __m256) -> f32 {
    let mut lanes = [0.0f32; 8];
    _mm256_storeu_ps(lanes.as_mut_ptr(), v);

    let mut dot = 0.0;
    for lane in lanes {
        dot += lane;
    }
    dot
}

#[target_feature(enable = "avx2,fma")]
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

        let mut sums = [[_mm256_setzero_ps(); RN]; RM];

        for ni in 0..RN {
            let mut ao = p.aoffset;
            let mut bo = p.boffset;
            let mut j = 0;
            while j < p.k {
                // 256 bits == 8 floats
                let vb = _mm256_loadu_ps(p.bf.as_ptr().add(p.ldb * (jj + ni) + bo));

                for mi in 0..RM {
                    let va = _mm256_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao));
                    sums[mi][ni] = _mm256_fmadd_ps(va, vb, sums[mi][ni]);
                }
                j += 8;
                ao += 8;
                bo += 8;
            }
        }

        for mi in 0..RM {
            for ni in 0..RN {
                r[p.ldc * (ii + mi) + (jj + ni) - p.roffset] = hsum256(sums[mi][ni]);
            }
        }
    }
}

#[target_feature(enable = "avx2,fma")]
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

    // Keep the low 4 bits of each byte, then re-bias to signed
    let mask_first_4bits = _mm_set1_epi8(0xF);
    let eight = _mm_set1_epi8(8);

    for job in 0..tiles {
        let ii = m0 + job / xtiles * RM;
        let jj = n0 + job % xtiles * RN;

        let mut sums = [[_mm256_setzero_ps(); RN]; RM];

        for ni in 0..RN {
            let mut ao = p.aoffset;
            let mut bo = p.boffset;
            let mut j = 0;
            while j < p.k {
                // One Q4 block: 32 logical elements, 16 packed bytes
                let scale = p.bf[p.ldbf * (jj + ni) + (bo * 2) / Q4_BLOCK_SIZE];
                let vb_f32 = _mm256_set1_ps(scale);

                let int_vb0 =
                    _mm_loadl_epi64(p.b.as_ptr().add(p.ldb * (jj + ni) + bo) as *const __m128i);
                let int_vb1 =
                    _mm_loadl_epi64(p.b.as_ptr().add(p.ldb * (jj + ni) + bo + 8) as *const __m128i);

                let first_4bits0 = _mm_sub_epi8(_mm_and_si128(int_vb0, mask_first_4bits), eight);
                let first_4bits1 = _mm_sub_epi8(_mm_and_si128(int_vb1, mask_first_4bits), eight);
                let last_4bits0 = _mm_sub_epi8(
                    _mm_and_si128(_mm_srli_epi16::<4>(int_vb0), mask_first_4bits),
                    eight,
                );
                let last_4bits1 = _mm_sub_epi8(
                    _mm_and_si128(_mm_srli_epi16::<4>(int_vb1), mask_first_4bits),
                    eight,
                );

                let vb_scaled_lo0 =
                    _mm256_mul_ps(vb_f32, _mm256_cvtepi32_ps(_mm256_cvtepi8_epi32(first_4bits0)));
                let vb_scaled_lo1 =
                    _mm256_mul_ps(vb_f32, _mm256_cvtepi32_ps(_mm256_cvtepi8_epi32(first_4bits1)));
                let vb_scaled_hi0 =
                    _mm256_mul_ps(vb_f32, _mm256_cvtepi32_ps(_mm256_cvtepi8_epi32(last_4bits0)));
                let vb_scaled_hi1 =
                    _mm256_mul_ps(vb_f32, _mm256_cvtepi32_ps(_mm256_cvtepi8_epi32(last_4bits1)));

                for mi in 0..RM {
                    let va0 = _mm256_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao));
                    let va1 = _mm256_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao + 8));
                    let va2 = _mm256_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao + 16));
                    let va3 = _mm256_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao + 24));

                    sums[mi][ni] = _mm256_fmadd_ps(va0, vb_scaled_lo0, sums[mi][ni]);
                    sums[mi][ni] = _mm256_fmadd_ps(va1, vb_scaled_lo1, sums[mi][ni]);
                    sums[mi][ni] = _mm256_fmadd_ps(va2, vb_scaled_hi0, sums[mi][ni]);
                    sums[mi][ni] = _mm256_fmadd_ps(va3, vb_scaled_hi1, sums[mi][ni]);
                }
                j += Q4_BLOCK_SIZE;
                ao += Q4_BLOCK_SIZE;
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

#[target_feature(enable = "avx2,fma")]
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
                    // Product of the two block scales, broadcast once
                    let scale = p.af[p.ldaf * (ii + mi) + ao / Q8_BLOCK_SIZE]
                        * p.bf[p.ldbf * (jj + ni) + (bo * 2) / Q4_BLOCK_SIZE];

                    let int_va1 = _mm256_loadu_si256(
                        p.a.as_ptr().add(p.lda * (ii + mi) + ao) as *const __m256i,
                    );
                    // |A|, so the unsigned side of maddubs is never negative
                    let int_va0 = _mm256_sign_epi8(int_va1, int_va1);

                    let int_vb0 =
                        _mm_loadu_si128(p.b.as_ptr().add(p.ldb * (jj + ni) + bo) as *const __m128i);

                    // Low nibbles in the low lane, high nibbles shifted down
                    // into the high lane, then re-biased and signed against A
                    let vb0 = _mm256_and_si256(
                        mask_first_4bits,
                        _mm256_insertf128_si256::<1>(
                            _mm256_castsi128_si256(int_vb0),
                            _mm_srli_epi16::<4>(int_vb0),
                        ),
                    );
                    let vb0 = _mm256_sign_epi8(_mm256_sub_epi8(vb0, eight), int_va1);

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

#[target_feature(enable = "avx2,fma")]
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

        let mut sums = [[_mm256_setzero_ps(); RN]; RM];

        for ni in 0..RN {
            let mut ao = p.aoffset;
            let mut bo = p.boffset;
            let mut j = 0;
            while j < p.k {
                // 256 bits == 16 bfloats; widen u16 -> u32, shift into the
                // exponent, reinterpret as F32
                let vb = _mm256_loadu_si256(
                    p.b16.as_ptr().add(p.ldb * (jj + ni) + bo) as *const __m256i,
                );
                let vb0 = _mm256_castsi256_ps(_mm256_slli_epi32::<16>(_mm256_cvtepu16_epi32(
                    _mm256_extracti128_si256::<0>(vb),
                )));
                let vb1 = _mm256_castsi256_ps(_mm256_slli_epi32::<16>(_mm256_cvtepu16_epi32(
                    _mm256_extracti128_si256::<1>(vb),
                )));

                for mi in 0..RM {
                    let va = _mm256_loadu_si256(
                        p.a16.as_ptr().add(p.lda * (ii + mi) + ao) as *const __m256i,
                    );
                    let va0 = _mm256_castsi256_ps(_mm256_slli_epi32::<16>(_mm256_cvtepu16_epi32(
                        _mm256_extracti128_si256::<0>(va),
                    )));
                    let va1 = _mm256_castsi256_ps(_mm256_slli_epi32::<16>(_mm256_cvtepu16_epi32(
                        _mm256_extracti128_si256::<1>(va),
                    )));

                    sums[mi][ni] = _mm256_fmadd_ps(va0, vb0, sums[mi][ni]);
                    sums[mi][ni] = _mm256_fmadd_ps(va1, vb1, sums[mi][ni]);
                }
                j += 16;
                ao += 16;
                bo += 16;
            }
        }

        for mi in 0..RM {
            for ni in 0..RN {
                let dot = hsum256(sums[mi][ni]);
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

#[target_feature(enable = "avx2,fma")]
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

        let mut sums = [[_mm256_setzero_ps(); RN]; RM];

        for ni in 0..RN {
            let mut ao = p.aoffset;
            let mut bo = p.boffset;
            let mut j = 0;
            while j < p.k {
                let vb = _mm256_loadu_si256(
                    p.b16.as_ptr().add(p.ldb * (jj + ni) + bo) as *const __m256i,
                );
                let vb0 = _mm256_castsi256_ps(_mm256_slli_epi32::<16>(_mm256_cvtepu16_epi32(
                    _mm256_extracti128_si256::<0>(vb),
                )));
                let vb1 = _mm256_castsi256_ps(_mm256_slli_epi32::<16>(_mm256_cvtepu16_epi32(
                    _mm256_extracti128_si256::<1>(vb),
                )));

                for mi in 0..RM {
                    let va0 = _mm256_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao));
                    let va1 = _mm256_loadu_ps(p.af.as_ptr().add(p.lda * (ii + mi) + ao + 8));

                    sums[mi][ni] = _mm256_fmadd_ps(va0, vb0, sums[mi][ni]);
                    sums[mi][ni] = _mm256_fmadd_ps(va1, vb1, sums[mi][ni]);
                }
                j += 16;
                ao += 16;
                bo += 16;
            }
        }

        for mi in 0..RM {
            for ni in 0..RN {
                let dot = hsum256(sums[mi][ni]);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::scalar;

    #[test]
    fn test_q8_q4_single_block_tile() {
        if !is_x86_feature_detected!("avx2") || !is_x86_feature_detected!("fma") {
            println!("Skipping - AVX2 not available");
            return;
        }

        let a = vec![1i8; 32];
        let af = vec![1.0f32];
        let b = vec![0x98u8; 16];
        let bf = vec![2.0f32];
        let mut r = vec![0.0f32; 1];

        let p = GemmParams {
            af: &af,
            a: &a,
            bf: &bf,
            b: &b,
            k: 32,
            lda: 32,
            ldaf: 1,
            ldb: 16,
            ldbf: 1,
            ldc: 1,
            ..GemmParams::default()
        };
        unsafe { gemm_q8_q4_tiles::<1, 1>(&p, &mut r, 0, 1, 0, 1) };

        assert_eq!(r[0], 32.0);
    }

    #[test]
    fn test_f32_tile_matches_scalar() {
        if !is_x86_feature_detected!("avx2") || !is_x86_feature_detected!("fma") {
            println!("Skipping - AVX2 not available");
            return;
        }

        let m = 4;
        let n = 4;
        let k = 32;
        let a: Vec<f32> = (0..m * k).map(|i| (i % 10) as f32).collect();
        let b: Vec<f32> = (0..n * k).map(|i| (i % 7) as f32).collect();

        let mut expected = vec![0.0f32; m * n];
        scalar::gemm_f32(&a, 0, &b, 0, &mut expected, 0, m, 0, n, k, k, k, n);

        let mut got = vec![0.0f32; m * n];
        let p = GemmParams {
            af: &a,
            bf: &b,
            k,
            lda: k,
            ldb: k,
            ldc: n,
            ..GemmParams::default()
        };
        unsafe { gemm_f32_tiles::<4, 4>(&p, &mut got, 0, m, 0, n) };

        assert_eq!(expected, got);
    }
}
