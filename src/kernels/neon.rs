//! 128-bit NEON microkernels for every dtype pair.
//!
//! Same accumulator discipline as the x86 families at a 4-lane width. The
//! Q8·Q4 kernel chains two `vdotq_s32` dot products over the halves of a
//! 32-element block and needs the `dotprod` extension; the entry point
//! falls back to the scalar reference on hosts without it.

use std::arch::aarch64::*;

use crate::bf16::f32_to_bf16;
use crate::gemm::{GemmParams, Q4_BLOCK_SIZE, Q8_BLOCK_SIZE};

#[target_feature(enable = "neon")]
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

        let mut sums = [[vdupq_n_f32(0.0); RN]; RM];

        for ni in 0..RN {
            let mut ao = p.aoffset;
            let mut bo = p.boffset;
            let mut j = 0;
            while j < p.k {
                // 128 bits == 4 floats
                let vb = vld1q_f32(p.bf.as_ptr().add(p.ldb * (jj + ni) + bo));

                for mi in 0..RM {
                    let va = vld1q_f32(p.af.as_ptr().add(p.lda * (ii + mi) + ao));
                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], va, vb);
                }
                j += 4;
                ao += 4;
                bo += 4;
            }
        }

        for mi in 0..RM {
            for ni in 0..RN {
                r[p.ldc * (ii + mi) + (jj + ni) - p.roffset] = vaddvq_f32(sums[mi][ni]);
            }
        }
    }
}

#[target_feature(enable = "neon")]
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

    let mask_first_4bits = vdupq_n_u8(0x0F);
    let eight = vdupq_n_s8(8);

    for job in 0..tiles {
        let ii = m0 + job / xtiles * RM;
        let jj = n0 + job % xtiles * RN;

        let mut sums = [[vdupq_n_f32(0.0); RN]; RM];

        for ni in 0..RN {
            let mut ao = p.aoffset;
            let mut bo = p.boffset;
            let mut j = 0;
            while j < p.k {
                // One Q4 block, pre-scaled and widened to eight F32 vectors
                let scale = p.bf[p.ldbf * (jj + ni) + (bo * 2) / Q4_BLOCK_SIZE];
                let vb_f32 = vdupq_n_f32(scale);

                let bbytes = vld1q_u8(p.b.as_ptr().add(p.ldb * (jj + ni) + bo));
                let int_vb0 =
                    vsubq_s8(vreinterpretq_s8_u8(vandq_u8(bbytes, mask_first_4bits)), eight);
                let int_vb1 = vsubq_s8(vreinterpretq_s8_u8(vshrq_n_u8::<4>(bbytes)), eight);

                let vb0_low = vmovl_s8(vget_low_s8(int_vb0));
                let vb0_high = vmovl_s8(vget_high_s8(int_vb0));
                let f_vb0_0 = vmulq_f32(vb_f32, vcvtq_f32_s32(vmovl_s16(vget_low_s16(vb0_low))));
                let f_vb0_1 = vmulq_f32(vb_f32, vcvtq_f32_s32(vmovl_s16(vget_high_s16(vb0_low))));
                let f_vb0_2 = vmulq_f32(vb_f32, vcvtq_f32_s32(vmovl_s16(vget_low_s16(vb0_high))));
                let f_vb0_3 = vmulq_f32(vb_f32, vcvtq_f32_s32(vmovl_s16(vget_high_s16(vb0_high))));

                let vb1_low = vmovl_s8(vget_low_s8(int_vb1));
                let vb1_high = vmovl_s8(vget_high_s8(int_vb1));
                let f_vb1_0 = vmulq_f32(vb_f32, vcvtq_f32_s32(vmovl_s16(vget_low_s16(vb1_low))));
                let f_vb1_1 = vmulq_f32(vb_f32, vcvtq_f32_s32(vmovl_s16(vget_high_s16(vb1_low))));
                let f_vb1_2 = vmulq_f32(vb_f32, vcvtq_f32_s32(vmovl_s16(vget_low_s16(vb1_high))));
                let f_vb1_3 = vmulq_f32(vb_f32, vcvtq_f32_s32(vmovl_s16(vget_high_s16(vb1_high))));

                for mi in 0..RM {
                    let base = p.lda * (ii + mi) + ao;
                    let f_va0 = vld1q_f32(p.af.as_ptr().add(base));
                    let f_va1 = vld1q_f32(p.af.as_ptr().add(base + 4));
                    let f_va2 = vld1q_f32(p.af.as_ptr().add(base + 8));
                    let f_va3 = vld1q_f32(p.af.as_ptr().add(base + 12));
                    let f_va4 = vld1q_f32(p.af.as_ptr().add(base + 16));
                    let f_va5 = vld1q_f32(p.af.as_ptr().add(base + 20));
                    let f_va6 = vld1q_f32(p.af.as_ptr().add(base + 24));
                    let f_va7 = vld1q_f32(p.af.as_ptr().add(base + 28));

                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], f_va0, f_vb0_0);
                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], f_va1, f_vb0_1);
                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], f_va2, f_vb0_2);
                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], f_va3, f_vb0_3);

                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], f_va4, f_vb1_0);
                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], f_va5, f_vb1_1);
                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], f_va6, f_vb1_2);
                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], f_va7, f_vb1_3);
                }
                j += Q4_BLOCK_SIZE;
                ao += Q4_BLOCK_SIZE;
                bo += Q4_BLOCK_SIZE / 2;
            }
        }

        for mi in 0..RM {
            for ni in 0..RN {
                r[p.ldc * (ii + mi) + (jj + ni) - p.roffset] = vaddvq_f32(sums[mi][ni]);
            }
        }
    }
}

#[target_feature(enable = "neon,dotprod")]
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

    let mask_first_4bits = vdupq_n_u8(0x0F);
    let eight = vdupq_n_s8(8);

    for job in 0..tiles {
        let ii = m0 + job / xtiles * RM;
        let jj = n0 + job % xtiles * RN;

        let mut sums = [[vdupq_n_f32(0.0); RN]; RM];

        for ni in 0..RN {
            let mut ao = p.aoffset;
            let mut bo = p.boffset;
            let mut j = 0;
            while j < p.k {
                let bbytes = vld1q_u8(p.b.as_ptr().add(p.ldb * (jj + ni) + bo));
                let int_vb0 =
                    vsubq_s8(vreinterpretq_s8_u8(vandq_u8(bbytes, mask_first_4bits)), eight);
                let int_vb1 = vsubq_s8(vreinterpretq_s8_u8(vshrq_n_u8::<4>(bbytes)), eight);

                for mi in 0..RM {
                    let scale = p.af[p.ldaf * (ii + mi) + ao / Q8_BLOCK_SIZE]
                        * p.bf[p.ldbf * (jj + ni) + (bo * 2) / Q4_BLOCK_SIZE];

                    let int_va0 = vld1q_s8(p.a.as_ptr().add(p.lda * (ii + mi) + ao));
                    let int_va1 = vld1q_s8(p.a.as_ptr().add(p.lda * (ii + mi) + ao + 16));

                    // Two chained dot products contract the whole block
                    let dot = vdotq_s32(
                        vdotq_s32(vdupq_n_s32(0), int_va0, int_vb0),
                        int_va1,
                        int_vb1,
                    );

                    sums[mi][ni] = vmlaq_n_f32(sums[mi][ni], vcvtq_f32_s32(dot), scale);
                }
                j += Q8_BLOCK_SIZE;
                ao += Q8_BLOCK_SIZE;
                bo += Q4_BLOCK_SIZE / 2;
            }
        }

        for mi in 0..RM {
            for ni in 0..RN {
                r[p.ldc * (ii + mi) + (jj + ni) - p.roffset] = vaddvq_f32(sums[mi][ni]);
            }
        }
    }
}

#[target_feature(enable = "neon")]
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

        let mut sums = [[vdupq_n_f32(0.0); RN]; RM];

        for ni in 0..RN {
            let mut ao = p.aoffset;
            let mut bo = p.boffset;
            let mut j = 0;
            while j < p.k {
                // 128 bits == 8 bfloats; widen and shift into the exponent
                let vb = vld1q_u16(p.b16.as_ptr().add(p.ldb * (jj + ni) + bo));
                let vb0 = vreinterpretq_f32_u32(vshlq_n_u32::<16>(vmovl_u16(vget_low_u16(vb))));
                let vb1 = vreinterpretq_f32_u32(vshlq_n_u32::<16>(vmovl_u16(vget_high_u16(vb))));

                for mi in 0..RM {
                    let va = vld1q_u16(p.a16.as_ptr().add(p.lda * (ii + mi) + ao));
                    let va0 =
                        vreinterpretq_f32_u32(vshlq_n_u32::<16>(vmovl_u16(vget_low_u16(va))));
                    let va1 =
                        vreinterpretq_f32_u32(vshlq_n_u32::<16>(vmovl_u16(vget_high_u16(va))));

                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], va0, vb0);
                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], va1, vb1);
                }
                j += 8;
                ao += 8;
                bo += 8;
            }
        }

        for mi in 0..RM {
            for ni in 0..RN {
                let dot = vaddvq_f32(sums[mi][ni]);
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

#[target_feature(enable = "neon")]
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

        let mut sums = [[vdupq_n_f32(0.0); RN]; RM];

        for ni in 0..RN {
            let mut ao = p.aoffset;
            let mut bo = p.boffset;
            let mut j = 0;
            while j < p.k {
                let vb = vld1q_u16(p.b16.as_ptr().add(p.ldb * (jj + ni) + bo));
                let vb0 = vreinterpretq_f32_u32(vshlq_n_u32::<16>(vmovl_u16(vget_low_u16(vb))));
                let vb1 = vreinterpretq_f32_u32(vshlq_n_u32::<16>(vmovl_u16(vget_high_u16(vb))));

                for mi in 0..RM {
                    let va0 = vld1q_f32(p.af.as_ptr().add(p.lda * (ii + mi) + ao));
                    let va1 = vld1q_f32(p.af.as_ptr().add(p.lda * (ii + mi) + ao + 4));

                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], va0, vb0);
                    sums[mi][ni] = vmlaq_f32(sums[mi][ni], va1, vb1);
                }
                j += 8;
                ao += 8;
                bo += 8;
            }
        }

        for mi in 0..RM {
            for ni in 0..RN {
                let dot = vaddvq_f32(sums[mi][ni]);
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
        if !std::arch::is_aarch64_feature_detected!("dotprod") {
            println!("Skipping - dotprod not available");
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
