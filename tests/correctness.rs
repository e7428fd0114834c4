use qmatmul::kernels::scalar;
use qmatmul::{
    bf16_to_f32, detect_flags, f32_to_bf16, gemm_bf16, gemm_bf16_batch, gemm_f32, gemm_f32_batch,
    gemm_f32_bf16, gemm_f32_q4, gemm_q8_q4, gemm_q8_q4_batch,
};

fn assert_matrices_equal(expected: &[f32], actual: &[f32], name: &str) {
    assert_eq!(expected.len(), actual.len(), "{}: length mismatch", name);
    for i in 0..expected.len() {
        assert!(
            (expected[i] - actual[i]).abs() < 1e-4,
            "{}: mismatch at index {}: expected {}, got {}",
            name,
            i,
            expected[i],
            actual[i]
        );
    }
}

/// Deterministic Q4 weights: `n` rows of `k/2` packed bytes plus one
/// power-of-two scale per 32-element block, so every product is exact
/// in F32 and the SIMD and scalar paths must agree bit for bit.
fn make_q4(n: usize, k: usize) -> (Vec<u8>, Vec<f32>, usize, usize) {
    let ldb = k / 2;
    let ldbf = k / 32;
    let b: Vec<u8> = (0..n * ldb).map(|i| ((i * 7 + 3) % 256) as u8).collect();
    let scales = [0.5f32, 1.0, 2.0, 0.25];
    let bf: Vec<f32> = (0..n * ldbf).map(|i| scales[i % 4]).collect();
    (b, bf, ldb, ldbf)
}

/// Deterministic Q8 activations with power-of-two scales.
fn make_q8(m: usize, k: usize) -> (Vec<i8>, Vec<f32>, usize, usize) {
    let lda = k;
    let ldaf = k / 32;
    let a: Vec<i8> = (0..m * lda).map(|i| (i % 29) as i8 - 14).collect();
    let scales = [1.0f32, 0.5, 0.25, 2.0];
    let af: Vec<f32> = (0..m * ldaf).map(|i| scales[i % 4]).collect();
    (a, af, lda, ldaf)
}

// ============================================================
// Concrete scenarios
// ============================================================

#[test]
fn test_f32_identity() {
    // I4 x I4 = I4, exactly; k=4 rides the scalar path on every host.
    let mut a = vec![0.0f32; 16];
    for i in 0..4 {
        a[i * 4 + i] = 1.0;
    }
    let b = a.clone();
    let mut r = vec![0.0f32; 16];

    gemm_f32(detect_flags(), &a, 0, &b, 0, &mut r, 0, 4, 0, 4, 4, 4, 4, 4);

    assert_eq!(r, a);
}

#[test]
fn test_q8_q4_single_block() {
    // A: 32 bytes of +1, scale 1.0. B: 16 bytes 0x98 (low nibble 8 -> 0,
    // high nibble 9 -> +1), scale 2.0. Expected dot: 2 * 16 = 32.
    let a = vec![1i8; 32];
    let af = vec![1.0f32];
    let b = vec![0x98u8; 16];
    let bf = vec![2.0f32];
    let mut r = vec![0.0f32; 1];

    gemm_q8_q4(
        detect_flags(),
        &af,
        &a,
        0,
        &bf,
        &b,
        0,
        &mut r,
        0,
        1,
        0,
        1,
        32,
        32,
        1,
        16,
        1,
        1,
    );

    assert_eq!(r[0], 32.0);
}

#[test]
fn test_bf16_round_trip_patterns() {
    assert_eq!(f32_to_bf16(1.5), 0x3FC0);
    assert_eq!(bf16_to_f32(0x3FC0), 1.5);

    let q = f32_to_bf16(f32::from_bits(0x7FC0_0001));
    assert_ne!(q & 0x40, 0);
    assert!(bf16_to_f32(q).is_nan());
}

// ============================================================
// Agreement with the scalar reference
// ============================================================

#[test]
fn test_f32_matches_scalar() {
    let flags = detect_flags();

    for k in [32usize, 64, 128] {
        for m in 1..=16usize {
            for n in 1..=16usize {
                let a: Vec<f32> = (0..m * k).map(|i| (i % 10) as f32).collect();
                let b: Vec<f32> = (0..n * k).map(|i| (i % 13) as f32).collect();

                let mut expected = vec![0.0f32; m * n];
                scalar::gemm_f32(&a, 0, &b, 0, &mut expected, 0, m, 0, n, k, k, k, n);

                let mut actual = vec![0.0f32; m * n];
                gemm_f32(flags, &a, 0, &b, 0, &mut actual, 0, m, 0, n, k, k, k, n);

                assert_matrices_equal(&expected, &actual, &format!("f32 {}x{}x{}", m, n, k));
            }
        }
    }
}

#[test]
fn test_f32_q4_matches_scalar() {
    let flags = detect_flags();

    for k in [32usize, 64, 128] {
        for m in 1..=16usize {
            for n in 1..=16usize {
                let a: Vec<f32> = (0..m * k).map(|i| (i % 9) as f32 - 4.0).collect();
                let (b, bf, ldb, ldbf) = make_q4(n, k);

                let mut expected = vec![0.0f32; m * n];
                scalar::gemm_f32_q4(
                    &a, 0, &bf, &b, 0, &mut expected, 0, m, 0, n, k, k, ldb, ldbf, n,
                );

                let mut actual = vec![0.0f32; m * n];
                gemm_f32_q4(flags, &a, 0, &bf, &b, 0, &mut actual, 0, m, 0, n, k, k, ldb, ldbf, n);

                assert_matrices_equal(&expected, &actual, &format!("f32_q4 {}x{}x{}", m, n, k));
            }
        }
    }
}

#[test]
fn test_q8_q4_matches_scalar() {
    let flags = detect_flags();

    for k in [32usize, 64, 128] {
        for m in 1..=16usize {
            for n in 1..=16usize {
                let (a, af, lda, ldaf) = make_q8(m, k);
                let (b, bf, ldb, ldbf) = make_q4(n, k);

                let mut expected = vec![0.0f32; m * n];
                scalar::gemm_q8_q4(
                    &af, &a, 0, &bf, &b, 0, &mut expected, 0, m, 0, n, k, lda, ldaf, ldb, ldbf, n,
                );

                let mut actual = vec![0.0f32; m * n];
                gemm_q8_q4(
                    flags, &af, &a, 0, &bf, &b, 0, &mut actual, 0, m, 0, n, k, lda, ldaf, ldb,
                    ldbf, n,
                );

                assert_matrices_equal(&expected, &actual, &format!("q8_q4 {}x{}x{}", m, n, k));
            }
        }
    }
}

#[test]
fn test_bf16_matches_scalar() {
    let flags = detect_flags();

    for k in [32usize, 64, 128] {
        for m in 1..=16usize {
            for n in 1..=16usize {
                // Small integers are exact in BF16
                let a: Vec<u16> = (0..m * k).map(|i| f32_to_bf16((i % 7) as f32)).collect();
                let b: Vec<u16> = (0..n * k).map(|i| f32_to_bf16((i % 5) as f32)).collect();

                let mut expected = vec![0.0f32; m * n];
                scalar::gemm_bf16(&a, 0, &b, 0, None, &mut expected, 0, m, 0, n, k, k, k, n);

                let mut actual = vec![0.0f32; m * n];
                gemm_bf16(flags, &a, 0, &b, 0, None, &mut actual, 0, m, 0, n, k, k, k, n);

                assert_matrices_equal(&expected, &actual, &format!("bf16 {}x{}x{}", m, n, k));
            }
        }
    }
}

#[test]
fn test_f32_bf16_matches_scalar() {
    let flags = detect_flags();

    for k in [32usize, 64, 128] {
        for m in 1..=16usize {
            for n in 1..=16usize {
                let a: Vec<f32> = (0..m * k).map(|i| (i % 11) as f32 - 5.0).collect();
                let b: Vec<u16> = (0..n * k).map(|i| f32_to_bf16((i % 5) as f32)).collect();

                let mut expected = vec![0.0f32; m * n];
                scalar::gemm_f32_bf16(&a, 0, &b, 0, None, &mut expected, 0, m, 0, n, k, k, k, n);

                let mut actual = vec![0.0f32; m * n];
                gemm_f32_bf16(flags, &a, 0, &b, 0, None, &mut actual, 0, m, 0, n, k, k, k, n);

                assert_matrices_equal(&expected, &actual, &format!("f32_bf16 {}x{}x{}", m, n, k));
            }
        }
    }
}

#[test]
fn test_bf16_output_mode() {
    // A Some(rs) buffer takes the encoded dot products; r stays untouched.
    let flags = detect_flags();
    let m = 5;
    let n = 7;
    let k = 64;
    let a: Vec<u16> = (0..m * k).map(|i| f32_to_bf16((i % 7) as f32)).collect();
    let b: Vec<u16> = (0..n * k).map(|i| f32_to_bf16((i % 5) as f32)).collect();

    let mut r = vec![0.0f32; m * n];
    gemm_bf16(flags, &a, 0, &b, 0, None, &mut r, 0, m, 0, n, k, k, k, n);

    let mut rs = vec![0u16; m * n];
    gemm_bf16(flags, &a, 0, &b, 0, Some(&mut rs), &mut [], 0, m, 0, n, k, k, k, n);

    for i in 0..m * n {
        assert_eq!(rs[i], f32_to_bf16(r[i]), "encoded output at {}", i);
    }
}

// ============================================================
// Tile coverage (NaN sentinel)
// ============================================================

#[test]
fn test_tile_cover_every_cell_once() {
    // With A all zeros, every covered cell becomes exactly 0.0; a
    // surviving NaN means the dispatcher missed it.
    let flags = detect_flags();
    let k = 32;

    for m in 1..=40usize {
        for n in 1..=40usize {
            let a = vec![0.0f32; m * k];
            let b = vec![1.0f32; n * k];
            let mut r = vec![f32::NAN; m * n];

            gemm_f32(flags, &a, 0, &b, 0, &mut r, 0, m, 0, n, k, k, k, n);

            for (i, v) in r.iter().enumerate() {
                assert_eq!(*v, 0.0, "cell {} of {}x{} not covered", i, m, n);
            }
        }
    }
}

#[test]
fn test_column_slab_leaves_neighbors_alone() {
    // Writing a column slab [n0, n0+n) must not touch columns outside it.
    let flags = detect_flags();
    let m = 7;
    let n = 9;
    let n0 = 8;
    let ldc = 24;
    let k = 32;

    let a = vec![0.0f32; m * k];
    let b = vec![1.0f32; (n0 + n) * k];
    let mut r = vec![f32::NAN; m * ldc];

    gemm_f32(flags, &a, 0, &b, 0, &mut r, 0, m, n0, n, k, k, k, ldc);

    for i in 0..m {
        for j in 0..ldc {
            let v = r[i * ldc + j];
            if j >= n0 && j < n0 + n {
                assert_eq!(v, 0.0, "cell ({},{}) not covered", i, j);
            } else {
                assert!(v.is_nan(), "cell ({},{}) outside the slab was written", i, j);
            }
        }
    }
}

// ============================================================
// Offset shift law
// ============================================================

#[test]
fn test_roffset_shift_law() {
    // gemm(..., roffset = r0, R = shifted buffer) writes the same values
    // as gemm(..., roffset = 0, R = full buffer).
    let flags = detect_flags();
    let m = 4;
    let n = 8;
    let n0 = 64;
    let ldc = 72;
    let k = 32;

    let a: Vec<f32> = (0..m * k).map(|i| (i % 10) as f32).collect();
    let b: Vec<f32> = (0..(n0 + n) * k).map(|i| (i % 7) as f32).collect();

    let mut full = vec![0.0f32; m * ldc];
    gemm_f32(flags, &a, 0, &b, 0, &mut full, 0, m, n0, n, k, k, k, ldc);

    let mut shifted = vec![0.0f32; m * ldc - n0];
    gemm_f32(flags, &a, 0, &b, 0, &mut shifted, n0, m, n0, n, k, k, k, ldc);

    for i in 0..m {
        for j in 0..n {
            assert_eq!(
                full[i * ldc + n0 + j],
                shifted[i * ldc + j],
                "shift mismatch at ({},{})",
                i,
                j
            );
        }
    }
}

// ============================================================
// Batched entry points
// ============================================================

#[test]
fn test_batch_matches_individual_calls() {
    let flags = detect_flags();
    let m = 6;
    let n = 10;
    let k = 64;

    let a: Vec<f32> = (0..m * k).map(|i| (i % 10) as f32).collect();
    let b1: Vec<f32> = (0..n * k).map(|i| (i % 7) as f32).collect();
    let b2: Vec<f32> = (0..n * k).map(|i| (i % 11) as f32).collect();

    let mut r1 = vec![0.0f32; m * n];
    let mut r2 = vec![0.0f32; m * n];
    gemm_f32(flags, &a, 0, &b1, 0, &mut r1, 0, m, 0, n, k, k, k, n);
    gemm_f32(flags, &a, 0, &b2, 0, &mut r2, 0, m, 0, n, k, k, k, n);

    let mut rb1 = vec![0.0f32; m * n];
    let mut rb2 = vec![0.0f32; m * n];
    {
        let bs: Vec<&[f32]> = vec![&b1, &b2];
        let mut rs: Vec<&mut [f32]> = vec![&mut rb1, &mut rb2];
        gemm_f32_batch(flags, &a, 0, &bs, 0, &mut rs, 0, m, 0, n, k, k, k, n);
    }

    assert_eq!(r1, rb1);
    assert_eq!(r2, rb2);
}

#[test]
fn test_batch_identical_inputs_identical_outputs() {
    // Two identical right-hand sides must produce bit-identical results.
    let flags = detect_flags();
    let m = 4;
    let n = 8;
    let k = 64;

    let (a, af, lda, ldaf) = make_q8(m, k);
    let (b, bf, ldb, ldbf) = make_q4(n, k);

    let mut r1 = vec![0.0f32; m * n];
    let mut r2 = vec![0.0f32; m * n];
    {
        let bs: Vec<&[u8]> = vec![&b, &b];
        let bfs: Vec<&[f32]> = vec![&bf, &bf];
        let mut rs: Vec<&mut [f32]> = vec![&mut r1, &mut r2];
        gemm_q8_q4_batch(
            flags, &af, &a, 0, &bfs, &bs, 0, &mut rs, 0, m, 0, n, k, lda, ldaf, ldb, ldbf, n,
        );
    }

    assert_eq!(r1, r2);
    assert!(r1.iter().any(|&v| v != 0.0), "degenerate all-zero result");
}

#[test]
fn test_bf16_batch_with_encoded_outputs() {
    let flags = detect_flags();
    let m = 3;
    let n = 5;
    let k = 32;

    let a: Vec<u16> = (0..m * k).map(|i| f32_to_bf16((i % 7) as f32)).collect();
    let b: Vec<u16> = (0..n * k).map(|i| f32_to_bf16((i % 5) as f32)).collect();

    let mut single = vec![0u16; m * n];
    gemm_bf16(flags, &a, 0, &b, 0, Some(&mut single), &mut [], 0, m, 0, n, k, k, k, n);

    let mut out1 = vec![0u16; m * n];
    let mut out2 = vec![0u16; m * n];
    {
        let bs: Vec<&[u16]> = vec![&b, &b];
        let mut rss: Vec<&mut [u16]> = vec![&mut out1, &mut out2];
        let mut empty1: [f32; 0] = [];
        let mut empty2: [f32; 0] = [];
        let mut rs: Vec<&mut [f32]> = vec![&mut empty1, &mut empty2];
        gemm_bf16_batch(
            flags,
            &a,
            0,
            &bs,
            0,
            Some(&mut rss),
            &mut rs,
            0,
            m,
            0,
            n,
            k,
            k,
            k,
            n,
        );
    }

    assert_eq!(single, out1);
    assert_eq!(single, out2);
}

// ============================================================
// Q4 dequantization law
// ============================================================

#[test]
fn test_q4_dequant_law() {
    // For every byte b and scale s: the low lane decodes to s*((b&0xF)-8)
    // and the high lane to s*((b>>4)-8). Checked through a 1x1 GEMM with a
    // one-hot F32 activation selecting each lane.
    let k = 32;
    for byte in [0x00u8, 0x07, 0x98, 0xF0, 0xFF, 0x5A] {
        for s in [0.5f32, 2.0] {
            let b = vec![byte; k / 2];
            let bf = vec![s];

            for lane in 0..k {
                let mut a = vec![0.0f32; k];
                a[lane] = 1.0;

                let mut r = vec![0.0f32; 1];
                scalar::gemm_f32_q4(&a, 0, &bf, &b, 0, &mut r, 0, 1, 0, 1, k, k, k / 2, 1, 1);

                let nibble = if lane < 16 { byte & 0x0F } else { byte >> 4 };
                let expected = s * (nibble as f32 - 8.0);
                assert_eq!(r[0], expected, "byte {:#04x} lane {}", byte, lane);
            }
        }
    }
}
