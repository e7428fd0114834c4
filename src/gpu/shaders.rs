//! Bundled WGSL kernels honoring the shared binding contract.
//!
//! Bindings: 0 = A, 1 = A-scales, 2 = B, 3 = B-scales, 4 = result,
//! 5 = the six-word `Params` uniform. Entry points are named `main`.
//! Kernels a shader does not need may simply omit the binding; the
//! pipeline layout stays the same. Embedders with their own kernels can
//! register any WGSL source that follows the same contract.

/// F32 · F32, one output element per invocation, 8×8 workgroups.
pub const GEMM_F32: &str = r#"
struct Params {
    m: u32,
    n: u32,
    k: u32,
    lda: u32,
    ldb: u32,
    ldc: u32,
}

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(2) var<storage, read> b: array<f32>;
@group(0) @binding(4) var<storage, read_write> r: array<f32>;
@group(0) @binding(5) var<uniform> params: Params;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let col = gid.x;
    let row = gid.y;
    if (row >= params.m || col >= params.n) {
        return;
    }

    var sum = 0.0;
    for (var kk = 0u; kk < params.k; kk = kk + 1u) {
        sum = sum + a[row * params.lda + kk] * b[col * params.ldb + kk];
    }
    r[row * params.ldc + col] = sum;
}
"#;

/// F32 · F32 specialized for a single output row: 64-wide workgroups,
/// dispatched as `(ceil(n / 64), 1, 1)`.
pub const GEMM_F32_M1: &str = r#"
struct Params {
    m: u32,
    n: u32,
    k: u32,
    lda: u32,
    ldb: u32,
    ldc: u32,
}

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(2) var<storage, read> b: array<f32>;
@group(0) @binding(4) var<storage, read_write> r: array<f32>;
@group(0) @binding(5) var<uniform> params: Params;

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let col = gid.x;
    if (col >= params.n) {
        return;
    }

    var sum = 0.0;
    for (var kk = 0u; kk < params.k; kk = kk + 1u) {
        sum = sum + a[kk] * b[col * params.ldb + kk];
    }
    r[col] = sum;
}
"#;

/// Q8 · Q4 with blockwise dequantization. The quanta streams bind as
/// `array<u32>`; bytes and nibbles are carved out with `extractBits`.
/// Scale strides derive from `lda`/`ldb`: one F32 per 32-element block.
pub const GEMM_Q8_Q4: &str = r#"
struct Params {
    m: u32,
    n: u32,
    k: u32,
    lda: u32,
    ldb: u32,
    ldc: u32,
}

@group(0) @binding(0) var<storage, read> a_q: array<u32>;
@group(0) @binding(1) var<storage, read> a_s: array<f32>;
@group(0) @binding(2) var<storage, read> b_q: array<u32>;
@group(0) @binding(3) var<storage, read> b_s: array<f32>;
@group(0) @binding(4) var<storage, read_write> r: array<f32>;
@group(0) @binding(5) var<uniform> params: Params;

fn q8_at(idx: u32) -> i32 {
    return extractBits(bitcast<i32>(a_q[idx >> 2u]), (idx & 3u) * 8u, 8u);
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let col = gid.x;
    let row = gid.y;
    if (row >= params.m || col >= params.n) {
        return;
    }

    let nblocks = params.k / 32u;
    var sum = 0.0;
    for (var blk = 0u; blk < nblocks; blk = blk + 1u) {
        let scale = a_s[row * (params.lda / 32u) + blk]
            * b_s[col * ((params.ldb * 2u) / 32u) + blk];

        var acc: i32 = 0;
        for (var t = 0u; t < 16u; t = t + 1u) {
            let byte_idx = col * params.ldb + blk * 16u + t;
            let w = extractBits(b_q[byte_idx >> 2u], (byte_idx & 3u) * 8u, 8u);
            let lo = i32(w & 0xFu) - 8;
            let hi = i32(w >> 4u) - 8;

            let a_base = row * params.lda + blk * 32u + t;
            acc = acc + q8_at(a_base) * lo + q8_at(a_base + 16u) * hi;
        }
        sum = sum + scale * f32(acc);
    }
    r[row * params.ldc + col] = sum;
}
"#;
