//! Runtime CPU capability flags.
//!
//! Every CPU entry point takes a small bitmask describing which SIMD tier
//! the caller wants. [`detect_flags`] probes the host once and builds the
//! mask; callers that already know their target (or tests that want to pin
//! a tier) can pass a hand-built mask instead.

/// The host supports F16C half-float conversion instructions.
pub const HAS_F16C: u32 = 2;

/// The host supports AVX2; selects the widest x86 kernel family.
pub const HAS_AVX2: u32 = 4;

/// The host is an Apple M-series machine. On these cores the 5×5 register
/// tile fits comfortably, so the tile dispatcher skips the 4×4 cap.
pub const IS_M_SERIES_MAC: u32 = 8;

/// Probe the host CPU and assemble the capability mask.
///
/// On non-x86 architectures the x86 bits stay clear and the NEON kernel
/// family runs unconditionally, so the mask only carries the M-series bit.
pub fn detect_flags() -> u32 {
    #[allow(unused_mut)]
    let mut flags = 0u32;

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("f16c") {
            flags |= HAS_F16C;
        }
        if is_x86_feature_detected!("avx2") {
            flags |= HAS_AVX2;
        }
    }

    #[cfg(all(target_arch = "aarch64", target_os = "macos"))]
    {
        flags |= IS_M_SERIES_MAC;
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_match_host() {
        let flags = detect_flags();

        #[cfg(target_arch = "x86_64")]
        assert_eq!(
            flags & HAS_AVX2 != 0,
            is_x86_feature_detected!("avx2"),
            "AVX2 bit disagrees with host probe"
        );

        #[cfg(all(target_arch = "aarch64", target_os = "macos"))]
        assert_ne!(flags & IS_M_SERIES_MAC, 0);

        #[cfg(not(target_arch = "x86_64"))]
        assert_eq!(flags & (HAS_AVX2 | HAS_F16C), 0);
    }
}
