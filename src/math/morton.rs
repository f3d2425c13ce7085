//! Morton encoding (Z-order curve) for 2D section ordering

/// Spread bits of a 32-bit integer into every second bit of a 64-bit integer
fn spread_bits(x: u32) -> u64 {
    let mut x = x as u64;
    x = (x | (x << 16)) & 0x0000_ffff_0000_ffff;
    x = (x | (x << 8)) & 0x00ff_00ff_00ff_00ff;
    x = (x | (x << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// Encode 2D coordinates into a Morton code
pub fn encode_morton_2d(x: u32, z: u32) -> u64 {
    spread_bits(x) | (spread_bits(z) << 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact_bits(x: u64) -> u32 {
        let mut x = x & 0x5555_5555_5555_5555;
        x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
        x = (x | (x >> 2)) & 0x0f0f_0f0f_0f0f_0f0f;
        x = (x | (x >> 4)) & 0x00ff_00ff_00ff_00ff;
        x = (x | (x >> 8)) & 0x0000_ffff_0000_ffff;
        x = (x | (x >> 16)) & 0x0000_0000_ffff_ffff;
        x as u32
    }

    fn decode_morton_2d(code: u64) -> (u32, u32) {
        (compact_bits(code), compact_bits(code >> 1))
    }

    #[test]
    fn test_roundtrip() {
        for x in [0, 1, 10, 1000, 65_535, u32::MAX] {
            for z in [0, 7, 4096, u32::MAX - 1] {
                let code = encode_morton_2d(x, z);
                assert_eq!(decode_morton_2d(code), (x, z), "Failed for ({}, {})", x, z);
            }
        }
    }

    #[test]
    fn test_ordering() {
        assert_eq!(encode_morton_2d(0, 0), 0);
        assert_eq!(encode_morton_2d(1, 0), 1);
        assert_eq!(encode_morton_2d(0, 1), 2);
        assert_eq!(encode_morton_2d(1, 1), 3);
        assert_eq!(encode_morton_2d(2, 0), 4);
    }
}
