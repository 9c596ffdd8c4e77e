//! XOR masking of frame payloads (RFC 6455 Section 5.3).

/// Generates a fresh masking key.
#[inline]
pub(crate) fn random_mask() -> [u8; 4] {
    rand::random()
}

/// Mask/unmask a payload in place.
///
/// Masking is its own inverse: applying the same key twice restores the input.
#[inline]
pub(crate) fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let key = u32::from_ne_bytes(mask);

    let mut words = buf.chunks_exact_mut(4);
    for word in &mut words {
        let value = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) ^ key;
        word.copy_from_slice(&value.to_ne_bytes());
    }

    // the tail starts on a multiple of 4, so the key index restarts at 0
    for (byte, key) in words.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_mask_bytewise(buf: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    #[test]
    fn test_matches_bytewise_masking() {
        let masks = [
            [0x00, 0x00, 0x00, 0x00],
            [0xFF, 0xFF, 0xFF, 0xFF],
            [0x12, 0x34, 0x56, 0x78],
            [0x6d, 0xb6, 0xb2, 0x80],
        ];

        for mask in masks {
            for size in 0..=67 {
                let data: Vec<u8> = (0..size).map(|i| (i * 7) as u8).collect();

                let mut expected = data.clone();
                apply_mask_bytewise(&mut expected, mask);

                let mut actual = data.clone();
                apply_mask(&mut actual, mask);

                assert_eq!(expected, actual, "mask {:?} size {}", mask, size);
            }
        }
    }

    #[test]
    fn test_mask_unmask_identity() {
        let original = b"Hello, World! This is a test message with various lengths.";

        for _ in 0..32 {
            let mask = random_mask();
            let mut data = original.to_vec();

            apply_mask(&mut data, mask);
            apply_mask(&mut data, mask);

            assert_eq!(&data[..], &original[..]);
        }
    }

    #[test]
    fn test_mask_edge_cases() {
        let mask = [0x12, 0x34, 0x56, 0x78];

        let mut empty: Vec<u8> = vec![];
        apply_mask(&mut empty, mask);
        assert!(empty.is_empty());

        let mut three = vec![0xAB, 0xCD, 0xEF];
        apply_mask(&mut three, mask);
        assert_eq!(three, vec![0xAB ^ 0x12, 0xCD ^ 0x34, 0xEF ^ 0x56]);

        let mut five = vec![0xFF; 5];
        apply_mask(&mut five, mask);
        assert_eq!(five, vec![0xED, 0xCB, 0xA9, 0x87, 0xED]);
    }

    #[test]
    fn test_mask_unaligned_slices() {
        let mask = [0xAA, 0xBB, 0xCC, 0xDD];
        let buffer: Vec<u8> = (0..20).collect();

        for offset in 0..4 {
            let mut test_buf = buffer.clone();
            apply_mask(&mut test_buf[offset..], mask);

            for (i, &byte) in test_buf[offset..].iter().enumerate() {
                assert_eq!(byte, buffer[offset + i] ^ mask[i % 4]);
            }
        }
    }
}
