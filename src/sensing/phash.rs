use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

use crate::error::{ScanError, ScanResult};

/// Fixed-length DCT perceptual hash of a frame (`grid × grid` bits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerceptualHash {
    hash: ImageHash,
    bits: usize,
}

impl PerceptualHash {
    pub fn bit_len(&self) -> usize {
        self.bits
    }

    pub fn to_base64(&self) -> String {
        self.hash.to_base64()
    }

    /// `None` when the text is not base64 or does not hold exactly
    /// `grid_size²` bits.
    pub fn from_base64(encoded: &str, grid_size: u32) -> Option<Self> {
        let hash = ImageHash::from_base64(encoded).ok()?;
        let bits = (grid_size * grid_size) as usize;
        if hash.as_bytes().len() != bits.div_ceil(8) {
            return None;
        }
        Some(Self { hash, bits })
    }

    fn byte_len(&self) -> usize {
        self.hash.as_bytes().len()
    }
}

/// Hashes frames with one grid size, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct PerceptualHasher {
    grid_size: u32,
}

impl PerceptualHasher {
    pub fn new(grid_size: u32) -> Self {
        Self { grid_size }
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub fn hash(&self, image: &DynamicImage) -> PerceptualHash {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Mean)
            .preproc_dct()
            .hash_size(self.grid_size, self.grid_size)
            .to_hasher();

        PerceptualHash {
            hash: hasher.hash_image(image),
            bits: (self.grid_size * self.grid_size) as usize,
        }
    }
}

/// Number of differing bits. Hashes from different grid sizes cannot be compared.
pub fn hamming_distance(a: &PerceptualHash, b: &PerceptualHash) -> ScanResult<u32> {
    if a.bits != b.bits {
        return Err(ScanError::LengthMismatch {
            left: a.bits,
            right: b.bits,
        });
    }
    // A hash labelled with the wrong grid still carries its real length.
    if a.byte_len() != b.byte_len() {
        return Err(ScanError::LengthMismatch {
            left: a.byte_len() * 8,
            right: b.byte_len() * 8,
        });
    }
    Ok(a.hash.dist(&b.hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use proptest::prelude::*;

    fn gradient(width: u32, height: u32, seed: u8) -> DynamicImage {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            let v = ((x * 7 + y * 3) as u8).wrapping_add(seed);
            Rgba([v, v.wrapping_mul(2), 255 - v, 255])
        });
        DynamicImage::ImageRgba8(img)
    }

    fn checkerboard(width: u32, height: u32) -> DynamicImage {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            if (x / 32 + y / 32) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn identical_pixels_hash_identically() {
        let hasher = PerceptualHasher::new(8);
        let a = hasher.hash(&gradient(120, 80, 3));
        let b = hasher.hash(&gradient(120, 80, 3));
        assert_eq!(a, b);
        assert_eq!(a.bit_len(), 64);
        assert_eq!(hamming_distance(&a, &b).unwrap(), 0);
    }

    #[test]
    fn different_content_moves_the_hash() {
        let hasher = PerceptualHasher::new(8);
        let a = hasher.hash(&gradient(128, 128, 0));
        let b = hasher.hash(&checkerboard(128, 128));
        assert!(hamming_distance(&a, &b).unwrap() > 0);
    }

    #[test]
    fn mismatched_grids_fail() {
        let image = gradient(64, 64, 1);
        let small = PerceptualHasher::new(8).hash(&image);
        let large = PerceptualHasher::new(16).hash(&image);
        match hamming_distance(&small, &large) {
            Err(ScanError::LengthMismatch { left, right }) => {
                assert_eq!((left, right), (64, 256));
            }
            other => panic!("expected length mismatch, got {other:?}"),
        }
    }

    #[test]
    fn base64_round_trip_preserves_distance() {
        let hasher = PerceptualHasher::new(8);
        let original = hasher.hash(&gradient(90, 60, 11));
        let restored = PerceptualHash::from_base64(&original.to_base64(), 8).unwrap();
        assert_eq!(hamming_distance(&original, &restored).unwrap(), 0);
    }

    #[test]
    fn decode_rejects_a_grid_the_bytes_do_not_fit() {
        let image = gradient(64, 64, 5);
        let encoded = PerceptualHasher::new(8).hash(&image).to_base64();
        assert!(PerceptualHash::from_base64(&encoded, 16).is_none());
        assert!(PerceptualHash::from_base64(&encoded, 4).is_none());
        assert!(PerceptualHash::from_base64("not base64!", 8).is_none());
    }

    #[test]
    fn mislabelled_hash_is_not_compared() {
        let image = gradient(64, 64, 5);
        let small = PerceptualHasher::new(8).hash(&image);
        let large = PerceptualHasher::new(16).hash(&image);
        let mislabelled = PerceptualHash {
            hash: small.hash.clone(),
            bits: large.bit_len(),
        };
        assert!(matches!(
            hamming_distance(&mislabelled, &large),
            Err(ScanError::LengthMismatch { left: 64, right: 256 })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn distance_is_symmetric_and_reflexive(seed_a in any::<u8>(), seed_b in any::<u8>()) {
            let hasher = PerceptualHasher::new(8);
            let a = hasher.hash(&gradient(48, 32, seed_a));
            let b = hasher.hash(&gradient(48, 32, seed_b));
            prop_assert_eq!(hamming_distance(&a, &b).unwrap(), hamming_distance(&b, &a).unwrap());
            prop_assert_eq!(hamming_distance(&a, &a).unwrap(), 0);
        }
    }
}
