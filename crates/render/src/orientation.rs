//! EXIF orientation as a group of rotations and flips.
//!
//! Each of the eight EXIF orientation values is the transform that must be
//! applied to the stored pixels to display them upright. The eight values
//! form a closed group under composition, which lets a sequence of user
//! rotations be folded into a single orientation tag for lossless saves.

use image::DynamicImage;

/// One of the eight EXIF orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    /// 1: stored upright.
    #[default]
    Normal,
    /// 2: mirrored left to right.
    FlipHorizontal,
    /// 3: upside down.
    Rotate180,
    /// 4: mirrored top to bottom.
    FlipVertical,
    /// 5: mirrored along the top-left to bottom-right diagonal.
    Transpose,
    /// 6: needs a 90 degree clockwise rotation.
    Rotate90,
    /// 7: mirrored along the top-right to bottom-left diagonal.
    Transverse,
    /// 8: needs a 90 degree counter-clockwise rotation.
    Rotate270,
}

const ALL: [Orientation; 8] = [
    Orientation::Normal,
    Orientation::FlipHorizontal,
    Orientation::Rotate180,
    Orientation::FlipVertical,
    Orientation::Transpose,
    Orientation::Rotate90,
    Orientation::Transverse,
    Orientation::Rotate270,
];

/// Row-major 2x2 matrix acting on centered pixel coordinates, y pointing down.
type Matrix = [[i8; 2]; 2];

impl Orientation {
    /// Parse an EXIF orientation value. Out-of-range values map to `None`.
    pub fn from_exif(value: u32) -> Option<Self> {
        match value {
            1..=8 => Some(ALL[value as usize - 1]),
            _ => None,
        }
    }

    /// The EXIF tag value (1-8).
    pub fn to_exif(self) -> u16 {
        match self {
            Orientation::Normal => 1,
            Orientation::FlipHorizontal => 2,
            Orientation::Rotate180 => 3,
            Orientation::FlipVertical => 4,
            Orientation::Transpose => 5,
            Orientation::Rotate90 => 6,
            Orientation::Transverse => 7,
            Orientation::Rotate270 => 8,
        }
    }

    fn matrix(self) -> Matrix {
        match self {
            Orientation::Normal => [[1, 0], [0, 1]],
            Orientation::FlipHorizontal => [[-1, 0], [0, 1]],
            Orientation::Rotate180 => [[-1, 0], [0, -1]],
            Orientation::FlipVertical => [[1, 0], [0, -1]],
            Orientation::Transpose => [[0, 1], [1, 0]],
            Orientation::Rotate90 => [[0, -1], [1, 0]],
            Orientation::Transverse => [[0, -1], [-1, 0]],
            Orientation::Rotate270 => [[0, 1], [-1, 0]],
        }
    }

    fn from_matrix(matrix: Matrix) -> Self {
        ALL.into_iter()
            .find(|orientation| orientation.matrix() == matrix)
            .unwrap_or_default()
    }

    /// The transform equivalent to applying `self` and then `next`.
    pub fn then(self, next: Orientation) -> Orientation {
        let a = next.matrix();
        let b = self.matrix();
        let mut product = [[0i8; 2]; 2];
        for (row, out) in product.iter_mut().enumerate() {
            for (col, cell) in out.iter_mut().enumerate() {
                *cell = a[row][0] * b[0][col] + a[row][1] * b[1][col];
            }
        }
        Orientation::from_matrix(product)
    }

    /// The transform that undoes `self`.
    pub fn inverse(self) -> Orientation {
        let m = self.matrix();
        Orientation::from_matrix([[m[0][0], m[1][0]], [m[0][1], m[1][1]]])
    }

    /// Returns `true` when width and height trade places.
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Orientation::Transpose
                | Orientation::Rotate90
                | Orientation::Transverse
                | Orientation::Rotate270
        )
    }

    /// Size of an image of `size` after this transform.
    pub fn transformed_size(self, (width, height): (u32, u32)) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Apply the transform to a decoded image.
    pub fn apply(self, image: &DynamicImage) -> DynamicImage {
        match self {
            Orientation::Normal => image.clone(),
            Orientation::FlipHorizontal => image.fliph(),
            Orientation::Rotate180 => image.rotate180(),
            Orientation::FlipVertical => image.flipv(),
            Orientation::Transpose => image.rotate90().fliph(),
            Orientation::Rotate90 => image.rotate90(),
            Orientation::Transverse => image.rotate270().fliph(),
            Orientation::Rotate270 => image.rotate270(),
        }
    }

    /// Apply the transform in place, skipping the copy for `Normal`.
    pub fn apply_in_place(self, image: &mut DynamicImage) {
        if self != Orientation::Normal {
            *image = self.apply(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    /// 3x2 image with a unique color per pixel.
    fn marker() -> DynamicImage {
        let mut image = RgbImage::new(3, 2);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([x as u8 * 40, y as u8 * 100, 7]);
        }
        DynamicImage::ImageRgb8(image)
    }

    fn same_pixels(a: &DynamicImage, b: &DynamicImage) -> bool {
        a.dimensions() == b.dimensions() && a.to_rgb8().as_raw() == b.to_rgb8().as_raw()
    }

    #[test]
    fn test_exif_round_trip() {
        for value in 1..=8u32 {
            let orientation = Orientation::from_exif(value).unwrap();
            assert_eq!(u32::from(orientation.to_exif()), value);
        }
        assert_eq!(Orientation::from_exif(0), None);
        assert_eq!(Orientation::from_exif(9), None);
    }

    #[test]
    fn test_composition_matches_pixel_transforms() {
        let image = marker();
        for first in ALL {
            for second in ALL {
                let sequential = second.apply(&first.apply(&image));
                let composed = first.then(second).apply(&image);
                assert!(
                    same_pixels(&sequential, &composed),
                    "{first:?} then {second:?}"
                );
            }
        }
    }

    #[test]
    fn test_inverse_restores_image() {
        let image = marker();
        for orientation in ALL {
            let restored = orientation.inverse().apply(&orientation.apply(&image));
            assert!(same_pixels(&restored, &image), "{orientation:?}");
            assert_eq!(orientation.then(orientation.inverse()), Orientation::Normal);
        }
    }

    #[test]
    fn test_rotations_accumulate() {
        let quarter = Orientation::Rotate90;
        assert_eq!(quarter.then(quarter), Orientation::Rotate180);
        assert_eq!(quarter.then(Orientation::Rotate270), Orientation::Normal);
        assert_eq!(Orientation::Rotate180.then(quarter), Orientation::Rotate270);
    }

    #[test]
    fn test_transformed_size() {
        assert_eq!(Orientation::Rotate90.transformed_size((300, 200)), (200, 300));
        assert_eq!(Orientation::FlipVertical.transformed_size((300, 200)), (300, 200));
        assert_eq!(marker().dimensions(), (3, 2));
        assert_eq!(Orientation::Rotate270.apply(&marker()).dimensions(), (2, 3));
    }
}
