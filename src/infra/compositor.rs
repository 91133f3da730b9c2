use image::{imageops, RgbImage};
use std::path::{Path, PathBuf};

use crate::app::ports::ImageCompositor;
use crate::error::{HarvestError, Result};

/// Stacks images top to bottom on a canvas as wide as the widest input.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerticalStitcher;

impl ImageCompositor for VerticalStitcher {
    fn stack_vertically(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        if inputs.is_empty() {
            return Err(HarvestError::Api {
                message: "nothing to stitch".into(),
            });
        }
        let images = inputs
            .iter()
            .map(|p| image::open(p).map(|img| img.to_rgb8()))
            .collect::<std::result::Result<Vec<RgbImage>, _>>()?;

        let width = images.iter().map(|i| i.width()).max().unwrap_or(0);
        let height = images.iter().map(|i| i.height()).sum();
        let mut canvas = RgbImage::new(width, height);

        let mut y_offset: i64 = 0;
        for img in &images {
            imageops::replace(&mut canvas, img, 0, y_offset);
            y_offset += i64::from(img.height());
        }
        canvas.save(output)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(path: &Path, w: u32, h: u32, color: [u8; 3]) {
        RgbImage::from_pixel(w, h, Rgb(color)).save(path).unwrap();
    }

    #[test]
    fn test_stack_dimensions_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        solid(&a, 40, 10, [255, 0, 0]);
        solid(&b, 20, 30, [0, 0, 255]);

        let out = dir.path().join("combined.png");
        VerticalStitcher.stack_vertically(&[a, b], &out).unwrap();

        let combined = image::open(&out).unwrap().to_rgb8();
        assert_eq!(combined.dimensions(), (40, 40));
        assert_eq!(combined.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(combined.get_pixel(5, 35), &Rgb([0, 0, 255]));
        // Narrower input leaves the rest of its band black
        assert_eq!(combined.get_pixel(35, 35), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_empty_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VerticalStitcher
            .stack_vertically(&[], &dir.path().join("x.jpg"))
            .is_err());
    }

    #[test]
    fn test_unreadable_input_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.jpg");
        std::fs::write(&bogus, b"not an image").unwrap();
        let err = VerticalStitcher
            .stack_vertically(&[bogus], &dir.path().join("x.jpg"))
            .unwrap_err();
        assert!(matches!(err, HarvestError::Image(_)));
    }
}
