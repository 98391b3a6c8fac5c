//! Cover art scaling for the book panel.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::error::Result;

pub const COVER_WIDTH: u32 = 200;
pub const COVER_HEIGHT: u32 = 300;
const BACKGROUND: Rgb<u8> = Rgb([128, 128, 128]);

/// Decode cover bytes and fit them onto a fixed-size gray canvas, keeping the
/// aspect ratio and centering the picture.
pub fn letterbox(bytes: &[u8]) -> Result<RgbImage> {
    let decoded = image::load_from_memory(bytes)?;
    let fitted = decoded
        .resize(COVER_WIDTH, COVER_HEIGHT, FilterType::Lanczos3)
        .to_rgb8();

    let mut canvas = RgbImage::from_pixel(COVER_WIDTH, COVER_HEIGHT, BACKGROUND);
    let x = (COVER_WIDTH - fitted.width()) / 2;
    let y = (COVER_HEIGHT - fitted.height()) / 2;
    imageops::overlay(&mut canvas, &fitted, x as i64, y as i64);
    Ok(canvas)
}

/// A plain gray placeholder of the same size.
pub fn placeholder() -> RgbImage {
    RgbImage::from_pixel(COVER_WIDTH, COVER_HEIGHT, BACKGROUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([255, 0, 0]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn is_red(pixel: &Rgb<u8>) -> bool {
        pixel[0] > 250 && pixel[1] < 5 && pixel[2] < 5
    }

    #[test]
    fn wide_image_is_letterboxed_vertically() {
        let canvas = letterbox(&png(400, 100)).unwrap();
        assert_eq!(canvas.dimensions(), (COVER_WIDTH, COVER_HEIGHT));
        // 400x100 scales to 200x50, centered at y = 125.
        assert_eq!(*canvas.get_pixel(100, 10), BACKGROUND);
        assert!(is_red(canvas.get_pixel(100, 150)));
        assert_eq!(*canvas.get_pixel(100, 290), BACKGROUND);
    }

    #[test]
    fn small_image_is_scaled_up() {
        let canvas = letterbox(&png(20, 30)).unwrap();
        assert!(is_red(canvas.get_pixel(0, 0)));
        assert!(is_red(canvas.get_pixel(199, 299)));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(letterbox(b"not an image").is_err());
    }
}
