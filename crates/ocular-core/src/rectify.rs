//! Region-of-interest rectification.
//!
//! Turns the eye region of a raw frame into a fixed-size, rotation-normalised
//! crop: a square window of side `region.side` centred on the eye is rotated
//! by `-region.angle` so the corner-to-corner axis becomes horizontal, then
//! resampled into `output_size × output_size` pixels.
//!
//! Landmarks live in display coordinates while the frame is stored at the
//! device's native resolution, so the window is scaled per axis by
//! `native / display` before sampling.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::geometry::EyeRegion;

/// Width and height of a pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }
}

/// Square, rotation-normalised eye crop.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEyeImage(RgbImage);

impl CanonicalEyeImage {
    pub fn size(&self) -> u32 {
        self.0.width()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.0
    }

    pub fn into_image(self) -> RgbImage {
        self.0
    }
}

/// Rectify the eye region of `frame` into a canonical crop.
///
/// `display` is the resolution the landmarks were reported in. Pixels that
/// fall outside the rotated window or outside the frame are black. A region
/// with zero area still produces an image; whether to use it is the
/// caller's decision.
pub fn rectify(
    frame: &RgbImage,
    display: Resolution,
    region: &EyeRegion,
    output_size: u32,
) -> CanonicalEyeImage {
    let out = output_size.max(1);
    let kx = scale(frame.width(), display.width);
    let ky = scale(frame.height(), display.height);

    let d = region.side.max(0.0);
    let src_x = (region.center.x - d / 2.0) * kx;
    let src_y = (region.center.y - d / 2.0) * ky;
    let src_w = d * kx;
    let src_h = d * ky;

    let half = out as f32 / 2.0;
    let (sin, cos) = region.angle.sin_cos();

    let mut output = RgbImage::new(out, out);
    for oy in 0..out {
        for ox in 0..out {
            // Undo the canvas rotation: local = R(angle) * (device - centre).
            let px = ox as f32 + 0.5 - half;
            let py = oy as f32 + 0.5 - half;
            let u = cos * px - sin * py;
            let v = sin * px + cos * py;
            if u.abs() > half || v.abs() > half {
                continue;
            }

            let sx = src_x + (u + half) / out as f32 * src_w;
            let sy = src_y + (v + half) / out as f32 * src_h;
            output.put_pixel(ox, oy, sample_bilinear(frame, sx - 0.5, sy - 0.5));
        }
    }

    CanonicalEyeImage(output)
}

fn scale(native: u32, display: u32) -> f32 {
    if display == 0 {
        1.0
    } else {
        native as f32 / display as f32
    }
}

fn sample_bilinear(frame: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let texel = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && y >= 0 && (x as u64) < frame.width() as u64 && (y as u64) < frame.height() as u64 {
            let p = frame.get_pixel(x as u32, y as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let a = texel(x0, y0);
    let b = texel(x0 + 1, y0);
    let c = texel(x0, y0 + 1);
    let d = texel(x0 + 1, y0 + 1);

    let mut px = [0u8; 3];
    for i in 0..3 {
        let v = a[i] * (1.0 - fx) * (1.0 - fy)
            + b[i] * fx * (1.0 - fy)
            + c[i] * (1.0 - fx) * fy
            + d[i] * fx * fy;
        px[i] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(px)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{compute_eye_region, EyeCorners, Point2};

    fn region(left: (f32, f32), top: (f32, f32), right: (f32, f32), bottom: (f32, f32), padding: f32) -> EyeRegion {
        compute_eye_region(
            &EyeCorners {
                left: left.into(),
                top: top.into(),
                right: right.into(),
                bottom: bottom.into(),
            },
            padding,
        )
    }

    fn gradient_frame(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]))
    }

    #[test]
    fn test_output_size_is_fixed() {
        let frame = gradient_frame(640, 480);
        let display = Resolution::new(320, 240);
        for (w, size) in [(10.0, 227), (60.0, 227), (3.0, 32)] {
            let r = region((100.0, 50.0), (100.0, 48.0), (100.0 + w, 52.0), (100.0, 53.0), 3.0);
            let out = rectify(&frame, display, &r, size);
            assert_eq!(out.as_image().dimensions(), (size, size));
            assert_eq!(out.size(), size);
        }
    }

    #[test]
    fn test_deterministic() {
        let frame = gradient_frame(320, 240);
        let r = region((100.0, 50.0), (110.0, 44.0), (125.0, 57.0), (110.0, 60.0), 3.0);
        let a = rectify(&frame, Resolution::of(&frame), &r, 64);
        let b = rectify(&frame, Resolution::of(&frame), &r, 64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_area_region_still_renders() {
        let frame = gradient_frame(320, 240);
        let p = (50.0, 50.0);
        let r = region(p, p, p, p, 0.0);
        let out = rectify(&frame, Resolution::of(&frame), &r, 16);
        assert_eq!(out.as_image().dimensions(), (16, 16));
    }

    #[test]
    fn test_tilted_eye_axis_becomes_horizontal() {
        let (w, h) = (200u32, 200u32);
        let mut frame = RgbImage::new(w, h);
        let (a, b) = (Point2::new(80.0, 100.0), Point2::new(120.0, 120.0));
        for i in 0..=1000 {
            let t = i as f32 / 1000.0;
            let x = (a.x + (b.x - a.x) * t).round() as i64;
            let y = (a.y + (b.y - a.y) * t).round() as i64;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    frame.put_pixel((x + dx) as u32, (y + dy) as u32, Rgb([255, 255, 255]));
                }
            }
        }

        let r = region((a.x, a.y), (100.0, 105.0), (b.x, b.y), (100.0, 115.0), 3.0);
        let out = rectify(&frame, Resolution::new(w, h), &r, 64);
        let img = out.as_image();

        let row_mean: f32 = (16..48).map(|x| img.get_pixel(x, 32).0[0] as f32).sum::<f32>() / 32.0;
        assert!(row_mean > 150.0, "middle row should follow the eye axis, mean={row_mean}");
        assert!(img.get_pixel(32, 5).0[0] < 50);
        assert!(img.get_pixel(32, 58).0[0] < 50);
    }

    #[test]
    fn test_native_resolution_scaling() {
        // Same scene at 2x native resolution must give the same crop.
        let small = RgbImage::from_fn(100, 100, |x, _| if x < 50 { Rgb([0, 0, 0]) } else { Rgb([200, 200, 200]) });
        let large = RgbImage::from_fn(200, 200, |x, _| if x < 100 { Rgb([0, 0, 0]) } else { Rgb([200, 200, 200]) });
        let display = Resolution::new(100, 100);
        let r = region((40.0, 50.0), (50.0, 45.0), (60.0, 50.0), (50.0, 55.0), 2.0);

        let a = rectify(&small, display, &r, 20);
        let b = rectify(&large, display, &r, 20);
        assert!(a.as_image().get_pixel(2, 10).0[0] < 20);
        assert!(b.as_image().get_pixel(2, 10).0[0] < 20);
        assert!(a.as_image().get_pixel(17, 10).0[0] > 180);
        assert!(b.as_image().get_pixel(17, 10).0[0] > 180);
    }
}
