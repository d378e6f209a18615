//! `ocular rectify`: crop a canonical eye image from a still frame.

use std::path::Path;

use anyhow::{Context, Result};
use ocular_core::{compute_eye_region, rectify, EyeLandmarkIndices, LandmarkSet, Resolution};

pub struct RectifyArgs<'a> {
    pub image: &'a Path,
    pub landmarks: &'a Path,
    pub out: &'a Path,
    /// Resolution the landmarks are expressed in; the frame's own when unset.
    pub display: Option<Resolution>,
    pub size: u32,
    pub padding: f32,
    pub eye: EyeLandmarkIndices,
}

pub fn run(args: RectifyArgs<'_>) -> Result<()> {
    let frame = image::open(args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?
        .into_rgb8();
    let text = std::fs::read_to_string(args.landmarks)
        .with_context(|| format!("failed to read {}", args.landmarks.display()))?;
    let landmarks: LandmarkSet = serde_json::from_str(&text)
        .with_context(|| format!("invalid landmarks in {}", args.landmarks.display()))?;

    let corners = landmarks.eye_corners(&args.eye).with_context(|| {
        format!(
            "landmark set has {} points; eye indices {:?} are out of range",
            landmarks.len(),
            args.eye
        )
    })?;

    let display = args.display.unwrap_or_else(|| Resolution::of(&frame));
    let region = compute_eye_region(&corners, args.padding);
    let crop = rectify(&frame, display, &region, args.size);

    crop.as_image()
        .save(args.out)
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    println!(
        "eye box {:.1}x{:.1} at ({:.1}, {:.1}), angle {:.1} deg -> {} ({}x{})",
        region.width,
        region.height,
        region.x,
        region.y,
        region.angle.to_degrees(),
        args.out.display(),
        crop.size(),
        crop.size()
    );
    if region.area() <= 0.0 {
        println!("warning: eye box has zero area; the crop carries no eye content");
    }
    Ok(())
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_resolution(s: &str) -> Result<Resolution, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let width: u32 = w.trim().parse().map_err(|_| format!("invalid width '{w}'"))?;
    let height: u32 = h.trim().parse().map_err(|_| format!("invalid height '{h}'"))?;
    if width == 0 || height == 0 {
        return Err("resolution must be non-zero".to_string());
    }
    Ok(Resolution::new(width, height))
}

/// Parse `LEFT,TOP,RIGHT,BOTTOM` landmark indices, in the daemon's
/// `OCULAR_EYE_*` order.
pub fn parse_eye_indices(s: &str) -> Result<EyeLandmarkIndices, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [left, top, right, bottom] = parts.as_slice() else {
        return Err(format!("expected LEFT,TOP,RIGHT,BOTTOM, got '{s}'"));
    };
    let index = |v: &str| v.parse::<usize>().map_err(|_| format!("invalid landmark index '{v}'"));
    Ok(EyeLandmarkIndices {
        left_corner: index(*left)?,
        top_lid: index(*top)?,
        right_corner: index(*right)?,
        bottom_lid: index(*bottom)?,
    })
}
