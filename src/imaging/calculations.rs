//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::FillMode;

/// Output dimensions of a resize of `source` into the `target` box.
///
/// # Examples
/// ```
/// # use sitegraph::imaging::{FillMode, target_dimensions};
/// assert_eq!(target_dimensions((200, 200), (100, 50), FillMode::Cover), (100, 50));
/// assert_eq!(target_dimensions((200, 200), (100, 50), FillMode::Fit), (50, 50));
/// assert_eq!(target_dimensions((200, 200), (100, 50), FillMode::NoResize), (200, 200));
/// ```
pub fn target_dimensions(source: (u32, u32), target: (u32, u32), fill: FillMode) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = (target.0.max(1), target.1.max(1));

    match fill {
        FillMode::Cover | FillMode::Transform => (tgt_w, tgt_h),
        FillMode::NoResize => source,
        FillMode::Fit => {
            if src_w == 0 || src_h == 0 {
                return source;
            }
            // Never upscale: the box is clamped to the source first.
            let box_w = tgt_w.min(src_w) as f64;
            let box_h = tgt_h.min(src_h) as f64;
            let scale = (box_w / src_w as f64).min(box_h / src_h as f64);
            let w = ((src_w as f64 * scale).round() as u32).max(1);
            let h = ((src_h as f64 * scale).round() as u32).max(1);
            (w.min(tgt_w), h.min(tgt_h))
        }
    }
}

/// Calculate dimensions needed to fill a target area (resize before crop).
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension will match exactly, the other may exceed.
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        let h = tgt_h;
        let w = ((h as f64 * src_aspect).round() as u32).max(tgt_w);
        (w, h)
    } else {
        // Source is taller: width will match, height will exceed
        let w = tgt_w;
        let h = ((w as f64 / src_aspect).round() as u32).max(tgt_h);
        (w, h)
    }
}

/// Top-left offset of a centered `crop` inside `filled`.
pub fn center_crop_offset(filled: (u32, u32), crop: (u32, u32)) -> (u32, u32) {
    (
        filled.0.saturating_sub(crop.0) / 2,
        filled.1.saturating_sub(crop.1) / 2,
    )
}
