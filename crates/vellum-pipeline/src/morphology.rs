//! In-place operations on binary masks.
//!
//! Nonzero mask pixels are foreground, zero pixels are background.
//! [`inset`] shrinks the foreground by a distance, [`outset`] grows it,
//! [`clear_border_regions`] drops foreground components that touch the
//! image edge. A list of [`MaskCommand`]s is applied strictly in order
//! by [`apply_commands`].

use std::fmt;

use image::{GrayImage, Luma};
use imageproc::distance_transform::{Norm, distance_transform, euclidean_squared_distance_transform};
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Largest L1 distance `imageproc` reports before saturating.
const L1_STEP_LIMIT: f64 = 254.0;

/// Distance metric for [`inset`] and [`outset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceNorm {
    /// Manhattan distance (diamond neighbourhoods).
    L1,
    /// Euclidean distance (disc neighbourhoods).
    #[default]
    L2,
}

impl fmt::Display for DistanceNorm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1 => f.write_str("L1"),
            Self::L2 => f.write_str("L2"),
        }
    }
}

/// One step of a mask-editing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaskCommand {
    /// Complement every sample.
    Negate,
    /// Remove foreground components touching the image border.
    ClearBorder,
    /// Shrink the foreground by `distance`.
    Inset {
        /// Distance in pixels; negative values grow instead.
        distance: f64,
        /// Distance metric.
        norm: DistanceNorm,
    },
    /// Grow the foreground by `distance`.
    Outset {
        /// Distance in pixels; negative values shrink instead.
        distance: f64,
        /// Distance metric.
        norm: DistanceNorm,
    },
}

impl MaskCommand {
    /// Rewrite negative inset/outset distances as the complementary
    /// operation with a positive distance.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Inset { distance, norm } if distance < 0.0 => Self::Outset {
                distance: -distance,
                norm,
            },
            Self::Outset { distance, norm } if distance < 0.0 => Self::Inset {
                distance: -distance,
                norm,
            },
            other => other,
        }
    }

    /// Check that any distance is finite.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a NaN or infinite
    /// distance.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match *self {
            Self::Inset { distance, .. } | Self::Outset { distance, .. }
                if !distance.is_finite() =>
            {
                Err(PipelineError::InvalidConfig(format!(
                    "mask distance must be finite, got {distance}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Apply this command to `mask`.
    pub fn apply(self, mask: &mut GrayImage) {
        match self.normalized() {
            Self::Negate => negate(mask),
            Self::ClearBorder => clear_border_regions(mask),
            Self::Inset { distance, norm } => inset(mask, distance, norm),
            Self::Outset { distance, norm } => outset(mask, distance, norm),
        }
    }
}

impl fmt::Display for MaskCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negate => f.write_str("negate"),
            Self::ClearBorder => f.write_str("clear-border"),
            Self::Inset { distance, norm } => write!(f, "inset({distance}, {norm})"),
            Self::Outset { distance, norm } => write!(f, "outset({distance}, {norm})"),
        }
    }
}

/// Apply `commands` to `mask` in order.
///
/// Every command is validated before the mask is touched.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if any command carries a
/// non-finite distance.
pub fn apply_commands(mask: &mut GrayImage, commands: &[MaskCommand]) -> Result<(), PipelineError> {
    for command in commands {
        command.validate()?;
    }
    for command in commands {
        tracing::debug!(%command, "applying mask command");
        command.apply(mask);
    }
    Ok(())
}

/// Complement every sample (`255 - v`).
pub fn negate(mask: &mut GrayImage) {
    image::imageops::invert(mask);
}

/// Zero every foreground component that touches the image border.
///
/// Components are 4-connected runs of equal value, so a region of one
/// intensity touching the border does not take an adjacent region of a
/// different intensity with it.
pub fn clear_border_regions(mask: &mut GrayImage) {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let labels = connected_components(&*mask, Connectivity::Four, Luma([0u8]));
    let label_count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    let mut touches_border = vec![false; label_count + 1];

    let border = (0..width)
        .flat_map(|x| [(x, 0), (x, height - 1)])
        .chain((0..height).flat_map(|y| [(0, y), (width - 1, y)]));
    for (x, y) in border {
        touches_border[labels.get_pixel(x, y).0[0] as usize] = true;
    }
    // Label 0 is the background.
    touches_border[0] = false;

    let mut cleared = 0u64;
    for (pixel, label) in mask.pixels_mut().zip(labels.pixels()) {
        if touches_border[label.0[0] as usize] {
            pixel.0[0] = 0;
            cleared += 1;
        }
    }
    tracing::debug!(cleared, "cleared border-connected regions");
}

/// Shrink the foreground by `distance` under `norm`.
///
/// Every pixel within `distance` of a zero pixel becomes 0 and every
/// other pixel becomes 255, so the result is always bilevel. A negative
/// `distance` grows the foreground instead (see [`outset`]).
pub fn inset(mask: &mut GrayImage, distance: f64, norm: DistanceNorm) {
    if distance < 0.0 {
        outset(mask, -distance, norm);
        return;
    }

    if !mask.pixels().any(|p| p.0[0] == 0) {
        // Nothing to measure from.
        mask.pixels_mut().for_each(|p| p.0[0] = 255);
        return;
    }

    match norm {
        DistanceNorm::L2 => inset_l2(mask, distance),
        DistanceNorm::L1 => inset_l1(mask, distance),
    }
}

/// Grow the foreground by `distance` under `norm`.
///
/// Equivalent to negate, [`inset`], negate. A negative `distance`
/// shrinks the foreground instead.
pub fn outset(mask: &mut GrayImage, distance: f64, norm: DistanceNorm) {
    if distance < 0.0 {
        inset(mask, -distance, norm);
        return;
    }
    negate(mask);
    inset(mask, distance, norm);
    negate(mask);
}

/// Image whose nonzero pixels are the zero pixels of `mask`.
fn zeros_as_foreground(mask: &GrayImage) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([if mask.get_pixel(x, y).0[0] == 0 { 255 } else { 0 }])
    })
}

fn inset_l2(mask: &mut GrayImage, distance: f64) {
    let squared = euclidean_squared_distance_transform(&zeros_as_foreground(mask));
    let limit = distance * distance;
    for (pixel, d) in mask.pixels_mut().zip(squared.pixels()) {
        pixel.0[0] = if d.0[0] <= limit { 0 } else { 255 };
    }
}

/// L1 distances are integral and `imageproc` saturates them at 255, so
/// long insets are applied as a sequence of shorter ones. Diamond
/// erosions compose additively, which keeps the result exact.
fn inset_l1(mask: &mut GrayImage, distance: f64) {
    let extent = f64::from(mask.width()) + f64::from(mask.height());
    let mut remaining = distance.floor().min(extent);
    loop {
        let step = remaining.min(L1_STEP_LIMIT);
        let dist = distance_transform(&zeros_as_foreground(mask), Norm::L1);
        for (pixel, d) in mask.pixels_mut().zip(dist.pixels()) {
            pixel.0[0] = if f64::from(d.0[0]) <= step { 0 } else { 255 };
        }
        remaining -= step;
        if remaining < 1.0 {
            break;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// `w` x `h` mask with a filled rectangle `[x0, x1) x [y0, y1)`.
    fn rect_mask(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            Luma([if (x0..x1).contains(&x) && (y0..y1).contains(&y) { 255 } else { 0 }])
        })
    }

    fn foreground(mask: &GrayImage) -> Vec<(u32, u32)> {
        mask.enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] != 0)
            .map(|(x, y, _)| (x, y))
            .collect()
    }

    fn blobs() -> GrayImage {
        GrayImage::from_fn(16, 12, |x, y| {
            let a = (2..9).contains(&x) && (3..10).contains(&y);
            let b = (11..14).contains(&x) && (1..4).contains(&y);
            let c = x == 13 && y == 8;
            Luma([if a || b || c { 255 } else { 0 }])
        })
    }

    #[test]
    fn negate_is_an_involution() {
        let original = GrayImage::from_fn(7, 5, |x, y| Luma([u8::try_from(x * 31 + y * 7).unwrap()]));
        let mut mask = original.clone();
        negate(&mut mask);
        assert_eq!(mask.get_pixel(1, 0).0[0], 255 - 31);
        negate(&mut mask);
        assert_eq!(mask, original);
    }

    #[test]
    fn clear_border_on_empty_mask_is_noop() {
        let mut mask = GrayImage::new(9, 6);
        clear_border_regions(&mut mask);
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn clear_border_removes_only_edge_touching_blobs() {
        let mut mask = GrayImage::new(10, 10);
        // Touches the left edge.
        for y in 2..5 {
            for x in 0..3 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        // Interior.
        for y in 6..8 {
            for x in 5..8 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        clear_border_regions(&mut mask);
        assert_eq!(mask.get_pixel(1, 3).0[0], 0);
        assert_eq!(mask.get_pixel(2, 4).0[0], 0);
        assert_eq!(mask.get_pixel(6, 7).0[0], 255);
        assert_eq!(foreground(&mask).len(), 6);
    }

    #[test]
    fn clear_border_follows_four_connectivity() {
        let mut mask = GrayImage::new(5, 5);
        mask.put_pixel(0, 0, Luma([255]));
        // Diagonal neighbour only: not connected.
        mask.put_pixel(1, 1, Luma([255]));
        clear_border_regions(&mut mask);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(1, 1).0[0], 255);
    }

    #[test]
    fn clear_border_keeps_adjacent_region_of_other_value() {
        let mut mask = GrayImage::new(6, 3);
        mask.put_pixel(0, 1, Luma([255]));
        mask.put_pixel(1, 1, Luma([128]));
        mask.put_pixel(2, 1, Luma([128]));
        clear_border_regions(&mut mask);
        assert_eq!(mask.get_pixel(0, 1).0[0], 0);
        assert_eq!(mask.get_pixel(1, 1).0[0], 128);
    }

    #[test]
    fn inset_shrinks_square_by_one_pixel() {
        let mut mask = rect_mask(11, 11, 2, 2, 9, 9);
        inset(&mut mask, 1.0, DistanceNorm::L2);
        assert_eq!(mask, rect_mask(11, 11, 3, 3, 8, 8));
    }

    #[test]
    fn inset_l1_shrinks_square_by_two_pixels() {
        let mut mask = rect_mask(11, 11, 2, 2, 9, 9);
        inset(&mut mask, 2.0, DistanceNorm::L1);
        assert_eq!(mask, rect_mask(11, 11, 4, 4, 7, 7));
    }

    #[test]
    fn inset_zero_distance_only_binarizes() {
        let mut mask = GrayImage::from_fn(4, 4, |x, _| Luma([if x == 0 { 0 } else { 90 }]));
        inset(&mut mask, 0.0, DistanceNorm::L2);
        assert_eq!(mask.get_pixel(0, 2).0[0], 0);
        assert_eq!(mask.get_pixel(3, 2).0[0], 255);
    }

    #[test]
    fn inset_of_full_mask_keeps_everything() {
        let mut mask = GrayImage::from_pixel(6, 6, Luma([255]));
        inset(&mut mask, 3.0, DistanceNorm::L2);
        assert!(mask.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn long_l1_inset_is_exact() {
        let mut mask = GrayImage::from_pixel(600, 3, Luma([255]));
        mask.put_pixel(0, 1, Luma([0]));
        inset(&mut mask, 300.0, DistanceNorm::L1);
        assert_eq!(mask.get_pixel(300, 1).0[0], 0);
        assert_eq!(mask.get_pixel(301, 1).0[0], 255);
        assert_eq!(mask.get_pixel(299, 0).0[0], 0);
        assert_eq!(mask.get_pixel(300, 0).0[0], 255);
    }

    #[test]
    fn outset_grows_single_pixel_into_plus() {
        let mut mask = GrayImage::new(9, 9);
        mask.put_pixel(4, 4, Luma([255]));
        outset(&mut mask, 1.0, DistanceNorm::L2);
        let mut fg = foreground(&mask);
        fg.sort_unstable();
        assert_eq!(fg, vec![(3, 4), (4, 3), (4, 4), (4, 5), (5, 4)]);
    }

    #[test]
    fn negative_inset_is_outset() {
        let mut a = blobs();
        let mut b = blobs();
        inset(&mut a, -2.0, DistanceNorm::L2);
        outset(&mut b, 2.0, DistanceNorm::L2);
        assert_eq!(a, b);

        let cmd = MaskCommand::Outset {
            distance: -1.5,
            norm: DistanceNorm::L1,
        };
        assert_eq!(
            cmd.normalized(),
            MaskCommand::Inset {
                distance: 1.5,
                norm: DistanceNorm::L1
            }
        );
    }

    #[test]
    fn opening_keeps_inset_and_stays_within_original() {
        for norm in [DistanceNorm::L1, DistanceNorm::L2] {
            for d in [1.0, 2.0, 2.5] {
                let original = blobs();
                let mut shrunk = original.clone();
                inset(&mut shrunk, d, norm);
                let mut opened = shrunk.clone();
                outset(&mut opened, d, norm);

                for (x, y, p) in shrunk.enumerate_pixels() {
                    if p.0[0] != 0 {
                        assert_ne!(opened.get_pixel(x, y).0[0], 0, "{norm} d={d}: lost ({x},{y})");
                    }
                }
                for (x, y, p) in opened.enumerate_pixels() {
                    if p.0[0] != 0 {
                        assert_ne!(
                            original.get_pixel(x, y).0[0],
                            0,
                            "{norm} d={d}: grew beyond original at ({x},{y})"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn command_order_matters() {
        let single = || {
            let mut m = GrayImage::new(9, 9);
            m.put_pixel(4, 4, Luma([255]));
            m
        };
        let inset1 = MaskCommand::Inset {
            distance: 1.0,
            norm: DistanceNorm::L2,
        };
        let outset1 = MaskCommand::Outset {
            distance: 1.0,
            norm: DistanceNorm::L2,
        };

        let mut a = single();
        apply_commands(&mut a, &[inset1, outset1]).unwrap();
        assert!(foreground(&a).is_empty());

        let mut b = single();
        apply_commands(&mut b, &[outset1, inset1]).unwrap();
        assert_eq!(foreground(&b), vec![(4, 4)]);
    }

    #[test]
    fn apply_commands_validates_before_mutating() {
        let original = blobs();
        let mut mask = original.clone();
        let result = apply_commands(
            &mut mask,
            &[
                MaskCommand::Negate,
                MaskCommand::Inset {
                    distance: f64::NAN,
                    norm: DistanceNorm::L2,
                },
            ],
        );
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
        assert_eq!(mask, original);
    }

    #[test]
    fn command_serde_roundtrip() {
        let commands = vec![
            MaskCommand::Negate,
            MaskCommand::ClearBorder,
            MaskCommand::Outset {
                distance: 3.0,
                norm: DistanceNorm::L1,
            },
        ];
        let json = serde_json::to_string(&commands).unwrap();
        let back: Vec<MaskCommand> = serde_json::from_str(&json).unwrap();
        assert_eq!(commands, back);
    }
}
