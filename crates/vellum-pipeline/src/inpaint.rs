//! Diffusion inpainting under a mask.
//!
//! Masked (nonzero) pixels are first given a starting value, either the
//! mean of all unmasked pixels or the value of the nearest unmasked
//! pixel in L1 distance, then smoothed by repeatedly replacing each
//! masked pixel with a weighted average of its eight neighbours
//! (Oliveira et al., "Fast Digital Image Inpainting", 2001). Unmasked
//! pixels are never modified.
//!
//! The number of diffusion passes is fixed by the caller; there is no
//! convergence test.

use std::fmt;

use image::{ImageBuffer, Pixel};
use serde::{Deserialize, Serialize};

use crate::types::{GrayImage, PipelineError, Raster};

/// Weight of each diagonal neighbour.
const CORNER_WEIGHT: f32 = 0.073_235;
/// Weight of each edge neighbour.
const EDGE_WEIGHT: f32 = 0.176_765;

/// How masked pixels are seeded before diffusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InpaintInit {
    /// Per-channel integer mean of all unmasked pixels.
    Mean,
    /// Value of the nearest unmasked pixel in L1 distance, ties broken
    /// by [`L1Ring`] order.
    #[default]
    NearestL1,
}

impl fmt::Display for InpaintInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mean => f.write_str("mean"),
            Self::NearestL1 => f.write_str("nearest-l1"),
        }
    }
}

/// Offsets at exactly L1 distance `radius` from the origin.
///
/// For each `k` in `0..radius` the ring yields, in this order:
/// `(k, k - radius)`, `(radius - k, k)`, `(-k, radius - k)`,
/// `(k - radius, -k)`. That walks the four diamond edges in step,
/// starting from the top, right, bottom and left vertices. A radius of
/// zero yields nothing.
#[derive(Debug, Clone)]
pub struct L1Ring {
    radius: i64,
    k: i64,
    side: u8,
}

impl L1Ring {
    /// Ring of the given radius.
    #[must_use]
    pub fn new(radius: u32) -> Self {
        Self {
            radius: i64::from(radius),
            k: 0,
            side: 0,
        }
    }
}

impl Iterator for L1Ring {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.k >= self.radius {
            return None;
        }
        let (d, k) = (self.radius, self.k);
        let offset = match self.side {
            0 => (k, k - d),
            1 => (d - k, k),
            2 => (-k, d - k),
            _ => (k - d, -k),
        };
        if self.side == 3 {
            self.side = 0;
            self.k += 1;
        } else {
            self.side += 1;
        }
        Some(offset)
    }
}

/// Reconstruct the masked part of `image`.
///
/// `mask` must have the same dimensions as `image`; nonzero mask
/// pixels are filled. With `iterations == 0` the initialisation fill is
/// returned without any diffusion.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if the mask and image
/// dimensions differ, and [`PipelineError::NoUnmaskedPixels`] if the
/// mask covers the whole image.
#[tracing::instrument(skip(image, mask))]
pub fn inpaint(
    image: &Raster,
    mask: &GrayImage,
    init: InpaintInit,
    iterations: u32,
) -> Result<Raster, PipelineError> {
    match image {
        Raster::Gray(img) => Ok(Raster::Gray(inpaint_buffer(img, mask, init, iterations)?)),
        Raster::Rgb(img) => Ok(Raster::Rgb(inpaint_buffer(img, mask, init, iterations)?)),
    }
}

/// [`inpaint`] for any 8-bit pixel type.
///
/// # Errors
///
/// See [`inpaint`].
pub fn inpaint_buffer<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    mask: &GrayImage,
    init: InpaintInit,
    iterations: u32,
) -> Result<ImageBuffer<P, Vec<u8>>, PipelineError>
where
    P: Pixel<Subpixel = u8>,
{
    if image.dimensions() != mask.dimensions() {
        return Err(PipelineError::InvalidConfig(format!(
            "mask is {}x{} but image is {}x{}",
            mask.width(),
            mask.height(),
            image.width(),
            image.height()
        )));
    }

    let masked: Vec<bool> = mask.pixels().map(|p| p.0[0] != 0).collect();
    let masked_indices: Vec<usize> = masked
        .iter()
        .enumerate()
        .filter_map(|(i, &m)| m.then_some(i))
        .collect();
    if masked_indices.is_empty() {
        tracing::debug!("mask is empty, nothing to inpaint");
        return Ok(image.clone());
    }
    if masked_indices.len() == masked.len() {
        return Err(PipelineError::NoUnmaskedPixels);
    }

    let layout = Layout {
        width: image.width() as usize,
        height: image.height() as usize,
        channels: usize::from(P::CHANNEL_COUNT),
    };
    let mut samples = image.as_raw().clone();
    match init {
        InpaintInit::Mean => fill_mean(&mut samples, &masked, &masked_indices, layout),
        InpaintInit::NearestL1 => fill_nearest(&mut samples, &masked, &masked_indices, layout)?,
    }
    tracing::debug!(masked = masked_indices.len(), %init, iterations, "inpaint initialised");

    if iterations > 0 {
        let mut values: Vec<f32> = samples.iter().copied().map(f32::from).collect();
        diffuse(&mut values, &masked_indices, layout, iterations);
        samples = values.into_iter().map(to_sample).collect();
    }

    ImageBuffer::from_raw(image.width(), image.height(), samples).ok_or_else(|| {
        PipelineError::InvalidConfig("inpainted buffer does not match image size".to_string())
    })
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    width: usize,
    height: usize,
    channels: usize,
}

impl Layout {
    const fn sample(self, x: usize, y: usize, c: usize) -> usize {
        (y * self.width + x) * self.channels + c
    }
}

fn fill_mean(samples: &mut [u8], masked: &[bool], masked_indices: &[usize], layout: Layout) {
    let mut sums = vec![0u64; layout.channels];
    let mut count = 0u64;
    for (i, _) in masked.iter().enumerate().filter(|(_, m)| !**m) {
        for (c, sum) in sums.iter_mut().enumerate() {
            *sum += u64::from(samples[i * layout.channels + c]);
        }
        count += 1;
    }
    // Callers guarantee at least one unmasked pixel.
    let means: Vec<u8> = sums
        .iter()
        .map(|s| u8::try_from(s / count.max(1)).unwrap_or(u8::MAX))
        .collect();

    for &i in masked_indices {
        samples[i * layout.channels..(i + 1) * layout.channels].copy_from_slice(&means);
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fill_nearest(
    samples: &mut [u8],
    masked: &[bool],
    masked_indices: &[usize],
    layout: Layout,
) -> Result<(), PipelineError> {
    let (w, h) = (layout.width as i64, layout.height as i64);
    let max_radius = u32::try_from(w + h).unwrap_or(u32::MAX);

    for &i in masked_indices {
        let (x, y) = ((i % layout.width) as i64, (i / layout.width) as i64);
        let donor = (1..=max_radius)
            .flat_map(L1Ring::new)
            .map(|(dx, dy)| (x + dx, y + dy))
            .filter(|&(nx, ny)| nx >= 0 && ny >= 0 && nx < w && ny < h)
            .map(|(nx, ny)| (ny * w + nx) as usize)
            .find(|&j| !masked[j])
            .ok_or(PipelineError::NoUnmaskedPixels)?;

        let c = layout.channels;
        samples.copy_within(donor * c..(donor + 1) * c, i * c);
    }
    Ok(())
}

/// Jacobi passes of the 3x3 stencil over masked pixels, with the image
/// border replicated.
fn diffuse(values: &mut Vec<f32>, masked_indices: &[usize], layout: Layout, iterations: u32) {
    let mut next = values.clone();
    for _ in 0..iterations {
        for &i in masked_indices {
            let (x, y) = (i % layout.width, i / layout.width);
            let (left, right) = (x.saturating_sub(1), (x + 1).min(layout.width - 1));
            let (up, down) = (y.saturating_sub(1), (y + 1).min(layout.height - 1));
            for c in 0..layout.channels {
                let at = |xx, yy| values[layout.sample(xx, yy, c)];
                let corners = at(left, up) + at(right, up) + at(left, down) + at(right, down);
                let edges = at(x, up) + at(left, y) + at(right, y) + at(x, down);
                next[layout.sample(x, y, c)] = CORNER_WEIGHT.mul_add(corners, EDGE_WEIGHT * edges);
            }
        }
        // Unmasked samples are identical in both buffers.
        std::mem::swap(values, &mut next);
    }
}

/// Saturating conversion with ties rounded to even.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_sample(v: f32) -> u8 {
    v.round_ties_even().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use image::{Luma, Rgb, RgbImage};

    use super::*;

    fn gray(raster: Raster) -> GrayImage {
        match raster {
            Raster::Gray(img) => img,
            Raster::Rgb(_) => panic!("expected a single-channel raster"),
        }
    }

    fn row(values: &[u8]) -> GrayImage {
        GrayImage::from_fn(u32::try_from(values.len()).unwrap(), 1, |x, _| {
            Luma([values[x as usize]])
        })
    }

    #[test]
    fn ring_order_radius_one() {
        let ring: Vec<_> = L1Ring::new(1).collect();
        assert_eq!(ring, vec![(0, -1), (1, 0), (0, 1), (-1, 0)]);
    }

    #[test]
    fn ring_order_radius_two() {
        let ring: Vec<_> = L1Ring::new(2).collect();
        assert_eq!(
            ring,
            vec![
                (0, -2),
                (2, 0),
                (0, 2),
                (-2, 0),
                (1, -1),
                (1, 1),
                (-1, 1),
                (-1, -1)
            ]
        );
    }

    #[test]
    fn ring_covers_each_offset_once() {
        for radius in 0..6u32 {
            let mut ring: Vec<_> = L1Ring::new(radius).collect();
            assert_eq!(ring.len(), 4 * radius as usize);
            assert!(ring.iter().all(|(dx, dy)| dx.abs() + dy.abs() == i64::from(radius)));
            ring.sort_unstable();
            ring.dedup();
            assert_eq!(ring.len(), 4 * radius as usize, "duplicate at radius {radius}");
        }
    }

    #[test]
    fn mean_fill_without_diffusion() {
        let image = Raster::Gray(row(&[10, 0, 21, 0, 30]));
        let mask = row(&[0, 255, 0, 255, 0]);
        let out = gray(inpaint(&image, &mask, InpaintInit::Mean, 0).unwrap());
        // (10 + 21 + 30) / 3 = 20 in integer arithmetic.
        assert_eq!(out.as_raw(), &vec![10, 20, 21, 20, 30]);
    }

    #[test]
    fn nearest_fill_without_diffusion() {
        let image = Raster::Gray(row(&[10, 99, 99, 99, 50]));
        let mask = row(&[0, 255, 255, 255, 0]);
        let out = gray(inpaint(&image, &mask, InpaintInit::NearestL1, 0).unwrap());
        // The middle pixel is equidistant; the ring reaches +x first.
        assert_eq!(out.as_raw(), &vec![10, 10, 50, 50, 50]);
    }

    #[test]
    fn nearest_fill_copies_every_channel() {
        let image = Raster::Rgb(RgbImage::from_fn(3, 3, |x, y| {
            if (x, y) == (2, 2) {
                Rgb([1, 2, 3])
            } else {
                Rgb([0, 0, 0])
            }
        }));
        let mask = GrayImage::from_fn(3, 3, |x, y| Luma([if (x, y) == (2, 2) { 0 } else { 255 }]));
        let Raster::Rgb(out) = inpaint(&image, &mask, InpaintInit::NearestL1, 0).unwrap() else {
            panic!("expected an RGB raster");
        };
        assert!(out.pixels().all(|p| p.0 == [1, 2, 3]));
    }

    #[test]
    fn fully_masked_image_is_rejected() {
        let image = Raster::Gray(GrayImage::from_pixel(4, 3, Luma([80])));
        let mask = GrayImage::from_pixel(4, 3, Luma([255]));
        for init in [InpaintInit::Mean, InpaintInit::NearestL1] {
            assert!(matches!(
                inpaint(&image, &mask, init, 16),
                Err(PipelineError::NoUnmaskedPixels)
            ));
        }
    }

    #[test]
    fn empty_mask_returns_input() {
        let img = GrayImage::from_fn(5, 4, |x, y| Luma([u8::try_from(x * 40 + y).unwrap()]));
        let out = gray(inpaint(&Raster::Gray(img.clone()), &GrayImage::new(5, 4), InpaintInit::Mean, 8).unwrap());
        assert_eq!(out, img);
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let image = Raster::Gray(GrayImage::new(4, 4));
        let mask = GrayImage::new(4, 5);
        assert!(matches!(
            inpaint(&image, &mask, InpaintInit::Mean, 0),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn diffusion_leaves_unmasked_pixels_untouched() {
        let img = GrayImage::from_fn(12, 8, |x, y| Luma([u8::try_from((x * 17 + y * 29) % 256).unwrap()]));
        let mask = GrayImage::from_fn(12, 8, |x, y| {
            Luma([if (3..9).contains(&x) && (2..6).contains(&y) { 255 } else { 0 }])
        });
        let out = gray(inpaint(&Raster::Gray(img.clone()), &mask, InpaintInit::NearestL1, 30).unwrap());
        for (x, y, m) in mask.enumerate_pixels() {
            if m.0[0] == 0 {
                assert_eq!(out.get_pixel(x, y), img.get_pixel(x, y), "({x},{y}) changed");
            }
        }
    }

    #[test]
    fn diffusion_keeps_uniform_background_uniform() {
        let img = GrayImage::from_fn(9, 9, |x, y| {
            Luma([if (3..6).contains(&x) && (3..6).contains(&y) { 0 } else { 100 }])
        });
        let mask = GrayImage::from_fn(9, 9, |x, y| {
            Luma([if (3..6).contains(&x) && (3..6).contains(&y) { 255 } else { 0 }])
        });
        for init in [InpaintInit::Mean, InpaintInit::NearestL1] {
            let out = gray(inpaint(&Raster::Gray(img.clone()), &mask, init, 16).unwrap());
            assert!(out.pixels().all(|p| p.0[0] == 100), "{init}: {:?}", out.as_raw());
        }
    }

    #[test]
    fn diffusion_interpolates_between_known_edges() {
        let img = GrayImage::from_fn(8, 3, |x, _| Luma([if x == 7 { 200 } else { 0 }]));
        let mask = GrayImage::from_fn(8, 3, |x, _| Luma([if x == 0 || x == 7 { 0 } else { 255 }]));
        let out = gray(inpaint(&Raster::Gray(img), &mask, InpaintInit::Mean, 200).unwrap());
        let middle: Vec<u8> = (0..8).map(|x| out.get_pixel(x, 1).0[0]).collect();
        assert!(
            middle.windows(2).all(|w| w[0] <= w[1]),
            "expected a rising ramp, got {middle:?}"
        );
        assert!(middle[1] > 0 && middle[6] < 200, "expected interior values, got {middle:?}");
    }

    #[test]
    fn stencil_weights_sum_to_one() {
        let total = 4.0f32.mul_add(CORNER_WEIGHT, 4.0 * EDGE_WEIGHT);
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn samples_round_half_to_even() {
        assert_eq!(to_sample(2.5), 2);
        assert_eq!(to_sample(3.5), 4);
        assert_eq!(to_sample(127.4), 127);
        assert_eq!(to_sample(-3.0), 0);
        assert_eq!(to_sample(300.0), 255);
    }

    #[test]
    fn default_init_is_nearest() {
        assert_eq!(InpaintInit::default(), InpaintInit::NearestL1);
    }
}
