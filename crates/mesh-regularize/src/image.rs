//! Image-space smoothness losses over rendered buffers.
//!
//! Buffers are row-major `height x width x channels` with alpha in the last
//! channel. Sampling uses pixel-centre coordinates: pixel `(x, y)` lives at
//! exactly `(x as f32, y as f32)`, so an unjittered tap reproduces the
//! source pixel bit for bit.
//!
//! The jittered estimator is stochastic. The random source is always passed
//! in; seed a `StdRng` to compare runs.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{MeshError, MeshResult};

/// A rendered image with alpha in the last channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderBuffer {
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<f32>,
}

impl RenderBuffer {
    /// Wrap raw row-major data.
    ///
    /// Requires at least one colour channel plus alpha and
    /// `data.len() == height * width * channels`.
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<f32>) -> MeshResult<Self> {
        if channels < 2 {
            return Err(MeshError::invalid_buffer(format!(
                "need at least one colour channel plus alpha, got {} channel(s)",
                channels
            )));
        }
        if height == 0 || width == 0 {
            return Err(MeshError::invalid_buffer(format!(
                "buffer is {}x{}, both dimensions must be positive",
                height, width
            )));
        }
        let expected = height * width * channels;
        if data.len() != expected {
            return Err(MeshError::invalid_buffer(format!(
                "{}x{}x{} needs {} values, got {}",
                height,
                width,
                channels,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            height,
            width,
            channels,
            data,
        })
    }

    /// Every pixel set to `pixel`; its length is the channel count.
    pub fn filled(height: usize, width: usize, pixel: &[f32]) -> MeshResult<Self> {
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take(height * width * pixel.len())
            .collect();
        Self::new(height, width, pixel.len(), data)
    }

    /// Build from a per-pixel function of `(x, y)`.
    pub fn from_fn<F>(height: usize, width: usize, channels: usize, mut f: F) -> MeshResult<Self>
    where
        F: FnMut(usize, usize) -> Vec<f32>,
    {
        let mut data = Vec::with_capacity(height * width * channels);
        for y in 0..height {
            for x in 0..width {
                let pixel = f(x, y);
                if pixel.len() != channels {
                    return Err(MeshError::invalid_buffer(format!(
                        "pixel ({}, {}) has {} channels, expected {}",
                        x,
                        y,
                        pixel.len(),
                        channels
                    )));
                }
                data.extend_from_slice(&pixel);
            }
        }
        Self::new(height, width, channels, data)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Raw row-major data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// All channels of pixel `(x, y)`. Panics when out of range.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Alpha of pixel `(x, y)`.
    #[inline]
    pub fn alpha(&self, x: usize, y: usize) -> f32 {
        self.pixel(x, y)[self.channels - 1]
    }

    fn pixels(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.channels)
    }
}

/// Bilinear sample at pixel coordinates, clamping taps to the border.
///
/// Writes one value per channel into `out`, which must hold `channels` values.
pub fn sample_bilinear_clamped(buf: &RenderBuffer, x: f32, y: f32, out: &mut [f32]) {
    let max_x = (buf.width - 1) as f32;
    let max_y = (buf.height - 1) as f32;
    let x = if x.is_finite() { x.clamp(0.0, max_x) } else { 0.0 };
    let y = if y.is_finite() { y.clamp(0.0, max_y) } else { 0.0 };

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(buf.width - 1);
    let y1 = (y0 + 1).min(buf.height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let (p00, p10) = (buf.pixel(x0, y0), buf.pixel(x1, y0));
    let (p01, p11) = (buf.pixel(x0, y1), buf.pixel(x1, y1));

    for (c, o) in out.iter_mut().enumerate().take(buf.channels) {
        let top = p00[c] + (p10[c] - p00[c]) * fx;
        let bottom = p01[c] + (p11[c] - p01[c]) * fx;
        *o = top + (bottom - top) * fy;
    }
}

/// Jitter settings for [`image_grad`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageGradParams {
    /// Standard deviation of the tap offset, in `[-1, 1]` texture units
    /// (half the image spans one unit).
    pub std: f32,
}

impl Default for ImageGradParams {
    fn default() -> Self {
        Self { std: 0.01 }
    }
}

impl ImageGradParams {
    pub fn with_std(std: f32) -> Self {
        Self { std }
    }

    /// Reject a negative or non-finite std.
    pub fn validate(&self) -> MeshResult<()> {
        if !self.std.is_finite() || self.std < 0.0 {
            return Err(MeshError::invalid_parameter(
                "std",
                format!("jitter std must be finite and non-negative, got {}", self.std),
            ));
        }
        Ok(())
    }
}

/// Per-pixel jittered differences.
///
/// Each pixel is re-sampled at its centre plus a Gaussian offset. The
/// colour channels of the result are `|tap - src| * tap_alpha * src_alpha`;
/// the last channel carries the source alpha so the result can feed
/// [`material_smoothness_grad`]. A zero std draws no random numbers.
pub fn image_grad_buffer<R: Rng + ?Sized>(
    buf: &RenderBuffer,
    params: &ImageGradParams,
    rng: &mut R,
) -> MeshResult<RenderBuffer> {
    params.validate()?;

    let jitter = if params.std > 0.0 {
        Some(
            Normal::new(0.0f32, params.std)
                .map_err(|e| MeshError::invalid_parameter("std", e.to_string()))?,
        )
    } else {
        None
    };
    let scale_x = buf.width as f32 / 2.0;
    let scale_y = buf.height as f32 / 2.0;

    let colours = buf.channels - 1;
    let mut tap = vec![0.0f32; buf.channels];
    let mut data = Vec::with_capacity(buf.data.len());

    for y in 0..buf.height {
        for x in 0..buf.width {
            let src = buf.pixel(x, y);
            let (dx, dy) = match &jitter {
                Some(normal) => (normal.sample(rng) * scale_x, normal.sample(rng) * scale_y),
                None => (0.0, 0.0),
            };
            sample_bilinear_clamped(buf, x as f32 + dx, y as f32 + dy, &mut tap);

            let weight = tap[colours] * src[colours];
            for c in 0..colours {
                data.push((tap[c] - src[c]).abs() * weight);
            }
            data.push(src[colours]);
        }
    }

    RenderBuffer::new(buf.height, buf.width, buf.channels, data)
}

/// Mean jittered colour difference over every pixel and colour channel.
///
/// # Example
///
/// ```
/// use mesh_regularize::{image_grad, ImageGradParams, RenderBuffer};
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let flat = RenderBuffer::filled(8, 8, &[0.2, 0.4, 0.6, 1.0]).unwrap();
/// let mut rng = StdRng::seed_from_u64(7);
/// let loss = image_grad(&flat, &ImageGradParams::default(), &mut rng).unwrap();
/// assert_eq!(loss, 0.0);
/// ```
pub fn image_grad<R: Rng + ?Sized>(
    buf: &RenderBuffer,
    params: &ImageGradParams,
    rng: &mut R,
) -> MeshResult<f32> {
    let grad = image_grad_buffer(buf, params, rng)?;
    let colours = grad.channels - 1;
    let sum: f32 = grad.pixels().map(|p| p[..colours].iter().sum::<f32>()).sum();
    let value = sum / (grad.height * grad.width * colours) as f32;
    trace!(std = params.std, value = value, "image_grad evaluated");
    Ok(value)
}

/// Per-material weights for [`material_smoothness_grad`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialSmoothnessWeights {
    /// Albedo (diffuse) term.
    pub kd: f32,
    /// Specular term.
    pub ks: f32,
    /// Normal-map term; off by default.
    pub nrm: f32,
}

impl Default for MaterialSmoothnessWeights {
    fn default() -> Self {
        Self {
            kd: 0.25,
            ks: 0.1,
            nrm: 0.0,
        }
    }
}

impl MaterialSmoothnessWeights {
    /// Reject negative or non-finite weights.
    pub fn validate(&self) -> MeshResult<()> {
        for (name, w) in [("kd", self.kd), ("ks", self.ks), ("nrm", self.nrm)] {
            if !w.is_finite() || w < 0.0 {
                return Err(MeshError::invalid_parameter(
                    name,
                    format!("weight must be finite and non-negative, got {}", w),
                ));
            }
        }
        Ok(())
    }
}

/// Weighted smoothness of material gradient buffers.
///
/// Each input is a gradient buffer with alpha last, as produced by
/// [`image_grad_buffer`]. The albedo term averages the first three channels
/// (luma) and weights by alpha; the specular and normal terms weight every
/// non-alpha channel by alpha. Each term is a mean over its buffer.
///
/// # Errors
///
/// [`MeshError::InvalidBuffer`] when `kd` has fewer than three colour
/// channels or when the three buffers differ in height or width;
/// [`MeshError::InvalidParameter`] for a bad weight.
pub fn material_smoothness_grad(
    kd: &RenderBuffer,
    ks: &RenderBuffer,
    nrm: &RenderBuffer,
    weights: &MaterialSmoothnessWeights,
) -> MeshResult<f32> {
    weights.validate()?;
    if kd.channels < 4 {
        return Err(MeshError::invalid_buffer(format!(
            "albedo gradient needs three colour channels plus alpha, got {} channel(s)",
            kd.channels
        )));
    }
    for (name, buf) in [("specular", ks), ("normal", nrm)] {
        if buf.height != kd.height || buf.width != kd.width {
            return Err(MeshError::invalid_buffer(format!(
                "{} gradient is {}x{}, albedo gradient is {}x{}",
                name, buf.width, buf.height, kd.width, kd.height
            )));
        }
    }

    let mut loss = 0.0;
    if weights.kd > 0.0 {
        loss += mean_weighted(kd, |p| (p[0] + p[1] + p[2]) / 3.0) * weights.kd;
    }
    if weights.ks > 0.0 {
        loss += mean_channels_weighted(ks) * weights.ks;
    }
    if weights.nrm > 0.0 {
        loss += mean_channels_weighted(nrm) * weights.nrm;
    }
    Ok(loss)
}

/// Mean over pixels of `f(pixel) * alpha`.
fn mean_weighted<F>(buf: &RenderBuffer, f: F) -> f32
where
    F: Fn(&[f32]) -> f32,
{
    let alpha = buf.channels - 1;
    let sum: f32 = buf.pixels().map(|p| f(p) * p[alpha]).sum();
    sum / (buf.height * buf.width) as f32
}

/// Mean over pixels and colour channels of `value * alpha`.
fn mean_channels_weighted(buf: &RenderBuffer) -> f32 {
    let colours = buf.channels - 1;
    mean_weighted(buf, |p| p[..colours].iter().sum::<f32>() / colours as f32)
}
