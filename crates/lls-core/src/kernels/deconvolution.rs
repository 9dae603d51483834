//! Reference Richardson-Lucy deconvolution.

use std::sync::Arc;

use ndarray::{Array3, Axis as NdAxis};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use super::{Boundary, CpuDeconRequest, Deconvolver, GpuDeconRequest};
use crate::error::KernelError;

/// CPU Richardson-Lucy with FFT convolution.
///
/// The GPU entry point is not available in this implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RichardsonLucy;

// Keeps the ratio finite where the blurred estimate is zero.
const RATIO_EPS: f32 = 1e-12;

const ZERO: Complex32 = Complex32::new(0.0, 0.0);

/// Offset of `i` by `d` along an axis of length `n`, or `None` when it
/// falls outside and the boundary is zero.
fn shifted(i: usize, d: isize, n: usize, boundary: Boundary) -> Option<usize> {
    let j = i.checked_add_signed(d);
    match (j, boundary) {
        (Some(j), _) if j < n => Some(j),
        (_, Boundary::Zero) => None,
        (Some(_), Boundary::Nearest) => Some(n - 1),
        (None, Boundary::Nearest) => Some(0),
    }
}

fn dims(volume: &Array3<f32>) -> [usize; 3] {
    let (z, y, x) = volume.dim();
    [z, y, x]
}

/// Plans for same-size convolution of one image shape with kernels of one
/// shape.
///
/// Each axis is padded to `image + kernel - 1`, so the circular product
/// never wraps into the voxels that are kept.
struct FftConvolution {
    image_dim: [usize; 3],
    kernel_dim: [usize; 3],
    padded_dim: [usize; 3],
    forward: Vec<Arc<dyn Fft<f32>>>,
    inverse: Vec<Arc<dyn Fft<f32>>>,
}

impl FftConvolution {
    fn new(image_dim: [usize; 3], kernel_dim: [usize; 3]) -> Self {
        let padded_dim = [0, 1, 2].map(|axis| image_dim[axis] + kernel_dim[axis] - 1);
        let mut planner = FftPlanner::<f32>::new();
        let forward = padded_dim
            .iter()
            .map(|&n| planner.plan_fft_forward(n))
            .collect();
        let inverse = padded_dim
            .iter()
            .map(|&n| planner.plan_fft_inverse(n))
            .collect();
        Self {
            image_dim,
            kernel_dim,
            padded_dim,
            forward,
            inverse,
        }
    }

    /// Run one 1-D transform per axis, lane by lane.
    fn transform(plans: &[Arc<dyn Fft<f32>>], data: &mut Array3<Complex32>) {
        let mut buffer = Vec::new();
        for (axis, plan) in plans.iter().enumerate() {
            for mut lane in data.lanes_mut(NdAxis(axis)) {
                buffer.clear();
                buffer.extend(lane.iter().copied());
                plan.process(&mut buffer);
                for (dst, &src) in lane.iter_mut().zip(&buffer) {
                    *dst = src;
                }
            }
        }
    }

    fn spectrum(&self, kernel: &Array3<f32>) -> Array3<Complex32> {
        let mut data = Array3::from_shape_fn(self.padded_dim, |index| {
            kernel.get(index).map_or(ZERO, |&k| Complex32::new(k, 0.0))
        });
        Self::transform(&self.forward, &mut data);
        data
    }

    /// Convolve `image` with the kernel whose spectrum is `spectrum`, with
    /// the kernel centered on its middle voxel.
    #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    fn apply(
        &self,
        image: &Array3<f32>,
        spectrum: &Array3<Complex32>,
        boundary: Boundary,
    ) -> Array3<f32> {
        let [nz, ny, nx] = self.image_dim;
        let [kz, ky, kx] = self.kernel_dim;
        // leading pad, so output voxel i reads padded voxel i + k - 1
        let lead = |k: usize| -((k - 1 - k / 2) as isize);
        let (lz, ly, lx) = (lead(kz), lead(ky), lead(kx));

        let mut data = Array3::from_shape_fn(self.padded_dim, |(z, y, x)| {
            match (
                shifted(z, lz, nz, boundary),
                shifted(y, ly, ny, boundary),
                shifted(x, lx, nx, boundary),
            ) {
                (Some(sz), Some(sy), Some(sx)) => Complex32::new(image[[sz, sy, sx]], 0.0),
                _ => ZERO,
            }
        });
        Self::transform(&self.forward, &mut data);
        data *= spectrum;
        Self::transform(&self.inverse, &mut data);

        let scale = 1.0 / self.padded_dim.iter().product::<usize>() as f32;
        Array3::from_shape_fn((nz, ny, nx), |(z, y, x)| {
            data[[z + kz - 1, y + ky - 1, x + kx - 1]].re * scale
        })
    }
}

fn normalized(psf: &Array3<f32>) -> Result<Array3<f32>, KernelError> {
    if psf.is_empty() {
        return Err(KernelError::InvalidInput("PSF is empty".to_owned()));
    }
    let sum: f32 = psf.sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(KernelError::InvalidInput(format!(
            "PSF must have a positive finite sum, got {sum}"
        )));
    }
    Ok(psf / sum)
}

/// Run Richardson-Lucy as described by `request`.
///
/// The PSF is normalized to unit sum first.
///
/// # Errors
///
/// Fails for an empty image or a PSF that cannot be normalized.
pub fn richardson_lucy(request: &CpuDeconRequest<'_>) -> Result<Array3<f32>, KernelError> {
    if request.image.is_empty() {
        return Err(KernelError::InvalidInput("cannot deconvolve an empty volume".to_owned()));
    }
    let psf = normalized(request.psf)?;
    let mut mirrored = psf.clone();
    for axis in 0..3 {
        mirrored.invert_axis(NdAxis(axis));
    }

    let image = request.image;
    let convolution = FftConvolution::new(dims(image), dims(&psf));
    let blur = convolution.spectrum(&psf);
    let correlate = convolution.spectrum(&mirrored);

    let mut estimate = Array3::from_elem(image.raw_dim(), 0.5_f32);
    for _ in 0..request.num_iter {
        let blurred = convolution.apply(&estimate, &blur, request.boundary);
        let mut ratio = image.clone();
        ndarray::Zip::from(&mut ratio).and(&blurred).for_each(|r, &b| {
            *r = if request.filter_epsilon > 0.0 && b < request.filter_epsilon {
                0.0
            } else {
                *r / (b + RATIO_EPS)
            };
        });
        estimate *= &convolution.apply(&ratio, &correlate, request.boundary);
        if request.clip {
            estimate.mapv_inplace(|v| v.clamp(-1.0, 1.0));
        }
    }
    Ok(estimate)
}

impl Deconvolver for RichardsonLucy {
    fn gpu(&self, _request: GpuDeconRequest<'_>) -> Result<Array3<f32>, KernelError> {
        Err(KernelError::BackendUnavailable("GPU deconvolution"))
    }

    fn cpu(&self, request: CpuDeconRequest<'_>) -> Result<Array3<f32>, KernelError> {
        log::debug!(
            "Richardson-Lucy: {} iterations, volume {:?}, psf {:?}",
            request.num_iter,
            request.image.dim(),
            request.psf.dim()
        );
        richardson_lucy(&request)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::deconvolution::Background;

    fn delta_psf() -> Array3<f32> {
        let mut psf = Array3::zeros((3, 3, 3));
        psf[[1, 1, 1]] = 1.0;
        psf
    }

    #[test]
    fn delta_psf_converges_to_the_image() {
        let image = Array3::from_shape_fn((4, 5, 6), |(z, y, x)| {
            f32::from(u16::try_from(z + y + x).unwrap()) + 1.0
        });
        let psf = delta_psf();
        let out = RichardsonLucy
            .cpu(CpuDeconRequest::pipeline(&image, &psf, 30))
            .unwrap();
        for (a, b) in out.iter().zip(image.iter()) {
            assert!((a - b).abs() < 1e-3 * b.max(1.0));
        }
    }

    #[test]
    fn nearest_boundary_keeps_flat_image_flat() {
        let image = Array3::from_elem((4, 4, 4), 2.0_f32);
        let psf = Array3::from_elem((3, 3, 3), 1.0_f32);
        let out = richardson_lucy(&CpuDeconRequest::pipeline(&image, &psf, 5)).unwrap();
        assert!(out.iter().all(|&v| (v - 2.0).abs() < 1e-3));
    }

    #[test]
    fn clip_limits_the_estimate() {
        let image = Array3::from_elem((3, 3, 3), 10.0_f32);
        let psf = delta_psf();
        let mut request = CpuDeconRequest::pipeline(&image, &psf, 3);
        request.clip = true;
        let out = richardson_lucy(&request).unwrap();
        assert!(out.iter().all(|&v| v <= 1.0));
    }

    #[test]
    fn zero_psf_is_rejected() {
        let image = Array3::from_elem((2, 2, 2), 1.0_f32);
        let psf = Array3::zeros((3, 3, 3));
        assert!(matches!(
            richardson_lucy(&CpuDeconRequest::pipeline(&image, &psf, 1)),
            Err(KernelError::InvalidInput(_))
        ));
    }

    #[test]
    fn gpu_is_unavailable() {
        let image = Array3::from_elem((2, 2, 2), 1.0_f32);
        let psf = delta_psf();
        let result = RichardsonLucy.gpu(GpuDeconRequest {
            image: &image,
            psf: &psf,
            background: Background::Auto,
            dz: 0.3,
            dx: 0.15,
            num_iter: 1,
        });
        assert!(matches!(result, Err(KernelError::BackendUnavailable(_))));
    }

    fn convolve(image: &Array3<f32>, kernel: &Array3<f32>, boundary: Boundary) -> Array3<f32> {
        let convolution = FftConvolution::new(dims(image), dims(kernel));
        convolution.apply(image, &convolution.spectrum(kernel), boundary)
    }

    /// Spatial-domain convolution, one voxel at a time.
    #[allow(clippy::cast_possible_wrap)]
    fn direct(image: &Array3<f32>, kernel: &Array3<f32>, boundary: Boundary) -> Array3<f32> {
        let (nz, ny, nx) = image.dim();
        let (kz, ky, kx) = kernel.dim();
        let (cz, cy, cx) = ((kz / 2) as isize, (ky / 2) as isize, (kx / 2) as isize);
        Array3::from_shape_fn((nz, ny, nx), |(z, y, x)| {
            let mut acc = 0.0_f32;
            for ((a, b, c), &k) in kernel.indexed_iter() {
                if let (Some(sz), Some(sy), Some(sx)) = (
                    shifted(z, cz - a as isize, nz, boundary),
                    shifted(y, cy - b as isize, ny, boundary),
                    shifted(x, cx - c as isize, nx, boundary),
                ) {
                    acc += k * image[[sz, sy, sx]];
                }
            }
            acc
        })
    }

    #[test]
    fn zero_boundary_drops_outside_voxels() {
        let image = Array3::from_elem((1, 1, 3), 1.0_f32);
        let kernel = Array3::from_elem((1, 1, 3), 1.0_f32);
        let out = convolve(&image, &kernel, Boundary::Zero);
        assert!((out[[0, 0, 0]] - 2.0).abs() < 1e-5);
        assert!((out[[0, 0, 1]] - 3.0).abs() < 1e-5);
        let out = convolve(&image, &kernel, Boundary::Nearest);
        assert!((out[[0, 0, 0]] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn fft_convolution_matches_the_spatial_sum() {
        let image = Array3::from_shape_fn((5, 6, 7), |(z, y, x)| {
            f32::from(u8::try_from((z * 7 + y * 3 + x * 5) % 11).unwrap())
        });
        // uneven and even extents, so the kernel center is off the middle
        let kernel = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| {
            f32::from(u8::try_from(z + 2 * y + x + 1).unwrap())
        });
        for boundary in [Boundary::Zero, Boundary::Nearest] {
            let fast = convolve(&image, &kernel, boundary);
            let slow = direct(&image, &kernel, boundary);
            for (a, b) in fast.iter().zip(slow.iter()) {
                assert!((a - b).abs() < 1e-3 * b.abs().max(1.0), "{a} vs {b}");
            }
        }
    }
}
