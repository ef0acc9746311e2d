use image::{ImageBuffer, Luma, Primitive};

/// Bilinear sample of a single channel image at sub-pixel (x, y).
///
/// Returns `None` outside `[0, w-1] × [0, h-1]`.
#[inline]
pub fn bilinear<T>(image: &ImageBuffer<Luma<T>, Vec<T>>, x: f64, y: f64) -> Option<f64>
where
    T: Primitive + Into<f64>,
{
    let (w, h) = image.dimensions();
    if !(x >= 0.0 && y >= 0.0 && x <= (w - 1) as f64 && y <= (h - 1) as f64) {
        return None;
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (ax, ay) = (x - x0 as f64, y - y0 as f64);

    let at = |u, v| -> f64 { image.get_pixel(u, v)[0].into() };
    let top = at(x0, y0) * (1.0 - ax) + at(x1, y0) * ax;
    let bottom = at(x0, y1) * (1.0 - ax) + at(x1, y1) * ax;
    Some(top * (1.0 - ay) + bottom * ay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::GrayImage;

    #[test]
    fn exact_on_pixel_centres() {
        let image = GrayImage::from_fn(4, 4, |x, y| Luma([(10 * x + y) as u8]));
        assert_relative_eq!(bilinear(&image, 2.0, 3.0).unwrap(), 23.0);
        assert_relative_eq!(bilinear(&image, 3.0, 3.0).unwrap(), 33.0);
    }

    #[test]
    fn linear_between_pixels() {
        let image = GrayImage::from_fn(4, 4, |x, y| Luma([(10 * x + y) as u8]));
        assert_relative_eq!(bilinear(&image, 1.5, 0.25).unwrap(), 15.25, epsilon = 1e-12);
    }

    #[test]
    fn outside_is_none() {
        let image = GrayImage::new(4, 4);
        assert!(bilinear(&image, -0.01, 1.0).is_none());
        assert!(bilinear(&image, 1.0, 3.01).is_none());
        assert!(bilinear(&image, f64::NAN, 1.0).is_none());
    }
}
