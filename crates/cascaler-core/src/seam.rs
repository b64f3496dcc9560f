// crates/cascaler-core/src/seam.rs
//
// Minimum-energy seam removal. Dual-gradient energy, one DP pass per seam,
// vertical seams only; horizontal shrink runs the same code on a transposed
// image. `delta_x` bounds the per-row lateral step (0 = straight columns,
// 1 = ±1 px), `rigidity` penalizes lateral movement.

use image::RgbImage;

/// Upper bound of the dual-gradient energy: 255² per channel, two axes.
const MAX_ENERGY: f64 = (255.0 * 255.0) * 3.0 * 2.0;

/// Shrink `image` to (target_w, target_h) by repeated seam removal. Targets
/// must not exceed the source dimensions.
pub fn shrink(image: &RgbImage, target_w: u32, target_h: u32, delta_x: f64, rigidity: f64) -> RgbImage {
    debug_assert!(target_w <= image.width() && target_h <= image.height());
    let step = if delta_x < 0.5 { 0 } else { 1 };

    let mut img = image.clone();
    while img.width() > target_w.max(1) {
        img = remove_one_seam(&img, step, rigidity);
    }
    if img.height() > target_h.max(1) {
        let mut t = transpose(&img);
        while t.width() > target_h.max(1) {
            t = remove_one_seam(&t, step, rigidity);
        }
        img = transpose(&t);
    }
    img
}

fn transpose(img: &RgbImage) -> RgbImage {
    RgbImage::from_fn(img.height(), img.width(), |x, y| *img.get_pixel(y, x))
}

/// Dual-gradient energy, row-major, normalized to 0..1. Border pixels wrap
/// to their nearest interior neighbor so edges aren't artificially cheap.
fn energy_map(img: &RgbImage) -> Vec<f64> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let mut energy = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            let left = img.get_pixel(x.saturating_sub(1) as u32, y as u32);
            let right = img.get_pixel((x + 1).min(w - 1) as u32, y as u32);
            let up = img.get_pixel(x as u32, y.saturating_sub(1) as u32);
            let down = img.get_pixel(x as u32, (y + 1).min(h - 1) as u32);
            let mut e = 0.0;
            for c in 0..3 {
                let dx = right[c] as f64 - left[c] as f64;
                let dy = down[c] as f64 - up[c] as f64;
                e += dx * dx + dy * dy;
            }
            energy[y * w + x] = e / MAX_ENERGY;
        }
    }
    energy
}

/// One DP pass: the cheapest top-to-bottom path with per-row steps in
/// -step..=step, each lateral move costing an extra rigidity penalty.
/// Returns the seam as one column index per row.
fn find_seam(energy: &[f64], w: usize, h: usize, step: i64, rigidity: f64) -> Vec<usize> {
    let lateral_penalty = rigidity * 0.1;
    let mut cost = energy[..w].to_vec();
    // Backpointer per cell: which column of the previous row the path used.
    let mut from = vec![0u32; w * h];

    for y in 1..h {
        let mut next = vec![f64::INFINITY; w];
        for x in 0..w {
            let lo = (x as i64 - step).max(0) as usize;
            let hi = ((x as i64 + step) as usize).min(w - 1);
            for prev in lo..=hi {
                let move_cost = (prev as i64 - x as i64).abs() as f64 * lateral_penalty;
                let c = cost[prev] + energy[y * w + x] + move_cost;
                if c < next[x] {
                    next[x] = c;
                    from[y * w + x] = prev as u32;
                }
            }
        }
        cost = next;
    }

    let mut x = cost
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut seam = vec![0; h];
    for y in (0..h).rev() {
        seam[y] = x;
        x = from[y * w + x] as usize;
    }
    seam
}

fn remove_one_seam(img: &RgbImage, step: i64, rigidity: f64) -> RgbImage {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let energy = energy_map(img);
    let seam = find_seam(&energy, w, h, step, rigidity);

    let src = img.as_raw();
    let mut out = Vec::with_capacity((w - 1) * h * 3);
    for y in 0..h {
        let row = &src[y * w * 3..(y + 1) * w * 3];
        let cut = seam[y] * 3;
        out.extend_from_slice(&row[..cut]);
        out.extend_from_slice(&row[cut + 3..]);
    }
    RgbImage::from_raw((w - 1) as u32, h as u32, out).expect("seam removal buffer size")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn shrink_reaches_exact_dimensions() {
        let img = gradient(24, 18);
        let out = shrink(&img, 12, 9, 1.0, 0.0);
        assert_eq!(out.dimensions(), (12, 9));
    }

    #[test]
    fn zero_delta_removes_whole_columns() {
        // With no lateral freedom the seam is a straight column, so a flat
        // column of a distinct color disappears as a unit.
        let mut img = RgbImage::from_pixel(8, 6, image::Rgb([200, 200, 200]));
        for y in 0..6 {
            img.put_pixel(3, y, image::Rgb([0, 0, 0]));
        }
        let out = shrink(&img, 7, 6, 0.0, 0.0);
        assert_eq!(out.dimensions(), (7, 6));
        // The low-contrast interior was carved, never the high-contrast edge
        // columns next to the black stripe.
        assert!(out.pixels().any(|p| p[0] == 0));
    }

    #[test]
    fn seam_is_connected_within_step() {
        let img = gradient(30, 20);
        let energy = energy_map(&img);
        let seam = find_seam(&energy, 30, 20, 1, 0.0);
        assert_eq!(seam.len(), 20);
        for pair in seam.windows(2) {
            assert!((pair[0] as i64 - pair[1] as i64).abs() <= 1);
        }
    }

    #[test]
    fn transpose_round_trips() {
        let img = gradient(9, 4);
        assert_eq!(transpose(&transpose(&img)).as_raw(), img.as_raw());
    }

    #[test]
    fn uniform_image_energy_is_zero() {
        let img = RgbImage::from_pixel(5, 5, image::Rgb([42, 42, 42]));
        assert!(energy_map(&img).iter().all(|&e| e == 0.0));
    }
}
