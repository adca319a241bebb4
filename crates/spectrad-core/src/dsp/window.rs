pub fn hann_window(size: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; size];
    let denom = size as f32;
    for (i, v) in out.iter_mut().enumerate() {
        *v = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * (i as f32) / denom).cos());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_window_halves_sum_to_one() {
        // With 50% overlap the two window halves must tile: w[i] + w[i + N/2] = 1.
        let n = 1024;
        let w = hann_window(n);
        for i in 0..n / 2 {
            let s = w[i] + w[i + n / 2];
            assert!((s - 1.0).abs() < 1e-5, "w[{i}] + w[{i}+N/2] = {s}");
        }
    }
}
