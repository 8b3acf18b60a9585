//! Trailing rolling-window statistics.
//!
//! Window `i` covers `[max(0, i − w + 1), i]` with a minimum of one
//! observation, so the opening windows are shorter than `w`. The standard
//! deviation is the sample estimate (`ddof = 1`) and is NaN for a
//! one-observation window.

/// Rolling mean and sample standard deviation, one pair per index.
pub fn rolling_mean_std(values: &[f64], window: usize) -> (Vec<f64>, Vec<f64>) {
    let w = window.max(1);
    let mut mean = Vec::with_capacity(values.len());
    let mut std = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        let start = (i + 1).saturating_sub(w);
        let win = &values[start..=i];
        let n = win.len() as f64;

        let mu = win.iter().sum::<f64>() / n;
        mean.push(mu);

        if win.len() < 2 {
            std.push(f64::NAN);
            continue;
        }
        // Two-pass variance: a constant window yields exactly zero.
        let ss: f64 = win.iter().map(|v| (v - mu) * (v - mu)).sum();
        std.push((ss / (n - 1.0)).sqrt());
    }

    (mean, std)
}
