//! Statistical models behind the forecasting stage.
//!
//! Both models work on a daily series; the stage decides where to sample
//! them and how to scale to a month.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub point: f64,
    pub low: f64,
    pub high: f64,
}

impl Projection {
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            point: self.point * factor,
            low: self.low * factor,
            high: self.high * factor,
        }
    }

    /// Usage cannot be negative. Clamping is monotone so ordering survives.
    pub fn clamped_non_negative(self) -> Self {
        Self {
            point: self.point.max(0.0),
            low: self.low.max(0.0),
            high: self.high.max(0.0),
        }
    }

    pub fn rounded(self) -> Self {
        let r = |v: f64| (v * 100.0).round() / 100.0;
        Self {
            point: r(self.point),
            low: r(self.low),
            high: r(self.high),
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.point.is_finite()
            && self.low.is_finite()
            && self.high.is_finite()
            && self.low <= self.point
            && self.point <= self.high
    }
}

/// Ordinary least-squares line through (x, y) points.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearTrend {
    pub slope: f64,
    pub intercept: f64,
    n: f64,
    mean_x: f64,
    sxx: f64,
    residual_se: f64,
}

impl LinearTrend {
    /// None when fewer than three points or all x are equal.
    pub fn fit(points: &[(f64, f64)]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
        let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
        if sxx == 0.0 {
            return None;
        }
        let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;
        let ssr: f64 = points
            .iter()
            .map(|p| (p.1 - (intercept + slope * p.0)).powi(2))
            .sum();
        let residual_se = (ssr.max(0.0) / (n - 2.0)).sqrt();
        Some(Self {
            slope,
            intercept,
            n,
            mean_x,
            sxx,
            residual_se,
        })
    }

    /// Prediction at `x` with a band of ±z standard errors, widened by the
    /// leverage of `x` relative to the fitted range.
    pub fn project(&self, x: f64, z: f64) -> Projection {
        let point = self.intercept + self.slope * x;
        let leverage = 1.0 + 1.0 / self.n + (x - self.mean_x).powi(2) / self.sxx;
        let half_width = z * self.residual_se * leverage.sqrt();
        Projection {
            point,
            low: point - half_width,
            high: point + half_width,
        }
    }
}

/// Single exponential smoothing with the last local trend carried forward.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedLevel {
    pub level: f64,
    pub trend: f64,
    std_dev: f64,
}

impl SmoothedLevel {
    /// None for fewer than two observations.
    pub fn fit(series: &[f64], alpha: f64) -> Option<Self> {
        if series.len() < 2 {
            return None;
        }
        let mut previous = series[0];
        let mut level = series[0];
        for &value in &series[1..] {
            previous = level;
            level = alpha * value + (1.0 - alpha) * level;
        }
        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            level,
            trend: level - previous,
            std_dev: variance.sqrt(),
        })
    }

    /// Projection `steps` observations past the last one; band from the
    /// historical standard deviation.
    pub fn project(&self, steps: f64, z: f64) -> Projection {
        let point = self.level + self.trend * steps;
        let half_width = z * self.std_dev;
        Projection {
            point,
            low: point - half_width,
            high: point + half_width,
        }
    }
}

/// Weighted point estimate with the wider of the contributing bands.
pub fn ensemble(
    linear: Projection,
    smoothing: Projection,
    linear_weight: f64,
    smoothing_weight: f64,
) -> Projection {
    let point = linear_weight * linear.point + smoothing_weight * smoothing.point;
    let contributing: Vec<Projection> = [(linear_weight, linear), (smoothing_weight, smoothing)]
        .into_iter()
        .filter(|(w, _)| *w > 0.0)
        .map(|(_, p)| p)
        .collect();
    let low = contributing.iter().map(|p| p.low).fold(f64::INFINITY, f64::min);
    let high = contributing.iter().map(|p| p.high).fold(f64::NEG_INFINITY, f64::max);
    Projection { point, low, high }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_line_has_zero_width_band() {
        let points: Vec<(f64, f64)> = (0..30).map(|x| (x as f64, 10.0 + 2.0 * x as f64)).collect();
        let fit = LinearTrend::fit(&points).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 10.0).abs() < 1e-9);
        let p = fit.project(40.0, 1.96);
        assert!((p.point - 90.0).abs() < 1e-9);
        assert!((p.high - p.low).abs() < 1e-9);
    }

    #[test]
    fn band_widens_away_from_the_mean() {
        let points: Vec<(f64, f64)> = (0..30)
            .map(|x| (x as f64, 50.0 + if x % 2 == 0 { 3.0 } else { -3.0 }))
            .collect();
        let fit = LinearTrend::fit(&points).unwrap();
        let near = fit.project(15.0, 1.96);
        let far = fit.project(200.0, 1.96);
        assert!(far.high - far.low > near.high - near.low);
    }

    #[test]
    fn degenerate_inputs_do_not_fit() {
        assert!(LinearTrend::fit(&[(1.0, 1.0), (2.0, 2.0)]).is_none());
        assert!(LinearTrend::fit(&[(1.0, 1.0), (1.0, 2.0), (1.0, 3.0)]).is_none());
        assert!(SmoothedLevel::fit(&[4.0], 0.3).is_none());
    }

    #[test]
    fn smoothing_follows_level_and_trend() {
        let s = SmoothedLevel::fit(&[10.0, 10.0, 10.0, 10.0], 0.3).unwrap();
        assert!((s.level - 10.0).abs() < 1e-9);
        assert!(s.trend.abs() < 1e-9);
        let p = s.project(30.0, 1.96);
        assert!((p.point - 10.0).abs() < 1e-6);
        assert_eq!(p.low, p.point);

        let s = SmoothedLevel::fit(&[0.0, 10.0], 0.3).unwrap();
        assert!((s.level - 3.0).abs() < 1e-12);
        assert!((s.trend - 3.0).abs() < 1e-12);
    }

    #[test]
    fn ensemble_takes_wider_bounds() {
        let lin = Projection { point: 100.0, low: 90.0, high: 110.0 };
        let exp = Projection { point: 80.0, low: 60.0, high: 100.0 };
        let e = ensemble(lin, exp, 0.6, 0.4);
        assert!((e.point - 92.0).abs() < 1e-9);
        assert_eq!(e.low, 60.0);
        assert_eq!(e.high, 110.0);
        assert!(e.is_ordered());

        let only_linear = ensemble(lin, exp, 1.0, 0.0);
        assert_eq!(only_linear, lin);
    }

    #[test]
    fn clamping_and_rounding_keep_order() {
        let p = Projection { point: -1.234, low: -5.0, high: 2.346 }
            .clamped_non_negative()
            .rounded();
        assert_eq!(p, Projection { point: 0.0, low: 0.0, high: 2.35 });
        assert!(p.is_ordered());
    }
}
