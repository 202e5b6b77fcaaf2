// Value-axis ranges for chart specifications

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub fn as_range(&self) -> std::ops::Range<f64> {
        self.min..self.max
    }
}

#[derive(Debug, Clone, Default)]
struct MinMax {
    min: f64,
    max: f64,
}

fn min_max<'a, I>(values: I) -> Option<MinMax>
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut mm: Option<MinMax> = None;
    for &v in values {
        if !v.is_finite() {
            continue;
        }
        mm = Some(match mm {
            None => MinMax { min: v, max: v },
            Some(m) => MinMax {
                min: m.min.min(v),
                max: m.max.max(v),
            },
        });
    }
    mm
}

fn merge_ranges<I>(iter: I) -> MinMax
where
    I: Iterator<Item = MinMax>,
{
    let mut global = MinMax {
        min: f64::INFINITY,
        max: f64::NEG_INFINITY,
    };

    for local in iter {
        if local.min < global.min {
            global.min = local.min;
        }
        if local.max > global.max {
            global.max = local.max;
        }
    }

    // Handle empty case
    if global.min == f64::INFINITY {
        global.min = 0.0;
        global.max = 1.0;
    }

    global
}

fn pad_range(min: f64, max: f64) -> (f64, f64) {
    if min == max {
        (min - 1.0, max + 1.0)
    } else {
        let padding = (max - min) * 0.05;
        (min - padding, max + padding)
    }
}

/// Padded range of one set of values. Bar-like charts always include 0.
pub fn value_range(values: &[f64], include_zero: bool) -> AxisRange {
    shared_range(std::iter::once(values), include_zero)
}

/// One padded range across every frame of an animated chart.
pub fn shared_range<'a, I>(frames: I, include_zero: bool) -> AxisRange
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut mm = merge_ranges(frames.into_iter().filter_map(|f| min_max(f)));

    if include_zero {
        if mm.min > 0.0 {
            mm.min = 0.0;
        }
        if mm.max < 0.0 {
            mm.max = 0.0;
        }
    }

    let (mut min, max) = pad_range(mm.min, mm.max);
    // Counts never go negative, so do not pad below a zero baseline
    if include_zero && mm.min == 0.0 {
        min = 0.0;
    }
    AxisRange { min, max }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_continuous() {
        let r = value_range(&[10.0, 20.0], false);
        assert!(r.min < 10.0);
        assert!(r.max > 20.0);
    }

    #[test]
    fn test_range_single_point() {
        let r = value_range(&[5.0], false);
        assert_eq!(r.min, 4.0);
        assert_eq!(r.max, 6.0);
    }

    #[test]
    fn test_range_includes_zero_for_bars() {
        let r = value_range(&[3.0, 8.0], true);
        assert_eq!(r.min, 0.0);
        assert!(r.max > 8.0);
    }

    #[test]
    fn test_range_empty() {
        let r = value_range(&[], false);
        assert!(r.min < 0.0 || r.min == 0.0);
        assert!(r.max >= 1.0);
    }

    #[test]
    fn test_shared_range_covers_all_frames() {
        let a = [1.0, 2.0];
        let b = [0.5, 9.0];
        let c: [f64; 0] = [];
        let r = shared_range([&a[..], &b[..], &c[..]], true);
        assert_eq!(r.min, 0.0);
        assert!(r.max >= 9.0);

        let only_b = value_range(&b, true);
        assert_eq!(r, only_b);
    }
}
