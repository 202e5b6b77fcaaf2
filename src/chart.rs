use serde::Serialize;

use crate::aggregate::{CategoryNode, Frames, Histogram, Series, YearPoint, YearShares};
use crate::scale::{self, AxisRange};

// =============================================================================
// Chart specification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    StackedBar,
    Line,
    Histogram,
    Pie,
    Choropleth,
    Sunburst,
}

/// Axis and title text, already resolved for display.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Labels {
    pub title: String,
    pub x: Option<String>,
    pub y: Option<String>,
}

impl Labels {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            x: None,
            y: None,
        }
    }

    pub fn x(mut self, label: impl Into<String>) -> Self {
        self.x = Some(label.into());
        self
    }

    pub fn y(mut self, label: impl Into<String>) -> Self {
        self.y = Some(label.into());
        self
    }
}

/// One named series of (label, value) pairs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub name: String,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    /// Parent label of each point (sunburst path encoding)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
}

impl Trace {
    pub fn new(name: impl Into<String>, labels: Vec<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            labels,
            values,
            parents: Vec::new(),
        }
    }

    fn from_series(name: &str, series: &Series) -> Self {
        Self::new(name, series.keys(), series.values())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub name: String,
    pub traces: Vec<Trace>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorScale {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

/// Renderer-agnostic description of one chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub id: String,
    pub kind: ChartKind,
    pub title: String,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub traces: Vec<Trace>,
    /// Animation dimension; `traces` mirrors the active frame
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<Frame>,
    pub active_frame: Option<usize>,
    /// Fixed value-axis range shared by every frame
    pub value_range: Option<AxisRange>,
    pub color_scale: Option<ColorScale>,
    /// Categories with no defined value (e.g. years with a zero total)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl ChartSpec {
    fn new(kind: ChartKind, labels: Labels, traces: Vec<Trace>) -> Self {
        Self {
            id: String::new(),
            kind,
            title: labels.title,
            x_label: labels.x,
            y_label: labels.y,
            traces,
            frames: Vec::new(),
            active_frame: None,
            value_range: None,
            color_scale: None,
            missing: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Every value drawn on the value axis, across traces and frames.
    fn all_values(&self) -> Vec<f64> {
        self.traces
            .iter()
            .chain(self.frames.iter().flat_map(|f| f.traces.iter()))
            .flat_map(|t| t.values.iter().copied())
            .collect()
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn bar_chart(series: &Series, labels: Labels) -> ChartSpec {
    let name = labels.y.clone().unwrap_or_default();
    let mut spec = ChartSpec::new(ChartKind::Bar, labels, vec![Trace::from_series(&name, series)]);
    spec.value_range = Some(scale::value_range(&spec.all_values(), true));
    spec
}

/// Per-year values as a line, optionally with the running total as a second trace.
pub fn year_line_chart(points: &[YearPoint], labels: Labels, with_cumulative: bool) -> ChartSpec {
    let years: Vec<String> = points.iter().map(|p| p.year.to_string()).collect();
    let mut traces = vec![Trace::new(
        "per year",
        years.clone(),
        points.iter().map(|p| p.value).collect(),
    )];
    if with_cumulative {
        traces.push(Trace::new(
            "cumulative",
            years,
            points.iter().map(|p| p.cumulative).collect(),
        ));
    }
    line_chart(traces, labels)
}

pub fn line_chart(traces: Vec<Trace>, labels: Labels) -> ChartSpec {
    let mut spec = ChartSpec::new(ChartKind::Line, labels, traces);
    spec.value_range = Some(scale::value_range(&spec.all_values(), true));
    spec
}

pub fn histogram_chart(hist: &Histogram, labels: Labels) -> ChartSpec {
    let bins: Vec<String> = hist
        .edges
        .windows(2)
        .map(|w| format!("{:.0}-{:.0}", w[0], w[1]))
        .collect();
    let counts = hist.counts.iter().map(|&c| c as f64).collect();
    let name = labels.y.clone().unwrap_or_default();
    let mut spec = ChartSpec::new(ChartKind::Histogram, labels, vec![Trace::new(name, bins, counts)]);
    spec.value_range = Some(scale::value_range(&spec.all_values(), true));
    spec
}

pub fn pie_chart(series: &Series, labels: Labels) -> ChartSpec {
    ChartSpec::new(ChartKind::Pie, labels, vec![Trace::from_series("share", series)])
}

/// Country → value map; the color scale spans the observed values.
pub fn choropleth_chart(series: &Series, labels: Labels) -> ChartSpec {
    let mut spec = ChartSpec::new(ChartKind::Choropleth, labels, vec![Trace::from_series("countries", series)]);
    let range = scale::value_range(&series.values(), true);
    let max = series.values().into_iter().fold(0.0, f64::max);
    spec.color_scale = Some(ColorScale {
        name: "Blues".to_string(),
        min: range.min,
        max: if max > 0.0 { max } else { range.max },
    });
    spec
}

/// Two-level path chart: one point per outer key, one per (outer, inner) pair.
pub fn sunburst_chart(nodes: &[CategoryNode], labels: Labels) -> ChartSpec {
    let mut point_labels = Vec::new();
    let mut parents = Vec::new();
    let mut values = Vec::new();

    for node in nodes {
        point_labels.push(node.key.clone());
        parents.push(String::new());
        values.push(node.count as f64);
        for child in &node.children.entries {
            point_labels.push(format!("{}/{}", node.key, child.key));
            parents.push(node.key.clone());
            values.push(child.value);
        }
    }

    let mut trace = Trace::new("paths", point_labels, values);
    trace.parents = parents;
    ChartSpec::new(ChartKind::Sunburst, labels, vec![trace])
}

/// Stacked percentage bars: one trace per category, one bar per year.
pub fn stacked_share_chart(rows: &[YearShares], labels: Labels) -> ChartSpec {
    let mut categories: Vec<String> = rows
        .iter()
        .filter_map(|r| r.shares.as_ref())
        .flat_map(|s| s.keys())
        .collect();
    categories.sort();
    categories.dedup();

    let present: Vec<(&YearShares, &Series)> = rows
        .iter()
        .filter_map(|r| r.shares.as_ref().map(|s| (r, s)))
        .collect();
    let years: Vec<String> = present.iter().map(|(r, _)| r.year.to_string()).collect();

    let traces = categories
        .iter()
        .map(|cat| {
            let values = present.iter().map(|(_, s)| s.get(cat).unwrap_or(0.0)).collect();
            Trace::new(cat.clone(), years.clone(), values)
        })
        .collect();

    let mut spec = ChartSpec::new(ChartKind::StackedBar, labels, traces);
    spec.value_range = Some(AxisRange { min: 0.0, max: 100.0 });
    spec.missing = rows
        .iter()
        .filter(|r| r.shares.is_none())
        .map(|r| r.year.to_string())
        .collect();
    spec
}

/// Animated bar chart over the year dimension of `frames`.
///
/// The value range is computed once over every frame so frames stay comparable.
pub fn animated_bar_chart(frames: &Frames, use_log: bool, labels: Labels, active_year: Option<i32>) -> ChartSpec {
    let name = labels.y.clone().unwrap_or_default();
    let chart_frames: Vec<Frame> = frames
        .years
        .iter()
        .map(|&year| {
            let values = frames
                .frame(year)
                .map(|c| if use_log { c.log_count } else { c.count as f64 })
                .collect();
            Frame {
                name: year.to_string(),
                traces: vec![Trace::new(name.clone(), frames.categories.clone(), values)],
            }
        })
        .collect();

    let active = active_year
        .and_then(|y| frames.years.iter().position(|&fy| fy == y))
        .or(if chart_frames.is_empty() { None } else { Some(0) });

    let traces = active
        .map(|i| chart_frames[i].traces.clone())
        .unwrap_or_default();

    let range = scale::shared_range(
        chart_frames
            .iter()
            .flat_map(|f| f.traces.iter())
            .map(|t| t.values.as_slice()),
        true,
    );

    let mut spec = ChartSpec::new(ChartKind::Bar, labels, traces);
    spec.frames = chart_frames;
    spec.active_frame = active;
    spec.value_range = Some(range);
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{FrameCell, SeriesEntry};

    fn frames() -> Frames {
        let cell = |year, category: &str, count: usize| FrameCell {
            year,
            category: category.to_string(),
            count,
            log_count: crate::aggregate::log_or_zero(count),
        };
        Frames {
            years: vec![2000, 2001],
            categories: vec!["A".to_string(), "B".to_string()],
            cells: vec![cell(2000, "A", 1), cell(2000, "B", 0), cell(2001, "A", 20), cell(2001, "B", 3)],
        }
    }

    #[test]
    fn test_bar_chart_labels() {
        let series = Series::from_pairs([("Novel", 2.0), ("Poetry", 1.0)]);
        let spec = bar_chart(&series, Labels::new("Books by genre").x("Genre").y("Number of books"));
        assert_eq!(spec.kind, ChartKind::Bar);
        assert_eq!(spec.title, "Books by genre");
        assert_eq!(spec.x_label.as_deref(), Some("Genre"));
        assert_eq!(spec.traces[0].labels, vec!["Novel", "Poetry"]);
        assert_eq!(spec.value_range.unwrap().min, 0.0);
    }

    #[test]
    fn test_year_line_with_cumulative() {
        let points = vec![
            YearPoint { year: 2000, value: 2.0, cumulative: 2.0 },
            YearPoint { year: 2001, value: 1.0, cumulative: 3.0 },
        ];
        let spec = year_line_chart(&points, Labels::new("t"), true);
        assert_eq!(spec.traces.len(), 2);
        assert_eq!(spec.traces[1].values, vec![2.0, 3.0]);
        assert!(spec.value_range.unwrap().max >= 3.0);
    }

    #[test]
    fn test_animated_range_is_shared() {
        let spec = animated_bar_chart(&frames(), false, Labels::new("t"), Some(2000));
        assert_eq!(spec.frames.len(), 2);
        assert_eq!(spec.active_frame, Some(0));
        // The active frame peaks at 1 but the axis covers the 2001 frame's 20
        assert!(spec.value_range.unwrap().max >= 20.0);
        assert_eq!(spec.traces[0].values, vec![1.0, 0.0]);

        let later = animated_bar_chart(&frames(), false, Labels::new("t"), Some(2001));
        assert_eq!(later.value_range, spec.value_range);
    }

    #[test]
    fn test_animated_log_values() {
        let spec = animated_bar_chart(&frames(), true, Labels::new("t"), None);
        assert_eq!(spec.active_frame, Some(0));
        assert_eq!(spec.frames[0].traces[0].values, vec![0.0, 0.0]);
        assert!((spec.frames[1].traces[0].values[0] - 20f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_stacked_share_flags_missing() {
        let rows = vec![
            YearShares {
                year: 1990,
                shares: Some(Series::from_pairs([("Female", 25.0), ("Male", 75.0)])),
            },
            YearShares { year: 1991, shares: None },
        ];
        let spec = stacked_share_chart(&rows, Labels::new("t"));
        assert_eq!(spec.traces.len(), 2);
        assert_eq!(spec.traces[0].labels, vec!["1990"]);
        assert_eq!(spec.missing, vec!["1991"]);
    }

    #[test]
    fn test_sunburst_paths() {
        let nodes = vec![CategoryNode {
            key: "Painting".to_string(),
            count: 3,
            children: Series {
                entries: vec![
                    SeriesEntry { key: "Male".to_string(), value: 2.0 },
                    SeriesEntry { key: "Female".to_string(), value: 1.0 },
                ],
            },
        }];
        let spec = sunburst_chart(&nodes, Labels::new("t"));
        let trace = &spec.traces[0];
        assert_eq!(trace.labels, vec!["Painting", "Painting/Male", "Painting/Female"]);
        assert_eq!(trace.parents, vec!["", "Painting", "Painting"]);
    }

    #[test]
    fn test_histogram_chart_bins() {
        let hist = Histogram {
            edges: vec![0.0, 50.0, 100.0],
            counts: vec![3, 1],
        };
        let spec = histogram_chart(&hist, Labels::new("Pages").y("Number of books"));
        assert_eq!(spec.traces[0].labels, vec!["0-50", "50-100"]);
        assert_eq!(spec.traces[0].values, vec![3.0, 1.0]);
    }

    #[test]
    fn test_spec_serializes() {
        let spec = pie_chart(&Series::from_pairs([("UK", 100.0)]), Labels::new("Share")).with_id("share");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "pie");
        assert_eq!(json["id"], "share");
        assert!(json.get("frames").is_none());
    }
}
