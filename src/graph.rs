use anyhow::{Context, Result};
use image::ImageEncoder;
use plotters::coord::Shift;
use plotters::element::Pie;
use plotters::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

use crate::chart::{ChartKind, ChartSpec, Trace};
use crate::scale::{self, AxisRange};
use crate::{OutputFormat, RenderOptions};

/// Category10 palette, assigned to traces in order.
const PALETTE: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

fn palette(idx: usize) -> RGBColor {
    PALETTE[idx % PALETTE.len()]
}

/// Render a chart specification to PNG or SVG bytes
pub fn render_chart(spec: &ChartSpec, options: &RenderOptions) -> Result<Vec<u8>> {
    debug!(chart = %spec.id, kind = ?spec.kind, "rendering chart");
    match options.format {
        OutputFormat::Png => render_png(spec, options.width, options.height),
        OutputFormat::Svg => render_svg(spec, options.width, options.height).map(String::into_bytes),
    }
}

fn render_png(spec: &ChartSpec, width: u32, height: u32) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; (width * height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        draw_spec(&root, spec)?;
        root.present().context("Failed to present drawing")?;
    }

    let mut png_bytes = Vec::new();
    {
        let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
        encoder
            .write_image(&buffer, width, height, image::ColorType::Rgb8)
            .context("Failed to encode PNG")?;
    }

    Ok(png_bytes)
}

fn render_svg(spec: &ChartSpec, width: u32, height: u32) -> Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (width, height)).into_drawing_area();
        draw_spec(&root, spec)?;
        root.present().context("Failed to present drawing")?;
    }
    Ok(svg)
}

fn draw_spec<DB>(root: &DrawingArea<DB, Shift>, spec: &ChartSpec) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE).context("Failed to fill background")?;

    match spec.kind {
        // Renderer has no map or radial layout: both fall back to bars of their values
        ChartKind::Bar | ChartKind::Histogram | ChartKind::Choropleth => draw_bars(root, spec),
        ChartKind::StackedBar => draw_stacked(root, spec, &spec.traces),
        ChartKind::Sunburst => draw_stacked(root, spec, &sunburst_layers(spec)),
        ChartKind::Line => draw_lines(root, spec),
        ChartKind::Pie => draw_pie(root, spec),
    }
}

fn category_label(labels: &[String], x: f64) -> String {
    if x < 0.0 {
        return String::new();
    }
    labels.get(x as usize).cloned().unwrap_or_default()
}

fn draw_bars<DB>(root: &DrawingArea<DB, Shift>, spec: &ChartSpec) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (labels, values) = match spec.traces.first() {
        Some(t) => (t.labels.as_slice(), t.values.as_slice()),
        None => (&[][..], &[][..]),
    };
    let y_range = spec
        .value_range
        .unwrap_or_else(|| scale::value_range(values, true));
    let num_categories = labels.len().max(1);

    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .caption(&spec.title, ("sans-serif", 20))
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..(num_categories as f64), y_range.as_range())
        .context("Failed to build chart")?;

    let formatter = |x: &f64| category_label(labels, *x);
    let mut mesh = chart.configure_mesh();
    mesh.x_labels(num_categories).x_label_formatter(&formatter);
    if let Some(x) = &spec.x_label {
        mesh.x_desc(x.as_str());
    }
    if let Some(y) = &spec.y_label {
        mesh.y_desc(y.as_str());
    }
    mesh.draw().context("Failed to draw mesh")?;

    // Histogram bins touch, category bars keep a gap
    let gap = if spec.kind == ChartKind::Histogram { 0.0 } else { 0.1 };
    let color = palette(0);

    chart
        .draw_series(values.iter().enumerate().map(|(i, &v)| {
            Rectangle::new(
                [(i as f64 + gap, 0.0), (i as f64 + 1.0 - gap, v)],
                color.filled(),
            )
        }))
        .context("Failed to draw bars")?;

    Ok(())
}

fn draw_stacked<DB>(root: &DrawingArea<DB, Shift>, spec: &ChartSpec, traces: &[Trace]) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let labels: &[String] = traces.first().map(|t| t.labels.as_slice()).unwrap_or(&[]);
    let num_categories = labels.len().max(1);

    let totals: Vec<f64> = (0..labels.len())
        .map(|i| traces.iter().map(|t| t.values.get(i).copied().unwrap_or(0.0)).sum())
        .collect();
    let y_range: AxisRange = spec
        .value_range
        .unwrap_or_else(|| scale::value_range(&totals, true));

    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .caption(&spec.title, ("sans-serif", 20))
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..(num_categories as f64), y_range.as_range())
        .context("Failed to build chart")?;

    let formatter = |x: &f64| category_label(labels, *x);
    let mut mesh = chart.configure_mesh();
    mesh.x_labels(num_categories).x_label_formatter(&formatter);
    if let Some(x) = &spec.x_label {
        mesh.x_desc(x.as_str());
    }
    if let Some(y) = &spec.y_label {
        mesh.y_desc(y.as_str());
    }
    mesh.draw().context("Failed to draw mesh")?;

    let bar_width = 0.8;
    let mut y_cumulative = vec![0.0; labels.len()];

    for (series_idx, trace) in traces.iter().enumerate() {
        let color = palette(series_idx);
        let mut rects = Vec::with_capacity(labels.len());
        for (cat_idx, base) in y_cumulative.iter_mut().enumerate() {
            let y_val = trace.values.get(cat_idx).copied().unwrap_or(0.0);
            let x_center = cat_idx as f64 + 0.5;
            rects.push(Rectangle::new(
                [
                    (x_center - bar_width / 2.0, *base),
                    (x_center + bar_width / 2.0, *base + y_val),
                ],
                color.filled(),
            ));
            *base += y_val;
        }

        chart
            .draw_series(rects)
            .context("Failed to draw bar")?
            .label(trace.name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }

    if !traces.is_empty() {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .context("Failed to draw legend")?;
    }

    Ok(())
}

/// Sunburst paths flattened to one stacked layer per inner key.
fn sunburst_layers(spec: &ChartSpec) -> Vec<Trace> {
    let Some(trace) = spec.traces.first() else {
        return Vec::new();
    };

    let outer: Vec<String> = trace
        .labels
        .iter()
        .zip(&trace.parents)
        .filter(|(_, parent)| parent.is_empty())
        .map(|(label, _)| label.clone())
        .collect();

    let mut inner: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for ((label, parent), value) in trace.labels.iter().zip(&trace.parents).zip(&trace.values) {
        if parent.is_empty() {
            continue;
        }
        let Some(idx) = outer.iter().position(|o| o == parent) else {
            continue;
        };
        let key = label
            .strip_prefix(parent.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(label);
        inner
            .entry(key.to_string())
            .or_insert_with(|| vec![0.0; outer.len()])[idx] = *value;
    }

    inner
        .into_iter()
        .map(|(name, values)| Trace::new(name, outer.clone(), values))
        .collect()
}

fn draw_lines<DB>(root: &DrawingArea<DB, Shift>, spec: &ChartSpec) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let labels: &[String] = spec.traces.first().map(|t| t.labels.as_slice()).unwrap_or(&[]);
    let num_points = labels.len().max(1);
    let all_values: Vec<f64> = spec.traces.iter().flat_map(|t| t.values.iter().copied()).collect();
    let y_range = spec
        .value_range
        .unwrap_or_else(|| scale::value_range(&all_values, false));

    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .caption(&spec.title, ("sans-serif", 20))
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5..(num_points as f64 - 0.5), y_range.as_range())
        .context("Failed to build chart")?;

    let formatter = |x: &f64| category_label(labels, x.round());
    let mut mesh = chart.configure_mesh();
    mesh.x_labels(num_points.min(12)).x_label_formatter(&formatter);
    if let Some(x) = &spec.x_label {
        mesh.x_desc(x.as_str());
    }
    if let Some(y) = &spec.y_label {
        mesh.y_desc(y.as_str());
    }
    mesh.draw().context("Failed to draw mesh")?;

    for (idx, trace) in spec.traces.iter().enumerate() {
        let color = palette(idx);
        let points: Vec<(f64, f64)> = trace
            .values
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as f64, v))
            .collect();

        chart
            .draw_series(LineSeries::new(points.clone(), color.stroke_width(2)))
            .context("Failed to draw line series")?
            .label(trace.name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));

        chart
            .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 3, color.filled())))
            .context("Failed to draw point series")?;
    }

    if spec.traces.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .context("Failed to draw legend")?;
    }

    Ok(())
}

fn draw_pie<DB>(root: &DrawingArea<DB, Shift>, spec: &ChartSpec) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let area = root
        .titled(&spec.title, ("sans-serif", 20))
        .context("Failed to draw title")?;

    let Some(trace) = spec.traces.first() else {
        return Ok(());
    };
    if trace.values.iter().sum::<f64>() <= 0.0 {
        return Ok(());
    }

    let (w, h) = area.dim_in_pixel();
    let center = ((w / 2) as i32, (h / 2) as i32);
    let radius = w.min(h) as f64 * 0.35;
    let colors: Vec<RGBColor> = (0..trace.values.len()).map(palette).collect();

    let pie = Pie::new(&center, &radius, &trace.values, &colors, &trace.labels);
    area.draw(&pie).context("Failed to draw pie")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Series;
    use crate::chart::{self, Labels};

    #[test]
    fn test_sunburst_layers() {
        let nodes = vec![
            crate::aggregate::CategoryNode {
                key: "Painting".to_string(),
                count: 3,
                children: Series::from_pairs([("Male", 2.0), ("Female", 1.0)]),
            },
            crate::aggregate::CategoryNode {
                key: "Print".to_string(),
                count: 1,
                children: Series::from_pairs([("Female", 1.0)]),
            },
        ];
        let spec = chart::sunburst_chart(&nodes, Labels::new("t"));
        let layers = sunburst_layers(&spec);
        assert_eq!(layers.len(), 2);
        let female = layers.iter().find(|t| t.name == "Female").unwrap();
        assert_eq!(female.labels, vec!["Painting", "Print"]);
        assert_eq!(female.values, vec![1.0, 1.0]);
        let male = layers.iter().find(|t| t.name == "Male").unwrap();
        assert_eq!(male.values, vec![2.0, 0.0]);
    }

    #[test]
    fn test_category_label_bounds() {
        let labels = vec!["a".to_string(), "b".to_string()];
        assert_eq!(category_label(&labels, 1.4), "b");
        assert_eq!(category_label(&labels, 5.0), "");
        assert_eq!(category_label(&labels, -0.5), "");
    }
}
