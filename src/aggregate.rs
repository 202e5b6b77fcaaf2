use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::str::FromStr;
use tracing::debug;

use crate::data::{Field, Record, RecordTable};
use crate::error::{AggregateError, AggregateResult, ParameterError};

/// Key of the synthetic bucket produced by [`group_small_buckets`].
pub const OTHER: &str = "Other";

/// Upper bound for the histogram slider.
pub const MAX_BINS: usize = 200;

// =============================================================================
// Series types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesEntry {
    pub key: String,
    pub value: f64,
}

/// Ordered key → value mapping with unique keys.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Series {
    pub entries: Vec<SeriesEntry>,
}

impl Series {
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(key, value)| SeriesEntry { key: key.into(), value })
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.iter().find(|e| e.key == key).map(|e| e.value)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.value).collect()
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.value).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Display order for category counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Descending count, ties by key
    #[default]
    CountDesc,
    Alphabetical,
    /// Numeric keys compared as numbers (years, page counts)
    Chronological,
}

/// Statistic of a count series used as the "Other" cut-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Threshold {
    #[default]
    Mean,
    Median,
}

impl Threshold {
    pub fn of(self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Threshold::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Threshold::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                percentile(&sorted, 0.5)
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Threshold::Mean => "mean",
            Threshold::Median => "median",
        }
    }
}

impl FromStr for Threshold {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Threshold::Mean),
            "median" => Ok(Threshold::Median),
            other => Err(ParameterError::UnknownOption(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YearPoint {
    pub year: i32,
    pub value: f64,
    pub cumulative: f64,
}

/// What is counted per year by [`cumulative_by_year`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearMetric {
    Rows,
    /// Distinct values of a categorical field within each year
    DistinctPerYear(Field),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameCell {
    pub year: i32,
    pub category: String,
    pub count: usize,
    /// `ln(count)`, or 0.0 when the cell is empty
    pub log_count: f64,
}

/// Year × category cross-product backing an animated chart.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Frames {
    pub years: Vec<i32>,
    pub categories: Vec<String>,
    /// Year-major, categories in `categories` order
    pub cells: Vec<FrameCell>,
}

impl Frames {
    pub fn frame(&self, year: i32) -> impl Iterator<Item = &FrameCell> + '_ {
        self.cells.iter().filter(move |c| c.year == year)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearShares {
    pub year: i32,
    /// Percent per category; `None` when the year's total is zero
    pub shares: Option<Series>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDistinct {
    pub year: i32,
    pub new: usize,
    pub cumulative: usize,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Histogram {
    /// `counts.len() + 1` equal-width edges
    pub edges: Vec<f64>,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
    }

    pub fn width(&self) -> f64 {
        match self.edges.as_slice() {
            [a, b, ..] => b - a,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryNode {
    pub key: String,
    pub count: usize,
    pub children: Series,
}

// =============================================================================
// Field guards
// =============================================================================

fn require(table: &RecordTable, field: Field) -> AggregateResult<()> {
    if table.has(field) {
        Ok(())
    } else {
        Err(AggregateError::MissingField(field))
    }
}

fn require_categorical(table: &RecordTable, field: Field) -> AggregateResult<()> {
    if !field.is_categorical() {
        return Err(AggregateError::NotCategorical(field));
    }
    require(table, field)
}

fn require_numeric(table: &RecordTable, field: Field) -> AggregateResult<()> {
    if !field.is_numeric() {
        return Err(AggregateError::NotNumeric(field));
    }
    require(table, field)
}

// =============================================================================
// Category counts
// =============================================================================

/// Count rows per distinct non-empty value of `field`.
pub fn category_count(table: &RecordTable, field: Field, order: Order) -> AggregateResult<Series> {
    require_categorical(table, field)?;
    Ok(count_rows(table.records().iter(), field, order))
}

/// Category count restricted to rows acquired in `[start, end]` inclusive.
pub fn category_count_in_range(
    table: &RecordTable,
    field: Field,
    start: i32,
    end: i32,
    order: Order,
) -> AggregateResult<Series> {
    if start > end {
        return Err(ParameterError::InvertedRange { start, end }.into());
    }
    require_categorical(table, field)?;
    require(table, Field::DateAcquired)?;
    Ok(count_rows(table.in_years(start, end), field, order))
}

/// Category count over the rows whose `within` field equals `value`.
pub fn category_count_within(
    table: &RecordTable,
    field: Field,
    within: Field,
    value: &str,
    order: Order,
) -> AggregateResult<Series> {
    require_categorical(table, field)?;
    require_categorical(table, within)?;
    let rows = table.records().iter().filter(|r| r.text(within) == Some(value));
    Ok(count_rows(rows, field, order))
}

fn count_rows<'a>(rows: impl Iterator<Item = &'a Record>, field: Field, order: Order) -> Series {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        if let Some(value) = row.text(field) {
            *counts.entry(value).or_default() += 1;
        }
    }

    let mut entries: Vec<SeriesEntry> = counts
        .into_iter()
        .map(|(key, n)| SeriesEntry {
            key: key.to_string(),
            value: n as f64,
        })
        .collect();
    sort_entries(&mut entries, order);
    Series { entries }
}

fn sort_entries(entries: &mut [SeriesEntry], order: Order) {
    match order {
        Order::CountDesc => entries.sort_by(|a, b| {
            b.value
                .partial_cmp(&a.value)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        }),
        Order::Alphabetical => entries.sort_by(|a, b| a.key.cmp(&b.key)),
        Order::Chronological => {
            let all_numeric = entries.iter().all(|e| e.key.parse::<f64>().is_ok());
            if all_numeric {
                entries.sort_by(|a, b| {
                    let fa = a.key.parse::<f64>().unwrap_or(0.0);
                    let fb = b.key.parse::<f64>().unwrap_or(0.0);
                    fa.partial_cmp(&fb).unwrap_or(Ordering::Equal)
                });
            } else {
                entries.sort_by(|a, b| a.key.cmp(&b.key));
            }
        }
    }
}

// =============================================================================
// Small-bucket grouping
// =============================================================================

/// Fold every entry at or below the series' mean/median into one `Other` bucket.
pub fn group_small_buckets(series: &Series, threshold: Threshold) -> Series {
    let cut = threshold.of(&series.values());
    group_below(series, cut)
}

/// Keep entries with value > `cut`, sum the rest into a trailing `Other`.
///
/// `Other` is present iff at least one entry was grouped. An input key that
/// is already `Other` merges into the synthetic bucket.
pub fn group_below(series: &Series, cut: f64) -> Series {
    let (kept, grouped): (Vec<&SeriesEntry>, Vec<&SeriesEntry>) =
        series.entries.iter().partition(|e| e.value > cut);

    if grouped.is_empty() {
        return series.clone();
    }

    let mut other: f64 = grouped.iter().map(|e| e.value).sum();
    let mut entries = Vec::with_capacity(kept.len() + 1);
    for entry in kept {
        if entry.key == OTHER {
            other += entry.value;
        } else {
            entries.push(entry.clone());
        }
    }
    entries.push(SeriesEntry {
        key: OTHER.to_string(),
        value: other,
    });

    Series { entries }
}

/// Each entry as a percentage of the series total; empty when the total is zero.
pub fn share(series: &Series) -> Series {
    let total = series.total();
    if total == 0.0 {
        return Series::default();
    }
    Series {
        entries: series
            .entries
            .iter()
            .map(|e| SeriesEntry {
                key: e.key.clone(),
                value: e.value / total * 100.0,
            })
            .collect(),
    }
}

// =============================================================================
// Year aggregates
// =============================================================================

/// Rows per acquisition year, ascending, with running total.
pub fn counts_by_year(table: &RecordTable) -> AggregateResult<Vec<YearPoint>> {
    cumulative_by_year(table, YearMetric::Rows)
}

pub fn cumulative_by_year(table: &RecordTable, metric: YearMetric) -> AggregateResult<Vec<YearPoint>> {
    require(table, Field::DateAcquired)?;

    let per_year: BTreeMap<i32, usize> = match metric {
        YearMetric::Rows => {
            let mut counts = BTreeMap::new();
            for year in table.records().iter().filter_map(|r| r.year) {
                *counts.entry(year).or_default() += 1;
            }
            counts
        }
        YearMetric::DistinctPerYear(field) => {
            require_categorical(table, field)?;
            let mut sets: BTreeMap<i32, HashSet<&str>> = BTreeMap::new();
            for row in table.records() {
                if let Some(year) = row.year {
                    let set = sets.entry(year).or_default();
                    if let Some(value) = row.text(field) {
                        set.insert(value);
                    }
                }
            }
            sets.into_iter().map(|(y, s)| (y, s.len())).collect()
        }
    };

    let mut running = 0.0;
    let points = per_year
        .into_iter()
        .map(|(year, n)| {
            running += n as f64;
            YearPoint {
                year,
                value: n as f64,
                cumulative: running,
            }
        })
        .collect();
    Ok(points)
}

/// Per-year counts for each selected value of `field`, aligned on the table's years.
pub fn yearly_counts_for(
    table: &RecordTable,
    field: Field,
    selected: &[String],
) -> AggregateResult<Vec<(String, Vec<YearPoint>)>> {
    if selected.is_empty() {
        return Err(ParameterError::EmptySelection.into());
    }
    require_categorical(table, field)?;
    require(table, Field::DateAcquired)?;

    let years: BTreeSet<i32> = table.records().iter().filter_map(|r| r.year).collect();
    let mut counts: HashMap<(&str, i32), usize> = HashMap::new();
    for row in table.records() {
        if let (Some(value), Some(year)) = (row.text(field), row.year) {
            *counts.entry((value, year)).or_default() += 1;
        }
    }

    let traces = selected
        .iter()
        .map(|value| {
            let mut running = 0.0;
            let points = years
                .iter()
                .map(|&year| {
                    let n = counts.get(&(value.as_str(), year)).copied().unwrap_or(0) as f64;
                    running += n;
                    YearPoint {
                        year,
                        value: n,
                        cumulative: running,
                    }
                })
                .collect();
            (value.clone(), points)
        })
        .collect();
    Ok(traces)
}

/// Explicit year × category cross-product with raw and log counts.
pub fn log_frames(table: &RecordTable, field: Field) -> AggregateResult<Frames> {
    require_categorical(table, field)?;
    require(table, Field::DateAcquired)?;

    let mut counts: HashMap<(i32, &str), usize> = HashMap::new();
    let mut years = BTreeSet::new();
    let mut categories = BTreeSet::new();
    for row in table.records() {
        if let (Some(year), Some(value)) = (row.year, row.text(field)) {
            years.insert(year);
            categories.insert(value);
            *counts.entry((year, value)).or_default() += 1;
        }
    }

    let years: Vec<i32> = years.into_iter().collect();
    let categories: Vec<String> = categories.into_iter().map(str::to_string).collect();

    let mut cells = Vec::with_capacity(years.len() * categories.len());
    for &year in &years {
        for category in &categories {
            cells.push((year, category.clone(), counts.get(&(year, category.as_str())).copied().unwrap_or(0)));
        }
    }
    let cells = cells
        .into_iter()
        .map(|(year, category, count)| FrameCell {
            year,
            category,
            count,
            log_count: log_or_zero(count),
        })
        .collect();

    debug!(years = years.len(), categories = categories.len(), "built animation frames");
    Ok(Frames {
        years,
        categories,
        cells,
    })
}

/// Natural log with a zero floor for empty cells.
pub fn log_or_zero(count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        (count as f64).ln()
    }
}

/// Percentage of non-empty creators per gender for every acquisition year.
pub fn gender_share_by_year(table: &RecordTable) -> AggregateResult<Vec<YearShares>> {
    share_by_year(table, Field::Gender, Field::Creator)
}

/// Pivot (year × `category`) counting non-empty `counted` values, each year
/// normalized to 100.
pub fn share_by_year(table: &RecordTable, category: Field, counted: Field) -> AggregateResult<Vec<YearShares>> {
    require(table, Field::DateAcquired)?;
    require_categorical(table, category)?;
    require_categorical(table, counted)?;

    let mut pivot: BTreeMap<i32, BTreeMap<&str, usize>> = BTreeMap::new();
    for row in table.records() {
        let Some(year) = row.year else { continue };
        let cells = pivot.entry(year).or_default();
        if let (Some(cat), Some(_)) = (row.text(category), row.text(counted)) {
            *cells.entry(cat).or_default() += 1;
        }
    }

    let rows = pivot
        .into_iter()
        .map(|(year, cells)| {
            let total: usize = cells.values().sum();
            let shares = (total > 0).then(|| {
                Series::from_pairs(
                    cells
                        .into_iter()
                        .map(|(k, n)| (k, n as f64 / total as f64 * 100.0)),
                )
            });
            YearShares { year, shares }
        })
        .collect();
    Ok(rows)
}

/// Values of `field` first seen in each year, and the running distinct count.
pub fn new_distinct_by_year(table: &RecordTable, field: Field) -> AggregateResult<Vec<NewDistinct>> {
    require_categorical(table, field)?;
    require(table, Field::DateAcquired)?;

    let mut by_year: BTreeMap<i32, BTreeSet<&str>> = BTreeMap::new();
    for row in table.records() {
        if let Some(year) = row.year {
            let set = by_year.entry(year).or_default();
            if let Some(value) = row.text(field) {
                set.insert(value);
            }
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let rows = by_year
        .into_iter()
        .map(|(year, values)| {
            let fresh: Vec<String> = values
                .into_iter()
                .filter(|v| seen.insert(*v))
                .map(str::to_string)
                .collect();
            NewDistinct {
                year,
                new: fresh.len(),
                cumulative: seen.len(),
                values: fresh,
            }
        })
        .collect();
    Ok(rows)
}

// =============================================================================
// Numeric aggregates
// =============================================================================

/// Equal-width histogram of the non-null values of a numeric field.
pub fn histogram(table: &RecordTable, field: Field, bins: usize) -> AggregateResult<Histogram> {
    if bins == 0 {
        return Err(ParameterError::ZeroBins.into());
    }
    if bins > MAX_BINS {
        return Err(ParameterError::TooManyBins(bins, MAX_BINS).into());
    }
    require_numeric(table, field)?;

    let values: Vec<f64> = table.records().iter().filter_map(|r| r.number(field)).collect();
    Ok(bin_values(&values, bins))
}

fn bin_values(values: &[f64], bins: usize) -> Histogram {
    if values.is_empty() {
        return Histogram::default();
    }

    let min = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let mut max = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if max == min {
        max = min + 1.0;
    }
    let width = (max - min) / bins as f64;

    let mut edges: Vec<f64> = (0..bins).map(|i| min + i as f64 * width).collect();
    edges.push(max);

    let mut counts = vec![0usize; bins];
    for &v in values {
        // Last bin is closed on the right
        let idx = (((v - min) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }

    Histogram { edges, counts }
}

/// Mean of `value` per `group`, nulls ignored, ascending by mean.
///
/// Groups without a single non-null value are left out.
pub fn grouped_mean(table: &RecordTable, group: Field, value: Field) -> AggregateResult<Series> {
    require_categorical(table, group)?;
    require_numeric(table, value)?;

    let mut sums: HashMap<&str, (f64, usize)> = HashMap::new();
    for row in table.records() {
        if let (Some(key), Some(v)) = (row.text(group), row.number(value)) {
            let entry = sums.entry(key).or_insert((0.0, 0));
            entry.0 += v;
            entry.1 += 1;
        }
    }

    let mut entries: Vec<SeriesEntry> = sums
        .into_iter()
        .map(|(key, (sum, n))| SeriesEntry {
            key: key.to_string(),
            value: sum / n as f64,
        })
        .collect();
    entries.sort_by(|a, b| {
        a.value
            .partial_cmp(&b.value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    Ok(Series { entries })
}

/// Two-level counts (`outer` → `inner`) over rows where both are present.
pub fn category_tree(table: &RecordTable, outer: Field, inner: Field) -> AggregateResult<Vec<CategoryNode>> {
    require_categorical(table, outer)?;
    require_categorical(table, inner)?;

    let mut groups: HashMap<&str, Vec<&Record>> = HashMap::new();
    for row in table.records() {
        if let (Some(key), Some(_)) = (row.text(outer), row.text(inner)) {
            groups.entry(key).or_default().push(row);
        }
    }

    let mut nodes: Vec<CategoryNode> = groups
        .into_iter()
        .map(|(key, rows)| CategoryNode {
            key: key.to_string(),
            count: rows.len(),
            children: count_rows(rows.into_iter(), inner, Order::CountDesc),
        })
        .collect();
    nodes.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    Ok(nodes)
}

fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    let n = sorted_data.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted_data[0];
    }

    let rank = p * (n - 1) as f64;
    let lower_idx = rank.floor() as usize;
    let upper_idx = rank.ceil() as usize;

    if lower_idx == upper_idx {
        sorted_data[lower_idx]
    } else {
        let weight = rank - lower_idx as f64;
        sorted_data[lower_idx] * (1.0 - weight) + sorted_data[upper_idx] * weight
    }
}
