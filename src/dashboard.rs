// The consolidated dashboard: every chart, what it depends on, how it is built

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::aggregate::{self, Order, YearMetric};
use crate::chart::{self, ChartSpec, Labels, Trace};
use crate::controls::ControlId;
use crate::data::{Field, RecordTable};
use crate::error::{AggregateResult, ParameterError};
use crate::session::ControlState;
use crate::title::Bindings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChartId {
    GenderDistribution,
    AcquisitionsByYear,
    ClassificationDistribution,
    PagesHistogram,
    ClassificationInRange,
    ClassificationShare,
    CumulativeAcquisitions,
    NewCountries,
    CountryShare,
    GradeByCountry,
    GenderShareByYear,
    ClassificationFrames,
    CountriesOverTime,
    ClassificationTree,
    GenderWithinClassification,
}

impl ChartId {
    pub const ALL: [ChartId; 15] = [
        ChartId::GenderDistribution,
        ChartId::AcquisitionsByYear,
        ChartId::ClassificationDistribution,
        ChartId::PagesHistogram,
        ChartId::ClassificationInRange,
        ChartId::ClassificationShare,
        ChartId::CumulativeAcquisitions,
        ChartId::NewCountries,
        ChartId::CountryShare,
        ChartId::GradeByCountry,
        ChartId::GenderShareByYear,
        ChartId::ClassificationFrames,
        ChartId::CountriesOverTime,
        ChartId::ClassificationTree,
        ChartId::GenderWithinClassification,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            ChartId::GenderDistribution => "gender-distribution",
            ChartId::AcquisitionsByYear => "acquisitions-by-year",
            ChartId::ClassificationDistribution => "classification-distribution",
            ChartId::PagesHistogram => "pages-histogram",
            ChartId::ClassificationInRange => "classification-in-range",
            ChartId::ClassificationShare => "classification-share",
            ChartId::CumulativeAcquisitions => "cumulative-acquisitions",
            ChartId::NewCountries => "new-countries",
            ChartId::CountryShare => "country-share",
            ChartId::GradeByCountry => "grade-by-country",
            ChartId::GenderShareByYear => "gender-share-by-year",
            ChartId::ClassificationFrames => "classification-frames",
            ChartId::CountriesOverTime => "countries-over-time",
            ChartId::ClassificationTree => "classification-tree",
            ChartId::GenderWithinClassification => "gender-within-classification",
        }
    }

    /// Controls whose value this chart reads.
    pub fn depends_on(self) -> &'static [ControlId] {
        match self {
            ChartId::PagesHistogram => &[ControlId::Bins],
            ChartId::ClassificationInRange => &[ControlId::YearRange],
            ChartId::ClassificationShare => &[ControlId::Threshold],
            ChartId::ClassificationFrames => &[ControlId::FrameYear],
            ChartId::CountriesOverTime => &[ControlId::Countries],
            ChartId::GenderWithinClassification => &[ControlId::Classification],
            _ => &[],
        }
    }
}

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ChartId {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChartId::ALL
            .iter()
            .copied()
            .find(|c| c.slug() == s)
            .ok_or_else(|| ParameterError::UnknownOption(s.to_string()))
    }
}

/// Charts that must be rebuilt when `control` changes.
pub fn affected_charts(control: ControlId) -> Vec<ChartId> {
    ChartId::ALL
        .iter()
        .copied()
        .filter(|c| c.depends_on().contains(&control))
        .collect()
}

fn title(template: &str, bindings: &Bindings) -> String {
    bindings.fill(template)
}

/// Build one chart from the shared table and a session's control values.
pub fn build_chart(table: &RecordTable, id: ChartId, state: &ControlState) -> AggregateResult<ChartSpec> {
    let noun = table.noun();
    let count_label = format!("Number of {}", noun);
    let base = Bindings::new().bind("noun", noun);

    let spec = match id {
        ChartId::GenderDistribution => {
            let series = aggregate::category_count(table, Field::Gender, Order::CountDesc)?;
            chart::bar_chart(
                &series,
                Labels::new(title("Distribution of $noun by creator gender", &base))
                    .x("Gender")
                    .y(&count_label),
            )
        }
        ChartId::AcquisitionsByYear => {
            let points = aggregate::counts_by_year(table)?;
            chart::year_line_chart(
                &points,
                Labels::new(title("Number of $noun acquired per year", &base))
                    .x("Year acquired")
                    .y(&count_label),
                false,
            )
        }
        ChartId::ClassificationDistribution => {
            let series = aggregate::category_count(table, Field::Classification, Order::CountDesc)?;
            chart::bar_chart(
                &series,
                Labels::new(title("Distribution of $noun by classification", &base))
                    .x("Classification")
                    .y(&count_label),
            )
        }
        ChartId::PagesHistogram => {
            let hist = aggregate::histogram(table, Field::Pages, state.bins)?;
            let b = base.clone().bind("bins", state.bins);
            chart::histogram_chart(
                &hist,
                Labels::new(title("Distribution of page counts ($bins bins)", &b))
                    .x("Number of pages")
                    .y(&count_label),
            )
        }
        ChartId::ClassificationInRange => {
            let (start, end) = state.year_range;
            let series =
                aggregate::category_count_in_range(table, Field::Classification, start, end, Order::CountDesc)?;
            let b = base.clone().bind("year1", start).bind("year2", end);
            chart::bar_chart(
                &series,
                Labels::new(title("$noun by classification acquired $year1-$year2", &b))
                    .x("Classification")
                    .y(&count_label),
            )
        }
        ChartId::ClassificationShare => {
            let counts = aggregate::category_count(table, Field::Classification, Order::CountDesc)?;
            let grouped = aggregate::group_small_buckets(&counts, state.threshold);
            let b = base.clone().bind("stat", state.threshold.label());
            chart::pie_chart(
                &aggregate::share(&grouped),
                Labels::new(title("Share of $noun by classification (at or below $stat grouped)", &b)),
            )
        }
        ChartId::CumulativeAcquisitions => {
            let points = aggregate::cumulative_by_year(table, YearMetric::Rows)?;
            chart::year_line_chart(
                &points,
                Labels::new(title("Cumulative number of $noun acquired", &base))
                    .x("Year acquired")
                    .y(&count_label),
                true,
            )
        }
        ChartId::NewCountries => {
            let rows = aggregate::new_distinct_by_year(table, Field::Country)?;
            let years: Vec<String> = rows.iter().map(|r| r.year.to_string()).collect();
            let traces = vec![
                Trace::new("new countries", years.clone(), rows.iter().map(|r| r.new as f64).collect()),
                Trace::new("countries so far", years, rows.iter().map(|r| r.cumulative as f64).collect()),
            ];
            chart::line_chart(
                traces,
                Labels::new(title("Countries represented among $noun acquired", &base))
                    .x("Year acquired")
                    .y("Number of countries"),
            )
        }
        ChartId::CountryShare => {
            let counts = aggregate::category_count(table, Field::Country, Order::CountDesc)?;
            chart::choropleth_chart(
                &aggregate::share(&counts),
                Labels::new(title("Share of $noun by country", &base)).y(format!("Percent of all {}", noun)),
            )
        }
        ChartId::GradeByCountry => {
            let means = aggregate::grouped_mean(table, Field::Country, Field::Grade)?;
            chart::bar_chart(
                &means,
                Labels::new(title("Average grade of $noun by country", &base))
                    .x("Country")
                    .y("Average grade"),
            )
        }
        ChartId::GenderShareByYear => {
            let rows = aggregate::gender_share_by_year(table)?;
            chart::stacked_share_chart(
                &rows,
                Labels::new(title("Creator gender of $noun by acquisition year", &base))
                    .x("Year acquired")
                    .y("Percent of creators"),
            )
        }
        ChartId::ClassificationFrames => {
            let frames = aggregate::log_frames(table, Field::Classification)?;
            let year = match state.frame_year {
                Some(y) if !frames.years.contains(&y) => {
                    return Err(ParameterError::NotInData {
                        value: y.to_string(),
                        control: ControlId::FrameYear,
                    }
                    .into())
                }
                Some(y) => Some(y),
                None => frames.years.first().copied(),
            };
            let b = base
                .clone()
                .bind("year", year.map(|y| y.to_string()).unwrap_or_default());
            chart::animated_bar_chart(
                &frames,
                true,
                Labels::new(title("$noun by classification acquired in $year (log scale)", &b))
                    .x("Classification")
                    .y(format!("ln(number of {})", noun)),
                year,
            )
        }
        ChartId::CountriesOverTime => {
            let traces = aggregate::yearly_counts_for(table, Field::Country, &state.countries)?
                .into_iter()
                .map(|(name, points)| {
                    Trace::new(
                        name,
                        points.iter().map(|p| p.year.to_string()).collect(),
                        points.iter().map(|p| p.value).collect(),
                    )
                })
                .collect();
            let b = base.clone().bind("countries", state.countries.join(", "));
            chart::line_chart(
                traces,
                Labels::new(title("$noun acquired per year: $countries", &b))
                    .x("Year acquired")
                    .y(&count_label),
            )
        }
        ChartId::ClassificationTree => {
            let nodes = aggregate::category_tree(table, Field::Classification, Field::Gender)?;
            chart::sunburst_chart(&nodes, Labels::new(title("$noun by classification and creator gender", &base)))
        }
        ChartId::GenderWithinClassification => {
            let (series, label) = match &state.classification {
                Some(c) if !table.distinct(Field::Classification).contains(c) => {
                    return Err(ParameterError::NotInData {
                        value: c.clone(),
                        control: ControlId::Classification,
                    }
                    .into())
                }
                Some(c) => (
                    aggregate::category_count_within(table, Field::Gender, Field::Classification, c, Order::CountDesc)?,
                    c.clone(),
                ),
                None => (
                    aggregate::category_count(table, Field::Gender, Order::CountDesc)?,
                    "all classifications".to_string(),
                ),
            };
            let b = base.clone().bind("classification", label);
            chart::bar_chart(
                &series,
                Labels::new(title("Creator gender of $noun: $classification", &b))
                    .x("Gender")
                    .y(&count_label),
            )
        }
    };

    debug!(chart = %id, traces = spec.traces.len(), "built chart");
    Ok(spec.with_id(id.slug()))
}
