// Control values arriving from the page, parsed into typed parameters

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::separated_list1,
    sequence::{delimited, pair, separated_pair},
    IResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::aggregate::Threshold;
use crate::error::ParameterError;

/// Named user controls on the dashboard page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControlId {
    YearRange,
    FrameYear,
    Countries,
    Bins,
    Threshold,
    Classification,
}

impl ControlId {
    pub const ALL: [ControlId; 6] = [
        ControlId::YearRange,
        ControlId::FrameYear,
        ControlId::Countries,
        ControlId::Bins,
        ControlId::Threshold,
        ControlId::Classification,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            ControlId::YearRange => "year-range",
            ControlId::FrameYear => "frame-year",
            ControlId::Countries => "countries",
            ControlId::Bins => "bins",
            ControlId::Threshold => "threshold",
            ControlId::Classification => "classification",
        }
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for ControlId {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlId::ALL
            .iter()
            .copied()
            .find(|c| c.slug() == s)
            .ok_or_else(|| ParameterError::UnknownOption(s.to_string()))
    }
}

/// A parsed, typed control value.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    YearRange(i32, i32),
    FrameYear(i32),
    Countries(Vec<String>),
    Bins(usize),
    Threshold(Threshold),
    /// `None` selects every classification
    Classification(Option<String>),
}

/// Dropdown entry meaning "no classification filter".
pub const ALL_CLASSIFICATIONS: &str = "All";

/// Parse the raw JSON value sent for `control`.
///
/// `Ok(None)` means the control is unset (null, empty string, empty list)
/// and the update should be skipped.
pub fn parse_control(control: ControlId, raw: &Value) -> Result<Option<ControlValue>, ParameterError> {
    if is_unset(raw) {
        return Ok(None);
    }

    let value = match control {
        ControlId::YearRange => {
            let (start, end) = match raw {
                Value::Array(items) if items.len() == 2 => (as_year(&items[0])?, as_year(&items[1])?),
                Value::String(s) => parse_year_range(s)?,
                other => return Err(unparsable(other, "a year range")),
            };
            ControlValue::YearRange(start, end)
        }
        ControlId::FrameYear => ControlValue::FrameYear(as_year(raw)?),
        ControlId::Countries => {
            let countries = match raw {
                Value::Array(items) => items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(s.trim().to_string()),
                        other => Err(unparsable(other, "a country name")),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Value::String(s) => parse_country_list(s)?,
                other => return Err(unparsable(other, "a list of countries")),
            };
            let countries: Vec<String> = countries.into_iter().filter(|c| !c.is_empty()).collect();
            if countries.is_empty() {
                return Ok(None);
            }
            ControlValue::Countries(countries)
        }
        ControlId::Bins => {
            let bins = match raw {
                Value::Number(n) => n.as_u64().ok_or_else(|| unparsable(raw, "a bin count"))? as usize,
                Value::String(s) => s.trim().parse::<usize>().map_err(|_| unparsable(raw, "a bin count"))?,
                other => return Err(unparsable(other, "a bin count")),
            };
            ControlValue::Bins(bins)
        }
        ControlId::Threshold => match raw {
            Value::String(s) => ControlValue::Threshold(s.parse()?),
            other => return Err(unparsable(other, "mean or median")),
        },
        ControlId::Classification => match raw {
            Value::String(s) if s.trim() == ALL_CLASSIFICATIONS => ControlValue::Classification(None),
            Value::String(s) => ControlValue::Classification(Some(s.trim().to_string())),
            other => return Err(unparsable(other, "a classification")),
        },
    };
    Ok(Some(value))
}

fn is_unset(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn unparsable(raw: &Value, expected: &'static str) -> ParameterError {
    let value = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    ParameterError::Unparsable { value, expected }
}

fn as_year(raw: &Value) -> Result<i32, ParameterError> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .and_then(|y| i32::try_from(y).ok())
            .ok_or_else(|| unparsable(raw, "a year")),
        Value::String(s) => all_consuming(ws(year))(s.as_str())
            .map(|(_, y)| y)
            .map_err(|_| unparsable(raw, "a year")),
        other => Err(unparsable(other, "a year")),
    }
}

// =============================================================================
// nom parsers
// =============================================================================

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn year(input: &str) -> IResult<&str, i32> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i32>)(input)
}

/// `1990-2000`, `1990..2000`, `1990 to 2000` or `1990,2000`
fn year_range(input: &str) -> IResult<&str, (i32, i32)> {
    separated_pair(
        ws(year),
        alt((tag(".."), tag("-"), tag("to"), tag(","))),
        ws(year),
    )(input)
}

fn country_list(input: &str) -> IResult<&str, Vec<String>> {
    separated_list1(
        char(','),
        map(take_while(|c: char| c != ','), |s: &str| s.trim().to_string()),
    )(input)
}

pub fn parse_year_range(input: &str) -> Result<(i32, i32), ParameterError> {
    all_consuming(year_range)(input)
        .map(|(_, range)| range)
        .map_err(|_| ParameterError::Unparsable {
            value: input.to_string(),
            expected: "a year range",
        })
}

/// Comma-separated names; blank items such as a trailing comma are dropped.
pub fn parse_country_list(input: &str) -> Result<Vec<String>, ParameterError> {
    all_consuming(country_list)(input)
        .map(|(_, list)| list.into_iter().filter(|c| !c.is_empty()).collect())
        .map_err(|_| ParameterError::Unparsable {
            value: input.to_string(),
            expected: "a list of countries",
        })
}
