use std::path::PathBuf;
use thiserror::Error;

use crate::controls::ControlId;
use crate::data::Field;

/// Failure reading the dataset file. Fatal at startup.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("data file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read data file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed CSV input")]
    Csv(#[from] csv::Error),
    #[error("CSV must contain at least one data row")]
    Empty,
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// The header row does not provide a column the dashboard depends on.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("required column '{header}' for field {field} not found in header")]
    MissingColumn { field: Field, header: String },
    #[error("unknown field name '{0}' in column mapping")]
    UnknownField(String),
    #[error("field {0} is mapped more than once")]
    DuplicateField(Field),
}

/// An interaction supplied a value outside the control's domain.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    #[error("year range start {start} is after end {end}")]
    InvertedRange { start: i32, end: i32 },
    #[error("histogram needs at least one bin")]
    ZeroBins,
    #[error("bin count {0} exceeds the maximum of {1}")]
    TooManyBins(usize, usize),
    #[error("selection is empty")]
    EmptySelection,
    #[error("cannot parse '{value}' as {expected}")]
    Unparsable { value: String, expected: &'static str },
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    #[error("'{value}' does not occur in the data for {control}")]
    NotInData { value: String, control: ControlId },
}

/// Failure computing one aggregate for one render.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregateError {
    #[error("field {0} is not available in this dataset")]
    MissingField(Field),
    #[error("field {0} is not numeric")]
    NotNumeric(Field),
    #[error("field {0} is not categorical")]
    NotCategorical(Field),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

pub type AggregateResult<T> = Result<T, AggregateError>;
