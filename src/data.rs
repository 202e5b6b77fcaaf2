use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::ColumnMap;
use crate::error::{LoadError, SchemaError};

/// Logical columns every dataset variant is mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    /// `Author` for books, `Artist` for artworks
    Creator,
    Gender,
    Country,
    Classification,
    DateAcquired,
    Pages,
    Grade,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Title,
        Field::Creator,
        Field::Gender,
        Field::Country,
        Field::Classification,
        Field::DateAcquired,
        Field::Pages,
        Field::Grade,
    ];

    pub fn is_numeric(self) -> bool {
        matches!(self, Field::Pages | Field::Grade)
    }

    pub fn is_categorical(self) -> bool {
        !self.is_numeric() && self != Field::DateAcquired
    }

    pub fn key(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Creator => "creator",
            Field::Gender => "gender",
            Field::Country => "country",
            Field::Classification => "classification",
            Field::DateAcquired => "date_acquired",
            Field::Pages => "pages",
            Field::Grade => "grade",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Title => "Title",
            Field::Creator => "Creator",
            Field::Gender => "Gender",
            Field::Country => "Country",
            Field::Classification => "Classification",
            Field::DateAcquired => "DateAcquired",
            Field::Pages => "Pages",
            Field::Grade => "Grade",
        };
        f.write_str(name)
    }
}

impl FromStr for Field {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.key().eq_ignore_ascii_case(s) || f.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| SchemaError::UnknownField(s.to_string()))
    }
}

/// One typed row of the dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub title: String,
    pub creator: String,
    pub gender: String,
    pub country: String,
    pub classification: String,
    pub year: Option<i32>,
    pub pages: Option<f64>,
    pub grade: Option<f64>,
}

impl Record {
    /// Categorical value of `field`; `None` for empty cells and non-text fields.
    pub fn text(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Title => &self.title,
            Field::Creator => &self.creator,
            Field::Gender => &self.gender,
            Field::Country => &self.country,
            Field::Classification => &self.classification,
            _ => return None,
        };
        if value.is_empty() {
            None
        } else {
            Some(value.as_str())
        }
    }

    pub fn number(&self, field: Field) -> Option<f64> {
        match field {
            Field::Pages => self.pages,
            Field::Grade => self.grade,
            Field::DateAcquired => self.year.map(f64::from),
            _ => None,
        }
    }

    fn set(&mut self, field: Field, raw: &str) {
        match field {
            Field::Title => self.title = raw.to_string(),
            Field::Creator => self.creator = raw.to_string(),
            Field::Gender => self.gender = raw.to_string(),
            Field::Country => self.country = raw.to_string(),
            Field::Classification => self.classification = raw.to_string(),
            Field::DateAcquired => self.year = parse_year(raw),
            Field::Pages => self.pages = parse_number(raw),
            Field::Grade => self.grade = parse_number(raw),
        }
    }
}

/// The immutable in-memory dataset shared by every handler.
#[derive(Debug, Clone)]
pub struct RecordTable {
    records: Vec<Record>,
    available: BTreeSet<Field>,
    noun: String,
}

impl RecordTable {
    pub fn new(records: Vec<Record>, available: impl IntoIterator<Item = Field>, noun: &str) -> Self {
        Self {
            records,
            available: available.into_iter().collect(),
            noun: noun.to_string(),
        }
    }

    pub fn from_path(path: &Path, columns: &ColumnMap) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_reader(file, columns)?;
        info!(
            path = %path.display(),
            rows = table.len(),
            fields = ?table.available,
            "loaded dataset"
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R, columns: &ColumnMap) -> Result<Self, LoadError> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();

        // Resolve each mapped field to a header index
        let mut indices = Vec::new();
        for column in columns.iter() {
            match find_col_index(&headers, &column.header) {
                Some(idx) => indices.push((column.field, idx)),
                None if column.required => {
                    return Err(SchemaError::MissingColumn {
                        field: column.field,
                        header: column.header.clone(),
                    }
                    .into())
                }
                None => debug!(field = %column.field, header = %column.header, "optional column absent"),
            }
        }

        let mut records = Vec::new();
        for row in rdr.records() {
            let row = row?;
            let mut record = Record::default();
            for &(field, idx) in &indices {
                if let Some(raw) = row.get(idx) {
                    record.set(field, raw);
                }
            }
            records.push(record);
        }

        if records.is_empty() {
            return Err(LoadError::Empty);
        }

        Ok(Self {
            records,
            available: indices.into_iter().map(|(f, _)| f).collect(),
            noun: columns.noun().to_string(),
        })
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has(&self, field: Field) -> bool {
        self.available.contains(&field)
    }

    /// Plural name of what a row is ("books", "artworks").
    pub fn noun(&self) -> &str {
        &self.noun
    }

    /// Rows carrying an acquisition year inside `[start, end]`.
    pub fn in_years(&self, start: i32, end: i32) -> impl Iterator<Item = &Record> + '_ {
        self.records
            .iter()
            .filter(move |r| r.year.map_or(false, |y| y >= start && y <= end))
    }

    /// Smallest and largest acquisition year present.
    pub fn year_bounds(&self) -> Option<(i32, i32)> {
        let mut years = self.records.iter().filter_map(|r| r.year);
        let first = years.next()?;
        Some(years.fold((first, first), |(lo, hi), y| (lo.min(y), hi.max(y))))
    }

    /// Distinct non-empty values of a categorical field, sorted.
    pub fn distinct(&self, field: Field) -> Vec<String> {
        let set: BTreeSet<&str> = self.records.iter().filter_map(|r| r.text(field)).collect();
        set.into_iter().map(str::to_string).collect()
    }
}

fn find_col_index(headers: &[String], name: &str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(name))
}

/// Leading integer of the cell, so `1995` and `1995-05-02` both give 1995.
fn parse_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, raw),
    };
    let end = digits
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(digits.len(), |(i, _)| i);
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i32>().ok().map(|y| sign * y)
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnMap, Preset};

    const BOOKS: &str = "\
Title,Author,Gender,Country,Classification,DateAcquired,Pages,Grade
Dune,Herbert,Male,USA,Novel,1995,412,4.5
Ficciones,Borges,Male,Argentina,Short stories,1995-06-01,,4.8
Orlando,Woolf,Female,UK,Novel,2001,333,
";

    #[test]
    fn test_load_typed_records() {
        let table = RecordTable::from_reader(BOOKS.as_bytes(), &ColumnMap::preset(Preset::Books)).unwrap();
        assert_eq!(table.len(), 3);
        let r = &table.records()[1];
        assert_eq!(r.creator, "Borges");
        assert_eq!(r.year, Some(1995));
        assert_eq!(r.pages, None);
        assert_eq!(r.grade, Some(4.8));
        assert_eq!(table.year_bounds(), Some((1995, 2001)));
        assert_eq!(table.noun(), "books");
    }

    #[test]
    fn test_missing_required_column() {
        let csv = "Title,Author,Gender\nDune,Herbert,Male\n";
        let err = RecordTable::from_reader(csv.as_bytes(), &ColumnMap::preset(Preset::Books)).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Schema(SchemaError::MissingColumn { field: Field::Classification, .. })
                | LoadError::Schema(SchemaError::MissingColumn { field: Field::DateAcquired, .. })
        ));
    }

    #[test]
    fn test_optional_column_absent() {
        let csv = "gender,classification,dateacquired\nMale,Novel,1990\n";
        let table = RecordTable::from_reader(csv.as_bytes(), &ColumnMap::preset(Preset::Books)).unwrap();
        assert!(table.has(Field::Gender));
        assert!(!table.has(Field::Pages));
        assert_eq!(table.records()[0].year, Some(1990));
    }

    #[test]
    fn test_header_only_is_empty() {
        let csv = "Gender,Classification,DateAcquired\n";
        let err = RecordTable::from_reader(csv.as_bytes(), &ColumnMap::preset(Preset::Books)).unwrap_err();
        assert!(matches!(err, LoadError::Empty));
        assert!(err.to_string().contains("at least one data row"));
    }

    #[test]
    fn test_missing_file() {
        let err = RecordTable::from_path(Path::new("no/such/file.csv"), &ColumnMap::preset(Preset::Books))
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2001"), Some(2001));
        assert_eq!(parse_year(" 1930-01-05 "), Some(1930));
        assert_eq!(parse_year(""), None);
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn test_field_from_str() {
        assert_eq!("date_acquired".parse::<Field>().unwrap(), Field::DateAcquired);
        assert_eq!("Classification".parse::<Field>().unwrap(), Field::Classification);
        assert!("colour".parse::<Field>().is_err());
    }
}
