// Column-name mapping: one dashboard pipeline, many dataset schemas

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::data::Field;
use crate::error::SchemaError;

/// Built-in schemas for the two known datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Preset {
    /// Translated-books metadata (`Author`, `Pages`, `Grade`)
    #[default]
    Books,
    /// Museum acquisitions (`Artist`)
    Museum,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub field: Field,
    pub header: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    columns: Vec<ColumnSpec>,
    noun: String,
}

impl ColumnMap {
    pub fn preset(preset: Preset) -> Self {
        let (creator, noun, numeric) = match preset {
            Preset::Books => ("Author", "books", true),
            Preset::Museum => ("Artist", "artworks", false),
        };

        let mut columns = vec![
            col(Field::Title, "Title", false),
            col(Field::Creator, creator, false),
            col(Field::Gender, "Gender", true),
            col(Field::Country, "Country", false),
            col(Field::Classification, "Classification", true),
            col(Field::DateAcquired, "DateAcquired", true),
        ];
        if numeric {
            columns.push(col(Field::Pages, "Pages", false));
            columns.push(col(Field::Grade, "Grade", false));
        }

        Self {
            columns,
            noun: noun.to_string(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read column mapping {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid column mapping {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ColumnFile = toml::from_str(text)?;

        let mut columns: Vec<ColumnSpec> = Vec::new();
        for (name, entry) in file.columns {
            let field: Field = name.parse()?;
            if columns.iter().any(|c| c.field == field) {
                return Err(SchemaError::DuplicateField(field).into());
            }
            let (header, required) = match entry {
                ColumnEntry::Header(h) => (h, false),
                ColumnEntry::Full { header, required } => (header, required),
            };
            columns.push(ColumnSpec { field, header, required });
        }

        Ok(Self {
            columns,
            noun: file.noun,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter()
    }

    pub fn header(&self, field: Field) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.header.as_str())
    }

    pub fn noun(&self) -> &str {
        &self.noun
    }
}

fn col(field: Field, header: &str, required: bool) -> ColumnSpec {
    ColumnSpec {
        field,
        header: header.to_string(),
        required,
    }
}

#[derive(Debug, Deserialize)]
struct ColumnFile {
    #[serde(default = "default_noun")]
    noun: String,
    columns: BTreeMap<String, ColumnEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ColumnEntry {
    Header(String),
    Full {
        header: String,
        #[serde(default)]
        required: bool,
    },
}

fn default_noun() -> String {
    "records".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let books = ColumnMap::preset(Preset::Books);
        assert_eq!(books.header(Field::Creator), Some("Author"));
        assert_eq!(books.header(Field::Pages), Some("Pages"));
        assert_eq!(books.noun(), "books");

        let museum = ColumnMap::preset(Preset::Museum);
        assert_eq!(museum.header(Field::Creator), Some("Artist"));
        assert_eq!(museum.header(Field::Pages), None);
    }

    #[test]
    fn test_from_toml() {
        let text = r#"
noun = "prints"

[columns]
creator = "Maker"
date_acquired = { header = "Acquired", required = true }
Classification = { header = "Medium" }
"#;
        let map = ColumnMap::from_toml_str(text).unwrap();
        assert_eq!(map.noun(), "prints");
        assert_eq!(map.header(Field::Creator), Some("Maker"));
        let acquired = map.iter().find(|c| c.field == Field::DateAcquired).unwrap();
        assert!(acquired.required);
        let medium = map.iter().find(|c| c.field == Field::Classification).unwrap();
        assert!(!medium.required);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let text = r#"
[columns]
date_acquired = "A"
DateAcquired = "B"
"#;
        assert!(ColumnMap::from_toml_str(text).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let text = "[columns]\ncolour = \"Colour\"\n";
        let err = ColumnMap::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("colour"));
    }
}
