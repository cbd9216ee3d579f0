//! Target table catalog. The loader owns the DDL; artifacts only have to agree on the column set.

use std::collections::HashSet;

use crimeflow_types::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: &'static str,
    pub referenced_column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub primary_key: &'static str,
    pub foreign_keys: &'static [ForeignKey],
}

const fn col(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef { name, ty }
}

use ColumnType::{Integer, Real, Text};

pub const SHOOTING: TableSchema = TableSchema {
    name: "shooting",
    columns: &[
        col("incident_ID", Integer),
        col("incident_num", Text),
        col("shooting_date", Text),
        col("district", Text),
        col("Shooting_type", Integer),
        col("Gender", Text),
        col("Race", Text),
        col("Ethnicity", Text),
        col("multiple_victims", Integer),
    ],
    primary_key: "incident_ID",
    foreign_keys: &[],
};

pub const DISTRICT: TableSchema = TableSchema {
    name: "district",
    columns: &[col("district_key", Integer), col("district", Text)],
    primary_key: "district_key",
    foreign_keys: &[],
};

pub const OFFENSE: TableSchema = TableSchema {
    name: "offense",
    columns: &[col("offense_code", Integer), col("offense_code_group", Text)],
    primary_key: "offense_code",
    foreign_keys: &[],
};

pub const LOCATION: TableSchema = TableSchema {
    name: "location",
    columns: &[
        col("reporting_area", Integer),
        col("Lat", Real),
        col("Long", Real),
        col("Location", Text),
    ],
    primary_key: "reporting_area",
    foreign_keys: &[],
};

pub const CRIMES_WEATHER: TableSchema = TableSchema {
    name: "crimes_weather",
    columns: &[
        col("CRIME_ID", Integer),
        col("INCIDENT_NUMBER", Text),
        col("Occurred_on_date", Text),
        col("OFFENSE_CODE", Integer),
        col("OFFENSE_DESCRIPTION", Text),
        col("SHOOTING", Integer),
        col("HOUR", Integer),
        col("UCR_PART", Text),
        col("STREET", Text),
        col("DISTRICT_KEY", Integer),
        col("AVG_Temp", Real),
        col("MIN_Temp", Real),
        col("MAX_Temp", Real),
        col("Precipitation", Real),
        col("wspd", Real),
        col("pres", Real),
        col("REPORTING_AREA", Integer),
    ],
    primary_key: "CRIME_ID",
    foreign_keys: &[
        ForeignKey {
            column: "OFFENSE_CODE",
            references: "offense",
            referenced_column: "offense_code",
        },
        ForeignKey {
            column: "DISTRICT_KEY",
            references: "district",
            referenced_column: "district_key",
        },
    ],
};

pub const CATALOG: [TableSchema; 5] = [SHOOTING, DISTRICT, OFFENSE, LOCATION, CRIMES_WEATHER];

/// Look a table up by name.
pub fn table(name: &str) -> Result<&'static TableSchema> {
    CATALOG
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| PipelineError::LoadError {
            table: name.to_string(),
            message: "no such table in the catalog".into(),
        })
}

/// Double-quote an identifier for SQL.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl TableSchema {
    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote(c.name), c.ty.sql()))
            .collect();
        format!("CREATE TABLE {} ({})", quote(self.name), columns.join(", "))
    }

    pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Referenced tables, in declaration order.
    pub fn referenced_tables(&self) -> Vec<&'static str> {
        self.foreign_keys.iter().map(|fk| fk.references).collect()
    }

    /// Resolve `columns` (an artifact header) against this table. The two column sets must be
    /// equal ignoring ASCII case; the result follows the artifact's order.
    pub fn match_columns(&self, columns: &[String]) -> Result<Vec<&'static ColumnDef>> {
        let err = |message: String| PipelineError::LoadError {
            table: self.name.to_string(),
            message,
        };
        let mut seen = HashSet::new();
        let mut matched = Vec::with_capacity(columns.len());
        for name in columns {
            let def = self
                .column(name)
                .ok_or_else(|| err(format!("column '{name}' is not part of the table")))?;
            if !seen.insert(def.name) {
                return Err(err(format!("column '{}' is supplied twice", def.name)));
            }
            matched.push(def);
        }
        let missing: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| !seen.contains(c.name))
            .map(|c| c.name)
            .collect();
        if !missing.is_empty() {
            return Err(err(format!("missing columns: {}", missing.join(", "))));
        }
        Ok(matched)
    }
}
