//! Shooting lineage: Boston open-data shooting records narrowed to female victims of
//! multiple-victim incidents.

use crimeflow_frame::{Dataset, FlagMapping, Value};
use crimeflow_types::Result;

pub const SHOOTING_RENAMES: [(&str, &str); 5] = [
    ("shooting_type_v2", "Shooting_type"),
    ("victim_gender", "Gender"),
    ("victim_race", "Race"),
    ("victim_ethnicity_NIBRS", "Ethnicity"),
    ("multi_victim", "multiple_victims"),
];

const FILLED_COLUMNS: [&str; 4] = ["Ethnicity", "Race", "Gender", "district"];
const UNKNOWN: &str = "unknown";

/// Columns of the `shooting` table, without its key.
pub const SHOOTING_COLUMNS: [&str; 8] = [
    "incident_num",
    "shooting_date",
    "district",
    "Shooting_type",
    "Gender",
    "Race",
    "Ethnicity",
    "multiple_victims",
];

pub fn multiple_victims_flag() -> FlagMapping {
    FlagMapping::partial([("T", 1), ("F", 0)])
}

pub fn fatality_flag() -> FlagMapping {
    FlagMapping::partial([("FATAL", 1), ("NON-FATAL", 0)])
}

/// Raw shooting records → `shootings`, keyed by `incident_id`.
pub fn transform_shootings(raw: &Dataset) -> Result<Dataset> {
    let normalized = raw
        .rename(&SHOOTING_RENAMES)?
        .normalize_flag("multiple_victims", &multiple_victims_flag())?
        .normalize_flag("Shooting_type", &fatality_flag())?;
    let shootings = normalized
        .filter_eq("multiple_victims", &Value::Int(1))?
        .filter_eq("Gender", &Value::text("Female"))?
        .fill_null(&FILLED_COLUMNS, &Value::text(UNKNOWN))?
        .project(&SHOOTING_COLUMNS)?
        .with_row_number("incident_id")?;
    tracing::info!(
        raw = raw.len(),
        kept = shootings.len(),
        "Shooting records transformed"
    );
    Ok(shootings)
}
