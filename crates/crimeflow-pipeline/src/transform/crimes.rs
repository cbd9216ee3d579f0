//! Crime lineage: incident records are cleaned once, then fanned out into the offense, location
//! and district dimensions and the crimes-weather fact table.

use crimeflow_frame::{Dataset, FlagMapping, Value};
use crimeflow_types::Result;

/// Columns kept from the raw incident export.
pub const CRIME_COLUMNS: [&str; 17] = [
    "INCIDENT_NUMBER",
    "OCCURRED_ON_DATE",
    "OFFENSE_CODE",
    "OFFENSE_CODE_GROUP",
    "OFFENSE_DESCRIPTION",
    "DISTRICT",
    "REPORTING_AREA",
    "SHOOTING",
    "YEAR",
    "MONTH",
    "DAY_OF_WEEK",
    "HOUR",
    "UCR_PART",
    "STREET",
    "Lat",
    "Long",
    "Location",
];

/// Rows missing any of these, or carrying the `-1` placeholder, are unusable.
const REQUIRED_LOCATION_COLUMNS: [&str; 5] = ["INCIDENT_NUMBER", "Lat", "Long", "Location", "STREET"];
const OPTIONAL_COORDINATE_COLUMNS: [&str; 2] = ["Latitude", "Longitude"];
const MISSING_SENTINEL: f64 = -1.0;

pub const OFFENSE_COLUMNS: [&str; 2] = ["OFFENSE_CODE", "OFFENSE_CODE_GROUP"];
pub const LOCATION_COLUMNS: [&str; 4] = ["REPORTING_AREA", "Lat", "Long", "Location"];
pub const DISTRICT_COLUMNS: [&str; 2] = ["DISTRICT_KEY", "DISTRICT"];

pub const WEATHER_RENAMES: [(&str, &str); 5] = [
    ("time", "OCCURRED_ON_DATE"),
    ("tavg", "AVG_Temp"),
    ("tmin", "MIN_Temp"),
    ("tmax", "MAX_Temp"),
    ("prcp", "Precipitation"),
];

const FACT_DROPPED_COLUMNS: [&str; 9] = [
    "YEAR",
    "MONTH",
    "DAY_OF_WEEK",
    "Lat",
    "Long",
    "Location",
    "DISTRICT",
    "wdir",
    "OFFENSE_CODE_GROUP",
];

pub fn shooting_flag() -> FlagMapping {
    FlagMapping::closed([("Y", 1)], 0)
}

/// Drop rows with unusable location data and repeated incident numbers (first one wins).
pub fn clean(crimes: &Dataset) -> Result<Dataset> {
    crimes
        .drop_null_or_sentinel(&REQUIRED_LOCATION_COLUMNS, MISSING_SENTINEL)?
        .drop_sentinel_where_present(&OPTIONAL_COORDINATE_COLUMNS, MISSING_SENTINEL)?
        .dedup_on(&["INCIDENT_NUMBER"])
}

/// Raw incidents → `crimes_clean`: whitelist projection, `SHOOTING` as 0/1 and cleaning.
pub fn clean_crimes(raw: &Dataset) -> Result<Dataset> {
    let projected = raw
        .project(&CRIME_COLUMNS)?
        .normalize_flag("SHOOTING", &shooting_flag())?;
    let cleaned = clean(&projected)?;
    tracing::info!(
        raw = raw.len(),
        clean = cleaned.len(),
        "Crime records cleaned"
    );
    Ok(cleaned)
}

/// Incidents with a reporting area, carrying `DISTRICT_KEY`. The key counts only these rows, so
/// the district dimension and the fact table agree on it.
pub fn reported_crimes(clean: &Dataset) -> Result<Dataset> {
    clean
        .drop_blank("REPORTING_AREA")?
        .with_frequency_key("DISTRICT", "DISTRICT_KEY")
}

/// Offense codes are taken before blank reporting areas are dropped.
pub fn offense_dimension(clean: &Dataset) -> Result<Dataset> {
    clean.distinct_by_leading(&OFFENSE_COLUMNS)
}

pub fn location_dimension(clean: &Dataset) -> Result<Dataset> {
    clean
        .drop_blank("REPORTING_AREA")?
        .distinct_by_leading(&LOCATION_COLUMNS)
}

pub fn district_dimension(clean: &Dataset) -> Result<Dataset> {
    reported_crimes(clean)?.distinct_by_leading(&DISTRICT_COLUMNS)
}

/// Shooting incidents joined with the weather of their day, keyed by `Crime_ID`.
pub fn crimes_weather_fact(clean: &Dataset, weather_raw: &Dataset) -> Result<Dataset> {
    let crimes = reported_crimes(clean)?.normalize_dates("OCCURRED_ON_DATE")?;
    let weather = weather_raw
        .normalize_dates("time")?
        .rename(&WEATHER_RENAMES)?;
    let joined = weather.inner_join(&crimes, "OCCURRED_ON_DATE")?;
    let fact = joined
        .filter_eq("SHOOTING", &Value::Int(1))?
        .drop_columns(&FACT_DROPPED_COLUMNS)?
        .with_row_number("Crime_ID")?;
    tracing::info!(
        crimes = crimes.len(),
        weather_days = weather.len(),
        joined = joined.len(),
        shootings = fact.len(),
        "Crimes-weather fact built"
    );
    Ok(fact)
}
