//! The Boston crimes pipeline: three extracts, the shooting and crime transform chains, five
//! table loads and the constraint phase.

use std::sync::Arc;

use crimeflow_types::Result;

use crate::config::PipelineConfig;
use crate::extract::{self, ExtractTask, Extractor};
use crate::graph::TaskGraph;
use crate::load::{ConstrainTask, LoadTask, Loader, SqliteLoader};
use crate::transform::{keys, TransformTask};

/// `(table, artifact)` pairs, in load order.
pub const TABLES: [(&str, &str); 5] = [
    ("shooting", keys::SHOOTINGS),
    ("offense", keys::OFFENSE),
    ("location", keys::LOCATION),
    ("district", keys::DISTRICT),
    ("crimes_weather", keys::CRIMES_WEATHER),
];

/// The three raw sources.
pub struct BostonSources {
    pub shootings: Box<dyn Extractor>,
    pub crimes: Box<dyn Extractor>,
    pub weather: Box<dyn Extractor>,
}

impl BostonSources {
    pub fn from_config(config: &PipelineConfig, client: &reqwest::Client) -> Self {
        Self {
            shootings: extract::from_config(&config.sources.shootings, client),
            crimes: extract::from_config(&config.sources.crimes, client),
            weather: extract::from_config(&config.sources.weather, client),
        }
    }
}

fn load_id(table: &str) -> String {
    format!("load_{table}")
}

fn constrain_id(table: &str) -> String {
    format!("constrain_{table}")
}

/// Build the task graph. Declaration order doubles as the tie-break of the execution order.
pub fn boston_graph(
    name: impl Into<String>,
    sources: BostonSources,
    loader: Arc<dyn Loader>,
) -> Result<TaskGraph> {
    let mut builder = TaskGraph::builder(name)
        .task(
            "extract_shootings",
            ExtractTask::new(keys::SHOOTINGS_RAW, sources.shootings),
        )
        .task("extract_crimes", ExtractTask::new(keys::CRIMES_RAW, sources.crimes))
        .task("extract_weather", ExtractTask::new(keys::WEATHER_RAW, sources.weather))
        .task("transform_shootings", TransformTask::shootings())
        .task("clean_crimes", TransformTask::clean_crimes())
        .task("derive_offense", TransformTask::offense_dimension())
        .task("derive_location", TransformTask::location_dimension())
        .task("derive_district", TransformTask::district_dimension())
        .task("build_crimes_weather", TransformTask::crimes_weather());

    for (table, artifact) in TABLES {
        builder = builder.task(load_id(table), LoadTask::new(artifact, table, loader.clone()));
    }
    for (table, _) in TABLES {
        builder = builder.task(constrain_id(table), ConstrainTask::new(table, loader.clone()));
    }

    builder = builder
        .chain(&["extract_shootings", "transform_shootings", "load_shooting"])
        .chain(&["extract_crimes", "clean_crimes", "derive_offense", "load_offense"])
        .chain(&["clean_crimes", "derive_location", "load_location"])
        .chain(&["clean_crimes", "derive_district", "load_district"])
        .chain(&["clean_crimes", "build_crimes_weather", "load_crimes_weather"])
        .edge("extract_weather", "build_crimes_weather");

    for (loaded, _) in TABLES {
        for (constrained, _) in TABLES {
            builder = builder.edge(load_id(loaded), constrain_id(constrained));
        }
    }
    builder.build()
}

/// Build the graph `config` describes, loading into the SQLite database at
/// `config.database_url`. The database is not opened until the first load runs.
pub fn graph_from_config(config: &PipelineConfig) -> Result<TaskGraph> {
    let client = reqwest::Client::new();
    let loader = SqliteLoader::connect_lazy(&config.database_url)?;
    boston_graph(
        config.name.clone(),
        BostonSources::from_config(config, &client),
        Arc::new(loader),
    )
}
