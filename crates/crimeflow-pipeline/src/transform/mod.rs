//! Transform chains. The shaping logic lives in plain functions over [`Dataset`]s; a
//! [`TransformTask`] loads the input artifacts, applies one of them and saves the result.

pub mod crimes;
pub mod shootings;

use async_trait::async_trait;

use crimeflow_frame::Dataset;
use crimeflow_types::{PipelineError, Result};

use crate::task::{Resource, Task, TaskContext};

/// Artifact keys shared by the Boston tasks.
pub mod keys {
    pub const SHOOTINGS_RAW: &str = "shootings_raw";
    pub const CRIMES_RAW: &str = "crimes_raw";
    pub const WEATHER_RAW: &str = "weather_raw";
    pub const SHOOTINGS: &str = "shootings";
    pub const CRIMES_CLEAN: &str = "crimes_clean";
    pub const OFFENSE: &str = "offense";
    pub const LOCATION: &str = "location";
    pub const DISTRICT: &str = "district";
    pub const CRIMES_WEATHER: &str = "crimes_weather";
}

pub type TransformFn = fn(&[Dataset]) -> Result<Dataset>;

/// Reads `inputs` (in order), applies `apply`, writes `output`.
pub struct TransformTask {
    inputs: Vec<String>,
    output: String,
    apply: TransformFn,
}

impl TransformTask {
    pub fn new(inputs: &[&str], output: impl Into<String>, apply: TransformFn) -> Self {
        Self {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: output.into(),
            apply,
        }
    }

    pub fn clean_crimes() -> Self {
        Self::new(&[keys::CRIMES_RAW], keys::CRIMES_CLEAN, |d| crimes::clean_crimes(&d[0]))
    }

    pub fn offense_dimension() -> Self {
        Self::new(&[keys::CRIMES_CLEAN], keys::OFFENSE, |d| crimes::offense_dimension(&d[0]))
    }

    pub fn location_dimension() -> Self {
        Self::new(&[keys::CRIMES_CLEAN], keys::LOCATION, |d| crimes::location_dimension(&d[0]))
    }

    pub fn district_dimension() -> Self {
        Self::new(&[keys::CRIMES_CLEAN], keys::DISTRICT, |d| crimes::district_dimension(&d[0]))
    }

    pub fn crimes_weather() -> Self {
        Self::new(
            &[keys::CRIMES_CLEAN, keys::WEATHER_RAW],
            keys::CRIMES_WEATHER,
            |d| crimes::crimes_weather_fact(&d[0], &d[1]),
        )
    }

    pub fn shootings() -> Self {
        Self::new(&[keys::SHOOTINGS_RAW], keys::SHOOTINGS, |d| {
            shootings::transform_shootings(&d[0])
        })
    }
}

#[async_trait]
impl Task for TransformTask {
    fn kind(&self) -> &str {
        "transform"
    }

    fn reads(&self) -> Vec<Resource> {
        self.inputs.iter().map(Resource::artifact).collect()
    }

    fn writes(&self) -> Vec<Resource> {
        vec![Resource::artifact(&self.output)]
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for key in &self.inputs {
            inputs.push(ctx.load_dataset(key).await?);
        }
        let apply = self.apply;
        let output = tokio::task::spawn_blocking(move || apply(&inputs))
            .await
            .map_err(|e| PipelineError::Other(format!("transform aborted: {e}")))??;
        ctx.save_dataset(&self.output, &output).await?;
        Ok(())
    }
}
