//! End-to-end runs of the Boston pipeline from local CSV files into a SQLite database.

use std::path::{Path, PathBuf};

use crimeflow_frame::Encoding;
use crimeflow_pipeline::{
    graph_from_config, PipelineConfig, PipelineExecutor, RetryConfig, SourceConfig, SourcesConfig,
    SqliteLoader,
};
use crimeflow_types::{RunId, RunStatus, TaskStatus};

const SHOOTINGS: &str = "\
_id,incident_num,shooting_date,district,shooting_type_v2,victim_gender,victim_race,victim_ethnicity_NIBRS,multi_victim
1,I001,2022-06-01 01:00:00+00,B2,Fatal,Female,Black or African American,Not Hispanic or Latinx,t
2,I002,2022-06-02 02:00:00+00,C11,Non-Fatal,Male,White,Hispanic or Latinx,t
3,I003,2022-06-03 03:00:00+00,,Non-Fatal,Female,,,T
4,I004,2022-06-04 04:00:00+00,B3,Fatal,Female,Asian,Not Hispanic or Latinx,f
";

const CRIMES: &str = "\
INCIDENT_NUMBER,OFFENSE_CODE,OFFENSE_CODE_GROUP,OFFENSE_DESCRIPTION,DISTRICT,REPORTING_AREA,SHOOTING,OCCURRED_ON_DATE,YEAR,MONTH,DAY_OF_WEEK,HOUR,UCR_PART,STREET,Lat,Long,Location
I1,413,Aggravated Assault,ASSAULT - AGGRAVATED - BATTERY,B2,808,Y,2018-09-02 13:00:00,2018,9,Sunday,13,Part One,LINCOLN ST,42.357,-71.139,\"(42.357, -71.139)\"
I2,1402,Vandalism,VANDALISM,C11,347,,2018-09-02 08:00:00,2018,9,Sunday,8,Part Two,HECLA ST,42.306,-71.060,\"(42.306, -71.060)\"
I3,413,Aggravated Assault,ASSAULT - AGGRAVATED,B2,151,Y,2018-09-03 19:27:00,2018,9,Monday,19,Part One,CAZENOVE ST,42.346,-71.072,\"(42.346, -71.072)\"
I1,413,Aggravated Assault,DUPLICATE,B2,808,,2018-09-02 13:00:00,2018,9,Sunday,13,Part One,LINCOLN ST,42.357,-71.139,\"(42.357, -71.139)\"
I4,3115,Investigate Person,NO COORDS,D4,620,,2018-09-03 10:00:00,2018,9,Monday,10,Part Three,WASHINGTON ST,-1,-1,\"(-1.00000000, -1.00000000)\"
I5,3301,Verbal Disputes,VERBAL DISPUTE,E13,583,Y,2018-09-06 22:00:00,2018,9,Thursday,22,Part Three,CENTRE ST,42.310,-71.110,\"(42.310, -71.110)\"
";

const WEATHER: &str = "\
time,tavg,tmin,tmax,prcp,wdir,wspd,pres
2018-09-02,22.1,18.3,26.7,0.0,180,11.2,1015.2
2018-09-03,24.0,20.0,28.9,3.1,200,9.4,1012.8
2018-09-04,21.0,17.0,25.0,,210,8.0,1010.0
";

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn config(dir: &Path, crimes: &str) -> PipelineConfig {
    let file = |name: &str, contents: &str, encoding| SourceConfig::File {
        path: write(dir, name, contents),
        encoding,
    };
    PipelineConfig {
        name: "boston_crimes_it".into(),
        work_dir: dir.join("runs"),
        database_url: format!("sqlite://{}", dir.join("crimes.db").display()),
        max_parallel: 3,
        retry: RetryConfig {
            retries: 1,
            delay_secs: 0,
            ..RetryConfig::default()
        },
        sources: SourcesConfig {
            shootings: file("shootings.csv", SHOOTINGS, Encoding::Latin1),
            crimes: file("crime.csv", crimes, Encoding::Latin1),
            weather: file("weather.csv", WEATHER, Encoding::Utf8),
        },
    }
}

async fn run(config: &PipelineConfig, run_id: &str) -> crimeflow_pipeline::RunReport {
    let graph = graph_from_config(config).unwrap();
    PipelineExecutor::new(config.engine_config())
        .run(&graph, RunId::new(run_id).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn full_run_populates_every_table() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), CRIMES);
    let report = run(&config, "it-1").await;

    assert!(report.succeeded(), "run failed: {:?}", report.failed_task);
    assert_eq!(report.tasks.len(), 19);
    assert!(report.blocked.is_empty());
    for task in &report.tasks {
        assert_eq!(task.status, TaskStatus::Succeeded, "{}", task.task_id);
    }

    let db = SqliteLoader::connect(&config.database_url).await.unwrap();
    assert_eq!(db.row_count("shooting").await.unwrap(), 2);
    assert_eq!(db.row_count("offense").await.unwrap(), 3);
    assert_eq!(db.row_count("location").await.unwrap(), 4);
    // C11 and E13 both occur once and share key 1; the first one wins.
    assert_eq!(db.row_count("district").await.unwrap(), 2);

    let fact: Vec<(i64, String, String, i64, Option<f64>)> = sqlx::query_as(
        "SELECT CRIME_ID, INCIDENT_NUMBER, Occurred_on_date, DISTRICT_KEY, AVG_Temp \
         FROM crimes_weather ORDER BY CRIME_ID",
    )
    .fetch_all(db.pool())
    .await
    .unwrap();
    assert_eq!(
        fact,
        vec![
            (1, "I1".into(), "2018-09-02".into(), 2, Some(22.1)),
            (2, "I3".into(), "2018-09-03".into(), 2, Some(24.0)),
        ]
    );

    let shootings: Vec<(i64, String, Option<i64>, String)> = sqlx::query_as(
        "SELECT incident_ID, incident_num, Shooting_type, district FROM shooting ORDER BY incident_ID",
    )
    .fetch_all(db.pool())
    .await
    .unwrap();
    assert_eq!(
        shootings,
        vec![
            (1, "I001".into(), Some(1), "B2".into()),
            (2, "I003".into(), Some(0), "unknown".into()),
        ]
    );

    let indexes: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'index'")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(indexes, 7);

    let artifact_dir = config.work_dir.join("it-1");
    for key in ["shootings_raw", "crimes_clean", "offense", "crimes_weather"] {
        assert!(artifact_dir.join(format!("{key}.csv")).exists(), "{key}");
    }
}

#[tokio::test]
async fn schema_error_fails_the_run_and_blocks_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let crimes = CRIMES.replacen("UCR_PART", "UCR", 1);
    let config = config(dir.path(), &crimes);
    let report = run(&config, "it-2").await;

    assert_eq!(report.status, RunStatus::Failed);
    let failed = report.failed_task.as_ref().unwrap();
    assert_eq!(failed.task_id, "clean_crimes");
    assert!(failed.error.contains("UCR_PART"));
    // Missing columns are not retried.
    assert_eq!(report.task("clean_crimes").unwrap().attempts, 1);

    for blocked in ["derive_offense", "build_crimes_weather", "load_district", "constrain_shooting"] {
        assert!(report.blocked.iter().any(|b| b == blocked), "{blocked}");
        assert_eq!(report.history(blocked), vec![TaskStatus::Pending]);
    }
    // The shooting branch is independent of the crime lineage.
    assert_eq!(
        report.task("load_shooting").unwrap().status,
        TaskStatus::Succeeded
    );
}

#[tokio::test]
async fn unavailable_source_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), CRIMES);
    config.sources.weather = SourceConfig::File {
        path: dir.path().join("missing.csv"),
        encoding: Encoding::Utf8,
    };
    let report = run(&config, "it-3").await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_task.as_ref().unwrap().task_id, "extract_weather");
    assert_eq!(
        report.history("extract_weather"),
        vec![
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::UpForRetry,
            TaskStatus::Running,
            TaskStatus::Failed,
        ]
    );
}
