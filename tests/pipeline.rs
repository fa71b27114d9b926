use std::fs;
use std::path::{Path, PathBuf};

use matchnet::clustering::CoordinateSource;
use matchnet::config::AppConfig;
use matchnet::model::read_payload;
use matchnet::pipeline::{self, FitSource};

fn fixture_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path
}

fn fixture_config(out: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.input.match_log = fixture_path("matches.csv");
    cfg.input.covariates = fixture_path("covariates.csv");
    cfg.output.dir = out.to_path_buf();
    cfg.sampler.chains = 2;
    cfg.sampler.warmup = 150;
    cfg.sampler.samples = 100;
    cfg
}

#[test]
fn payload_only_run_writes_model_input() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fixture_config(dir.path());

    let summary = pipeline::run(&cfg, &FitSource::Native, true).unwrap();
    assert_eq!(summary.teams, 4);
    assert_eq!(summary.meetings, 3);
    assert_eq!(summary.edges, 3);
    assert_eq!(summary.observed_pairs, 6);
    assert!(summary.fit_source.is_none());
    assert!(!cfg.output.report_path().exists());

    let raw = fs::read_to_string(cfg.output.payload_path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    for key in ["N", "K", "P", "Y", "X", "sigma_lambda_shape", "tau_u_rate", "teams"] {
        assert!(json.get(key).is_some(), "payload missing {key}");
    }
    assert_eq!(json["N"], 4);
    assert_eq!(json["P"], 2);

    let payload = read_payload(&cfg.output.payload_path()).unwrap();
    assert_eq!(payload.teams, vec!["Bears", "Cats", "Dogs", "Eagles"]);
    assert_eq!(payload.y[0][1], 1);
    assert_eq!(payload.y[1][0], 1);
}

#[test]
fn later_meeting_can_be_modelled() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = fixture_config(dir.path());
    cfg.model.meeting = 2;
    let summary = pipeline::run(&cfg, &FitSource::Native, true).unwrap();
    assert_eq!(summary.edges, 0);
    assert_eq!(summary.observed_pairs, 1);

    cfg.model.meeting = 4;
    assert!(pipeline::run(&cfg, &FitSource::Native, true).is_err());
}

#[test]
fn native_fit_produces_report_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fixture_config(dir.path());

    let summary = pipeline::run(&cfg, &FitSource::Native, false).unwrap();
    assert_eq!(summary.fit_source.as_deref(), Some("native"));
    assert_eq!(summary.chains, 2);
    assert_eq!(summary.draws_per_chain, 100);
    assert_eq!(summary.beta_means.len(), summary.covariates.len());
    assert!(summary.beta_means.iter().all(|b| b.is_finite()));
    assert_eq!(summary.scored_pairs, 6);
    assert!(summary.brier.unwrap() <= 1.0);
    assert_eq!(
        summary.coordinate_source,
        Some(CoordinateSource::LatentEigenvectors)
    );
    assert!(summary.clusters >= 1 && summary.clusters <= 3);

    assert!(cfg.output.report_path().exists());
    let raw = fs::read_to_string(cfg.output.summary_path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["teams"], 4);
    assert_eq!(json["fit_source"], "native");
    assert_eq!(json["beta_means"].as_array().map(Vec::len), Some(2));
}

#[test]
fn external_draws_are_evaluated() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fixture_config(dir.path());
    let source = FitSource::Draws(vec![
        fixture_path("chain_1.csv"),
        fixture_path("chain_2.csv"),
    ]);

    let summary = pipeline::run(&cfg, &source, false).unwrap();
    assert_eq!(summary.fit_source.as_deref(), Some("draws"));
    assert_eq!(summary.chains, 2);
    assert_eq!(summary.draws_per_chain, 8);
    assert_eq!(summary.scored_pairs, 6);
    assert!(summary.accuracy.is_some());
    assert_eq!(summary.beta_means.len(), 2);
    assert_eq!(
        summary.coordinate_source,
        Some(CoordinateSource::LatentEigenvectors)
    );
    assert!(cfg.output.report_path().exists());
}

#[test]
fn missing_draws_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fixture_config(dir.path());
    let source = FitSource::Draws(vec![fixture_path("no_such_chain.csv")]);
    assert!(pipeline::run(&cfg, &source, false).is_err());
}
