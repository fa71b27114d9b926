use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adjacency::PairKey;
use crate::config::{InputConfig, PushPolicy};
use crate::error::DataError;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// One game from the match log. `row` is the line number in the source file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub row: usize,
    pub date: NaiveDateTime,
    pub team_a: String,
    pub team_b: String,
    pub margin: f64,
}

impl MatchRecord {
    pub fn new(row: usize, date: NaiveDateTime, team_a: &str, team_b: &str, margin: f64) -> Self {
        Self {
            row,
            date,
            team_a: team_a.to_string(),
            team_b: team_b.to_string(),
            margin,
        }
    }

    /// Ground truth edge: 1 when the game went over, 0 otherwise (pushes included).
    pub fn edge(&self) -> u8 {
        u8::from(self.margin > 0.0)
    }

    pub fn is_push(&self) -> bool {
        self.margin == 0.0
    }

    pub fn is_self_play(&self) -> bool {
        self.team_a == self.team_b
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.team_a, &self.team_b)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrepareSummary {
    pub rows_in: usize,
    pub rows_out: usize,
    pub pushes: usize,
    pub pushes_dropped: usize,
    pub mirrored_dropped: usize,
    pub self_play: usize,
}

pub fn load_match_log(path: &Path, cfg: &InputConfig) -> Result<Vec<MatchRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open match log {}", path.display()))?;
    let rows = read_match_log(file, cfg)
        .with_context(|| format!("read match log {}", path.display()))?;
    info!(path = %path.display(), rows = rows.len(), "loaded match log");
    Ok(rows)
}

pub fn read_match_log<R: Read>(reader: R, cfg: &InputConfig) -> Result<Vec<MatchRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = rdr.headers().context("read match log header")?.clone();

    let column = |name: &str| -> Result<usize, DataError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::MissingColumn {
                source_name: "match log".to_string(),
                column: name.to_string(),
            })
    };
    let date_idx = column(&cfg.date_column)?;
    let team_idx = column(&cfg.team_column)?;
    let opp_idx = column(&cfg.opponent_column)?;
    let margin_idx = column(&cfg.margin_column)?;

    let mut out = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.context("read match log row")?;
        let row = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 2);
        let cell = |i: usize| record.get(i).unwrap_or("").trim();

        let raw_date = cell(date_idx);
        let date = parse_date(raw_date).ok_or_else(|| DataError::InvalidDate {
            row,
            value: raw_date.to_string(),
        })?;
        let team_a = cell(team_idx);
        let team_b = cell(opp_idx);
        if team_a.is_empty() || team_b.is_empty() {
            return Err(DataError::EmptyTeam { row }.into());
        }
        let raw_margin = cell(margin_idx);
        let margin = parse_margin(raw_margin).ok_or_else(|| DataError::InvalidMargin {
            row,
            value: raw_margin.to_string(),
        })?;

        out.push(MatchRecord::new(row, date, team_a, team_b, margin));
    }
    Ok(out)
}

pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Parses a margin cell. Blank, non-numeric and non-finite values are rejected.
pub fn parse_margin(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Applies the push policy and optional mirrored-row removal. Input order is preserved.
pub fn prepare_matches(
    records: Vec<MatchRecord>,
    cfg: &InputConfig,
) -> (Vec<MatchRecord>, PrepareSummary) {
    let mut summary = PrepareSummary {
        rows_in: records.len(),
        ..PrepareSummary::default()
    };
    let mut seen: HashSet<(NaiveDate, PairKey)> = HashSet::new();
    let mut out = Vec::with_capacity(records.len());

    for m in records {
        if m.is_self_play() {
            summary.self_play += 1;
            warn!(row = m.row, team = %m.team_a, "match log row has a team playing itself");
        }
        if m.is_push() {
            summary.pushes += 1;
            if cfg.push_policy == PushPolicy::Drop {
                summary.pushes_dropped += 1;
                continue;
            }
        }
        if cfg.dedupe_mirrored_rows && !seen.insert((m.date.date(), m.pair_key())) {
            summary.mirrored_dropped += 1;
            debug!(row = m.row, "dropping mirrored match row");
            continue;
        }
        out.push(m);
    }

    summary.rows_out = out.len();
    if summary.pushes > 0 {
        info!(
            pushes = summary.pushes,
            dropped = summary.pushes_dropped,
            policy = ?cfg.push_policy,
            "zero-margin results in match log"
        );
    }
    (out, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> InputConfig {
        InputConfig::default()
    }

    #[test]
    fn parses_supported_date_formats() {
        assert!(parse_date("2023-11-02").is_some());
        assert!(parse_date("11/02/2023").is_some());
        assert!(parse_date("2023-11-02 19:30:00").is_some());
        assert!(parse_date("2023-11-02T19:30:00").is_some());
        assert!(parse_date("Nov 2").is_none());
        assert_eq!(parse_date("11/02/2023"), parse_date("2023-11-02"));
    }

    #[test]
    fn margin_parsing_rejects_junk() {
        assert_eq!(parse_margin("+3.5"), Some(3.5));
        assert_eq!(parse_margin(" -2 "), Some(-2.0));
        assert_eq!(parse_margin("0"), Some(0.0));
        assert_eq!(parse_margin(""), None);
        assert_eq!(parse_margin("n/a"), None);
        assert_eq!(parse_margin("NaN"), None);
    }

    #[test]
    fn edge_is_strictly_positive_margin() {
        let date = parse_date("2024-01-01").unwrap();
        assert_eq!(MatchRecord::new(2, date, "A", "B", 0.5).edge(), 1);
        assert_eq!(MatchRecord::new(2, date, "A", "B", 0.0).edge(), 0);
        assert_eq!(MatchRecord::new(2, date, "A", "B", -7.0).edge(), 0);
    }

    #[test]
    fn reads_rows_with_line_numbers() {
        let raw = "Date,Team,Opponent,Margin\n2024-01-01,BOS,MIA,4\n2024-01-03, MIA ,BOS,-1.5\n";
        let rows = read_match_log(raw.as_bytes(), &cfg()).expect("should parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row, 2);
        assert_eq!(rows[1].team_a, "MIA");
        assert_eq!(rows[1].margin, -1.5);
    }

    #[test]
    fn bad_margin_is_fatal_with_row() {
        let raw = "Date,Team,Opponent,Margin\n2024-01-01,BOS,MIA,4\n2024-01-03,MIA,BOS,\n";
        let err = read_match_log(raw.as_bytes(), &cfg()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DataError>(),
            Some(&DataError::InvalidMargin {
                row: 3,
                value: String::new()
            })
        );
    }

    #[test]
    fn missing_column_is_fatal() {
        let raw = "Date,Team,Opp,Margin\n";
        let err = read_match_log(raw.as_bytes(), &cfg()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::MissingColumn { column, .. }) if column == "Opponent"
        ));
    }

    #[test]
    fn push_policy_and_mirror_dedupe() {
        let d1 = parse_date("2024-01-01").unwrap();
        let d2 = parse_date("2024-01-05").unwrap();
        let rows = vec![
            MatchRecord::new(2, d1, "A", "B", 3.0),
            MatchRecord::new(3, d1, "B", "A", 3.0),
            MatchRecord::new(4, d2, "A", "C", 0.0),
        ];

        let (kept, summary) = prepare_matches(rows.clone(), &cfg());
        assert_eq!(kept.len(), 3);
        assert_eq!(summary.pushes, 1);
        assert_eq!(summary.pushes_dropped, 0);

        let mut c = cfg();
        c.push_policy = PushPolicy::Drop;
        c.dedupe_mirrored_rows = true;
        let (kept, summary) = prepare_matches(rows, &c);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].row, 2);
        assert_eq!(summary.mirrored_dropped, 1);
        assert_eq!(summary.pushes_dropped, 1);
        assert_eq!(summary.rows_out, 1);
    }
}
