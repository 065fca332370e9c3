use crate::db;
use crate::error::{CalcResult, ResultError};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const SCALE_SETTINGS_KEY: &str = "grading.scale";

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub min_percent: f64,
    pub max_percent: f64,
    pub grade_label: String,
}

/// Bands cover [0, 100] without gaps or overlaps. Each band is
/// `[min, max)` except the top band, which also includes 100.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GradingScale {
    bands: Vec<GradeBand>,
}

impl GradingScale {
    pub fn new(mut bands: Vec<GradeBand>) -> CalcResult<Self> {
        if bands.is_empty() {
            return Err(ResultError::configuration("grading scale has no bands"));
        }
        for b in &bands {
            if !b.min_percent.is_finite()
                || !b.max_percent.is_finite()
                || b.min_percent >= b.max_percent
                || b.grade_label.trim().is_empty()
            {
                return Err(ResultError::configuration("invalid grade band")
                    .with_details(json!(b)));
            }
        }
        bands.sort_by(|a, b| a.min_percent.total_cmp(&b.min_percent));

        if bands[0].min_percent.abs() > EPSILON {
            return Err(ResultError::configuration("grading scale must start at 0")
                .with_details(json!(bands[0])));
        }
        for pair in bands.windows(2) {
            let gap = pair[1].min_percent - pair[0].max_percent;
            if gap.abs() > EPSILON {
                let message = if gap > 0.0 {
                    "grading scale has a gap"
                } else {
                    "grading scale bands overlap"
                };
                return Err(ResultError::configuration(message)
                    .with_details(json!({ "lower": pair[0], "upper": pair[1] })));
            }
        }
        let top = &bands[bands.len() - 1];
        if (top.max_percent - 100.0).abs() > EPSILON {
            return Err(ResultError::configuration("grading scale must end at 100")
                .with_details(json!(top)));
        }
        Ok(Self { bands })
    }

    /// Nine-point scale used when a workspace has no configured scale.
    pub fn default_scale() -> Self {
        let bands = [
            (0.0, 21.0, "E2"),
            (21.0, 33.0, "E1"),
            (33.0, 41.0, "D"),
            (41.0, 51.0, "C2"),
            (51.0, 61.0, "C1"),
            (61.0, 71.0, "B2"),
            (71.0, 81.0, "B1"),
            (81.0, 91.0, "A2"),
            (91.0, 100.0, "A1"),
        ]
        .into_iter()
        .map(|(min, max, label)| GradeBand {
            min_percent: min,
            max_percent: max,
            grade_label: label.to_string(),
        })
        .collect();
        Self { bands }
    }

    pub fn bands(&self) -> &[GradeBand] {
        &self.bands
    }

    pub fn grade_for(&self, percent: f64) -> CalcResult<&str> {
        let last = self.bands.len().saturating_sub(1);
        for (i, band) in self.bands.iter().enumerate() {
            let lower_ok = if i == 0 {
                percent >= band.min_percent - EPSILON
            } else {
                percent >= band.min_percent
            };
            let upper_ok = if i == last {
                percent <= band.max_percent + EPSILON
            } else {
                percent < band.max_percent
            };
            if lower_ok && upper_ok {
                return Ok(&band.grade_label);
            }
        }
        Err(ResultError::configuration("no grade band matches percentage")
            .with_details(json!({ "percent": percent })))
    }
}

pub fn load_scale(conn: &Connection) -> CalcResult<GradingScale> {
    let Some(raw) = db::settings_get_json(conn, SCALE_SETTINGS_KEY)? else {
        return Ok(GradingScale::default_scale());
    };
    let bands: Vec<GradeBand> = serde_json::from_str(&raw).map_err(|e| {
        ResultError::configuration("stored grading scale is malformed")
            .with_details(json!({ "error": e.to_string() }))
    })?;
    GradingScale::new(bands)
}

pub fn save_scale(conn: &Connection, scale: &GradingScale) -> CalcResult<()> {
    db::settings_set_json(conn, SCALE_SETTINGS_KEY, &json!(scale.bands()))?;
    Ok(())
}
