use super::aggregate::{AggregateResult, StudentResult, SubjectComponentGroup};
use super::normalize::MarkValue;
use crate::error::{CalcResult, ResultError};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Slack applied before rounding so binary noise such as
/// `28.999999999` does not drop a whole unit.
const ROUNDING_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Actual,
    Weighted,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    #[default]
    None,
    Floor,
    #[serde(alias = "ceil")]
    Ceiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberFormat {
    decimal_points: u8,
    rounding: Rounding,
}

impl NumberFormat {
    pub fn new(decimal_points: u8, rounding: Rounding) -> CalcResult<Self> {
        if decimal_points > 3 {
            return Err(ResultError::validation("decimalPoints must be between 0 and 3")
                .with_details(json!({ "decimalPoints": decimal_points })));
        }
        Ok(Self {
            decimal_points,
            rounding,
        })
    }

    pub fn decimal_points(&self) -> u8 {
        self.decimal_points
    }

    pub fn rounding(&self) -> Rounding {
        self.rounding
    }

    pub fn render(&self, value: f64) -> String {
        let dp = usize::from(self.decimal_points);
        let factor = 10_f64.powi(i32::from(self.decimal_points));
        let shown = match self.rounding {
            // Half-up, so 80.5 shows as 81 rather than the even neighbour.
            Rounding::None => (value * factor + 0.5 + ROUNDING_EPSILON).floor() / factor,
            Rounding::Floor => (value * factor + ROUNDING_EPSILON).floor() / factor,
            Rounding::Ceiling => (value * factor - ROUNDING_EPSILON).ceil() / factor,
        };
        // `+ 0.0` folds -0.0 into 0.0 so nothing renders as "-0".
        format!("{:.*}", dp, shown + 0.0)
    }

    pub fn render_opt(&self, value: Option<f64>) -> String {
        value.map(|v| self.render(v)).unwrap_or_default()
    }
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self {
            decimal_points: 2,
            rounding: Rounding::None,
        }
    }
}

/// Request-scoped view options. None of them influence computed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayPreferences {
    pub display_mode: DisplayMode,
    pub number: NumberFormat,
    pub include_sum: bool,
    pub include_grades: bool,
    pub students_per_page: usize,
}

impl DisplayPreferences {
    pub const DEFAULT_STUDENTS_PER_PAGE: usize = 25;

    pub fn new(
        display_mode: DisplayMode,
        number: NumberFormat,
        include_sum: bool,
        include_grades: bool,
        students_per_page: usize,
    ) -> CalcResult<Self> {
        if students_per_page == 0 {
            return Err(ResultError::validation("studentsPerPage must be positive"));
        }
        Ok(Self {
            display_mode,
            number,
            include_sum,
            include_grades,
            students_per_page,
        })
    }

    fn pair(&self, actual: Option<f64>, weighted: Option<f64>) -> String {
        match self.display_mode {
            DisplayMode::Actual => self.number.render_opt(actual),
            DisplayMode::Weighted => self.number.render_opt(weighted),
            DisplayMode::Both => {
                if actual.is_none() && weighted.is_none() {
                    return String::new();
                }
                format!(
                    "{} ({})",
                    self.number.render_opt(actual),
                    self.number.render_opt(weighted)
                )
            }
        }
    }

    fn grade_pair(&self, raw: Option<&str>, weighted: Option<&str>) -> String {
        match self.display_mode {
            DisplayMode::Actual => raw.unwrap_or_default().to_string(),
            DisplayMode::Weighted => weighted.unwrap_or_default().to_string(),
            DisplayMode::Both => {
                if raw.is_none() && weighted.is_none() {
                    return String::new();
                }
                format!(
                    "{} ({})",
                    raw.unwrap_or_default(),
                    weighted.unwrap_or_default()
                )
            }
        }
    }
}

impl Default for DisplayPreferences {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::Actual,
            number: NumberFormat::default(),
            include_sum: true,
            include_grades: true,
            students_per_page: Self::DEFAULT_STUDENTS_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ColumnKind {
    #[serde(rename_all = "camelCase")]
    Component {
        subject_id: String,
        component_id: String,
        term_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SubjectTotal { subject_id: String },
    #[serde(rename_all = "camelCase")]
    SubjectGrade { subject_id: String },
    GrandTotal,
    GrandPercent,
    GrandGrade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub key: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnGroup {
    pub subject_id: Option<String>,
    pub label: String,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub student_id: String,
    pub roll_number: Option<i64>,
    pub name: String,
    /// One cell per column, in header order.
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReportLine {
    Student(ReportRow),
    PageBreak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedReport {
    pub groups: Vec<ColumnGroup>,
    pub lines: Vec<ReportLine>,
    pub footer: Option<ReportRow>,
    pub page_count: usize,
    pub preferences: DisplayPreferences,
}

impl PaginatedReport {
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.groups.iter().flat_map(|g| g.columns.iter())
    }

    pub fn column_count(&self) -> usize {
        self.groups.iter().map(|g| g.columns.len()).sum()
    }

    /// Student rows split at the page-break markers.
    pub fn pages(&self) -> Vec<Vec<&ReportRow>> {
        let mut pages = vec![Vec::new()];
        for line in &self.lines {
            match line {
                ReportLine::Student(row) => {
                    if let Some(page) = pages.last_mut() {
                        page.push(row);
                    }
                }
                ReportLine::PageBreak => pages.push(Vec::new()),
            }
        }
        pages
    }
}

fn component_label(group: &SubjectComponentGroup, term_id: Option<&str>, abbreviation: &str) -> String {
    match term_id {
        Some(t) if group.is_multi_term() => {
            let term_name = group.term_names.get(t).map(String::as_str).unwrap_or(t);
            format!("{} - {}", term_name, abbreviation)
        }
        _ => abbreviation.to_string(),
    }
}

fn build_groups(result: &AggregateResult, prefs: &DisplayPreferences) -> Vec<ColumnGroup> {
    let mut groups = Vec::with_capacity(result.subject_component_groups.len() + 1);
    for group in &result.subject_component_groups {
        let mut columns: Vec<Column> = group
            .components
            .iter()
            .map(|c| Column {
                key: format!("{}:{}", group.subject_id, c.component_id),
                label: component_label(group, c.term_id.as_deref(), &c.abbreviation),
                kind: ColumnKind::Component {
                    subject_id: group.subject_id.clone(),
                    component_id: c.component_id.clone(),
                    term_id: c.term_id.clone(),
                },
            })
            .collect();
        if prefs.include_sum {
            columns.push(Column {
                key: format!("{}:total", group.subject_id),
                label: "Total".to_string(),
                kind: ColumnKind::SubjectTotal {
                    subject_id: group.subject_id.clone(),
                },
            });
        }
        if prefs.include_grades {
            columns.push(Column {
                key: format!("{}:grade", group.subject_id),
                label: "Grade".to_string(),
                kind: ColumnKind::SubjectGrade {
                    subject_id: group.subject_id.clone(),
                },
            });
        }
        groups.push(ColumnGroup {
            subject_id: Some(group.subject_id.clone()),
            label: group.subject_name.clone(),
            columns,
        });
    }

    let mut grand = Vec::new();
    if prefs.include_sum {
        grand.push(Column {
            key: "grand:total".to_string(),
            label: "Grand Total".to_string(),
            kind: ColumnKind::GrandTotal,
        });
        grand.push(Column {
            key: "grand:percent".to_string(),
            label: "Percentage".to_string(),
            kind: ColumnKind::GrandPercent,
        });
    }
    if prefs.include_grades {
        grand.push(Column {
            key: "grand:grade".to_string(),
            label: "Grade".to_string(),
            kind: ColumnKind::GrandGrade,
        });
    }
    if !grand.is_empty() {
        groups.push(ColumnGroup {
            subject_id: None,
            label: "Overall".to_string(),
            columns: grand,
        });
    }
    groups
}

fn render_cell(row: &StudentResult, column: &Column, prefs: &DisplayPreferences) -> String {
    match &column.kind {
        ColumnKind::Component { component_id, .. } => {
            let Some(c) = row.components.iter().find(|c| &c.component_id == component_id) else {
                return String::new();
            };
            match c.value {
                // The code replaces any number, whatever the display mode.
                MarkValue::Exempt(code) => code.as_str().to_string(),
                MarkValue::Missing => String::new(),
                MarkValue::Scored(v) => prefs.pair(Some(v), c.weighted_value),
            }
        }
        ColumnKind::SubjectTotal { subject_id } => row
            .subjects
            .iter()
            .find(|s| &s.subject_id == subject_id)
            .map(|s| prefs.pair(Some(s.raw_total), Some(s.weighted_total)))
            .unwrap_or_default(),
        ColumnKind::SubjectGrade { subject_id } => row
            .subjects
            .iter()
            .find(|s| &s.subject_id == subject_id)
            .map(|s| prefs.grade_pair(s.grade_raw.as_deref(), s.grade_weighted.as_deref()))
            .unwrap_or_default(),
        ColumnKind::GrandTotal => {
            prefs.pair(Some(row.grand.total_raw), Some(row.grand.total_weighted))
        }
        ColumnKind::GrandPercent => {
            prefs.pair(row.grand.percentage_raw, row.grand.percentage_weighted)
        }
        ColumnKind::GrandGrade => prefs.grade_pair(
            row.grand.grade_raw.as_deref(),
            row.grand.grade_weighted.as_deref(),
        ),
    }
}

fn render_row(row: &StudentResult, groups: &[ColumnGroup], prefs: &DisplayPreferences) -> ReportRow {
    ReportRow {
        student_id: row.student_id.clone(),
        roll_number: row.roll_number,
        name: row.name.clone(),
        cells: groups
            .iter()
            .flat_map(|g| g.columns.iter())
            .map(|col| render_cell(row, col, prefs))
            .collect(),
    }
}

/// Renders an aggregation result for display. Pure: the same result can be
/// re-rendered under any preferences without re-aggregating.
pub fn format(result: &AggregateResult, prefs: &DisplayPreferences) -> PaginatedReport {
    let groups = build_groups(result, prefs);
    let per_page = prefs.students_per_page.max(1);
    let mut lines = Vec::with_capacity(result.students.len() + result.students.len() / per_page);
    for (i, student) in result.students.iter().enumerate() {
        if i > 0 && i % per_page == 0 {
            lines.push(ReportLine::PageBreak);
        }
        lines.push(ReportLine::Student(render_row(student, &groups, prefs)));
    }
    let page_count = result.students.len().div_ceil(per_page).max(1);
    let footer = result
        .summary
        .as_ref()
        .map(|s| render_row(s, &groups, prefs));

    PaginatedReport {
        groups,
        lines,
        footer,
        page_count,
        preferences: *prefs,
    }
}
