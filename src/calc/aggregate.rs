use super::grading::GradingScale;
use super::normalize::{MarkValue, NormalizedEntry};
use super::{Attendance, GradingComponent, StudentInfo, SubjectInfo, TermInfo};
use crate::error::{CalcResult, ResultError};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Pre-aggregated class totals for one component: `total` marks summed over
/// `count` non-exempt students.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryCell {
    pub total: f64,
    pub count: u32,
}

/// Footer row supplied by the store layer. It is aggregated as a virtual
/// student whose maxima and weightages are scaled by each cell's count.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryInput {
    pub label: String,
    pub cells: BTreeMap<String, SummaryCell>,
}

pub struct AggregateInput<'a> {
    pub subjects: &'a [SubjectInfo],
    pub components: &'a [GradingComponent],
    pub roster: &'a [StudentInfo],
    pub entries: &'a [NormalizedEntry],
    pub terms: &'a [TermInfo],
    pub scale: &'a GradingScale,
    pub summary: Option<&'a SummaryInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentResult {
    pub component_id: String,
    pub subject_id: String,
    pub term_id: Option<String>,
    pub value: MarkValue,
    /// `None` for exempt cells.
    pub weighted_value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TermAggregate {
    pub raw_total: f64,
    pub weighted_total: f64,
    pub effective_max_raw: f64,
    pub effective_max_weightage: f64,
    pub weight_share: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectAggregate {
    pub subject_id: String,
    pub raw_total: f64,
    pub weighted_total: f64,
    pub effective_max_raw: f64,
    pub effective_max_weightage: f64,
    pub percentage_raw: Option<f64>,
    pub percentage_weighted: Option<f64>,
    pub grade_raw: Option<String>,
    pub grade_weighted: Option<String>,
    pub term_breakdown: BTreeMap<String, TermAggregate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrandAggregate {
    pub total_raw: f64,
    pub total_weighted: f64,
    pub max_raw: f64,
    pub max_weighted: f64,
    pub percentage_raw: Option<f64>,
    pub percentage_weighted: Option<f64>,
    pub grade_raw: Option<String>,
    pub grade_weighted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentResult {
    pub student_id: String,
    pub roll_number: Option<i64>,
    pub name: String,
    pub components: Vec<ComponentResult>,
    pub subjects: Vec<SubjectAggregate>,
    pub grand: GrandAggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectComponentGroup {
    pub subject_id: String,
    pub subject_name: String,
    pub components: Vec<GradingComponent>,
    pub term_names: BTreeMap<String, String>,
}

impl SubjectComponentGroup {
    pub fn is_multi_term(&self) -> bool {
        self.components.iter().any(|c| c.term_id.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub subject_component_groups: Vec<SubjectComponentGroup>,
    pub students: Vec<StudentResult>,
    pub summary: Option<StudentResult>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    raw: f64,
    weighted: f64,
    max_raw: f64,
    max_weightage: f64,
}

impl Accumulator {
    /// Adds one cell. `factor` scales max and weightage (1 for real students).
    fn add(&mut self, component: &GradingComponent, value: MarkValue, factor: f64) -> Option<f64> {
        let max = component.max_marks * factor;
        let weight = component.weightage_percent * factor;
        let obtained = match value {
            MarkValue::Exempt(_) => return None,
            MarkValue::Missing => 0.0,
            MarkValue::Scored(v) => v,
        };
        let weighted = obtained / max * weight;
        self.raw += obtained;
        self.weighted += weighted;
        self.max_raw += max;
        self.max_weightage += weight;
        Some(weighted)
    }
}

fn percentage(value: f64, max: f64) -> Option<f64> {
    if max > 0.0 {
        Some(value / max * 100.0)
    } else {
        None
    }
}

fn grade(
    scale: &GradingScale,
    percent: Option<f64>,
    context: impl FnOnce() -> Value,
) -> CalcResult<Option<String>> {
    let Some(p) = percent else {
        return Ok(None);
    };
    match scale.grade_for(p) {
        Ok(label) => Ok(Some(label.to_string())),
        Err(e) => {
            let mut details = context();
            if let (Some(obj), Some(inner)) = (details.as_object_mut(), e.details()) {
                obj.insert("lookup".to_string(), inner);
            }
            Err(ResultError::configuration(e.to_string()).with_details(details))
        }
    }
}

struct Grouped<'a> {
    subject: &'a SubjectInfo,
    components: Vec<&'a GradingComponent>,
    term_scoped: bool,
}

fn group_components<'a>(input: &AggregateInput<'a>) -> CalcResult<Vec<Grouped<'a>>> {
    let mut groups = Vec::with_capacity(input.subjects.len());
    for subject in input.subjects {
        let components: Vec<&GradingComponent> = input
            .components
            .iter()
            .filter(|c| c.subject_id == subject.subject_id)
            .collect();
        let scoped = components.iter().filter(|c| c.term_id.is_some()).count();
        if scoped != 0 && scoped != components.len() {
            return Err(ResultError::configuration(
                "subject mixes single-exam and term components",
            )
            .with_details(json!({ "subjectId": subject.subject_id })));
        }
        for c in &components {
            if !c.max_marks.is_finite() || c.max_marks <= 0.0 {
                return Err(ResultError::configuration("component maxMarks must be positive")
                    .with_details(json!({
                        "subjectId": subject.subject_id,
                        "componentId": c.component_id
                    })));
            }
        }
        groups.push(Grouped {
            subject,
            term_scoped: scoped != 0,
            components,
        });
    }
    Ok(groups)
}

fn term_share(terms: &HashMap<&str, &TermInfo>, subject_id: &str, term_id: &str) -> CalcResult<f64> {
    let share = terms.get(term_id).and_then(|t| t.weight_share);
    match share {
        Some(s) if s.is_finite() && (0.0..=100.0).contains(&s) => Ok(s),
        Some(s) => Err(ResultError::configuration("term weight share must be between 0 and 100")
            .with_details(json!({ "termId": term_id, "weightShare": s }))),
        None => Err(ResultError::configuration(
            "term has no weight share; multi-term results need an explicit share per term",
        )
        .with_details(json!({ "subjectId": subject_id, "termId": term_id }))),
    }
}

/// Computes one result row. `cell` yields the working value and scale
/// factor of each component for this row.
fn aggregate_row<F>(
    row_id: &str,
    groups: &[Grouped<'_>],
    terms: &HashMap<&str, &TermInfo>,
    scale: &GradingScale,
    cell: F,
) -> CalcResult<(Vec<ComponentResult>, Vec<SubjectAggregate>, GrandAggregate)>
where
    F: Fn(&GradingComponent) -> (MarkValue, f64),
{
    let mut components_out = Vec::new();
    let mut subjects_out = Vec::with_capacity(groups.len());

    for group in groups {
        let subject_id = group.subject.subject_id.as_str();
        let mut per_term: BTreeMap<Option<&str>, Accumulator> = BTreeMap::new();
        for &component in &group.components {
            let (value, factor) = cell(component);
            let acc = per_term.entry(component.term_id.as_deref()).or_default();
            let weighted_value = acc.add(component, value, factor);
            components_out.push(ComponentResult {
                component_id: component.component_id.clone(),
                subject_id: component.subject_id.clone(),
                term_id: component.term_id.clone(),
                value,
                weighted_value,
            });
        }

        let mut total = Accumulator::default();
        let mut term_breakdown = BTreeMap::new();
        for (term_id, acc) in &per_term {
            match term_id {
                Some(term_id) if group.term_scoped => {
                    let share = term_share(terms, subject_id, term_id)?;
                    total.raw += acc.raw;
                    total.max_raw += acc.max_raw;
                    total.weighted += acc.weighted * share / 100.0;
                    total.max_weightage += acc.max_weightage * share / 100.0;
                    term_breakdown.insert(
                        term_id.to_string(),
                        TermAggregate {
                            raw_total: acc.raw,
                            weighted_total: acc.weighted,
                            effective_max_raw: acc.max_raw,
                            effective_max_weightage: acc.max_weightage,
                            weight_share: Some(share),
                        },
                    );
                }
                _ => {
                    total.raw += acc.raw;
                    total.max_raw += acc.max_raw;
                    total.weighted += acc.weighted;
                    total.max_weightage += acc.max_weightage;
                }
            }
        }

        let percentage_raw = percentage(total.raw, total.max_raw);
        let percentage_weighted = percentage(total.weighted, total.max_weightage);
        let context = || json!({ "studentId": row_id, "subjectId": subject_id });
        subjects_out.push(SubjectAggregate {
            subject_id: subject_id.to_string(),
            raw_total: total.raw,
            weighted_total: total.weighted,
            effective_max_raw: total.max_raw,
            effective_max_weightage: total.max_weightage,
            percentage_raw,
            percentage_weighted,
            grade_raw: grade(scale, percentage_raw, context)?,
            grade_weighted: grade(scale, percentage_weighted, context)?,
            term_breakdown,
        });
    }

    let total_raw: f64 = subjects_out.iter().map(|s| s.raw_total).sum();
    let total_weighted: f64 = subjects_out.iter().map(|s| s.weighted_total).sum();
    let max_raw: f64 = subjects_out.iter().map(|s| s.effective_max_raw).sum();
    let max_weighted: f64 = subjects_out.iter().map(|s| s.effective_max_weightage).sum();
    let percentage_raw = percentage(total_raw, max_raw);
    let percentage_weighted = percentage(total_weighted, max_weighted);
    let context = || json!({ "studentId": row_id, "scope": "grand" });
    let grand = GrandAggregate {
        total_raw,
        total_weighted,
        max_raw,
        max_weighted,
        percentage_raw,
        percentage_weighted,
        grade_raw: grade(scale, percentage_raw, context)?,
        grade_weighted: grade(scale, percentage_weighted, context)?,
    };

    Ok((components_out, subjects_out, grand))
}

fn summary_cell(
    summary: &SummaryInput,
    component: &GradingComponent,
) -> CalcResult<(MarkValue, f64)> {
    let Some(cell) = summary.cells.get(&component.component_id) else {
        return Ok((MarkValue::Exempt(Attendance::Exempt), 1.0));
    };
    if cell.count == 0 {
        return Ok((MarkValue::Exempt(Attendance::Exempt), 1.0));
    }
    let factor = f64::from(cell.count);
    if !cell.total.is_finite() || cell.total < 0.0 || cell.total > component.max_marks * factor {
        return Err(ResultError::validation("summary total outside component range")
            .with_details(json!({
                "componentId": component.component_id,
                "total": cell.total,
                "count": cell.count,
                "maxMarks": component.max_marks
            })));
    }
    Ok((MarkValue::Scored(cell.total), factor))
}

/// Runs the aggregation over full-precision values. Nothing is rounded
/// here; number formatting belongs to the report formatter.
pub fn aggregate(input: &AggregateInput<'_>) -> CalcResult<AggregateResult> {
    let groups = group_components(input)?;
    let terms: HashMap<&str, &TermInfo> = input
        .terms
        .iter()
        .map(|t| (t.term_id.as_str(), t))
        .collect();
    let values: HashMap<(&str, &str), MarkValue> = input
        .entries
        .iter()
        .map(|e| ((e.student_id.as_str(), e.component_id.as_str()), e.value))
        .collect();

    let mut students = Vec::with_capacity(input.roster.len());
    for student in input.roster {
        let (components, subjects, grand) =
            aggregate_row(&student.student_id, &groups, &terms, input.scale, |c| {
                let value = values
                    .get(&(student.student_id.as_str(), c.component_id.as_str()))
                    .copied()
                    .unwrap_or(MarkValue::Missing);
                (value, 1.0)
            })?;
        students.push(StudentResult {
            student_id: student.student_id.clone(),
            roll_number: Some(student.roll_number),
            name: student.name.clone(),
            components,
            subjects,
            grand,
        });
    }

    let summary = match input.summary {
        None => None,
        Some(summary) => {
            let mut cells: HashMap<&str, (MarkValue, f64)> = HashMap::new();
            for group in &groups {
                for c in &group.components {
                    cells.insert(c.component_id.as_str(), summary_cell(summary, c)?);
                }
            }
            let (components, subjects, grand) =
                aggregate_row(&summary.label, &groups, &terms, input.scale, |c| {
                    cells
                        .get(c.component_id.as_str())
                        .copied()
                        .unwrap_or((MarkValue::Exempt(Attendance::Exempt), 1.0))
                })?;
            Some(StudentResult {
                student_id: String::new(),
                roll_number: None,
                name: summary.label.clone(),
                components,
                subjects,
                grand,
            })
        }
    };

    let term_names: BTreeMap<String, String> = input
        .terms
        .iter()
        .map(|t| (t.term_id.clone(), t.name.clone()))
        .collect();
    let subject_component_groups = groups
        .iter()
        .map(|g| SubjectComponentGroup {
            subject_id: g.subject.subject_id.clone(),
            subject_name: g.subject.name.clone(),
            components: g.components.iter().map(|c| (*c).clone()).collect(),
            term_names: g
                .components
                .iter()
                .filter_map(|c| c.term_id.as_ref())
                .filter_map(|t| term_names.get(t).map(|n| (t.clone(), n.clone())))
                .collect(),
        })
        .collect();

    tracing::debug!(
        students = students.len(),
        subjects = input.subjects.len(),
        summary = summary.is_some(),
        "aggregated results"
    );
    Ok(AggregateResult {
        subject_component_groups,
        students,
        summary,
    })
}

fn subject_map<F>(row: &StudentResult, f: F) -> Value
where
    F: Fn(&SubjectAggregate) -> Value,
{
    let map: Map<String, Value> = row
        .subjects
        .iter()
        .map(|s| (s.subject_id.clone(), f(s)))
        .collect();
    Value::Object(map)
}

fn row_response(row: &StudentResult) -> Value {
    json!({
        "student_id": row.student_id,
        "roll_number": row.roll_number,
        "name": row.name,
        "components": row.components,
        "subject_totals_raw": subject_map(row, |s| json!(s.raw_total)),
        "subject_totals_weighted": subject_map(row, |s| json!(s.weighted_total)),
        "subject_max_raw": subject_map(row, |s| json!(s.effective_max_raw)),
        "subject_max_weighted": subject_map(row, |s| json!(s.effective_max_weightage)),
        "subject_percentages": subject_map(row, |s| json!({
            "raw": s.percentage_raw,
            "weighted": s.percentage_weighted
        })),
        "subject_grades": subject_map(row, |s| json!({
            "raw": s.grade_raw,
            "weighted": s.grade_weighted
        })),
        "term_breakdown": subject_map(row, |s| json!(s.term_breakdown)),
        "total_raw": row.grand.total_raw,
        "total_weighted": row.grand.total_weighted,
        "grand_percent_raw": row.grand.percentage_raw,
        "grand_percent_weighted": row.grand.percentage_weighted,
        "total_grade_raw": row.grand.grade_raw,
        "total_grade_weighted": row.grand.grade_weighted,
    })
}

impl AggregateResult {
    /// Wire shape of an aggregation response.
    pub fn to_response(&self) -> Value {
        json!({
            "students": self.students.iter().map(row_response).collect::<Vec<_>>(),
            "subjectComponentGroups": self.subject_component_groups,
            "summary": self.summary.as_ref().map(row_response),
        })
    }
}
