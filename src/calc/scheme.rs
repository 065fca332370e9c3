use super::GradingComponent;
use crate::error::{CalcResult, ResultError};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use uuid::Uuid;

/// Which scheme(s) of a class-subject to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamSelector {
    Exam(String),
    Terms(BTreeSet<String>),
}

/// Scope a scheme is defined for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemeScope {
    Exam(String),
    Term(String),
}

impl SchemeScope {
    fn kind(&self) -> &'static str {
        match self {
            SchemeScope::Exam(_) => "exam",
            SchemeScope::Term(_) => "term",
        }
    }

    fn id(&self) -> &str {
        match self {
            SchemeScope::Exam(id) | SchemeScope::Term(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDraft {
    pub component_id: Option<String>,
    pub name: String,
    pub abbreviation: Option<String>,
    pub max_marks: f64,
    pub weightage_percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefinedScheme {
    pub scheme_id: String,
    pub version: i64,
    pub components: Vec<GradingComponent>,
}

/// Components chosen for one subject, validated once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectSelection {
    subject_id: String,
    scope: SelectionScope,
}

/// An empty component set means "every component of that exam/term".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionScope {
    Exam {
        exam_id: String,
        component_ids: BTreeSet<String>,
    },
    Terms(BTreeMap<String, BTreeSet<String>>),
}

impl SubjectSelection {
    pub fn new(subject_id: impl Into<String>, scope: SelectionScope) -> CalcResult<Self> {
        let subject_id = subject_id.into();
        if subject_id.trim().is_empty() {
            return Err(ResultError::validation("subjectId must not be empty"));
        }
        match &scope {
            SelectionScope::Exam { exam_id, .. } => {
                if exam_id.trim().is_empty() {
                    return Err(ResultError::validation("examId must not be empty")
                        .with_details(json!({ "subjectId": subject_id })));
                }
            }
            SelectionScope::Terms(map) => {
                if map.is_empty() {
                    return Err(ResultError::validation(
                        "termComponentMap must name at least one term",
                    )
                    .with_details(json!({ "subjectId": subject_id })));
                }
                let mut seen: HashSet<&str> = HashSet::new();
                for (term_id, ids) in map {
                    for id in ids {
                        if !seen.insert(id.as_str()) {
                            return Err(ResultError::validation(
                                "component selected under more than one term",
                            )
                            .with_details(json!({
                                "subjectId": subject_id,
                                "termId": term_id,
                                "componentId": id
                            })));
                        }
                    }
                }
            }
        }
        Ok(Self { subject_id, scope })
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn scope(&self) -> &SelectionScope {
        &self.scope
    }

    pub fn selector(&self) -> ExamSelector {
        match &self.scope {
            SelectionScope::Exam { exam_id, .. } => ExamSelector::Exam(exam_id.clone()),
            SelectionScope::Terms(map) => ExamSelector::Terms(map.keys().cloned().collect()),
        }
    }

    /// Narrows resolved components to the selected ids, keeping resolver order.
    pub fn apply(&self, resolved: Vec<GradingComponent>) -> CalcResult<Vec<GradingComponent>> {
        let wanted: BTreeMap<Option<&str>, &BTreeSet<String>> = match &self.scope {
            SelectionScope::Exam { component_ids, .. } => {
                std::iter::once((None, component_ids)).collect()
            }
            SelectionScope::Terms(map) => map
                .iter()
                .map(|(term, ids)| (Some(term.as_str()), ids))
                .collect(),
        };

        for (term, ids) in &wanted {
            for id in ids.iter() {
                let found = resolved
                    .iter()
                    .any(|c| c.component_id == *id && c.term_id.as_deref() == *term);
                if !found {
                    return Err(ResultError::not_found(
                        "selected component is not part of the resolved scheme",
                    )
                    .with_details(json!({
                        "subjectId": self.subject_id,
                        "termId": term,
                        "componentId": id
                    })));
                }
            }
        }

        Ok(resolved
            .into_iter()
            .filter(|c| {
                wanted
                    .get(&c.term_id.as_deref())
                    .map(|ids| ids.is_empty() || ids.contains(&c.component_id))
                    .unwrap_or(false)
            })
            .collect())
    }
}

/// Deterministic column order: term (single-exam first), then component id.
pub fn sort_components(components: &mut [GradingComponent]) {
    components.sort_by(|a, b| {
        a.term_id
            .cmp(&b.term_id)
            .then_with(|| a.component_id.cmp(&b.component_id))
    });
}

fn ensure_class_subject(conn: &Connection, class_id: &str, subject_id: &str) -> CalcResult<()> {
    let assigned: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM class_subjects WHERE class_id = ? AND subject_id = ?",
            (class_id, subject_id),
            |r| r.get(0),
        )
        .optional()?;
    if assigned.is_none() {
        return Err(ResultError::not_found("subject is not assigned to class")
            .with_details(json!({ "classId": class_id, "subjectId": subject_id })));
    }
    Ok(())
}

fn latest_scheme(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
    scope: &SchemeScope,
) -> CalcResult<Option<(String, i64)>> {
    Ok(conn
        .query_row(
            "SELECT id, version FROM schemes
             WHERE class_id = ? AND subject_id = ? AND scope_kind = ? AND scope_id = ?
             ORDER BY version DESC
             LIMIT 1",
            (class_id, subject_id, scope.kind(), scope.id()),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?)
}

fn component_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<GradingComponent> {
    Ok(GradingComponent {
        component_id: r.get(0)?,
        subject_id: r.get(1)?,
        term_id: r.get(2)?,
        name: r.get(3)?,
        abbreviation: r.get(4)?,
        max_marks: r.get(5)?,
        weightage_percent: r.get(6)?,
        is_locked: r.get::<_, i64>(7)? != 0,
    })
}

fn scheme_components(conn: &Connection, scheme_id: &str) -> CalcResult<Vec<GradingComponent>> {
    let mut stmt = conn.prepare(
        "SELECT id, subject_id, term_id, name, abbreviation, max_marks, weightage_percent, is_locked
         FROM components
         WHERE scheme_id = ?
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map([scheme_id], component_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

/// Reads one component straight from the store (no caching), so the lock
/// flag is current at the time of the call.
pub fn load_component(conn: &Connection, component_id: &str) -> CalcResult<GradingComponent> {
    conn.query_row(
        "SELECT id, subject_id, term_id, name, abbreviation, max_marks, weightage_percent, is_locked
         FROM components
         WHERE id = ?",
        [component_id],
        component_from_row,
    )
    .optional()?
    .ok_or_else(|| {
        ResultError::not_found("component not found")
            .with_details(json!({ "componentId": component_id }))
    })
}

pub fn resolve_components(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
    selector: &ExamSelector,
) -> CalcResult<Vec<GradingComponent>> {
    ensure_class_subject(conn, class_id, subject_id)?;

    let scopes: Vec<SchemeScope> = match selector {
        ExamSelector::Exam(id) => vec![SchemeScope::Exam(id.clone())],
        ExamSelector::Terms(ids) => {
            if ids.is_empty() {
                return Err(ResultError::validation("term selector must not be empty")
                    .with_details(json!({ "classId": class_id, "subjectId": subject_id })));
            }
            ids.iter().cloned().map(SchemeScope::Term).collect()
        }
    };

    let mut out = Vec::new();
    for scope in &scopes {
        let Some((scheme_id, _)) = latest_scheme(conn, class_id, subject_id, scope)? else {
            return Err(ResultError::not_found("no scheme defined")
                .with_details(json!({
                    "classId": class_id,
                    "subjectId": subject_id,
                    "scope": scope.kind(),
                    "scopeId": scope.id()
                })));
        };
        out.extend(scheme_components(conn, &scheme_id)?);
    }
    sort_components(&mut out);
    tracing::debug!(
        class_id,
        subject_id,
        components = out.len(),
        "resolved grading components"
    );
    Ok(out)
}

pub fn resolve_selection(
    conn: &Connection,
    class_id: &str,
    selection: &SubjectSelection,
) -> CalcResult<Vec<GradingComponent>> {
    let resolved = resolve_components(conn, class_id, selection.subject_id(), &selection.selector())?;
    selection.apply(resolved)
}

fn validate_drafts(subject_id: &str, drafts: &[ComponentDraft]) -> CalcResult<()> {
    let mut total_weight = 0.0_f64;
    let mut ids: HashSet<&str> = HashSet::new();
    for (idx, d) in drafts.iter().enumerate() {
        let at = json!({ "subjectId": subject_id, "index": idx, "name": d.name });
        if d.name.trim().is_empty() {
            return Err(ResultError::validation("component name must not be empty").with_details(at));
        }
        if !d.max_marks.is_finite() || d.max_marks <= 0.0 {
            return Err(ResultError::validation("maxMarks must be a positive number").with_details(at));
        }
        if !d.weightage_percent.is_finite() || !(0.0..=100.0).contains(&d.weightage_percent) {
            return Err(
                ResultError::validation("weightagePercent must be between 0 and 100").with_details(at),
            );
        }
        if let Some(id) = d.component_id.as_deref() {
            if id.trim().is_empty() || !ids.insert(id) {
                return Err(ResultError::validation("componentId must be unique and non-empty")
                    .with_details(at));
            }
        }
        total_weight += d.weightage_percent;
    }
    if total_weight > 100.0 + 1e-9 {
        return Err(ResultError::configuration(
            "component weightages of one scheme sum to more than 100",
        )
        .with_details(json!({ "subjectId": subject_id, "totalWeightage": total_weight })));
    }
    Ok(())
}

/// Defines a scheme for class/subject/scope. An existing scheme is
/// superseded by a new version; its components are kept.
pub fn define_scheme(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
    scope: &SchemeScope,
    drafts: &[ComponentDraft],
) -> CalcResult<DefinedScheme> {
    ensure_class_subject(conn, class_id, subject_id)?;
    validate_drafts(subject_id, drafts)?;

    let scope_table = match scope {
        SchemeScope::Exam(_) => "exams",
        SchemeScope::Term(_) => "terms",
    };
    let scope_exists: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?", scope_table),
            [scope.id()],
            |r| r.get(0),
        )
        .optional()?;
    if scope_exists.is_none() {
        return Err(ResultError::not_found(format!("{} not found", scope.kind()))
            .with_details(json!({ "scope": scope.kind(), "scopeId": scope.id() })));
    }

    for id in drafts.iter().filter_map(|d| d.component_id.as_deref()) {
        let taken: Option<i64> = conn
            .query_row("SELECT 1 FROM components WHERE id = ?", [id], |r| r.get(0))
            .optional()?;
        if taken.is_some() {
            return Err(ResultError::validation("componentId already exists")
                .with_details(json!({ "componentId": id })));
        }
    }

    let version = latest_scheme(conn, class_id, subject_id, scope)?
        .map(|(_, v)| v + 1)
        .unwrap_or(1);
    let scheme_id = Uuid::new_v4().to_string();
    let term_id = match scope {
        SchemeScope::Term(id) => Some(id.clone()),
        SchemeScope::Exam(_) => None,
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO schemes(id, class_id, subject_id, scope_kind, scope_id, version, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &scheme_id,
            class_id,
            subject_id,
            scope.kind(),
            scope.id(),
            version,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;

    let mut components = Vec::with_capacity(drafts.len());
    for d in drafts {
        let component = GradingComponent {
            component_id: d
                .component_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            subject_id: subject_id.to_string(),
            term_id: term_id.clone(),
            name: d.name.trim().to_string(),
            abbreviation: d
                .abbreviation
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| d.name.trim())
                .to_string(),
            max_marks: d.max_marks,
            weightage_percent: d.weightage_percent,
            is_locked: false,
        };
        tx.execute(
            "INSERT INTO components(id, scheme_id, subject_id, term_id, name, abbreviation, max_marks, weightage_percent, is_locked)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0)",
            (
                &component.component_id,
                &scheme_id,
                &component.subject_id,
                &component.term_id,
                &component.name,
                &component.abbreviation,
                component.max_marks,
                component.weightage_percent,
            ),
        )?;
        components.push(component);
    }
    tx.commit()?;

    sort_components(&mut components);
    tracing::info!(class_id, subject_id, version, "scheme defined");
    Ok(DefinedScheme {
        scheme_id,
        version,
        components,
    })
}

pub fn set_component_locked(conn: &Connection, component_id: &str, locked: bool) -> CalcResult<()> {
    let changed = conn.execute(
        "UPDATE components SET is_locked = ? WHERE id = ?",
        (locked as i64, component_id),
    )?;
    if changed == 0 {
        return Err(ResultError::not_found("component not found")
            .with_details(json!({ "componentId": component_id })));
    }
    tracing::info!(component_id, locked, "component lock changed");
    Ok(())
}
