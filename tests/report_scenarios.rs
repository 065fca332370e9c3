mod test_support;

use serde_json::json;
use test_support::{request_ok, seed_class, spawn_sidecar, temp_dir};

fn approx(v: &serde_json::Value, expected: f64) {
    let got = v.as_f64().unwrap_or_else(|| panic!("not a number: {}", v));
    assert!((got - expected).abs() < 1e-9, "expected {}, got {}", expected, got);
}

fn student<'a>(result: &'a serde_json::Value, id: &str) -> &'a serde_json::Value {
    result["students"]
        .as_array()
        .expect("students")
        .iter()
        .find(|s| s["student_id"] == id)
        .unwrap_or_else(|| panic!("student {} missing", id))
}

#[test]
fn single_exam_weighted_and_absent_scenarios() {
    let workspace = temp_dir("resultd-scenarios-exam");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_class(&mut stdin, &mut reader);
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marks.save",
        json!({ "entries": [
            { "studentId": "s1", "componentId": "u1", "marksObtained": 18 },
            { "studentId": "s1", "componentId": "u2", "marksObtained": 60 },
            { "studentId": "s2", "componentId": "u1", "marksObtained": 18 },
            { "studentId": "s2", "componentId": "u2", "attendance": "A" }
        ] }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.aggregate",
        json!({
            "classId": "c10",
            "subjectComponents": [{ "subjectId": "math", "examId": "ut1", "componentIds": [] }]
        }),
    );

    let s1 = student(&result, "s1");
    approx(&s1["subject_totals_raw"]["math"], 78.0);
    approx(&s1["subject_totals_weighted"]["math"], 81.0);
    assert_eq!(s1["subject_grades"]["math"]["weighted"], "A2");
    assert_eq!(s1["subject_grades"]["math"]["raw"], "B1");
    assert_eq!(s1["roll_number"], 1);

    let s2 = student(&result, "s2");
    approx(&s2["subject_totals_raw"]["math"], 18.0);
    approx(&s2["subject_totals_weighted"]["math"], 36.0);
    approx(&s2["subject_max_weighted"]["math"], 40.0);
    approx(&s2["subject_percentages"]["math"]["weighted"], 90.0);
    let absent = s2["components"]
        .as_array()
        .expect("components")
        .iter()
        .find(|c| c["component_id"] == "u2")
        .expect("u2");
    assert_eq!(absent["value"]["state"], "exempt");
    assert_eq!(absent["value"]["value"], "A");

    assert!(result["summary"].is_null());
    assert_eq!(
        result["subjectComponentGroups"][0]["subjectId"],
        "math"
    );

    let formatted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.format",
        json!({
            "classId": "c10",
            "subjectComponents": [{ "subjectId": "math", "examId": "ut1" }],
            "displayMode": "both",
            "decimalPoints": 0
        }),
    );
    let lines = formatted["lines"].as_array().expect("lines");
    assert_eq!(lines[1]["type"], "student");
    let cells: Vec<&str> = lines[1]["cells"]
        .as_array()
        .expect("cells")
        .iter()
        .filter_map(|c| c.as_str())
        .collect();
    // U1, U2, Total, Grade, Grand Total, Percentage, Grade
    assert_eq!(cells[0], "18 (36)");
    assert_eq!(cells[1], "A");
    assert_eq!(cells[2], "18 (36)");
}

#[test]
fn floor_and_ceiling_rounding_of_a_fractional_total() {
    let workspace = temp_dir("resultd-scenarios-rounding");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_class(&mut stdin, &mut reader);
    // 17/20*40 + 63.6/80*60 = 34 + 47.7 = 81.7
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marks.save",
        json!({ "entries": [
            { "studentId": "s1", "componentId": "u1", "marksObtained": 17 },
            { "studentId": "s1", "componentId": "u2", "marksObtained": 63.6 }
        ] }),
    );

    let total_cell = |id: &str,
                      rounding: &str,
                      stdin: &mut std::process::ChildStdin,
                      reader: &mut std::io::BufReader<std::process::ChildStdout>| {
        let formatted = request_ok(
            stdin,
            reader,
            id,
            "reports.format",
            json!({
                "classId": "c10",
                "subjectComponents": [{ "subjectId": "math", "examId": "ut1" }],
                "displayMode": "weighted",
                "decimalPoints": 0,
                "rounding": rounding
            }),
        );
        formatted["lines"][0]["cells"][2]
            .as_str()
            .expect("total cell")
            .to_string()
    };
    assert_eq!(total_cell("3", "floor", &mut stdin, &mut reader), "81");
    assert_eq!(total_cell("4", "ceil", &mut stdin, &mut reader), "82");
}

#[test]
fn multi_term_subject_uses_term_shares() {
    let workspace = temp_dir("resultd-scenarios-terms");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_class(&mut stdin, &mut reader);
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marks.save",
        json!({ "entries": [
            { "studentId": "s1", "componentId": "sci_t1", "marksObtained": 50 },
            { "studentId": "s1", "componentId": "sci_t2", "marksObtained": 70 },
            { "studentId": "s2", "componentId": "sci_t1", "marksObtained": 40 },
            { "studentId": "s2", "componentId": "sci_t2", "marksObtained": 60 }
        ] }),
    );

    let request = json!({
        "classId": "c10",
        "subjectComponents": [{
            "subjectId": "sci",
            "termComponentMap": { "t1": [], "t2": ["sci_t2"] }
        }],
        "includeSummary": true
    });
    let result = request_ok(&mut stdin, &mut reader, "3", "reports.aggregate", request.clone());
    let s1 = student(&result, "s1");
    approx(&s1["subject_totals_weighted"]["sci"], 62.0);
    approx(&s1["subject_totals_raw"]["sci"], 120.0);
    approx(&s1["term_breakdown"]["sci"]["t1"]["weight_share"], 40.0);

    // Class totals: t1 90/200, t2 130/200 -> 0.4*90 + 0.6*130 = 114 of 200
    let summary = &result["summary"];
    approx(&summary["subject_totals_weighted"]["sci"], 114.0);
    approx(&summary["grand_percent_weighted"], 57.0);
    assert_eq!(summary["total_grade_weighted"], "C1");

    let again = request_ok(&mut stdin, &mut reader, "4", "reports.aggregate", request);
    assert_eq!(result, again);

    let formatted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.format",
        json!({
            "classId": "c10",
            "subjectComponents": [{ "subjectId": "sci", "termComponentMap": { "t1": [], "t2": [] } }],
            "includeSummary": true,
            "studentsPerPage": 1
        }),
    );
    let labels: Vec<&str> = formatted["groups"][0]["columns"]
        .as_array()
        .expect("columns")
        .iter()
        .filter_map(|c| c["label"].as_str())
        .collect();
    assert_eq!(labels, vec!["Term 1 - SC", "Term 2 - SC", "Total", "Grade"]);
    assert_eq!(formatted["pageCount"], 2);
    assert_eq!(formatted["lines"][1]["type"], "pageBreak");
    assert_eq!(formatted["footer"]["name"], "Class Total");
}
