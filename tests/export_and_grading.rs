mod test_support;

use serde_json::json;
use std::io::Read;
use test_support::{request_err, request_ok, seed_class, spawn_sidecar, temp_dir};

#[test]
fn export_html_and_bundle() {
    let workspace = temp_dir("resultd-export");
    let out_path = workspace.join("exports").join("class10.zip");
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
            { "studentId": "s1", "componentId": "u2", "marksObtained": 60 }
        ] }),
    );

    let params = json!({
        "classId": "c10",
        "subjectComponents": [
            { "subjectId": "math", "examId": "ut1" },
            { "subjectId": "sci", "termComponentMap": { "t1": [], "t2": [] } }
        ],
        "includeSummary": true
    });
    let export = request_ok(&mut stdin, &mut reader, "3", "reports.exportHtml", params.clone());
    // 4 math + 4 sci + 3 overall columns
    assert_eq!(export["orientation"], "landscape");
    assert_eq!(export["fileName"], "class-10-result.pdf");
    assert_eq!(export["filters"]["classId"], "c10");
    let html = export["html"].as_str().expect("html");
    assert!(html.contains("<h1>Class 10 Result</h1>"));
    assert!(html.contains("Class Total"));

    let mut bundle_params = params;
    bundle_params["outPath"] = json!(out_path.to_string_lossy());
    bundle_params["title"] = json!("Final Result");
    let bundle = request_ok(&mut stdin, &mut reader, "4", "reports.exportBundle", bundle_params);
    assert_eq!(bundle["entryCount"], 3);
    assert_eq!(bundle["fileName"], "final-result.pdf");

    let file = std::fs::File::open(&out_path).expect("bundle file");
    let mut archive = zip::ZipArchive::new(file).expect("zip archive");
    let mut manifest_text = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest")
        .read_to_string(&mut manifest_text)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text).expect("manifest json");
    assert_eq!(manifest["format"], "resultd-report-v1");
    assert_eq!(manifest["htmlSha256"], bundle["htmlSha256"]);
    assert!(archive.by_name("report.html").is_ok());
    assert!(archive.by_name("filters.json").is_ok());
}

#[test]
fn grading_scale_is_validated_and_applied() {
    let workspace = temp_dir("resultd-grading");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_class(&mut stdin, &mut reader);

    let gap = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "grading.setScale",
        json!({ "bands": [
            { "minPercent": 0, "maxPercent": 40, "gradeLabel": "F" },
            { "minPercent": 50, "maxPercent": 100, "gradeLabel": "P" }
        ] }),
    );
    assert_eq!(gap, "configuration_error");

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grading.setScale",
        json!({ "bands": [
            { "minPercent": 50, "maxPercent": 100, "gradeLabel": "PASS" },
            { "minPercent": 0, "maxPercent": 50, "gradeLabel": "FAIL" }
        ] }),
    );
    let scale = request_ok(&mut stdin, &mut reader, "4", "grading.getScale", json!({}));
    assert_eq!(scale["bands"][0]["gradeLabel"], "FAIL");

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "marks.save",
        json!({ "entries": [
            { "studentId": "s1", "componentId": "u1", "marksObtained": 20 },
            { "studentId": "s1", "componentId": "u2", "marksObtained": 80 }
        ] }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.aggregate",
        json!({
            "classId": "c10",
            "subjectComponents": [{ "subjectId": "math", "examId": "ut1" }]
        }),
    );
    assert_eq!(result["students"][0]["total_grade_weighted"], "PASS");
    assert_eq!(result["students"][1]["total_grade_weighted"], "FAIL");
}
