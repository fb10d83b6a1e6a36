use std::process::Command;

fn fixture_program() -> serde_json::Value {
    serde_json::json!({
        "units": [
            { "path": "com/example/Widget.java", "package": "com.example", "classes": [1] }
        ],
        "classes": [
            { "name": "Value", "package": "com.example" },
            {
                "name": "Widget",
                "package": "com.example",
                "marker": "NullMarked",
                "fields": [0]
            }
        ],
        "methods": [],
        "fields": [
            {
                "name": "name",
                "owner": 1,
                "ty": { "kind": { "Class": 0 }, "nullable": false },
                "initializer": { "NullLit": { "span": { "line": 4, "col": 20 } } },
                "span": { "line": 4, "col": 5 }
            }
        ],
        "locals": []
    })
}

#[test]
fn emits_sarif_with_field_assignment_diagnostic() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = dir.path().join("program.json");
    std::fs::write(&input, fixture_program().to_string()).expect("write program");
    let output_path = dir.path().join("out.sarif");

    let output = Command::new(env!("CARGO_BIN_EXE_nullspect"))
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output_path)
        .output()
        .expect("run nullspect");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let sarif: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output_path).expect("read SARIF"))
            .expect("parse SARIF");
    assert_eq!(sarif["version"], "2.1.0");
    assert_eq!(sarif["runs"][0]["tool"]["driver"]["name"], "nullspect");
    let results = sarif["runs"][0]["results"].as_array().expect("results");
    assert_eq!(results.len(), 1, "{results:?}");
    assert_eq!(results[0]["ruleId"], "ASSIGN_FIELD_NULLABLE");
    let region = &results[0]["locations"][0]["physicalLocation"]["region"];
    assert_eq!(region["startLine"], 4);
    assert_eq!(
        results[0]["locations"][0]["physicalLocation"]["artifactLocation"]["uri"],
        "com/example/Widget.java"
    );
}

#[test]
fn clean_program_produces_empty_results() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = dir.path().join("program.json");
    let program = serde_json::json!({
        "units": [ { "path": "Empty.java", "classes": [0] } ],
        "classes": [ { "name": "Empty", "package": "com.example", "marker": "NullMarked" } ],
        "methods": [],
        "fields": []
    });
    std::fs::write(&input, program.to_string()).expect("write program");

    let output = Command::new(env!("CARGO_BIN_EXE_nullspect"))
        .arg("--input")
        .arg(&input)
        .output()
        .expect("run nullspect");
    assert!(output.status.success());
    let sarif: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("parse SARIF from stdout");
    assert!(sarif["runs"][0]["results"]
        .as_array()
        .expect("results array")
        .is_empty());
    assert_eq!(
        sarif["runs"][0]["invocations"][0]["executionSuccessful"],
        true
    );
}
