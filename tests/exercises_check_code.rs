mod test_support;

use serde_json::json;
use test_support::{
    create_and_login, error_code, open_as_admin, request_as, request_ok_as, seed_unit_topic,
    spawn_sidecar, str_field, temp_dir,
};

const SOLUTION: &str = r#"#include <stdio.h>
int main() {
    int n = 3;
    for (int i = 0; i < n; i++) {
        printf("%d\n", i);
    }
    return 0;
}"#;

#[test]
fn check_code_grades_against_the_reference_solution() {
    let workspace = temp_dir("lsvcode-check-code");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = open_as_admin(&mut stdin, &mut reader, &workspace);
    let (unit_id, topic_id) = seed_unit_topic(&mut stdin, &mut reader, &admin, "Ciclos");
    let student = create_and_login(&mut stdin, &mut reader, &admin, "nico", "Usuario", None);

    let created = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "1",
        "exercises.create",
        json!({
            "topicId": topic_id,
            "title": "Contar hasta N",
            "instructions": "Imprime 0..n-1",
            "expectedOutput": "0\n1\n2",
            "solution": SOLUTION,
        }),
    );
    let exercise_id = str_field(&created, "exerciseId");
    assert_eq!(created["slug"], json!("contar-hasta-n"));

    let opened = request_ok_as(
        &mut stdin,
        &mut reader,
        &student,
        "2",
        "exercises.open",
        json!({ "exercise": "contar-hasta-n" }),
    );
    assert!(opened["exercise"].get("solution").is_none());
    assert_eq!(opened["exercise"]["completed"], json!(false));

    let blank = request_as(
        &mut stdin,
        &mut reader,
        &student,
        "3",
        "exercises.checkCode",
        json!({ "exerciseId": exercise_id, "code": "   \n" }),
    );
    assert_eq!(error_code(&blank), Some("bad_params"));

    // Loop keyword only inside a comment: repetition is not credited.
    let partial = request_ok_as(
        &mut stdin,
        &mut reader,
        &student,
        "4",
        "exercises.checkCode",
        json!({ "exerciseId": exercise_id, "unitId": unit_id,
                "code": "int main() { int n = 3; /* for */ printf(\"0\"); return 0; }" }),
    );
    assert_eq!(partial["success"], json!(false));
    assert_eq!(partial["max"], json!(80));
    assert_eq!(partial["score"], json!(60));
    assert_eq!(partial["expected"], json!("0\n1\n2"));
    assert_eq!(partial["feedback"].as_array().map(|f| f.len()), Some(4));

    let wrong_unit = request_as(
        &mut stdin,
        &mut reader,
        &student,
        "5",
        "exercises.checkCode",
        json!({ "exerciseId": exercise_id, "unitId": "nope", "code": SOLUTION }),
    );
    assert_eq!(error_code(&wrong_unit), Some("not_found"));

    let full = request_ok_as(
        &mut stdin,
        &mut reader,
        &student,
        "6",
        "exercises.checkCode",
        json!({ "exerciseId": exercise_id, "code": SOLUTION }),
    );
    assert_eq!(full["success"], json!(true));
    assert_eq!(full["score"], full["max"]);
    assert!(full.get("expected").is_none());

    let listed = request_ok_as(
        &mut stdin,
        &mut reader,
        &student,
        "7",
        "exercises.list",
        json!({ "topicId": topic_id }),
    );
    assert_eq!(listed["exercises"][0]["completed"], json!(true));

    // Authors still see the solution; completion is per user.
    let authored = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "8",
        "exercises.open",
        json!({ "exercise": exercise_id }),
    );
    assert_eq!(authored["exercise"]["solution"], json!(SOLUTION));
    assert_eq!(authored["exercise"]["completed"], json!(false));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn inactive_exercises_are_hidden_and_deletable() {
    let workspace = temp_dir("lsvcode-exercise-hidden");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = open_as_admin(&mut stdin, &mut reader, &workspace);
    let (_unit_id, topic_id) = seed_unit_topic(&mut stdin, &mut reader, &admin, "Cadenas");
    let student = create_and_login(&mut stdin, &mut reader, &admin, "lía", "Usuario", None);

    let created = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "1",
        "exercises.create",
        json!({ "topicId": topic_id, "title": "Eco" }),
    );
    let exercise_id = str_field(&created, "exerciseId");

    let done = request_ok_as(
        &mut stdin,
        &mut reader,
        &student,
        "2",
        "exercises.complete",
        json!({ "exerciseId": exercise_id }),
    );
    assert_eq!(done["completed"], json!(true));

    let renamed = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "3",
        "exercises.update",
        json!({ "exerciseId": exercise_id, "patch": { "title": "Eco doble", "active": false } }),
    );
    assert_eq!(renamed["slug"], json!("eco-doble"));

    let hidden = request_as(
        &mut stdin,
        &mut reader,
        &student,
        "4",
        "exercises.open",
        json!({ "exercise": exercise_id }),
    );
    assert_eq!(error_code(&hidden), Some("not_found"));
    let listed = request_ok_as(
        &mut stdin,
        &mut reader,
        &student,
        "5",
        "exercises.list",
        json!({ "topicId": topic_id }),
    );
    assert_eq!(listed["exercises"].as_array().map(|a| a.len()), Some(0));

    // Without a stored solution any non-blank code passes the fallback.
    let fallback = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "6",
        "exercises.checkCode",
        json!({ "exerciseId": exercise_id, "code": "// hola" }),
    );
    assert_eq!(fallback["success"], json!(true));
    assert_eq!(fallback["max"], json!(100));

    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "7",
        "exercises.delete",
        json!({ "exerciseId": exercise_id }),
    );
    let gone = request_as(
        &mut stdin,
        &mut reader,
        &admin,
        "8",
        "exercises.delete",
        json!({ "exerciseId": exercise_id }),
    );
    assert_eq!(error_code(&gone), Some("not_found"));

    let _ = std::fs::remove_dir_all(workspace);
}
