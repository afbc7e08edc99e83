mod test_support;

use serde_json::json;
use test_support::{
    create_and_login, error_code, open_as_admin, request_as, request_ok_as, seed_unit_topic,
    spawn_sidecar, str_field, temp_dir,
};

#[test]
fn content_kinds_are_validated_and_scoped() {
    let workspace = temp_dir("lsvcode-contents");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let admin = open_as_admin(&mut stdin, &mut reader, &workspace);
    let (unit_id, topic_id) = seed_unit_topic(&mut stdin, &mut reader, &admin, "Punteros");

    let bad_link = request_as(
        &mut stdin,
        &mut reader,
        &admin,
        "1",
        "contents.create",
        json!({ "unitId": unit_id, "kind": "link", "title": "Ref", "body": "ftp://x" }),
    );
    assert_eq!(error_code(&bad_link), Some("bad_params"));
    let bad_kind = request_as(
        &mut stdin,
        &mut reader,
        &admin,
        "2",
        "contents.create",
        json!({ "unitId": unit_id, "kind": "podcast", "title": "Ref", "body": "x" }),
    );
    assert_eq!(error_code(&bad_kind), Some("bad_params"));

    let general = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "3",
        "contents.create",
        json!({ "unitId": unit_id, "kind": "video", "title": "Clase 1", "body": "https://example.org/v.mp4" }),
    );
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "4",
        "contents.create",
        json!({ "unitId": unit_id, "topicId": topic_id, "kind": "text", "title": "Notas", "body": "int *p;" }),
    );
    let hidden = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "5",
        "contents.create",
        json!({ "unitId": unit_id, "topicId": topic_id, "kind": "document", "title": "Borrador",
                "body": "docs/borrador.pdf", "active": false }),
    );

    // A topic from another unit is rejected.
    let (_other_unit, other_topic) = seed_unit_topic(&mut stdin, &mut reader, &admin, "Archivos");
    let wrong_topic = request_as(
        &mut stdin,
        &mut reader,
        &admin,
        "6",
        "contents.create",
        json!({ "unitId": unit_id, "topicId": other_topic, "kind": "text", "title": "X", "body": "y" }),
    );
    assert_eq!(error_code(&wrong_topic), Some("not_found"));

    let opened = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "7",
        "units.open",
        json!({ "unit": unit_id }),
    );
    let general_list = opened["generalContents"].as_array().expect("general");
    assert_eq!(general_list.len(), 1);
    assert_eq!(general_list[0]["kind"], json!("video"));
    assert_eq!(opened["topics"][0]["contentCount"], json!(2));

    let student = create_and_login(&mut stdin, &mut reader, &admin, "tomas", "Usuario", None);
    let seen = request_ok_as(
        &mut stdin,
        &mut reader,
        &student,
        "8",
        "contents.list",
        json!({ "unitId": unit_id, "topicId": topic_id }),
    );
    let seen = seen["contents"].as_array().expect("contents");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["title"], json!("Notas"));

    // A kind change must still fit the stored body.
    let kind_change = request_as(
        &mut stdin,
        &mut reader,
        &admin,
        "9",
        "contents.update",
        json!({ "contentId": str_field(&hidden, "contentId"), "patch": { "kind": "link" } }),
    );
    assert_eq!(error_code(&kind_change), Some("bad_params"));
    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "10",
        "contents.update",
        json!({ "contentId": str_field(&hidden, "contentId"),
                "patch": { "kind": "link", "body": "https://example.org/doc", "active": true } }),
    );
    let seen = request_ok_as(
        &mut stdin,
        &mut reader,
        &student,
        "11",
        "contents.list",
        json!({ "unitId": unit_id, "topicId": topic_id }),
    );
    assert_eq!(seen["contents"].as_array().map(|a| a.len()), Some(2));

    let _ = request_ok_as(
        &mut stdin,
        &mut reader,
        &admin,
        "12",
        "contents.delete",
        json!({ "contentId": str_field(&general, "contentId") }),
    );
    let again = request_as(
        &mut stdin,
        &mut reader,
        &admin,
        "13",
        "contents.delete",
        json!({ "contentId": str_field(&general, "contentId") }),
    );
    assert_eq!(error_code(&again), Some("not_found"));

    let _ = std::fs::remove_dir_all(workspace);
}
