#[path = "../src/backup.rs"]
mod backup;

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn write_workspace_db(path: &Path) {
    let conn = rusqlite::Connection::open(path).expect("open db");
    conn.execute_batch(
        "CREATE TABLE users(id TEXT PRIMARY KEY, username TEXT NOT NULL);
         INSERT INTO users(id, username) VALUES ('u1', 'admin');",
    )
    .expect("seed db");
}

/// Bundle whose manifest carries the real checksum of `payload`.
fn write_bundle(path: &Path, payload: &[u8]) {
    let f = File::create(path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(f);
    let opts = zip::write::FileOptions::default();
    zip.start_file("manifest.json", opts).expect("manifest");
    zip.write_all(
        serde_json::json!({
            "format": backup::BUNDLE_FORMAT,
            "dbSha256": format!("{:x}", Sha256::digest(payload)),
        })
        .to_string()
        .as_bytes(),
    )
    .expect("write manifest");
    zip.start_file("db/lsvcode.sqlite3", opts).expect("db entry");
    zip.write_all(payload).expect("write db");
    zip.finish().expect("finish");
}

fn read_manifest(bundle: &Path) -> serde_json::Value {
    let f = File::open(bundle).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    serde_json::from_str(&manifest).expect("manifest json")
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("lsvcode-backup-src");
    let workspace2 = temp_dir("lsvcode-backup-dst");
    let out_dir = temp_dir("lsvcode-backup-out");

    write_workspace_db(&workspace.join("lsvcode.sqlite3"));
    let bytes = std::fs::read(workspace.join("lsvcode.sqlite3")).expect("read source db");

    let bundle_path = out_dir.join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256, format!("{:x}", Sha256::digest(&bytes)));

    let manifest = read_manifest(&bundle_path);
    assert_eq!(manifest["format"], serde_json::json!(backup::BUNDLE_FORMAT));
    assert_eq!(manifest["dbSha256"], serde_json::json!(export.db_sha256));
    assert!(manifest["exportedAt"].as_str().is_some());

    let staged = backup::stage_workspace_bundle(&bundle_path, &workspace2).expect("stage bundle");
    // Staging leaves the destination untouched.
    assert!(!workspace2.join("lsvcode.sqlite3").exists());
    let import = staged.commit().expect("commit import");
    assert_eq!(import.bundle_format, backup::BUNDLE_FORMAT);

    let restored = std::fs::read(workspace2.join("lsvcode.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_bundle_is_rejected() {
    let workspace = temp_dir("lsvcode-backup-tamper");
    let out_dir = temp_dir("lsvcode-backup-tamper-out");
    let live = workspace.join("lsvcode.sqlite3");
    std::fs::write(&live, b"live-db").expect("write live db");

    // Manifest claims one checksum, the database entry has other bytes.
    let bundle = out_dir.join("tampered.zip");
    {
        let f = File::create(&bundle).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(
            serde_json::json!({
                "format": backup::BUNDLE_FORMAT,
                "dbSha256": "0000000000000000000000000000000000000000000000000000000000000000",
            })
            .to_string()
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/lsvcode.sqlite3", opts).expect("db entry");
        zip.write_all(b"evil").expect("write db");
        zip.finish().expect("finish");
    }

    let e = backup::stage_workspace_bundle(&bundle, &workspace).expect_err("tampered bundle");
    assert!(format!("{e:#}").contains("checksum mismatch"));
    assert_eq!(std::fs::read(&live).expect("live db"), b"live-db");
    assert!(!workspace.join("lsvcode.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn foreign_bundle_format_is_rejected() {
    let workspace = temp_dir("lsvcode-backup-format");
    let out_dir = temp_dir("lsvcode-backup-format-out");
    let bundle = out_dir.join("other.zip");
    {
        let f = File::create(&bundle).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        zip.start_file("manifest.json", zip::write::FileOptions::default())
            .expect("manifest");
        zip.write_all(br#"{"format":"other-workspace-v9"}"#)
            .expect("write manifest");
        zip.finish().expect("finish");
    }

    let e = backup::stage_workspace_bundle(&bundle, &workspace).expect_err("foreign bundle");
    assert!(e.to_string().contains("unsupported bundle format"));

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn bundle_with_matching_checksum_must_still_hold_a_workspace_database() {
    let workspace = temp_dir("lsvcode-backup-garbage");
    let out_dir = temp_dir("lsvcode-backup-garbage-out");
    let live = workspace.join("lsvcode.sqlite3");
    write_workspace_db(&live);
    let live_bytes = std::fs::read(&live).expect("live db");

    let garbage = out_dir.join("garbage.zip");
    write_bundle(&garbage, b"not a sqlite database at all");
    let e = backup::stage_workspace_bundle(&garbage, &workspace).expect_err("garbage payload");
    assert!(format!("{e:#}").contains("bundle database"));

    // A valid SQLite file without the workspace schema is rejected too.
    let other_db = out_dir.join("other.sqlite3");
    rusqlite::Connection::open(&other_db)
        .expect("open other db")
        .execute_batch("CREATE TABLE notes(body TEXT);")
        .expect("seed other db");
    let foreign = out_dir.join("foreign-db.zip");
    write_bundle(&foreign, &std::fs::read(&other_db).expect("other db bytes"));
    let e = backup::stage_workspace_bundle(&foreign, &workspace).expect_err("foreign schema");
    assert!(e.to_string().contains("not a workspace database"));

    assert_eq!(std::fs::read(&live).expect("live db"), live_bytes);
    assert!(!workspace.join("lsvcode.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(out_dir);
}
