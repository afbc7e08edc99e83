use anyhow::{anyhow, Context};
use rusqlite::{Connection, OpenFlags};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DB_FILE_NAME: &str = "lsvcode.sqlite3";
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/lsvcode.sqlite3";
pub const BUNDLE_FORMAT: &str = "lsvcode-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format: String,
    pub exported_at: Option<String>,
}

/// An extracted and verified database waiting to replace the live one.
#[derive(Debug)]
pub struct StagedImport {
    staged: PathBuf,
    dst: PathBuf,
    summary: ImportSummary,
}

fn sha256_hex<R: Read>(mut r: R) -> anyhow::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = r.read(&mut buf).context("failed to read data for checksum")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    let db_sha256 = sha256_hex(
        File::open(&db_path)
            .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?,
    )?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "dbSha256": db_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        entry_count: 2,
        db_sha256,
    })
}

/// Extracts the bundle's database next to the live one and checks it
/// against the manifest checksum. The live database is not touched.
pub fn stage_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<StagedImport> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected_sha = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json has no dbSha256"))?
        .to_ascii_lowercase();

    let staged = workspace_path.join(format!("{}.importing", DB_FILE_NAME));
    if staged.exists() {
        let _ = std::fs::remove_file(&staged);
    }
    let mut db_out = File::create(&staged).with_context(|| {
        format!(
            "failed to create temp database {}",
            staged.to_string_lossy()
        )
    })?;
    {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing db/lsvcode.sqlite3")?;
        std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
    }
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    drop(db_out);

    let actual_sha = sha256_hex(
        File::open(&staged)
            .with_context(|| format!("failed to reopen {}", staged.to_string_lossy()))?,
    )?;
    if actual_sha != expected_sha {
        let _ = std::fs::remove_file(&staged);
        return Err(anyhow!(
            "database checksum mismatch: manifest {}, bundle {}",
            expected_sha,
            actual_sha
        ));
    }
    if let Err(e) = check_workspace_database(&staged) {
        let _ = std::fs::remove_file(&staged);
        return Err(e);
    }

    Ok(StagedImport {
        staged,
        dst: workspace_path.join(DB_FILE_NAME),
        summary: ImportSummary {
            bundle_format: BUNDLE_FORMAT.to_string(),
            exported_at: manifest
                .get("exportedAt")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        },
    })
}

/// The staged file must be an intact SQLite database holding a workspace
/// (a `users` table). An empty file opens as an empty database, so the
/// table check is what rejects it.
fn check_workspace_database(path: &Path) -> anyhow::Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .context("bundle database cannot be opened")?;
    let verdict: String = conn
        .query_row("PRAGMA integrity_check", [], |r| r.get(0))
        .context("bundle database is not a valid SQLite file")?;
    if verdict != "ok" {
        return Err(anyhow!("bundle database failed integrity check: {}", verdict));
    }
    let has_users: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'users'",
            [],
            |r| r.get(0),
        )
        .context("failed to read bundle database schema")?;
    if has_users == 0 {
        return Err(anyhow!("bundle database is not a workspace database"));
    }
    Ok(())
}

impl StagedImport {
    /// Replaces the live database in one rename, so the old file stays in
    /// place until the swap succeeds. Any open connection to it must be
    /// closed first.
    pub fn commit(self) -> anyhow::Result<ImportSummary> {
        std::fs::rename(&self.staged, &self.dst).with_context(|| {
            format!(
                "failed to move extracted database to {}",
                self.dst.to_string_lossy()
            )
        })?;
        Ok(self.summary)
    }
}
