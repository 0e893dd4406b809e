use anyhow::{anyhow, Context};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_FILE: &str = "gradebook.sqlite3";
const DB_ENTRY: &str = "db/gradebook.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
const USERDATA_DIR: &str = "userdata";
pub const BUNDLE_FORMAT: &str = "gradebook-workspace-v1";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub bundle_format: String,
    pub db_sha256: String,
    pub user_data_files: usize,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn write_json_entry(
    zip: &mut ZipWriter<File>,
    opts: FileOptions,
    name: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start {} entry", name))?;
    zip.write_all(
        serde_json::to_string_pretty(value)
            .with_context(|| format!("failed to serialize {}", name))?
            .as_bytes(),
    )
    .with_context(|| format!("failed to write {} entry", name))?;
    Ok(())
}

/// Bundles the workspace database and user-data blobs into a zip whose manifest
/// records the database checksum.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.to_string_lossy()))?;
    let db_sha256 = sha256_hex(&db_bytes);

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
    write_json_entry(&mut zip, opts, MANIFEST_ENTRY, &manifest)?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;
    let mut entry_count = 2;

    let userdata = workspace_path.join(USERDATA_DIR);
    if userdata.is_dir() {
        let mut files: Vec<_> = std::fs::read_dir(&userdata)
            .with_context(|| format!("failed to list {}", userdata.to_string_lossy()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
            .collect();
        files.sort();
        for path in files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            zip.start_file(format!("{}/{}", USERDATA_DIR, name), opts)
                .with_context(|| format!("failed to start user data entry {}", name))?;
            let mut f = File::open(&path)
                .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
            std::io::copy(&mut f, &mut zip)
                .with_context(|| format!("failed to write user data entry {}", name))?;
            entry_count += 1;
        }
    }

    let workspace_meta = json!({
        "sourceWorkspace": workspace_path.to_string_lossy(),
    });
    write_json_entry(&mut zip, opts, META_WORKSPACE_ENTRY, &workspace_meta)?;
    entry_count += 1;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        entry_count,
        db_sha256,
    })
}

/// Restores a bundle into `workspace_path`. The bundle is checked before anything in
/// the workspace is replaced; the database is extracted to a temp file and renamed.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
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
    let expected = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json has no dbSha256"))?
        .to_string();

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/gradebook.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;
    let actual = sha256_hex(&db_bytes);
    if actual != expected {
        return Err(anyhow!(
            "database checksum mismatch: manifest {} but bundle holds {}",
            expected,
            actual
        ));
    }

    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE);
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE));
    {
        let mut db_out = File::create(&tmp_dst).with_context(|| {
            format!(
                "failed to create temp database {}",
                tmp_dst.to_string_lossy()
            )
        })?;
        db_out
            .write_all(&db_bytes)
            .context("failed to write extracted database")?;
        db_out
            .flush()
            .context("failed to flush extracted database")?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    let userdata = workspace_path.join(USERDATA_DIR);
    let prefix = format!("{}/", USERDATA_DIR);
    let mut user_data_files = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("failed to read bundle entry")?;
        let Some(name) = entry.name().strip_prefix(&prefix).map(str::to_string) else {
            continue;
        };
        // Flat file names only.
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            continue;
        }
        std::fs::create_dir_all(&userdata)
            .with_context(|| format!("failed to create {}", userdata.to_string_lossy()))?;
        let mut out = File::create(userdata.join(&name))
            .with_context(|| format!("failed to restore user data {}", name))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to restore user data {}", name))?;
        user_data_files += 1;
    }

    Ok(ImportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        db_sha256: actual,
        user_data_files,
    })
}
