use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/edupro.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
pub const BUNDLE_FORMAT: &str = "edupro-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join("edupro.sqlite3");
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.to_string_lossy()))?;
    let db_sha256 = hex::encode(Sha256::digest(&db_bytes));

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
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
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;

    let workspace_meta = json!({
        "sourceWorkspace": workspace_path.to_string_lossy(),
    });
    zip.start_file(META_WORKSPACE_ENTRY, opts)
        .context("failed to start workspace metadata entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&workspace_meta)
            .context("failed to serialize workspace metadata")?
            .as_bytes(),
    )
    .context("failed to write workspace metadata entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        entry_count: 3,
        db_sha256,
    })
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join("edupro.sqlite3");

    if !is_zip_file(in_path)? {
        // A bare .sqlite3 file is accepted as a bundle of one.
        std::fs::copy(in_path, &dst).with_context(|| {
            format!(
                "failed to copy raw sqlite backup from {} to {}",
                in_path.to_string_lossy(),
                dst.to_string_lossy()
            )
        })?;
        return Ok(ImportSummary {
            bundle_format_detected: "raw-sqlite3".to_string(),
        });
    }

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

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/edupro.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;

    // Older export tools may omit the digest; only verify when present.
    if let Some(expected) = manifest.get("dbSha256").and_then(|v| v.as_str()) {
        let actual = hex::encode(Sha256::digest(&db_bytes));
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(anyhow!(
                "database digest mismatch: manifest {} != bundle {}",
                expected,
                actual
            ));
        }
    }

    let tmp_dst = workspace_path.join("edupro.sqlite3.importing");
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

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
    drop(db_out);

    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT.to_string(),
    })
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("eduprod-backup-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn export_then_import_restores_database_bytes() {
        let src_ws = temp_dir("src");
        let db_bytes = b"SQLite format 3\0fake-but-stable".to_vec();
        std::fs::write(src_ws.join("edupro.sqlite3"), &db_bytes).expect("seed db");

        let out = temp_dir("out").join("bundle.zip");
        let summary = export_workspace_bundle(&src_ws, &out).expect("export");
        assert_eq!(summary.bundle_format, BUNDLE_FORMAT);
        assert_eq!(summary.entry_count, 3);
        assert_eq!(summary.db_sha256, hex::encode(Sha256::digest(&db_bytes)));

        let dst_ws = temp_dir("dst");
        let imported = import_workspace_bundle(&out, &dst_ws).expect("import");
        assert_eq!(imported.bundle_format_detected, BUNDLE_FORMAT);
        let restored = std::fs::read(dst_ws.join("edupro.sqlite3")).expect("read restored");
        assert_eq!(restored, db_bytes);
    }

    #[test]
    fn raw_sqlite_file_is_accepted() {
        let dir = temp_dir("raw");
        let raw = dir.join("plain.sqlite3");
        std::fs::write(&raw, b"SQLite format 3\0raw").expect("seed raw file");

        let dst_ws = temp_dir("rawdst");
        let imported = import_workspace_bundle(&raw, &dst_ws).expect("import raw");
        assert_eq!(imported.bundle_format_detected, "raw-sqlite3");
        assert!(dst_ws.join("edupro.sqlite3").is_file());
    }

    #[test]
    fn foreign_bundle_format_is_rejected() {
        let ws = temp_dir("foreign");
        std::fs::write(ws.join("edupro.sqlite3"), b"SQLite format 3\0x").expect("seed db");
        let out = temp_dir("foreignout").join("bundle.zip");
        export_workspace_bundle(&ws, &out).expect("export");

        // Rewrite the manifest with an alien format tag.
        let bytes = std::fs::read(&out).expect("read bundle");
        let mut archive = ZipArchive::new(std::io::Cursor::new(bytes)).expect("open bundle");
        let forged_path = temp_dir("forged").join("forged.zip");
        let forged_file = File::create(&forged_path).expect("create forged");
        let mut writer = ZipWriter::new(forged_file);
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).expect("entry");
            let name = entry.name().to_string();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).expect("read entry");
            if name == MANIFEST_ENTRY {
                content = serde_json::to_vec(&json!({ "format": "someone-elses-bundle" }))
                    .expect("forged manifest");
            }
            writer.start_file(name, opts).expect("start entry");
            writer.write_all(&content).expect("write entry");
        }
        writer.finish().expect("finish forged");

        let dst = temp_dir("foreigndst");
        let err = import_workspace_bundle(&forged_path, &dst).expect_err("must reject");
        assert!(err.to_string().contains("unsupported bundle format"));
    }

    #[test]
    fn corrupted_database_entry_fails_digest_check() {
        let ws = temp_dir("digest");
        std::fs::write(ws.join("edupro.sqlite3"), b"SQLite format 3\0y").expect("seed db");
        let out = temp_dir("digestout").join("bundle.zip");
        export_workspace_bundle(&ws, &out).expect("export");

        let bytes = std::fs::read(&out).expect("read bundle");
        let mut archive = ZipArchive::new(std::io::Cursor::new(bytes)).expect("open bundle");
        let forged_path = temp_dir("digestforged").join("forged.zip");
        let forged_file = File::create(&forged_path).expect("create forged");
        let mut writer = ZipWriter::new(forged_file);
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).expect("entry");
            let name = entry.name().to_string();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).expect("read entry");
            if name == DB_ENTRY {
                content.extend_from_slice(b"tampered");
            }
            writer.start_file(name, opts).expect("start entry");
            writer.write_all(&content).expect("write entry");
        }
        writer.finish().expect("finish forged");

        let dst = temp_dir("digestdst");
        let err = import_workspace_bundle(&forged_path, &dst).expect_err("must reject");
        assert!(err.to_string().contains("digest mismatch"));
    }
}
