use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const BUNDLE_FORMAT: &str = "rapor-bundle-v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    pub file_name: String,
    pub student_name: String,
    pub sha256: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    pub format: String,
    pub app_version: String,
    pub exported_at: String,
    pub files: Vec<BundleEntry>,
}

/// One rendered report waiting to go into a bundle.
pub struct BundleFile {
    pub student_name: String,
    pub file_name: String,
    pub pdf: Vec<u8>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Two students can map to the same file name; later ones get a counter.
fn unique_name(taken: &mut BTreeSet<String>, file_name: &str) -> String {
    if taken.insert(file_name.to_string()) {
        return file_name.to_string();
    }
    let (stem, ext) = file_name.rsplit_once('.').unwrap_or((file_name, ""));
    let mut n = 2;
    loop {
        let candidate = if ext.is_empty() {
            format!("{}_{}", stem, n)
        } else {
            format!("{}_{}.{}", stem, n, ext)
        };
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

pub fn write_report_bundle(out_path: &Path, files: &[BundleFile]) -> anyhow::Result<BundleManifest> {
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

    let mut taken = BTreeSet::new();
    let mut entries = Vec::with_capacity(files.len());
    for f in files {
        let name = unique_name(&mut taken, &f.file_name);
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", name))?;
        zip.write_all(&f.pdf)
            .with_context(|| format!("failed to write entry {}", name))?;
        entries.push(BundleEntry {
            file_name: name,
            student_name: f.student_name.clone(),
            sha256: sha256_hex(&f.pdf),
            bytes: f.pdf.len(),
        });
    }

    let manifest = BundleManifest {
        format: BUNDLE_FORMAT.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        files: entries,
    };
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    Ok(manifest)
}

/// Reads a bundle back and checks every file against its manifest hash.
pub fn verify_bundle(path: &Path) -> anyhow::Result<BundleManifest> {
    let file = File::open(path)
        .with_context(|| format!("failed to open bundle {}", path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: BundleManifest =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid")?;
    if manifest.format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", manifest.format));
    }

    for entry in &manifest.files {
        let mut bytes = Vec::new();
        archive
            .by_name(&entry.file_name)
            .with_context(|| format!("bundle missing {}", entry.file_name))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}", entry.file_name))?;
        if sha256_hex(&bytes) != entry.sha256 {
            return Err(anyhow!("checksum mismatch for {}", entry.file_name));
        }
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(student: &str, name: &str, body: &[u8]) -> BundleFile {
        BundleFile {
            student_name: student.to_string(),
            file_name: name.to_string(),
            pdf: body.to_vec(),
        }
    }

    #[test]
    fn bundle_manifest_hashes_every_file() {
        let dir = std::env::temp_dir().join(format!("rapord-bundle-{}", uuid::Uuid::new_v4()));
        let out = dir.join("rapor.zip");
        let written = write_report_bundle(
            &out,
            &[
                file("Ana Putri", "Rapor_Ana_Putri.pdf", b"%PDF-ana"),
                file("Ana  Putri", "Rapor_Ana_Putri.pdf", b"%PDF-ana2"),
                file("Budi", "Rapor_Budi.pdf", b"%PDF-budi"),
            ],
        )
        .expect("write");
        let names: Vec<&str> = written.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Rapor_Ana_Putri.pdf", "Rapor_Ana_Putri_2.pdf", "Rapor_Budi.pdf"]
        );

        let read = verify_bundle(&out).expect("verify");
        assert_eq!(read, written);
        assert_eq!(read.format, BUNDLE_FORMAT);
        assert_eq!(read.files[2].sha256, sha256_hex(b"%PDF-budi"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn non_zip_is_rejected() {
        let dir = std::env::temp_dir().join(format!("rapord-bundle-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("not.zip");
        std::fs::write(&path, b"plain text").expect("write");
        assert!(verify_bundle(&path).is_err());
        let _ = std::fs::remove_dir_all(dir);
    }
}
