use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::seq::index::sample;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::storage::jsonlines::{create_maybe_gzip, JsonLines, TolerantLines};
use crate::utils::domain::registered_domain;

/// Item archives of a crawl output tree: `root/*/*.jl` and `root/*/*.jl.gz`, sorted
pub fn find_archives(root: &Path) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();

    let entries = fs::read_dir(root)
        .context(format!("Failed to read directory: {}", root.display()))?;

    for entry in entries {
        let dir = entry?.path();
        if !dir.is_dir() {
            continue;
        }
        for file in fs::read_dir(&dir)? {
            let path = file?.path();
            let is_archive = path.file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.ends_with(".jl") || name.ends_with(".jl.gz"));
            if is_archive && path.is_file() {
                archives.push(path);
            }
        }
    }

    archives.sort();
    Ok(archives)
}

/// Write every exported item under `root` as a `domain,url,key` row of a
/// gzipped CSV. Returns item counts per domain, largest first.
pub fn export_profiles(root: &Path, output: &Path) -> Result<Vec<(String, usize)>> {
    let file = File::create(output)
        .context(format!("Failed to create output file: {}", output.display()))?;
    let mut writer = csv::Writer::from_writer(GzEncoder::new(file, Compression::default()));

    let mut by_domain: HashMap<String, usize> = HashMap::new();

    for archive in find_archives(root)? {
        debug!("Reading {}", archive.display());

        for item in JsonLines::open(&archive)? {
            let (Some(url), Some(key)) = (item["url"].as_str(), item["key"].as_str()) else {
                warn!("Skipping item without url or key in {}", archive.display());
                continue;
            };
            let domain = registered_domain(url);
            writer.write_record([domain.as_str(), url, key])?;
            *by_domain.entry(domain).or_default() += 1;
        }
    }

    writer.into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush {}: {}", output.display(), e.error()))?
        .finish()?;

    let mut stats: Vec<(String, usize)> = by_domain.into_iter().collect();
    stats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Ok(stats)
}

/// Copy up to `n` random lines of every archive under `root` into `output`,
/// keeping file names and line order. Returns the number of files written.
pub fn sample_profiles(root: &Path, output: &Path, n: usize) -> Result<usize> {
    fs::create_dir_all(output)
        .context(format!("Failed to create directory: {}", output.display()))?;

    let mut rng = rand::thread_rng();
    let mut written = 0;

    for archive in find_archives(root)? {
        info!("Reading {} ...", archive.display());

        let n_lines = TolerantLines::open(&archive)?.count();
        if n_lines == 0 {
            continue;
        }

        let picked: HashSet<usize> = sample(&mut rng, n_lines, n.min(n_lines)).into_iter().collect();

        let Some(name) = archive.file_name() else {
            continue;
        };
        let mut out = create_maybe_gzip(&output.join(name))?;
        for (index, line) in TolerantLines::open(&archive)?.enumerate() {
            if picked.contains(&index) {
                writeln!(out, "{}", line)?;
            }
        }
        out.finish()
            .context(format!("Failed to finish sample of {}", archive.display()))?;
        written += 1;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    fn write_archive(path: &Path, lines: &[&str]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut writer = create_maybe_gzip(path).unwrap();
        for line in lines {
            writeln!(writer, "{}", line).unwrap();
        }
        writer.finish().unwrap();
    }

    fn crawl_tree() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        write_archive(
            &root.path().join("crawl-a").join("a.jl.gz"),
            &[
                r#"{"url": "http://www.example.com/u/ann", "key": "ann"}"#,
                r#"{"url": "http://forum.example.com/u/bob", "key": "bob"}"#,
                r#"{"url": "http://other.org/users/cid", "key": "cid"}"#,
            ],
        );
        write_archive(
            &root.path().join("crawl-b").join("b.jl.gz"),
            &[
                r#"{"url": "http://example.com/u/dee", "key": "dee"}"#,
                r#"{"url": "http://exa"#,
            ],
        );
        fs::write(root.path().join("crawl-b").join("notes.txt"), "ignored").unwrap();
        root
    }

    #[test]
    fn test_export_profiles_counts_by_domain() {
        let root = crawl_tree();
        let output = root.path().join("profiles.csv.gz");

        let stats = export_profiles(root.path(), &output).unwrap();
        assert_eq!(
            stats,
            vec![("example.com".to_string(), 3), ("other.org".to_string(), 1)]
        );

        let mut csv_text = String::new();
        MultiGzDecoder::new(File::open(&output).unwrap())
            .read_to_string(&mut csv_text)
            .unwrap();
        assert_eq!(csv_text.lines().count(), 4);
        assert!(csv_text.contains("example.com,http://forum.example.com/u/bob,bob"));
    }

    #[test]
    fn test_sample_profiles_limits_lines_per_archive() {
        let root = crawl_tree();
        let output = root.path().join("sample");

        let written = sample_profiles(root.path(), &output, 2).unwrap();
        assert_eq!(written, 2);

        let sampled: Vec<String> = TolerantLines::open(&output.join("a.jl.gz"))
            .unwrap()
            .collect();
        assert_eq!(sampled.len(), 2);
    }
}
