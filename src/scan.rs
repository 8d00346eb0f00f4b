//! Loads command-line inputs into a [`Workspace`].
//!
//! The input path becomes the primary resource and each classpath entry a
//! library resource. Paths may be `.class` files, `.jar` files or
//! directories holding either.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use tracing::debug;
use zip::ZipArchive;

use crate::classfile::parse_class;
use crate::workspace::{Resource, Workspace};

const VERSIONS_PREFIX: &str = "META-INF/versions/";

/// Loaded workspace plus the SARIF artifacts describing where classes came from.
pub struct ScanOutput {
    pub workspace: Workspace,
    pub artifacts: Vec<Artifact>,
    pub class_count: usize,
}

/// Mutable state threaded through the walk of one resource.
struct Collector<'a> {
    resource: &'a Resource,
    artifacts: &'a mut Vec<Artifact>,
    class_count: &'a mut usize,
}

pub fn scan_inputs(input: &Path, classpath: &[PathBuf]) -> Result<ScanOutput> {
    let mut artifacts = Vec::new();
    let mut class_count = 0;

    let primary = Resource::new(path_to_uri(input));
    scan_path(
        input,
        true,
        true,
        &mut Collector {
            resource: &primary,
            artifacts: &mut artifacts,
            class_count: &mut class_count,
        },
    )?;
    let workspace = Workspace::new(primary);

    // Keep deterministic ordering by sorting classpath entries and directory listings.
    let mut classpath_entries = classpath.to_vec();
    classpath_entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in classpath_entries {
        let library = Resource::new(path_to_uri(&entry));
        scan_path(
            &entry,
            false,
            true,
            &mut Collector {
                resource: &library,
                artifacts: &mut artifacts,
                class_count: &mut class_count,
            },
        )?;
        debug!(library = library.name(), classes = library.class_count(), "loaded library");
        workspace.add_library(library);
    }

    Ok(ScanOutput {
        workspace,
        artifacts,
        class_count,
    })
}

fn scan_path(
    path: &Path,
    is_input: bool,
    strict: bool,
    collector: &mut Collector<'_>,
) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, collector);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let roles = if is_input {
        Some(vec![
            serde_json::to_value(ArtifactRoles::AnalysisTarget)
                .context("failed to serialize artifact role")?,
        ])
    } else {
        None
    };

    match extension {
        "class" => scan_class_file(path, roles, collector),
        "jar" => scan_jar_file(path, roles, collector),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(path: &Path, collector: &mut Collector<'_>) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, collector)?;
        } else {
            scan_path(&entry, false, false, collector)?;
        }
    }

    Ok(())
}

fn scan_class_file(
    path: &Path,
    roles: Option<Vec<Value>>,
    collector: &mut Collector<'_>,
) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let class = parse_class(&data).with_context(|| format!("failed to parse {}", path.display()))?;
    collector.resource.insert_class(class);
    *collector.class_count += 1;

    push_artifact(path_to_uri(path), data.len() as u64, None, roles, collector.artifacts);
    Ok(())
}

fn scan_jar_file(
    path: &Path,
    roles: Option<Vec<Value>>,
    collector: &mut Collector<'_>,
) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let jar_len = fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .len();
    let jar_index = push_artifact(path_to_uri(path), jar_len, None, roles, collector.artifacts);

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class") && !name.ends_with("module-info.class") {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in entry_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let class = parse_class(&data)
            .with_context(|| format!("failed to parse {}:{}", path.display(), name))?;
        match release_version(&name) {
            Some(version) => collector.resource.insert_versioned_class(version, class),
            None => collector.resource.insert_class(class),
        };
        *collector.class_count += 1;

        push_artifact(
            jar_entry_uri(path, &name),
            entry.size(),
            Some(jar_index),
            None,
            collector.artifacts,
        );
    }

    Ok(())
}

/// Java release of a multi-release jar entry such as
/// `META-INF/versions/17/com/example/App.class`.
fn release_version(entry_name: &str) -> Option<u16> {
    let rest = entry_name.strip_prefix(VERSIONS_PREFIX)?;
    let (version, _) = rest.split_once('/')?;
    version.parse().ok()
}

/// Push an artifact and return its index for parent linkage (e.g., JAR entries).
fn push_artifact(
    uri: String,
    len: u64,
    parent_index: Option<i64>,
    roles: Option<Vec<Value>>,
    artifacts: &mut Vec<Artifact>,
) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match (parent_index, roles) {
        (Some(parent_index), Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .roles(roles)
            .build(),
        (Some(parent_index), None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .build(),
        (None, Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        (None, None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = artifacts.len() as i64;
    artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn jar_entry_uri(jar_path: &Path, entry_name: &str) -> String {
    format!("jar:{}!/{}", jar_path.to_string_lossy(), entry_name)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
