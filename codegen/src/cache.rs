use crate::config::Settings;
use crate::error::{io_error, Error, Result};
use crate::graph::DependencyGraph;
use crate::scan::ShaderFiles;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Durable part of a shader file's build state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCacheEntry {
    pub path_hash: u32,
    pub full_path: PathBuf,
    pub modified: SystemTime,
    pub did_compile: bool,
    pub outputs: Vec<PathBuf>,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildCache {
    entries: BTreeMap<u32, BuildCacheEntry>,
}

#[derive(Debug, Error)]
enum LoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("corrupt cache: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl BuildCache {
    /// Loads the previous run's records. A missing or unreadable cache means no history, which
    /// only costs a full rebuild.
    pub fn load(path: &Path) -> BuildCache {
        match BuildCache::try_load(path) {
            Ok(cache) => cache,
            Err(LoadError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("no build cache at {}", path.display());
                BuildCache::default()
            }
            Err(err) => {
                warn!(
                    "discarding build cache {}, recompiling everything: {err}",
                    path.display()
                );
                BuildCache::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<BuildCache, LoadError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn from_files(files: &ShaderFiles) -> BuildCache {
        let entries = files
            .iter()
            .map(|file| {
                let entry = BuildCacheEntry {
                    path_hash: file.path_hash,
                    full_path: file.full_path.clone(),
                    modified: file.modified,
                    did_compile: file.did_compile,
                    outputs: file.outputs.clone(),
                };
                (file.path_hash, entry)
            })
            .collect();
        BuildCache { entries }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|err| Error::Io {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        std::fs::write(path, json).map_err(io_error(path))
    }

    pub fn get(&self, path_hash: u32) -> Option<&BuildCacheEntry> {
        self.entries.get(&path_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decides which of the current files must be compiled and removes the outputs of files that
    /// no longer exist. Returns whether anything differs from the previous run.
    pub fn diff(
        &self,
        files: &mut ShaderFiles,
        graph: &DependencyGraph,
        settings: &Settings,
    ) -> Result<bool> {
        let mut changed = false;

        for (hash, previous) in &self.entries {
            if files.get(*hash).is_none() {
                info!("{} was removed", previous.full_path.display());
                delete_outputs(&previous.outputs, settings)?;
                changed = true;
            }
        }

        let mut dirty = vec![false; files.len()];
        for (index, file) in files.iter_mut().enumerate() {
            let reason = match self.entries.get(&file.path_hash) {
                None => Some("is new".to_owned()),
                Some(previous) => {
                    let orphans: Vec<PathBuf> = previous
                        .outputs
                        .iter()
                        .filter(|output| !file.outputs.contains(output))
                        .cloned()
                        .collect();
                    if !orphans.is_empty() {
                        delete_outputs(&orphans, settings)?;
                        changed = true;
                    }
                    stale_reason(previous, &file.full_path, file.modified, &file.outputs)
                }
            };
            if let Some(reason) = reason {
                debug!("{} {reason}", file.full_path.display());
                dirty[index] = true;
            }
        }

        for index in 0..files.len() {
            let propagated = !dirty[index]
                && graph
                    .dependencies(index)
                    .iter()
                    .any(|&dependency| dirty[dependency]);
            if propagated {
                debug!(
                    "{} includes a changed file",
                    files[index].full_path.display()
                );
            }
            let file = &mut files[index];
            file.should_compile = dirty[index] || propagated;
            changed |= file.should_compile;
        }

        let identities: Vec<Vec<u32>> = (0..files.len())
            .map(|index| {
                graph
                    .dependencies(index)
                    .iter()
                    .map(|&dependency| files[dependency].path_hash)
                    .collect()
            })
            .collect();
        for (file, dependencies) in files.iter_mut().zip(identities) {
            file.dependencies = dependencies;
        }

        Ok(changed)
    }
}

fn stale_reason(
    previous: &BuildCacheEntry,
    full_path: &Path,
    modified: SystemTime,
    outputs: &[PathBuf],
) -> Option<String> {
    if !previous.did_compile {
        Some("failed to compile previously".to_owned())
    } else if previous.modified != modified {
        Some("was modified".to_owned())
    } else if previous.full_path != full_path {
        Some(format!("shares its identity with {}", previous.full_path.display()))
    } else {
        previous
            .outputs
            .iter()
            .chain(outputs)
            .find(|output| !output.exists())
            .map(|output| format!("is missing its output {}", output.display()))
    }
}

/// Removes generated outputs. Every path must carry the generated extension so that nothing but
/// build artifacts can ever be deleted.
pub fn delete_outputs(outputs: &[PathBuf], settings: &Settings) -> Result<()> {
    if let Some(unknown) = outputs.iter().find(|output| {
        !output
            .to_string_lossy()
            .ends_with(settings.generated_extension.as_str())
    }) {
        return Err(Error::UnknownOutputExtension {
            path: unknown.clone(),
        });
    }
    for output in outputs {
        match std::fs::remove_file(output) {
            Ok(()) => info!("deleted {}", output.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(output)(err)),
        }
    }
    Ok(())
}

#[cfg(test)]
struct Fixture {
    _root: tempfile::TempDir,
    settings: Settings,
}

#[cfg(test)]
impl Fixture {
    fn new(files: &[(&str, &str)]) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings::with_defaults(root.path());
        std::fs::create_dir_all(&settings.generated_folder).unwrap();
        let fixture = Fixture {
            _root: root,
            settings,
        };
        for (name, text) in files {
            fixture.write(name, text);
        }
        fixture
    }

    fn write(&self, name: &str, text: &str) {
        let path = self.settings.source_path.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn scan(&self) -> (ShaderFiles, DependencyGraph) {
        let files = crate::scan::scan_shader_files(&self.settings).unwrap();
        let graph = DependencyGraph::build(&files).unwrap();
        (files, graph)
    }

    /// Simulates a successful build of the current tree.
    fn built_cache(&self) -> BuildCache {
        let (files, _) = self.scan();
        for file in files.iter() {
            for output in &file.outputs {
                std::fs::write(output, "const unsigned char g_X[] = { 0 };").unwrap();
            }
        }
        BuildCache::from_files(&files)
    }

    fn diff(&self, cache: &BuildCache) -> (bool, Vec<(String, bool)>) {
        let (mut files, graph) = self.scan();
        let changed = cache.diff(&mut files, &graph, &self.settings).unwrap();
        let flags = files
            .iter()
            .map(|file| {
                let name = file.full_path.file_name().unwrap().to_string_lossy();
                (name.into_owned(), file.should_compile)
            })
            .collect();
        (changed, flags)
    }
}

#[cfg(test)]
fn flag(flags: &[(String, bool)], name: &str) -> bool {
    flags.iter().find(|(file, _)| file == name).unwrap().1
}

#[test]
fn first_build_compiles_everything() {
    let fixture = Fixture::new(&[("a.hlsl", "// ShaderCompiler. Name: A"), ("b.hlsli", "")]);
    let (changed, flags) = fixture.diff(&BuildCache::default());
    assert!(changed);
    assert!(flags.iter().all(|(_, should_compile)| *should_compile));
}

#[test]
fn unchanged_tree_is_up_to_date() {
    let fixture = Fixture::new(&[("a.hlsl", "// ShaderCompiler. Name: A"), ("b.hlsli", "")]);
    let cache = fixture.built_cache();
    let (changed, flags) = fixture.diff(&cache);
    assert!(!changed);
    assert!(flags.iter().all(|(_, should_compile)| !*should_compile));
}

#[test]
fn modification_time_triggers_compile() {
    let fixture = Fixture::new(&[("a.hlsl", ""), ("b.hlsl", "")]);
    let mut cache = fixture.built_cache();
    let (files, _) = fixture.scan();
    let a = files.iter().find(|file| file.full_path.ends_with("a.hlsl")).unwrap();
    cache.entries.get_mut(&a.path_hash).unwrap().modified = SystemTime::UNIX_EPOCH;
    let (changed, flags) = fixture.diff(&cache);
    assert!(changed);
    assert!(flag(&flags, "a.hlsl"));
    assert!(!flag(&flags, "b.hlsl"));
}

#[test]
fn failed_files_are_retried() {
    let fixture = Fixture::new(&[("a.hlsl", "// ShaderCompiler. Name: A")]);
    let mut cache = fixture.built_cache();
    for entry in cache.entries.values_mut() {
        entry.did_compile = false;
    }
    let (changed, flags) = fixture.diff(&cache);
    assert!(changed);
    assert!(flag(&flags, "a.hlsl"));
}

#[test]
fn missing_output_triggers_compile() {
    let fixture = Fixture::new(&[("a.hlsl", "// ShaderCompiler. Name: A")]);
    let cache = fixture.built_cache();
    std::fs::remove_file(fixture.settings.generated_folder.join("a_A_PS.generated.h")).unwrap();
    let (changed, flags) = fixture.diff(&cache);
    assert!(changed);
    assert!(flag(&flags, "a.hlsl"));
}

#[test]
fn changes_propagate_through_includes() {
    let fixture = Fixture::new(&[
        ("a.hlsl", "#include \"b.hlsli\"\n"),
        ("b.hlsli", "#include \"c.hlsli\"\n"),
        ("c.hlsli", ""),
        ("d.hlsl", ""),
    ]);
    let mut cache = fixture.built_cache();
    let (files, _) = fixture.scan();
    let c = files.iter().find(|file| file.full_path.ends_with("c.hlsli")).unwrap();
    cache.entries.get_mut(&c.path_hash).unwrap().modified = SystemTime::UNIX_EPOCH;
    let (changed, flags) = fixture.diff(&cache);
    assert!(changed);
    assert!(flag(&flags, "a.hlsl"));
    assert!(flag(&flags, "b.hlsli"));
    assert!(flag(&flags, "c.hlsli"));
    assert!(!flag(&flags, "d.hlsl"));
}

#[test]
fn removed_file_deletes_its_outputs() {
    let fixture = Fixture::new(&[("a.hlsl", "// ShaderCompiler. Name: A"), ("b.hlsl", "")]);
    let cache = fixture.built_cache();
    let output = fixture.settings.generated_folder.join("a_A_PS.generated.h");
    assert!(output.exists());
    std::fs::remove_file(fixture.settings.source_path.join("a.hlsl")).unwrap();
    let (changed, flags) = fixture.diff(&cache);
    assert!(changed);
    assert!(!output.exists());
    assert!(!flag(&flags, "b.hlsl"));
}

#[test]
fn dropped_permutation_output_is_deleted() {
    let fixture = Fixture::new(&[(
        "a.hlsl",
        "// ShaderCompiler. Name: A\n// ShaderCompiler. Name: B",
    )]);
    let cache = fixture.built_cache();
    fixture.write("a.hlsl", "// ShaderCompiler. Name: A");
    let dropped = fixture.settings.generated_folder.join("a_B_PS.generated.h");
    assert!(dropped.exists());
    let (changed, _) = fixture.diff(&cache);
    assert!(changed);
    assert!(!dropped.exists());
}

#[test]
fn unknown_output_extension_is_fatal() {
    let fixture = Fixture::new(&[("b.hlsl", "")]);
    let mut cache = fixture.built_cache();
    let source = fixture.settings.source_path.join("gone.hlsl");
    let hash = crate::hash::path_hash(&source);
    cache.entries.insert(
        hash,
        BuildCacheEntry {
            path_hash: hash,
            full_path: source,
            modified: SystemTime::UNIX_EPOCH,
            did_compile: true,
            outputs: vec![fixture.settings.source_path.join("important.cpp")],
        },
    );
    let (mut files, graph) = fixture.scan();
    let err = cache.diff(&mut files, &graph, &fixture.settings).unwrap_err();
    assert!(matches!(err, Error::UnknownOutputExtension { .. }));
}

#[test]
fn persisted_cache_loads_back() {
    let fixture = Fixture::new(&[("a.hlsl", "// ShaderCompiler. Name: A")]);
    let cache = fixture.built_cache();
    cache.save(&fixture.settings.cache_path).unwrap();
    let loaded = BuildCache::load(&fixture.settings.cache_path);
    assert_eq!(loaded, cache);
    assert_eq!(loaded.len(), 1);
}

#[test]
fn corrupt_cache_means_no_history() {
    let fixture = Fixture::new(&[]);
    std::fs::write(&fixture.settings.cache_path, b"\x00\x01 not json").unwrap();
    assert!(BuildCache::load(&fixture.settings.cache_path).is_empty());
    assert!(BuildCache::load(&fixture.settings.generated_folder.join("missing.json")).is_empty());
}
