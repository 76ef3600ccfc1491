use crate::config::Settings;
use crate::directive::{parse_directives, Directive};
use crate::error::{io_error, Error, Result};
use crate::hash::{normalize_path, path_hash};
use crate::shaders::output_file_name;
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

pub struct ShaderFile {
    pub path_hash: u32,
    pub full_path: PathBuf,
    pub modified: SystemTime,
    pub content: String,
    pub directives: Vec<Directive>,
    pub outputs: Vec<PathBuf>,
    /// Identities of every file this one includes, directly or not.
    pub dependencies: Vec<u32>,
    pub should_compile: bool,
    pub did_compile: bool,
}

/// The files found by one scan, in path order, indexed by identity.
#[derive(Default)]
pub struct ShaderFiles {
    files: Vec<ShaderFile>,
    by_hash: HashMap<u32, usize>,
    by_output: HashMap<PathBuf, usize>,
}

impl ShaderFile {
    pub fn new(
        full_path: PathBuf,
        modified: SystemTime,
        content: String,
        settings: &Settings,
    ) -> Result<ShaderFile> {
        let full_path = normalize_path(&full_path);
        let directives = parse_directives(&content, &full_path)?;
        let outputs = directives
            .iter()
            .map(|directive| {
                settings.generated_folder.join(output_file_name(
                    &full_path,
                    directive,
                    &settings.generated_extension,
                ))
            })
            .collect();
        Ok(ShaderFile {
            path_hash: path_hash(&full_path),
            full_path,
            modified,
            content,
            directives,
            outputs,
            dependencies: Vec::new(),
            should_compile: false,
            did_compile: true,
        })
    }
}

impl ShaderFiles {
    pub fn insert(&mut self, file: ShaderFile) -> Result<()> {
        if let Some(&existing) = self.by_hash.get(&file.path_hash) {
            return Err(Error::DuplicateIdentity {
                hash: file.path_hash,
                first: self.files[existing].full_path.clone(),
                second: file.full_path,
            });
        }
        for output in &file.outputs {
            if let Some(&existing) = self.by_output.get(output) {
                return Err(Error::DuplicateOutput {
                    output: output.clone(),
                    first: self.files[existing].full_path.clone(),
                    second: file.full_path,
                });
            }
        }
        for output in &file.outputs {
            self.by_output.insert(output.clone(), self.files.len());
        }
        self.by_hash.insert(file.path_hash, self.files.len());
        self.files.push(file);
        Ok(())
    }

    pub fn index_of(&self, path_hash: u32) -> Option<usize> {
        self.by_hash.get(&path_hash).copied()
    }

    pub fn get(&self, path_hash: u32) -> Option<&ShaderFile> {
        self.index_of(path_hash).map(|index| &self.files[index])
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ShaderFile> {
        self.files.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ShaderFile> {
        self.files.iter_mut()
    }
}

impl std::ops::Index<usize> for ShaderFiles {
    type Output = ShaderFile;

    fn index(&self, index: usize) -> &ShaderFile {
        &self.files[index]
    }
}

impl std::ops::IndexMut<usize> for ShaderFiles {
    fn index_mut(&mut self, index: usize) -> &mut ShaderFile {
        &mut self.files[index]
    }
}

/// Collects every shader file under the configured source folder. Pure read.
pub fn scan_shader_files(settings: &Settings) -> Result<ShaderFiles> {
    let mut walker = WalkDir::new(&settings.source_path).sort_by_file_name();
    if !settings.recursive {
        walker = walker.max_depth(1);
    }
    let walker = walker.into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry.file_type().is_dir()
            || !settings
                .skip_folders
                .iter()
                .any(|folder| entry.file_name() == folder.as_str())
    });

    let mut files = ShaderFiles::default();
    for entry in walker {
        let entry = entry.map_err(|err| Error::Io {
            path: err
                .path()
                .map_or_else(|| settings.source_path.clone(), Path::to_path_buf),
            source: err.into(),
        })?;
        if !entry.file_type().is_file() || !settings.is_shader_file(entry.path()) {
            continue;
        }
        let path = entry.path();
        let content = std::fs::read_to_string(path).map_err(io_error(path))?;
        let modified = entry
            .metadata()
            .map_err(|err| Error::Io {
                path: path.to_path_buf(),
                source: err.into(),
            })?
            .modified()
            .map_err(io_error(path))?;
        let file = ShaderFile::new(path.to_path_buf(), modified, content, settings)?;
        debug!(
            "found {} with {} permutation(s)",
            file.full_path.display(),
            file.directives.len()
        );
        files.insert(file)?;
    }
    Ok(files)
}

#[cfg(test)]
fn write(path: &Path, text: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

#[test]
fn scan_filters_and_skips() {
    let root = tempfile::tempdir().unwrap();
    let settings = Settings::with_defaults(root.path());
    let shaders = &settings.source_path;
    write(&shaders.join("a.hlsl"), "// ShaderCompiler. Name: A, Type: VS\n");
    write(&shaders.join("common/lighting.hlsli"), "float3 light;\n");
    write(&shaders.join("notes.txt"), "not a shader");
    write(&shaders.join("generated/old.hlsl"), "// stale copy");

    let files = scan_shader_files(&settings).unwrap();
    let names: Vec<_> = files
        .iter()
        .map(|file| file.full_path.strip_prefix(shaders).unwrap().to_path_buf())
        .collect();
    assert_eq!(
        names,
        [PathBuf::from("a.hlsl"), PathBuf::from("common/lighting.hlsli")]
    );
    assert_eq!(
        files[0].outputs,
        [settings.generated_folder.join("a_A_VS.generated.h")]
    );
    assert!(files[1].directives.is_empty());
}

#[test]
fn scan_can_stay_shallow() {
    let root = tempfile::tempdir().unwrap();
    let mut settings = Settings::with_defaults(root.path());
    settings.recursive = false;
    write(&settings.source_path.join("a.hlsl"), "");
    write(&settings.source_path.join("nested/b.hlsl"), "");
    let files = scan_shader_files(&settings).unwrap();
    assert_eq!(files.len(), 1);
}

#[test]
fn identities_repeat_across_scans() {
    let root = tempfile::tempdir().unwrap();
    let settings = Settings::with_defaults(root.path());
    write(&settings.source_path.join("a.hlsl"), "");
    let first = scan_shader_files(&settings).unwrap();
    let second = scan_shader_files(&settings).unwrap();
    assert_eq!(first[0].path_hash, second[0].path_hash);
    assert!(second.get(first[0].path_hash).is_some());
}

#[test]
fn duplicate_identity_is_fatal() {
    let settings = Settings::with_defaults(Path::new("/project"));
    let mut files = ShaderFiles::default();
    let file = || {
        ShaderFile::new(
            PathBuf::from("/project/Shaders/a.hlsl"),
            SystemTime::UNIX_EPOCH,
            String::new(),
            &settings,
        )
        .unwrap()
    };
    files.insert(file()).unwrap();
    let err = files.insert(file()).unwrap_err();
    assert!(matches!(err, Error::DuplicateIdentity { .. }));
}

#[test]
fn same_stem_in_two_folders_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let settings = Settings::with_defaults(root.path());
    write(&settings.source_path.join("lighting/a.hlsl"), "// ShaderCompiler. Name: Main\n");
    write(&settings.source_path.join("post/a.hlsl"), "// ShaderCompiler. Name: Main\n");
    let Err(Error::DuplicateOutput { output, first, second }) = scan_shader_files(&settings) else {
        panic!("colliding outputs not reported");
    };
    assert_eq!(output, settings.generated_folder.join("a_Main_PS.generated.h"));
    assert!(first.ends_with("lighting/a.hlsl"));
    assert!(second.ends_with("post/a.hlsl"));
}
