use crate::error::{Error, Result};
use crate::hash::{normalize_path, path_hash};
use crate::scan::ShaderFiles;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

/// Include edges between the files of one scan, indexed like [`ShaderFiles`].
pub struct DependencyGraph {
    direct: Vec<Vec<usize>>,
    transitive: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

impl DependencyGraph {
    pub fn build(files: &ShaderFiles) -> Result<DependencyGraph> {
        let direct = files
            .iter()
            .map(|file| direct_dependencies(&file.full_path, &file.content, files))
            .collect::<Result<Vec<_>>>()?;

        let mut walk = Walk {
            files,
            direct: &direct,
            state: vec![Visit::New; files.len()],
            stack: Vec::new(),
            transitive: vec![Vec::new(); files.len()],
        };
        for index in 0..files.len() {
            walk.visit(index)?;
        }
        let transitive = walk.transitive;
        Ok(DependencyGraph { direct, transitive })
    }

    pub fn direct(&self, index: usize) -> &[usize] {
        &self.direct[index]
    }

    /// Every file reachable through includes, in first-visit order, without `index` itself.
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.transitive[index]
    }
}

struct Walk<'a> {
    files: &'a ShaderFiles,
    direct: &'a [Vec<usize>],
    state: Vec<Visit>,
    stack: Vec<usize>,
    transitive: Vec<Vec<usize>>,
}

impl Walk<'_> {
    fn visit(&mut self, index: usize) -> Result<()> {
        if self.state[index] == Visit::Done {
            return Ok(());
        }
        self.state[index] = Visit::Active;
        self.stack.push(index);

        let direct = self.direct;
        let mut seen = HashSet::new();
        let mut closure = Vec::new();
        for &dependency in &direct[index] {
            if self.state[dependency] == Visit::Active {
                return Err(self.cycle(dependency));
            }
            self.visit(dependency)?;
            for &reachable in std::iter::once(&dependency).chain(&self.transitive[dependency]) {
                if seen.insert(reachable) {
                    closure.push(reachable);
                }
            }
        }

        self.stack.pop();
        self.state[index] = Visit::Done;
        self.transitive[index] = closure;
        Ok(())
    }

    fn cycle(&self, repeated: usize) -> Error {
        let start = self
            .stack
            .iter()
            .position(|&index| index == repeated)
            .unwrap_or(0);
        let cycle = self.stack[start..]
            .iter()
            .chain(std::iter::once(&repeated))
            .map(|&index| self.files[index].full_path.clone())
            .collect();
        Error::IncludeCycle { cycle }
    }
}

fn include_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"^\s*#\s*include\s*"([^"]+)""#).unwrap())
}

/// Quoted includes of one file, resolved against the including file's folder. Angle-bracket
/// includes belong to the compiler and are ignored.
fn direct_dependencies(path: &Path, content: &str, files: &ShaderFiles) -> Result<Vec<usize>> {
    let folder = path.parent().unwrap_or(Path::new(""));
    let mut dependencies = Vec::new();
    for (line_index, line) in content.lines().enumerate() {
        let Some(captures) = include_regex().captures(line) else {
            continue;
        };
        let include = &captures[1];
        let resolved = normalize_path(&folder.join(include));
        if !resolved.is_file() {
            return Err(Error::UnresolvedInclude {
                include: include.to_owned(),
                path: path.to_path_buf(),
                line: line_index + 1,
            });
        }
        let Some(index) = files.index_of(path_hash(&resolved)) else {
            return Err(Error::IncludeNotScanned {
                include: resolved,
                path: path.to_path_buf(),
                line: line_index + 1,
            });
        };
        if !dependencies.contains(&index) {
            dependencies.push(index);
        }
    }
    Ok(dependencies)
}

#[cfg(test)]
fn fixture(files: &[(&str, &str)]) -> (tempfile::TempDir, ShaderFiles) {
    let root = tempfile::tempdir().unwrap();
    let settings = crate::config::Settings::with_defaults(root.path());
    for (name, text) in files {
        let path = settings.source_path.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }
    let scanned = crate::scan::scan_shader_files(&settings).unwrap();
    (root, scanned)
}

#[cfg(test)]
fn names(files: &ShaderFiles, indices: &[usize]) -> Vec<String> {
    indices
        .iter()
        .map(|&index| {
            files[index]
                .full_path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

#[test]
fn chain_is_closed_transitively() {
    let (_root, files) = fixture(&[
        ("a.hlsl", "#include \"b.hlsli\"\n"),
        ("b.hlsli", "  #  include \"common/c.hlsli\"\n"),
        ("common/c.hlsli", "float4 color;\n"),
    ]);
    let graph = DependencyGraph::build(&files).unwrap();
    assert_eq!(names(&files, graph.direct(0)), ["b.hlsli"]);
    assert_eq!(names(&files, graph.dependencies(0)), ["b.hlsli", "c.hlsli"]);
    assert_eq!(names(&files, graph.dependencies(1)), ["c.hlsli"]);
    assert!(graph.dependencies(2).is_empty());
}

#[test]
fn diamond_is_deduplicated() {
    let (_root, files) = fixture(&[
        ("a.hlsl", "#include \"b.hlsli\"\n#include \"c.hlsli\"\n"),
        ("b.hlsli", "#include \"d.hlsli\"\n"),
        ("c.hlsli", "#include \"d.hlsli\"\n#include \"b.hlsli\"\n"),
        ("d.hlsli", ""),
    ]);
    let graph = DependencyGraph::build(&files).unwrap();
    assert_eq!(
        names(&files, graph.dependencies(0)),
        ["b.hlsli", "d.hlsli", "c.hlsli"]
    );
}

#[test]
fn relative_parent_includes_resolve() {
    let (_root, files) = fixture(&[
        ("common/c.hlsli", ""),
        ("passes/a.hlsl", "#include \"../common/c.hlsli\"\n"),
    ]);
    let graph = DependencyGraph::build(&files).unwrap();
    assert_eq!(names(&files, graph.dependencies(1)), ["c.hlsli"]);
}

#[test]
fn cycle_is_rejected() {
    let (_root, files) = fixture(&[
        ("a.hlsl", "#include \"b.hlsl\"\n"),
        ("b.hlsl", "#include \"a.hlsl\"\n"),
    ]);
    let Err(Error::IncludeCycle { cycle }) = DependencyGraph::build(&files) else {
        panic!("cycle not detected");
    };
    let cycle: Vec<_> = cycle
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(cycle, ["a.hlsl", "b.hlsl", "a.hlsl"]);
}

#[test]
fn self_include_is_a_cycle() {
    let (_root, files) = fixture(&[("a.hlsl", "#include \"a.hlsl\"\n")]);
    assert!(matches!(
        DependencyGraph::build(&files),
        Err(Error::IncludeCycle { .. })
    ));
}

#[test]
fn missing_include_is_fatal() {
    let (_root, files) = fixture(&[("a.hlsl", "\n#include \"missing.hlsli\"\n")]);
    let Err(Error::UnresolvedInclude { include, line, .. }) = DependencyGraph::build(&files) else {
        panic!("missing include not reported");
    };
    assert_eq!(include, "missing.hlsli");
    assert_eq!(line, 2);
}

#[test]
fn include_outside_scan_is_fatal() {
    let (_root, files) = fixture(&[("a.hlsl", "#include \"types.h\"\n"), ("types.h", "")]);
    assert!(matches!(
        DependencyGraph::build(&files),
        Err(Error::IncludeNotScanned { .. })
    ));
}

#[test]
fn system_includes_are_ignored() {
    let (_root, files) = fixture(&[("a.hlsl", "#include <builtin.hlsli>\n")]);
    let graph = DependencyGraph::build(&files).unwrap();
    assert!(graph.dependencies(0).is_empty());
}

#[cfg(unix)]
#[test]
fn root_above_working_directory_resolves_includes() {
    let root = tempfile::tempdir().unwrap();
    let mut relative = std::path::PathBuf::new();
    for _ in std::env::current_dir().unwrap().components().skip(1) {
        relative.push("..");
    }
    relative.push(root.path().strip_prefix("/").unwrap());
    let settings = crate::config::Settings::with_defaults(&relative);
    std::fs::create_dir_all(&settings.source_path).unwrap();
    std::fs::write(settings.source_path.join("a.hlsl"), "#include \"b.hlsli\"\n").unwrap();
    std::fs::write(settings.source_path.join("b.hlsli"), "").unwrap();

    let files = crate::scan::scan_shader_files(&settings).unwrap();
    assert!(files[0].full_path.is_file());
    let graph = DependencyGraph::build(&files).unwrap();
    assert_eq!(names(&files, graph.dependencies(0)), ["b.hlsli"]);
}
