use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing tag \"{tag}\" in header. {}({line})", path.display())]
    MissingTag {
        tag: &'static str,
        path: PathBuf,
        line: usize,
    },
    #[error("unknown shader type \"{value}\" in header. {}({line})", path.display())]
    UnknownShaderType {
        value: String,
        path: PathBuf,
        line: usize,
    },
    #[error("missing or incorrect type argument in structure. {}({line}): {fragment}", path.display())]
    MalformedField {
        fragment: String,
        path: PathBuf,
        line: usize,
    },
    #[error("nameless structs not allowed. {}({line})", path.display())]
    NamelessStruct { path: PathBuf, line: usize },
    #[error("unterminated struct \"{name}\". {}({line})", path.display())]
    UnterminatedStruct {
        name: String,
        path: PathBuf,
        line: usize,
    },
    #[error("duplicate structs: {}", names.join(", "))]
    DuplicateStructs { names: Vec<String> },
    #[error("included file \"{include}\" does not exist. {}({line})", path.display())]
    UnresolvedInclude {
        include: String,
        path: PathBuf,
        line: usize,
    },
    #[error(
        "included file {} is not part of the scanned shader files, is its extension missing from the configuration? {}({line})",
        include.display(),
        path.display()
    )]
    IncludeNotScanned {
        include: PathBuf,
        path: PathBuf,
        line: usize,
    },
    #[error("include cycle: {}", DisplayChain(cycle))]
    IncludeCycle { cycle: Vec<PathBuf> },
    #[error("same file shouldn't be processed twice: {} and {} share identity {hash:08x}", first.display(), second.display())]
    DuplicateIdentity {
        hash: u32,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("permutation \"{name}\" is declared more than once. {}({line})", path.display())]
    DuplicatePermutation {
        name: String,
        path: PathBuf,
        line: usize,
    },
    #[error("{} and {} both generate {}", first.display(), second.display(), output.display())]
    DuplicateOutput {
        output: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("refusing to delete generated output with unrecognized extension: {}", path.display())]
    UnknownOutputExtension { path: PathBuf },
    #[error("file {} does not exist", path.display())]
    MissingTarget { path: PathBuf },
    #[error("Begin{tag} or End{tag} were not found in file {}", path.display())]
    MissingMarker { tag: &'static str, path: PathBuf },
    #[error("generated file {} does not contain a byte array", path.display())]
    MissingByteArray { path: PathBuf },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to parse configuration file {}: {message}", path.display())]
    ConfigSyntax { path: PathBuf, message: String },
    #[error("{} permutation(s) failed to compile:\n{}", failures.len(), DisplayFailures(failures))]
    Compile { failures: Vec<CompileFailure> },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Diagnostic for a single permutation the external compiler rejected.
#[derive(Debug, Clone)]
pub struct CompileFailure {
    pub permutation: String,
    pub stderr: String,
    pub command_line: String,
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{}Failed with commandline:\n{}\n",
            self.permutation, self.stderr, self.command_line
        )
    }
}

struct DisplayChain<'a>(&'a [PathBuf]);

impl fmt::Display for DisplayChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, path) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", path.display())?;
        }
        Ok(())
    }
}

struct DisplayFailures<'a>(&'a [CompileFailure]);

impl fmt::Display for DisplayFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for failure in self.0 {
            writeln!(f, "{failure}")?;
        }
        Ok(())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_path_buf(),
        source,
    }
}
