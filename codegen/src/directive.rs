use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

/// One compilable permutation declared by a `// ShaderCompiler.` comment line, e.g.
/// `// ShaderCompiler. Name: Test_01, EntryPoint: main, Type: PS, Defines: DEFINE1; DEFINE2=1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub entry_point: String,
    pub stage: ShaderStage,
    pub defines: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

#[derive(Debug, PartialEq, Eq)]
pub enum HeaderError {
    MissingTag(&'static str),
    UnknownShaderType(String),
}

const DEFAULT_ENTRY_POINT: &str = "main";

impl Directive {
    pub fn from_header(header: &str) -> Result<Directive, HeaderError> {
        let name = read_tag(name_regex(), header).ok_or(HeaderError::MissingTag("Name"))?;
        let entry_point = read_tag(entry_point_regex(), header).unwrap_or(DEFAULT_ENTRY_POINT);
        let stage = match read_tag(type_regex(), header) {
            Some(value) => ShaderStage::from_alias(value)
                .ok_or_else(|| HeaderError::UnknownShaderType(value.to_owned()))?,
            None => ShaderStage::Pixel,
        };
        let defines = read_tag(defines_regex(), header)
            .unwrap_or("")
            .split(';')
            .map(str::trim)
            .filter(|define| !define.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Directive {
            name: name.to_owned(),
            entry_point: entry_point.to_owned(),
            stage,
            defines,
        })
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Name: {}, EntryPoint: {}, Type: {}",
            self.name,
            self.entry_point,
            self.stage.abbreviation()
        )?;
        if self.defines.is_empty() {
            f.write_str(".")
        } else {
            write!(f, ", Defines: {}.", self.defines.join(", "))
        }
    }
}

impl ShaderStage {
    pub fn from_alias(alias: &str) -> Option<ShaderStage> {
        match alias.to_ascii_lowercase().as_str() {
            "vs" | "vertex" | "vertexshader" => Some(ShaderStage::Vertex),
            "ps" | "pixel" | "pixelshader" | "fragment" => Some(ShaderStage::Pixel),
            _ => None,
        }
    }

    pub fn abbreviation(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "VS",
            ShaderStage::Pixel => "PS",
        }
    }

    pub fn define(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "VERTEX_SHADER",
            ShaderStage::Pixel => "PIXEL_SHADER",
        }
    }
}

/// Extracts every directive in `text`. `path` is only used to make errors actionable.
pub fn parse_directives(text: &str, path: &Path) -> Result<Vec<Directive>> {
    let mut directives = Vec::new();
    for (line_index, line) in text.lines().enumerate() {
        let Some(captures) = header_regex().captures(line) else {
            continue;
        };
        let line = line_index + 1;
        let directive = Directive::from_header(&captures[1]).map_err(|err| match err {
            HeaderError::MissingTag(tag) => Error::MissingTag {
                tag,
                path: path.to_path_buf(),
                line,
            },
            HeaderError::UnknownShaderType(value) => Error::UnknownShaderType {
                value,
                path: path.to_path_buf(),
                line,
            },
        })?;
        if directives
            .iter()
            .any(|existing: &Directive| existing.name == directive.name)
        {
            return Err(Error::DuplicatePermutation {
                name: directive.name,
                path: path.to_path_buf(),
                line,
            });
        }
        directives.push(directive);
    }
    Ok(directives)
}

fn read_tag<'a>(regex: &Regex, header: &'a str) -> Option<&'a str> {
    regex
        .captures(header)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str())
}

fn header_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?i)//\s*ShaderCompiler\.(.*)").unwrap())
}

macro_rules! tag_regex {
    ($name:ident, $tag:literal) => {
        fn $name() -> &'static Regex {
            static REGEX: OnceLock<Regex> = OnceLock::new();
            REGEX.get_or_init(|| {
                Regex::new(concat!(r"(?i)\b", $tag, r"\s*:\s*(.*?)\s*(?:,|$)")).unwrap()
            })
        }
    };
}

tag_regex!(name_regex, "Name");
tag_regex!(entry_point_regex, "EntryPoint");
tag_regex!(type_regex, "Type");
tag_regex!(defines_regex, "Defines");

#[test]
fn full_header() {
    let text = "// ShaderCompiler. Name: Test_01, EntryPoint: PSMain, Type: VS, Defines: DEFINE1; DEFINE2=1 ;";
    let directives = parse_directives(text, Path::new("a.hlsl")).unwrap();
    assert_eq!(
        directives,
        vec![Directive {
            name: "Test_01".into(),
            entry_point: "PSMain".into(),
            stage: ShaderStage::Vertex,
            defines: vec!["DEFINE1".into(), "DEFINE2=1".into()],
        }]
    );
}

#[test]
fn defaults_apply() {
    let directives = parse_directives("//ShaderCompiler. Name: Test", Path::new("a.hlsl")).unwrap();
    assert_eq!(directives[0].entry_point, "main");
    assert_eq!(directives[0].stage, ShaderStage::Pixel);
    assert!(directives[0].defines.is_empty());
}

#[test]
fn stage_aliases_are_case_insensitive() {
    let text = "// ShaderCompiler. Name: A, Type: ps\n// shadercompiler. name: B, type: Vertex";
    let directives = parse_directives(text, Path::new("a.hlsl")).unwrap();
    assert_eq!(directives[0].stage, ShaderStage::Pixel);
    assert_eq!(directives[1].stage, ShaderStage::Vertex);
    assert_eq!(directives[1].name, "B");
}

#[test]
fn lines_without_marker_are_ignored() {
    let text = "float4 main() : SV_Target { return 0; }\n// Name: NotADirective";
    assert!(parse_directives(text, Path::new("a.hlsl")).unwrap().is_empty());
}

#[test]
fn missing_name_reports_location() {
    let text = "\n\n// ShaderCompiler. EntryPoint: main, Type: PS";
    let err = parse_directives(text, Path::new("shaders/a.hlsl")).unwrap_err();
    match err {
        Error::MissingTag { tag, path, line } => {
            assert_eq!(tag, "Name");
            assert_eq!(path, Path::new("shaders/a.hlsl"));
            assert_eq!(line, 3);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn repeated_name_is_rejected() {
    let text = "// ShaderCompiler. Name: A, Type: PS\n// ShaderCompiler. Name: A, Type: VS";
    let err = parse_directives(text, Path::new("a.hlsl")).unwrap_err();
    match err {
        Error::DuplicatePermutation { name, line, .. } => {
            assert_eq!(name, "A");
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn unknown_stage_is_rejected() {
    let err = Directive::from_header(" Name: A, Type: GS").unwrap_err();
    assert_eq!(err, HeaderError::UnknownShaderType("GS".into()));
}

#[test]
fn display_matches_log_format() {
    let directive = Directive::from_header(" Name: A, Defines: X;Y").unwrap();
    assert_eq!(
        directive.to_string(),
        "Name: A, EntryPoint: main, Type: PS, Defines: X, Y."
    );
}
