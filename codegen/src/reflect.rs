use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderStruct {
    pub name: String,
    pub fields: Vec<StructField>,
    pub role: StructRole,
    pub path: PathBuf,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructField {
    pub interpolation: Option<Interpolation>,
    pub base_type: BaseType,
    pub columns: u8,
    pub rows: u8,
    pub array_suffix: String,
    pub name: String,
    pub semantic: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructRole {
    ConstantBuffer,
    VertexLayout,
    VertexShaderOutput,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    Centroid,
    NoInterpolation,
    NoPerspective,
    Sample,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Bool,
    Int,
    Uint,
    Dword,
    Half,
    Float,
    Double,
}

/// Field types that don't decompose into a scalar shape (nested structs, `matrix`, typedefs) are
/// carried through verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BaseType {
    Scalar(ScalarType),
    Named(String),
}

const SV_POSITION: &str = "SV_Position";

impl StructField {
    pub fn is_vector(&self) -> bool {
        self.columns > 1 && self.rows == 1
    }

    pub fn is_matrix(&self) -> bool {
        self.columns > 1 && self.rows > 1
    }
}

impl StructRole {
    fn classify(fields: &[StructField]) -> StructRole {
        if fields
            .iter()
            .any(|field| field.semantic.as_deref() == Some(SV_POSITION))
        {
            StructRole::VertexShaderOutput
        } else if fields
            .iter()
            .any(|field| field.semantic.is_some() || field.interpolation.is_some())
        {
            StructRole::VertexLayout
        } else {
            StructRole::ConstantBuffer
        }
    }
}

impl Interpolation {
    fn from_keyword(keyword: &str) -> Option<Interpolation> {
        match keyword {
            "linear" => Some(Interpolation::Linear),
            "centroid" => Some(Interpolation::Centroid),
            "nointerpolation" => Some(Interpolation::NoInterpolation),
            "noperspective" => Some(Interpolation::NoPerspective),
            "sample" => Some(Interpolation::Sample),
            _ => None,
        }
    }
}

impl ScalarType {
    const ALL: [ScalarType; 7] = [
        ScalarType::Bool,
        ScalarType::Int,
        ScalarType::Uint,
        ScalarType::Dword,
        ScalarType::Half,
        ScalarType::Float,
        ScalarType::Double,
    ];

    pub fn hlsl(&self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int => "int",
            ScalarType::Uint => "uint",
            ScalarType::Dword => "dword",
            ScalarType::Half => "half",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        }
    }
}

/// Splits `float3x2` into (float, 3, 2), `float4` into (float, 4, 1) and `uint` into (uint, 1, 1).
/// Anything outside the `scalar[1-4](x[1-4])?` grammar is a named type with a 1x1 shape.
pub fn decompose_type(typ: &str) -> (BaseType, u8, u8) {
    for scalar in ScalarType::ALL {
        let Some(shape) = typ.strip_prefix(scalar.hlsl()) else {
            continue;
        };
        let shape = shape.as_bytes();
        let dimension = |byte: u8| (b'1'..=b'4').contains(&byte).then(|| byte - b'0');
        let decomposed = match shape {
            [] => Some((1, 1)),
            [columns] => dimension(*columns).map(|columns| (columns, 1)),
            [columns, b'x', rows] => dimension(*columns).zip(dimension(*rows)),
            _ => None,
        };
        if let Some((columns, rows)) = decomposed {
            return (BaseType::Scalar(scalar), columns, rows);
        }
    }
    (BaseType::Named(typ.to_owned()), 1, 1)
}

/// Finds every `struct Name { ... }` in `text` and reflects its fields.
pub fn reflect_structs(text: &str, path: &Path) -> Result<Vec<ShaderStruct>> {
    let tokens = tokenize(text);
    let mut parser = Parser {
        text,
        tokens: &tokens,
        position: 0,
        path,
    };
    parser.structs()
}

/// Struct names must be unique across the build, except for vertex shader outputs which are
/// never turned into engine code.
pub fn check_duplicates(structs: &[ShaderStruct]) -> Result<()> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for struct_ in structs {
        if struct_.role != StructRole::VertexShaderOutput {
            *counts.entry(&struct_.name).or_default() += 1;
        }
    }
    let names: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_owned())
        .collect();
    if names.is_empty() {
        Ok(())
    } else {
        Err(Error::DuplicateStructs { names })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenKind {
    Ident,
    Number,
    Punct,
    Literal,
}

#[derive(Clone, Copy, Debug)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    start: usize,
    end: usize,
    line: usize,
}

impl Token<'_> {
    fn is(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    fn is_ident(&self, ident: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == ident
    }
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    let mut line_start = true;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == b'\n' {
            line += 1;
            line_start = true;
            i += 1;
        } else if byte.is_ascii_whitespace() {
            i += 1;
        } else if byte == b'#' && line_start {
            // Preprocessor directives are skipped whole, including backslash continuations.
            while i < bytes.len() && bytes[i] != b'\n' {
                if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'\n') {
                    line += 1;
                    i += 1;
                }
                i += 1;
            }
        } else if bytes[i..].starts_with(b"//") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if bytes[i..].starts_with(b"/*") {
            i += 2;
            while i < bytes.len() && !bytes[i..].starts_with(b"*/") {
                if bytes[i] == b'\n' {
                    line += 1;
                }
                i += 1;
            }
            i = (i + 2).min(bytes.len());
        } else {
            line_start = false;
            let start = i;
            let kind = if byte.is_ascii_alphabetic() || byte == b'_' {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                TokenKind::Ident
            } else if byte.is_ascii_digit() {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                    i += 1;
                }
                TokenKind::Number
            } else if byte == b'"' {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' && bytes[i] != b'\n' {
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
                TokenKind::Literal
            } else {
                // Step over a whole UTF-8 sequence so token boundaries stay on char boundaries.
                i += text[i..].chars().next().map_or(1, char::len_utf8);
                TokenKind::Punct
            };
            tokens.push(Token {
                kind,
                text: &text[start..i],
                start,
                end: i,
                line,
            });
        }
    }
    tokens
}

struct Parser<'a, 't> {
    text: &'a str,
    tokens: &'t [Token<'a>],
    position: usize,
    path: &'t Path,
}

impl<'a> Parser<'a, '_> {
    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.position).copied()
    }

    fn structs(&mut self) -> Result<Vec<ShaderStruct>> {
        let mut structs = Vec::new();
        while let Some(token) = self.peek() {
            self.position += 1;
            if token.is_ident("struct") {
                if let Some(struct_) = self.struct_declaration(token.line)? {
                    structs.push(struct_);
                }
            }
        }
        Ok(structs)
    }

    fn struct_declaration(&mut self, line: usize) -> Result<Option<ShaderStruct>> {
        let name = match self.peek() {
            Some(token) if token.kind == TokenKind::Ident => token.text,
            Some(token) if token.is("{") => {
                return Err(Error::NamelessStruct {
                    path: self.path.to_path_buf(),
                    line,
                })
            }
            _ => return Ok(None),
        };
        self.position += 1;
        // Forward declarations and `struct Foo foo;` variable declarations have no body.
        if !self.peek().is_some_and(|token| token.is("{")) {
            return Ok(None);
        }
        self.position += 1;

        let mut fields = Vec::new();
        let mut fragment_start = self.position;
        let mut depth = 0;
        loop {
            let Some(token) = self.peek() else {
                return Err(Error::UnterminatedStruct {
                    name: name.to_owned(),
                    path: self.path.to_path_buf(),
                    line,
                });
            };
            if token.is("{") {
                depth += 1;
            } else if token.is("}") && depth > 0 {
                depth -= 1;
            } else if token.is("}") || (token.is(";") && depth == 0) {
                let fragment = &self.tokens[fragment_start..self.position];
                if !fragment.is_empty() {
                    fields.push(self.field(fragment)?);
                }
                fragment_start = self.position + 1;
                if token.is("}") {
                    self.position += 1;
                    break;
                }
            }
            self.position += 1;
        }

        let role = StructRole::classify(&fields);
        Ok(Some(ShaderStruct {
            name: name.to_owned(),
            fields,
            role,
            path: self.path.to_path_buf(),
            line,
        }))
    }

    fn field(&self, fragment: &[Token<'a>]) -> Result<StructField> {
        let malformed = || Error::MalformedField {
            fragment: self.text[fragment[0].start..fragment[fragment.len() - 1].end].to_owned(),
            path: self.path.to_path_buf(),
            line: fragment[0].line,
        };
        // Nested declarations carry a body and have no engine-side member to map to.
        if fragment.iter().any(|token| token.is("{")) {
            return Err(malformed());
        }
        let mut rest = fragment;

        let interpolation = rest
            .first()
            .filter(|token| token.kind == TokenKind::Ident)
            .and_then(|token| Interpolation::from_keyword(token.text));
        if interpolation.is_some() {
            rest = &rest[1..];
        }

        let (typ, name) = match rest {
            [typ, name, ..] if typ.kind == TokenKind::Ident && name.kind == TokenKind::Ident => {
                (*typ, *name)
            }
            _ => return Err(malformed()),
        };
        // Type and name must not be glued together by anything but whitespace.
        if typ.end == name.start {
            return Err(malformed());
        }
        rest = &rest[2..];

        let mut array_suffix = String::new();
        while rest.first().is_some_and(|token| token.is("[")) {
            let mut depth = 0;
            let close = rest.iter().position(|token| {
                if token.is("[") {
                    depth += 1;
                } else if token.is("]") {
                    depth -= 1;
                }
                depth == 0
            });
            let Some(close) = close else {
                return Err(malformed());
            };
            array_suffix.push_str(&self.text[rest[0].start..rest[close].end]);
            rest = &rest[close + 1..];
        }

        let semantic = match rest {
            [colon, semantic, ..] if colon.is(":") && semantic.kind == TokenKind::Ident => {
                Some(semantic.text.to_owned())
            }
            _ => None,
        };

        let (base_type, columns, rows) = decompose_type(typ.text);
        Ok(StructField {
            interpolation,
            base_type,
            columns,
            rows,
            array_suffix,
            name: name.text.to_owned(),
            semantic,
        })
    }
}

#[cfg(test)]
fn reflect(text: &str) -> Vec<ShaderStruct> {
    reflect_structs(text, Path::new("test.hlsl")).unwrap()
}

#[test]
fn decompose_shapes() {
    assert_eq!(
        decompose_type("float3x2"),
        (BaseType::Scalar(ScalarType::Float), 3, 2)
    );
    assert_eq!(
        decompose_type("float4"),
        (BaseType::Scalar(ScalarType::Float), 4, 1)
    );
    assert_eq!(
        decompose_type("uint"),
        (BaseType::Scalar(ScalarType::Uint), 1, 1)
    );
    assert_eq!(
        decompose_type("dword2"),
        (BaseType::Scalar(ScalarType::Dword), 2, 1)
    );
}

#[test]
fn decompose_rejects_out_of_range() {
    assert_eq!(decompose_type("float5"), (BaseType::Named("float5".into()), 1, 1));
    assert_eq!(decompose_type("int4x0"), (BaseType::Named("int4x0".into()), 1, 1));
    assert_eq!(decompose_type("matrix"), (BaseType::Named("matrix".into()), 1, 1));
    assert_eq!(
        decompose_type("TestX1234"),
        (BaseType::Named("TestX1234".into()), 1, 1)
    );
}

#[test]
fn constant_buffer_struct() {
    let structs = reflect("struct CB\n{\n    float4x4 MVP;\n    int3 counts[2];\n};");
    assert_eq!(structs.len(), 1);
    let cb = &structs[0];
    assert_eq!(cb.name, "CB");
    assert_eq!(cb.role, StructRole::ConstantBuffer);
    assert_eq!(cb.fields[0].name, "MVP");
    assert!(cb.fields[0].is_matrix());
    assert_eq!(cb.fields[1].base_type, BaseType::Scalar(ScalarType::Int));
    assert_eq!(cb.fields[1].columns, 3);
    assert_eq!(cb.fields[1].array_suffix, "[2]");
}

#[test]
fn vertex_layout_struct() {
    let structs = reflect(
        "struct VertexPosUV { float3 Position : POSITION; nointerpolation float2 UV : TEXCOORD; };",
    );
    let layout = &structs[0];
    assert_eq!(layout.role, StructRole::VertexLayout);
    assert_eq!(layout.fields[0].semantic.as_deref(), Some("POSITION"));
    assert_eq!(
        layout.fields[1].interpolation,
        Some(Interpolation::NoInterpolation)
    );
}

#[test]
fn interpolation_alone_makes_vertex_layout() {
    let structs = reflect("struct V { linear float3 normal; };");
    assert_eq!(structs[0].role, StructRole::VertexLayout);
    assert_eq!(structs[0].fields[0].semantic, None);
}

#[test]
fn sv_position_wins_over_everything() {
    let structs = reflect(
        "struct VSOut { float4x4 world; float4 pos : SV_Position; float2 uv : TEXCOORD0; };",
    );
    assert_eq!(structs[0].role, StructRole::VertexShaderOutput);
}

#[test]
fn comments_and_preprocessor_are_skipped() {
    let text = r#"
#define COUNT 4
// struct Commented { float a; };
/* struct AlsoCommented { float b; }; */
struct Lights
{
    float3 colors[COUNT]; // trailing comment; with a semicolon
    /* block; comment */ float intensity;
};
"#;
    let structs = reflect(text);
    assert_eq!(structs.len(), 1);
    assert_eq!(structs[0].fields.len(), 2);
    assert_eq!(structs[0].fields[0].array_suffix, "[COUNT]");
    assert_eq!(structs[0].fields[1].name, "intensity");
    assert_eq!(structs[0].line, 5);
}

#[test]
fn multiple_array_suffixes_keep_source_text() {
    let structs = reflect("struct A { int i3[1][2* SEVEN-1]; };");
    assert_eq!(structs[0].fields[0].array_suffix, "[1][2* SEVEN-1]");
}

#[test]
fn forward_declarations_are_ignored() {
    let structs = reflect("struct Foo;\nstruct Foo foo;\nstruct Bar { float x; };");
    assert_eq!(structs.len(), 1);
    assert_eq!(structs[0].name, "Bar");
}

#[test]
fn nameless_struct_is_fatal() {
    let err = reflect_structs("\nstruct { float x; } anon;", Path::new("a.hlsl")).unwrap_err();
    assert!(matches!(err, Error::NamelessStruct { line: 2, .. }));
}

#[test]
fn missing_type_is_fatal() {
    let err = reflect_structs("struct A {\n float4; };", Path::new("a.hlsl")).unwrap_err();
    match err {
        Error::MalformedField { fragment, line, .. } => {
            assert_eq!(fragment, "float4");
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn unterminated_struct_is_fatal() {
    let err = reflect_structs("struct A { float x;", Path::new("a.hlsl")).unwrap_err();
    assert!(matches!(err, Error::UnterminatedStruct { .. }));
}

#[test]
fn duplicates_across_files() {
    let mut structs = reflect_structs("struct CB { float a; };", Path::new("a.hlsl")).unwrap();
    structs.extend(reflect_structs("struct CB { float b; };", Path::new("b.hlsl")).unwrap());
    let err = check_duplicates(&structs).unwrap_err();
    assert!(matches!(err, Error::DuplicateStructs { ref names } if names == &["CB"]));
}

#[test]
fn vertex_shader_outputs_may_share_names() {
    let text = "struct PSInput { float4 pos : SV_Position; };";
    let mut structs = reflect_structs(text, Path::new("a.hlsl")).unwrap();
    structs.extend(reflect_structs(text, Path::new("b.hlsl")).unwrap());
    check_duplicates(&structs).unwrap();
}

#[test]
fn nested_struct_declaration_is_malformed() {
    let text = "struct Outer\n{\n    float a;\n    struct Inner { float b; } inner;\n};";
    let err = reflect_structs(text, Path::new("a.hlsl")).unwrap_err();
    match err {
        Error::MalformedField { fragment, line, .. } => {
            assert_eq!(fragment, "struct Inner { float b; } inner");
            assert_eq!(line, 4);
        }
        other => panic!("unexpected error {other}"),
    }
}
