use crate::config::Settings;
use crate::error::{io_error, Error, Result};
use crate::reflect::{ShaderStruct, StructRole};
use crate::types::{engine_declaration, input_element_desc};
use log::{debug, info, warn};
use regex::Regex;
use std::fmt::Write;
use std::path::Path;
use std::sync::OnceLock;
use walkdir::WalkDir;

/// Rewrites every generated region of the configured target headers. Returns how many files were
/// actually written.
pub fn generate_code(settings: &Settings, structs: &[ShaderStruct]) -> Result<usize> {
    let (includes, byte_code) = shader_header_regions(settings)?;
    let (vertex_formats, input_layouts) = vertex_layout_regions(structs);
    let targets = [
        (
            settings.shader_header.as_path(),
            vec![("Include", includes), ("ShaderByteCode", byte_code)],
        ),
        (
            settings.constant_buffer_header.as_path(),
            vec![("ConstantBuffer", constant_buffer_region(structs))],
        ),
        (
            settings.vertex_layout_header.as_path(),
            vec![
                ("VertexFormat", vertex_formats),
                ("VertexInputLayout", input_layouts),
            ],
        ),
    ];
    let mut written = 0;
    for (path, regions) in &targets {
        if replace_regions(path, regions)? {
            written += 1;
        }
    }
    Ok(written)
}

/// Replaces the text between `// Begin<tag>` and `// End<tag>` for each region, keeping the
/// markers. The file is only written when its content changes.
pub fn replace_regions(path: &Path, regions: &[(&'static str, String)]) -> Result<bool> {
    if !path.is_file() {
        return Err(Error::MissingTarget {
            path: path.to_path_buf(),
        });
    }
    let old = std::fs::read_to_string(path).map_err(io_error(path))?;
    let mut new = old.clone();
    for (tag, content) in regions {
        new = splice(&new, tag, content).ok_or_else(|| Error::MissingMarker {
            tag: *tag,
            path: path.to_path_buf(),
        })?;
    }
    if new == old {
        debug!("{} is up to date", path.display());
        return Ok(false);
    }
    std::fs::write(path, new).map_err(io_error(path))?;
    info!("generated {}", path.display());
    Ok(true)
}

fn splice(text: &str, tag: &str, content: &str) -> Option<String> {
    let tag = regex::escape(tag);
    let regex = Regex::new(&format!(r"(?i)(//\s*Begin{tag})(?s:.*?)(//\s*End{tag})")).unwrap();
    let captures = regex.captures(text)?;
    let begin = captures.get(1)?;
    let end = captures.get(2)?;
    let mut spliced = String::with_capacity(text.len() + content.len());
    spliced.push_str(&text[..begin.end()]);
    spliced.push('\n');
    spliced.push_str(content);
    spliced.push_str(&text[end.start()..]);
    Some(spliced)
}

fn byte_array_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)const\s*(?:unsigned\s*char|BYTE)\s*g_(.*)\[\]").unwrap()
    })
}

/// Include lines and bytecode registrations for every compiled output in the generated folder.
pub fn shader_header_regions(settings: &Settings) -> Result<(String, String)> {
    let mut includes = String::new();
    let mut byte_code = String::new();
    let walker = WalkDir::new(&settings.generated_folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|err| Error::Io {
            path: settings.generated_folder.clone(),
            source: err.into(),
        })?;
        let file_name = entry.file_name().to_string_lossy();
        if !entry.file_type().is_file()
            || !file_name.ends_with(settings.generated_extension.as_str())
        {
            continue;
        }
        let content = std::fs::read_to_string(entry.path()).map_err(io_error(entry.path()))?;
        let Some(captures) = byte_array_regex().captures(&content) else {
            return Err(Error::MissingByteArray {
                path: entry.path().to_path_buf(),
            });
        };
        writeln!(byte_code, "\tINIT_SHADER_BYTECODE({});", captures[1].trim()).unwrap();
        writeln!(
            includes,
            "\t#include \"{}{file_name}\"",
            settings.include_prefix
        )
        .unwrap();
    }
    Ok((includes, byte_code))
}

fn struct_definition(shader_struct: &ShaderStruct) -> String {
    let mut text = format!("struct {}\n{{", shader_struct.name);
    for field in &shader_struct.fields {
        write!(text, "\n\t{}", engine_declaration(field)).unwrap();
    }
    text.push_str("\n};\n");
    text
}

/// Blocks separated by a blank line, ending in exactly one newline.
fn join_blocks(blocks: impl Iterator<Item = String>) -> String {
    let mut text = String::new();
    for block in blocks {
        text.push_str(&block);
        text.push('\n');
    }
    let mut text = text.trim_end().to_owned();
    text.push('\n');
    text
}

pub fn constant_buffer_region(structs: &[ShaderStruct]) -> String {
    join_blocks(
        structs
            .iter()
            .filter(|shader_struct| shader_struct.role == StructRole::ConstantBuffer)
            .map(struct_definition),
    )
}

fn input_layout(shader_struct: &ShaderStruct) -> String {
    let mut text = format!(
        "static D3D12_INPUT_ELEMENT_DESC {}[] =\n{{\n",
        shader_struct.name
    );
    for field in &shader_struct.fields {
        match input_element_desc(field) {
            Some(desc) => writeln!(text, "\t{desc}").unwrap(),
            None => warn!(
                "{} in vertex layout {} has no input format. {}({})",
                field.name,
                shader_struct.name,
                shader_struct.path.display(),
                shader_struct.line
            ),
        }
    }
    text.push_str("};\n");
    text
}

/// Vertex format structs and their input layout descriptors.
pub fn vertex_layout_regions(structs: &[ShaderStruct]) -> (String, String) {
    let layouts = || {
        structs
            .iter()
            .filter(|shader_struct| shader_struct.role == StructRole::VertexLayout)
    };
    (
        join_blocks(layouts().map(struct_definition)),
        join_blocks(layouts().map(input_layout)),
    )
}

#[cfg(test)]
fn reflect(text: &str) -> Vec<ShaderStruct> {
    crate::reflect::reflect_structs(text, Path::new("test.hlsl")).unwrap()
}

#[test]
fn region_is_replaced_between_markers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Shaders.h");
    std::fs::write(&path, "#pragma once\n// BeginInclude\nold\n// EndInclude\ntail\n").unwrap();
    let regions = [("Include", "\t#include \"a.h\"\n".to_owned())];
    assert!(replace_regions(&path, &regions).unwrap());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "#pragma once\n// BeginInclude\n\t#include \"a.h\"\n// EndInclude\ntail\n"
    );
    assert!(!replace_regions(&path, &regions).unwrap());
}

#[test]
fn markers_match_case_insensitively() {
    let text = "//beginConstantBuffer x //ENDCONSTANTBUFFER";
    assert_eq!(
        splice(text, "ConstantBuffer", "y\n").unwrap(),
        "//beginConstantBuffer\ny\n//ENDCONSTANTBUFFER"
    );
}

#[test]
fn replacement_text_is_literal() {
    let text = "// BeginA\n// EndA";
    assert_eq!(splice(text, "A", "$1 $$\n").unwrap(), "// BeginA\n$1 $$\n// EndA");
}

#[test]
fn only_the_tagged_region_changes() {
    let text = "// BeginInclude\n// EndInclude\n// BeginShaderByteCode\nx\n// EndShaderByteCode";
    assert_eq!(
        splice(text, "Include", "a\n").unwrap(),
        "// BeginInclude\na\n// EndInclude\n// BeginShaderByteCode\nx\n// EndShaderByteCode"
    );
}

#[test]
fn missing_target_and_marker_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Shaders.h");
    let regions = [("Include", String::new())];
    assert!(matches!(
        replace_regions(&path, &regions),
        Err(Error::MissingTarget { .. })
    ));
    std::fs::write(&path, "// BeginInclude\n").unwrap();
    assert!(matches!(
        replace_regions(&path, &regions),
        Err(Error::MissingMarker { tag: "Include", .. })
    ));
}

#[test]
fn shader_header_lists_compiled_outputs() {
    let root = tempfile::tempdir().unwrap();
    let settings = Settings::with_defaults(root.path());
    let generated = &settings.generated_folder;
    std::fs::create_dir_all(generated).unwrap();
    std::fs::write(
        generated.join("b_Blit_VS.generated.h"),
        "const BYTE g_Blit[] =\n{ 68, 88 };",
    )
    .unwrap();
    std::fs::write(
        generated.join("a_Test_PS.generated.h"),
        "const unsigned char g_Test[] = { 1 };",
    )
    .unwrap();
    std::fs::write(generated.join(".shadercompiler.json"), "{}").unwrap();

    let (includes, byte_code) = shader_header_regions(&settings).unwrap();
    assert_eq!(
        includes,
        "\t#include \"Shaders\\generated\\a_Test_PS.generated.h\"\n\
         \t#include \"Shaders\\generated\\b_Blit_VS.generated.h\"\n"
    );
    assert_eq!(
        byte_code,
        "\tINIT_SHADER_BYTECODE(Test);\n\tINIT_SHADER_BYTECODE(Blit);\n"
    );
}

#[test]
fn output_without_byte_array_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let settings = Settings::with_defaults(root.path());
    std::fs::create_dir_all(&settings.generated_folder).unwrap();
    std::fs::write(
        settings.generated_folder.join("a_Test_PS.generated.h"),
        "// truncated",
    )
    .unwrap();
    assert!(matches!(
        shader_header_regions(&settings),
        Err(Error::MissingByteArray { .. })
    ));
}

#[test]
fn constant_buffers_are_emitted_in_order() {
    let structs = reflect(
        "struct CB { float4 color; int count; };\n\
         struct VSIn { float3 pos : POSITION; };\n\
         struct Light { float4x4 view; };",
    );
    assert_eq!(
        constant_buffer_region(&structs),
        "struct CB\n{\n\tVec4 color;\n\tint32 count;\n};\n\nstruct Light\n{\n\tMat4 view;\n};\n"
    );
    assert_eq!(constant_buffer_region(&[]), "\n");
}

#[test]
fn vertex_layouts_have_formats_and_descriptors() {
    let structs = reflect(
        "struct VSIn { float3 pos : POSITION; uint id : ID; };\n\
         struct VSOut { float4 pos : SV_Position; };",
    );
    let (formats, layouts) = vertex_layout_regions(&structs);
    assert_eq!(formats, "struct VSIn\n{\n\tVec3 pos;\n\tuint32 id;\n};\n");
    assert_eq!(
        layouts,
        "static D3D12_INPUT_ELEMENT_DESC VSIn[] =\n{\n\
         \t{ \"POSITION\", 0, DXGI_FORMAT_R32G32B32_FLOAT, 0, D3D12_APPEND_ALIGNED_ELEMENT, D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA, 0 },\n\
         \t{ \"ID\", 0, DXGI_FORMAT_R32_UINT, 0, D3D12_APPEND_ALIGNED_ELEMENT, D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA, 0 },\n\
         };\n"
    );
}

#[test]
fn matrices_are_left_out_of_input_layouts() {
    let structs = reflect("struct Instance { float4x4 world : WORLD; float2 uv : TEXCOORD; };");
    let (_, layouts) = vertex_layout_regions(&structs);
    assert!(!layouts.contains("WORLD"));
    assert!(layouts.contains("\"TEXCOORD\", 0, DXGI_FORMAT_R32G32_FLOAT"));
}
