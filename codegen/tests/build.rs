use codegen::{
    BuildReport, CompileFailure, CompileJob, Error, Orchestrator, Settings, ShaderCompiler,
    ShaderStage,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Stands in for FXC/DXC: records every job and writes a header the way the real compilers do.
#[derive(Default)]
struct MockCompiler {
    jobs: Mutex<Vec<(String, ShaderStage, Option<PathBuf>)>>,
}

impl ShaderCompiler for MockCompiler {
    fn compile(&self, job: &CompileJob) -> Result<(), CompileFailure> {
        self.jobs.lock().unwrap().push((
            job.directive.name.clone(),
            job.directive.stage,
            job.output.map(Path::to_path_buf),
        ));
        if let Some(output) = job.output {
            let text = format!(
                "#if 0\n; generated\n#endif\n\nconst BYTE g_{}[] =\n{{\n     68,  88,  66,  67\n}};\n",
                job.directive.name
            );
            std::fs::write(output, text).unwrap();
        }
        Ok(())
    }
}

impl MockCompiler {
    fn take(&self) -> Vec<(String, ShaderStage, Option<PathBuf>)> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }
}

struct Project {
    _root: tempfile::TempDir,
    settings: Settings,
    compiler: MockCompiler,
}

impl Project {
    fn new() -> Project {
        let root = tempfile::tempdir().unwrap();
        let settings = Settings::with_defaults(root.path());
        let project = Project {
            _root: root,
            settings,
            compiler: MockCompiler::default(),
        };
        project.write(
            "Include/Shaders.h",
            "#pragma once\n\n// BeginInclude\n// EndInclude\n\nvoid InitShaders()\n{\n// BeginShaderByteCode\n// EndShaderByteCode\n}\n",
        );
        project.write(
            "Include/ConstantBuffers.h",
            "#pragma once\n\n// BeginConstantBuffer\n// EndConstantBuffer\n",
        );
        project.write(
            "Include/VertexLayouts.h",
            "#pragma once\n\n// BeginVertexFormat\n// EndVertexFormat\n\n// BeginVertexInputLayout\n// EndVertexInputLayout\n",
        );
        project
    }

    fn write(&self, name: &str, text: &str) {
        let path = self.settings.source_path.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    /// Rewrites a file with a modification time guaranteed to differ from the previous one.
    fn touch(&self, name: &str, text: &str) {
        let path = self.settings.source_path.join(name);
        let previous = std::fs::metadata(&path).unwrap().modified().unwrap();
        std::fs::write(&path, text).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(previous + Duration::from_secs(10)).unwrap();
    }

    fn read(&self, path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    fn build(&self) -> BuildReport {
        Orchestrator::new(&self.settings, &self.compiler)
            .build()
            .unwrap()
    }

    fn outputs(&self) -> Vec<String> {
        let mut outputs: Vec<String> = std::fs::read_dir(&self.settings.generated_folder)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".generated.h"))
            .collect();
        outputs.sort();
        outputs
    }
}

#[test]
fn second_build_is_a_no_op() {
    let project = Project::new();
    project.write(
        "a.hlsl",
        "// ShaderCompiler. Name: Test, Type: PS\nstruct CB { float4 color; };\nfloat4 main() : SV_Target { return color; }\n",
    );

    let report = project.build();
    assert_eq!(report.compiled, 1);
    let jobs = project.compiler.take();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].0, "Test");
    assert_eq!(jobs[0].1, ShaderStage::Pixel);
    assert!(jobs[0].2.is_some());
    assert_eq!(project.outputs(), ["a_Test_PS.generated.h"]);

    let constant_buffers = project.read(&project.settings.constant_buffer_header);
    assert!(constant_buffers.contains("struct CB\n{\n\tVec4 color;\n};"));
    let shaders = project.read(&project.settings.shader_header);
    assert!(shaders.contains("\t#include \"Shaders\\generated\\a_Test_PS.generated.h\"\n"));
    assert!(shaders.contains("\tINIT_SHADER_BYTECODE(Test);\n"));

    let headers_before: Vec<_> = [
        &project.settings.shader_header,
        &project.settings.constant_buffer_header,
        &project.settings.vertex_layout_header,
    ]
    .iter()
    .map(|path| std::fs::metadata(path).unwrap().modified().unwrap())
    .collect();

    let report = project.build();
    assert_eq!(report.compiled, 0);
    assert_eq!(report.headers_written, 0);
    assert!(report.up_to_date);
    assert!(project.compiler.take().is_empty());

    let headers_after: Vec<_> = [
        &project.settings.shader_header,
        &project.settings.constant_buffer_header,
        &project.settings.vertex_layout_header,
    ]
    .iter()
    .map(|path| std::fs::metadata(path).unwrap().modified().unwrap())
    .collect();
    assert_eq!(headers_before, headers_after);
}

#[test]
fn included_file_change_recompiles_includers() {
    let project = Project::new();
    project.write("common/lighting.hlsli", "#include \"math.hlsli\"\n");
    project.write("common/math.hlsli", "static const float PI = 3.14159;\n");
    project.write(
        "deferred.hlsl",
        "// ShaderCompiler. Name: Deferred, Type: PS, Defines: USE_FOG\n#include \"common/lighting.hlsli\"\n",
    );
    project.write(
        "fullscreen.hlsl",
        "// ShaderCompiler. Name: Fullscreen, Type: VS\nfloat4 main(uint id : SV_VertexID) : SV_Position { return 0; }\n",
    );
    assert_eq!(project.build().compiled, 2);
    project.compiler.take();

    project.touch("common/math.hlsli", "static const float PI = 3.14159265;\n");
    let report = project.build();
    assert_eq!(report.compiled, 1);
    let jobs = project.compiler.take();
    assert_eq!(jobs[0].0, "Deferred");
}

#[test]
fn vertex_layouts_are_generated() {
    let project = Project::new();
    project.write(
        "mesh.hlsl",
        "// ShaderCompiler. Name: Mesh, Type: VS\n\
         struct MeshVertex\n{\n    float3 position : POSITION;\n    float2 uv : TEXCOORD;\n};\n\
         struct MeshOutput\n{\n    float4 position : SV_Position;\n    float2 uv : TEXCOORD;\n};\n",
    );
    project.build();
    let layouts = project.read(&project.settings.vertex_layout_header);
    assert!(layouts.contains("struct MeshVertex\n{\n\tVec3 position;\n\tVec2 uv;\n};"));
    assert!(layouts.contains("static D3D12_INPUT_ELEMENT_DESC MeshVertex[] =\n{\n"));
    assert!(layouts.contains(
        "\t{ \"POSITION\", 0, DXGI_FORMAT_R32G32B32_FLOAT, 0, D3D12_APPEND_ALIGNED_ELEMENT, D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA, 0 },"
    ));
    assert!(!layouts.contains("MeshOutput"));
}

#[test]
fn removed_shader_disappears_from_headers() {
    let project = Project::new();
    project.write("a.hlsl", "// ShaderCompiler. Name: A\n");
    project.write("b.hlsl", "// ShaderCompiler. Name: B, Type: vertex\n");
    project.build();
    assert_eq!(
        project.outputs(),
        ["a_A_PS.generated.h", "b_B_VS.generated.h"]
    );

    std::fs::remove_file(project.settings.source_path.join("b.hlsl")).unwrap();
    let report = project.build();
    assert_eq!(report.compiled, 0);
    assert!(!report.up_to_date);
    assert_eq!(project.outputs(), ["a_A_PS.generated.h"]);
    let shaders = project.read(&project.settings.shader_header);
    assert!(!shaders.contains("INIT_SHADER_BYTECODE(B)"));
    assert!(shaders.contains("INIT_SHADER_BYTECODE(A)"));
}

#[test]
fn corrupt_cache_forces_a_full_build() {
    let project = Project::new();
    project.write("a.hlsl", "// ShaderCompiler. Name: A\n");
    project.build();
    std::fs::write(&project.settings.cache_path, "{ \"truncated\": ").unwrap();
    project.compiler.take();
    assert_eq!(project.build().compiled, 1);
}

#[test]
fn missing_output_is_rebuilt() {
    let project = Project::new();
    project.write("a.hlsl", "// ShaderCompiler. Name: A\n");
    project.build();
    std::fs::remove_file(project.settings.generated_folder.join("a_A_PS.generated.h")).unwrap();
    project.compiler.take();
    assert_eq!(project.build().compiled, 1);
}

#[test]
fn include_cycle_fails_the_build() {
    let project = Project::new();
    project.write("a.hlsl", "#include \"b.hlsli\"\n");
    project.write("b.hlsli", "#include \"a.hlsl\"\n");
    let err = Orchestrator::new(&project.settings, &project.compiler)
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::IncludeCycle { .. }));
    assert!(project.compiler.take().is_empty());
}

#[test]
fn missing_marker_fails_the_build() {
    let project = Project::new();
    project.write("Include/ConstantBuffers.h", "#pragma once\n");
    project.write("a.hlsl", "struct CB { float a; };\n");
    let err = Orchestrator::new(&project.settings, &project.compiler)
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        Error::MissingMarker {
            tag: "ConstantBuffer",
            ..
        }
    ));
}

#[test]
fn directive_errors_carry_location() {
    let project = Project::new();
    project.write("a.hlsl", "\n\n// ShaderCompiler. EntryPoint: main\n");
    let err = Orchestrator::new(&project.settings, &project.compiler)
        .build()
        .unwrap_err();
    let Error::MissingTag { tag, path, line } = err else {
        panic!("expected a missing tag error, got {err}");
    };
    assert_eq!(tag, "Name");
    assert!(path.ends_with("a.hlsl"));
    assert_eq!(line, 3);
}

#[test]
fn cache_records_successful_build() {
    let project = Project::new();
    project.write("a.hlsl", "// ShaderCompiler. Name: A\n");
    project.build();
    let cache = codegen::BuildCache::load(&project.settings.cache_path);
    let hash = codegen::path_hash(&project.settings.source_path.join("a.hlsl"));
    let entry = cache.get(hash).unwrap();
    assert!(entry.did_compile);
    assert!(entry.modified > SystemTime::UNIX_EPOCH);
    assert_eq!(entry.outputs.len(), 1);
}

#[cfg(unix)]
#[test]
fn external_compiler_round_trip() {
    use codegen::CompilerDriver;
    use std::os::unix::fs::PermissionsExt;

    let project = Project::new();
    let script = project.settings.source_path.join("fake-dxc.sh");
    std::fs::write(
        &script,
        r#"#!/bin/sh
out=""
name=""
while [ $# -gt 0 ]; do
    case "$1" in
        -Fh) out="$2"; shift ;;
        -Vn) name="$2"; shift ;;
    esac
    shift
done
if grep -q "BROKEN" "$0.source" 2>/dev/null; then
    echo "error X3000: syntax error" >&2
    exit 1
fi
echo "compiled $name"
printf 'const unsigned char %s[] = { 68, 88, 66, 67 };\n' "$name" > "$out"
"#,
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut settings = project.settings.clone();
    settings.compiler_path = Some(script.clone());
    project.write("a.hlsl", "// ShaderCompiler. Name: Test, Type: PS\n");
    let driver = CompilerDriver::new(&settings);
    let report = Orchestrator::new(&settings, &driver).build().unwrap();
    assert_eq!(report.compiled, 1);
    let output = project.read(&settings.generated_folder.join("a_Test_PS.generated.h"));
    assert!(output.starts_with("const unsigned char g_Test[]"));
    let shaders = project.read(&settings.shader_header);
    assert!(shaders.contains("INIT_SHADER_BYTECODE(Test);"));

    std::fs::write(script.with_extension("sh.source"), "BROKEN").unwrap();
    project.touch("a.hlsl", "// ShaderCompiler. Name: Test, Type: PS\n// edited\n");
    let Err(Error::Compile { failures }) = Orchestrator::new(&settings, &driver).build() else {
        panic!("expected the compiler to fail");
    };
    assert_eq!(failures.len(), 1);
    assert!(failures[0].stderr.contains("error X3000"));
    assert!(failures[0].command_line.contains("-E main -T ps_6_0"));
}
