use crate::error::{io_error, Error, Result};
use crate::shaders::{CompilerKind, ShaderModel};
use knuffel::Decode;
use std::path::{Path, PathBuf};

/// Raw contents of the KDL configuration file. Paths are relative to the root folder.
#[derive(Debug, Decode)]
pub struct Config {
    #[knuffel(child, unwrap(argument))]
    pub source_path: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub recursive: Option<bool>,
    #[knuffel(child, unwrap(arguments))]
    pub extensions: Option<Vec<String>>,
    #[knuffel(child, unwrap(arguments))]
    pub skip_folders: Option<Vec<String>>,
    #[knuffel(child, unwrap(argument))]
    pub generated_folder: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub generated_extension: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub cache_path: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub shader_header: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub constant_buffer_header: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub vertex_layout_header: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub include_prefix: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub compiler: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub compiler_path: Option<String>,
    #[knuffel(child, unwrap(argument))]
    pub shader_model: Option<String>,
    #[knuffel(child)]
    pub debug_information: bool,
    #[knuffel(child, unwrap(arguments))]
    pub global_defines: Option<Vec<String>>,
    #[knuffel(child, unwrap(argument))]
    pub jobs: Option<usize>,
}

/// Fully resolved settings consumed by the build.
#[derive(Clone, Debug)]
pub struct Settings {
    pub source_path: PathBuf,
    pub recursive: bool,
    pub extensions: Vec<String>,
    pub skip_folders: Vec<String>,
    pub generated_folder: PathBuf,
    pub generated_extension: String,
    pub cache_path: PathBuf,
    pub shader_header: PathBuf,
    pub constant_buffer_header: PathBuf,
    pub vertex_layout_header: PathBuf,
    pub include_prefix: String,
    pub compiler: CompilerKind,
    pub compiler_path: Option<PathBuf>,
    pub shader_model: ShaderModel,
    pub debug_information: bool,
    pub global_defines: Vec<String>,
    pub jobs: usize,
}

impl Settings {
    pub fn with_defaults(root: &Path) -> Settings {
        let source_path = root.join("Shaders");
        let generated_folder = source_path.join("generated");
        Settings {
            recursive: true,
            extensions: vec![".hlsl".into(), ".hlsli".into()],
            skip_folders: vec!["generated".into()],
            cache_path: generated_folder.join(".shadercompiler.json"),
            generated_extension: ".generated.h".into(),
            shader_header: source_path.join("Include").join("Shaders.h"),
            constant_buffer_header: source_path.join("Include").join("ConstantBuffers.h"),
            vertex_layout_header: source_path.join("Include").join("VertexLayouts.h"),
            include_prefix: "Shaders\\generated\\".into(),
            compiler: CompilerKind::Dxc,
            compiler_path: None,
            shader_model: ShaderModel::Sm6_0,
            debug_information: false,
            global_defines: Vec::new(),
            jobs: std::thread::available_parallelism().map_or(1, |count| count.get()),
            generated_folder,
            source_path,
        }
    }

    pub fn load(config_path: &Path, root: &Path) -> Result<Settings> {
        let text = std::fs::read_to_string(config_path).map_err(io_error(config_path))?;
        let file_name = config_path.to_string_lossy();
        let config: Config =
            knuffel::parse(&file_name, &text).map_err(|err| Error::ConfigSyntax {
                path: config_path.to_path_buf(),
                message: err.to_string(),
            })?;
        Settings::resolve(config, root)
    }

    pub fn resolve(config: Config, root: &Path) -> Result<Settings> {
        let mut settings = Settings::with_defaults(root);
        if let Some(source_path) = config.source_path {
            settings.source_path = root.join(source_path);
        }
        if let Some(recursive) = config.recursive {
            settings.recursive = recursive;
        }
        if let Some(extensions) = config.extensions {
            settings.extensions = extensions;
        }
        if let Some(skip_folders) = config.skip_folders {
            settings.skip_folders = skip_folders;
        }
        if let Some(generated_folder) = config.generated_folder {
            settings.generated_folder = root.join(generated_folder);
            settings.cache_path = settings.generated_folder.join(".shadercompiler.json");
        }
        if let Some(generated_extension) = config.generated_extension {
            settings.generated_extension = generated_extension;
        }
        if let Some(cache_path) = config.cache_path {
            settings.cache_path = root.join(cache_path);
        }
        if let Some(shader_header) = config.shader_header {
            settings.shader_header = root.join(shader_header);
        }
        if let Some(constant_buffer_header) = config.constant_buffer_header {
            settings.constant_buffer_header = root.join(constant_buffer_header);
        }
        if let Some(vertex_layout_header) = config.vertex_layout_header {
            settings.vertex_layout_header = root.join(vertex_layout_header);
        }
        if let Some(include_prefix) = config.include_prefix {
            settings.include_prefix = include_prefix;
        }
        if let Some(compiler) = config.compiler {
            settings.compiler = compiler.parse()?;
        }
        settings.compiler_path = config.compiler_path.map(PathBuf::from);
        if let Some(shader_model) = config.shader_model {
            settings.shader_model = shader_model.parse()?;
        }
        settings.debug_information = config.debug_information;
        if let Some(global_defines) = config.global_defines {
            settings.global_defines = global_defines;
        }
        if let Some(jobs) = config.jobs {
            settings.jobs = jobs.max(1);
        }
        settings.verify()?;
        Ok(settings)
    }

    pub fn verify(&self) -> Result<()> {
        if !self.compiler.supports(self.shader_model) {
            return Err(Error::Config(format!(
                "{} doesn't support shader model {}",
                self.compiler, self.shader_model
            )));
        }
        if self.extensions.is_empty() {
            return Err(Error::Config("no shader extensions configured".into()));
        }
        Ok(())
    }

    pub fn is_shader_file(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.extensions
            .iter()
            .any(|extension| path.ends_with(extension.as_str()))
    }
}

#[cfg(test)]
fn parse(text: &str) -> Result<Settings> {
    let config: Config = knuffel::parse("test.kdl", text).unwrap();
    Settings::resolve(config, Path::new("/project"))
}

#[test]
fn full_config() {
    let settings = parse(
        r#"
source-path "Source/Engine/Shaders"
recursive false
extensions ".hlsl" ".fx"
skip-folders "generated" "thirdparty"
generated-folder "Source/Engine/Shaders/generated"
generated-extension ".generated.h"
shader-header "Source/Engine/Shaders/Include/Shaders.h"
constant-buffer-header "Source/Engine/Shaders/Include/ConstantBuffers.h"
vertex-layout-header "Source/Engine/Shaders/Include/VertexLayouts.h"
compiler "fxc"
compiler-path "C:/Windows Kits/10/bin/x64/fxc.exe"
shader-model "5_1"
debug-information
global-defines "ENGINE" "USE_FOG=1"
jobs 3
"#,
    )
    .unwrap();
    assert_eq!(settings.source_path, Path::new("/project/Source/Engine/Shaders"));
    assert!(!settings.recursive);
    assert_eq!(settings.extensions, [".hlsl", ".fx"]);
    assert_eq!(settings.compiler, CompilerKind::Fxc);
    assert_eq!(settings.shader_model, ShaderModel::Sm5_1);
    assert!(settings.debug_information);
    assert_eq!(settings.global_defines, ["ENGINE", "USE_FOG=1"]);
    assert_eq!(settings.jobs, 3);
    assert_eq!(
        settings.cache_path,
        Path::new("/project/Source/Engine/Shaders/generated/.shadercompiler.json")
    );
}

#[test]
fn empty_config_uses_defaults() {
    let settings = parse("").unwrap();
    assert_eq!(settings.compiler, CompilerKind::Dxc);
    assert_eq!(settings.shader_model, ShaderModel::Sm6_0);
    assert!(settings.recursive);
    assert!(!settings.debug_information);
}

#[test]
fn fxc_rejects_shader_model_6() {
    let err = parse("compiler \"fxc\"\nshader-model \"6_0\"").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn unknown_compiler_is_rejected() {
    let err = parse("compiler \"glslang\"").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn extension_filter() {
    let settings = Settings::with_defaults(Path::new("/project"));
    assert!(settings.is_shader_file(Path::new("/project/Shaders/a.hlsl")));
    assert!(settings.is_shader_file(Path::new("/project/Shaders/common.hlsli")));
    assert!(!settings.is_shader_file(Path::new("/project/Shaders/readme.md")));
}
