use crate::config::Settings;
use crate::directive::Directive;
use crate::error::{CompileFailure, Error};
use log::{debug, info};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompilerKind {
    Fxc,
    Dxc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShaderModel {
    Sm5_0,
    Sm5_1,
    Sm6_0,
    Sm6_1,
    Sm6_2,
    Sm6_3,
}

/// Flag syntax and identity of one external HLSL compiler.
pub trait Backend: Sync {
    fn executable(&self) -> &'static str;

    fn flag_prefix(&self) -> char;

    fn define(&self) -> &'static str;

    fn flag(&self, name: &str) -> String {
        format!("{}{name}", self.flag_prefix())
    }
}

pub struct Fxc;

pub struct Dxc;

impl Backend for Fxc {
    fn executable(&self) -> &'static str {
        "fxc"
    }

    fn flag_prefix(&self) -> char {
        '/'
    }

    fn define(&self) -> &'static str {
        "COMPILER_FXC"
    }
}

impl Backend for Dxc {
    fn executable(&self) -> &'static str {
        "dxc"
    }

    fn flag_prefix(&self) -> char {
        '-'
    }

    fn define(&self) -> &'static str {
        "COMPILER_DXC"
    }
}

impl CompilerKind {
    pub fn backend(&self) -> &'static dyn Backend {
        match self {
            CompilerKind::Fxc => &Fxc,
            CompilerKind::Dxc => &Dxc,
        }
    }

    pub fn supports(&self, shader_model: ShaderModel) -> bool {
        match self {
            CompilerKind::Fxc => shader_model <= ShaderModel::Sm5_1,
            CompilerKind::Dxc => true,
        }
    }
}

impl FromStr for CompilerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fxc" => Ok(CompilerKind::Fxc),
            "dxc" => Ok(CompilerKind::Dxc),
            _ => Err(Error::Config(format!("unknown compiler \"{s}\""))),
        }
    }
}

impl fmt::Display for CompilerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompilerKind::Fxc => "FXC",
            CompilerKind::Dxc => "DXC",
        })
    }
}

impl ShaderModel {
    pub const ALL: [ShaderModel; 6] = [
        ShaderModel::Sm5_0,
        ShaderModel::Sm5_1,
        ShaderModel::Sm6_0,
        ShaderModel::Sm6_1,
        ShaderModel::Sm6_2,
        ShaderModel::Sm6_3,
    ];

    pub fn profile_suffix(&self) -> &'static str {
        match self {
            ShaderModel::Sm5_0 => "5_0",
            ShaderModel::Sm5_1 => "5_1",
            ShaderModel::Sm6_0 => "6_0",
            ShaderModel::Sm6_1 => "6_1",
            ShaderModel::Sm6_2 => "6_2",
            ShaderModel::Sm6_3 => "6_3",
        }
    }

    pub fn number(&self) -> u32 {
        match self {
            ShaderModel::Sm5_0 => 50,
            ShaderModel::Sm5_1 => 51,
            ShaderModel::Sm6_0 => 60,
            ShaderModel::Sm6_1 => 61,
            ShaderModel::Sm6_2 => 62,
            ShaderModel::Sm6_3 => 63,
        }
    }
}

impl FromStr for ShaderModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('.', "_");
        ShaderModel::ALL
            .into_iter()
            .find(|model| model.profile_suffix() == normalized)
            .ok_or_else(|| Error::Config(format!("unknown shader model \"{s}\"")))
    }
}

impl fmt::Display for ShaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile_suffix())
    }
}

/// One permutation of one source file. Without an output the compiler only validates the code.
pub struct CompileJob<'a> {
    pub source: &'a Path,
    pub directive: &'a Directive,
    pub output: Option<&'a Path>,
}

pub trait ShaderCompiler: Sync {
    fn compile(&self, job: &CompileJob) -> Result<(), CompileFailure>;
}

pub struct CompilerDriver {
    backend: &'static dyn Backend,
    executable: PathBuf,
    shader_model: ShaderModel,
    debug_information: bool,
    global_defines: Vec<String>,
}

impl CompilerDriver {
    pub fn new(settings: &Settings) -> CompilerDriver {
        CompilerDriver::with_shader_model(settings, settings.shader_model)
    }

    pub fn with_shader_model(settings: &Settings, shader_model: ShaderModel) -> CompilerDriver {
        let backend = settings.compiler.backend();
        let executable = settings
            .compiler_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(backend.executable()));
        CompilerDriver {
            backend,
            executable,
            shader_model,
            debug_information: settings.debug_information,
            global_defines: settings.global_defines.clone(),
        }
    }

    fn defines(&self, directive: &Directive) -> Vec<String> {
        let mut defines = self.global_defines.clone();
        defines.push(directive.stage.define().to_owned());
        defines.extend(directive.defines.iter().cloned());
        defines.push(format!("SHADER_MODEL={}", self.shader_model.number()));
        defines.push("LANGUAGE_HLSL".to_owned());
        defines.push(self.backend.define().to_owned());
        defines
    }

    pub fn command(&self, job: &CompileJob) -> Command {
        let backend = self.backend;
        let directive = job.directive;
        let profile = format!(
            "{}_{}",
            directive.stage.abbreviation().to_ascii_lowercase(),
            self.shader_model
        );
        let mut command = Command::new(&self.executable);
        command.arg(job.source);
        if let Some(output) = job.output {
            command.arg(backend.flag("Fh")).arg(output);
        }
        command
            .arg(backend.flag("E"))
            .arg(&directive.entry_point)
            .arg(backend.flag("T"))
            .arg(profile)
            .arg(backend.flag("Od"));
        if self.debug_information {
            command.arg(backend.flag("Zi"));
        }
        if job.output.is_some() {
            command
                .arg(backend.flag("Vn"))
                .arg(format!("g_{}", directive.name));
        }
        for define in self.defines(directive) {
            command.arg(backend.flag("D")).arg(define.trim());
        }
        command.arg(backend.flag("nologo"));
        command
    }
}

impl ShaderCompiler for CompilerDriver {
    fn compile(&self, job: &CompileJob) -> Result<(), CompileFailure> {
        info!("HEADER:\t\t{}", job.directive);
        let mut command = self.command(job);
        let command_line = command_line(&command);
        let failure = |stderr: String| CompileFailure {
            permutation: format!("{} ({})", job.directive.name, job.source.display()),
            stderr,
            command_line: command_line.clone(),
        };
        // output() drains stdout and stderr concurrently, so a chatty compiler can't fill a pipe
        // and block before exiting.
        let output = command
            .output()
            .map_err(|err| failure(format!("failed to start compiler: {err}\n")))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("{}", stdout.trim_end());
        }
        if output.status.success() {
            Ok(())
        } else {
            Err(failure(String::from_utf8_lossy(&output.stderr).into_owned()))
        }
    }
}

/// Name of the header generated for one permutation, e.g. `Lighting_Deferred_PS.generated.h`.
pub fn output_file_name(source: &Path, directive: &Directive, extension: &str) -> String {
    let stem = source.file_stem().map_or_else(
        || source.to_string_lossy(),
        |stem| stem.to_string_lossy(),
    );
    format!(
        "{stem}_{}_{}{extension}",
        directive.name,
        directive.stage.abbreviation()
    )
}

pub fn command_line(command: &Command) -> String {
    let quote = |arg: &OsStr| {
        let arg = arg.to_string_lossy();
        if arg.contains(char::is_whitespace) {
            format!("\"{arg}\"")
        } else {
            arg.into_owned()
        }
    };
    std::iter::once(quote(command.get_program()))
        .chain(command.get_args().map(quote))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
fn test_directive() -> Directive {
    Directive {
        name: "Test".into(),
        entry_point: "main".into(),
        stage: crate::directive::ShaderStage::Pixel,
        defines: vec!["USE_FOG".into()],
    }
}

#[test]
fn dxc_command_line() {
    let mut settings = Settings::with_defaults(Path::new("/project"));
    settings.global_defines = vec!["ENGINE".into()];
    let driver = CompilerDriver::new(&settings);
    let directive = test_directive();
    let job = CompileJob {
        source: Path::new("/project/Shaders/a.hlsl"),
        directive: &directive,
        output: Some(Path::new("/project/Shaders/generated/a_Test_PS.generated.h")),
    };
    assert_eq!(
        command_line(&driver.command(&job)),
        "dxc /project/Shaders/a.hlsl -Fh /project/Shaders/generated/a_Test_PS.generated.h \
         -E main -T ps_6_0 -Od -Vn g_Test -D ENGINE -D PIXEL_SHADER -D USE_FOG \
         -D SHADER_MODEL=60 -D LANGUAGE_HLSL -D COMPILER_DXC -nologo"
    );
}

#[test]
fn fxc_command_line_without_output() {
    let mut settings = Settings::with_defaults(Path::new("/project"));
    settings.compiler = CompilerKind::Fxc;
    settings.debug_information = true;
    let driver = CompilerDriver::with_shader_model(&settings, ShaderModel::Sm5_0);
    let mut directive = test_directive();
    directive.stage = crate::directive::ShaderStage::Vertex;
    directive.defines.clear();
    let job = CompileJob {
        source: Path::new("a.hlsl"),
        directive: &directive,
        output: None,
    };
    assert_eq!(
        command_line(&driver.command(&job)),
        "fxc a.hlsl /E main /T vs_5_0 /Od /Zi /D VERTEX_SHADER /D SHADER_MODEL=50 \
         /D LANGUAGE_HLSL /D COMPILER_FXC /nologo"
    );
}

#[test]
fn output_names() {
    let directive = test_directive();
    assert_eq!(
        output_file_name(Path::new("/s/Lighting.hlsl"), &directive, ".generated.h"),
        "Lighting_Test_PS.generated.h"
    );
}

#[test]
fn shader_models_parse() {
    assert_eq!("6_1".parse::<ShaderModel>().unwrap(), ShaderModel::Sm6_1);
    assert_eq!("5.0".parse::<ShaderModel>().unwrap(), ShaderModel::Sm5_0);
    assert!("7_0".parse::<ShaderModel>().is_err());
    assert!(CompilerKind::Fxc.supports(ShaderModel::Sm5_1));
    assert!(!CompilerKind::Fxc.supports(ShaderModel::Sm6_0));
}

#[test]
fn missing_executable_is_a_failure() {
    let mut settings = Settings::with_defaults(Path::new("/project"));
    settings.compiler_path = Some(PathBuf::from("/nonexistent/dxc-for-tests"));
    let driver = CompilerDriver::new(&settings);
    let directive = test_directive();
    let job = CompileJob {
        source: Path::new("a.hlsl"),
        directive: &directive,
        output: None,
    };
    let failure = driver.compile(&job).unwrap_err();
    assert!(failure.stderr.starts_with("failed to start compiler"));
    assert!(failure.command_line.starts_with("/nonexistent/dxc-for-tests a.hlsl"));
}
