mod build;
mod cache;
mod config;
mod directive;
mod error;
mod generate;
mod graph;
mod hash;
mod reflect;
mod scan;
mod shaders;
mod types;

pub use crate::build::{clean, reflect_files, run, BuildReport, Operation, Orchestrator};
pub use crate::cache::{BuildCache, BuildCacheEntry};
pub use crate::config::{Config, Settings};
pub use crate::directive::{parse_directives, Directive, ShaderStage};
pub use crate::error::{CompileFailure, Error, Result};
pub use crate::generate::{generate_code, replace_regions};
pub use crate::graph::DependencyGraph;
pub use crate::hash::{content_hash, path_hash};
pub use crate::reflect::{
    check_duplicates, decompose_type, reflect_structs, BaseType, Interpolation, ScalarType,
    ShaderStruct, StructField, StructRole,
};
pub use crate::scan::{scan_shader_files, ShaderFile, ShaderFiles};
pub use crate::shaders::{
    command_line, output_file_name, CompileJob, CompilerDriver, CompilerKind, ShaderCompiler,
    ShaderModel,
};
pub use crate::types::{dxgi_format, engine_declaration, input_element_desc};
