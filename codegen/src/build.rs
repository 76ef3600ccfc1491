use crate::cache::BuildCache;
use crate::config::Settings;
use crate::error::{io_error, CompileFailure, Error, Result};
use crate::generate::generate_code;
use crate::graph::DependencyGraph;
use crate::reflect::{check_duplicates, reflect_structs, ShaderStruct};
use crate::scan::{scan_shader_files, ShaderFile, ShaderFiles};
use crate::shaders::{CompileJob, CompilerDriver, ShaderCompiler, ShaderModel};
use log::{debug, info};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Build,
    Clean,
    Rebuild,
    /// Compiles every permutation against every supported shader model without keeping anything.
    Test,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Permutations handed to the compiler.
    pub compiled: usize,
    pub headers_written: usize,
    pub up_to_date: bool,
}

/// Runs one operation with the configured external compiler.
pub fn run(settings: &Settings, operation: Operation) -> Result<BuildReport> {
    match operation {
        Operation::Build => Orchestrator::new(settings, &CompilerDriver::new(settings)).build(),
        Operation::Clean => {
            clean(settings)?;
            Ok(BuildReport::default())
        }
        Operation::Rebuild => {
            clean(settings)?;
            Orchestrator::new(settings, &CompilerDriver::new(settings)).build()
        }
        Operation::Test => {
            clean(settings)?;
            let mut report = BuildReport::default();
            for shader_model in ShaderModel::ALL {
                if !settings.compiler.supports(shader_model) {
                    continue;
                }
                info!("testing shader model {shader_model} with {}", settings.compiler);
                let driver = CompilerDriver::with_shader_model(settings, shader_model);
                report.compiled += Orchestrator::new(settings, &driver).validate()?;
            }
            Ok(report)
        }
    }
}

/// Deletes the build cache and everything in the generated folder.
pub fn clean(settings: &Settings) -> Result<()> {
    match std::fs::remove_file(&settings.cache_path) {
        Ok(()) => info!("deleted {}", settings.cache_path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_error(&settings.cache_path)(err)),
    }
    match std::fs::remove_dir_all(&settings.generated_folder) {
        Ok(()) => info!("deleted {}", settings.generated_folder.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(io_error(&settings.generated_folder)(err)),
    }
    Ok(())
}

/// Owns one build's view of the world: the settings and the compiler every permutation goes
/// through.
pub struct Orchestrator<'a> {
    settings: &'a Settings,
    compiler: &'a dyn ShaderCompiler,
}

impl<'a> Orchestrator<'a> {
    pub fn new(settings: &'a Settings, compiler: &'a dyn ShaderCompiler) -> Orchestrator<'a> {
        Orchestrator { settings, compiler }
    }

    /// Scan, diff against the cache, compile stale permutations, regenerate headers, persist.
    pub fn build(&self) -> Result<BuildReport> {
        let settings = self.settings;
        let start = Instant::now();
        std::fs::create_dir_all(&settings.generated_folder)
            .map_err(io_error(&settings.generated_folder))?;

        let cache = BuildCache::load(&settings.cache_path);
        let mut files = scan_shader_files(settings)?;
        let graph = DependencyGraph::build(&files)?;
        if !cache.diff(&mut files, &graph, settings)? {
            info!("{} shader file(s) up to date", files.len());
            return Ok(BuildReport {
                up_to_date: true,
                ..BuildReport::default()
            });
        }

        // Reflection runs before compiling so that source errors fail fast.
        let structs = reflect_files(&files)?;

        let jobs: Vec<(usize, usize)> = files
            .iter()
            .enumerate()
            .filter(|(_, file)| file.should_compile)
            .flat_map(|(index, file)| permutations(index, file))
            .collect();
        let results = self.compile_all(&files, &jobs, true);
        let mut failures = Vec::new();
        for (&(index, _), result) in jobs.iter().zip(results) {
            if let Err(failure) = result {
                files[index].did_compile = false;
                failures.push(failure);
            }
        }
        if !failures.is_empty() {
            BuildCache::from_files(&files).save(&settings.cache_path)?;
            return Err(Error::Compile { failures });
        }

        let headers_written = generate_code(settings, &structs)?;
        BuildCache::from_files(&files).save(&settings.cache_path)?;
        info!(
            "compiled {} permutation(s), wrote {headers_written} header(s) in {:.2?}",
            jobs.len(),
            start.elapsed()
        );
        Ok(BuildReport {
            compiled: jobs.len(),
            headers_written,
            up_to_date: false,
        })
    }

    /// Compiles every permutation of every file without writing outputs. Returns how many
    /// permutations were checked.
    pub fn validate(&self) -> Result<usize> {
        let files = scan_shader_files(self.settings)?;
        DependencyGraph::build(&files)?;
        let jobs: Vec<(usize, usize)> = files
            .iter()
            .enumerate()
            .flat_map(|(index, file)| permutations(index, file))
            .collect();
        let failures: Vec<CompileFailure> = self
            .compile_all(&files, &jobs, false)
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if !failures.is_empty() {
            return Err(Error::Compile { failures });
        }
        Ok(jobs.len())
    }

    /// Runs the given (file, permutation) pairs on a pool of scoped workers pulling from a shared
    /// queue. Results come back in job order.
    fn compile_all(
        &self,
        files: &ShaderFiles,
        jobs: &[(usize, usize)],
        write_outputs: bool,
    ) -> Vec<Result<(), CompileFailure>> {
        let queue = Mutex::new(jobs.iter().enumerate());
        let slots: Vec<Mutex<Option<Result<(), CompileFailure>>>> =
            jobs.iter().map(|_| Mutex::new(None)).collect();
        let workers = self.settings.jobs.clamp(1, jobs.len().max(1));
        debug!("compiling {} permutation(s) on {workers} worker(s)", jobs.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let Some((slot, &(index, permutation))) = queue.lock().unwrap().next() else {
                        break;
                    };
                    let file = &files[index];
                    let job = CompileJob {
                        source: &file.full_path,
                        directive: &file.directives[permutation],
                        output: write_outputs.then(|| file.outputs[permutation].as_path()),
                    };
                    let result = self.compiler.compile(&job);
                    *slots[slot].lock().unwrap() = Some(result);
                });
            }
        });

        slots
            .into_iter()
            .map(|slot| slot.into_inner().unwrap().unwrap_or(Ok(())))
            .collect()
    }
}

fn permutations(index: usize, file: &ShaderFile) -> impl Iterator<Item = (usize, usize)> {
    (0..file.directives.len()).map(move |permutation| (index, permutation))
}

/// Structs of every scanned file, in file order then declaration order.
pub fn reflect_files(files: &ShaderFiles) -> Result<Vec<ShaderStruct>> {
    let mut structs = Vec::new();
    for file in files.iter() {
        structs.extend(reflect_structs(&file.content, &file.full_path)?);
    }
    check_duplicates(&structs)?;
    Ok(structs)
}

#[cfg(test)]
struct Recorder(Mutex<Vec<String>>);

#[cfg(test)]
impl ShaderCompiler for Recorder {
    fn compile(&self, job: &CompileJob) -> Result<(), CompileFailure> {
        self.0.lock().unwrap().push(job.directive.name.clone());
        if job.directive.name.starts_with("Broken") {
            return Err(CompileFailure {
                permutation: job.directive.name.clone(),
                stderr: "error X3000: syntax error\n".into(),
                command_line: String::new(),
            });
        }
        if let Some(output) = job.output {
            std::fs::write(output, format!("const BYTE g_{}[] = {{ 0 }};", job.directive.name))
                .unwrap();
        }
        Ok(())
    }
}

#[cfg(test)]
fn project(files: &[(&str, &str)]) -> (tempfile::TempDir, Settings) {
    let root = tempfile::tempdir().unwrap();
    let mut settings = Settings::with_defaults(root.path());
    settings.jobs = 3;
    for (name, text) in files {
        let path = settings.source_path.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }
    (root, settings)
}

#[test]
fn results_keep_job_order() {
    let (_root, settings) = project(&[
        ("a.hlsl", "// ShaderCompiler. Name: A1\n// ShaderCompiler. Name: BrokenA2\n"),
        ("b.hlsl", "// ShaderCompiler. Name: B1\n"),
    ]);
    std::fs::create_dir_all(&settings.generated_folder).unwrap();
    let files = scan_shader_files(&settings).unwrap();
    let recorder = Recorder(Mutex::new(Vec::new()));
    let orchestrator = Orchestrator::new(&settings, &recorder);
    let results = orchestrator.compile_all(&files, &[(0, 0), (0, 1), (1, 0)], true);
    assert!(results[0].is_ok());
    assert_eq!(results[1].as_ref().unwrap_err().permutation, "BrokenA2");
    assert!(results[2].is_ok());
    assert_eq!(recorder.0.lock().unwrap().len(), 3);
}

#[test]
fn validation_writes_nothing() {
    let (_root, settings) = project(&[("a.hlsl", "// ShaderCompiler. Name: A, Type: VS\n")]);
    let recorder = Recorder(Mutex::new(Vec::new()));
    let checked = Orchestrator::new(&settings, &recorder).validate().unwrap();
    assert_eq!(checked, 1);
    assert!(!settings.generated_folder.exists());
    assert!(!settings.cache_path.exists());
}

#[test]
fn failed_permutation_is_retried_next_build() {
    let (_root, settings) = project(&[
        ("a.hlsl", "// ShaderCompiler. Name: BrokenA\n"),
        ("b.hlsl", "// ShaderCompiler. Name: B\n"),
    ]);
    let recorder = Recorder(Mutex::new(Vec::new()));
    let err = Orchestrator::new(&settings, &recorder).build().unwrap_err();
    let Error::Compile { failures } = err else {
        panic!("expected a compile failure");
    };
    assert_eq!(failures.len(), 1);
    assert!(failures[0].stderr.contains("X3000"));

    recorder.0.lock().unwrap().clear();
    assert!(Orchestrator::new(&settings, &recorder).build().is_err());
    assert_eq!(*recorder.0.lock().unwrap(), ["BrokenA"]);
}

#[test]
fn clean_removes_generated_state() {
    let (_root, settings) = project(&[]);
    std::fs::create_dir_all(&settings.generated_folder).unwrap();
    std::fs::write(settings.generated_folder.join("a_A_PS.generated.h"), "").unwrap();
    std::fs::write(&settings.cache_path, "{}").unwrap();
    clean(&settings).unwrap();
    assert!(!settings.generated_folder.exists());
    assert!(!settings.cache_path.exists());
    clean(&settings).unwrap();
}

#[test]
fn duplicate_constant_buffers_are_fatal() {
    let (_root, settings) = project(&[
        ("a.hlsl", "struct Shared { float a; };\n"),
        ("b.hlsl", "struct Shared { float b; };\n"),
        ("c.hlsl", "struct Out { float4 p : SV_Position; };\n"),
        ("d.hlsl", "struct Out { float4 p : SV_Position; };\n"),
    ]);
    let files = scan_shader_files(&settings).unwrap();
    let Err(Error::DuplicateStructs { names }) = reflect_files(&files) else {
        panic!("duplicate not reported");
    };
    assert_eq!(names, ["Shared"]);
}
