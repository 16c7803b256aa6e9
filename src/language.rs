//! Language runtime registry.
//!
//! Maps each [`Language`] to the sandbox image it runs in and the commands
//! used to compile and run a staged source file. The registry is built once
//! at startup and must cover every language; a gap is a configuration fault
//! reported before any submission is judged.

use std::collections::HashMap;
use std::path::Path;

use crate::config::Config;
use crate::domain::Language;

/// Builds the compile command for a source file inside the sandbox.
pub(crate) type CompileCommand = fn(&Path) -> Vec<String>;

/// Builds the run command for a source file and a memory limit in bytes.
pub(crate) type RunCommand = fn(&Path, u64) -> Vec<String>;

/// How a single language is compiled and executed.
#[derive(Debug, Clone)]
pub(crate) struct LanguageConfig {
    pub language: Language,
    pub image: String,
    pub compile: Option<CompileCommand>,
    pub run: RunCommand,
}

impl LanguageConfig {
    /// Compile command for `file`, if the language needs one.
    pub fn compile_command(&self, file: &Path) -> Option<Vec<String>> {
        self.compile.map(|build| build(file))
    }

    /// Run command for `file` under `memory_limit_bytes`.
    pub fn run_command(&self, file: &Path, memory_limit_bytes: u64) -> Vec<String> {
        (self.run)(file, memory_limit_bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum RegistryError {
    #[error("No runtime configured for language {language}")]
    Missing { language: Language },

    #[error("Language {language} is configured more than once")]
    Duplicate { language: Language },
}

/// Read-only lookup table from language to runtime config.
#[derive(Debug, Clone)]
pub(crate) struct LanguageRegistry {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageRegistry {
    /// Build a registry, rejecting duplicates and any language left uncovered.
    pub fn new(configs: Vec<LanguageConfig>) -> Result<Self, RegistryError> {
        let mut map = HashMap::with_capacity(configs.len());
        for config in configs {
            let language = config.language;
            if map.insert(language, config).is_some() {
                return Err(RegistryError::Duplicate { language });
            }
        }

        for language in Language::ALL {
            if !map.contains_key(&language) {
                return Err(RegistryError::Missing { language });
            }
        }

        Ok(Self { configs: map })
    }

    /// Built-in runtimes with image overrides from `autojudge.toml` applied.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let configs = default_configs()
            .into_iter()
            .map(|mut lc| {
                if let Some(image) = config.image_override(lc.language.config_key()) {
                    lc.image = image.to_string();
                }
                lc
            })
            .collect();
        Self::new(configs)
    }

    /// Look up a language. Infallible once the registry has been validated.
    pub fn lookup(&self, language: Language) -> &LanguageConfig {
        &self.configs[&language]
    }

    /// All configs in a stable order, for display.
    pub fn iter(&self) -> impl Iterator<Item = &LanguageConfig> {
        Language::ALL.iter().map(|l| &self.configs[l])
    }
}

/// The declarative runtime table.
pub(crate) fn default_configs() -> Vec<LanguageConfig> {
    vec![
        LanguageConfig {
            language: Language::Cpp17,
            image: "gcc:14".to_string(),
            compile: Some(cpp_compile),
            run: cpp_run,
        },
        LanguageConfig {
            language: Language::Java21,
            image: "eclipse-temurin:21-jdk".to_string(),
            compile: Some(java_compile),
            run: java_run,
        },
        LanguageConfig {
            language: Language::Python312,
            image: "python:3.12-slim".to_string(),
            compile: None,
            run: python_run,
        },
    ]
}

fn parent_dir(file: &Path) -> String {
    file.parent()
        .map_or_else(|| ".".to_string(), |p| p.display().to_string())
}

fn cpp_binary(file: &Path) -> String {
    Path::new(&parent_dir(file)).join("main").display().to_string()
}

fn cpp_compile(file: &Path) -> Vec<String> {
    vec![
        "g++".to_string(),
        "-std=c++17".to_string(),
        "-O2".to_string(),
        "-o".to_string(),
        cpp_binary(file),
        file.display().to_string(),
    ]
}

fn cpp_run(file: &Path, _memory_limit_bytes: u64) -> Vec<String> {
    vec![cpp_binary(file)]
}

fn java_compile(file: &Path) -> Vec<String> {
    vec![
        "javac".to_string(),
        "-d".to_string(),
        parent_dir(file),
        file.display().to_string(),
    ]
}

fn java_run(file: &Path, memory_limit_bytes: u64) -> Vec<String> {
    let class = file
        .file_stem()
        .map_or_else(|| "Main".to_string(), |s| s.to_string_lossy().to_string());
    vec![
        "java".to_string(),
        format!("-Xmx{}m", megabytes(memory_limit_bytes)),
        "-cp".to_string(),
        parent_dir(file),
        class,
    ]
}

fn python_run(file: &Path, _memory_limit_bytes: u64) -> Vec<String> {
    vec!["python3".to_string(), file.display().to_string()]
}

/// Whole megabytes, never below one.
fn megabytes(bytes: u64) -> u64 {
    (bytes / (1024 * 1024)).max(1)
}
