//! Configuração do pipeline carregada a partir de `mothball.toml`.
//!
//! Chaves ausentes usam valores padrão; sem arquivo, tudo é padrão.
//! As variáveis `MOTHBALL_BATCH_ENDPOINT` e `MOTHBALL_BATCH_TOKEN` têm
//! precedência sobre o arquivo.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::batch::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "mothball.toml";

const ENDPOINT_VAR: &str = "MOTHBALL_BATCH_ENDPOINT";
const TOKEN_VAR: &str = "MOTHBALL_BATCH_TOKEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Container holding markers, manifests and packages.
    pub namespace_container: String,

    /// Directory backing the local blob store.
    pub store_root: PathBuf,

    /// Prefix removed from source keys inside packages.
    pub strip_prefix: String,

    /// First word of every dispatched job's command.
    pub job_program: String,

    pub list_page_size: usize,

    pub batch: BatchConfig,

    pub archiver: ArchiverConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            namespace_container: "attic".to_string(),
            store_root: PathBuf::from("./data"),
            strip_prefix: "from_vendor/".to_string(),
            job_program: "mothball-pipeline".to_string(),
            list_page_size: 1000,
            batch: BatchConfig::default(),
            archiver: ArchiverConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    #[serde(flatten)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiverConfig {
    pub program: String,
    /// Arguments placed before the `archive`/`delete` subcommand.
    pub args: Vec<String>,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            program: "s3mothball".to_string(),
            args: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Carrega `path`, ou `mothball.toml` no diretório atual quando `None`.
    ///
    /// Um caminho explícito precisa existir; o padrão pode estar ausente.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = var(ENDPOINT_VAR).filter(|v| !v.is_empty()) {
            self.batch.endpoint = Some(endpoint);
        }
        if let Some(token) = var(TOKEN_VAR).filter(|v| !v.is_empty()) {
            self.batch.token = Some(token);
        }
    }
}
