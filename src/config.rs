//! Configuração do fleetjobs carregada a partir de `fleetjobs.toml`.
//!
//! A struct [`JobsConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `FLEETJOBS_ENDPOINT` tem precedência sobre o arquivo.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{JobError, Result};
use crate::model::ElementId;

pub const CONFIG_FILE: &str = "fleetjobs.toml";
pub const ENDPOINT_ENV: &str = "FLEETJOBS_ENDPOINT";

/// Configuração de nível superior carregada de `fleetjobs.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Idade máxima, em segundos, de uma tarefa pendente antes de expirar.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Intervalo entre varreduras de expiração.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// URL base para tarefas REST sem elemento associado.
    #[serde(default)]
    pub default_endpoint: Option<String>,

    /// Endpoint de gerenciamento de cada elemento de rede.
    #[serde(default)]
    pub elements: HashMap<ElementId, String>,

    /// Capacidade do canal de eventos.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

// Uma hora.
fn default_task_timeout_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    256
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            default_endpoint: None,
            elements: HashMap::new(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl JobsConfig {
    /// Carrega a configuração do arquivo indicado.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<JobsConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        config.override_endpoint(std::env::var(ENDPOINT_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Carrega `fleetjobs.toml` do diretório atual.
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(CONFIG_FILE))
    }

    fn override_endpoint(&mut self, endpoint: Option<String>) {
        if let Some(endpoint) = endpoint
            && !endpoint.is_empty()
        {
            self.default_endpoint = Some(endpoint);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(JobError::Config("sweep_interval_secs must be positive".into()));
        }
        if self.task_timeout_secs == 0 {
            return Err(JobError::Config("task_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_values() {
        let config = JobsConfig::default();
        assert_eq!(config.task_timeout_secs, 3600);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.event_buffer, 256);
        assert!(config.default_endpoint.is_none());
        assert!(config.elements.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            task_timeout_secs = 120
            default_endpoint = "http://controller:8080"

            [elements]
            leaf1 = "https://leaf1.mgmt"
            spine1 = "https://spine1.mgmt"
        "#;
        let config: JobsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.task_timeout(), Duration::from_secs(120));
        assert_eq!(config.default_endpoint.as_deref(), Some("http://controller:8080"));
        assert_eq!(
            config.elements[&ElementId::new("leaf1").unwrap()],
            "https://leaf1.mgmt"
        );
        assert_eq!(config.sweep_interval_secs, 60);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sweep_interval_secs = 5\nevent_buffer = 16").unwrap();
        let config = JobsConfig::load(file.path()).unwrap();
        assert_eq!(config.sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.event_buffer, 16);
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = JobsConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.task_timeout_secs, 3600);
    }

    #[test]
    fn load_rejects_zero_interval_and_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sweep_interval_secs = 0").unwrap();
        let err = JobsConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, JobError::Config(_)));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "task_timeout_secs = \"soon\"").unwrap();
        assert!(matches!(
            JobsConfig::load(file.path()).unwrap_err(),
            JobError::Toml(_)
        ));
    }

    #[test]
    fn endpoint_override_wins_unless_empty() {
        let mut config = JobsConfig {
            default_endpoint: Some("http://file".into()),
            ..JobsConfig::default()
        };
        config.override_endpoint(Some(String::new()));
        assert_eq!(config.default_endpoint.as_deref(), Some("http://file"));
        config.override_endpoint(Some("http://env".into()));
        assert_eq!(config.default_endpoint.as_deref(), Some("http://env"));
    }
}
