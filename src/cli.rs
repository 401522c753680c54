//! Interface de linha de comando do fleetjobs baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, validate, sweep)
//! e flags globais (--config, --log-level, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::CONFIG_FILE;

/// fleetjobs: execução de jobs de rollout em frotas de elementos de rede.
#[derive(Debug, Parser)]
#[command(name = "fleetjobs", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração.
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    /// Nível de log; tem precedência sobre `FLEETJOBS_LOG`.
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Nível efetivo: `--log-level`, senão `debug` com `--verbose`.
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        self.log_level
            .or(if self.verbose { Some(LogLevel::Debug) } else { None })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submete um job e executa seu grafo de tarefas.
    Run {
        /// Caminho para um arquivo JSON ou TOML com a definição do job.
        #[arg(long)]
        file: PathBuf,

        /// Confirma tarefas canário automaticamente.
        #[arg(long, default_value_t = false)]
        auto_confirm: bool,
    },

    /// Valida uma definição de job sem executá-la.
    Validate {
        #[arg(long)]
        file: PathBuf,
    },

    /// Executa um job e expira as tarefas que ficaram pendentes.
    Sweep {
        #[arg(long)]
        file: PathBuf,

        /// Idade máxima em segundos; padrão vem da configuração.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}
