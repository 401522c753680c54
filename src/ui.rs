//! Interface de terminal do fleetjobs: spinner e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! a execução de um job a partir dos eventos de estado das tarefas.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::events::TaskStateChangedEvent;
use crate::model::{Job, JobId, JobState, TaskId, TaskState};

/// Indicador visual de progresso para a execução de um job no terminal.
///
/// Exibe um spinner animado durante a execução e uma linha colorida por
/// mudança de estado: sucesso (verde), falha (vermelho), espera (amarelo).
#[derive(Clone)]
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner com o nome do job.
    pub fn start(job_name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("RUN: {job_name}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self::with_bar(pb)
    }

    /// Sem spinner, apenas para relatórios.
    pub fn report_only() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(pb: ProgressBar) -> Self {
        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Exibe uma mudança de estado de tarefa.
    pub fn task_changed(&self, event: &TaskStateChangedEvent) {
        self.pb
            .set_message(format!("{}: {}", event.task_id, event.state));
        let symbol = state_symbol(event.state);
        let styled = match event.state {
            s if s.is_succeeded() => self.green.apply_to(symbol),
            s if s.is_failed() => self.red.apply_to(symbol),
            _ => self.yellow.apply_to(symbol),
        };
        self.pb.println(format!(
            "  {styled} {:<24} {} → {}",
            event.task_id.as_str(),
            event.previous,
            event.state
        ));
    }

    /// Finaliza o spinner e exibe o estado final do job.
    pub fn complete(&self, job: &Job) {
        self.pb.finish_and_clear();
        match job.state() {
            JobState::Completed => {
                println!("  {} Job completed", self.green.apply_to("✓"));
            }
            JobState::Confirm => {
                println!(
                    "  {} Job awaits confirmation of its canary tasks",
                    self.yellow.apply_to("?")
                );
            }
            state if state.is_running() || state == JobState::Ready => {
                println!("  {} Job is {state}", self.yellow.apply_to("…"));
            }
            state => {
                println!("  {} Job {state}", self.red.apply_to("✗"));
            }
        }
    }

    /// Lista as tarefas expiradas por uma varredura.
    pub fn print_expired(&self, expired: &[(JobId, TaskId)]) {
        if expired.is_empty() {
            println!("  {} No overdue tasks", self.green.apply_to("✓"));
        }
        for (job_id, task_id) in expired {
            println!("  {} {task_id} ({job_id}) TIMEOUT", self.red.apply_to("⏱"));
        }
    }

    /// Imprime o job final formatado em JSON com estilo colorido.
    pub fn print_report(&self, job: &Job) {
        let status_style = match job.state() {
            JobState::Completed => &self.green,
            JobState::Failed | JobState::Cancelled => &self.red,
            _ => &self.yellow,
        };
        println!();
        println!("{}", status_style.apply_to("─── Job Report ───"));
        println!("{}", serde_json::to_string_pretty(job).unwrap_or_default());
    }
}

fn state_symbol(state: TaskState) -> &'static str {
    match state {
        TaskState::Completed => "✓",
        TaskState::Failed | TaskState::Rejected => "✗",
        TaskState::Timeout => "⏱",
        TaskState::Confirm | TaskState::Suspended => "?",
        TaskState::Active => "▶",
        TaskState::Ready | TaskState::Blocked => "·",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_distinguish_outcomes() {
        assert_eq!(state_symbol(TaskState::Completed), "✓");
        assert_eq!(state_symbol(TaskState::Rejected), state_symbol(TaskState::Failed));
        assert_ne!(state_symbol(TaskState::Timeout), state_symbol(TaskState::Failed));
        assert_eq!(state_symbol(TaskState::Confirm), "?");
    }
}
