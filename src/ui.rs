//! Saída de terminal: spinner durante a varredura e resumos coloridos.
//!
//! Os logs vão para stderr via `tracing`; o que está aqui é o resultado do
//! comando e vai para stdout.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::dispatcher::{DispatchReport, Outcome};
use crate::scanner::StageSummary;
use crate::state_machine::{Stage, StagePaths};

/// Spinner exibido enquanto os namespaces dos estágios são listados.
pub struct ScanProgress {
    pb: ProgressBar,
}

impl ScanProgress {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    pub fn scanning(&self, stage: Stage) {
        self.pb.set_message(format!("scanning {stage}"));
    }

    pub fn finish(self) {
        self.pb.finish_and_clear();
    }
}

pub struct Printer {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
    bold: Style,
}

impl Default for Printer {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
            bold: Style::new().bold(),
        }
    }
}

impl Printer {
    pub fn stage_completed(&self, stage: Stage, paths: &StagePaths) {
        println!(
            "  {} {stage} {} -> {}",
            self.green.apply_to("✓"),
            paths.id.url(),
            paths.outbox
        );
    }

    pub fn status(&self, summaries: &[StageSummary]) {
        println!("{}", self.bold.apply_to("─── Pipeline status ───"));
        for summary in summaries {
            let style = if summary.stage == Stage::Done {
                &self.green
            } else {
                &self.yellow
            };
            println!(
                "{:<8} {}",
                style.apply_to(summary.stage),
                summary.total()
            );
            for (container, count) in &summary.containers {
                println!("    {:<30} {count}", self.dim.apply_to(container));
            }
            if summary.stray > 0 {
                println!(
                    "    {:<30} {}",
                    self.red.apply_to("(malformed)"),
                    summary.stray
                );
            }
        }
    }

    pub fn dispatch_report(&self, report: &DispatchReport) {
        for item in &report.items {
            let url = item.object.url();
            match &item.outcome {
                Outcome::Dispatched { name, queue, job_id } => println!(
                    "  {} {url} queued as {name} on {queue} ({job_id})",
                    self.green.apply_to("✓")
                ),
                Outcome::AlreadyQueued { name } => println!(
                    "  {} {url} already queued as {name}",
                    self.dim.apply_to("=")
                ),
                Outcome::TooRecent { age_secs } => println!(
                    "  {} {url} too recent ({}h old)",
                    self.yellow.apply_to("…"),
                    age_secs / 3600
                ),
                Outcome::Gone => println!(
                    "  {} {url} no longer waiting",
                    self.dim.apply_to("-")
                ),
                Outcome::Failed(err) => println!(
                    "  {} {url} failed: {err}",
                    self.red.apply_to("✗")
                ),
            }
        }
        println!(
            "{} {} on {}: {} dispatched, {} skipped, {} failed",
            self.bold.apply_to("dispatch"),
            report.stage,
            report.queue,
            report.dispatched(),
            report.skipped(),
            report.failed()
        );
    }
}
