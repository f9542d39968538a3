// kiln/src/cli/status.rs
use std::time::Instant;

use colored::*;
use kiln_common::pipeline::{InstallState, Phase, PipelineEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

fn state_indicator(state: &InstallState) -> ColoredString {
    match state {
        InstallState::Pending => " ·".dimmed(),
        InstallState::Resolving => " →".cyan(),
        InstallState::Configuring => " ⚙".blue(),
        InstallState::Building => " ⚙".magenta(),
        InstallState::Verifying => " ?".yellow(),
        InstallState::Installed => " ✓".green().bold(),
        InstallState::Failed(_) => " ✗".red().bold(),
    }
}

fn colored_state(state: &InstallState) -> ColoredString {
    let text = state.to_string();
    match state {
        InstallState::Installed => text.green().bold(),
        InstallState::Failed(_) => text.red().bold(),
        InstallState::Pending => text.dimmed(),
        _ => text.bold(),
    }
}

/// Prints pipeline events as they arrive until every sender is dropped.
///
/// Warnings and the final outcome are buffered and printed once the channel closes,
/// so they are not interleaved with phase output.
pub async fn handle_events(mut event_rx: broadcast::Receiver<PipelineEvent>) {
    let mut logs_buffer = Vec::new();
    let mut phase_started: Option<(Phase, Instant)> = None;

    loop {
        match event_rx.recv().await {
            Ok(event) => match event {
                PipelineEvent::StateChanged { target_id, state } => {
                    println!(
                        "{} {} {}",
                        state_indicator(&state),
                        target_id.cyan(),
                        colored_state(&state)
                    );
                }
                PipelineEvent::WorkdirCreated { path, .. } => {
                    println!("   {} {}", "workdir".dimmed(), path.display());
                }
                PipelineEvent::PhaseStarted { phase, command, .. } => {
                    phase_started = Some((phase, Instant::now()));
                    println!("{}{}", "==> ".bold().blue(), command.join(" ").bold());
                }
                PipelineEvent::PhaseFinished {
                    phase, exit_status, ..
                } => {
                    let elapsed = match phase_started.take() {
                        Some((started, at)) if started == phase => {
                            format!(" ({:.1}s)", at.elapsed().as_secs_f64())
                        }
                        _ => String::new(),
                    };
                    match exit_status {
                        Some(0) => println!("   {} {}{}", "✓".green(), phase, elapsed.dimmed()),
                        Some(code) => println!(
                            "   {} {} exited with status {}{}",
                            "✗".red().bold(),
                            phase,
                            code,
                            elapsed.dimmed()
                        ),
                        None => println!(
                            "   {} {} did not run to completion",
                            "✗".red().bold(),
                            phase
                        ),
                    }
                }
                PipelineEvent::CheckStarted {
                    check_index,
                    description,
                    ..
                } => {
                    println!(
                        "{}{} {}",
                        "==> ".bold().blue(),
                        format!("Check #{check_index}:").bold(),
                        description
                    );
                }
                PipelineEvent::CheckPassed { check_index, .. } => {
                    println!("   {} check #{}", "✓".green(), check_index);
                }
                PipelineEvent::JobSuccess {
                    target_id,
                    keg_path,
                } => {
                    logs_buffer.push(format!(
                        "{}: {} ({})",
                        "Installed".green(),
                        target_id.cyan(),
                        keg_path.display()
                    ));
                }
                PipelineEvent::JobFailed {
                    target_id, error, ..
                } => {
                    logs_buffer.push(format!(
                        "{} {}: {}",
                        "✗".red().bold(),
                        target_id.cyan(),
                        error.red()
                    ));
                }
                PipelineEvent::LogInfo { message } => {
                    logs_buffer.push(message);
                }
                PipelineEvent::LogWarn { message } => {
                    logs_buffer.push(message.yellow().to_string());
                }
            },
            Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => {
                logs_buffer.push(format!("({skipped} status events dropped)").dimmed().to_string());
            }
        }
    }

    if !logs_buffer.is_empty() {
        println!();
        for log in &logs_buffer {
            println!("{log}");
        }
    }
}
