//! Structured lifecycle events.
//!
//! Every event carries an `event` field so run history can be pulled out of
//! the JSON logs with a single filter.

use tracing::{info, Span};

/// Span tagging everything logged during a run sequence with the run.
/// Attach it to the sequence with `tracing::Instrument::instrument`.
pub fn run_span(experiment: &str, run_number: i32) -> Span {
    tracing::info_span!("envoy.run", experiment = %experiment, run_number = run_number)
}

pub fn emit_run_started(experiment: &str, run_number: i32) {
    info!(event = "run.started", experiment = %experiment, run_number = run_number);
}

pub fn emit_run_stopped(experiment: &str, run_number: i32, duration_secs: u64) {
    info!(
        event = "run.stopped",
        experiment = %experiment,
        run_number = run_number,
        duration_secs = duration_secs,
    );
}

/// An ECC transition was handed to a module's envoy
pub fn emit_transition_submitted(module: usize, operation: &str) {
    info!(event = "transition.submitted", module = module, operation = %operation);
}

pub fn emit_embassy_connected(tasks: usize) {
    info!(event = "embassy.connected", tasks = tasks);
}

pub fn emit_embassy_disconnected(tasks: usize) {
    info!(event = "embassy.disconnected", tasks = tasks);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_scopes_events() {
        let span = run_span("e20009", 3);
        span.in_scope(|| {
            emit_run_started("e20009", 3);
            emit_run_stopped("e20009", 3, 60);
        });
    }
}
