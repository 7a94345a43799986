//! Foreground supervision of a run: forwards events and turns interrupts
//! into cancellation.

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::controller::RunHandle;
use crate::core::models::RunOutcome;
use crate::core::observer::RunEvent;

/// Drive `handle` to completion, passing every event to `on_event`.
///
/// The first message on `interrupts` requests cancellation, which the run
/// honours at its next state boundary. A second one stops waiting and
/// returns an error straight away, leaving the worker (and the remote job)
/// to finish on their own.
pub async fn watch(
    handle: RunHandle,
    mut events: mpsc::UnboundedReceiver<RunEvent>,
    mut interrupts: mpsc::Receiver<()>,
    mut on_event: impl FnMut(&RunEvent),
) -> Result<RunOutcome> {
    let mut outcome = None;
    let mut cancel_requested = false;
    let mut interrupts_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    on_event(&event);
                    if let RunEvent::Terminal(terminal) = event {
                        outcome = Some(terminal);
                    }
                }
                None => break,
            },
            signal = interrupts.recv(), if interrupts_open => match signal {
                Some(()) if cancel_requested => {
                    warn!("Interrupted again; no longer waiting for the run to stop");
                    bail!("Interrupted; the remote job keeps running");
                }
                Some(()) => {
                    info!("Cancellation requested; stopping after the current backend call");
                    handle.cancel();
                    cancel_requested = true;
                }
                None => interrupts_open = false,
            },
        }
    }

    handle.wait().await.context("Job task ended abnormally")?;
    outcome.context("Job ended without reporting an outcome")
}
