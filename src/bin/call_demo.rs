//! Demo: ein Anruf mit synthetischen Medien und simuliertem Signaling
//!
//! Aufruf: `call_demo [ziel] [sekunden]`

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use videochat::call_engine::{SyntheticDevices, WebRtcConnector};
use videochat::signaling::SimulatedSignaling;
use videochat::{CallConfig, CallEvent, CallSessionController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    videochat::init_logging();

    let mut args = std::env::args().skip(1);
    let target = args.next().unwrap_or_else(|| "42".to_string());
    let hold = match args.next() {
        Some(secs) => Duration::from_secs(secs.parse().context("invalid call duration")?),
        None => Duration::from_secs(5),
    };

    let config = CallConfig::from_env().context("failed to load call configuration")?;
    let signaling = SimulatedSignaling::from_config(&config);

    let controller = CallSessionController::new(
        config,
        Arc::new(SyntheticDevices),
        Arc::new(WebRtcConnector::new()),
        Arc::new(signaling),
        |end| tracing::info!("Returning to {} after {:?}", end.return_to, end.reason),
    )?;

    let mut events = controller.subscribe();
    let printer = tokio::spawn(async move {
        while print_event(events.recv().await) {}
    });

    if controller.start_call(target.as_str()).await.is_none() {
        anyhow::bail!("call to {} was not started", target);
    }

    tokio::select! {
        _ = tokio::time::sleep(hold) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    if controller.status().is_error() {
        tracing::warn!("Call failed: {:?}", controller.snapshot().last_error);
    }
    controller.end_call().await;
    printer.await?;

    Ok(())
}

/// Gibt ein Event aus; `false` beendet die Ausgabe
fn print_event(event: Result<CallEvent, RecvError>) -> bool {
    match event {
        Ok(CallEvent::StateChanged(snapshot)) => {
            match serde_json::to_string(&snapshot) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::warn!("Failed to serialize snapshot: {}", e),
            }
            true
        }
        Ok(CallEvent::Ended(end)) => {
            println!("call to {:?} ended: {:?}", end.target, end.reason);
            false
        }
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!("Skipped {} call events", skipped);
            true
        }
        Err(RecvError::Closed) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use videochat::{CallEnd, CallSnapshot, EndReason};

    #[test]
    fn test_printer_survives_lag() {
        assert!(print_event(Err(RecvError::Lagged(3))));
        assert!(print_event(Ok(CallEvent::StateChanged(CallSnapshot::default()))));
    }

    #[test]
    fn test_printer_stops_on_end_or_close() {
        assert!(!print_event(Err(RecvError::Closed)));
        assert!(!print_event(Ok(CallEvent::Ended(CallEnd {
            session: None,
            target: None,
            reason: EndReason::NoSession,
            return_to: "/contacts".to_string(),
        }))));
    }
}
