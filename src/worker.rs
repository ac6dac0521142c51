//! Single-worker request queue in front of a [`SignalGenerator`].
//!
//! The generator is moved onto a dedicated task. Callers post [`Request`]s on
//! an `mpsc` channel and receive [`Event`]s on another, so the display side
//! never blocks on settle delays or upload pacing, and no two operations ever
//! run against the port at the same time.

use crate::arb::ArbWaveform;
use crate::error::{GenResult, GeneratorError};
use crate::generator::SignalGenerator;
use crate::hardware::Transport;
use crate::scpi::{InstrumentStatus, OutputSetting};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Requests buffered before `submit` waits.
const REQUEST_CAPACITY: usize = 16;

/// Work for the generator task.
#[derive(Debug, Clone)]
pub enum Request {
    /// Apply an output setting.
    Apply(OutputSetting),
    /// Run the composite status query.
    QueryStatus,
    /// Parse raw ARB text and upload it under the generator's ARB name.
    UploadArbText(String),
    /// Upload an already encoded waveform.
    UploadArb(ArbWaveform),
    /// Send `*CLS`.
    ClearStatus,
    /// Close the port and stop the task.
    Shutdown,
}

/// Outcome posted back to the display side.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Apply finished; status line.
    Applied(String),
    /// Query finished.
    Status(InstrumentStatus),
    /// Upload finished; status line.
    ArbUploaded(String),
    /// `*CLS` sent.
    StatusCleared,
    /// The request failed. The port stays open.
    Failed {
        /// User-facing message
        message: String,
        /// The instrument may hold a partially applied sequence
        partial: bool,
    },
    /// The worker closed the port and exited.
    Stopped,
}

impl Event {
    fn from_error(err: &GeneratorError) -> Self {
        Event::Failed {
            message: format!("Error: {err}"),
            partial: err.leaves_partial_state(),
        }
    }

    /// Text for a status display.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Event::Applied(line) | Event::ArbUploaded(line) => line.clone(),
            Event::Status(status) => status.to_string(),
            Event::StatusCleared => "Status cleared".to_string(),
            Event::Failed { message, .. } => message.clone(),
            Event::Stopped => "Disconnected".to_string(),
        }
    }
}

/// Sending side of a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    requests: mpsc::Sender<Request>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queue a request. Requests run strictly in submission order.
    pub async fn submit(&self, request: Request) -> GenResult<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| GeneratorError::WorkerClosed)
    }

    /// Ask the worker to close the port, then wait for it to exit.
    pub async fn shutdown(self) -> GenResult<()> {
        // Already gone is fine; the task still closes the port on its way out
        let _ = self.requests.send(Request::Shutdown).await;
        self.task
            .await
            .map_err(|e| GeneratorError::Io(std::io::Error::other(e.to_string())))
    }
}

/// Move `generator` onto its own task.
///
/// Returns the request handle and the event stream. The task exits after
/// [`Request::Shutdown`] or when every handle is dropped, closing the port
/// either way and posting [`Event::Stopped`].
pub fn spawn_worker<T>(
    mut generator: SignalGenerator<T>,
) -> (WorkerHandle, mpsc::UnboundedReceiver<Event>)
where
    T: Transport + 'static,
{
    let (request_tx, mut request_rx) = mpsc::channel::<Request>(REQUEST_CAPACITY);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        while let Some(request) = request_rx.recv().await {
            let event = match request {
                Request::Apply(setting) => generator.apply(&setting).await.map(Event::Applied),
                Request::QueryStatus => generator.query_status().await.map(Event::Status),
                Request::UploadArbText(text) => {
                    generator.upload_arb_text(&text).await.map(Event::ArbUploaded)
                }
                Request::UploadArb(waveform) => {
                    generator.upload_arb(&waveform).await.map(Event::ArbUploaded)
                }
                Request::ClearStatus => {
                    generator.clear_status().await.map(|()| Event::StatusCleared)
                }
                Request::Shutdown => break,
            }
            .unwrap_or_else(|e| Event::from_error(&e));

            if event_tx.send(event).is_err() {
                warn!("event receiver dropped, stopping generator worker");
                break;
            }
        }

        if let Err(e) = generator.shutdown().await {
            warn!(error = %e, "error closing port during worker shutdown");
        }
        info!(port = generator.port_name(), "generator worker stopped");
        let _ = event_tx.send(Event::Stopped);
    });

    (
        WorkerHandle {
            requests: request_tx,
            task,
        },
        event_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimulatedGenerator;
    use crate::scpi::Waveform;

    #[tokio::test]
    async fn write_failure_reports_partial_state() -> anyhow::Result<()> {
        let sim = SimulatedGenerator::new().fail_after_writes(2);
        let (worker, mut events) = spawn_worker(SignalGenerator::new(sim, "SIM"));

        worker
            .submit(Request::Apply(OutputSetting::new(
                Waveform::Square,
                1000.0,
                2.0,
                50.0,
            )))
            .await?;

        match events.recv().await {
            Some(Event::Failed { message, partial }) => {
                assert!(partial);
                assert!(message.contains("VOLT 2"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        worker.shutdown().await?;
        assert_eq!(events.recv().await, Some(Event::Stopped));
        Ok(())
    }

    #[tokio::test]
    async fn connection_failure_is_reported() -> anyhow::Result<()> {
        let sim = SimulatedGenerator::new().refuse_open("Access is denied");
        let (worker, mut events) = spawn_worker(SignalGenerator::new(sim, "COM4"));

        worker.submit(Request::QueryStatus).await?;

        match events.recv().await {
            Some(Event::Failed { message, partial }) => {
                assert!(!partial);
                assert!(message.contains("COM4"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        worker.shutdown().await?;
        Ok(())
    }

    #[test]
    fn display_text_for_failures_is_the_message() {
        let event = Event::from_error(&GeneratorError::NotConnected);
        assert_eq!(event.display_text(), "Error: Serial port is not open");
    }
}
