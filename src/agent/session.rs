use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::communication::{
    ConnectionType, HandlerChain, MessageHandler, WireMessage, connect, read_message,
    send_message,
};
use crate::error::{AppResult, CommunicationError};

use super::control::ControlHandler;

/// Aborts the wrapped task when the session future is dropped.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn send_reports(out_tx: &mpsc::UnboundedSender<WireMessage>, control: &ControlHandler) -> bool {
    control
        .status_reports()
        .into_iter()
        .all(|report| out_tx.send(report).is_ok())
}

/// One connection lifetime: returns `Ok` when the console closes the
/// control connection.
pub(super) async fn run_agent_session(
    console_address: &str,
    heartbeat_interval: Duration,
    handlers: &HandlerChain,
    control: &ControlHandler,
) -> AppResult<()> {
    info!("Connecting to console {}", console_address);
    let control_connection = connect(console_address, ConnectionType::Control).await?;
    let report_connection = connect(console_address, ConnectionType::Report).await?;
    info!("Connected to console {}", console_address);

    let mut report_writer = report_connection.writer;
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let writer_handle = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(err) = send_message(&mut report_writer, &message).await {
                debug!("Report connection failed: {}", err);
                break;
            }
        }
    });

    let mut control_reader = control_connection.reader;
    let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Result<WireMessage, CommunicationError>>();
    let reader = AbortOnDrop(tokio::spawn(async move {
        loop {
            let message = read_message::<_, WireMessage>(&mut control_reader).await;
            let failed = message.is_err();
            if in_tx.send(message).is_err() || failed {
                break;
            }
        }
    }));

    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let session_result = loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if !send_reports(&out_tx, control) {
                    break Ok(());
                }
            }
            incoming = in_rx.recv() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(CommunicationError::ConnectionClosed)) | None => {
                        info!("Console closed the connection");
                        break Ok(());
                    }
                    Some(Err(err)) => break Err(err.into()),
                };

                match handlers.process(&message) {
                    Ok(true) => debug!("Processed {}", message.kind()),
                    Ok(false) => debug!("No handler for {}", message.kind()),
                    Err(err) => warn!("Failed to process {}: {}", message.kind(), err),
                }
                if !send_reports(&out_tx, control) {
                    break Ok(());
                }
            }
        }
    };

    drop(reader);
    drop(out_tx);
    if writer_handle.await.is_err() {
        debug!("Report writer ended abnormally");
    }
    session_result
}
