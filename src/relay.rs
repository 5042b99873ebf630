use std::future::Future;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use serde_json::json;

use crate::error::Error;
use crate::pipeline::FrameResult;
use crate::worker::{StreamMessage, Worker};

/// Ordered, reliable channel to one viewer.
pub trait Transport {
    fn send_metadata(
        &mut self,
        result: &FrameResult,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn send_image(&mut self, jpeg: &[u8]) -> impl Future<Output = Result<(), Error>> + Send;

    fn send_error(&mut self, message: &str) -> impl Future<Output = Result<(), Error>> + Send;
}

pub fn frame_envelope(result: &FrameResult) -> Result<String, Error> {
    Ok(serde_json::to_string(&json!({
        "type": "frame_data",
        "data": result,
    }))?)
}

pub fn error_envelope(message: &str) -> String {
    json!({
        "type": "error",
        "data": message,
    })
    .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The source ran out of frames.
    Completed,
    /// The session failed and the viewer was told so.
    Failed,
    Cancelled,
    /// The viewer went away; the worker was asked to stop.
    Disconnected,
}

/// Forwards worker messages to `transport` until the end sentinel, then
/// joins the worker.
///
/// Each frame goes out as metadata followed by its JPEG. Blocking reads
/// run on tokio's blocking pool so the caller's executor stays free.
pub async fn relay<T: Transport>(
    rx: Receiver<StreamMessage>,
    worker: Worker,
    transport: &mut T,
    join_timeout: Option<Duration>,
) -> Result<RelayOutcome, Error> {
    let mut rx = rx;
    let mut failed = false;
    let mut frames = 0u64;

    let outcome = loop {
        let (back, msg) = tokio::task::spawn_blocking(move || {
            let msg = rx.recv();
            (rx, msg)
        })
        .await?;
        rx = back;

        match msg {
            Ok(StreamMessage::Frame { result, jpeg }) => {
                let sent = match transport.send_metadata(&result).await {
                    Ok(()) => transport.send_image(&jpeg).await,
                    Err(err) => Err(err),
                };

                if let Err(err) = sent {
                    log::warn!("{}: viewer disconnected: {}", worker.name(), err);
                    worker.cancel();
                    break RelayOutcome::Disconnected;
                }

                frames += 1;
            }
            Ok(StreamMessage::Failed(message)) => {
                failed = true;
                if let Err(err) = transport.send_error(&message).await {
                    log::warn!("{}: unable to report failure: {}", worker.name(), err);
                }
            }
            Ok(StreamMessage::End) | Err(_) => {
                break if failed {
                    RelayOutcome::Failed
                } else if worker.cancel_flag().is_cancelled() {
                    RelayOutcome::Cancelled
                } else {
                    RelayOutcome::Completed
                };
            }
        }
    };

    worker.cancel();
    // Unblocks a worker waiting on a full channel.
    drop(rx);

    let name = worker.name().to_string();
    tokio::task::spawn_blocking(move || worker.join(join_timeout)).await??;

    log::info!("{}: relayed {} frames, {:?}", name, frames, outcome);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn envelopes_are_tagged() {
        let result = FrameResult {
            frame_index: 7,
            vehicles: vec![],
            traffic_lights: vec![],
            crosswalk_bbox: None,
            total_crossings: 0,
            red_light_violations: 0,
            frame_width: 2,
            frame_height: 2,
            vehicle_states: BTreeMap::new(),
            output_path: None,
        };

        let frame: serde_json::Value =
            serde_json::from_str(&frame_envelope(&result).unwrap()).unwrap();
        assert_eq!(frame["type"], "frame_data");
        assert_eq!(frame["data"]["frame_index"], 7);

        let error: serde_json::Value = serde_json::from_str(&error_envelope("boom")).unwrap();
        assert_eq!(error["type"], "error");
        assert_eq!(error["data"], "boom");
    }
}
