//! Turns a session's event channel into a chunked response body.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use futures::stream;
use tokio::sync::mpsc;

use sage_domain::{StageEvent, wire};

/// One frame per event, written as soon as the session sends it. The body ends when the session
/// drops its sender; dropping the body drops the receiver, which the session sees as a disconnect.
pub fn event_body(events: mpsc::Receiver<StageEvent>) -> Body {
	let frames = stream::unfold(events, |mut events| async move {
		let event = events.recv().await?;

		Some((Ok::<_, Infallible>(encode_frame(&event)), events))
	});

	Body::from_stream(frames)
}

fn encode_frame(event: &StageEvent) -> Bytes {
	match wire::encode_event(event) {
		Ok(frame) => Bytes::from(frame),
		Err(err) => {
			tracing::error!(error = %err, stage = event.stage.as_str(), "Failed to encode stage event.");

			let fallback = StageEvent::failed(event.num_tokens_used, "Failed to encode stage event.");

			wire::encode_event(&fallback).map(Bytes::from).unwrap_or_default()
		},
	}
}
