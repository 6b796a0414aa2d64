//! Capture fan-out.
//!
//! One scoped worker per session captures and decodes concurrently; results
//! are joined back in session order regardless of completion order. The
//! batch is all-or-nothing: any failed capture or decode fails the cycle and
//! the frames that did succeed are dropped.

use std::thread;
use std::time::Instant;

use crate::decode::{decode_frame, DecodedFrame};
use crate::device::DeviceSession;
use crate::error::CycleError;

pub fn capture_all(sessions: &mut [DeviceSession]) -> Result<Vec<DecodedFrame>, CycleError> {
    let started = Instant::now();
    let results: Vec<Result<DecodedFrame, CycleError>> = thread::scope(|scope| {
        let workers: Vec<_> = sessions
            .iter_mut()
            .enumerate()
            .map(|(index, session)| {
                let device = session.device_id().to_string();
                let handle = scope.spawn(move || capture_one(index, session));
                (index, device, handle)
            })
            .collect();

        workers
            .into_iter()
            .map(|(index, device, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(CycleError::WorkerPanicked { index, device }))
            })
            .collect()
    });

    let mut frames = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results {
        match result {
            Ok(frame) => frames.push(frame),
            Err(err) => {
                log::warn!("{}", error_chain(&err));
                first_error.get_or_insert(err);
            }
        }
    }
    if let Some(err) = first_error {
        log::debug!(
            "discarding {} captured frames after failed fan-out",
            frames.len()
        );
        return Err(err);
    }

    log::debug!(
        "captured {} frames in {} ms",
        frames.len(),
        started.elapsed().as_millis()
    );
    Ok(frames)
}

fn capture_one(index: usize, session: &mut DeviceSession) -> Result<DecodedFrame, CycleError> {
    let raw = session.capture_once().map_err(|source| CycleError::Capture {
        index,
        device: session.device_id().to_string(),
        source,
    })?;
    decode_frame(&raw).map_err(|source| CycleError::Decode {
        index,
        device: session.device_id().to_string(),
        source,
    })
}

/// `err: cause: cause` on one line.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
