//! Cycle driver.
//!
//! Owns every `DeviceSession` for the life of the process and runs strictly
//! sequential cycles of fan-out, composite and output. A failed cycle is
//! logged and the next one starts; nothing is retried. Shutdown stops every
//! session exactly once, whether triggered by a signal, by reaching the cycle
//! limit, or by the driver being dropped on an error path.
//!
//! Uninitialized -> AllSessionsOpened -> Running -> ShuttingDown -> Stopped

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::capture::{capture_all, error_chain};
use crate::composite::{Canvas, Compositor};
use crate::config::MosaicConfig;
use crate::device::{DeviceSession, SessionState};
use crate::error::{CycleError, SessionError};
use crate::sink::FrameSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    AllSessionsOpened,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

pub struct CycleDriver {
    sessions: Vec<DeviceSession>,
    compositor: Compositor,
    state: DriverState,
    next_cycle: u64,
}

impl CycleDriver {
    /// Open and start every configured camera, in declared order.
    ///
    /// If any camera fails, the ones already started are stopped before the
    /// error is returned, so no stream is left running.
    pub fn open_all(config: &MosaicConfig) -> Result<Self, SessionError> {
        let mut driver = Self {
            sessions: Vec::with_capacity(config.cameras.len()),
            compositor: Compositor::new(config.canvas, &config.cameras),
            state: DriverState::Uninitialized,
            next_cycle: 0,
        };
        for camera in &config.cameras {
            let mut session = DeviceSession::open(camera.clone())?;
            session.set_capture_timeout(config.run.capture_timeout);
            if let Err(err) = session.start() {
                session.stop().ok();
                return Err(err);
            }
            driver.sessions.push(session);
        }
        driver.state = DriverState::AllSessionsOpened;
        log::info!("{} cameras streaming", driver.sessions.len());
        Ok(driver)
    }

    /// Drive already-opened sessions. Sessions still `Configured` are started.
    pub fn new(sessions: Vec<DeviceSession>, compositor: Compositor) -> Result<Self, SessionError> {
        let mut driver = Self {
            sessions,
            compositor,
            state: DriverState::Uninitialized,
            next_cycle: 0,
        };
        for session in &mut driver.sessions {
            if session.state() == SessionState::Configured {
                session.start()?;
            }
        }
        driver.state = DriverState::AllSessionsOpened;
        Ok(driver)
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn sessions(&self) -> &[DeviceSession] {
        &self.sessions
    }

    /// One capture + composite pass. Nothing is produced unless every camera
    /// delivered a decodable frame.
    pub fn run_cycle(&mut self) -> Result<Canvas, CycleError> {
        let frames = capture_all(&mut self.sessions)?;
        let canvas = self.compositor.composite(&frames)?;
        Ok(canvas)
    }

    /// Run cycles until `limit` is reached or `shutdown` is raised.
    ///
    /// The flag is checked before each cycle; an in-flight cycle is allowed to
    /// finish. Failed cycles, including sink failures, are counted and skipped.
    pub fn run<S: FrameSink + ?Sized>(
        &mut self,
        limit: Option<u64>,
        shutdown: &AtomicBool,
        sink: &mut S,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        if matches!(self.state, DriverState::ShuttingDown | DriverState::Stopped) {
            return summary;
        }
        self.state = DriverState::Running;

        while limit.map_or(true, |limit| summary.attempted < limit) {
            if shutdown.load(Ordering::SeqCst) {
                log::info!("shutdown requested, leaving cycle loop");
                break;
            }
            let cycle = self.next_cycle;
            self.next_cycle += 1;
            summary.attempted += 1;

            let started = Instant::now();
            log::info!("cycle {} start", cycle);
            let canvas = match self.run_cycle() {
                Ok(canvas) => canvas,
                Err(err) => {
                    log::error!("cycle {} failed: {}", cycle, error_chain(&err));
                    summary.failed += 1;
                    continue;
                }
            };
            log::info!(
                "cycle {} writing ({} ms)",
                cycle,
                started.elapsed().as_millis()
            );
            if let Err(err) = sink.write(cycle, canvas) {
                log::error!("cycle {} output failed: {:#}", cycle, err);
                summary.failed += 1;
                continue;
            }
            summary.succeeded += 1;
            log::info!(
                "cycle {} done ({} ms)",
                cycle,
                started.elapsed().as_millis()
            );
        }

        log::info!(
            "ran {} cycles: {} succeeded, {} failed",
            summary.attempted,
            summary.succeeded,
            summary.failed
        );
        summary
    }

    /// Stop every session. Every session is attempted even if an earlier one
    /// fails; the failures are returned. Later calls do nothing.
    pub fn shutdown(&mut self) -> Vec<SessionError> {
        if self.state == DriverState::Stopped {
            return Vec::new();
        }
        self.state = DriverState::ShuttingDown;

        let mut errors = Vec::new();
        for session in &mut self.sessions {
            let stats = session.stats();
            if let Err(err) = session.stop() {
                log::warn!("{}", error_chain(&err));
                errors.push(err);
            }
            log::info!(
                "{}: {} frames captured, {} capture failures",
                stats.device,
                stats.frames_captured,
                stats.capture_failures
            );
        }
        self.state = DriverState::Stopped;
        errors
    }
}

impl Drop for CycleDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
