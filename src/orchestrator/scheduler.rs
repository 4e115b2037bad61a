//! The background tick loop.
//!
//! One thread per running engine, woken by a `crossbeam_channel::tick`
//! ticker at a fixed cadence and selected against a control channel. A stop
//! request is only observed between ticks, so an in-flight cycle always
//! completes before the thread exits.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, tick, Receiver, Sender};
use tracing::{debug, error, info};

use super::{Engine, EngineState};
use crate::logging::DataSource;
use crate::model::SurgeError;

enum Control {
    Tick,
    /// The check interval changed; rebuild the ticker.
    Reschedule,
    Stop,
}

pub(crate) struct Scheduler {
    control: Sender<Control>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub(crate) fn spawn(engine: Arc<Engine>) -> Result<Self, SurgeError> {
        let (control, rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("surgemon-scheduler".to_string())
            .spawn(move || run(engine, rx))
            .map_err(|e| SurgeError::InvalidState(format!("cannot spawn scheduler thread: {}", e)))?;
        Ok(Self { control, handle })
    }

    pub(crate) fn reschedule(&self) {
        let _ = self.control.send(Control::Reschedule);
    }

    /// Signals the loop and waits for the current tick, if any, to finish.
    pub(crate) fn shutdown(self) {
        // Fails only when the loop already exited on its own.
        let _ = self.control.send(Control::Stop);
        if self.handle.join().is_err() {
            error!(source = %DataSource::System, "scheduler thread panicked");
        }
    }
}

fn run(engine: Arc<Engine>, control: Receiver<Control>) {
    let mut interval = engine.config.snapshot().check_interval();
    let mut ticker = tick(interval);
    info!(source = %DataSource::System, "scheduler started, interval {:?}", interval);

    loop {
        // The ticker is borrowed by the select, so it is rebuilt afterwards.
        let wake = select! {
            recv(control) -> msg => msg.unwrap_or(Control::Stop),
            recv(ticker) -> _ => Control::Tick,
        };

        match wake {
            Control::Stop => break,
            Control::Reschedule => {
                interval = engine.config.snapshot().check_interval();
                ticker = tick(interval);
                engine.schedule_next(interval);
                debug!(source = %DataSource::System, "rescheduled, interval {:?}", interval);
            }
            Control::Tick => {
                if catch_unwind(AssertUnwindSafe(|| engine.tick())).is_err() {
                    error!(source = %DataSource::System, "cycle panicked outside venue isolation");
                }
                if engine.state() == EngineState::Error {
                    error!(source = %DataSource::System, "engine entered ERROR; scheduler exiting");
                    break;
                }
                let configured: Duration = engine.config.snapshot().check_interval();
                if configured != interval {
                    interval = configured;
                    ticker = tick(interval);
                }
                engine.schedule_next(interval);
            }
        }
    }

    engine.clear_next_tick();
    info!(source = %DataSource::System, "scheduler stopped");
}
