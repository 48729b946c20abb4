use anyhow::Result;
use smithay_client_toolkit::reexports::calloop::{
    timer::{TimeoutAction, Timer},
    LoopHandle, RegistrationToken,
};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// Marks a tick as in progress so a re-entrant dispatch skips instead of nesting.
/// calloop does not re-enter a source's callback on its own; a run is only
/// skipped if the callback itself dispatches the loop again.
#[derive(Clone, Default)]
pub struct TickGuard {
    busy: Rc<Cell<bool>>,
    skipped: Rc<Cell<u64>>,
}

pub struct TickRunning {
    busy: Rc<Cell<bool>>,
}

impl TickGuard {
    pub fn try_enter(&self) -> Option<TickRunning> {
        if self.busy.replace(true) {
            self.skipped.set(self.skipped.get() + 1);
            return None;
        }
        Some(TickRunning { busy: self.busy.clone() })
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.get()
    }
}

impl Drop for TickRunning {
    fn drop(&mut self) {
        self.busy.set(false);
    }
}

/// A callback run on the event loop every `interval`, measured from the end
/// of the previous run. Dropping the task cancels it.
pub struct PeriodicTask<'l, Data> {
    handle: LoopHandle<'l, Data>,
    token: Option<RegistrationToken>,
    guard: TickGuard,
}

impl<'l, Data: 'l> PeriodicTask<'l, Data> {
    pub fn start<F>(handle: &LoopHandle<'l, Data>, interval: Duration, mut callback: F) -> Result<Self>
    where
        F: FnMut(&mut Data) + 'l,
    {
        let guard = TickGuard::default();
        let tick_guard = guard.clone();
        let token = handle
            .insert_source(Timer::from_duration(interval), move |_deadline, _, data| {
                match tick_guard.try_enter() {
                    Some(_running) => callback(data),
                    None => log::debug!("Previous tick still running, skipping"),
                }
                TimeoutAction::ToDuration(interval)
            })
            .map_err(|e| anyhow::anyhow!("Failed to register timer: {}", e.error))?;

        log::debug!("Periodic task scheduled every {:?}", interval);
        Ok(Self {
            handle: handle.clone(),
            token: Some(token),
            guard,
        })
    }

    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            self.handle.remove(token);
            log::debug!("Periodic task cancelled");
        }
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.token.is_some()
    }

    pub fn skipped(&self) -> u64 {
        self.guard.skipped()
    }
}

impl<Data> Drop for PeriodicTask<'_, Data> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.handle.remove(token);
        }
    }
}
