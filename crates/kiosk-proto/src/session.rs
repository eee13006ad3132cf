//! Playback session state machine.
//!
//! `Session` holds no tasks or timers. Every transition returns an [`Effect`]
//! that the owner carries out (spawn a load, spawn a population run, arm or
//! halt the rotation timer). Results of background work come back tagged with
//! the generation they were started under; anything from an older generation
//! is dropped.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::content::Descriptor;
use crate::error::{EngineError, ErrorKind};
use crate::fetcher::LoadedDescriptor;
use crate::pipeline::{count_failed, Annotations, PopulationReport};
use crate::protocol::{CacheSummary, DaemonState, ErrorReport, PlaybackStatus, Target};
use crate::rotation::{Rotation, RotationSettings};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// Fetch the descriptor for `target` and populate the cache.
    Load { generation: u64, target: Target },
    /// Re-fetch the descriptor while keeping the current one on screen.
    Refresh { generation: u64, target: Target },
    /// Re-run population against the descriptor already held.
    Populate {
        generation: u64,
        descriptor: Arc<Descriptor>,
    },
    /// (Re)arm the rotation timer; the tick must echo `tick`.
    Arm { tick: u64, after: Duration },
    /// Cancel the rotation timer and abandon in-flight work.
    Halt,
}

#[derive(Debug)]
pub struct Session {
    settings: RotationSettings,
    require_complete_cache: bool,
    status: PlaybackStatus,
    target: Option<Target>,
    descriptor: Option<Arc<Descriptor>>,
    offline: bool,
    annotations: Annotations,
    rotation: Option<Rotation>,
    generation: u64,
    tick: u64,
    /// A population or refresh run is in flight.
    in_flight: bool,
    retry_pending: bool,
    error: Option<ErrorReport>,
}

impl Session {
    pub fn new(settings: RotationSettings, require_complete_cache: bool) -> Self {
        Self {
            settings,
            require_complete_cache,
            status: PlaybackStatus::Idle,
            target: None,
            descriptor: None,
            offline: false,
            annotations: Annotations::new(),
            rotation: None,
            generation: 0,
            tick: 0,
            in_flight: false,
            retry_pending: false,
            error: None,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn rotation(&self) -> Option<&Rotation> {
        self.rotation.as_ref()
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn error(&self) -> Option<&ErrorReport> {
        self.error.as_ref()
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        if self.status != status {
            debug!("Session: status {:?} → {:?}", self.status, status);
            self.status = status;
        }
    }

    fn clear(&mut self) {
        self.descriptor = None;
        self.offline = false;
        self.annotations.clear();
        self.rotation = None;
        self.in_flight = false;
        self.retry_pending = false;
        self.error = None;
    }

    fn fail(&mut self, kind: ErrorKind, message: String) -> Effect {
        warn!("Session: {}", message);
        let failed = count_failed(&self.annotations);
        self.error = Some(ErrorReport::new(kind, message, failed));
        self.set_status(PlaybackStatus::Error);
        Effect::Halt
    }

    fn play_from_start(&mut self) -> Effect {
        let Some(rotation) = self.rotation.as_mut() else {
            return Effect::Halt;
        };
        rotation.reset();
        let after = rotation.current_duration();
        self.error = None;
        self.set_status(PlaybackStatus::Playing);
        self.arm(after)
    }

    fn arm(&mut self, after: Duration) -> Effect {
        self.tick += 1;
        Effect::Arm {
            tick: self.tick,
            after,
        }
    }

    /// Starts a new session for `target`, abandoning whatever was running.
    pub fn select(&mut self, target: Target) -> Effect {
        self.generation += 1;
        self.clear();
        info!("Session: selected {} (generation {})", target, self.generation);
        self.target = Some(target.clone());
        self.set_status(PlaybackStatus::Loading);
        Effect::Load {
            generation: self.generation,
            target,
        }
    }

    /// First load finished: descriptor fetched and population settled.
    pub fn loaded(
        &mut self,
        generation: u64,
        loaded: LoadedDescriptor,
        report: PopulationReport,
    ) -> Effect {
        if generation != self.generation || self.status != PlaybackStatus::Loading {
            debug!("Session: dropping stale load (generation {})", generation);
            return Effect::None;
        }
        let descriptor = Arc::new(loaded.descriptor);
        self.offline = loaded.offline;
        self.annotations = report.annotations;

        let Some(rotation) = Rotation::new(Arc::clone(&descriptor), &self.settings) else {
            self.descriptor = Some(descriptor);
            return self.fail(
                ErrorKind::Association,
                EngineError::Association(self.target_label() + " has nothing to play").to_string(),
            );
        };
        self.descriptor = Some(descriptor);
        self.rotation = Some(rotation);

        if self.require_complete_cache && report.failed_count > 0 {
            return self.fail(ErrorKind::MediaFetch, not_cached_message(report.failed_count));
        }
        if report.failed_count > 0 {
            info!(
                "Session: {} item(s) not cached, playing with remote fallback",
                report.failed_count
            );
        }
        self.play_from_start()
    }

    pub fn load_failed(&mut self, generation: u64, err: &EngineError) -> Effect {
        if generation != self.generation || self.status != PlaybackStatus::Loading {
            debug!("Session: dropping stale load failure (generation {})", generation);
            return Effect::None;
        }
        self.fail(err.kind(), err.to_string())
    }

    /// Rotation timer fired.
    pub fn on_tick(&mut self, tick: u64) -> Effect {
        if tick != self.tick || self.status != PlaybackStatus::Playing {
            return Effect::None;
        }
        let Some(rotation) = self.rotation.as_mut() else {
            return Effect::None;
        };
        rotation.advance();
        let after = rotation.current_duration();
        debug!("Session: advanced to {:?}", rotation.position());
        self.arm(after)
    }

    /// Operator asked to retry after an error.
    pub fn request_retry(&mut self) -> Effect {
        if self.status != PlaybackStatus::Error {
            debug!("Session: retry ignored in {:?}", self.status);
            return Effect::None;
        }
        if self.in_flight {
            debug!("Session: retry coalesced with in-flight run");
            self.retry_pending = true;
            return Effect::None;
        }
        match (&self.descriptor, &self.target) {
            (Some(descriptor), _) if self.rotation.is_some() => {
                info!("Session: retrying cache population");
                self.in_flight = true;
                Effect::Populate {
                    generation: self.generation,
                    descriptor: Arc::clone(descriptor),
                }
            }
            (_, Some(target)) => {
                let target = target.clone();
                info!("Session: retrying load of {}", target);
                self.clear();
                self.set_status(PlaybackStatus::Loading);
                Effect::Load {
                    generation: self.generation,
                    target,
                }
            }
            (_, None) => Effect::None,
        }
    }

    /// A retry population run settled.
    pub fn population_settled(&mut self, generation: u64, report: PopulationReport) -> Effect {
        if generation != self.generation || !self.in_flight {
            debug!("Session: dropping stale population (generation {})", generation);
            return Effect::None;
        }
        self.in_flight = false;
        self.annotations.extend(report.annotations);
        let failed = count_failed(&self.annotations);

        if failed == 0 {
            self.retry_pending = false;
            return self.play_from_start();
        }

        if self.retry_pending {
            self.retry_pending = false;
            if let Some(descriptor) = &self.descriptor {
                self.in_flight = true;
                return Effect::Populate {
                    generation: self.generation,
                    descriptor: Arc::clone(descriptor),
                };
            }
        }
        self.fail(ErrorKind::MediaFetch, not_cached_message(failed))
    }

    /// Asks for a fresh copy of the current descriptor.
    pub fn refresh(&mut self) -> Effect {
        match self.status {
            PlaybackStatus::Playing if !self.in_flight => match &self.target {
                Some(target) => {
                    self.in_flight = true;
                    Effect::Refresh {
                        generation: self.generation,
                        target: target.clone(),
                    }
                }
                None => Effect::None,
            },
            PlaybackStatus::Error => self.request_retry(),
            _ => Effect::None,
        }
    }

    /// A refresh fetched a descriptor. An unchanged descriptor keeps the
    /// rotation where it is; a changed one restarts from the first item.
    pub fn refreshed(
        &mut self,
        generation: u64,
        loaded: LoadedDescriptor,
        report: PopulationReport,
    ) -> Effect {
        if generation != self.generation || !self.in_flight {
            return Effect::None;
        }
        self.in_flight = false;
        self.offline = loaded.offline;

        let unchanged = self
            .descriptor
            .as_deref()
            .is_some_and(|current| *current == loaded.descriptor);
        if unchanged {
            self.annotations.extend(report.annotations);
            return Effect::None;
        }

        info!("Session: descriptor changed, restarting rotation");
        let descriptor = Arc::new(loaded.descriptor);
        self.annotations = report.annotations;
        self.rotation = Rotation::new(Arc::clone(&descriptor), &self.settings);
        self.descriptor = Some(descriptor);
        if self.rotation.is_none() {
            return self.fail(
                ErrorKind::Association,
                EngineError::Association(self.target_label() + " has nothing to play").to_string(),
            );
        }
        let failed = count_failed(&self.annotations);
        if self.require_complete_cache && failed > 0 {
            return self.fail(ErrorKind::MediaFetch, not_cached_message(failed));
        }
        self.play_from_start()
    }

    /// A refresh failed at the descriptor level while playing.
    pub fn refresh_failed(&mut self, generation: u64, err: &EngineError) -> Effect {
        if generation != self.generation || !self.in_flight {
            return Effect::None;
        }
        self.in_flight = false;
        self.fail(err.kind(), err.to_string())
    }

    /// Operator left playback.
    pub fn exit(&mut self) -> Effect {
        self.generation += 1;
        self.clear();
        self.target = None;
        self.set_status(PlaybackStatus::Idle);
        Effect::Halt
    }

    fn target_label(&self) -> String {
        self.target
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "selection".to_string())
    }

    /// Host-facing snapshot. `rev` is left at 0 for the state manager to set.
    pub fn snapshot(&self) -> DaemonState {
        let failed = count_failed(&self.annotations);
        let rotation = self.rotation.as_ref();
        let showing = self.status == PlaybackStatus::Playing;
        DaemonState {
            rev: 0,
            status: self.status,
            target: self.target.clone(),
            descriptor: self.descriptor.as_ref().map(|d| d.summary(self.offline)),
            position: rotation.filter(|_| showing).map(|r| r.position()),
            current: rotation
                .filter(|_| showing)
                .map(|r| r.view(&self.annotations)),
            error: self.error.clone(),
            retrying: self.status == PlaybackStatus::Error && self.in_flight,
            cache: CacheSummary {
                cached: self.annotations.len() - failed,
                failed,
            },
        }
    }
}

fn not_cached_message(failed: usize) -> String {
    format!("{failed} item(s) are still not cached")
}
