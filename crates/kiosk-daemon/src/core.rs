use std::sync::Arc;

use kiosk_proto::cache::MediaCache;
use kiosk_proto::config::Config;
use kiosk_proto::error::EngineError;
use kiosk_proto::fetcher::{ApiClient, LoadedDescriptor};
use kiosk_proto::pipeline::{populate, PopulationOptions, PopulationReport};
use kiosk_proto::protocol::{Command, Target};
use kiosk_proto::rotation::RotationSettings;
use kiosk_proto::session::{Effect, Session};
use kiosk_proto::state::StateManager;
use kiosk_proto::timer::RotationTimer;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything that can change the session funnels through this enum.
#[derive(Debug)]
pub enum DaemonEvent {
    ClientCommand(Command),
    DescriptorLoaded {
        generation: u64,
        refresh: bool,
        loaded: LoadedDescriptor,
        report: PopulationReport,
    },
    DescriptorFailed {
        generation: u64,
        refresh: bool,
        error: EngineError,
    },
    PopulationSettled {
        generation: u64,
        report: PopulationReport,
    },
    RotationTick(u64),
    RefreshTick,
    Shutdown,
}

/// Single owner of the playback session. Background work (descriptor loads,
/// population runs) reports back through the event channel.
pub struct DaemonCore {
    config: Config,
    session: Session,
    state_manager: Arc<StateManager>,
    cache: MediaCache,
    client: ApiClient,
    options: PopulationOptions,
    event_tx: mpsc::Sender<DaemonEvent>,
    timer: RotationTimer,
    work: Option<JoinHandle<()>>,
    refresher: Option<JoinHandle<()>>,
}

impl DaemonCore {
    pub async fn new(config: Config, event_tx: mpsc::Sender<DaemonEvent>) -> anyhow::Result<Self> {
        let cache = MediaCache::open(&config.cache.dir, &config.cache.namespace).await?;
        info!(
            "DaemonCore: media cache at {} ({} entries)",
            cache.dir().display(),
            cache.entries().await?.len()
        );

        let token = config.api.resolved_token()?;
        if token.is_empty() {
            warn!("DaemonCore: no API token configured");
        }
        let client = ApiClient::new(config.api.origin.clone(), token)?.with_timeouts(
            config.fetch.descriptor_timeout(),
            config.fetch.media_timeout(),
        );

        let options = PopulationOptions {
            concurrency: config.fetch.concurrency.max(1),
            media_timeout: config.fetch.media_timeout(),
        };
        let session = Session::new(
            RotationSettings::from(&config.playback),
            config.playback.require_complete_cache,
        );
        let state_manager = Arc::new(StateManager::new(config.daemon.state_file.clone()));

        Ok(Self {
            config,
            session,
            state_manager,
            cache,
            client,
            options,
            event_tx,
            timer: RotationTimer::new(),
            work: None,
            refresher: None,
        })
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub fn cache(&self) -> MediaCache {
        self.cache.clone()
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        if let Some(every) = self.config.playback.refresh_interval() {
            info!("DaemonCore: refreshing descriptor every {:?}", every);
            let tx = self.event_tx.clone();
            self.refresher = Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if tx.send(DaemonEvent::RefreshTick).await.is_err() {
                        break;
                    }
                }
            }));
        }

        self.publish().await;
        while let Some(evt) = event_rx.recv().await {
            let prev = self.session.status();
            let effect = match evt {
                DaemonEvent::ClientCommand(cmd) => self.handle_command(cmd),
                DaemonEvent::DescriptorLoaded {
                    generation,
                    refresh: false,
                    loaded,
                    report,
                } => self.session.loaded(generation, loaded, report),
                DaemonEvent::DescriptorLoaded {
                    generation,
                    refresh: true,
                    loaded,
                    report,
                } => self.session.refreshed(generation, loaded, report),
                DaemonEvent::DescriptorFailed {
                    generation,
                    refresh: false,
                    error,
                } => self.session.load_failed(generation, &error),
                DaemonEvent::DescriptorFailed {
                    generation,
                    refresh: true,
                    error,
                } => self.session.refresh_failed(generation, &error),
                DaemonEvent::PopulationSettled { generation, report } => {
                    self.session.population_settled(generation, report)
                }
                DaemonEvent::RotationTick(tick) => self.session.on_tick(tick),
                DaemonEvent::RefreshTick => self.session.refresh(),
                DaemonEvent::Shutdown => {
                    info!("DaemonCore: shutting down");
                    self.halt();
                    if let Some(refresher) = self.refresher.take() {
                        refresher.abort();
                    }
                    break;
                }
            };
            self.apply(effect);

            let status = self.session.status();
            if status != prev {
                info!("DaemonCore: status {:?} → {:?}", prev, status);
            }
            self.publish().await;
        }
        Ok(())
    }

    fn handle_command(&mut self, cmd: Command) -> Effect {
        debug!("DaemonCore: command {:?}", cmd);
        match cmd {
            Command::Select { target } => self.session.select(target),
            Command::Retry => self.session.request_retry(),
            Command::Exit => self.session.exit(),
            Command::Refresh => self.session.refresh(),
            Command::GetState => Effect::None,
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::Load { generation, target } => {
                self.halt();
                self.spawn_load(generation, target, false);
            }
            Effect::Refresh { generation, target } => self.spawn_load(generation, target, true),
            Effect::Populate {
                generation,
                descriptor,
            } => {
                let cache = self.cache.clone();
                let client = self.client.clone();
                let options = self.options.clone();
                let tx = self.event_tx.clone();
                self.replace_work(tokio::spawn(async move {
                    let report = populate(&descriptor, &cache, &client, &options).await;
                    let _ = tx
                        .send(DaemonEvent::PopulationSettled { generation, report })
                        .await;
                }));
            }
            Effect::Arm { tick, after } => {
                self.timer
                    .arm(after, self.event_tx.clone(), DaemonEvent::RotationTick(tick));
            }
            Effect::Halt => self.halt(),
        }
    }

    fn spawn_load(&mut self, generation: u64, target: Target, refresh: bool) {
        let cache = self.cache.clone();
        let client = self.client.clone();
        let options = self.options.clone();
        let fallback = self.config.cache.offline_descriptor_fallback;
        let tx = self.event_tx.clone();
        self.replace_work(tokio::spawn(async move {
            let evt = match client.load(&target, &cache, fallback).await {
                Ok(loaded) => {
                    let report = populate(&loaded.descriptor, &cache, &client, &options).await;
                    DaemonEvent::DescriptorLoaded {
                        generation,
                        refresh,
                        loaded,
                        report,
                    }
                }
                Err(error) => {
                    warn!("DaemonCore: loading {} failed: {}", target, error);
                    DaemonEvent::DescriptorFailed {
                        generation,
                        refresh,
                        error,
                    }
                }
            };
            let _ = tx.send(evt).await;
        }));
    }

    fn replace_work(&mut self, handle: JoinHandle<()>) {
        if let Some(prev) = self.work.replace(handle) {
            prev.abort();
        }
    }

    /// Stops the rotation timer and abandons any in-flight load or population.
    fn halt(&mut self) {
        self.timer.cancel();
        if let Some(work) = self.work.take() {
            work.abort();
        }
    }

    async fn publish(&self) {
        if let Err(e) = self.state_manager.publish(self.session.snapshot()).await {
            warn!("DaemonCore: failed to persist state: {}", e);
        }
    }
}
