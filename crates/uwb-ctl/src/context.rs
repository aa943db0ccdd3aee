//! System context
//!
//! Everything a command handler or an application start/stop may touch:
//! the current and default applications, the configuration blocks and
//! their store, the tx ring, the error reporter and the board. One
//! context exists per device and it is only ever used from the control
//! task; real-time tasks get clones of the shared pieces they need.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::apps::idle::IDLE_APP;
use crate::apps::tcfm::TcfmParams;
use crate::app::AppDescriptor;
use crate::config::{ConfigBlocks, ConfigStore, ControlConfig};
use crate::control::ControlHandle;
use crate::error::{CtlError, ErrorReporter, Severity};
use crate::hal::{Board, SessionParams};
use crate::registry::Registry;
use crate::task::TaskMonitor;
use crate::transport::TransportKind;
use crate::txbuf::TxRing;

/// Identification printed by `HELP`, `STAT` and `DECA$`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub project_name: String,
    pub version: String,
    pub build: String,
}

impl DeviceInfo {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            build: option_env!("UWB_CTL_BUILD").unwrap_or("dev").to_string(),
        }
    }
}

/// Listener output mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListenerMode {
    /// First six payload bytes, `+` when truncated
    #[default]
    Speed,
    /// Up to 127 payload bytes
    Data,
}

/// Arguments given to a launcher, read by the application it starts
#[derive(Debug, Clone, Default)]
pub struct StagedParams {
    pub listener_mode: ListenerMode,
    pub tcfm: TcfmParams,
    pub session: SessionParams,
}

/// Per-device control state
pub struct SystemContext {
    registry: Arc<Registry>,
    current: &'static AppDescriptor,
    pending: Option<&'static AppDescriptor>,
    store: Box<dyn ConfigStore>,
    published: Option<Arc<dyn Any + Send + Sync>>,
    tasks: Vec<TaskMonitor>,
    rx_source: Option<TransportKind>,
    pub config: ConfigBlocks,
    pub engine: ControlConfig,
    pub staged: StagedParams,
    pub device: DeviceInfo,
    pub tx: Arc<TxRing>,
    pub errors: Arc<ErrorReporter>,
    pub board: Board,
    pub control: ControlHandle,
}

impl SystemContext {
    /// Build the context and restore the stored configuration
    ///
    /// A store that cannot be read is reported and factory defaults are
    /// used instead.
    pub fn new(
        registry: Arc<Registry>,
        board: Board,
        mut store: Box<dyn ConfigStore>,
        tx: Arc<TxRing>,
        errors: Arc<ErrorReporter>,
        control: ControlHandle,
        engine: ControlConfig,
    ) -> Self {
        let config = match store.load() {
            Ok(Some(config)) => {
                debug!("configuration restored");
                config
            }
            Ok(None) => {
                info!("no stored configuration, using factory defaults");
                ConfigBlocks::default()
            }
            Err(e) => {
                errors.report(Severity::Recoverable, &e);
                ConfigBlocks::default()
            }
        };
        tx.set_uart_enabled(config.comm.uart_enabled);
        let device = DeviceInfo::new(engine.project_name.clone());

        Self {
            registry,
            current: &IDLE_APP,
            pending: None,
            store,
            published: None,
            tasks: Vec::new(),
            rx_source: None,
            config,
            engine,
            staged: StagedParams::default(),
            device,
            tx,
            errors,
            board,
            control,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Application that owns the radio right now
    pub fn current(&self) -> &'static AppDescriptor {
        self.current
    }

    pub(crate) fn set_current(&mut self, app: &'static AppDescriptor) {
        self.current = app;
        self.tx.set_block_flush(app.block_flush);
    }

    /// Ask for a switch once the current dispatch completes
    pub fn request_app(&mut self, app: &'static AppDescriptor) {
        if let Some(prev) = self.pending.replace(app) {
            debug!("switch to {} superseded by {}", prev.name, app.name);
        }
    }

    /// Ask for the idle application
    pub fn request_idle(&mut self) {
        self.request_app(&IDLE_APP);
    }

    pub fn take_pending(&mut self) -> Option<&'static AppDescriptor> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&'static AppDescriptor> {
        self.pending
    }

    /// Boot default, resolved by name; unknown names fall back to idle
    pub fn default_app(&self) -> &'static AppDescriptor {
        match self.registry.app(&self.config.default_app) {
            Some(app) => app,
            None => {
                warn!("unknown default application {:?}, using idle", self.config.default_app);
                &IDLE_APP
            }
        }
    }

    /// Persist `app` as the boot default
    pub fn set_default_app(&mut self, app: &'static AppDescriptor) -> Result<(), CtlError> {
        self.config.default_app = app.name.to_string();
        self.save_config()
    }

    pub fn save_config(&mut self) -> Result<(), CtlError> {
        self.store.save(&self.config)
    }

    /// Factory defaults for every block, not persisted until `SAVE`
    pub fn restore_defaults(&mut self) {
        self.config = ConfigBlocks::default();
        self.tx.set_uart_enabled(self.config.comm.uart_enabled);
    }

    pub fn last_error(&self) -> i32 {
        self.errors.last_code()
    }

    /// Make per-application state visible to submode commands
    pub fn publish<T: Any + Send + Sync>(&mut self, data: Arc<T>) {
        self.published = Some(data);
    }

    pub fn published<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.published
            .clone()
            .and_then(|data| data.downcast::<T>().ok())
    }

    pub fn register_task(&mut self, monitor: TaskMonitor) {
        self.tasks.push(monitor);
    }

    pub fn tasks(&self) -> &[TaskMonitor] {
        &self.tasks
    }

    /// Forget what the previous application left behind
    pub(crate) fn clear_app_state(&mut self) {
        self.published = None;
        self.tasks.clear();
    }

    /// Transport the bytes being dispatched came from
    pub fn rx_source(&self) -> Option<TransportKind> {
        self.rx_source
    }

    pub(crate) fn set_rx_source(&mut self, source: Option<TransportKind>) {
        self.rx_source = source;
    }
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("current", &self.current.name)
            .field("pending", &self.pending.map(|a| a.name))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
