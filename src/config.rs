use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Port the manager listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 12345;

/// Timing and buffer settings shared by every connection.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Size of a single socket read.
    pub read_buffer_size: usize,
    /// A payload transfer ends once the stream stays silent this long.
    pub transfer_idle_timeout_ms: u64,
    /// How long a node waits for the first payload byte after asking for it.
    pub transfer_start_timeout_ms: u64,
    /// Upper bound for waiting on a connection's loops during shutdown.
    pub join_timeout_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            transfer_idle_timeout_ms: 250,
            transfer_start_timeout_ms: 30_000,
            join_timeout_ms: 2_000,
        }
    }
}

impl ProtocolConfig {
    pub fn transfer_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_idle_timeout_ms)
    }

    pub fn transfer_start_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_start_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub listen_addr: SocketAddr,
    /// Base directory for payload paths submitted as relative paths.
    pub directory: PathBuf,
    /// Pause between scheduler passes when the head job cannot be placed.
    pub dispatch_interval_ms: u64,
    pub max_jobs: usize,
    pub protocol: ProtocolConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            directory: PathBuf::from("."),
            dispatch_interval_ms: 500,
            max_jobs: 10_000,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_dispatch_interval_ms(mut self, interval_ms: u64) -> Self {
        self.dispatch_interval_ms = interval_ms;
        self
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }
}

/// How a node launches the work loader for a section.
///
/// The child is started as `<program> <args...> <payload> <jobId,sectionId,total> <user args...>`
/// and must print a result envelope on stdout.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let program = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("cluster-lite"));
        Self {
            program,
            args: vec!["load".to_string()],
        }
    }
}

impl LoaderConfig {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub manager_addr: SocketAddr,
    /// Where received payloads are written and where the loader runs.
    pub work_dir: PathBuf,
    pub loader: LoaderConfig,
    pub protocol: ProtocolConfig,
}

impl WorkerConfig {
    pub fn new(manager_addr: SocketAddr) -> Self {
        Self {
            manager_addr,
            work_dir: PathBuf::from("."),
            loader: LoaderConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_loader(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SubmitConfig {
    pub manager_addr: SocketAddr,
    pub directory: PathBuf,
    pub protocol: ProtocolConfig,
}

impl SubmitConfig {
    pub fn new(manager_addr: SocketAddr) -> Self {
        Self {
            manager_addr,
            directory: PathBuf::from("."),
            protocol: ProtocolConfig::default(),
        }
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }
}
