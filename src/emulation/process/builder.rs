//! Fluent construction of sessions.

use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use memmap2::Mmap;

use crate::{
    emulation::{
        process::{EmulationConfig, EmulationLimits, Session},
        runtime::{ClockSource, DispatchTable, MissPolicy, StubTable},
    },
    Error, Result,
};

/// Where the library comes from.
#[derive(Clone, Debug)]
enum LibrarySource {
    Bytes(Arc<[u8]>),
    File(PathBuf),
}

/// Builder for [`Session`].
///
/// Collects the library, the configuration and the shared tables, then opens
/// and (by default) initializes the session.
///
/// # Example
///
/// ```rust,no_run
/// use droidemu::emulation::{EmulationConfig, SessionBuilder};
///
/// # fn main() -> droidemu::Result<()> {
/// let mut session = SessionBuilder::new()
///     .library_file("libauth.so")
///     .config(EmulationConfig::token())
///     .rng_seed(42)
///     .build()?;
/// println!("{:?}", session.summary());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct SessionBuilder {
    library: Option<LibrarySource>,
    name: Option<String>,
    config: EmulationConfig,
    stubs: Option<Arc<StubTable>>,
    dispatch: Option<Arc<DispatchTable>>,
    cancel: Option<Arc<AtomicBool>>,
    initialize: bool,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            library: None,
            name: None,
            config: EmulationConfig::default(),
            stubs: None,
            dispatch: None,
            cancel: None,
            initialize: true,
        }
    }

    /// Loads the library from memory.
    #[must_use]
    pub fn library(mut self, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.library = Some(LibrarySource::Bytes(bytes.into()));
        self
    }

    /// Memory-maps the library from `path` when the session is built.
    #[must_use]
    pub fn library_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.library = Some(LibrarySource::File(path.into()));
        self
    }

    /// Names the session and its image. Defaults to the file name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: EmulationConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the execution limits.
    #[must_use]
    pub fn limits(mut self, limits: EmulationLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Sets the clock source.
    #[must_use]
    pub fn clock(mut self, clock: ClockSource) -> Self {
        self.config.clock = clock;
        self
    }

    /// Sets the RNG seed.
    #[must_use]
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.config.rng_seed = seed;
        self
    }

    /// Sets the default answer for unhandled Java callbacks.
    #[must_use]
    pub fn miss_policy(mut self, policy: MissPolicy) -> Self {
        self.config.miss_policy = policy;
        self
    }

    /// Installs the Java callback handlers.
    #[must_use]
    pub fn dispatch(mut self, table: impl Into<Arc<DispatchTable>>) -> Self {
        self.dispatch = Some(table.into());
        self
    }

    /// Replaces the host function table. Defaults to [`StubTable::standard`].
    #[must_use]
    pub fn stubs(mut self, table: impl Into<Arc<StubTable>>) -> Self {
        self.stubs = Some(table.into());
        self
    }

    /// Installs a cancellation flag checked before every instruction.
    #[must_use]
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Skips initializers and `JNI_OnLoad`; the caller runs
    /// [`Session::initialize`] later.
    #[must_use]
    pub fn without_initialize(mut self) -> Self {
        self.initialize = false;
        self
    }

    /// Opens the session and, unless disabled, initializes it.
    ///
    /// # Errors
    ///
    /// - [`Error::Error`] if no library was given
    /// - Every error of [`Session::open`] and [`Session::initialize`]
    pub fn build(&self) -> Result<Session> {
        let stubs = self
            .stubs
            .clone()
            .unwrap_or_else(|| Arc::new(StubTable::standard()));
        let dispatch = self
            .dispatch
            .clone()
            .unwrap_or_else(|| Arc::new(DispatchTable::empty()));

        let mut session = match &self.library {
            Some(LibrarySource::Bytes(bytes)) => {
                let name = self.name.as_deref().unwrap_or("library.so");
                Session::create(name, bytes, self.config.clone(), stubs, dispatch)?
            }
            Some(LibrarySource::File(path)) => {
                let file = std::fs::File::open(path)?;
                let mmap = unsafe { Mmap::map(&file) }?;
                let name = match &self.name {
                    Some(name) => name.clone(),
                    None => path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .unwrap_or("library.so")
                        .to_string(),
                };
                Session::create(&name, &mmap, self.config.clone(), stubs, dispatch)?
            }
            None => return Err(Error::Error("no library given to SessionBuilder".to_string())),
        };

        session.set_cancel_flag(self.cancel.clone());
        if self.initialize {
            session.initialize()?;
        }
        Ok(session)
    }
}
