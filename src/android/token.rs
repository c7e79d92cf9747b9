//! Request signing through `AuthUtils.getToken`.

use std::{path::Path, sync::Arc};

use crate::{
    android::{handlers, handlers::CONTEXT_CLASS, AppProfile},
    emulation::{
        runtime::{DispatchTable, JavaValue},
        EmulationConfig, SessionBuilder, SessionPool, SessionState,
    },
    Error, Result,
};

/// Class that exposes the signing native.
pub const AUTH_UTILS_CLASS: &str = "com/coolapk/market/util/AuthUtils";

/// Name of the signing native.
pub const GET_TOKEN_METHOD: &str = "getToken";

/// JNI descriptor of the signing native.
pub const GET_TOKEN_DESCRIPTOR: &str =
    "(Landroid/content/Context;Ljava/lang/String;)Ljava/lang/String;";

/// Sessions kept by [`TokenGenerator::open`].
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Generates `X-App-Token` values by calling `AuthUtils.getToken` inside pooled
/// emulated sessions.
///
/// The library is loaded, linked and initialized once. Each call borrows a fork
/// of that session, so concurrent callers never share guest state.
///
/// # Example
///
/// ```rust,no_run
/// use droidemu::android::TokenGenerator;
///
/// # fn main() -> droidemu::Result<()> {
/// let generator = TokenGenerator::open("libauth.so")?;
/// let token = generator.generate_token("sxWduByOxADMuITM5ADNy4SQzEVQ")?;
/// println!("X-App-Token: {token}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TokenGenerator {
    pool: SessionPool,
    profile: Arc<AppProfile>,
}

impl TokenGenerator {
    /// Loads the library at `path` with the production configuration and the
    /// Coolapk profile.
    ///
    /// # Errors
    ///
    /// Every error of [`SessionBuilder::build`] and [`SessionPool::new`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let builder = SessionBuilder::new()
            .library_file(path.as_ref())
            .config(EmulationConfig::token());
        Self::with_builder(builder, AppProfile::default(), DEFAULT_POOL_SIZE)
    }

    /// Creates a generator from a configured [`SessionBuilder`].
    ///
    /// The builder's dispatch table is replaced by the framework handlers for
    /// `profile`.
    ///
    /// # Errors
    ///
    /// - Every error of [`SessionBuilder::build`]
    /// - [`Error::NotInitialized`] if the builder skips initialization
    /// - [`Error::Error`] for a zero `capacity`
    pub fn with_builder(builder: SessionBuilder, profile: AppProfile, capacity: usize) -> Result<Self> {
        let profile = Arc::new(profile);
        let dispatch = handlers::register(DispatchTable::builder(), Arc::clone(&profile)).build();
        let template = builder.dispatch(dispatch).build()?;
        log::debug!(
            "token generator ready: {} with {} registered natives, pool of {capacity}",
            template.name(),
            template.runtime().natives().len()
        );
        Ok(TokenGenerator {
            pool: SessionPool::new(template, capacity)?,
            profile,
        })
    }

    /// The profile answered to framework queries.
    pub fn profile(&self) -> &AppProfile {
        &self.profile
    }

    /// The session pool calls are served from.
    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Calls `getToken(context, identifier)` and returns the resulting string.
    ///
    /// # Errors
    ///
    /// - [`Error::SymbolNotFound`] if the library neither registers nor exports
    ///   `getToken`
    /// - [`Error::Fault`] or [`Error::Timeout`] if emulation fails; the session
    ///   is discarded from the pool
    /// - [`Error::Error`] if the native returns null or a non-string
    pub fn generate_token(&self, identifier: &str) -> Result<String> {
        let mut session = self.pool.acquire()?;
        let mark = session.runtime().objects().watermark();
        let (context, argument) = {
            let objects = session.runtime_mut().objects_mut();
            (objects.new_instance(CONTEXT_CLASS), objects.new_string(identifier))
        };

        let result = session.call_static_native(
            AUTH_UTILS_CLASS,
            GET_TOKEN_METHOD,
            GET_TOKEN_DESCRIPTOR,
            &[JavaValue::Object(context), JavaValue::Object(argument)],
        );
        if session.state() != SessionState::Initialized {
            return result.and(Err(Error::SessionPoisoned));
        }

        let exception = session.runtime_mut().take_pending_exception();
        let runtime = session.runtime_mut();
        let token = match result {
            Ok(JavaValue::Object(handle)) if !handle.is_null() => {
                runtime.objects().string(handle).map(str::to_string)
            }
            Ok(_) if !exception.is_null() => Err(Error::Error(format!(
                "{GET_TOKEN_METHOD} threw {}",
                runtime.describe(exception)
            ))),
            Ok(other) => Err(Error::Error(format!("{GET_TOKEN_METHOD} returned {other:?}"))),
            Err(error) => Err(error),
        };

        let released = runtime.objects_mut().release_since(mark);
        log::trace!("released {released} objects after {GET_TOKEN_METHOD}");
        if !runtime.dispatch_misses().is_empty() {
            log::debug!("{} unhandled callbacks during {GET_TOKEN_METHOD}", runtime.dispatch_misses().len());
            runtime.clear_dispatch_misses();
        }
        token
    }
}
