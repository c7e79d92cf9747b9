//! The Android application a signing library expects to run inside.
//!
//! Native libraries shipped in Android apps often refuse to work unless they can
//! confirm who loaded them: they ask the `Context` for the package name, walk to
//! `PackageInfo` for the version and signing certificate, and hash what they
//! find. This module answers those questions from an [`AppProfile`] and wraps the
//! result in a [`TokenGenerator`] for Coolapk's `libauth.so`.
//!
//! # Key Components
//!
//! - [`AppProfile`] - Package name, version and signing certificate
//! - [`dispatch_table`] / [`register`] - Framework handlers built from a profile
//! - [`TokenGenerator`] - Pooled `AuthUtils.getToken` calls
//!
//! # Example
//!
//! ```rust,no_run
//! use droidemu::android::{dispatch_table, AppProfile};
//! use droidemu::emulation::{EmulationConfig, SessionBuilder};
//!
//! # fn main() -> droidemu::Result<()> {
//! let profile = AppProfile::default().with_version_code(2_600_000);
//! let session = SessionBuilder::new()
//!     .library_file("libauth.so")
//!     .config(EmulationConfig::token())
//!     .dispatch(dispatch_table(&profile))
//!     .build()?;
//! println!("{:?}", session.summary());
//! # Ok(())
//! # }
//! ```

mod handlers;
mod profile;
mod token;

pub use handlers::{
    dispatch_table, register, CONTEXT_CLASS, MESSAGE_DIGEST_CLASS, PACKAGE_INFO_CLASS,
    PACKAGE_MANAGER_CLASS, SIGNATURE_CLASS, SIGNING_INFO_CLASS,
};
pub use profile::{
    AppProfile, COOLAPK_PACKAGE_NAME, COOLAPK_SIGNATURE_HEX, COOLAPK_VERSION_CODE,
    COOLAPK_VERSION_NAME,
};
pub use token::{
    TokenGenerator, AUTH_UTILS_CLASS, DEFAULT_POOL_SIZE, GET_TOKEN_DESCRIPTOR, GET_TOKEN_METHOD,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation::{Argument, EmulationConfig, SessionBuilder},
        test::jni_scenario_image,
    };

    #[test]
    fn test_version_code_through_jni() {
        let mut session = SessionBuilder::new()
            .library(jni_scenario_image())
            .config(EmulationConfig::testing())
            .dispatch(dispatch_table(&AppProfile::default()))
            .build()
            .unwrap();
        let env = session.jni_env();
        let code = session
            .invoke("read_version_code", &[Argument::Pointer(env)])
            .unwrap();
        assert_eq!(code as u32 as i32, COOLAPK_VERSION_CODE);
    }
}
