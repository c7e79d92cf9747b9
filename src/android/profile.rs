//! Identity of the Android application a library believes it runs inside.

use crate::Result;

/// Package name of the Coolapk client.
pub const COOLAPK_PACKAGE_NAME: &str = "com.coolapk.market";

/// `versionCode` of the Coolapk client matching the shipped `libauth.so`.
pub const COOLAPK_VERSION_CODE: i32 = 2_512_091;

/// `versionName` of the Coolapk client.
pub const COOLAPK_VERSION_NAME: &str = "15.9.1";

/// DER-encoded signing certificate of the Coolapk APK, as returned by
/// `Signature.toCharsString()`.
pub const COOLAPK_SIGNATURE_HEX: &str = concat!(
    "30820259308201c2a00302010202045044cd17300d06092a864886f70d01010505003071310b30",
    "0906035504061302434e310f300d06035504080c06e58c97e4baac310f300d06035504070c06e5",
    "8c97e4baac31143012060355040a130b436f6f6c41706b2e636f6d31143012060355040b130b43",
    "6f6f6c41706b2e636f6d311430120603550403130b436f6f6c41706b2e636f6d301e170d313230",
    "3930333135333033315a170d3430303132303135333033315a3071310b300906035504061302434e",
    "310f300d06035504080c06e58c97e4baac310f300d06035504070c06e58c97e4baac3114301206",
    "0355040a130b436f6f6c41706b2e636f6d31143012060355040b130b436f6f6c41706b2e636f6d",
    "311430120603550403130b436f6f6c41706b2e636f6d30819f300d06092a864886f70d01010105",
    "0003818d0030818902818100b1441c2288e4de72d2c7e81a3ab29e2e63ca3ad271636dfdac60eb",
    "9c0d5b4b67ed6be9d236bc49087c1c207b4bdcd1fc6150198fbdf3f882c04c8415d953508ea117",
    "cb1eaf3f06fc7f55086dc125ad477ebd7db98fd9769934915b72aaaf1276b1fcd7b5f7f779c3b2",
    "ebc4b701781f4d00810bd57ace023c7cab757314184f2d0203010001300d06092a864886f70d01",
    "010505000381810066e7f8317544e55b4b606bb00426179d0bdee1d865920abd39bf6273e369b1",
    "5a53efe96a745d0b53051805d15af7bb8d59b87d5dfc6cb1f0afeecce2d12c8c3612b9c2479188",
    "db38a8026092f71ddc1ec67c5b312ea1ff78053901bd0dcf1c2282748a657f110e7dac40575e95",
    "47c5d2383de10d618f981b419fbefddec4b240",
);

/// Package identity answered to `Context`, `PackageManager`, `PackageInfo` and
/// `Signature` queries.
///
/// The default profile is the Coolapk client whose `libauth.so` the token
/// generator targets.
///
/// # Example
///
/// ```rust
/// use droidemu::android::AppProfile;
///
/// let profile = AppProfile::default()
///     .with_version_code(2_600_000)
///     .with_version_name("16.0.0");
/// assert_eq!(profile.package_name, "com.coolapk.market");
/// assert_eq!(profile.signature_hex().len(), profile.signing_certificate.len() * 2);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppProfile {
    /// `Context.getPackageName()` and `PackageInfo.packageName`.
    pub package_name: String,
    /// `PackageInfo.versionCode`.
    pub version_code: i32,
    /// `PackageInfo.versionName`.
    pub version_name: String,
    /// DER bytes behind every `android.content.pm.Signature`.
    pub signing_certificate: Vec<u8>,
}

impl Default for AppProfile {
    fn default() -> Self {
        Self::coolapk()
    }
}

impl AppProfile {
    /// The Coolapk client profile.
    #[must_use]
    pub fn coolapk() -> Self {
        AppProfile {
            package_name: COOLAPK_PACKAGE_NAME.to_string(),
            version_code: COOLAPK_VERSION_CODE,
            version_name: COOLAPK_VERSION_NAME.to_string(),
            signing_certificate: hex::decode(COOLAPK_SIGNATURE_HEX).unwrap_or_default(),
        }
    }

    /// Sets the package name.
    #[must_use]
    pub fn with_package_name(mut self, name: impl Into<String>) -> Self {
        self.package_name = name.into();
        self
    }

    /// Sets the version code.
    #[must_use]
    pub fn with_version_code(mut self, code: i32) -> Self {
        self.version_code = code;
        self
    }

    /// Sets the version name.
    #[must_use]
    pub fn with_version_name(mut self, name: impl Into<String>) -> Self {
        self.version_name = name.into();
        self
    }

    /// Sets the signing certificate.
    #[must_use]
    pub fn with_signing_certificate(mut self, certificate: impl Into<Vec<u8>>) -> Self {
        self.signing_certificate = certificate.into();
        self
    }

    /// Sets the signing certificate from its lowercase or uppercase hex form.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `hex` is not valid hexadecimal.
    pub fn with_signature_hex(mut self, hex: &str) -> Result<Self> {
        self.signing_certificate = hex::decode(hex.trim())
            .map_err(|error| malformed_error!("invalid signature hex: {}", error))?;
        Ok(self)
    }

    /// The certificate as `Signature.toCharsString()` renders it.
    #[must_use]
    pub fn signature_hex(&self) -> String {
        hex::encode(&self.signing_certificate)
    }

    /// `Signature.hashCode()`, which is `Arrays.hashCode(byte[])` of the
    /// certificate.
    #[must_use]
    pub fn signature_hash_code(&self) -> i32 {
        java_array_hash(&self.signing_certificate)
    }
}

/// `java.util.Arrays.hashCode(byte[])`.
pub(crate) fn java_array_hash(bytes: &[u8]) -> i32 {
    bytes.iter().fold(1i32, |hash, &byte| {
        hash.wrapping_mul(31).wrapping_add(i32::from(byte as i8))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coolapk_defaults() {
        let profile = AppProfile::default();
        assert_eq!(profile.package_name, COOLAPK_PACKAGE_NAME);
        assert_eq!(profile.version_code, 2512091);
        assert_eq!(profile.version_name, "15.9.1");
        assert_eq!(profile.signing_certificate.len(), COOLAPK_SIGNATURE_HEX.len() / 2);
        assert_eq!(&profile.signing_certificate[..4], &[0x30, 0x82, 0x02, 0x59]);
        assert_eq!(profile.signature_hex(), COOLAPK_SIGNATURE_HEX);
    }

    #[test]
    fn test_certificate_length_matches_der_header() {
        let profile = AppProfile::coolapk();
        // SEQUENCE with a two-byte length of 0x0259
        assert_eq!(profile.signing_certificate.len(), 4 + 0x259);
    }

    #[test]
    fn test_signature_hex_parsing() {
        let profile = AppProfile::default().with_signature_hex("00FF10").unwrap();
        assert_eq!(profile.signing_certificate, vec![0x00, 0xFF, 0x10]);
        assert_eq!(profile.signature_hex(), "00ff10");
        assert!(AppProfile::default().with_signature_hex("xyz").is_err());
    }

    #[test]
    fn test_java_array_hash() {
        assert_eq!(java_array_hash(&[]), 1);
        assert_eq!(java_array_hash(&[1]), 32);
        // 31 * (31 + 1) + (-1)
        assert_eq!(java_array_hash(&[1, 0xFF]), 991);
    }
}
