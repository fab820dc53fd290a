//! Per-call file options
//!
//! Every recognized option is an explicit, optional field. An unset field is
//! distinct from a field set to zero or `false`, which matters for the
//! owner/group/permission fallback rules applied by
//! [`WriteOptions`](crate::io::write_options::WriteOptions).
//!
//! The struct derives serde so host applications can embed a table of
//! defaults in their own configuration files:
//!
//! ```toml
//! [file_options]
//! timeout_secs = 2.5
//! mode = 0o640
//! owner = "daemon"
//! group = 0
//! flush = true
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Default time to wait for an advisory lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Shortest lock timeout; a zero timeout is raised to this.
pub const MIN_LOCK_TIMEOUT: Duration = Duration::from_millis(1);

/// Default permission bits applied by write operations.
pub const DEFAULT_PERMISSION: u32 = 0o644;

/// A user or group, given either as a numeric id or as a name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    /// Numeric uid/gid
    Id(u32),
    /// User or group name, resolved at the time access is changed
    Name(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Id(id) => write!(f, "{id}"),
            Principal::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for Principal {
    fn from(id: u32) -> Self {
        Principal::Id(id)
    }
}

impl From<&str> for Principal {
    fn from(name: &str) -> Self {
        Principal::Name(name.to_string())
    }
}

impl From<String> for Principal {
    fn from(name: String) -> Self {
        Principal::Name(name)
    }
}

/// Names of the recognized options, used with [`FileOptions::select`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    Timeout,
    Mode,
    Perm,
    Owner,
    Group,
    Flush,
    RaiseOnMissing,
    ValueOnMissing,
    ScrubEncoding,
    Mtime,
}

/// Options accepted by the file operations
///
/// Each operation reads only the fields relevant to it; the rest are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileOptions {
    /// Maximum time to wait for a lock (default: 10 seconds)
    #[serde(
        rename = "timeout_secs",
        with = "secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    /// Permission bits; takes precedence over `perm`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    /// Permission bits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perm: Option<u32>,
    /// Owner to apply after writing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Principal>,
    /// Group to apply after writing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<Principal>,
    /// Flush and fsync before releasing the lock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush: Option<bool>,
    /// Fail when a file cannot be read (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raise_on_missing: Option<bool>,
    /// Content returned instead of failing when `raise_on_missing` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_on_missing: Option<String>,
    /// Replacement for invalid UTF-8 sequences; an empty string strips them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrub_encoding: Option<String>,
    /// Modification time applied by `touch`
    #[serde(skip)]
    pub mtime: Option<SystemTime>,
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock timeout; values below [`MIN_LOCK_TIMEOUT`] are raised to it
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(MIN_LOCK_TIMEOUT));
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn perm(mut self, perm: u32) -> Self {
        self.perm = Some(perm);
        self
    }

    pub fn owner(mut self, owner: impl Into<Principal>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn group(mut self, group: impl Into<Principal>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn flush(mut self, flush: bool) -> Self {
        self.flush = Some(flush);
        self
    }

    pub fn raise_on_missing(mut self, raise: bool) -> Self {
        self.raise_on_missing = Some(raise);
        self
    }

    pub fn value_on_missing(mut self, value: impl Into<String>) -> Self {
        self.value_on_missing = Some(value.into());
        self
    }

    pub fn scrub_encoding(mut self, replacement: impl Into<String>) -> Self {
        self.scrub_encoding = Some(replacement.into());
        self
    }

    pub fn mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Lock timeout, falling back to [`DEFAULT_LOCK_TIMEOUT`]
    pub fn lock_timeout(&self) -> Duration {
        self.timeout
            .map_or(DEFAULT_LOCK_TIMEOUT, |timeout| timeout.max(MIN_LOCK_TIMEOUT))
    }

    pub fn should_flush(&self) -> bool {
        self.flush.unwrap_or(false)
    }

    pub fn should_raise_on_missing(&self) -> bool {
        self.raise_on_missing.unwrap_or(true)
    }

    /// Copy of these options restricted to the given keys.
    ///
    /// `None` entries are ignored, so optional keys can be passed through
    /// without filtering them first.
    pub fn select<I, K>(&self, keys: I) -> FileOptions
    where
        I: IntoIterator<Item = K>,
        K: Into<Option<OptionKey>>,
    {
        let mut selected = FileOptions::default();
        for key in keys.into_iter().filter_map(Into::<Option<OptionKey>>::into) {
            match key {
                OptionKey::Timeout => selected.timeout = self.timeout,
                OptionKey::Mode => selected.mode = self.mode,
                OptionKey::Perm => selected.perm = self.perm,
                OptionKey::Owner => selected.owner = self.owner.clone(),
                OptionKey::Group => selected.group = self.group.clone(),
                OptionKey::Flush => selected.flush = self.flush,
                OptionKey::RaiseOnMissing => selected.raise_on_missing = self.raise_on_missing,
                OptionKey::ValueOnMissing => {
                    selected.value_on_missing = self.value_on_missing.clone()
                }
                OptionKey::ScrubEncoding => selected.scrub_encoding = self.scrub_encoding.clone(),
                OptionKey::Mtime => selected.mtime = self.mtime,
            }
        }
        selected
    }
}

/// Serde adapter: `Option<Duration>` as fractional seconds
mod secs {
    use super::MIN_LOCK_TIMEOUT;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<f64>::deserialize(deserializer)?;
        match secs {
            Some(s) if s.is_finite() && s >= 0.0 => {
                Ok(Some(Duration::from_secs_f64(s).max(MIN_LOCK_TIMEOUT)))
            }
            Some(s) => Err(serde::de::Error::custom(format!(
                "timeout_secs must be a non-negative number, got {s}"
            ))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = FileOptions::default();
        assert_eq!(opts.lock_timeout(), Duration::from_secs(10));
        assert!(!opts.should_flush());
        assert!(opts.should_raise_on_missing());
        assert!(opts.owner.is_none());
    }

    #[test]
    fn test_explicit_false_is_not_absent() {
        let opts = FileOptions::new().flush(false).raise_on_missing(false);
        assert_eq!(opts.flush, Some(false));
        assert!(!opts.should_raise_on_missing());
    }

    #[test]
    fn test_select_empty() {
        let opts = FileOptions::new().mode(0o600).flush(true);
        assert_eq!(opts.select(Vec::<OptionKey>::new()), FileOptions::default());
    }

    #[test]
    fn test_select_subset() {
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let opts = FileOptions::new().mode(0o600).owner("nobody").mtime(mtime);

        let selected = opts.select([OptionKey::Mtime]);
        assert_eq!(selected.mtime, Some(mtime));
        assert!(selected.mode.is_none());
        assert!(selected.owner.is_none());

        let selected = opts.select([OptionKey::Mode, OptionKey::Owner]);
        assert_eq!(selected.mode, Some(0o600));
        assert_eq!(selected.owner, Some(Principal::Name("nobody".to_string())));
        assert!(selected.mtime.is_none());
    }

    #[test]
    fn test_select_ignores_none_entries() {
        let opts = FileOptions::new().mode(0o600).perm(0o640).flush(true);
        let selected = opts.select([Some(OptionKey::Mode), None, Some(OptionKey::Flush)]);
        assert_eq!(selected.mode, Some(0o600));
        assert_eq!(selected.flush, Some(true));
        assert!(selected.perm.is_none());
    }

    #[test]
    fn test_principal_conversions() {
        assert_eq!(Principal::from(65534), Principal::Id(65534));
        assert_eq!(Principal::from("nobody"), Principal::Name("nobody".into()));
        assert_eq!(Principal::Id(0).to_string(), "0");
        assert_eq!(Principal::from("wheel".to_string()).to_string(), "wheel");
    }

    #[test]
    fn test_deserialize_from_json() {
        let opts: FileOptions = serde_json::from_str(
            r#"{"timeout_secs": 1.5, "perm": 416, "owner": "nobody", "group": 65534}"#,
        )
        .unwrap();
        assert_eq!(opts.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(opts.perm, Some(0o640));
        assert_eq!(opts.owner, Some(Principal::Name("nobody".into())));
        assert_eq!(opts.group, Some(Principal::Id(65534)));
        assert!(opts.mode.is_none());
    }

    #[test]
    fn test_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct HostConfig {
            file_options: FileOptions,
        }

        let cfg: HostConfig = toml::from_str(
            r#"
            [file_options]
            timeout_secs = 3
            mode = 0o600
            flush = true
            scrub_encoding = "?"
            "#,
        )
        .unwrap();
        let opts = cfg.file_options;
        assert_eq!(opts.lock_timeout(), Duration::from_secs(3));
        assert_eq!(opts.mode, Some(0o600));
        assert!(opts.should_flush());
        assert_eq!(opts.scrub_encoding.as_deref(), Some("?"));
    }

    #[test]
    fn test_deserialize_rejects_bad_timeout() {
        let result: Result<FileOptions, _> = serde_json::from_str(r#"{"timeout_secs": -2}"#);
        assert!(result.is_err());
        let result: Result<FileOptions, _> = serde_json::from_str(r#"{"timeout_secs": "soon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeout_is_clamped_everywhere() {
        let built = FileOptions::new().timeout(Duration::ZERO);
        assert_eq!(built.timeout, Some(MIN_LOCK_TIMEOUT));

        let parsed: FileOptions = serde_json::from_str(r#"{"timeout_secs": 0}"#).unwrap();
        assert_eq!(parsed.timeout, Some(MIN_LOCK_TIMEOUT));
        assert_eq!(parsed, built);

        let literal = FileOptions {
            timeout: Some(Duration::ZERO),
            ..FileOptions::default()
        };
        assert_eq!(literal.lock_timeout(), MIN_LOCK_TIMEOUT);

        let tiny = FileOptions::new().timeout(Duration::from_micros(10));
        assert_eq!(tiny.lock_timeout(), MIN_LOCK_TIMEOUT);
    }

    #[test]
    fn test_deserialize_rejects_unknown_keys() {
        let result: Result<FileOptions, _> = serde_json::from_str(r#"{"permissions": 420}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_skips_unset() {
        let json = serde_json::to_string(&FileOptions::new().mode(0o600)).unwrap();
        assert_eq!(json, r#"{"mode":384}"#);
    }
}
