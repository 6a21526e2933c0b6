//! Types for global one-time configuration of the runtime parameters used by
//! RCU variables and the queue free lists.

use std::error;
use std::fmt;

use conquer_once::{OnceCell, TryInitError};

const DEFAULT_RETIRE_CACHE: usize = 16;
const DEFAULT_LOCAL_FREE_LIST: usize = 32;

/// The global one-time configuration.
///
/// It is read once by every newly created [`RcuVariable`][crate::RcuVariable]
/// and once by every thread when its local free lists are first accessed.
/// If it is never initialized, the default configuration is used.
pub static CONFIG: OnceCell<Config> = OnceCell::uninit();

/// Initializes the global [`CONFIG`].
///
/// # Errors
///
/// Fails if the configuration has already been initialized or if another
/// thread is concurrently initializing it.
#[inline]
pub fn init_config(config: Config) -> Result<(), ConfigError> {
    CONFIG.try_init_once(|| config).map_err(ConfigError::from)
}

/// Returns a copy of the global configuration or the default one.
#[inline]
pub(crate) fn current() -> Config {
    CONFIG.get().copied().unwrap_or_default()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Config
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Runtime configuration parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    retire_cache: usize,
    local_free_list: usize,
}

/********** impl Default **************************************************************************/

impl Default for Config {
    #[inline]
    fn default() -> Self {
        ConfigBuilder::new().build()
    }
}

/********** impl inherent *************************************************************************/

impl Config {
    /// Creates a new [`Config`] with the given parameters.
    ///
    /// # Panics
    ///
    /// This function panics, if `local_free_list` is 0.
    #[inline]
    pub fn with_params(retire_cache: usize, local_free_list: usize) -> Self {
        assert!(local_free_list > 0, "local free list bound must be greater than 0");
        Self { retire_cache, local_free_list }
    }

    /// Returns the initial capacity of the retire list of a newly created RCU
    /// variable.
    #[inline]
    pub fn retire_cache(&self) -> usize {
        self.retire_cache
    }

    /// Returns the maximum number of blocks each thread caches locally per
    /// free list before releasing blocks to the global free lists.
    ///
    /// The effective bound never exceeds the capacity fixed at build time
    /// (`HAZARD_RCU_LOCAL_CAPACITY`).
    #[inline]
    pub fn local_free_list(&self) -> usize {
        self.local_free_list
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ConfigBuilder
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A builder type for gradually initializing a [`Config`].
#[derive(Copy, Clone, Debug, Default)]
pub struct ConfigBuilder {
    retire_cache: Option<usize>,
    local_free_list: Option<usize>,
}

impl ConfigBuilder {
    /// Creates a new [`ConfigBuilder`] with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial capacity of the retire list of each RCU variable.
    ///
    /// If this is set to 0, retiring the first still protected value will
    /// require an allocation.
    #[inline]
    pub fn retire_cache(mut self, retire_cache: usize) -> Self {
        self.retire_cache = Some(retire_cache);
        self
    }

    /// Sets the bound of the thread local free list caches.
    #[inline]
    pub fn local_free_list(mut self, local_free_list: usize) -> Self {
        self.local_free_list = Some(local_free_list);
        self
    }

    /// Consumes the [`ConfigBuilder`] and returns an initialized [`Config`].
    ///
    /// Unspecified parameters are initialized with their default values.
    #[inline]
    pub fn build(self) -> Config {
        Config::with_params(
            self.retire_cache.unwrap_or(DEFAULT_RETIRE_CACHE),
            self.local_free_list.unwrap_or(DEFAULT_LOCAL_FREE_LIST),
        )
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// ConfigError
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Error type for initializing the global configuration.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ConfigError {
    /// The configuration has already been initialized.
    AlreadyInitialized,
    /// Another thread is currently initializing the configuration.
    Busy,
}

/********** impl From *****************************************************************************/

impl From<TryInitError> for ConfigError {
    #[inline]
    fn from(err: TryInitError) -> Self {
        match err {
            TryInitError::AlreadyInit => ConfigError::AlreadyInitialized,
            _ => ConfigError::Busy,
        }
    }
}

/********** impl Display **************************************************************************/

impl fmt::Display for ConfigError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConfigError::{AlreadyInitialized, Busy};
        match *self {
            AlreadyInitialized => write!(f, "global configuration has already been initialized"),
            Busy => write!(f, "global configuration is concurrently being initialized"),
        }
    }
}

/********** impl Error ****************************************************************************/

impl error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigBuilder, DEFAULT_LOCAL_FREE_LIST, DEFAULT_RETIRE_CACHE};

    #[test]
    fn builder_defaults() {
        let config = ConfigBuilder::new().build();
        assert_eq!(config, Config::default());
        assert_eq!(config.retire_cache(), DEFAULT_RETIRE_CACHE);
        assert_eq!(config.local_free_list(), DEFAULT_LOCAL_FREE_LIST);
    }

    #[test]
    fn builder_params() {
        let config = ConfigBuilder::new().retire_cache(0).local_free_list(4).build();
        assert_eq!(config.retire_cache(), 0);
        assert_eq!(config.local_free_list(), 4);
    }

    #[test]
    #[should_panic]
    fn zero_local_free_list() {
        let _ = Config::with_params(16, 0);
    }
}
