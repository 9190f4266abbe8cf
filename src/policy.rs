//! Layered timeout configuration
//!
//! A [`PolicyResolver`] holds every configuration layer the host framework
//! supplies and turns them, together with an optional per-test [`Directive`],
//! into one [`TimeoutPolicy`]. Precedence from most to least specific:
//! directive, command line, project-wide settings, environment, built-in default
//! (no timeout). A layer only takes part when it actually specifies a value, so
//! an explicit command-line `0` disables a project-wide timeout but still yields
//! to a directive on the test itself.

use crate::error::{ConfigError, Result, TimeoutError};
use crate::timer;
use crate::types::{parse_seconds, Directive, TimeoutMethod, TimeoutPolicy};
use std::env;

/// Key naming the timeout in seconds
pub const TIMEOUT_KEY: &str = "timeout";
/// Key naming the timeout method
pub const METHOD_KEY: &str = "timeout_method";
/// Environment variable for the timeout in seconds
pub const TIMEOUT_ENV: &str = "TEST_TIMEOUT";
/// Environment variable for the timeout method
pub const METHOD_ENV: &str = "TEST_TIMEOUT_METHOD";

/// One configuration layer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeoutSettings {
    pub timeout: Option<f64>,
    pub method: Option<TimeoutMethod>,
}

impl TimeoutSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_method(mut self, method: TimeoutMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Build a layer from already-extracted key/value pairs.
    ///
    /// Keys other than `timeout` and `timeout_method` belong to other consumers
    /// of the same configuration source and are skipped.
    pub fn from_pairs<I, K, V>(pairs: I) -> std::result::Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref().trim(), value.as_ref());
            match key {
                TIMEOUT_KEY => settings.timeout = Some(parse_seconds(value)?),
                METHOD_KEY => settings.method = Some(value.parse()?),
                other => log::debug!("Ignoring unrelated configuration key {:?}", other),
            }
        }
        Ok(settings)
    }

    /// Build a layer from `TEST_TIMEOUT` and `TEST_TIMEOUT_METHOD`
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let pairs = [(TIMEOUT_KEY, TIMEOUT_ENV), (METHOD_KEY, METHOD_ENV)]
            .into_iter()
            .filter_map(|(key, var)| env::var(var).ok().map(|value| (key, value)));
        Self::from_pairs(pairs)
    }

    pub fn is_empty(&self) -> bool {
        self.timeout.is_none() && self.method.is_none()
    }
}

/// Merges every configuration source into one policy per test
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    environment: TimeoutSettings,
    project: TimeoutSettings,
    command_line: TimeoutSettings,
    fallback_to_thread: bool,
    signal_supported: bool,
}

impl Default for PolicyResolver {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PolicyResolver {
    pub fn builder() -> PolicyResolverBuilder {
        PolicyResolverBuilder::new()
    }

    /// The method used when no layer names one
    pub fn default_method(&self) -> TimeoutMethod {
        if self.signal_supported {
            TimeoutMethod::Signal
        } else {
            TimeoutMethod::Thread
        }
    }

    /// Resolve the effective policy for one test
    pub fn resolve(&self, directive: Option<&Directive>) -> Result<TimeoutPolicy> {
        let (directive_seconds, directive_method) = match directive {
            Some(directive) => {
                let (seconds, method) = directive.parse()?;
                (Some(seconds), method)
            }
            None => (None, None),
        };

        let layers = [&self.command_line, &self.project, &self.environment];
        let seconds = directive_seconds
            .or_else(|| layers.iter().find_map(|layer| layer.timeout))
            .unwrap_or(0.0);
        let method = directive_method
            .or_else(|| layers.iter().find_map(|layer| layer.method))
            .unwrap_or_else(|| self.default_method());

        let policy = TimeoutPolicy::new(seconds, method)?;
        let policy = self.check_available(policy)?;
        log::debug!(
            "Resolved timeout policy: {}s via {} (directive: {})",
            policy.seconds(),
            policy.method(),
            directive.is_some()
        );
        Ok(policy)
    }

    fn check_available(&self, policy: TimeoutPolicy) -> Result<TimeoutPolicy> {
        if policy.method() != TimeoutMethod::Signal || self.signal_supported {
            return Ok(policy);
        }
        if self.fallback_to_thread {
            log::warn!("Signal timeouts are not supported on this host, using the thread method");
            Ok(policy.with_method(TimeoutMethod::Thread))
        } else {
            Err(TimeoutError::StrategyUnavailable(
                "signal method requires interval timer interrupts (SIGALRM)".to_string(),
            ))
        }
    }
}

/// Builder for [`PolicyResolver`]
#[derive(Debug, Clone)]
pub struct PolicyResolverBuilder {
    resolver: PolicyResolver,
}

impl PolicyResolverBuilder {
    pub fn new() -> Self {
        Self {
            resolver: PolicyResolver {
                environment: TimeoutSettings::default(),
                project: TimeoutSettings::default(),
                command_line: TimeoutSettings::default(),
                fallback_to_thread: true,
                signal_supported: timer::signal_available(),
            },
        }
    }

    pub fn environment(mut self, settings: TimeoutSettings) -> Self {
        self.resolver.environment = settings;
        self
    }

    pub fn project(mut self, settings: TimeoutSettings) -> Self {
        self.resolver.project = settings;
        self
    }

    pub fn command_line(mut self, settings: TimeoutSettings) -> Self {
        self.resolver.command_line = settings;
        self
    }

    /// Whether an unavailable signal method degrades to the thread method
    /// instead of failing the test setup
    pub fn fallback_to_thread(mut self, fallback: bool) -> Self {
        self.resolver.fallback_to_thread = fallback;
        self
    }

    /// Override the signal capability probe
    pub fn signal_supported(mut self, supported: bool) -> Self {
        self.resolver.signal_supported = supported;
        self
    }

    pub fn build(self) -> PolicyResolver {
        self.resolver
    }
}

impl Default for PolicyResolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
