//! Core data types for timeout policies and per-test directives

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How an overrun deadline is detected and reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutMethod {
    /// Interval timer interrupt delivered into the test thread
    Signal,
    /// Background watchdog thread that dumps every stack on expiry
    Thread,
}

impl TimeoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutMethod::Signal => "signal",
            TimeoutMethod::Thread => "thread",
        }
    }
}

impl fmt::Display for TimeoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeoutMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signal" => Ok(TimeoutMethod::Signal),
            "thread" => Ok(TimeoutMethod::Thread),
            _ => Err(ConfigError::UnknownMethod {
                value: s.to_string(),
            }),
        }
    }
}

/// The effective deadline for one test. Immutable once resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    seconds: f64,
    method: TimeoutMethod,
}

impl TimeoutPolicy {
    /// Create a policy, rejecting negative or non-finite seconds
    pub fn new(seconds: f64, method: TimeoutMethod) -> Result<Self, ConfigError> {
        let seconds = check_seconds(seconds, &seconds.to_string())?;
        Ok(Self { seconds, method })
    }

    /// A policy that enforces nothing
    pub fn disabled(method: TimeoutMethod) -> Self {
        Self {
            seconds: 0.0,
            method,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn method(&self) -> TimeoutMethod {
        self.method
    }

    /// `false` when seconds is zero, meaning no timer is armed at all
    pub fn is_enforced(&self) -> bool {
        self.seconds > 0.0
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.seconds)
    }

    pub(crate) fn with_method(self, method: TimeoutMethod) -> Self {
        Self { method, ..self }
    }
}

/// One positional argument of a per-test timeout directive
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveArg {
    Number(f64),
    Text(String),
}

impl From<f64> for DirectiveArg {
    fn from(value: f64) -> Self {
        DirectiveArg::Number(value)
    }
}

impl From<i64> for DirectiveArg {
    fn from(value: i64) -> Self {
        DirectiveArg::Number(value as f64)
    }
}

impl From<&str> for DirectiveArg {
    fn from(value: &str) -> Self {
        DirectiveArg::Text(value.to_string())
    }
}

impl From<String> for DirectiveArg {
    fn from(value: String) -> Self {
        DirectiveArg::Text(value)
    }
}

impl From<TimeoutMethod> for DirectiveArg {
    fn from(value: TimeoutMethod) -> Self {
        DirectiveArg::Text(value.as_str().to_string())
    }
}

impl fmt::Display for DirectiveArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveArg::Number(n) => write!(f, "{}", n),
            DirectiveArg::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// Inline timeout specification attached to a single test: `(seconds[, method])`
///
/// The arguments are kept exactly as written so that malformed directives are
/// reported when the test is set up rather than when it is declared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directive {
    args: Vec<DirectiveArg>,
}

impl Directive {
    /// Create a directive from raw positional arguments
    pub fn new(args: Vec<DirectiveArg>) -> Self {
        Self { args }
    }

    /// A directive carrying only a seconds value
    pub fn seconds(seconds: impl Into<DirectiveArg>) -> Self {
        Self::new(vec![seconds.into()])
    }

    /// A directive carrying seconds and a method override
    pub fn with_method(seconds: impl Into<DirectiveArg>, method: impl Into<DirectiveArg>) -> Self {
        Self::new(vec![seconds.into(), method.into()])
    }

    pub fn args(&self) -> &[DirectiveArg] {
        &self.args
    }

    /// Validate the arguments into `(seconds, method override)`
    pub fn parse(&self) -> Result<(f64, Option<TimeoutMethod>), ConfigError> {
        match self.args.as_slice() {
            [] => Err(ConfigError::Arity {
                detail: "a seconds argument is required, got 0 arguments".to_string(),
            }),
            [seconds] => Ok((parse_arg_seconds(seconds)?, None)),
            [seconds, DirectiveArg::Text(method)] => {
                let seconds = parse_arg_seconds(seconds)?;
                Ok((seconds, Some(method.parse()?)))
            }
            [_, other] => Err(ConfigError::Arity {
                detail: format!("second argument must be a method name, got {}", other),
            }),
            args => Err(ConfigError::Arity {
                detail: format!("at most 2 arguments are accepted, got {}", args.len()),
            }),
        }
    }
}

fn parse_arg_seconds(arg: &DirectiveArg) -> Result<f64, ConfigError> {
    match arg {
        DirectiveArg::Number(n) => check_seconds(*n, &n.to_string()),
        DirectiveArg::Text(s) => parse_seconds(s),
    }
}

/// Parse a textual seconds value such as `"1"`, `"0.5"` or `" 2 "`
pub fn parse_seconds(value: &str) -> Result<f64, ConfigError> {
    let parsed = value.trim().parse::<f64>().map_err(|_| ConfigError::Conversion {
        value: value.to_string(),
    })?;
    check_seconds(parsed, value)
}

/// Non-negative, finite and representable as a `Duration`
fn check_seconds(seconds: f64, original: &str) -> Result<f64, ConfigError> {
    if seconds.is_finite() && seconds >= 0.0 && Duration::try_from_secs_f64(seconds).is_ok() {
        Ok(seconds)
    } else {
        Err(ConfigError::Conversion {
            value: original.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_str() {
        assert_eq!("signal".parse::<TimeoutMethod>(), Ok(TimeoutMethod::Signal));
        assert_eq!(" Thread ".parse::<TimeoutMethod>(), Ok(TimeoutMethod::Thread));
        assert!(matches!(
            "process".parse::<TimeoutMethod>(),
            Err(ConfigError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_policy_rejects_negative_and_nan() {
        assert!(TimeoutPolicy::new(-1.0, TimeoutMethod::Thread).is_err());
        assert!(TimeoutPolicy::new(f64::NAN, TimeoutMethod::Thread).is_err());
        assert!(TimeoutPolicy::new(f64::INFINITY, TimeoutMethod::Thread).is_err());
        assert!(TimeoutPolicy::new(1e20, TimeoutMethod::Thread).is_err());

        let policy = TimeoutPolicy::new(0.0, TimeoutMethod::Signal).unwrap();
        assert!(!policy.is_enforced());
    }

    #[test]
    fn test_parse_seconds_text() {
        assert_eq!(parse_seconds("1"), Ok(1.0));
        assert_eq!(parse_seconds(" 0.25 "), Ok(0.25));
        assert_eq!(
            parse_seconds("foo"),
            Err(ConfigError::Conversion {
                value: "foo".to_string()
            })
        );
    }
}
