//! Global tuning parameters that can be overridden from environment variables.
//!
//! An [`EnvParam`] pairs the name of an environment variable with a default
//! value given as a string. The parameter is parsed once, on first access, and
//! keeps that value for the rest of the process lifetime. This is meant for
//! knobs that are useful when experimenting with an algorithm but not common
//! enough to deserve a command line flag.
//!
//! ```
//! use env_param::EnvParam;
//! static WINDOW: EnvParam<u32> = EnvParam::new("MYAPP_WINDOW", "50");
//!
//! assert_eq!(WINDOW.get(), 50); // environment variable not set
//! ```

use std::str::FromStr;

pub struct EnvParam<T> {
    value: once_cell::sync::OnceCell<T>,
    env: &'static str,
    default: &'static str,
}

impl<T> EnvParam<T> {
    /// Declares a parameter read from the environment variable `env`,
    /// falling back to `default` when the variable is absent or malformed.
    pub const fn new(env: &'static str, default: &'static str) -> EnvParam<T> {
        EnvParam {
            value: once_cell::sync::OnceCell::new(),
            env,
            default,
        }
    }
}

impl<T: FromStr> EnvParam<T> {
    fn parsed_default(&self) -> T {
        match T::from_str(self.default) {
            Ok(v) => v,
            Err(_) => panic!("[env_param] {}: invalid default value \"{}\"", self.env, self.default),
        }
    }

    /// The value of the parameter, reading the environment variable on the
    /// first call. A set-but-unparsable variable falls back to the default
    /// with a warning on stderr.
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        *self.get_ref()
    }

    pub fn get_ref(&self) -> &T {
        self.value.get_or_init(|| match std::env::var(self.env) {
            Ok(raw) => match T::from_str(&raw) {
                Ok(value) => value,
                Err(_) => {
                    eprintln!(
                        "[env_param] WARNING: could not parse \"{raw}\" for {}; using default \"{}\"",
                        self.env, self.default
                    );
                    self.parsed_default()
                }
            },
            Err(_) => self.parsed_default(),
        })
    }

    /// Forces the parameter to `value`.
    ///
    /// # Panics
    /// Panics if the parameter was already initialized (set or read).
    pub fn set(&self, value: T) {
        if self.value.set(value).is_err() {
            panic!("parameter {} is already initialized", self.env);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static UNSET: EnvParam<u64> = EnvParam::new("ENV_PARAM_TEST_UNSET", "42");
    static FORCED: EnvParam<i32> = EnvParam::new("ENV_PARAM_TEST_FORCED", "0");

    #[test]
    fn default_when_unset() {
        assert_eq!(UNSET.get(), 42);
    }

    #[test]
    fn set_before_first_read() {
        FORCED.set(-7);
        assert_eq!(FORCED.get(), -7);
    }
}
