use std::env;

use tracing::debug;
use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    if verbose {
        debug!("verbose logging enabled");
    }
}

const VERBOSE_VAR: &str = "TOGGLE_REPORT_VERBOSE";
const TRUTHY: [&str; 4] = ["1", "true", "yes", "on"];

/// Whether `TOGGLE_REPORT_VERBOSE` asks for debug output.
pub fn env_flag() -> bool {
    env::var(VERBOSE_VAR).is_ok_and(|value| is_truthy(&value))
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    TRUTHY.iter().any(|word| value.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_words_are_recognized() {
        for value in ["1", "true", "YES", " on ", "On\n"] {
            assert!(is_truthy(value), "{value:?}");
        }
        for value in ["0", "false", "", "maybe", "yess"] {
            assert!(!is_truthy(value), "{value:?}");
        }
    }
}
