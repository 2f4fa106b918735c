//! Logging setup. Mirrors the teacher's `utils::logging::init`: an
//! `EnvFilter` sourced from `RUST_LOG` (defaulting to `info`), with a plain
//! `fmt` layer or a `json` layer depending on `--json_logs`.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_target(false);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
