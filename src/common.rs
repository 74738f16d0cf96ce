//! Common functions.
//!

#[cfg(all(not(test), feature = "EnvLog"))]
pub use log::{debug, error, info, warn};

#[cfg(any(test, not(feature = "EnvLog")))]
pub use std::{println as info, println as debug, println as error, println as warn};

#[cfg(feature = "EnvLog")]
use chrono::Local;
#[cfg(feature = "EnvLog")]
use std::io::Write;

pub fn init_logging() {
    #[cfg(feature = "EnvLog")]
    {
        let _ = env_logger::builder()
            .format(|buf, record| {
                let thread_name = {
                    if let Some(n) = std::thread::current().name() {
                        n.to_string()
                    } else {
                        format!("{:?}", std::thread::current().id())
                    }
                };
                writeln!(
                    buf,
                    "{} [{:8}] {:5} {}",
                    Local::now().format("%m-%d %H:%M:%S%.3f"),
                    thread_name,
                    record.level(),
                    record.args()
                )
            })
            .try_init();
    }
}

/// Get active project features.
pub fn get_features() -> Vec<&'static str> {
    vec![
        #[cfg(feature = "ExpressionEngine")]
        "ExpressionEngine",
        #[cfg(feature = "EnvLog")]
        "EnvLog",
        #[cfg(feature = "Debug")]
        "Debug",
    ]
}
