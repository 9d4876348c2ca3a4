use std::{io::Write, sync::Once};

use env_logger::Builder;

static INIT: Once = Once::new();

/// Install the global logger. Safe to call from every test; only the
/// first call wins.
pub fn init_log() {
    INIT.call_once(|| {
        let mut builder = Builder::from_default_env();

        builder
            .format_timestamp_secs()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .init();
    });
}
