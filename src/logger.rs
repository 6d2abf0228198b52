/// Console logging for the portal data layer.
///
/// Call once at process startup, before any component is constructed.
use log::LevelFilter;

pub fn init(level: LevelFilter) {
    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] {} {}: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply();

    // A second init (common in tests) keeps the first dispatcher.
    if result.is_err() {
        log::debug!("Logger already initialized");
    }
}
