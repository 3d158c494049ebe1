use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogMode {
    /// Bunyan JSON lines on stdout.
    Json,
    Pretty,
    PrettyAnsi,
}

impl LogMode {
    /// `Json` when asked for, otherwise pretty output with colour on a terminal.
    pub fn detect(log_json: bool) -> LogMode {
        use std::io::IsTerminal;

        if log_json {
            LogMode::Json
        } else if std::io::stderr().is_terminal() {
            LogMode::PrettyAnsi
        } else {
            LogMode::Pretty
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `warn,castplay=info`.
/// Fails if a global subscriber is already set.
pub fn init(log_mode: LogMode) -> Result<()> {
    use tracing_bunyan_formatter::{
        BunyanFormattingLayer,
        JsonStorageLayer,
    };
    use tracing_subscriber::{
        EnvFilter,
        filter::LevelFilter,
        fmt,
        prelude::*,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse(std::env::var("RUST_LOG")
                   .unwrap_or(format!("warn,{crate_}=info",
                                      crate_ = env!("CARGO_CRATE_NAME"))))
        .map_err(|err| Error::Other(err.into()))?;

    tracing_subscriber::Registry::default()
        .with(match log_mode {
                  LogMode::PrettyAnsi | LogMode::Pretty => {
                      Some(fmt::Layer::new()
                               .event_format(fmt::format()
                                                 .pretty()
                                                 .with_ansi(log_mode == LogMode::PrettyAnsi)
                                                 .with_timer(fmt::time::UtcTime::<_>::
                                                                 rfc_3339())
                                                 .with_target(true)
                                                 .with_source_location(true)
                                                 .with_thread_ids(true))
                               .with_ansi(log_mode == LogMode::PrettyAnsi)
                               .with_writer(std::io::stderr))
                  },
                  LogMode::Json => None,
             })
        .with(if log_mode == LogMode::Json {
                  Some(JsonStorageLayer
                           .and_then(BunyanFormattingLayer::new(
                               env!("CARGO_CRATE_NAME").to_string(),
                               std::io::stdout)))
              } else {
                  None
              })
        // Global filter
        .with(filter)
        .try_init()
        .map_err(|err| Error::Other(err.into()))?;

    Ok(())
}
