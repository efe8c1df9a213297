#![deny(warnings)]
#![warn(unused_extern_crates)]
use tracing_forest::printer::TestCapturePrinter;
use tracing_forest::tag::NoTag;
use tracing_forest::util::*;
use tracing_forest::ForestLayer;
use tracing_subscriber::prelude::*;

pub use {tracing, tracing_forest, tracing_subscriber};

/// Start up the logging for test mode.
pub fn test_init() {
    let filter = EnvFilter::from_default_env()
        .add_directive(LevelFilter::TRACE.into())
        // hickory is extremely chatty about every query it sends.
        .add_directive(
            "hickory_proto=WARN"
                .parse()
                .expect("failed to generate log filter"),
        )
        .add_directive(
            "hickory_resolver=INFO"
                .parse()
                .expect("failed to generate log filter"),
        );

    // start the logging!
    let _ = tracing_subscriber::Registry::default()
        .with(ForestLayer::new(TestCapturePrinter::new(), NoTag).with_filter(filter))
        .try_init();
}

/// Logging for short lived command line tools. Plain formatted output to stderr, with
/// the level taken from `RUST_LOG`, or `debug` when requested.
pub fn cli_init(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .try_init();
}
