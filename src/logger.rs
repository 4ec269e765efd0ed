//! File logging of `tracing` events, one file per process.

use std::fs::File;

use anyhow::Context;
use time::{
    format_description::{self, parse},
    OffsetDateTime,
};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

/// Sends every trace of this process to `<date>_<role>_<pid>_log.txt` in the working
/// directory. `role` tells the coordinator and the agents apart.
pub fn init_logger(role: &str) -> anyhow::Result<()> {
    let file_name = get_log_file_name(role)?;
    let file = File::create(&file_name).with_context(|| format!("could not create {file_name}"))?;
    let writer = BoxMakeWriter::new(file);
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")?,
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber).context(
        "Could not set global default tracing subscriber. Consider disabling logs if you are already setting a subscriber.",
    )
}

fn get_log_file_name(role: &str) -> anyhow::Result<String> {
    let format = parse("[year]-[month]-[day]_[hour]:[minute]:[second]")?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    Ok(format!(
        "{}_{role}_{}_log.txt",
        now.format(&format)?,
        std::process::id()
    ))
}
