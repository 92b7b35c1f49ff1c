use autostream_core::analytics::SessionStats;
use autostream_core::config::LoadOptions;
use autostream_db::{connect, migrations, SessionRepository, SqlSessionRepository};
use serde::Serialize;

use crate::commands::{async_runtime, load_config, CommandResult};

#[derive(Debug, Serialize)]
struct StatsPayload {
    command: &'static str,
    status: &'static str,
    stats: SessionStats,
}

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let config = match load_config("stats", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("stats") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let records = SqlSessionRepository::new(pool.clone())
            .list()
            .await
            .map_err(|error| ("session_log", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(SessionStats::from_records(&records))
    });

    let stats = match result {
        Ok(stats) => stats,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("stats", error_class, message, exit_code)
        }
    };

    if !json_output {
        return CommandResult { exit_code: 0, output: stats.render_report() };
    }

    let payload = StatsPayload { command: "stats", status: "ok", stats };
    match serde_json::to_string_pretty(&payload) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("stats", "serialization", error.to_string(), 7),
    }
}
