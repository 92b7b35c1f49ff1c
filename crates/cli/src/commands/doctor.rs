use autostream_agent::retrieval::{KnowledgeSource, LazyKnowledgeRetriever};
use autostream_core::config::{AppConfig, LoadOptions};
use autostream_db::connect;
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::commands::{async_runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 3] =
    ["completion_service", "database_connectivity", "knowledge_base"];

/// Exit code is 1 when any check fails.
pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let runtime = match async_runtime("doctor") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let report = build_report(&runtime, options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(runtime: &Runtime, options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_completion_service(&config));
            checks.push(check_database_connectivity(runtime, &config));
            checks.push(check_knowledge_base(runtime, &config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_completion_service(config: &AppConfig) -> DoctorCheck {
    let base_url =
        config.llm.base_url.as_deref().unwrap_or_else(|| config.llm.provider.default_base_url());
    DoctorCheck {
        name: "completion_service",
        status: CheckStatus::Pass,
        details: format!(
            "{} model `{}` at `{base_url}` (credentials validated by config contract)",
            config.llm.provider.as_str(),
            config.llm.model
        ),
    }
}

fn check_database_connectivity(runtime: &Runtime, config: &AppConfig) -> DoctorCheck {
    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn check_knowledge_base(runtime: &Runtime, config: &AppConfig) -> DoctorCheck {
    let retriever = LazyKnowledgeRetriever::new(
        KnowledgeSource::from_path(config.retrieval.knowledge_base_path.as_deref()),
        config.retrieval.embedding_dimensions,
    );

    match runtime.block_on(retriever.index()) {
        Ok(index) => DoctorCheck {
            name: "knowledge_base",
            status: CheckStatus::Pass,
            details: format!("indexed {} documents", index.len()),
        },
        Err(error) => DoctorCheck {
            name: "knowledge_base",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
