use helmsman_agent::openai::OpenAiCompatibleProvider;
use helmsman_core::config::{AppConfig, LoadOptions};
use helmsman_core::{TiktokenCounter, TokenCounter};
use serde::Serialize;

use crate::commands::CommandResult;

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

/// Exits non-zero when any check did not pass.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_provider_readiness(&config));
            checks.push(check_token_counter(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped("provider_readiness"));
            checks.push(skipped("token_counter"));
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

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because configuration did not load".to_string(),
    }
}

fn check_provider_readiness(config: &AppConfig) -> DoctorCheck {
    match OpenAiCompatibleProvider::from_config(&config.llm) {
        Ok(provider) => DoctorCheck {
            name: "provider_readiness",
            status: CheckStatus::Pass,
            details: format!(
                "{} provider ready at `{}` (credentials {})",
                config.llm.provider.as_str(),
                provider.endpoint(),
                if config.llm.has_api_key() { "present" } else { "not required" }
            ),
        },
        Err(error) => DoctorCheck {
            name: "provider_readiness",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_token_counter(config: &AppConfig) -> DoctorCheck {
    match TiktokenCounter::new() {
        Ok(counter) => {
            let counter = counter.with_context_window(config.llm.context_window);
            DoctorCheck {
                name: "token_counter",
                status: CheckStatus::Pass,
                details: format!(
                    "tokenizer loaded; `{}` context window is {} tokens",
                    config.llm.model,
                    counter.max_context_window(&config.llm.model)
                ),
            }
        }
        Err(error) => DoctorCheck {
            name: "token_counter",
            status: CheckStatus::Fail,
            details: format!("{error}; turns will fall back to a character estimate"),
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
