use std::path::PathBuf;
use std::process::exit;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use warden_hooks::payload::project_dir;
use warden_hooks::read_stdin_payload;
use warden_snapshot::Trigger;
use warden_validators::retry::RetryMode;
use warden_validators::Gate;

#[derive(Parser, Debug)]
#[command(name = "warden", version)]
#[command(about = "Context preservation and quality-gate enforcement hooks for AI coding sessions")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GateArg {
    Verification,
    Pacs,
    Review,
}

impl From<GateArg> for Gate {
    fn from(value: GateArg) -> Self {
        match value {
            GateArg::Verification => Gate::Verification,
            GateArg::Pacs => Gate::Pacs,
            GateArg::Review => Gate::Review,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TriggerArg {
    Stop,
    Precompact,
    Sessionend,
    Threshold,
}

impl From<TriggerArg> for Trigger {
    fn from(value: TriggerArg) -> Self {
        match value {
            TriggerArg::Stop => Trigger::Stop,
            TriggerArg::Precompact => Trigger::PreCompact,
            TriggerArg::Sessionend => Trigger::SessionEnd,
            TriggerArg::Threshold => Trigger::Threshold,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PacsTypeArg {
    General,
    Translation,
    Review,
}

impl PacsTypeArg {
    fn as_str(self) -> &'static str {
        match self {
            PacsTypeArg::General => "general",
            PacsTypeArg::Translation => "translation",
            PacsTypeArg::Review => "review",
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// PreToolUse guard: block destructive shell commands (exit 2 on match).
    GuardCommands,
    /// PreToolUse guard: block test-file edits while .tdd-guard exists.
    GuardTests,
    /// PreToolUse guard: warn about historically error-prone files.
    GuardRisk,
    /// PostToolUse hook: work-log entry + threshold save.
    PostTool,
    /// Stop hook: incremental snapshot + safety nets.
    Stop,
    /// Full save (precompact / sessionend / threshold).
    Save {
        #[arg(long, value_enum)]
        trigger: TriggerArg,
    },
    /// SessionStart hook: RLM pointer restore + risk cache refresh.
    Restore,
    /// Setup: infrastructure health validation.
    SetupInit {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Setup: periodic maintenance report (never deletes).
    SetupMaintenance {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Retry-budget validation (RB1-RB3).
    ValidateRetryBudget {
        #[arg(long)]
        step: u32,
        #[arg(long, value_enum)]
        gate: GateArg,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Atomic: check budget, increment if allowed (RECOMMENDED).
        #[arg(long, conflicts_with = "increment")]
        check_and_increment: bool,
        /// Unconditional increment (legacy).
        #[arg(long)]
        increment: bool,
    },
    /// Review-report validation (R1-R5) plus verdict and pACS delta.
    ValidateReview {
        #[arg(long)]
        step: u32,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Also validate the review→translation sequence.
        #[arg(long)]
        check_sequence: bool,
    },
    /// pACS log validation (PA1-PA7).
    ValidatePacs {
        #[arg(long)]
        step: u32,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        #[arg(long = "type", value_enum, default_value = "general")]
        pacs_type: PacsTypeArg,
        /// Also validate the step output (L0 anti-skip guard).
        #[arg(long)]
        check_l0: bool,
    },
    /// Translation validation (T1-T9).
    ValidateTranslation {
        #[arg(long)]
        step: u32,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Also validate the review→translation sequence.
        #[arg(long)]
        check_sequence: bool,
        /// Also validate translation pACS arithmetic (T9).
        #[arg(long)]
        check_pacs: bool,
    },
    /// Verification-log validation (V1a-V1c).
    ValidateVerification {
        #[arg(long)]
        step: u32,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Also validate step pACS arithmetic (T9).
        #[arg(long)]
        check_pacs: bool,
    },
    /// Cross-step traceability validation (CT1-CT5).
    ValidateTraceability {
        #[arg(long)]
        step: u32,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Domain-knowledge structure validation (DK1-DK7).
    ValidateDomainKnowledge {
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Cross-check DKS markers in the step output.
        #[arg(long)]
        check_output: bool,
        #[arg(long)]
        step: Option<u32>,
    },
    /// Generated workflow.md DNA validation (W1-W8).
    ValidateWorkflow {
        #[arg(long)]
        workflow_path: PathBuf,
    },
    /// Diagnosis-log post-validation (AD1-AD10).
    ValidateDiagnosis {
        #[arg(long)]
        step: u32,
        #[arg(long, value_enum)]
        gate: GateArg,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Diagnosis pre-analysis: deterministic evidence bundle for a failed
    /// gate. Read-only.
    Diagnose {
        #[arg(long)]
        step: u32,
        #[arg(long, value_enum)]
        gate: GateArg,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => exit(code),
        Err(err) => {
            // Validator fatal path: structured error, exit 1.
            let envelope = json!({
                "valid": false,
                "error": err.to_string(),
                "warnings": [format!("Fatal error: {err}")],
            });
            println!("{}", serde_json::to_string_pretty(&envelope).unwrap_or_default());
            exit(1);
        }
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// `CLAUDE_PROJECT_DIR` overrides an unspecified (default `.`) project dir,
/// for validators just like for hooks.
fn resolve_project_dir(arg: PathBuf) -> PathBuf {
    if arg == PathBuf::from(".") {
        if let Ok(env_dir) = std::env::var("CLAUDE_PROJECT_DIR") {
            if !env_dir.is_empty() && PathBuf::from(&env_dir).is_dir() {
                return PathBuf::from(env_dir);
            }
        }
    }
    arg
}

fn run(cli: Cli) -> Result<i32> {
    match cli.cmd {
        // Hooks never fail the session: a missing/garbled envelope is a
        // silent no-op, and only guards may return exit 2.
        Commands::GuardCommands => Ok(read_stdin_payload()
            .map(|p| warden_hooks::guards::run_command_guard(&p))
            .unwrap_or(0)),
        Commands::GuardTests => Ok(read_stdin_payload()
            .map(|p| warden_hooks::guards::run_test_file_guard(&p))
            .unwrap_or(0)),
        Commands::GuardRisk => Ok(read_stdin_payload()
            .map(|p| warden_hooks::guards::run_predictive_guard(&p))
            .unwrap_or(0)),
        Commands::PostTool => Ok(read_stdin_payload()
            .map(|p| warden_hooks::worklog::run_post_tool(&p))
            .unwrap_or(0)),
        Commands::Stop => Ok(read_stdin_payload()
            .map(|p| warden_hooks::stop::run_stop(&p))
            .unwrap_or(0)),
        Commands::Save { trigger } => {
            if let Some(payload) = read_stdin_payload() {
                let root = project_dir(&payload);
                match warden_hooks::save::run_save(&root, &payload, trigger.into()) {
                    Ok(Some(path)) => println!("Context saved: {}", path.display()),
                    Ok(None) => {}
                    Err(err) => eprintln!("save_context error: {err}"),
                }
            }
            Ok(0)
        }
        Commands::Restore => Ok(read_stdin_payload()
            .map(|p| warden_hooks::restore::run_restore(&p))
            .unwrap_or(0)),
        Commands::SetupInit { project_dir } => {
            let project_dir = resolve_project_dir(project_dir);
            for line in warden_hooks::setup::run_setup_init(&project_dir) {
                println!("{line}");
            }
            Ok(0)
        }
        Commands::SetupMaintenance { project_dir } => {
            let project_dir = resolve_project_dir(project_dir);
            for line in warden_hooks::setup::run_setup_maintenance(&project_dir) {
                println!("{line}");
            }
            Ok(0)
        }

        Commands::ValidateRetryBudget {
            step,
            gate,
            project_dir,
            check_and_increment,
            increment,
        } => {
            let project_dir = resolve_project_dir(project_dir);
            let mode = if check_and_increment {
                RetryMode::CheckAndIncrement
            } else if increment {
                RetryMode::Increment
            } else {
                RetryMode::Check
            };
            let output = warden_validators::retry::run(&project_dir, step, gate.into(), mode);
            print_json(&serde_json::to_value(&output)?);
            Ok(0)
        }

        Commands::ValidateReview {
            step,
            project_dir,
            check_sequence,
        } => {
            let project_dir = resolve_project_dir(project_dir);
            let (mut valid, verdict, issues_count, mut warnings) =
                warden_validators::review::validate_review_output(&project_dir, step);
            let details = warden_validators::review::parse_review_verdict(
                &warden_validators::review::review_path(&project_dir, step),
            );
            let delta = warden_validators::review::calculate_pacs_delta(&project_dir, step);

            let mut output = json!({
                "valid": valid,
                "step": step,
                "verdict": verdict,
                "issues_count": issues_count,
                "critical_count": details.critical_count,
                "warning_count": details.warning_count,
                "suggestion_count": details.suggestion_count,
                "reviewer_pacs": details.reviewer_pacs,
                "pacs_dimensions": details.pacs_dimensions,
                "generator_pacs": delta.generator_score,
                "pacs_delta": delta.delta,
                "needs_reconciliation": delta.needs_reconciliation,
            });
            if check_sequence {
                let (seq_valid, seq_warning) =
                    warden_validators::review::validate_review_sequence(&project_dir, step);
                output["sequence_valid"] = json!(seq_valid);
                if let Some(warning) = seq_warning {
                    output["sequence_warning"] = json!(warning);
                    warnings.push(warning);
                }
                valid = valid && seq_valid;
                output["valid"] = json!(valid);
            }
            output["warnings"] = json!(warnings);
            print_json(&output);
            Ok(0)
        }

        Commands::ValidatePacs {
            step,
            project_dir,
            pacs_type,
            check_l0,
        } => {
            let project_dir = resolve_project_dir(project_dir);
            let (mut valid, mut warnings) = warden_validators::pacs::validate_pacs_output(
                &project_dir,
                step,
                pacs_type.as_str(),
            );
            let mut output = json!({
                "valid": valid,
                "step": step,
                "pacs_type": pacs_type.as_str(),
            });
            if check_l0 {
                let (l0_valid, l0_warnings) =
                    warden_validators::output::validate_step_output(&project_dir, step);
                output["l0_valid"] = json!(l0_valid);
                output["l0_warnings"] = json!(l0_warnings);
                warnings.extend(l0_warnings);
                valid = valid && l0_valid;
                output["valid"] = json!(valid);
            }
            output["warnings"] = json!(warnings);
            print_json(&output);
            Ok(0)
        }

        Commands::ValidateTranslation {
            step,
            project_dir,
            check_sequence,
            check_pacs,
        } => {
            let project_dir = resolve_project_dir(project_dir);
            let (translation_valid, mut warnings) =
                warden_validators::translation::validate_translation_output(&project_dir, step);
            let (glossary_valid, glossary_warning) =
                warden_validators::translation::check_glossary_freshness(&project_dir, step);
            let mut valid = translation_valid && glossary_valid;

            let mut output = json!({
                "step": step,
                "translation_valid": translation_valid,
                "glossary_valid": glossary_valid,
            });
            if let Some(warning) = glossary_warning {
                output["glossary_warning"] = json!(warning);
                warnings.push(warning);
            }
            if check_pacs {
                let pacs_path = warden_validators::pacs::pacs_log_path(
                    &project_dir,
                    step,
                    "translation",
                );
                let (pacs_valid, pacs_warning) =
                    warden_validators::pacs::verify_pacs_arithmetic(&pacs_path);
                output["pacs_arithmetic_valid"] = json!(pacs_valid);
                if let Some(warning) = pacs_warning {
                    output["pacs_arithmetic_warning"] = json!(warning);
                    warnings.push(warning);
                }
                valid = valid && pacs_valid;
            }
            if check_sequence {
                let (seq_valid, seq_warning) =
                    warden_validators::review::validate_review_sequence(&project_dir, step);
                output["sequence_valid"] = json!(seq_valid);
                if let Some(warning) = seq_warning {
                    output["sequence_warning"] = json!(warning);
                    warnings.push(warning);
                }
                valid = valid && seq_valid;
            }
            output["valid"] = json!(valid);
            output["warnings"] = json!(warnings);
            print_json(&output);
            Ok(0)
        }

        Commands::ValidateVerification {
            step,
            project_dir,
            check_pacs,
        } => {
            let project_dir = resolve_project_dir(project_dir);
            let (mut valid, mut warnings) =
                warden_validators::verification::validate_verification_log(&project_dir, step);
            let mut output = json!({"step": step});
            if check_pacs {
                let pacs_path =
                    warden_validators::pacs::pacs_log_path(&project_dir, step, "general");
                let (pacs_valid, pacs_warning) =
                    warden_validators::pacs::verify_pacs_arithmetic(&pacs_path);
                output["pacs_arithmetic_valid"] = json!(pacs_valid);
                if let Some(warning) = pacs_warning {
                    warnings.push(warning);
                }
                valid = valid && pacs_valid;
            }
            output["valid"] = json!(valid);
            output["warnings"] = json!(warnings);
            print_json(&output);
            Ok(0)
        }

        Commands::ValidateTraceability { step, project_dir } => {
            let project_dir = resolve_project_dir(project_dir);
            let (valid, warnings) =
                warden_validators::traceability::validate_cross_step_traceability(
                    &project_dir,
                    step,
                );
            let (trace_count, verified_count) =
                warden_validators::traceability::counts_from_warnings(&warnings);
            print_json(&json!({
                "valid": valid,
                "step": step,
                "trace_count": trace_count,
                "verified_count": verified_count,
                "warnings": warnings,
            }));
            Ok(0)
        }

        Commands::ValidateDomainKnowledge {
            project_dir,
            check_output,
            step,
        } => {
            let project_dir = resolve_project_dir(project_dir);
            if check_output && step.is_none() {
                anyhow::bail!("--check-output requires --step N");
            }
            let check_step = if check_output { step } else { None };
            let (valid, warnings) =
                warden_validators::domain::validate_domain_knowledge(&project_dir, check_step);
            let mut output = json!({
                "valid": valid,
                "warnings": warnings,
            });
            if let Some(step) = check_step {
                output["checked_step"] = json!(step);
            }
            print_json(&output);
            Ok(0)
        }

        Commands::ValidateWorkflow { workflow_path } => {
            let (valid, warnings) =
                warden_validators::workflow::validate_workflow_md(&workflow_path);
            print_json(&json!({
                "valid": valid,
                "workflow_path": workflow_path,
                "warnings": warnings,
            }));
            Ok(0)
        }

        Commands::ValidateDiagnosis {
            step,
            gate,
            project_dir,
        } => {
            let project_dir = resolve_project_dir(project_dir);
            let (valid, warnings) = warden_validators::diagnosis::validate_diagnosis_log(
                &project_dir,
                step,
                gate.into(),
            );
            print_json(&json!({
                "valid": valid,
                "step": step,
                "gate": Gate::from(gate).as_str(),
                "warnings": warnings,
            }));
            Ok(0)
        }

        Commands::Diagnose {
            step,
            gate,
            project_dir,
        } => {
            let project_dir = resolve_project_dir(project_dir);
            let context = warden_validators::diagnosis::diagnose_failure_context(
                &project_dir,
                step,
                gate.into(),
            );
            print_json(&context);
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn gate_and_trigger_args_map_through() {
        assert_eq!(Gate::from(GateArg::Pacs).as_str(), "pacs");
        assert_eq!(Trigger::from(TriggerArg::Sessionend).as_str(), "sessionend");
        assert_eq!(PacsTypeArg::Translation.as_str(), "translation");
    }
}
