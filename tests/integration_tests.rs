//! Integration tests for the planner CLI
//!
//! These tests drive the binary end to end against temporary projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a planner Command
fn planner() -> Command {
    cargo_bin_cmd!("planner")
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize a planner project in a temp directory
fn init_planner_project(dir: &TempDir) {
    planner()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

/// Skills that answer from a shell one-liner.
#[cfg(unix)]
const SHELL_SKILLS: &str = r#"
[skills.echo]
command = "sh"
args = ["-c", "cat > /dev/null; echo '{\"status\":\"completed\",\"outputs\":[\"'$PLANNER_TASK_ID'.out\"]}'"]

[skills.ask]
command = "sh"
args = ["-c", "cat > /dev/null; echo '{\"status\":\"blocked\",\"reason\":\"Should admins see deleted orders?\"}'"]
"#;

fn write_config(dir: &TempDir, extra: &str) {
    let content = format!("[defaults]\nauto_advance = true\n{}", extra);
    fs::write(dir.path().join(".planner/planner.toml"), content).unwrap();
}

fn write_plan(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_planner_help() {
        planner().arg("--help").assert().success();
    }

    #[test]
    fn test_planner_version() {
        planner().arg("--version").assert().success();
    }

    #[test]
    fn test_planner_init_creates_structure() {
        let dir = create_temp_project();

        planner()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized planner project"));

        assert!(dir.path().join(".planner").exists());
        assert!(dir.path().join(".planner/planner.toml").exists());
        assert!(dir.path().join(".planner/logs").exists());
    }

    #[test]
    fn test_planner_init_idempotent() {
        let dir = create_temp_project();
        init_planner_project(&dir);

        planner()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_init_with_name() {
        let dir = create_temp_project();

        planner()
            .current_dir(dir.path())
            .args(["init", "--name", "shop"])
            .assert()
            .success();

        let content = fs::read_to_string(dir.path().join(".planner/planner.toml")).unwrap();
        assert!(content.contains("name = \"shop\""));

        planner()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("shop"));
    }

    #[test]
    fn test_status_uninitialized() {
        let dir = create_temp_project();

        planner()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .failure()
            .stderr(predicate::str::contains("planner init"));
    }

    #[test]
    fn test_status_initialized() {
        let dir = create_temp_project();
        init_planner_project(&dir);

        planner()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("discovery"))
            .stdout(predicate::str::contains("No tasks planned"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        init_planner_project(&dir);

        planner()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("status")
            .assert()
            .success();
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod config_tests {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        planner()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No planner.toml found"))
            .stdout(predicate::str::contains("max_retries = 3"));
    }

    #[test]
    fn test_config_validate_with_warnings() {
        let dir = create_temp_project();
        init_planner_project(&dir);
        write_config(
            &dir,
            "[skills.api]\ncommand = \"./api.sh\"\nfallback = \"generic\"\n",
        );

        planner()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("unknown capability 'generic'"));
    }

    #[test]
    fn test_no_auto_advance_flag_shown_in_effective_values() {
        let dir = create_temp_project();
        init_planner_project(&dir);

        planner()
            .current_dir(dir.path())
            .args(["--no-auto-advance", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("auto_advance = false"));
    }
}

// =============================================================================
// Planning and Phase Tests
// =============================================================================

mod planning {
    use super::*;

    #[test]
    fn test_plan_yaml_batch() {
        let dir = create_temp_project();
        init_planner_project(&dir);
        let plan = write_plan(
            &dir,
            "tasks.yaml",
            r#"
tasks:
  - id: schema
    title: Write schema
    capability: db
  - id: api
    title: Build API
    capability: backend
    depends_on: [schema]
deferred:
  - id: seed
    title: Seed data
    capability: db
"#,
        );

        planner()
            .current_dir(dir.path())
            .arg("plan")
            .arg(&plan)
            .assert()
            .success()
            .stdout(predicate::str::contains("Inserted 2 task(s)"))
            .stdout(predicate::str::contains("1 deferred definition(s)"));

        planner()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("schema"))
            .stdout(predicate::str::contains("Build API"));

        assert!(dir.path().join(".planner/state.json").exists());
    }

    #[test]
    fn test_plan_json_list() {
        let dir = create_temp_project();
        init_planner_project(&dir);
        let plan = write_plan(
            &dir,
            "tasks.json",
            r#"[{"id": "a", "title": "A", "capability": "x"}]"#,
        );

        planner()
            .current_dir(dir.path())
            .arg("plan")
            .arg(&plan)
            .assert()
            .success()
            .stdout(predicate::str::contains("Inserted 1 task(s)"));
    }

    #[test]
    fn test_plan_rejects_cycle() {
        let dir = create_temp_project();
        init_planner_project(&dir);
        let plan = write_plan(
            &dir,
            "tasks.json",
            r#"[
                {"id": "a", "title": "A", "capability": "x", "depends_on": ["b"]},
                {"id": "b", "title": "B", "capability": "x", "depends_on": ["a"]}
            ]"#,
        );

        planner()
            .current_dir(dir.path())
            .arg("plan")
            .arg(&plan)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cycle detected"));

        planner()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No tasks planned"));
    }

    #[test]
    fn test_advance_refuses_outstanding_tasks() {
        let dir = create_temp_project();
        init_planner_project(&dir);
        let plan = write_plan(
            &dir,
            "tasks.json",
            r#"[{"id": "interview", "title": "Interview", "capability": "x", "phase": "discovery"}]"#,
        );
        planner()
            .current_dir(dir.path())
            .arg("plan")
            .arg(&plan)
            .assert()
            .success();

        planner()
            .current_dir(dir.path())
            .arg("advance")
            .assert()
            .failure()
            .stderr(predicate::str::contains("not ready to advance"))
            .stderr(predicate::str::contains("interview"));
    }

    #[test]
    fn test_advance_and_checkpoints() {
        let dir = create_temp_project();
        init_planner_project(&dir);

        planner()
            .current_dir(dir.path())
            .arg("advance")
            .assert()
            .success()
            .stdout(predicate::str::contains("stack"));

        planner()
            .current_dir(dir.path())
            .arg("checkpoints")
            .assert()
            .success()
            .stdout(predicate::str::contains("stack:start"));
    }

    #[test]
    fn test_iterate_requires_review() {
        let dir = create_temp_project();
        init_planner_project(&dir);

        planner()
            .current_dir(dir.path())
            .arg("iterate")
            .assert()
            .failure()
            .stderr(predicate::str::contains("not allowed"));
    }

    #[test]
    fn test_override_phase_then_iterate() {
        let dir = create_temp_project();
        init_planner_project(&dir);

        planner()
            .current_dir(dir.path())
            .args(["override-phase", "review", "--reason", "imported project"])
            .assert()
            .success()
            .stdout(predicate::str::contains("review"));

        planner()
            .current_dir(dir.path())
            .arg("iterate")
            .assert()
            .success()
            .stdout(predicate::str::contains("building"));

        let journal = fs::read_to_string(dir.path().join(".planner/journal.log")).unwrap();
        assert!(journal.contains("imported project"));
    }

    #[test]
    fn test_override_phase_rejects_unknown_phase() {
        let dir = create_temp_project();
        init_planner_project(&dir);

        planner()
            .current_dir(dir.path())
            .args(["override-phase", "shipping", "--reason", "x"])
            .assert()
            .failure();
    }

    #[test]
    fn test_decide_records_decision() {
        let dir = create_temp_project();
        init_planner_project(&dir);

        planner()
            .current_dir(dir.path())
            .args(["decide", "database", "postgres"])
            .assert()
            .success();

        planner()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("database = postgres"));
    }
}

// =============================================================================
// Orchestration Tests (shell skills)
// =============================================================================

#[cfg(unix)]
mod orchestration {
    use super::*;

    fn planned_project(plan: &str) -> TempDir {
        let dir = create_temp_project();
        init_planner_project(&dir);
        write_config(&dir, SHELL_SKILLS);
        let plan = write_plan(&dir, "tasks.json", plan);
        planner()
            .current_dir(dir.path())
            .arg("plan")
            .arg(&plan)
            .assert()
            .success();
        dir
    }

    #[test]
    fn test_run_to_completion() {
        let dir = planned_project(
            r#"[
                {"id": "schema", "title": "Schema", "capability": "echo"},
                {"id": "api", "title": "Api", "capability": "echo", "depends_on": ["schema"]}
            ]"#,
        );

        planner()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("schema → api"))
            .stdout(predicate::str::contains("All phases finished"));

        planner()
            .current_dir(dir.path())
            .arg("checkpoints")
            .assert()
            .success()
            .stdout(predicate::str::contains("building:schema:completed"))
            .stdout(predicate::str::contains("review:start"));

        let journal = fs::read_to_string(dir.path().join(".planner/journal.log")).unwrap();
        assert!(journal.contains("api"));
        assert!(journal.contains("completed"));
    }

    #[test]
    fn test_run_step_limit() {
        let dir = planned_project(
            r#"[
                {"id": "a", "title": "A", "capability": "echo", "phase": "discovery"},
                {"id": "b", "title": "B", "capability": "echo", "phase": "discovery"}
            ]"#,
        );

        planner()
            .current_dir(dir.path())
            .args(["run", "--steps", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Step limit reached"));

        planner()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("discovery"));
    }

    #[test]
    fn test_no_auto_advance_stops_at_boundary() {
        let dir = planned_project(
            r#"[{"id": "a", "title": "A", "capability": "echo", "phase": "discovery"}]"#,
        );

        planner()
            .current_dir(dir.path())
            .args(["--no-auto-advance", "run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Phase discovery complete"));
    }

    #[test]
    fn test_product_blocker_escalates_and_resolves() {
        let dir = planned_project(
            r#"[{"id": "policy", "title": "Deletion policy", "capability": "ask"}]"#,
        );

        planner()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("escalated"))
            .stderr(predicate::str::contains("planner resolve policy"));

        planner()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Pending escalations"))
            .stdout(predicate::str::contains("deleted orders"));

        planner()
            .current_dir(dir.path())
            .args(["resolve", "policy", "--complete", "policy.md"])
            .assert()
            .success()
            .stdout(predicate::str::contains("override completed"));

        planner()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("All phases finished"));
    }

    #[test]
    fn test_resolve_without_escalation_fails() {
        let dir = planned_project(r#"[{"id": "a", "title": "A", "capability": "echo"}]"#);

        planner()
            .current_dir(dir.path())
            .args(["resolve", "a", "--reset"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No pending escalation"));
    }

    #[test]
    fn test_missing_handler_without_fallback_escalates() {
        let dir = planned_project(r#"[{"id": "a", "title": "A", "capability": "nope"}]"#);

        planner()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stdout(predicate::str::contains("technical blocker"));

        planner()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Missing resources"))
            .stdout(predicate::str::contains("nope"));
    }
}
