// ABOUTME: One-shot session commands for the codenest binary
// ABOUTME: Exec, status, stop, delete and listing run in-process against the shared session database

use anyhow::Result;
use codenest_api::OwnerDirectory;
use codenest_sandbox::{SandboxSession, SessionManager, SessionState};
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};

/// Run `command` in the project's sandbox and print its output.
/// Returns the command's exit code.
pub async fn exec(
    manager: &SessionManager,
    owners: &OwnerDirectory,
    user: &str,
    project: &str,
    command: &str,
) -> Result<i64> {
    let owner = owners.resolve(user, project).await?;
    let result = manager.execute(&owner, command, None).await?;

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    Ok(result.exit_code)
}

pub async fn status(
    manager: &SessionManager,
    owners: &OwnerDirectory,
    user: &str,
    project: &str,
) -> Result<()> {
    let owner_id = owners.owner_id(user, project)?;
    let status = manager.status(&owner_id).await?;

    println!("{} {}", "Owner:".bold(), status.owner_id);
    println!("{} {}", "State:".bold(), state_label(status.state));

    if let Some(session) = &status.session {
        println!("{} {}", "Container:".bold(), session.container_name);
        println!("{} {}", "Workspace:".bold(), session.workspace_path);
        println!("{} {}", "Volume:".bold(), session.mounted_volume_path);
        println!(
            "{} {} memory, {} CPUs",
            "Resources:".bold(),
            session.resource_profile.memory_limit,
            session.resource_profile.cpu_quota
        );
        println!("{} {}", "Last activity:".bold(), last_activity(session));
    }
    Ok(())
}

pub async fn stop(
    manager: &SessionManager,
    owners: &OwnerDirectory,
    user: &str,
    project: &str,
) -> Result<()> {
    let owner_id = owners.owner_id(user, project)?;

    if manager.stop(&owner_id).await? {
        println!("{} Sandbox for {} stopped", "✓".green(), owner_id);
    } else {
        println!("{}", format!("Sandbox for {} was not running", owner_id).yellow());
    }
    Ok(())
}

pub async fn delete(
    manager: &SessionManager,
    owners: &OwnerDirectory,
    user: &str,
    project: &str,
) -> Result<()> {
    let owner_id = owners.owner_id(user, project)?;
    manager.delete(&owner_id).await?;

    println!("{} Sandbox for {} deleted", "✓".green(), owner_id);
    println!("{}", "The workspace directory was left in place".dimmed());
    Ok(())
}

pub async fn sessions(manager: &SessionManager) -> Result<()> {
    let sessions = manager.list_sessions().await?;

    if sessions.is_empty() {
        println!("{}", "No sandbox sessions found".yellow());
        return Ok(());
    }

    println!("{}", sessions_table(&sessions));
    println!("Total: {} sessions", sessions.len().to_string().cyan());
    Ok(())
}

pub fn sessions_table(sessions: &[SandboxSession]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec!["Owner", "Container", "Status", "Memory", "Last activity"]);

    for session in sessions {
        table.add_row(vec![
            session.owner_id.to_string(),
            session.container_name.clone(),
            session.status.as_str().to_string(),
            session.resource_profile.memory_limit.clone(),
            last_activity(session),
        ]);
    }

    table
}

fn last_activity(session: &SandboxSession) -> String {
    session
        .last_activity_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn state_label(state: SessionState) -> ColoredString {
    match state {
        SessionState::Running => "running".green(),
        SessionState::Stopped => "stopped".yellow(),
        SessionState::Removed => "removed".red(),
        SessionState::Absent => "absent".dimmed(),
    }
}
