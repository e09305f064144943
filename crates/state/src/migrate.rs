// crates/state/src/migrate.rs
//! Versioned schema migrations over persisted session bodies.
//!
//! Migrations are registered as `(from, to)` edges with an apply and an
//! explicit rollback transform, both over the raw JSON value. Planning
//! finds the longest strictly-increasing path from the stored version to
//! the target; a failed step unwinds every applied step in reverse so
//! the session stays usable at its original version.

use redline_types::{StateError, SessionId};
use serde_json::Value;
use tracing::{info, warn};

pub type Transform = fn(&mut Value) -> Result<(), String>;

#[derive(Clone)]
pub struct Migration {
    pub from: u32,
    pub to: u32,
    pub description: &'static str,
    pub apply: Transform,
    pub rollback: Transform,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("description", &self.description)
            .finish()
    }
}

/// What happened during one `migrate` call; the caller turns this into
/// lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub steps: Vec<(u32, u32)>,
    pub rolled_back: bool,
}

#[derive(Debug, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry for the current schema history.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Migration {
            from: 1,
            to: 2,
            description: "add audit trails and explicit session state",
            apply: migrate_v1_to_v2,
            rollback: rollback_v2_to_v1,
        });
        registry.register(Migration {
            from: 2,
            to: 3,
            description: "add batch confidence and grouping strategy",
            apply: migrate_v2_to_v3,
            rollback: rollback_v3_to_v2,
        });
        registry
    }

    pub fn register(&mut self, migration: Migration) {
        self.migrations.push(migration);
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Longest strictly-increasing path `from → … → to`. Fails when no
    /// path reaches `to` exactly.
    pub fn plan(&self, from: u32, to: u32) -> Result<Vec<&Migration>, StateError> {
        if from == to {
            return Ok(Vec::new());
        }
        let fail = |reason: String| StateError::MigrationFailed {
            from,
            to,
            failed_at: from,
            reason,
        };
        if from > to {
            return Err(fail("downgrade paths are not planned".into()));
        }

        // Depth-first over edges with to <= target, maximizing step count.
        fn search<'a>(
            migrations: &'a [Migration],
            at: u32,
            target: u32,
        ) -> Option<Vec<&'a Migration>> {
            if at == target {
                return Some(Vec::new());
            }
            let mut best: Option<Vec<&Migration>> = None;
            for migration in migrations {
                if migration.from == at && migration.to > at && migration.to <= target {
                    if let Some(mut tail) = search(migrations, migration.to, target) {
                        tail.insert(0, migration);
                        let better = match &best {
                            None => true,
                            Some(current) => tail.len() > current.len(),
                        };
                        if better {
                            best = Some(tail);
                        }
                    }
                }
            }
            best
        }

        search(&self.migrations, from, to)
            .ok_or_else(|| fail(format!("no migration path from v{from} to v{to}")))
    }

    /// Run the planned steps over `body`, bumping its `version` field per
    /// step. On a step failure, the applied prefix is rolled back in
    /// reverse and the body is byte-identical to its pre-migration form.
    pub fn migrate(
        &self,
        session_id: SessionId,
        body: &mut Value,
        from: u32,
        to: u32,
    ) -> Result<MigrationReport, (StateError, MigrationReport)> {
        let plan = match self.plan(from, to) {
            Ok(plan) => plan,
            Err(e) => {
                return Err((
                    e,
                    MigrationReport {
                        from_version: from,
                        to_version: to,
                        steps: Vec::new(),
                        rolled_back: false,
                    },
                ))
            }
        };

        let mut applied: Vec<&Migration> = Vec::new();
        for step in plan {
            info!(
                session = %session_id,
                from = step.from,
                to = step.to,
                "applying migration step"
            );
            match (step.apply)(body) {
                Ok(()) => {
                    set_version(body, step.to);
                    applied.push(step);
                }
                Err(reason) => {
                    warn!(
                        session = %session_id,
                        failed_at = step.from,
                        reason,
                        "migration step failed; rolling back"
                    );
                    let mut rolled = Vec::new();
                    for undo in applied.iter().rev() {
                        if let Err(rollback_reason) = (undo.rollback)(body) {
                            // A failing rollback leaves the body marked at
                            // the broken version; recovery quarantines it.
                            return Err((
                                StateError::MigrationFailed {
                                    from,
                                    to,
                                    failed_at: undo.to,
                                    reason: format!(
                                        "rollback failed after {reason}: {rollback_reason}"
                                    ),
                                },
                                MigrationReport {
                                    from_version: from,
                                    to_version: to,
                                    steps: rolled,
                                    rolled_back: false,
                                },
                            ));
                        }
                        set_version(body, undo.from);
                        rolled.push((undo.to, undo.from));
                    }
                    return Err((
                        StateError::MigrationFailed {
                            from,
                            to,
                            failed_at: step.from,
                            reason,
                        },
                        MigrationReport {
                            from_version: from,
                            to_version: to,
                            steps: rolled,
                            rolled_back: true,
                        },
                    ));
                }
            }
        }

        Ok(MigrationReport {
            from_version: from,
            to_version: to,
            steps: applied.iter().map(|m| (m.from, m.to)).collect(),
            rolled_back: false,
        })
    }
}

fn set_version(body: &mut Value, version: u32) {
    if let Value::Object(map) = body {
        map.insert("version".into(), Value::from(version));
        if let Some(Value::Object(session)) = map.get_mut("session") {
            session.insert("version".into(), Value::from(version));
        }
    }
}

// ---------------------------------------------------------------------------
// Schema history
// ---------------------------------------------------------------------------

/// v1 → v2: changes gain audit trails; sessions gain an explicit state
/// derived from `ended_at`.
fn migrate_v1_to_v2(body: &mut Value) -> Result<(), String> {
    let map = body.as_object_mut().ok_or("body is not an object")?;
    if let Some(Value::Array(changes)) = map.get_mut("changes") {
        for change in changes {
            let change = change.as_object_mut().ok_or("change is not an object")?;
            change.entry("audit").or_insert_with(|| Value::Array(Vec::new()));
        }
    }
    if let Some(Value::Object(session)) = map.get_mut("session") {
        if !session.contains_key("state") {
            let state = if session.get("ended_at").is_some_and(|v| !v.is_null()) {
                "closed"
            } else {
                "active"
            };
            session.insert("state".into(), Value::from(state));
        }
    }
    Ok(())
}

fn rollback_v2_to_v1(body: &mut Value) -> Result<(), String> {
    let map = body.as_object_mut().ok_or("body is not an object")?;
    if let Some(Value::Array(changes)) = map.get_mut("changes") {
        for change in changes {
            let change = change.as_object_mut().ok_or("change is not an object")?;
            change.remove("audit");
        }
    }
    if let Some(Value::Object(session)) = map.get_mut("session") {
        session.remove("state");
    }
    Ok(())
}

/// v2 → v3: batches gain `confidence_level` and `grouping_strategy`.
fn migrate_v2_to_v3(body: &mut Value) -> Result<(), String> {
    let map = body.as_object_mut().ok_or("body is not an object")?;
    if let Some(Value::Array(batches)) = map.get_mut("batches") {
        for batch in batches {
            let batch = batch.as_object_mut().ok_or("batch is not an object")?;
            batch
                .entry("confidence_level")
                .or_insert_with(|| Value::from(0.5));
            batch
                .entry("grouping_strategy")
                .or_insert_with(|| Value::from("none"));
        }
    }
    Ok(())
}

fn rollback_v3_to_v2(body: &mut Value) -> Result<(), String> {
    let map = body.as_object_mut().ok_or("body is not an object")?;
    if let Some(Value::Array(batches)) = map.get_mut("batches") {
        for batch in batches {
            let batch = batch.as_object_mut().ok_or("batch is not an object")?;
            batch.remove("confidence_level");
            batch.remove("grouping_strategy");
        }
    }
    Ok(())
}
