use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUserInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedUser {
    /// Storage id; absent for the single-candidate passthrough, which is
    /// echoed back without being persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idn: Option<i64>,
    pub client_id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub is_student: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedCandidate {
    pub index: usize,
    pub username: String,
    pub reason: &'static str,
}

pub const SKIP_MISSING_FIELDS: &str = "missing_fields";
pub const SKIP_DUPLICATE_USERNAME: &str = "duplicate_username";

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub created: Vec<CreatedUser>,
    pub skipped: Vec<SkippedCandidate>,
}

#[derive(Debug)]
pub struct ImportError {
    pub code: &'static str,
    pub message: String,
}

impl ImportError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Storage seam for the importer. The SQLite implementation lives in
/// `SqliteUserStore`; tests substitute in-memory stores, including failing
/// ones, to exercise the abort path.
pub trait UserStore {
    /// Current maximum `idn` for the tenant, 0 when it has no users yet.
    fn max_idn(&mut self, client_id: &str) -> anyhow::Result<i64>;
    /// Every persisted username, lower-cased, across all tenants.
    fn usernames(&mut self) -> anyhow::Result<HashSet<String>>;
    fn insert(&mut self, user: &CreatedUser) -> anyhow::Result<()>;
}

/// Walks the candidates in strict input order, skipping invalid or duplicate
/// entries and persisting the rest with consecutive per-tenant sequence
/// numbers. Uniqueness is checked against a claimed-username set seeded from
/// one upfront query plus every username accepted earlier in the batch, so a
/// duplicate inside the batch is caught without re-querying storage.
///
/// Two failure modes, deliberately asymmetric: a validation or uniqueness
/// rejection skips that candidate and is reported in `outcome.skipped`; a
/// persistence error aborts the whole batch.
///
/// Boundary case kept from the original routine: a batch with at most one
/// element performs no uniqueness checks and is echoed back unpersisted and
/// unmodified.
pub fn import_users(
    store: &mut dyn UserStore,
    client_id: &str,
    candidates: Vec<RawUserInput>,
) -> Result<ImportOutcome, ImportError> {
    if candidates.len() <= 1 {
        let created = candidates
            .into_iter()
            .map(|c| CreatedUser {
                id: None,
                idn: None,
                client_id: client_id.to_string(),
                username: c.username,
                first_name: c.first_name,
                last_name: c.last_name,
                email: c.email,
                is_student: true,
            })
            .collect();
        return Ok(ImportOutcome {
            created,
            skipped: Vec::new(),
        });
    }

    let mut claimed = store
        .usernames()
        .map_err(|e| ImportError::new("db_query_failed", e.to_string()))?;
    let mut next_idn = store
        .max_idn(client_id)
        .map_err(|e| ImportError::new("db_query_failed", e.to_string()))?
        + 1;

    let mut outcome = ImportOutcome::default();
    for (index, candidate) in candidates.into_iter().enumerate() {
        let username = candidate.username.trim().to_lowercase();
        let first_name = candidate.first_name.trim().to_string();
        let last_name = candidate.last_name.trim().to_string();

        if username.is_empty() || first_name.is_empty() || last_name.is_empty() {
            outcome.skipped.push(SkippedCandidate {
                index,
                username,
                reason: SKIP_MISSING_FIELDS,
            });
            continue;
        }
        if claimed.contains(&username) {
            outcome.skipped.push(SkippedCandidate {
                index,
                username,
                reason: SKIP_DUPLICATE_USERNAME,
            });
            continue;
        }

        let user = CreatedUser {
            id: Some(Uuid::new_v4().to_string()),
            idn: Some(next_idn),
            client_id: client_id.to_string(),
            username: username.clone(),
            first_name,
            last_name,
            email: candidate.email,
            is_student: true,
        };
        store
            .insert(&user)
            .map_err(|e| ImportError::new("db_insert_failed", e.to_string()))?;

        claimed.insert(username);
        next_idn += 1;
        outcome.created.push(user);
    }

    Ok(outcome)
}

pub struct SqliteUserStore<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SqliteUserStore<'a> {
    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }
}

impl UserStore for SqliteUserStore<'_> {
    fn max_idn(&mut self, client_id: &str) -> anyhow::Result<i64> {
        let max: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(idn), 0) FROM users WHERE client_id = ?",
            [client_id],
            |r| r.get(0),
        )?;
        Ok(max)
    }

    fn usernames(&mut self) -> anyhow::Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT username FROM users")?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
    }

    fn insert(&mut self, user: &CreatedUser) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO users(id, client_id, idn, username, first_name, last_name, email, is_student)
             VALUES(?, ?, ?, ?, ?, ?, ?, 1)",
            (
                user.id.as_deref().unwrap_or_default(),
                &user.client_id,
                user.idn.unwrap_or_default(),
                &user.username,
                &user.first_name,
                &user.last_name,
                user.email.as_deref(),
            ),
        )?;
        Ok(())
    }
}
