use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::User;

const CONFIRMED_CAPACITY: usize = 4096;

/// Read access to staff accounts.
#[derive(Clone)]
pub struct UserDirectory {
    db: PgPool,
    checks: Option<AccountChecks>,
}

/// Accounts recently confirmed active, so that a burst of requests from one
/// user costs one lookup.
#[derive(Clone)]
struct AccountChecks {
    ttl: Duration,
    confirmed: Arc<RwLock<HashMap<Uuid, Instant>>>,
}

impl UserDirectory {
    /// Directory that verifies accounts on every authenticated request,
    /// trusting a confirmation for 30 s.
    pub fn new(db: PgPool) -> Self {
        Self { db, checks: None }.account_checks(Some(Duration::from_secs(30)))
    }

    /// Replace the check policy. `None` leaves deactivation to token expiry.
    pub fn account_checks(self, ttl: Option<Duration>) -> Self {
        Self {
            db: self.db,
            checks: ttl.map(|ttl| AccountChecks {
                ttl,
                confirmed: Arc::new(RwLock::new(HashMap::new())),
            }),
        }
    }

    /// An active account; deactivated or unknown users are unauthorized.
    pub async fn find_active(&self, id: Uuid) -> Result<User> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, first_name, last_name, role, phone, specialization,
                   license_number, department, is_active, created_at
            FROM users
            WHERE id = $1 AND is_active
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::Unauthorized("user not found or inactive".to_string()))
    }

    /// Gate for token holders: fails once the account is deactivated.
    pub async fn ensure_active(&self, id: Uuid) -> Result<()> {
        let Some(checks) = &self.checks else {
            return Ok(());
        };

        if let Some(confirmed_at) = checks.confirmed.read().await.get(&id) {
            if confirmed_at.elapsed() < checks.ttl {
                return Ok(());
            }
        }

        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        if active != Some(true) {
            checks.confirmed.write().await.remove(&id);
            return Err(AppError::Unauthorized("account is not active".to_string()));
        }

        let mut confirmed = checks.confirmed.write().await;
        if confirmed.len() >= CONFIRMED_CAPACITY {
            confirmed.retain(|_, at| at.elapsed() < checks.ttl);
        }
        confirmed.insert(id, Instant::now());
        Ok(())
    }
}
