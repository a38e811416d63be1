// Token Store (§4.E): persistent metadata per issued token. One diesel-async
// session per operation, the same pool/session shape the teacher's
// refresh-token queries use.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::db::DieselPool;
use crate::models::token_record::{NewTokenRecord, TokenQuery, TokenRecord, TokenStoreError};
use crate::schema::testbed_tokens::dsl;

#[derive(Clone)]
pub struct TokenStore {
    pool: DieselPool,
}

impl TokenStore {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, record: NewTokenRecord) -> Result<TokenRecord, TokenStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TokenStoreError::Pool(e.to_string()))?;

        diesel::insert_into(dsl::testbed_tokens)
            .values(&record)
            .get_result(&mut conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => TokenStoreError::DuplicateHash,
                other => TokenStoreError::Database(other),
            })
    }

    /// Idempotent for identical state, per §4.E.
    pub async fn update_state(
        &self,
        token_hash: &str,
        state: crate::models::TokenState,
    ) -> Result<(), TokenStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TokenStoreError::Pool(e.to_string()))?;

        let updated = diesel::update(dsl::testbed_tokens.filter(dsl::token_hash.eq(token_hash)))
            .set(dsl::state.eq(state))
            .execute(&mut conn)
            .await?;

        if updated == 0 {
            return Err(TokenStoreError::NotFound);
        }
        Ok(())
    }

    pub async fn remove(&self, token_hash: &str) -> Result<(), TokenStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TokenStoreError::Pool(e.to_string()))?;

        let deleted = diesel::delete(dsl::testbed_tokens.filter(dsl::token_hash.eq(token_hash)))
            .execute(&mut conn)
            .await?;

        if deleted == 0 {
            return Err(TokenStoreError::NotFound);
        }
        Ok(())
    }

    /// Best-effort cleanup step of the mint pipeline (§4.F.7): delete
    /// already-expired rows for a user before signing a new one.
    pub async fn delete_expired_for_user(&self, user_id: &str) -> Result<usize, TokenStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TokenStoreError::Pool(e.to_string()))?;

        let now = Utc::now();
        let deleted = diesel::delete(
            dsl::testbed_tokens
                .filter(dsl::user_id.eq(user_id))
                .filter(dsl::expires_at.lt(now)),
        )
        .execute(&mut conn)
        .await?;

        Ok(deleted)
    }

    pub async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TokenRecord>, TokenStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TokenStoreError::Pool(e.to_string()))?;

        let record = dsl::testbed_tokens
            .filter(dsl::token_hash.eq(token_hash))
            .first(&mut conn)
            .await
            .optional()?;

        Ok(record)
    }

    /// Count currently-stored long-lived tokens for a project, used by the
    /// LLT cap check (§4.F.3). A "long-lived" row is one whose original
    /// requested lifetime exceeded the short-lived threshold; since that
    /// isn't itself a stored column, the caller passes the threshold and
    /// this counts rows whose (expires_at - created_at) exceeds it.
    pub async fn count_long_lived(
        &self,
        user_id: &str,
        project_id: &str,
        short_threshold_seconds: i64,
    ) -> Result<i64, TokenStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TokenStoreError::Pool(e.to_string()))?;

        let rows: Vec<TokenRecord> = dsl::testbed_tokens
            .filter(dsl::user_id.eq(user_id))
            .filter(dsl::project_id.eq(project_id))
            .filter(dsl::state.eq_any([
                crate::models::TokenState::Valid,
                crate::models::TokenState::Refreshed,
            ]))
            .load(&mut conn)
            .await?;

        let count = rows
            .into_iter()
            .filter(|row| {
                row.expires_at > Utc::now()
                    && (row.expires_at - row.created_at).num_seconds() > short_threshold_seconds
            })
            .count();

        Ok(count as i64)
    }

    pub async fn query(&self, query: TokenQuery) -> Result<Vec<TokenRecord>, TokenStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TokenStoreError::Pool(e.to_string()))?;

        let mut stmt = dsl::testbed_tokens.into_boxed();

        if let Some(user_id) = &query.user_id {
            stmt = stmt.filter(dsl::user_id.eq(user_id.clone()));
        }
        if let Some(user_email) = &query.user_email {
            stmt = stmt.filter(dsl::user_email.eq(user_email.clone()));
        }
        if let Some(project_id) = &query.project_id {
            stmt = stmt.filter(dsl::project_id.eq(project_id.clone()));
        }
        if let Some(token_hash) = &query.token_hash {
            stmt = stmt.filter(dsl::token_hash.eq(token_hash.clone()));
        }
        if let Some(expires_before) = query.expires_before {
            stmt = stmt.filter(dsl::expires_at.lt(expires_before));
        }
        if let Some(states) = &query.states {
            stmt = stmt.filter(dsl::state.eq_any(states.clone()));
        }

        let rows = stmt
            .order(dsl::expires_at.desc())
            .offset(query.offset)
            .limit(query.limit)
            .load(&mut conn)
            .await?;

        Ok(rows)
    }

    /// Revocation-list publisher: token_hash values currently Revoked for
    /// a project (§2 data flow, §4.G `revocation-list`).
    pub async fn revoked_hashes_for_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<String>, TokenStoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| TokenStoreError::Pool(e.to_string()))?;

        let hashes = dsl::testbed_tokens
            .filter(dsl::project_id.eq(project_id))
            .filter(dsl::state.eq(crate::models::TokenState::Revoked))
            .select(dsl::token_hash)
            .load(&mut conn)
            .await?;

        Ok(hashes)
    }
}
