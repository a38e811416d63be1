// Token Store model: persistent metadata for every minted testbed token.
// Mirrors the teacher's RefreshToken changeset/query pattern, generalized
// from a binary revoked_at column to the five-state machine of the token
// record (Nascent/Valid/Refreshed/Revoked/Expired).

use chrono::{DateTime, Utc};
use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql};
use diesel::pg::Pg;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::SmallInt;
use diesel::{AsExpression, FromSqlRow, Queryable, Selectable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::testbed_tokens;

#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("duplicate token_hash")]
    DuplicateHash,
    #[error("token not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("pool error: {0}")]
    Pool(String),
}

/// State machine of §3. Stored as a `SMALLINT`, the way the teacher maps
/// `SubscriptionTier`, so a future variant is additive without a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "PascalCase")]
pub enum TokenState {
    Nascent = 1,
    Valid = 2,
    Refreshed = 3,
    Revoked = 4,
    Expired = 5,
}

impl TokenState {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(TokenState::Nascent),
            2 => Some(TokenState::Valid),
            3 => Some(TokenState::Refreshed),
            4 => Some(TokenState::Revoked),
            5 => Some(TokenState::Expired),
            _ => None,
        }
    }
}

impl ToSql<SmallInt, Pg> for TokenState {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        ToSql::<SmallInt, Pg>::to_sql(&(*self as i16), out)
    }
}

impl FromSql<SmallInt, Pg> for TokenState {
    fn from_sql(bytes: <Pg as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let value = <i16 as FromSql<SmallInt, Pg>>::from_sql(bytes)?;
        TokenState::from_i16(value).ok_or_else(|| format!("invalid token state: {value}").into())
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = testbed_tokens, check_for_backend(Pg))]
pub struct TokenRecord {
    pub token_id: i64,
    pub user_id: String,
    pub user_email: String,
    pub project_id: String,
    pub token_hash: String,
    pub state: TokenState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_from: String,
    pub comment: Option<String>,
}

impl TokenRecord {
    /// §3 invariant: expiry is computed lazily, never stored back.
    pub fn effective_state(&self) -> TokenState {
        if self.expires_at < Utc::now() {
            TokenState::Expired
        } else {
            self.state
        }
    }
}

#[derive(Debug, Clone, diesel::Insertable)]
#[diesel(table_name = testbed_tokens)]
pub struct NewTokenRecord {
    pub user_id: String,
    pub user_email: String,
    pub project_id: String,
    pub token_hash: String,
    pub state: TokenState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_from: String,
    pub comment: Option<String>,
}

/// Query options for `Query` (§4.E). All fields optional; `None` means
/// "no filter on this column".
#[derive(Debug, Clone, Default)]
pub struct TokenQuery {
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub project_id: Option<String>,
    pub token_hash: Option<String>,
    pub expires_before: Option<DateTime<Utc>>,
    pub states: Option<Vec<TokenState>>,
    pub offset: i64,
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record_with(state: TokenState, expires_at: DateTime<Utc>) -> TokenRecord {
        TokenRecord {
            token_id: 1,
            user_id: "u-1".to_string(),
            user_email: "alice@example.org".to_string(),
            project_id: "p-1".to_string(),
            token_hash: "a".repeat(64),
            state,
            created_at: Utc::now() - Duration::hours(1),
            expires_at,
            created_from: "127.0.0.1".to_string(),
            comment: None,
        }
    }

    #[test]
    fn effective_state_reports_stored_state_while_unexpired() {
        let record = record_with(TokenState::Valid, Utc::now() + Duration::hours(1));
        assert_eq!(record.effective_state(), TokenState::Valid);
    }

    #[test]
    fn effective_state_computes_expired_without_writing_it_back() {
        let record = record_with(TokenState::Valid, Utc::now() - Duration::hours(1));
        assert_eq!(record.effective_state(), TokenState::Expired);
        // the invariant is that the stored column never changes underneath us
        assert_eq!(record.state, TokenState::Valid);
    }

    #[test]
    fn effective_state_reports_expired_over_a_stale_revoked_row() {
        // expiry is computed against wall-clock time regardless of which
        // terminal state the row was already in
        let record = record_with(TokenState::Revoked, Utc::now() - Duration::hours(1));
        assert_eq!(record.effective_state(), TokenState::Expired);
    }

    #[test]
    fn state_round_trips_through_i16() {
        for state in [
            TokenState::Nascent,
            TokenState::Valid,
            TokenState::Refreshed,
            TokenState::Revoked,
            TokenState::Expired,
        ] {
            assert_eq!(TokenState::from_i16(state.as_i16()), Some(state));
        }
        assert_eq!(TokenState::from_i16(0), None);
        assert_eq!(TokenState::from_i16(6), None);
    }
}
