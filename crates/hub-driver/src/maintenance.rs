use async_trait::async_trait;
use sqlx::PgPool;

use crate::driver::DatabaseProvisioner;
use crate::error::DriverError;

/// Instance-database provisioning through the maintenance database. The
/// hub's credentials must hold CREATEDB.
pub struct PgDatabaseProvisioner {
    pool: PgPool,
}

impl PgDatabaseProvisioner {
    /// Connect to the maintenance database.
    pub async fn connect(url: &str) -> Result<Self, DriverError> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| DriverError::Internal(format!("maintenance db connect: {e}")))?;
        Ok(Self { pool })
    }

    fn validate_name(db_name: &str) -> Result<(), DriverError> {
        // Database names are interpolated into DDL (CREATE DATABASE takes
        // no bind parameters), so the character set is restricted hard.
        let ok = !db_name.is_empty()
            && db_name.len() <= 63
            && db_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if ok {
            Ok(())
        } else {
            Err(DriverError::Internal(format!("invalid database name: {db_name:?}")))
        }
    }

    fn validate_password(password: &str) -> Result<(), DriverError> {
        // Generated passwords are alphanumeric; anything else never reaches
        // the DDL string.
        if !password.is_empty() && password.chars().all(|c| c.is_ascii_alphanumeric()) {
            Ok(())
        } else {
            Err(DriverError::Internal("invalid database password material".into()))
        }
    }
}

#[async_trait]
impl DatabaseProvisioner for PgDatabaseProvisioner {
    async fn ensure_database(
        &self,
        db_name: &str,
        owner_password: &str,
    ) -> Result<(), DriverError> {
        Self::validate_name(db_name)?;
        Self::validate_password(owner_password)?;

        // Role first: the database is created owned by it so the instance
        // never connects with hub credentials.
        let role_exists: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM pg_roles WHERE rolname = $1")
                .bind(db_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DriverError::Internal(format!("pg_roles probe: {e}")))?;
        if role_exists.is_none() {
            sqlx::query(&format!(
                "CREATE ROLE \"{db_name}\" LOGIN PASSWORD '{owner_password}'"
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| DriverError::Internal(format!("create role {db_name}: {e}")))?;
        }

        if self.database_exists(db_name).await? {
            return Ok(());
        }
        // CREATE DATABASE cannot run inside a transaction block; a bare
        // execute on the pool issues it as a single statement.
        sqlx::query(&format!("CREATE DATABASE \"{db_name}\" OWNER \"{db_name}\""))
            .execute(&self.pool)
            .await
            .map_err(|e| DriverError::Internal(format!("create database {db_name}: {e}")))?;
        Ok(())
    }

    async fn database_exists(&self, db_name: &str) -> Result<bool, DriverError> {
        Self::validate_name(db_name)?;
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM pg_database WHERE datname = $1")
                .bind(db_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DriverError::Internal(format!("pg_database probe: {e}")))?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_hostile_database_names() {
        assert!(PgDatabaseProvisioner::validate_name("xcord_acme").is_ok());
        assert!(PgDatabaseProvisioner::validate_name("xcord_acme2").is_ok());
        assert!(PgDatabaseProvisioner::validate_name("").is_err());
        assert!(PgDatabaseProvisioner::validate_name("a\"; DROP DATABASE hub").is_err());
        assert!(PgDatabaseProvisioner::validate_name("UPPER").is_err());
        assert!(PgDatabaseProvisioner::validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn rejects_hostile_passwords() {
        assert!(PgDatabaseProvisioner::validate_password("Abc123xyz").is_ok());
        assert!(PgDatabaseProvisioner::validate_password("").is_err());
        assert!(PgDatabaseProvisioner::validate_password("pw'; DROP ROLE hub").is_err());
    }
}
