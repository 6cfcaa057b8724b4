//! Database client collaborators.
//!
//! The restore engine talks to database servers exclusively through
//! [`DatabaseClient`]; it never speaks a wire protocol itself. The shipped
//! implementations drive the vendor client tools (`psql`, `pg_restore`,
//! `sqlcmd`) through the process execution service.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::TemplateMetadata;
use crate::error::DeployError;
use crate::process::{ExecutionOptions, ProcessExecutor};

/// Operations the restore engine needs from a database server.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn test_connection(&self) -> Result<(), DeployError>;
    async fn database_exists(&self, name: &str) -> Result<bool, DeployError>;
    async fn create_database(&self, name: &str) -> Result<(), DeployError>;
    async fn drop_database(&self, name: &str) -> Result<(), DeployError>;
    /// Clone a template database into a new deployment database.
    async fn create_from_template(&self, template: &str, name: &str) -> Result<(), DeployError>;
    async fn set_as_template(&self, name: &str) -> Result<(), DeployError>;
    async fn set_comment(&self, name: &str, comment: &str) -> Result<(), DeployError>;
    /// Scan existing databases for a template whose metadata comment matches
    /// the source identity. Returns the template database name.
    async fn find_template_by_source(&self, source: &str) -> Result<Option<String>, DeployError>;
    /// Invoke the engine's restore tool against an existing database.
    async fn restore_from_backup(&self, name: &str, backup: &Path) -> Result<(), DeployError>;
}

/// PostgreSQL client backed by `psql` and `pg_restore`.
pub struct PostgresClient {
    executor: ProcessExecutor,
    host: String,
    port: u16,
    username: String,
    password: String,
    pg_tools_path: Option<PathBuf>,
}

impl PostgresClient {
    pub fn new(
        executor: ProcessExecutor,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            pg_tools_path: None,
        }
    }

    /// Use client tools from a specific directory instead of PATH.
    pub fn with_tools_path(mut self, dir: Option<PathBuf>) -> Self {
        self.pg_tools_path = dir;
        self
    }

    fn tool(&self, name: &str) -> String {
        match &self.pg_tools_path {
            Some(dir) => dir.join(name).to_string_lossy().into_owned(),
            None => name.to_string(),
        }
    }

    async fn run_sql(&self, sql: &str) -> Result<String, DeployError> {
        let options = ExecutionOptions::new(
            self.tool("psql"),
            [
                "-h".to_string(),
                self.host.clone(),
                "-p".to_string(),
                self.port.to_string(),
                "-U".to_string(),
                self.username.clone(),
                "-d".to_string(),
                "postgres".to_string(),
                "-t".to_string(),
                "-A".to_string(),
                // Field separator that cannot appear in metadata comments.
                "-F".to_string(),
                "\t".to_string(),
                "-c".to_string(),
                sql.to_string(),
            ],
        )
        .env("PGPASSWORD", self.password.clone());

        let result = self.executor.execute_and_capture(options).await;
        if !result.started {
            return Err(DeployError::ProcessStartFailed {
                program: self.tool("psql"),
                message: result.stderr,
            });
        }
        if result.exit_code != Some(0) {
            return Err(anyhow::anyhow!(
                "psql exited with code {:?}: {}",
                result.exit_code,
                result.stderr.trim()
            )
            .into());
        }
        Ok(result.stdout)
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    async fn test_connection(&self) -> Result<(), DeployError> {
        self.run_sql("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|err| DeployError::ConnectionTestFailed {
                message: format!(
                    "{err}. Make sure PostgreSQL is running at {}:{} and the credentials are correct",
                    self.host, self.port
                ),
            })
    }

    async fn database_exists(&self, name: &str) -> Result<bool, DeployError> {
        let output = self
            .run_sql(&format!(
                "SELECT 1 FROM pg_database WHERE datname = '{name}'"
            ))
            .await?;
        Ok(output.trim() == "1")
    }

    async fn create_database(&self, name: &str) -> Result<(), DeployError> {
        self.run_sql(&format!("CREATE DATABASE \"{name}\"")).await?;
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), DeployError> {
        self.run_sql(&format!("DROP DATABASE IF EXISTS \"{name}\" WITH (FORCE)"))
            .await?;
        Ok(())
    }

    async fn create_from_template(&self, template: &str, name: &str) -> Result<(), DeployError> {
        self.run_sql(&format!(
            "CREATE DATABASE \"{name}\" TEMPLATE \"{template}\""
        ))
        .await?;
        Ok(())
    }

    async fn set_as_template(&self, name: &str) -> Result<(), DeployError> {
        self.run_sql(&format!(
            "UPDATE pg_database SET datistemplate = true WHERE datname = '{name}'"
        ))
        .await?;
        Ok(())
    }

    async fn set_comment(&self, name: &str, comment: &str) -> Result<(), DeployError> {
        let escaped = comment.replace('\'', "''");
        self.run_sql(&format!("COMMENT ON DATABASE \"{name}\" IS '{escaped}'"))
            .await?;
        Ok(())
    }

    async fn find_template_by_source(&self, source: &str) -> Result<Option<String>, DeployError> {
        let output = self
            .run_sql(
                "SELECT datname, shobj_description(oid, 'pg_database') \
                 FROM pg_database WHERE datistemplate",
            )
            .await?;

        for line in output.lines() {
            let Some((name, comment)) = line.split_once('\t') else {
                continue;
            };
            if let Some(metadata) = TemplateMetadata::parse(comment.trim())
                && metadata.matches_source(source)
            {
                return Ok(Some(name.trim().to_string()));
            }
        }
        Ok(None)
    }

    async fn restore_from_backup(&self, name: &str, backup: &Path) -> Result<(), DeployError> {
        let options = ExecutionOptions::new(
            self.tool("pg_restore"),
            [
                "-h".to_string(),
                self.host.clone(),
                "-p".to_string(),
                self.port.to_string(),
                "-U".to_string(),
                self.username.clone(),
                "-d".to_string(),
                name.to_string(),
                "-v".to_string(),
                backup.to_string_lossy().into_owned(),
                "--no-owner".to_string(),
                "--no-privileges".to_string(),
            ],
        )
        .env("PGPASSWORD", self.password.clone())
        .mirror_output(true)
        // pg_restore narrates progress on stderr.
        .suppress_errors(true);

        let result = self.executor.execute_with_realtime_output(options).await;
        if !result.started {
            return Err(DeployError::ProcessStartFailed {
                program: self.tool("pg_restore"),
                message: result.stderr,
            });
        }
        match result.exit_code {
            Some(0) => Ok(()),
            code => Err(DeployError::RestoreToolFailed {
                exit_code: code.unwrap_or(-1),
            }),
        }
    }
}

/// SQL Server client backed by `sqlcmd`.
///
/// SQL Server has no database-template mechanism; the template operations
/// report unsupported and the restore engine restores `.bak` files
/// directly instead.
pub struct MssqlClient {
    executor: ProcessExecutor,
    host: String,
    port: u16,
    username: String,
    password: String,
    windows_auth: bool,
}

impl MssqlClient {
    pub fn new(
        executor: ProcessExecutor,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        windows_auth: bool,
    ) -> Self {
        Self {
            executor,
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            windows_auth,
        }
    }

    fn server(&self) -> String {
        if self.host.contains('\\') || self.port == 0 {
            self.host.clone()
        } else {
            format!("{},{}", self.host, self.port)
        }
    }

    async fn exec_sql(&self, sql: &str) -> Result<crate::process::ExecutionResult, DeployError> {
        let mut args = vec!["-S".to_string(), self.server(), "-b".to_string()];
        if self.windows_auth {
            args.push("-E".to_string());
        } else {
            args.extend([
                "-U".to_string(),
                self.username.clone(),
                "-P".to_string(),
                self.password.clone(),
            ]);
        }
        args.extend([
            "-h".to_string(),
            "-1".to_string(),
            "-W".to_string(),
            "-Q".to_string(),
            format!("SET NOCOUNT ON; {sql}"),
        ]);

        let result = self
            .executor
            .execute_and_capture(ExecutionOptions::new("sqlcmd", args))
            .await;
        if !result.started {
            return Err(DeployError::ProcessStartFailed {
                program: "sqlcmd".to_string(),
                message: result.stderr,
            });
        }
        Ok(result)
    }

    async fn run_sql(&self, sql: &str) -> Result<String, DeployError> {
        let result = self.exec_sql(sql).await?;
        if result.exit_code != Some(0) {
            return Err(anyhow::anyhow!(
                "sqlcmd exited with code {:?}: {}",
                result.exit_code,
                result.stderr.trim()
            )
            .into());
        }
        Ok(result.stdout)
    }
}

#[async_trait]
impl DatabaseClient for MssqlClient {
    async fn test_connection(&self) -> Result<(), DeployError> {
        self.run_sql("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|err| DeployError::ConnectionTestFailed {
                message: format!(
                    "{err}. Make sure SQL Server is reachable at {} and the credentials are correct",
                    self.server()
                ),
            })
    }

    async fn database_exists(&self, name: &str) -> Result<bool, DeployError> {
        let output = self
            .run_sql(&format!(
                "SELECT 1 FROM sys.databases WHERE name = '{name}'"
            ))
            .await?;
        Ok(output.trim() == "1")
    }

    async fn create_database(&self, name: &str) -> Result<(), DeployError> {
        self.run_sql(&format!("CREATE DATABASE [{name}]")).await?;
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), DeployError> {
        self.run_sql(&format!(
            "ALTER DATABASE [{name}] SET SINGLE_USER WITH ROLLBACK IMMEDIATE; DROP DATABASE [{name}]"
        ))
        .await?;
        Ok(())
    }

    async fn create_from_template(&self, _template: &str, _name: &str) -> Result<(), DeployError> {
        Err(anyhow::anyhow!("template databases are not supported for MSSQL").into())
    }

    async fn set_as_template(&self, _name: &str) -> Result<(), DeployError> {
        Err(anyhow::anyhow!("template databases are not supported for MSSQL").into())
    }

    async fn set_comment(&self, _name: &str, _comment: &str) -> Result<(), DeployError> {
        Err(anyhow::anyhow!("database comments are not supported for MSSQL").into())
    }

    async fn find_template_by_source(&self, _source: &str) -> Result<Option<String>, DeployError> {
        Ok(None)
    }

    async fn restore_from_backup(&self, name: &str, backup: &Path) -> Result<(), DeployError> {
        let disk = backup.to_string_lossy().replace('\'', "''");
        let result = self
            .exec_sql(&format!(
                "RESTORE DATABASE [{name}] FROM DISK = N'{disk}' WITH REPLACE, RECOVERY, STATS = 5"
            ))
            .await?;
        match result.exit_code {
            Some(0) => Ok(()),
            code => Err(DeployError::RestoreToolFailed {
                exit_code: code.unwrap_or(-1),
            }),
        }
    }
}
