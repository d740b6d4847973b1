//! Postgres adapter.
//!
//! Opens a short-lived session per operation; the orchestrator is
//! single-owner for the duration of a run, so there is no pool.

use camino::Utf8Path;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};

use crate::adapter::{Adapter, Dialect};
use crate::config::{Credentials, SchemaNames};
use crate::driver::DiffDriver;
use crate::engine::{DiffEngine, EngineCommand, EngineConfig};
use crate::model::CompiledModel;
use crate::reorder::ViewDefinition;
use crate::{Error, Result};

/// Quote a SQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub struct PostgresAdapter {
    credentials: Credentials,
    schemas: SchemaNames,
}

impl PostgresAdapter {
    pub fn new(credentials: Credentials, schemas: SchemaNames) -> Self {
        PostgresAdapter {
            credentials,
            schemas,
        }
    }

    fn conn_string(&self, database: &str) -> String {
        let c = &self.credentials;
        let mut parts = format!(
            "host={} port={} user={} dbname={}",
            c.host, c.port, c.user, database
        );
        if !c.password.is_empty() {
            parts.push_str(&format!(" password={}", c.password));
        }
        parts
    }

    fn jdbc_url(&self) -> String {
        let c = &self.credentials;
        let mut url = format!("jdbc:postgresql://{}:{}/{}", c.host, c.port, c.database);
        if c.sslrootcert.is_some() {
            url.push_str("?ssl=true");
        }
        url
    }

    /// Open a session against `database`, spawning the connection task.
    async fn connect_to(&self, database: &str) -> Result<Client> {
        let (client, connection) =
            tokio_postgres::connect(&self.conn_string(database), NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "database connection error");
            }
        });
        Ok(client)
    }

    async fn connect(&self) -> Result<Client> {
        self.connect_to(&self.credentials.database).await
    }

    /// Drop and recreate a working schema, leaving it empty.
    async fn recreate_schema(&self, client: &Client, schema: &str) -> Result<()> {
        debug!(schema, "recreating working schema");
        client
            .batch_execute(&format!(
                "DROP SCHEMA IF EXISTS {0} CASCADE; CREATE SCHEMA {0};",
                quote_ident(schema)
            ))
            .await?;
        Ok(())
    }
}

impl Adapter for PostgresAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn engine_config_for(&self, command: EngineCommand) -> EngineConfig {
        let url = self.jdbc_url();
        let mut config = EngineConfig {
            url: url.clone(),
            username: self.credentials.user.clone(),
            password: self.credentials.password.clone(),
            ..Default::default()
        };
        match command {
            EngineCommand::Diff | EngineCommand::DiffChangelog => {
                config.reference_url = Some(url);
                config.reference_username = Some(config.username.clone());
                config.reference_password = Some(config.password.clone());
                config.default_schema_name = Some(self.schemas.default.clone());
                config.reference_default_schema_name = Some(self.schemas.reference.clone());
            }
            EngineCommand::Update | EngineCommand::UpdateSql | EngineCommand::DropAll => {}
        }
        config
    }

    async fn get_view_definition(&self, view: &str) -> Result<Option<ViewDefinition>> {
        let client = self.connect().await?;
        let row = client
            .query_opt(
                "SELECT definition FROM pg_views WHERE schemaname = $1 AND viewname = $2",
                &[&self.schemas.default, &view],
            )
            .await?;
        Ok(row.map(|row| {
            let definition: String = row.get(0);
            ViewDefinition {
                name: view.to_string(),
                // Names in the definition come back qualified with the
                // default schema; strip that so dependency matching sees the
                // same names the changelog carries.
                definition: definition.replace(&format!("{}.", self.schemas.default), ""),
            }
        }))
    }

    async fn synchronize_clone<E: DiffEngine>(
        &self,
        driver: &DiffDriver<'_, E>,
        tmp_file: &Utf8Path,
    ) -> Result<()> {
        info!(schema = %self.schemas.clone, "synchronizing clone schema");
        let client = self.connect().await?;
        self.recreate_schema(&client, &self.schemas.clone).await?;
        drop(client);

        // Replay the default schema's current structure into the clone.
        let mut config = self.engine_config_for(EngineCommand::DiffChangelog);
        config.default_schema_name = Some(self.schemas.clone.clone());
        config.reference_default_schema_name = Some(self.schemas.default.clone());
        let changelog = driver.diff_changelog(config, tmp_file).await?;
        changelog.to_file(tmp_file)?;

        let mut config = self.engine_config_for(EngineCommand::Update);
        config.default_schema_name = Some(self.schemas.clone.clone());
        driver.update(config, tmp_file).await?;

        std::fs::remove_file(tmp_file).map_err(|e| Error::io(tmp_file, e))?;
        Ok(())
    }

    async fn drop_views_from_clone(&self, model: &CompiledModel) -> Result<()> {
        let views = model.views();
        debug!(count = views.len(), schema = %self.schemas.clone, "dropping model views from clone");
        let client = self.connect().await?;
        // Compiled order puts dependencies first; drop dependents first.
        for view in views.iter().rev() {
            client
                .batch_execute(&format!(
                    "DROP VIEW IF EXISTS {}.{}",
                    quote_ident(&self.schemas.clone),
                    quote_ident(&view.name)
                ))
                .await?;
        }
        Ok(())
    }

    async fn deploy_to_reference(&self, model: &CompiledModel) -> Result<()> {
        info!(schema = %self.schemas.reference, "deploying model to reference schema");
        let client = self.connect().await?;
        self.recreate_schema(&client, &self.schemas.reference).await?;
        client
            .batch_execute(&format!(
                "SET search_path TO {}",
                quote_ident(&self.schemas.reference)
            ))
            .await?;
        for statement in &model.statements {
            client.batch_execute(statement).await?;
        }
        Ok(())
    }

    async fn create_database(&self) -> Result<()> {
        // Connect to the maintenance database, not the target.
        let client = self.connect_to("postgres").await?;
        let database = &self.credentials.database;
        match client
            .batch_execute(&format!("CREATE DATABASE {}", quote_ident(database)))
            .await
        {
            Ok(()) => {
                info!(database, "created database");
                Ok(())
            }
            Err(e) => match e.code() {
                Some(&SqlState::DUPLICATE_DATABASE) => {
                    info!(database, "database already present");
                    Ok(())
                }
                // Concurrent creation attempt lost the race; the database
                // exists now, which is all we wanted.
                Some(&SqlState::UNIQUE_VIOLATION) => Ok(()),
                _ => Err(e.into()),
            },
        }
    }

    async fn drop_entities(&self, model: &CompiledModel, views_only: bool) -> Result<()> {
        let mut client = self.connect().await?;
        let tx = client.transaction().await?;
        let schema = quote_ident(&self.schemas.default);
        for view in model.views().iter().rev() {
            tx.batch_execute(&format!(
                "DROP VIEW IF EXISTS {}.{}",
                schema,
                quote_ident(&view.name)
            ))
            .await?;
        }
        if !views_only {
            for table in model.tables().iter().rev() {
                tx.batch_execute(&format!(
                    "DROP TABLE IF EXISTS {}.{} CASCADE",
                    schema,
                    quote_ident(&table.name)
                ))
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
