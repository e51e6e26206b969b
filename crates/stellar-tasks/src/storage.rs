//! Persistence layer: SQLite via `sqlx`, WAL journal mode, pooled
//! connections. One table per collection (`port_scan_tasks`,
//! `port_scan_results`, `vuln_scan_tasks`, `pocs`, `poc_results`,
//! `vulnerabilities`, `assets`), with upsert-by-merge-key semantics via
//! SQLite's `ON CONFLICT … DO UPDATE`.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Row};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use stellar_core::{
    Aggregate, Dialect, Error, Poc, PocResult, PocTarget, PortAsset, Protocol, Result, ScanConfig,
    ScanResult, Severity, Task, TaskKind, TaskStatus, VulnStatus, Vulnerability,
};
use tracing::debug;
use uuid::Uuid;

/// Serialize an enum/struct to a bare (unquoted, for simple string enums)
/// JSON-text column value.
fn to_text<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(json.trim_matches('"').to_string())
}

fn enum_from_text<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(&format!("\"{text}\"")).map_err(Error::from)
}

fn json_from_text<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(Error::from)
}

fn protocol_from_str(s: &str) -> Protocol {
    match s {
        "udp" => Protocol::Udp,
        _ => Protocol::Tcp,
    }
}

fn task_table(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Port => "port_scan_tasks",
        TaskKind::Vuln => "vuln_scan_tasks",
    }
}

pub struct Storage {
    pub(crate) pool: SqlitePool,
}

impl Storage {
    /// Open (creating if missing) a SQLite database with WAL journaling and
    /// a pooled connection, initializing the schema on first use.
    pub async fn new<P: AsRef<Path>>(database_path: P, max_connections: u32) -> Result<Self> {
        let path_str = database_path.as_ref().to_string_lossy().to_string();

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path_str}"))
            .map_err(|e| Error::StorageError(format!("invalid database path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| Error::StorageError(format!("failed to connect: {e}")))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&self.pool).await.ok();
        sqlx::query("PRAGMA cache_size = -64000").execute(&self.pool).await.ok();
        sqlx::query("PRAGMA busy_timeout = 10000").execute(&self.pool).await.ok();

        for table in ["port_scan_tasks", "vuln_scan_tasks"] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL,
                    targets_json TEXT NOT NULL,
                    config_json TEXT NOT NULL,
                    status TEXT NOT NULL,
                    progress REAL NOT NULL,
                    created_at TIMESTAMP NOT NULL,
                    started_at TIMESTAMP,
                    completed_at TIMESTAMP,
                    error TEXT,
                    result_summary_json TEXT
                )
                "#
            ))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::StorageError(format!("failed to create {table}: {e}")))?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS port_scan_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                protocol TEXT NOT NULL,
                status TEXT NOT NULL,
                service TEXT,
                product TEXT,
                version TEXT,
                banner TEXT,
                asset_id TEXT,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                UNIQUE(task_id, host, port, protocol)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to create port_scan_results: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                protocol TEXT NOT NULL,
                service TEXT,
                version TEXT,
                banner TEXT,
                tags_json TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                UNIQUE(project_id, host, port, protocol)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to create assets: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vulnerabilities (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                asset_id TEXT NOT NULL DEFAULT '',
                task_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                affected_host TEXT NOT NULL,
                affected_port INTEGER,
                affected_url TEXT NOT NULL DEFAULT '',
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                request TEXT NOT NULL,
                response TEXT NOT NULL,
                references_json TEXT NOT NULL,
                discovered_at TIMESTAMP NOT NULL,
                UNIQUE(project_id, asset_id, title, affected_url, affected_host)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to create vulnerabilities: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pocs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                script TEXT NOT NULL,
                dialect TEXT NOT NULL,
                severity TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                required_params_json TEXT NOT NULL,
                default_params_json TEXT NOT NULL,
                enabled INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to create pocs: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poc_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                poc_id TEXT NOT NULL,
                task_id TEXT,
                target_json TEXT NOT NULL,
                success INTEGER NOT NULL,
                payload TEXT NOT NULL,
                request TEXT NOT NULL,
                response TEXT NOT NULL,
                output TEXT NOT NULL,
                error TEXT NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                params_json TEXT NOT NULL,
                data_json TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to create poc_results: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vuln_project_created ON vulnerabilities(project_id, discovered_at DESC)").execute(&self.pool).await.ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vuln_task ON vulnerabilities(task_id)").execute(&self.pool).await.ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vuln_severity ON vulnerabilities(severity)").execute(&self.pool).await.ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vuln_status ON vulnerabilities(status)").execute(&self.pool).await.ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vuln_affected_host ON vulnerabilities(affected_host)").execute(&self.pool).await.ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_poc_results_task_created ON poc_results(task_id, created_at DESC)").execute(&self.pool).await.ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_poc_results_poc ON poc_results(poc_id)").execute(&self.pool).await.ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_poc_results_success ON poc_results(success)").execute(&self.pool).await.ok();

        debug!("stellar-tasks schema initialized");
        Ok(())
    }

    // ---- Task persistence ----------------------------------------------

    pub async fn save_task(&self, task: &Task) -> Result<()> {
        let table = task_table(task.kind);
        let targets_json = serde_json::to_string(&task.targets)?;
        let config_json = serde_json::to_string(&task.config)?;
        let status = to_text(&task.status)?;
        let summary_json = task
            .result_summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {table}
                (id, project_id, targets_json, config_json, status, progress,
                 created_at, started_at, completed_at, error, result_summary_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                targets_json = excluded.targets_json,
                config_json = excluded.config_json,
                status = excluded.status,
                progress = excluded.progress,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                error = excluded.error,
                result_summary_json = excluded.result_summary_json
            "#
        ))
        .bind(task.id.to_string())
        .bind(&task.project_id)
        .bind(targets_json)
        .bind(config_json)
        .bind(status)
        .bind(task.progress)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(&task.error)
        .bind(summary_json)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to save task: {e}")))?;

        Ok(())
    }

    pub async fn get_task(&self, kind: TaskKind, id: Uuid) -> Result<Option<Task>> {
        let table = task_table(kind);
        let row = sqlx::query(&format!("SELECT * FROM {table} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::StorageError(format!("failed to fetch task: {e}")))?;

        match row {
            Some(row) => Ok(Some(self.row_to_task(kind, &row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_tasks(
        &self,
        kind: TaskKind,
        project_id: Option<&str>,
        limit: i64,
        skip: i64,
    ) -> Result<Vec<Task>> {
        let table = task_table(kind);
        let query = match project_id {
            Some(_) => format!(
                "SELECT * FROM {table} WHERE project_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?"
            ),
            None => format!("SELECT * FROM {table} ORDER BY created_at DESC LIMIT ? OFFSET ?"),
        };

        let mut q = sqlx::query(&query);
        if let Some(project_id) = project_id {
            q = q.bind(project_id);
        }
        q = q.bind(limit).bind(skip);

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::StorageError(format!("failed to list tasks: {e}")))?;

        rows.iter().map(|row| self.row_to_task(kind, row)).collect()
    }

    fn row_to_task(&self, kind: TaskKind, row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
        let id: String = row.get("id");
        let project_id: String = row.get("project_id");
        let targets_json: String = row.get("targets_json");
        let config_json: String = row.get("config_json");
        let status: String = row.get("status");
        let progress: f64 = row.get("progress");
        let created_at: DateTime<Utc> = row.get("created_at");
        let started_at: Option<DateTime<Utc>> = row.get("started_at");
        let completed_at: Option<DateTime<Utc>> = row.get("completed_at");
        let error: Option<String> = row.get("error");
        let summary_json: Option<String> = row.get("result_summary_json");

        Ok(Task {
            id: Uuid::parse_str(&id).map_err(|e| Error::StorageError(e.to_string()))?,
            project_id,
            kind,
            targets: json_from_text(&targets_json)?,
            config: json_from_text::<ScanConfig>(&config_json)?,
            status: enum_from_text::<TaskStatus>(&status)?,
            progress,
            created_at,
            started_at,
            completed_at,
            error,
            result_summary: summary_json.map(|s| json_from_text::<Aggregate>(&s)).transpose()?,
        })
    }

    // ---- Scan results -----------------------------------------------------

    /// Upsert by (task_id, host, port, protocol), the scan result's merge
    /// key.
    pub async fn upsert_scan_result(&self, result: &ScanResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO port_scan_results
                (task_id, project_id, host, port, protocol, status, service,
                 product, version, banner, asset_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id, host, port, protocol) DO UPDATE SET
                status = excluded.status,
                service = excluded.service,
                product = excluded.product,
                version = excluded.version,
                banner = excluded.banner,
                asset_id = excluded.asset_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(result.task_id.to_string())
        .bind(&result.project_id)
        .bind(&result.host)
        .bind(result.port as i64)
        .bind(to_text(&result.protocol)?)
        .bind(to_text(&result.status)?)
        .bind(&result.service)
        .bind(&result.product)
        .bind(&result.version)
        .bind(&result.banner)
        .bind(result.asset_id.map(|id| id.to_string()))
        .bind(result.created_at)
        .bind(result.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to upsert scan result: {e}")))?;

        Ok(())
    }

    pub async fn get_scan_results(&self, task_id: Uuid, limit: i64, skip: i64) -> Result<Vec<ScanResult>> {
        let rows = sqlx::query(
            "SELECT * FROM port_scan_results WHERE task_id = ? ORDER BY host, port LIMIT ? OFFSET ?",
        )
        .bind(task_id.to_string())
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to fetch scan results: {e}")))?;

        rows.iter().map(Self::row_to_scan_result).collect()
    }

    fn row_to_scan_result(row: &sqlx::sqlite::SqliteRow) -> Result<ScanResult> {
        let task_id: String = row.get("task_id");
        let protocol: String = row.get("protocol");
        let status: String = row.get("status");
        let asset_id: Option<String> = row.get("asset_id");

        Ok(ScanResult {
            task_id: Uuid::parse_str(&task_id).map_err(|e| Error::StorageError(e.to_string()))?,
            project_id: row.get("project_id"),
            host: row.get("host"),
            port: row.get::<i64, _>("port") as u16,
            protocol: protocol_from_str(&protocol),
            status: enum_from_text(&status)?,
            service: row.get("service"),
            product: row.get("product"),
            version: row.get("version"),
            banner: row.get("banner"),
            asset_id: asset_id
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .map_err(|e| Error::StorageError(e.to_string()))?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    /// Per-task aggregate rollup: open-port count, unique affected-host
    /// count, and service histogram, recomputed as a one-shot aggregation
    /// query rather than a mutating state machine.
    pub async fn aggregate_port_scan(&self, task_id: Uuid) -> Result<Aggregate> {
        let open_ports: i64 = sqlx::query(
            "SELECT COUNT(*) FROM port_scan_results WHERE task_id = ? AND status = 'open'",
        )
        .bind(task_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::StorageError(e.to_string()))?
        .get(0);

        let unique_hosts: i64 = sqlx::query(
            "SELECT COUNT(DISTINCT host) FROM port_scan_results WHERE task_id = ? AND status = 'open'",
        )
        .bind(task_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::StorageError(e.to_string()))?
        .get(0);

        let rows = sqlx::query(
            "SELECT service, COUNT(*) FROM port_scan_results WHERE task_id = ? AND status = 'open' AND service IS NOT NULL GROUP BY service",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::StorageError(e.to_string()))?;

        let mut service_histogram = std::collections::BTreeMap::new();
        for row in rows {
            let service: String = row.get(0);
            let count: i64 = row.get(1);
            service_histogram.insert(service, count as u64);
        }

        let vuln_rows = sqlx::query(
            "SELECT severity, COUNT(*) FROM vulnerabilities WHERE task_id = ? GROUP BY severity",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::StorageError(e.to_string()))?;

        let mut by_severity = std::collections::BTreeMap::new();
        for row in vuln_rows {
            let severity: String = row.get(0);
            let count: i64 = row.get(1);
            by_severity.insert(severity, count as u64);
        }

        Ok(Aggregate {
            by_severity,
            by_type: std::collections::BTreeMap::new(),
            unique_affected_hosts: unique_hosts as u64,
            open_ports: open_ports as u64,
            service_histogram,
        })
    }

    // ---- Assets -------------------------------------------------------

    /// Upsert by (project, host, port, protocol), tags set-unioned with the
    /// incoming set. Returns the asset's id.
    pub async fn upsert_asset(
        &self,
        project_id: &str,
        host: &str,
        port: u16,
        protocol: Protocol,
        service: Option<&str>,
        version: Option<&str>,
        banner: Option<&str>,
        new_tags: &[String],
    ) -> Result<Uuid> {
        let existing = sqlx::query(
            "SELECT id, tags_json FROM assets WHERE project_id = ? AND host = ? AND port = ? AND protocol = ?",
        )
        .bind(project_id)
        .bind(host)
        .bind(port as i64)
        .bind(to_text(&protocol)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::StorageError(e.to_string()))?;

        let now = Utc::now();

        if let Some(row) = existing {
            let id: String = row.get(0);
            let tags_json: String = row.get(1);
            let mut tags: std::collections::BTreeSet<String> = json_from_text(&tags_json)?;
            tags.extend(new_tags.iter().cloned());
            let merged_json = serde_json::to_string(&tags)?;

            sqlx::query(
                "UPDATE assets SET service = ?, version = ?, banner = ?, tags_json = ?, updated_at = ? WHERE id = ?",
            )
            .bind(service)
            .bind(version)
            .bind(banner)
            .bind(merged_json)
            .bind(now)
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::StorageError(e.to_string()))?;

            Uuid::parse_str(&id).map_err(|e| Error::StorageError(e.to_string()))
        } else {
            let id = Uuid::new_v4();
            let tags: std::collections::BTreeSet<String> = new_tags.iter().cloned().collect();
            let tags_json = serde_json::to_string(&tags)?;

            sqlx::query(
                r#"
                INSERT INTO assets
                    (id, project_id, host, port, protocol, service, version, banner, tags_json, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id.to_string())
            .bind(project_id)
            .bind(host)
            .bind(port as i64)
            .bind(to_text(&protocol)?)
            .bind(service)
            .bind(version)
            .bind(banner)
            .bind(tags_json)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::StorageError(e.to_string()))?;

            Ok(id)
        }
    }

    pub async fn get_asset(&self, id: Uuid) -> Result<Option<PortAsset>> {
        let row = sqlx::query("SELECT * FROM assets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::StorageError(e.to_string()))?;

        row.map(Self::row_to_asset).transpose()
    }

    fn row_to_asset(row: sqlx::sqlite::SqliteRow) -> Result<PortAsset> {
        let id: String = row.get("id");
        let protocol: String = row.get("protocol");
        let tags_json: String = row.get("tags_json");

        Ok(PortAsset {
            id: Uuid::parse_str(&id).map_err(|e| Error::StorageError(e.to_string()))?,
            project_id: row.get("project_id"),
            host: row.get("host"),
            port: row.get::<i64, _>("port") as u16,
            protocol: protocol_from_str(&protocol),
            service: row.get("service"),
            version: row.get("version"),
            banner: row.get("banner"),
            tags: json_from_text(&tags_json)?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    // ---- Vulnerabilities ------------------------------------------------

    /// Upsert by (project, asset, title, affectedUrl, affectedHost).
    pub async fn upsert_vulnerability(&self, vuln: &Vulnerability) -> Result<()> {
        let references_json = serde_json::to_string(&vuln.references)?;

        sqlx::query(
            r#"
            INSERT INTO vulnerabilities
                (id, project_id, asset_id, task_id, title, description, affected_host,
                 affected_port, affected_url, severity, status, payload, request, response,
                 references_json, discovered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(project_id, asset_id, title, affected_url, affected_host) DO UPDATE SET
                description = excluded.description,
                payload = excluded.payload,
                request = excluded.request,
                response = excluded.response,
                references_json = excluded.references_json
            "#,
        )
        .bind(vuln.id.to_string())
        .bind(&vuln.project_id)
        .bind(vuln.asset_id.map(|id| id.to_string()).unwrap_or_default())
        .bind(vuln.task_id.to_string())
        .bind(&vuln.title)
        .bind(&vuln.description)
        .bind(&vuln.affected_host)
        .bind(vuln.affected_port.map(|p| p as i64))
        .bind(vuln.affected_url.clone().unwrap_or_default())
        .bind(to_text(&vuln.severity)?)
        .bind(to_text(&vuln.status)?)
        .bind(&vuln.payload)
        .bind(&vuln.request)
        .bind(&vuln.response)
        .bind(references_json)
        .bind(vuln.discovered_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to upsert vulnerability: {e}")))?;

        Ok(())
    }

    pub async fn list_vulnerabilities(&self, project_id: &str, limit: i64, skip: i64) -> Result<Vec<Vulnerability>> {
        let rows = sqlx::query(
            "SELECT * FROM vulnerabilities WHERE project_id = ? ORDER BY discovered_at DESC LIMIT ? OFFSET ?",
        )
        .bind(project_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::StorageError(e.to_string()))?;

        rows.into_iter().map(Self::row_to_vulnerability).collect()
    }

    fn row_to_vulnerability(row: sqlx::sqlite::SqliteRow) -> Result<Vulnerability> {
        let id: String = row.get("id");
        let asset_id: String = row.get("asset_id");
        let task_id: String = row.get("task_id");
        let affected_url: String = row.get("affected_url");
        let severity: String = row.get("severity");
        let status: String = row.get("status");
        let references_json: String = row.get("references_json");

        Ok(Vulnerability {
            id: Uuid::parse_str(&id).map_err(|e| Error::StorageError(e.to_string()))?,
            project_id: row.get("project_id"),
            asset_id: if asset_id.is_empty() {
                None
            } else {
                Some(Uuid::parse_str(&asset_id).map_err(|e| Error::StorageError(e.to_string()))?)
            },
            task_id: Uuid::parse_str(&task_id).map_err(|e| Error::StorageError(e.to_string()))?,
            title: row.get("title"),
            description: row.get("description"),
            affected_host: row.get("affected_host"),
            affected_port: row.get::<Option<i64>, _>("affected_port").map(|p| p as u16),
            affected_url: if affected_url.is_empty() { None } else { Some(affected_url) },
            severity: enum_from_text(&severity)?,
            status: enum_from_text(&status)?,
            payload: row.get("payload"),
            request: row.get("request"),
            response: row.get("response"),
            references: json_from_text(&references_json)?,
            discovered_at: row.get("discovered_at"),
        })
    }

    // ---- POCs -----------------------------------------------------------

    pub async fn save_poc(&self, poc: &Poc) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pocs (id, name, script, dialect, severity, tags_json,
                               required_params_json, default_params_json, enabled)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                script = excluded.script,
                dialect = excluded.dialect,
                severity = excluded.severity,
                tags_json = excluded.tags_json,
                required_params_json = excluded.required_params_json,
                default_params_json = excluded.default_params_json,
                enabled = excluded.enabled
            "#,
        )
        .bind(poc.id.to_string())
        .bind(&poc.name)
        .bind(&poc.script)
        .bind(to_text(&poc.dialect)?)
        .bind(to_text(&poc.severity)?)
        .bind(serde_json::to_string(&poc.tags)?)
        .bind(serde_json::to_string(&poc.required_params)?)
        .bind(serde_json::to_string(&poc.default_params)?)
        .bind(poc.enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to save poc: {e}")))?;

        Ok(())
    }

    pub async fn get_poc(&self, id: Uuid) -> Result<Option<Poc>> {
        let row = sqlx::query("SELECT * FROM pocs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::StorageError(e.to_string()))?;

        row.map(Self::row_to_poc).transpose()
    }

    fn row_to_poc(row: sqlx::sqlite::SqliteRow) -> Result<Poc> {
        let id: String = row.get("id");
        let dialect: String = row.get("dialect");
        let severity: String = row.get("severity");
        let tags_json: String = row.get("tags_json");
        let required_params_json: String = row.get("required_params_json");
        let default_params_json: String = row.get("default_params_json");

        Ok(Poc {
            id: Uuid::parse_str(&id).map_err(|e| Error::StorageError(e.to_string()))?,
            name: row.get("name"),
            script: row.get("script"),
            dialect: enum_from_text(&dialect)?,
            severity: enum_from_text(&severity)?,
            tags: json_from_text(&tags_json)?,
            required_params: json_from_text(&required_params_json)?,
            default_params: json_from_text(&default_params_json)?,
            enabled: row.get("enabled"),
        })
    }

    // ---- POC results ------------------------------------------------------

    pub async fn insert_poc_result(&self, result: &PocResult, task_id: Option<Uuid>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO poc_results
                (poc_id, task_id, target_json, success, payload, request, response,
                 output, error, execution_time_ms, params_json, data_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.poc_id.to_string())
        .bind(task_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&result.target)?)
        .bind(result.success)
        .bind(&result.payload)
        .bind(&result.request)
        .bind(&result.response)
        .bind(&result.output)
        .bind(&result.error)
        .bind(result.execution_time_ms as i64)
        .bind(serde_json::to_string(&result.params)?)
        .bind(serde_json::to_string(&result.data)?)
        .bind(result.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StorageError(format!("failed to insert poc result: {e}")))?;

        Ok(())
    }

    pub async fn get_poc_results(&self, task_id: Uuid, limit: i64, skip: i64) -> Result<Vec<PocResult>> {
        let rows = sqlx::query(
            "SELECT * FROM poc_results WHERE task_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(task_id.to_string())
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::StorageError(e.to_string()))?;

        rows.into_iter().map(Self::row_to_poc_result).collect()
    }

    fn row_to_poc_result(row: sqlx::sqlite::SqliteRow) -> Result<PocResult> {
        let poc_id: String = row.get("poc_id");
        let target_json: String = row.get("target_json");
        let params_json: String = row.get("params_json");
        let data_json: String = row.get("data_json");

        Ok(PocResult {
            poc_id: Uuid::parse_str(&poc_id).map_err(|e| Error::StorageError(e.to_string()))?,
            target: json_from_text::<PocTarget>(&target_json)?,
            success: row.get("success"),
            payload: row.get("payload"),
            request: row.get("request"),
            response: row.get("response"),
            output: row.get("output"),
            error: row.get("error"),
            execution_time_ms: row.get::<i64, _>("execution_time_ms") as u64,
            params: json_from_text(&params_json)?,
            data: json_from_text(&data_json)?,
            created_at: row.get("created_at"),
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use stellar_core::{ScanTypeConfig, TaskKind};

    async fn storage() -> Storage {
        Storage::new(":memory:", 5).await.unwrap()
    }

    fn task() -> Task {
        Task::new(
            "proj-1",
            TaskKind::Port,
            vec!["10.0.0.1".to_string()],
            ScanConfig {
                ports: "80".to_string(),
                scan_type: ScanTypeConfig::Tcp,
                scan_method: stellar_core::ScanMethod::Connect,
                concurrency: 10,
                rate_limit: None,
                timeout_secs: 3,
                exclude_hosts: Vec::new(),
                service_detection: true,
            },
        )
    }

    #[tokio::test]
    async fn test_save_and_get_task_roundtrip() {
        let storage = storage().await;
        let task = task();
        storage.save_task(&task).await.unwrap();

        let loaded = storage.get_task(TaskKind::Port, task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.project_id, "proj-1");
    }

    #[tokio::test]
    async fn test_upsert_scan_result_is_idempotent_on_merge_key() {
        let storage = storage().await;
        let task_id = Uuid::new_v4();
        let result = ScanResult::new(task_id, "proj-1", "10.0.0.1", 80, Protocol::Tcp, stellar_core::PortStatus::Open);
        storage.upsert_scan_result(&result).await.unwrap();
        storage.upsert_scan_result(&result).await.unwrap();

        let results = storage.get_scan_results(task_id, 100, 0).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_asset_unions_tags() {
        let storage = storage().await;
        let id1 = storage
            .upsert_asset("proj-1", "10.0.0.1", 80, Protocol::Tcp, Some("http"), None, None, &["tcp".to_string(), "http".to_string()])
            .await
            .unwrap();
        let id2 = storage
            .upsert_asset("proj-1", "10.0.0.1", 80, Protocol::Tcp, Some("http"), None, None, &["extra-tag".to_string()])
            .await
            .unwrap();
        assert_eq!(id1, id2);

        let asset = storage.get_asset(id1).await.unwrap().unwrap();
        assert!(asset.tags.contains(&"tcp".to_string()));
        assert!(asset.tags.contains(&"extra-tag".to_string()));
    }

    #[tokio::test]
    async fn test_aggregate_port_scan_counts_open_ports() {
        let storage = storage().await;
        let task_id = Uuid::new_v4();
        storage
            .upsert_scan_result(&ScanResult::new(task_id, "proj-1", "10.0.0.1", 80, Protocol::Tcp, stellar_core::PortStatus::Open))
            .await
            .unwrap();
        storage
            .upsert_scan_result(&ScanResult::new(task_id, "proj-1", "10.0.0.1", 443, Protocol::Tcp, stellar_core::PortStatus::Closed))
            .await
            .unwrap();

        let aggregate = storage.aggregate_port_scan(task_id).await.unwrap();
        assert_eq!(aggregate.open_ports, 1);
        assert_eq!(aggregate.unique_affected_hosts, 1);
    }

    #[tokio::test]
    async fn test_poc_crud_roundtrip() {
        let storage = storage().await;
        let poc = Poc {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            script: "print('x')".to_string(),
            dialect: Dialect::Python,
            severity: Severity::Medium,
            tags: vec!["web".to_string()],
            required_params: Vec::new(),
            default_params: BTreeMap::new(),
            enabled: true,
        };
        storage.save_poc(&poc).await.unwrap();
        let loaded = storage.get_poc(poc.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "test");
        assert_eq!(loaded.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_vulnerability_upsert_merges_on_key() {
        let storage = storage().await;
        let task_id = Uuid::new_v4();
        let mut vuln = Vulnerability {
            id: Uuid::new_v4(),
            project_id: "proj-1".to_string(),
            asset_id: None,
            task_id,
            title: "SQLi".to_string(),
            description: "first".to_string(),
            affected_host: "10.0.0.1".to_string(),
            affected_port: Some(80),
            affected_url: Some("http://10.0.0.1/a".to_string()),
            severity: Severity::High,
            status: VulnStatus::New,
            payload: String::new(),
            request: String::new(),
            response: String::new(),
            references: Vec::new(),
            discovered_at: Utc::now(),
        };
        storage.upsert_vulnerability(&vuln).await.unwrap();
        vuln.description = "updated".to_string();
        storage.upsert_vulnerability(&vuln).await.unwrap();

        let list = storage.list_vulnerabilities("proj-1", 10, 0).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].description, "updated");
    }
}
