//! The application context.
//!
//! [`Application`] is built once at startup and passed to whatever needs
//! database access or one of the domain services. It owns the connection
//! manager, the schema manager and the services, and exposes configuration
//! and environment lookups.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use escolar_common::{Error, Result};
use escolar_db::migrations::{MigrationRegistry, MigrationReport};
use escolar_db::models::User;
use escolar_db::queries::users;
use escolar_db::{ConnectionManager, SchemaManager};

use crate::config::Config;
use crate::services::{EmailMessage, IdGenerator, LogMailer, Mailer, NewUser, PasswordService, Validator};

pub struct Application {
    config: Config,
    offset: FixedOffset,
    db: Arc<ConnectionManager>,
    schema: SchemaManager,
    passwords: PasswordService,
    validator: Validator,
    ids: IdGenerator,
    mailer: Box<dyn Mailer>,
}

impl Application {
    /// Build the context. No database connection is opened yet.
    pub fn new(config: Config) -> Result<Self> {
        let offset = config.app.utc_offset().ok_or_else(|| {
            Error::config(format!("Invalid app.timezone: {}", config.app.timezone))
        })?;
        config.database.validate()?;

        let db = Arc::new(ConnectionManager::new(config.database.clone()));
        let schema = SchemaManager::new(Arc::clone(&db));
        let passwords = PasswordService::new(config.security.bcrypt_cost)?;
        let validator = Validator::new(config.security.min_password_length)?;

        tracing::debug!(
            name = %config.app.name,
            environment = %config.app.environment,
            "Application initialized"
        );

        Ok(Self {
            config,
            offset,
            db,
            schema,
            passwords,
            validator,
            ids: IdGenerator::default(),
            mailer: Box::new(LogMailer::new()),
        })
    }

    /// Build the context and bring the schema up to date.
    pub fn bootstrap(config: Config) -> Result<Self> {
        let app = Self::new(config)?;
        app.migrate()?;
        Ok(app)
    }

    /// Replace the mailer.
    pub fn with_mailer<M: Mailer + 'static>(mut self, mailer: M) -> Self {
        self.mailer = Box::new(mailer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Arc<ConnectionManager> {
        &self.db
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    pub fn passwords(&self) -> &PasswordService {
        &self.passwords
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    pub fn mailer(&self) -> &dyn Mailer {
        self.mailer.as_ref()
    }

    /// Environment value for `key`: the process environment first, then
    /// `[app.env]` in the config.
    pub fn env(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .or_else(|| self.config.app.env.get(key).cloned())
    }

    pub fn env_or(&self, key: &str, default: &str) -> String {
        self.env(key).unwrap_or_else(|| default.to_string())
    }

    pub fn environment(&self) -> &str {
        &self.config.app.environment
    }

    pub fn is_production(&self) -> bool {
        self.config.app.environment.eq_ignore_ascii_case("production")
    }

    /// Current time in the configured offset.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Built-in migrations plus the `*.sql` files of `app.migrations_dir`.
    pub fn migration_registry(&self) -> Result<MigrationRegistry> {
        let mut registry = MigrationRegistry::builtin();
        if let Some(dir) = &self.config.app.migrations_dir {
            if dir.is_dir() {
                registry.register_dir(dir)?;
            }
        }
        Ok(registry)
    }

    /// Apply pending migrations from [`migration_registry`](Self::migration_registry).
    pub fn migrate(&self) -> Result<MigrationReport> {
        let registry = self.migration_registry()?;
        self.schema.run_migrations(&registry)
    }

    /// Compare the live schema with the whitelisted tables and columns.
    /// Empty when everything is present.
    pub fn verify_schema(&self) -> Result<Vec<String>> {
        let expected = self.schema.schema_map().expected_schema();
        self.schema.verify_schema_integrity(&expected)
    }

    /// Validate, hash and store a new account, then send a welcome email.
    ///
    /// A mail failure is logged; the account is still created.
    pub fn register_user(&self, new_user: NewUser) -> Result<User> {
        self.validator.validate_new_user(&new_user)?;
        let hash = self.passwords.hash(&new_user.password)?;
        let user = users::create_user(
            &self.db,
            &new_user.email,
            new_user.full_name.trim(),
            &hash,
            new_user.role,
        )?;
        tracing::info!(user_id = %user.id, role = %user.role, "Registered user");

        let welcome = EmailMessage {
            from: self.config.mail.from.clone(),
            to: user.email.clone(),
            subject: format!("Bienvenido a {}", self.config.app.name),
            body: format!(
                "Hola {},\n\nTu cuenta de {} ha sido creada con el correo {}.\n",
                user.full_name, user.role, user.email
            ),
        };
        if let Err(e) = self.mailer.send(welcome) {
            tracing::warn!("Failed to send welcome email to {}: {}", user.email, e);
        }

        Ok(user)
    }

    /// Check credentials. Unknown emails, inactive accounts and wrong
    /// passwords all yield `None`.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = users::get_user_by_email(&self.db, email)? else {
            return Ok(None);
        };
        if !user.active || !self.passwords.verify(password, &user.password_hash)? {
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// Close every database connection. The context is unusable afterwards.
    pub fn shutdown(&self) {
        self.db.close_connections();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escolar_common::UserRole;

    fn config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.database = escolar_db::DatabaseConfig::sqlite(
            dir.path().join("app.db").to_string_lossy().to_string(),
        );
        config.security.bcrypt_cost = 4;
        config
    }

    #[test]
    fn test_new_does_not_connect() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::new(config(&dir)).unwrap();
        let status = app.db().connection_status();
        assert!(!status.main && !status.read && !status.write);
        assert_eq!(status.pool_size, 3);
    }

    #[test]
    fn test_invalid_timezone_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.app.timezone = "Mexico/General".into();
        assert!(matches!(Application::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_now_uses_configured_offset() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::new(config(&dir)).unwrap();
        assert_eq!(app.now().offset().local_minus_utc(), -6 * 3600);
    }

    #[test]
    fn test_env_falls_back_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config
            .app
            .env
            .insert("ESCOLAR_TEST_ONLY_IN_CONFIG".into(), "from-config".into());
        let app = Application::new(config).unwrap();

        assert_eq!(
            app.env("ESCOLAR_TEST_ONLY_IN_CONFIG").as_deref(),
            Some("from-config")
        );
        assert_eq!(app.env_or("ESCOLAR_TEST_UNSET_KEY", "fallback"), "fallback");
        assert_eq!(app.environment(), "development");
        assert!(!app.is_production());
    }

    #[test]
    fn test_register_and_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let mailer = Arc::new(LogMailer::new());
        let app = Application::bootstrap(config(&dir))
            .unwrap()
            .with_mailer(Arc::clone(&mailer));

        let user = app
            .register_user(NewUser {
                email: "Ana@Example.org".into(),
                full_name: " Ana López ".into(),
                password: "clave2024".into(),
                role: UserRole::Student,
            })
            .unwrap();
        assert_eq!(user.email, "ana@example.org");
        assert_eq!(user.full_name, "Ana López");
        assert_ne!(user.password_hash, "clave2024");

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ana@example.org");

        assert!(app.authenticate("ana@example.org", "clave2024").unwrap().is_some());
        assert!(app.authenticate("ana@example.org", "otra2024").unwrap().is_none());
        assert!(app.authenticate("nadie@example.org", "clave2024").unwrap().is_none());
    }

    #[test]
    fn test_register_rejects_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::bootstrap(config(&dir)).unwrap();
        let err = app
            .register_user(NewUser {
                email: "no-es-correo".into(),
                full_name: "Ana".into(),
                password: "clave2024".into(),
                role: UserRole::Student,
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_bootstrap_schema_verifies_clean() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::bootstrap(config(&dir)).unwrap();
        assert!(app.verify_schema().unwrap().is_empty());

        let report = app.migrate().unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped.len(), 4);
    }

    #[test]
    fn test_configured_migrations_dir_runs_after_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let migrations = dir.path().join("migrations");
        std::fs::create_dir(&migrations).unwrap();
        std::fs::write(
            migrations.join("100_add_users_phone.sql"),
            "ALTER TABLE users ADD COLUMN phone TEXT;",
        )
        .unwrap();

        let mut config = config(&dir);
        config.app.migrations_dir = Some(migrations);
        let app = Application::bootstrap(config).unwrap();

        let columns = app.schema().table_columns("users").unwrap();
        assert!(columns.iter().any(|c| c.name == "phone"));
        assert_eq!(app.schema().applied_migrations().unwrap().len(), 5);
    }

    #[test]
    fn test_shutdown_closes_connections() {
        let dir = tempfile::tempdir().unwrap();
        let app = Application::bootstrap(config(&dir)).unwrap();
        assert!(app.db().connection_status().write);
        app.shutdown();
        assert!(!app.db().connection_status().write);
        assert!(app.verify_schema().is_err());
    }
}
