mod cli;

use control_escolar::app::Application;
use control_escolar::config;
use control_escolar::services::{NewUser, PasswordService};
use escolar_common::{ConnectionRole, UserRole};
use escolar_db::migrations::{MigrationRegistry, MigrationReport};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "control_escolar=trace,escolar_db=debug,escolar_common=debug".to_string()
        } else {
            "control_escolar=info,escolar_db=warn".to_string()
        }
    });

    // Logs go to stderr so command output stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Migrate { dir } => migrate(config_path, dir.as_deref()),
        Commands::Status { dir, json } => status(config_path, dir.as_deref(), json),
        Commands::Verify => verify(config_path),
        Commands::Connections { json } => connections(config_path, json),
        Commands::CreateUser {
            email,
            name,
            role,
            password,
        } => create_user(config_path, email, name, &role, password),
        Commands::HashPassword { password } => hash_password(config_path, &password),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("control-escolar {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn open_app(config_path: Option<&Path>) -> Result<Application> {
    let config = config::load_config_or_default(config_path)?;
    Application::new(config).context("Failed to initialize application")
}

fn print_report(report: &MigrationReport) {
    if report.applied.is_empty() {
        println!("Nothing to migrate.");
        return;
    }
    for name in &report.applied {
        println!("Migrated: {}", name);
    }
    println!(
        "Applied {} migration(s) in batch {}",
        report.applied.len(),
        report.batch
    );
}

fn migrate(config_path: Option<&Path>, dir: Option<&Path>) -> Result<()> {
    let app = open_app(config_path)?;
    let report = match dir {
        Some(dir) => app.schema().run_pending_migrations(dir)?,
        None => app.migrate()?,
    };
    print_report(&report);
    Ok(())
}

fn status(config_path: Option<&Path>, dir: Option<&Path>, json: bool) -> Result<()> {
    let app = open_app(config_path)?;
    let registry = match dir {
        Some(dir) => {
            if !dir.is_dir() {
                anyhow::bail!("Migrations directory does not exist: {:?}", dir);
            }
            MigrationRegistry::from_dir(dir)?
        }
        None => app.migration_registry()?,
    };
    let states = app.schema().migration_status(&registry)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }

    for state in &states {
        match (state.batch, &state.executed_at) {
            (Some(batch), Some(at)) => println!("[x] {} (batch {}, {})", state.name, batch, at),
            _ => println!("[ ] {}", state.name),
        }
    }
    let pending = states.iter().filter(|s| !s.is_applied()).count();
    println!("\n{} migration(s), {} pending", states.len(), pending);
    Ok(())
}

fn verify(config_path: Option<&Path>) -> Result<()> {
    let app = open_app(config_path)?;
    let issues = app.verify_schema()?;

    if issues.is_empty() {
        println!("✓ Schema verified");
        return Ok(());
    }
    for issue in &issues {
        println!("✗ {}", issue);
    }
    anyhow::bail!("{} schema issue(s) found", issues.len())
}

fn connections(config_path: Option<&Path>, json: bool) -> Result<()> {
    let app = open_app(config_path)?;
    let db = app.db();

    for role in ConnectionRole::ALL {
        db.connect(role)
            .with_context(|| format!("Failed to open the {} connection", role))?;
    }

    if json {
        let origins: serde_json::Map<String, serde_json::Value> = ConnectionRole::ALL
            .iter()
            .map(|role| {
                let origin = db.opened_from(*role).map(|o| o.to_string());
                (role.to_string(), serde_json::json!(origin))
            })
            .collect();
        let output = serde_json::json!({
            "status": db.connection_status(),
            "origins": origins,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for role in ConnectionRole::ALL {
        let (_, entry) = db.config().connections.for_role(role);
        match db.opened_from(role) {
            Some(origin) => println!("✓ {:<7} {} (config: {})", role.as_str(), entry.path, origin),
            None => println!("✗ {:<7} not open", role.as_str()),
        }
    }
    println!("Pool size: {}", db.connection_status().pool_size);
    Ok(())
}

fn create_user(
    config_path: Option<&Path>,
    email: String,
    full_name: String,
    role: &str,
    password: Option<String>,
) -> Result<()> {
    let role: UserRole = role.parse().map_err(anyhow::Error::msg)?;
    let config = config::load_config_or_default(config_path)?;
    let app = Application::bootstrap(config).context("Failed to initialize application")?;

    let generated = password.is_none();
    let password = password.unwrap_or_else(|| app.passwords().generate_temporary(12));
    let user = app.register_user(NewUser {
        email,
        full_name,
        password: password.clone(),
        role,
    })?;

    println!("Created {} {} <{}>", user.role, user.id, user.email);
    if generated {
        println!("Temporary password: {}", password);
    }
    Ok(())
}

fn hash_password(config_path: Option<&Path>, password: &str) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let hash = PasswordService::new(config.security.bcrypt_cost)?.hash(password)?;
    println!("{}", hash);
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  App: {} ({})", config.app.name, config.app.environment);
            println!("  Timezone: {}", config.app.timezone);
            println!("  Database: {}", config.database.connections.default.path);
            println!(
                "  Read replica: {}",
                config.database.connections.read.is_some()
            );
            println!(
                "  Write override: {}",
                config.database.connections.write.is_some()
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Database: {}", config.database.connections.default.path);
        }
    }

    Ok(())
}
