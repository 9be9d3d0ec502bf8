use std::sync::Arc;
use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use realmgate::config::ServerConfig;
use realmgate::database::{AccountStore, MemoryStore, MySqlStore};
use realmgate::servers::realm::RealmState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/server.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: realm_server [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = ServerConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {}", conf_file))?;

    match config.database_url() {
        Some(db_url) => {
            let pool = MySqlPoolOptions::new()
                .max_connections(5)
                .connect(&db_url)
                .await
                .with_context(|| format!("Cannot connect to DB: {}", config.sql_ip.as_deref().unwrap_or("")))?;
            serve(Arc::new(MySqlStore::new(pool)), config).await
        }
        None => {
            // Session keys live in the auth process; see auth_server --with-realm.
            tracing::warn!("[realm] [memory_store] no sql_ip configured, session keys are not shared");
            serve(Arc::new(MemoryStore::seeded()), config).await
        }
    }
}

async fn serve<S: AccountStore>(store: Arc<S>, config: ServerConfig) -> Result<()> {
    tracing::info!("[realm] [started] Realm Server Started realm_id={}", config.realm_id);
    let bind = config.realm_bind();
    let state = Arc::new(RealmState::new(store, config));
    RealmState::run(state, &bind).await
}
