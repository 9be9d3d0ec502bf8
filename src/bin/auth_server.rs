use std::sync::Arc;
use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use realmgate::config::ServerConfig;
use realmgate::database::{AccountStore, MemoryStore, MySqlStore, Realm};
use realmgate::servers::auth::AuthState;
use realmgate::servers::realm::RealmState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/server.yaml".to_string();
    let mut with_realm = false;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: auth_server [--conf FILE] [--with-realm]");
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
            "--with-realm" => with_realm = true,
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
            serve(Arc::new(MySqlStore::new(pool)), config, with_realm).await
        }
        None => {
            tracing::warn!("[auth] [memory_store] no sql_ip configured, using demo accounts");
            let store = MemoryStore::seeded();
            store.set_realms(config.realms.iter().map(Realm::from).collect()).await;
            serve(Arc::new(store), config, with_realm).await
        }
    }
}

async fn serve<S: AccountStore>(store: Arc<S>, config: ServerConfig, with_realm: bool) -> Result<()> {
    tracing::info!("[auth] [started] Auth Server Started");

    if with_realm {
        // In-process world server sharing the account store.
        let realm = Arc::new(RealmState::new(Arc::clone(&store), config.clone()));
        let bind = config.realm_bind();
        tokio::spawn(async move {
            if let Err(e) = RealmState::run(realm, &bind).await {
                tracing::error!("[realm] [stopped] err={:#}", e);
            }
        });
    }

    let bind = config.auth_bind();
    let state = Arc::new(AuthState::new(store, config));
    AuthState::run(state, &bind).await
}
