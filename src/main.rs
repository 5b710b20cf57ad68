use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleet_backoffice::config::environment::EnvironmentConfig;
use fleet_backoffice::create_app;
use fleet_backoffice::database::{DatabaseConnection, DocumentStore, MemoryDocumentStore, PgDocumentStore};
use fleet_backoffice::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Cargar variables de entorno
    dotenv().ok();

    // Configurar logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🛵 Fleet Back Office - Riders y Vehículos");
    info!("================================================");

    let config = EnvironmentConfig::from_env()?;
    info!("🌍 Entorno: {}", config.environment);

    // Inicializar store de documentos
    let store: Arc<dyn DocumentStore> = match &config.database {
        Some(database) => {
            let connection = match DatabaseConnection::new(database).await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("❌ Error conectando a la base de datos: {}", e);
                    return Err(anyhow::anyhow!("Error de base de datos: {}", e));
                }
            };
            let store = PgDocumentStore::new(connection.pool().clone());
            store.ensure_schema().await?;
            Arc::new(store)
        }
        None => {
            warn!("⚠️ DATABASE_URL no definida: usando store en memoria (los datos no persisten)");
            Arc::new(MemoryDocumentStore::new())
        }
    };

    let app_state = AppState::new(store, config.clone());

    // Barrido de consistencia periódico
    let sweep_handle = config.reconcile_interval.map(|interval| {
        info!("🧹 Barrido de consistencia cada {}s", interval.as_secs());
        Arc::new(app_state.consistency_sweep()).spawn_periodic(interval)
    });

    let app = create_app(app_state);

    let addr: SocketAddr = config.server_url().parse()?;

    info!("🌐 Servidor iniciando en http://{}", addr);
    info!("🔍 Endpoints disponibles:");
    info!("   GET  /health - Estado del servicio");
    info!("👤 Endpoints - Rider:");
    info!("   GET  /api/rider - Listar riders");
    info!("   GET  /api/rider/:id - Obtener rider");
    info!("   POST /api/rider - Crear rider");
    info!("   PUT  /api/rider/:id - Actualizar rider");
    info!("   DELETE /api/rider/:id - Eliminar rider");
    info!("🛵 Endpoints - Vehicle:");
    info!("   GET  /api/vehicle - Listar vehículos");
    info!("   GET  /api/vehicle/:id - Obtener vehículo");
    info!("   POST /api/vehicle - Crear vehículo");
    info!("   PUT  /api/vehicle/:id - Actualizar vehículo");
    info!("   DELETE /api/vehicle/:id - Eliminar vehículo");
    info!("🧹 Endpoints - Maintenance:");
    info!("   POST /api/maintenance/reconcile - Barrido de consistencia");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Error del servidor: {}", e);
    }

    if let Some(handle) = sweep_handle {
        handle.abort();
    }

    info!("👋 Servidor terminado");
    Ok(())
}

/// Señal de apagado graceful
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ No se pudo instalar el handler de Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("❌ No se pudo instalar el handler de SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("🛑 Señal Ctrl+C recibida, apagando servidor...");
        },
        _ = terminate => {
            info!("🛑 Señal de terminación recibida, apagando servidor...");
        },
    }
}
