#![allow(dead_code)]

mod ai;
mod error;
mod ingestion;
mod knowledge;
mod model;
mod processor;
mod queue;
mod routes;
mod server_config;
mod storage;

use std::{env, net::SocketAddr, sync::Arc};

use axum::extract::FromRef;
use mimalloc::MiMalloc;
use tokio::signal;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    ingestion::{IngestionService, SpoolDirSource},
    knowledge::KnowledgeBase,
    processor::ReplyProcessor,
    queue::ResponseQueue,
    routes::AppRouter,
    server_config::cfg,
    storage::{MemoryStore, SharedStore},
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub http_client: HttpClient,
    pub store: SharedStore,
    pub queue: ResponseQueue,
    pub knowledge: Arc<KnowledgeBase>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
    let store: SharedStore = MemoryStore::new_shared();
    let knowledge = Arc::new(KnowledgeBase::new(cfg.knowledge.clone()));

    let processor = ReplyProcessor::new(store.clone(), http_client.clone(), knowledge.clone());
    let queue = ResponseQueue::new(Arc::new(processor));

    let state = ServerState {
        http_client,
        store,
        queue,
        knowledge,
    };

    let mut scheduler = JobScheduler::new().await?;
    {
        let state_clone = state.clone();
        scheduler
            .add(Job::new_async(
                cfg.ingestion.schedule.as_str(),
                move |uuid, mut l| {
                    let state = state_clone.clone();
                    Box::pin(async move {
                        let source = SpoolDirSource::new(&cfg.ingestion.spool_dir);
                        let service = IngestionService::new(
                            state.store.clone(),
                            state.http_client.clone(),
                            state.queue.clone(),
                        );
                        match service.ingest_from(&source).await {
                            Ok(n) if n > 0 => {
                                tracing::info!("Ingestion job {} picked up {} emails", uuid, n);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::error!("Ingestion job failed: {:?}", e);
                            }
                        }

                        let next_tick = l.next_tick_for_job(uuid).await;
                        if let Ok(Some(ts)) = next_tick {
                            tracing::debug!("Next ingestion run at {:?}", ts);
                        }
                    })
                },
            )?)
            .await?;
    }
    scheduler.start().await?;

    let router = AppRouter::create(state);

    let port = env::var("PORT").unwrap_or("5006".to_string());
    let addr = SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>()?));
    tracing::info!("Triagedesk server running on http://{}", addr);
    tracing::debug!("{}", *cfg);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    Ok(())
}

async fn shutdown_signal(mut scheduler: JobScheduler) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Failed to shut down scheduler: {:?}", e);
    }
    tracing::info!("Cleanups done, shutting down");
}
