mod analytics;
mod app_router;
mod emails;
mod queue_stats;

pub use app_router::AppRouter;
