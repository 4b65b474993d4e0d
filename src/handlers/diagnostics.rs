use crate::{models::DiagnosticsResponse, ws::coordinator::Coordinator};
use axum::{extract::State, Json};
use std::sync::Arc;
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Sync counters plus host CPU and memory
pub async fn diagnostics(State(coordinator): State<Arc<Coordinator>>) -> Json<DiagnosticsResponse> {
    let counts = coordinator.counts();

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {} ({} stale), Sessions: {}, Locks: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        counts.connections,
        counts.stale_connections,
        counts.sessions,
        counts.active_locks
    );

    Json(DiagnosticsResponse {
        n_conn: counts.connections as u32,
        n_stale_conn: counts.stale_connections as u32,
        n_sessions: counts.sessions as u32,
        n_empty_sessions: counts.empty_sessions as u32,
        n_locks: counts.active_locks as u32,
        uptime_secs: coordinator.uptime_secs(),
        cpu_usage,
        memory_alloc,
        memory_total,
        memory_free,
    })
}
