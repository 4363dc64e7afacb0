use crate::device::DeviceManager;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "active_extractions": metrics.active_extractions
        },
        "memory": get_memory_info(),
        "engines": state.engines,
        "system": get_system_status(&metrics, worker_capacity())
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    let by_status: serde_json::Map<String, serde_json::Value> = metrics
        .extractions_by_status
        .iter()
        .map(|(status, count)| (status.to_string(), json!(count)))
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "active_extractions": metrics.active_extractions,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "extractions_by_status": by_status,
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
        "device": DeviceManager::get_device_summary(),
        "performance": {
            "max_upload_bytes": state.get_config().performance.max_upload_bytes
        }
    }))
}

fn overall_error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

/// Extractions the host can run side by side before requests start queueing.
fn worker_capacity() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", std::process::id())) {
            let field = |name: &str| -> u64 {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(metrics: &AppMetrics, capacity: usize) -> serde_json::Value {
    let usage = if capacity > 0 {
        metrics.active_extractions as f64 / capacity as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "extraction_usage_percent": (usage * 100.0).round(),
        "worker_capacity": capacity,
        "active_extractions": metrics.active_extractions,
        "load_warnings": if usage > 0.8 {
            vec!["Extractions are queueing behind available CPU cores"]
        } else {
            vec![]
        }
    })
}
