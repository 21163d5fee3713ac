use crate::server::database::Database;
use crate::server::websocket::{ChatGateway, GatewayStats};
use chrono::Utc;
use log::{error, info, warn};
use std::{fs::OpenOptions, io::Write, path::Path, sync::Arc, time::Duration};
use sysinfo::System;
use tokio::time;

pub const CSV_HEADER: &str = "# Timestamp, Connections, Online_Users, Thread_Groups, Total_Messages, Unread_Messages, CPU_Usage";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSample {
    pub gateway: GatewayStats,
    pub total_messages: i64,
    pub unread_messages: i64,
    pub cpu_usage: f32,
}

impl StatsSample {
    pub fn csv_line(&self, timestamp: &str) -> String {
        format!(
            "{}, {}, {}, {}, {}, {}, {:.1}%",
            timestamp,
            self.gateway.connections,
            self.gateway.online_users,
            self.gateway.thread_groups,
            self.total_messages,
            self.unread_messages,
            self.cpu_usage
        )
    }
}

async fn count(db: &Database, sql: &str) -> i64 {
    match sqlx::query_scalar::<_, i64>(sql).fetch_one(&db.pool).await {
        Ok(count) => count,
        Err(e) => {
            warn!("[STATS] Query failed ({}): {}", sql, e);
            -1
        }
    }
}

pub async fn sample(gateway: &ChatGateway, db: &Database, system: &mut System) -> StatsSample {
    system.refresh_cpu();
    let cpus = system.cpus();
    let cpu_usage = if cpus.is_empty() {
        0.0
    } else {
        cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
    };
    StatsSample {
        gateway: gateway.stats().await,
        total_messages: count(db, "SELECT COUNT(*) FROM messages").await,
        unread_messages: count(db, "SELECT COUNT(*) FROM messages WHERE is_read = 0").await,
        cpu_usage,
    }
}

/// Appends one CSV line per interval to `log_path` until the task is dropped.
pub async fn start_stats_logger(gateway: Arc<ChatGateway>, db: Arc<Database>, log_path: String, interval: Duration) {
    if let Some(parent) = Path::new(&log_path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!("[STATS] Unable to create {:?}: {}", parent, e);
                return;
            }
        }
    }

    let mut file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            error!("[STATS] Unable to open stats log '{}': {}", log_path, e);
            return;
        }
    };

    if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
        if let Err(e) = writeln!(file, "# Ruggine Messaging Stats Log\n{}", CSV_HEADER) {
            error!("[STATS] Failed to write header: {}", e);
            return;
        }
        info!("[STATS] Stats log initialized: {}", log_path);
    }

    let mut system = System::new();
    let mut ticker = time::interval(interval);
    loop {
        ticker.tick().await;
        let stats = sample(&gateway, &db, &mut system).await;
        info!(
            "[STATS] connections={} online={} groups={} messages={} unread={} cpu={:.1}%",
            stats.gateway.connections,
            stats.gateway.online_users,
            stats.gateway.thread_groups,
            stats.total_messages,
            stats.unread_messages,
            stats.cpu_usage
        );

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
        if let Err(e) = writeln!(file, "{}", stats.csv_line(&timestamp)) {
            error!("[STATS] Failed to write stats: {}", e);
        } else if let Err(e) = file.flush() {
            error!("[STATS] Failed to flush stats log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_line_matches_header_columns() {
        let sample = StatsSample {
            gateway: GatewayStats { connections: 3, online_users: 2, thread_groups: 1 },
            total_messages: 10,
            unread_messages: 4,
            cpu_usage: 12.34,
        };
        let line = sample.csv_line("2024-01-01 00:00:00 UTC");
        assert_eq!(line, "2024-01-01 00:00:00 UTC, 3, 2, 1, 10, 4, 12.3%");
        assert_eq!(line.split(", ").count(), CSV_HEADER.split(", ").count());
    }
}
