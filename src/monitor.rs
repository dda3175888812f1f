//! User Discovery Monitor
//!
//! Scans the agent's join room and starts one [`UserProcess`] per new author.
//! Authors already registered, or retired after a STOP decision, are skipped. A
//! user whose process failed is started again on the next scan.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::ids::{RoomId, UserId};
use crate::memory::{Connection, MemoryQuery};
use crate::process::{Services, UserProcess};
use crate::sleeper;
use crate::telemetry::StewardStats;

/// Join records read per scan
pub const JOIN_SCAN_LIMIT: usize = 1000;

pub struct UserMonitor {
    services: Arc<Services>,
}

impl UserMonitor {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Scan until the registry is stopped
    pub async fn run(self) {
        let interval = self.services.config.intervals.user_check;
        let shutdown = self.services.registry.shutdown_token();
        info!(agent_id = %self.services.config.agent_id, "User monitor started");

        while !self.services.registry.is_stopped() {
            StewardStats::incr(&self.services.stats.monitor_cycles);

            if let Err(e) = self.scan().await {
                let context = self
                    .services
                    .error_context()
                    .character(&self.services.config.agent_name)
                    .action("monitorUsers");
                self.services.capture(&format!("Error monitoring users: {}", e), &context);
            }

            sleeper::sleep(interval, &shutdown).await;
        }

        self.services.release_actions();
        info!("User monitor stopped");
    }

    /// One pass over the join room; returns how many processes were started
    pub async fn scan(&self) -> Result<usize> {
        let services = &self.services;
        let agent = services.config.agent_id;
        let join_room = RoomId::join_room(agent);

        let records = services
            .store
            .query(&MemoryQuery::room(join_room).count(JOIN_SCAN_LIMIT))
            .await?;

        let users: BTreeSet<UserId> = records
            .iter()
            .map(|r| r.user_id)
            .filter(|u| u.as_uuid() != agent.as_uuid())
            .collect();
        debug!("Join room authors: {}", users.len());

        let mut started = 0;
        for user in users {
            if services.registry.is_known(user) {
                continue;
            }
            if services.registry.is_stopped() {
                break;
            }

            let room = RoomId::for_user(agent, user);
            if let Err(e) = services.provisioner.ensure_connection(&Connection::for_user(user, room)).await {
                let context = services
                    .error_context()
                    .user(user)
                    .room(room)
                    .character(&services.config.agent_name)
                    .action("ensureConnection");
                services.capture(&format!("Error monitoring users: {}", e), &context);
                continue;
            }

            let Some(token) = services.registry.register(user) else {
                continue;
            };
            info!(user_id = %user, room_id = %room, "Starting process for new user");
            let process = UserProcess::new(Arc::clone(services), user, room, token);
            services.registry.attach_handle(user, tokio::spawn(process.run()));
            StewardStats::incr(&services.stats.users_started);
            started += 1;
        }

        Ok(started)
    }
}
