//! Supervisor actor: the queue registry.
//!
//! Queues are created on first use and spawned as linked children, so a
//! queue actor that dies is dropped from the registry and recreated on the
//! next request.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use jobs_core::health::assess_queue;
use jobs_core::{Job, JobEvent, JobStore, Queue, QueueHealth, SystemHealth};
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};

use crate::bus::{EventBus, spawn_forwarder};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::handler::JobHandlerRegistry;
use crate::messages::{QueueMessage, StatsMessage, SupervisorMessage, ask};
use crate::queue_actor::{DispatchSettings, QueueActor, QueueActorState};
use crate::stats::StatsActor;

/// Everything the supervisor needs to build queues.
pub struct SupervisorArgs {
    pub config: EngineConfig,
    pub handlers: Arc<JobHandlerRegistry>,
    pub store: Arc<dyn JobStore>,
    pub bus: EventBus,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    /// Queue actors by name.
    queues: HashMap<String, ActorRef<QueueMessage>>,
    stats: ActorRef<StatsMessage>,
    config: EngineConfig,
    handlers: Arc<JobHandlerRegistry>,
    store: Arc<dyn JobStore>,
    bus: EventBus,
}

impl SupervisorState {
    fn settings(&self) -> DispatchSettings {
        DispatchSettings {
            stall_timeout: self.config.stall_timeout(),
            stall_policy: self.config.stall_policy,
            tick_interval: self.config.tick_interval(),
        }
    }

    fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.keys().cloned().collect();
        names.sort();
        names
    }

    async fn queue_health(&self, name: &str, queue: &ActorRef<QueueMessage>) -> Option<QueueHealth> {
        let status = match ask(queue, |reply| QueueMessage::GetStatus { reply }).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("Queue '{}' did not report status: {}", name, e);
                return None;
            }
        };
        let window = ask(&self.stats, |reply| StatsMessage::GetWindow {
            queue: name.to_string(),
            reply,
        })
        .await
        .unwrap_or_default();
        Some(assess_queue(status, window, &self.config.health))
    }
}

async fn spawn_queue_actor(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
    name: &str,
) -> Result<ActorRef<QueueMessage>, EngineError> {
    let queue = Queue::new(name).with_config(state.config.queue_config(name));
    queue.config.validate()?;

    let queue_state = QueueActorState::new(
        queue,
        state.handlers.clone(),
        state.store.clone(),
        state.bus.clone(),
        state.settings(),
    );

    let (actor, _handle) = Actor::spawn_linked(None, QueueActor, queue_state, myself.get_cell())
        .await
        .map_err(|e| EngineError::Actor(format!("Failed to spawn queue '{}': {}", name, e)))?;

    state.queues.insert(name.to_string(), actor.clone());
    state.bus.publish(JobEvent::QueueCreated {
        queue: name.to_string(),
        timestamp: Utc::now(),
    });

    Ok(actor)
}

async fn get_or_create(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
    name: &str,
) -> EngineResult<ActorRef<QueueMessage>> {
    match state.queues.get(name) {
        Some(queue) => Ok(queue.clone()),
        None => spawn_queue_actor(myself, state, name).await,
    }
}

/// Supervisor actor that owns every queue.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting job engine supervisor");

        let (stats, _handle) = Actor::spawn_linked(
            None,
            StatsActor,
            args.config.health_window(),
            myself.get_cell(),
        )
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn stats actor: {}", e)))?;
        spawn_forwarder(&args.bus, stats.clone(), |event| {
            StatsMessage::Record(Box::new(event))
        });

        Ok(SupervisorState {
            queues: HashMap::new(),
            stats,
            config: args.config,
            handlers: args.handlers,
            store: args.store,
            bus: args.bus,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::GetQueue {
                name,
                create,
                reply,
            } => {
                let result = if let Some(queue) = state.queues.get(&name) {
                    Ok(Some(queue.clone()))
                } else if create {
                    spawn_queue_actor(&myself, state, &name).await.map(Some)
                } else {
                    Ok(None)
                };
                let _ = reply.send(result);
            }

            SupervisorMessage::ListQueues { reply } => {
                let _ = reply.send(state.queue_names());
            }

            SupervisorMessage::GetHealth { reply } => {
                let checks = state
                    .queues
                    .iter()
                    .map(|(name, queue)| state.queue_health(name, queue));
                let queues = join_all(checks).await.into_iter().flatten().collect();
                let _ = reply.send(SystemHealth::from_queues(queues));
            }

            SupervisorMessage::RecentFailures { limit, reply } => {
                let lists = state
                    .queues
                    .values()
                    .map(|queue| ask(queue, |reply| QueueMessage::ListFailures { limit, reply }));
                let mut failed: Vec<Job> = join_all(lists)
                    .await
                    .into_iter()
                    .filter_map(Result::ok)
                    .flatten()
                    .collect();
                failed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
                failed.truncate(limit);
                let _ = reply.send(failed);
            }

            SupervisorMessage::Recover { reply } => {
                let _ = reply.send(recover(&myself, state).await);
            }

            SupervisorMessage::Shutdown { reply } => {
                tracing::info!("Shutting down supervisor, draining {} queues", state.queues.len());
                let drains = state
                    .queues
                    .values()
                    .map(|queue| ask(queue, |reply| QueueMessage::Drain { reply }));
                join_all(drains).await;
                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                tracing::debug!("Child actor {:?} stopped: {:?}", cell.get_id(), reason);
                state.queues.retain(|_, queue| queue.get_id() != cell.get_id());
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                tracing::error!("Child actor {:?} failed: {}", cell.get_id(), error);
                state.queues.retain(|_, queue| queue.get_id() != cell.get_id());
            }
            _ => {}
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for queue in state.queues.values() {
            queue.stop(None);
        }
        state.stats.stop(None);
        tracing::info!("Job engine supervisor stopped");
        Ok(())
    }
}

/// Hand every unfinished stored job back to its queue.
async fn recover(
    myself: &ActorRef<SupervisorMessage>,
    state: &mut SupervisorState,
) -> EngineResult<usize> {
    let jobs = state.store.load_unfinished().await?;
    let mut by_queue: HashMap<String, Vec<Job>> = HashMap::new();
    for job in jobs {
        by_queue.entry(job.queue.clone()).or_default().push(job);
    }

    let mut restored = 0;
    for (name, jobs) in by_queue {
        let queue = get_or_create(myself, state, &name).await?;
        restored += ask(&queue, |reply| QueueMessage::Restore { jobs, reply }).await??;
    }
    tracing::info!("Recovered {} unfinished jobs from the store", restored);
    Ok(restored)
}
