//! Build dispatcher.
//!
//! Turns a normalized request into stored records and, only when this call
//! created the build, a queued run. Dispatch returns as soon as the records
//! exist; the run and its completion event happen on the worker pool.

use futures::FutureExt;
use hookci_core::{
    Acknowledgement, Build, BuildCompletedEvent, BuildJob, BuildOutcome, BuildRequest,
    BuildRunner, Deploy, DispatchStatus, EntityId, Error, LogKey, LogSink, Project, Result,
    project_id,
};
use hookci_db::EntityStore;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info};

use crate::bus::EventBus;
use crate::worker::WorkerPool;

/// Shared pieces a queued run needs.
#[derive(Clone)]
struct RunContext {
    store: Arc<dyn EntityStore>,
    logs: Arc<dyn LogSink>,
    runner: Arc<dyn BuildRunner>,
    bus: Arc<EventBus>,
    in_flight: Arc<Mutex<HashSet<EntityId>>>,
}

impl RunContext {
    /// Mark `build_id` as queued. Fails if a run for it already holds a claim.
    fn try_claim(&self, build_id: &EntityId) -> Option<Claim> {
        if !self.in_flight.lock().insert(build_id.clone()) {
            return None;
        }
        Some(Claim {
            in_flight: self.in_flight.clone(),
            build_id: build_id.clone(),
        })
    }
}

/// A build's slot in the in-flight set, released on drop.
struct Claim {
    in_flight: Arc<Mutex<HashSet<EntityId>>>,
    build_id: EntityId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.build_id);
    }
}

pub struct Dispatcher {
    ctx: RunContext,
    pool: WorkerPool,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EntityStore>,
        logs: Arc<dyn LogSink>,
        runner: Arc<dyn BuildRunner>,
        bus: Arc<EventBus>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            ctx: RunContext {
                store,
                logs,
                runner,
                bus,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
            },
            pool,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.ctx.store
    }

    pub fn logs(&self) -> &Arc<dyn LogSink> {
        &self.ctx.logs
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.ctx.bus
    }

    /// Whether a run for `build_id` is queued or executing.
    pub fn is_running(&self, build_id: &EntityId) -> bool {
        self.ctx.in_flight.lock().contains(build_id)
    }

    /// Register the request's project and build and queue the build if it
    /// is new. A build that already exists is acknowledged as a duplicate
    /// and not run again.
    pub async fn dispatch_build(&self, request: BuildRequest) -> Result<Acknowledgement> {
        request.validate()?;
        let project = self.get_or_create_project(&request).await?;

        let build = Build::new(&project.id, &request.commit_id, &request.branch);
        let build_id = build.id.clone();

        let status = match self.ctx.store.create_build(build).await {
            Ok(build) => {
                info!(
                    project = %project.full_name(),
                    build_id = %build.id,
                    commit = %build.commit_id,
                    branch = %build.branch,
                    "Build created"
                );
                match self.ctx.try_claim(&build.id) {
                    Some(claim) => self.schedule(build, claim),
                    // A re-trigger found the new record first and already queued it.
                    None => info!(build_id = %build.id, "Build already queued"),
                }
                DispatchStatus::Scheduled
            }
            Err(e) if e.is_duplicate() => {
                info!(
                    project = %project.full_name(),
                    build_id = %build_id,
                    "Duplicate delivery, build already exists"
                );
                DispatchStatus::Duplicate
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Acknowledgement {
            project_id: project.id,
            build_id,
            status,
        })
    }

    /// Run an existing build again, replacing its log.
    pub async fn retrigger(&self, build_id: &EntityId) -> Result<Acknowledgement> {
        let build = self.ctx.store.get_build(build_id).await?;
        let Some(claim) = self.ctx.try_claim(&build.id) else {
            return Err(Error::Conflict(format!("build {} is already running", build.id)));
        };
        info!(build_id = %build.id, commit = %build.commit_id, "Build re-triggered");

        let ack = Acknowledgement {
            project_id: build.project_id.clone(),
            build_id: build.id.clone(),
            status: DispatchStatus::Scheduled,
        };
        self.schedule(build, claim);
        Ok(ack)
    }

    /// Get or create the deploy record for a build. Nothing is executed.
    pub async fn record_deploy(
        &self,
        project_id: &EntityId,
        build_id: &EntityId,
    ) -> Result<Deploy> {
        let build = self.ctx.store.get_build(build_id).await?;
        if &build.project_id != project_id {
            return Err(Error::InvalidInput(format!(
                "build {} does not belong to project {}",
                build_id, project_id
            )));
        }

        let store = &self.ctx.store;
        if let Some(deploy) = store.find_deploy_for_build(project_id, build_id).await? {
            return Ok(deploy);
        }
        match store.create_deploy(Deploy::new(project_id, build_id)).await {
            Ok(deploy) => {
                info!(deploy_id = %deploy.id, build_id = %build_id, "Deploy recorded");
                Ok(deploy)
            }
            Err(e) if e.is_duplicate() => {
                let id = hookci_core::deploy_id(project_id, build_id);
                Ok(store.get_deploy(&id).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for every queued run to finish.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    async fn get_or_create_project(&self, request: &BuildRequest) -> Result<Project> {
        let id = project_id(&request.org, &request.name);
        let store = &self.ctx.store;
        if let Some(project) = store.find_project(&id).await? {
            return Ok(project);
        }

        let project = Project::new(&request.org, &request.name, &request.url);
        match store.create_project(project).await {
            Ok(project) => {
                info!(project = %project.full_name(), project_id = %project.id, "Project registered");
                Ok(project)
            }
            Err(e) if e.is_duplicate() => Ok(store.get_project(&id).await?),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue a run. The claim is held until the run has finished.
    fn schedule(&self, build: Build, claim: Claim) {
        let ctx = self.ctx.clone();
        self.pool.spawn(async move {
            let succeeded = match AssertUnwindSafe(execute(&ctx, &build)).catch_unwind().await {
                Ok(Ok(outcome)) => outcome.succeeded(),
                Ok(Err(e)) => {
                    error!(build_id = %build.id, error = %e, "Build could not complete");
                    false
                }
                Err(panic) => {
                    error!(
                        build_id = %build.id,
                        panic = panic_message(panic.as_ref()),
                        "Build run panicked"
                    );
                    false
                }
            };
            drop(claim);
            ctx.bus
                .publish(&BuildCompletedEvent { build, succeeded }.into());
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

async fn execute(ctx: &RunContext, build: &Build) -> Result<BuildOutcome> {
    // Read the project at run time so secret updates apply to queued builds.
    let project = ctx.store.get_project(&build.project_id).await?;
    let job = BuildJob::new(&project, build);

    let mut writer = ctx.logs.open_writer(&LogKey::for_build(build)).await?;
    let outcome = ctx.runner.run(&job, writer.as_mut()).await;
    let finished = writer.finish().await;

    let outcome = outcome?;
    finished?;
    Ok(outcome)
}
