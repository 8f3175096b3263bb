use crate::cache::CacheManager;
use crate::config::TourConfig;
use crate::constants::COORDINATOR_MAILBOX_CAPACITY;
use crate::error::{AppError, Result};
use crate::models::{GeneratedRoute, LocationSample, Place, PlanRequest, RouteConstraints, Waypoint};
use crate::services::leg_service::{LegDistanceService, LegServiceSettings};
use crate::services::place_discovery::{DiscoverySettings, PlaceDiscovery};
use crate::services::providers::{PlaceProvider, RoutingEngine};
use crate::services::proximity::{MonitorSnapshot, ProximityEvent, ProximityMonitor, SampleOutcome};
use crate::services::route_editor::{EditOutcome, RouteEditor};
use crate::services::route_optimizer::RouteOptimizer;
use crate::services::route_validator::{RouteValidator, ValidationReport};
use crate::services::tour_planner::{PlannedTour, TourPlanner};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything the coordinator delegates to
pub struct Services {
    pub planner: Arc<TourPlanner>,
    pub editor: Arc<RouteEditor>,
    pub monitor: ProximityMonitor,
}

impl Services {
    /// Wire the pipeline from its two providers and the shared cache
    pub fn new(
        config: Arc<TourConfig>,
        provider: Arc<dyn PlaceProvider>,
        engine: Arc<dyn RoutingEngine>,
        cache: Arc<CacheManager>,
    ) -> Self {
        let legs = Arc::new(LegDistanceService::new(
            engine,
            cache.clone(),
            LegServiceSettings::from(config.as_ref()),
        ));
        let discovery = Arc::new(PlaceDiscovery::new(
            provider,
            cache,
            DiscoverySettings::from(config.as_ref()),
        ));
        let optimizer = Arc::new(RouteOptimizer::new(
            legs.clone(),
            config.max_two_opt_passes,
            config.visit_time_per_stop_s(),
        ));

        Services {
            planner: Arc::new(TourPlanner::new(discovery, optimizer, config.clone())),
            editor: Arc::new(RouteEditor::new(legs)),
            monitor: ProximityMonitor::new(config.proximity_threshold_m),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EditOp {
    Replace { index: usize, waypoint: Waypoint },
    Insert { index: Option<usize>, waypoint: Waypoint },
    Delete { index: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    #[serde(flatten)]
    pub snapshot: MonitorSnapshot,
    pub route: Option<GeneratedRoute>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Generate {
        request: PlanRequest,
        reply: Reply<PlannedTour>,
    },
    Validate {
        route_id: Uuid,
        constraints: Option<RouteConstraints>,
        reply: Reply<ValidationReport>,
    },
    Edit {
        route_id: Uuid,
        op: EditOp,
        reply: Reply<EditOutcome>,
    },
    Alternatives {
        route_id: Uuid,
        index: usize,
        count: usize,
        reply: Reply<Vec<Place>>,
    },
    Activate {
        route_id: Uuid,
        reply: Reply<GeneratedRoute>,
    },
    Deactivate {
        reply: Reply<Option<Uuid>>,
    },
    Status {
        reply: Reply<SessionStatus>,
    },
    Location {
        sample: LocationSample,
        reply: Reply<SampleOutcome>,
    },
    GenerationFinished {
        ticket: u64,
        result: Result<PlannedTour>,
        reply: Reply<PlannedTour>,
    },
    EditFinished {
        base_id: Uuid,
        result: Result<EditOutcome>,
        reply: Reply<EditOutcome>,
    },
    SessionCompleted {
        session: u64,
    },
}

/// A route held by the coordinator plus the token that cancels work on it
struct Held {
    route: Arc<GeneratedRoute>,
    cancel: CancellationToken,
}

impl Held {
    fn new(route: GeneratedRoute) -> Self {
        Held {
            route: Arc::new(route),
            cancel: CancellationToken::new(),
        }
    }
}

struct Actor {
    services: Services,
    inbox: mpsc::Receiver<Command>,
    outbox: mpsc::WeakSender<Command>,
    draft: Option<Held>,
    active: Option<Held>,
    /// Monitor activation number of `active`
    active_session: u64,
    generation: Option<(u64, CancellationToken)>,
    next_ticket: u64,
}

impl Actor {
    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let command = tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.inbox.recv() => match command {
                    Some(c) => c,
                    None => break,
                },
            };
            self.handle(command);
        }

        if let Some((_, token)) = self.generation.take() {
            token.cancel();
        }
        for held in [self.draft.take(), self.active.take()].into_iter().flatten() {
            held.cancel.cancel();
        }
        tracing::info!("Coordinator stopped");
    }

    /// Deliver a result message back to the actor from a spawned task
    fn outbox(&self) -> Option<mpsc::Sender<Command>> {
        self.outbox.upgrade()
    }

    fn find(&self, route_id: Uuid) -> Result<Arc<GeneratedRoute>> {
        [&self.active, &self.draft]
            .into_iter()
            .flatten()
            .find(|h| h.route.id() == route_id)
            .map(|h| h.route.clone())
            .ok_or_else(|| AppError::NotFound(format!("Route {} not found", route_id)))
    }

    /// Token guarding work on `route_id`: the active route's when it is
    /// active, else the draft's
    fn token_for(&self, route_id: Uuid) -> CancellationToken {
        [&self.active, &self.draft]
            .into_iter()
            .flatten()
            .find(|h| h.route.id() == route_id)
            .map(|h| h.cancel.clone())
            .unwrap_or_default()
    }

    /// Drop editor history for routes no longer held
    fn prune_history(&self) {
        let live: Vec<Uuid> = [&self.active, &self.draft]
            .into_iter()
            .flatten()
            .map(|h| h.route.id())
            .collect();
        self.services.editor.retain(&live);
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Generate { request, reply } => self.start_generation(request, reply),
            Command::GenerationFinished {
                ticket,
                result,
                reply,
            } => self.finish_generation(ticket, result, reply),
            Command::Validate {
                route_id,
                constraints,
                reply,
            } => {
                let result = self.find(route_id).map(|route| {
                    let constraints = constraints
                        .unwrap_or_else(|| self.services.planner.default_constraints());
                    RouteValidator::validate(&route, &constraints)
                });
                let _ = reply.send(result);
            }
            Command::Edit {
                route_id,
                op,
                reply,
            } => self.start_edit(route_id, op, reply),
            Command::EditFinished {
                base_id,
                result,
                reply,
            } => self.finish_edit(base_id, result, reply),
            Command::Alternatives {
                route_id,
                index,
                count,
                reply,
            } => self.start_alternatives(route_id, index, count, reply),
            Command::Activate { route_id, reply } => {
                let result = self.find(route_id).map(|route| {
                    if let Some(previous) = self.active.take() {
                        previous.cancel.cancel();
                    }
                    self.active_session = self.services.monitor.activate(route.clone());
                    self.active = Some(Held {
                        route: route.clone(),
                        cancel: CancellationToken::new(),
                    });
                    (*route).clone()
                });
                self.prune_history();
                let _ = reply.send(result);
            }
            Command::Deactivate { reply } => {
                let previous = self.active.take().map(|held| {
                    held.cancel.cancel();
                    held.route.id()
                });
                self.services.monitor.deactivate();
                self.prune_history();
                let _ = reply.send(Ok(previous));
            }
            Command::Status { reply } => {
                let status = SessionStatus {
                    snapshot: self.services.monitor.snapshot(),
                    route: self.active.as_ref().map(|h| (*h.route).clone()),
                };
                let _ = reply.send(Ok(status));
            }
            Command::Location { sample, reply } => {
                let monitor = self.services.monitor.clone();
                let outbox = self.outbox();
                tokio::spawn(async move {
                    let (outcome, completed) = monitor.evaluate_session(&sample);
                    if let (Some(session), Some(tx)) = (completed, outbox) {
                        let _ = tx.send(Command::SessionCompleted { session }).await;
                    }
                    let _ = reply.send(Ok(outcome));
                });
            }
            Command::SessionCompleted { session } => {
                // A later activation owns the session now
                if session != self.active_session {
                    return;
                }
                if let Some(held) = self.active.take() {
                    held.cancel.cancel();
                    tracing::info!(route_id = %held.route.id(), session, "Active route {} finished", held.route.id());
                    self.prune_history();
                }
            }
        }
    }

    fn start_generation(&mut self, request: PlanRequest, reply: Reply<PlannedTour>) {
        if let Some((ticket, token)) = self.generation.take() {
            tracing::debug!(ticket, "Superseding in-flight generation {}", ticket);
            token.cancel();
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let token = CancellationToken::new();
        self.generation = Some((ticket, token.clone()));

        let Some(outbox) = self.outbox() else {
            let _ = reply.send(Err(AppError::Internal("Coordinator is shutting down".to_string())));
            return;
        };
        let planner = self.services.planner.clone();

        tokio::spawn(async move {
            let result = planner.plan(&request, &token).await;
            let _ = outbox
                .send(Command::GenerationFinished {
                    ticket,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn finish_generation(&mut self, ticket: u64, result: Result<PlannedTour>, reply: Reply<PlannedTour>) {
        let current = matches!(self.generation, Some((t, _)) if t == ticket);
        if !current {
            let _ = reply.send(Err(AppError::Cancelled(
                "A newer tour request replaced this one".to_string(),
            )));
            return;
        }
        self.generation = None;

        if let Ok(ref planned) = result {
            if let Some(previous) = self.draft.replace(Held::new(planned.route.clone())) {
                previous.cancel.cancel();
            }
            tracing::info!(route_id = %planned.route.id(), "New draft route {}", planned.route.id());
            self.prune_history();
        }
        let _ = reply.send(result);
    }

    fn start_edit(&mut self, route_id: Uuid, op: EditOp, reply: Reply<EditOutcome>) {
        let route = match self.find(route_id) {
            Ok(route) => route,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let Some(outbox) = self.outbox() else {
            let _ = reply.send(Err(AppError::Internal("Coordinator is shutting down".to_string())));
            return;
        };
        let editor = self.services.editor.clone();
        let token = self.token_for(route_id);

        tokio::spawn(async move {
            let work = async {
                match op {
                    EditOp::Replace { index, waypoint } => editor
                        .replace(&route, index, waypoint)
                        .await
                        .map(EditOutcome::Updated),
                    EditOp::Insert { index, waypoint } => editor
                        .insert(&route, waypoint, index)
                        .await
                        .map(EditOutcome::Updated),
                    EditOp::Delete { index } => editor.delete(&route, index).await,
                }
            };
            let result = tokio::select! {
                _ = token.cancelled() => Err(AppError::Cancelled("Route was replaced during the edit".to_string())),
                result = work => result,
            };
            let _ = outbox
                .send(Command::EditFinished {
                    base_id: route_id,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn finish_edit(&mut self, base_id: Uuid, result: Result<EditOutcome>, reply: Reply<EditOutcome>) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let draft_hit = self.draft.as_ref().map(|h| h.route.id()) == Some(base_id);
        let active_hit = self.active.as_ref().map(|h| h.route.id()) == Some(base_id);
        if !draft_hit && !active_hit {
            let _ = reply.send(Err(AppError::InvalidEdit(
                "Route changed while the edit was in progress".to_string(),
            )));
            return;
        }

        match &outcome {
            EditOutcome::Updated(edited) => {
                let edited = Arc::new(edited.clone());
                if draft_hit {
                    if let Some(draft) = self.draft.as_mut() {
                        draft.route = edited.clone();
                    }
                }
                if active_hit {
                    if let Some(active) = self.active.as_mut() {
                        active.route = edited.clone();
                    }
                    self.services.monitor.replace_route(edited);
                }
            }
            EditOutcome::Collapsed => {
                if draft_hit {
                    if let Some(held) = self.draft.take() {
                        held.cancel.cancel();
                    }
                }
                if active_hit {
                    if let Some(held) = self.active.take() {
                        held.cancel.cancel();
                    }
                    self.services.monitor.deactivate();
                }
            }
        }
        self.prune_history();
        let _ = reply.send(Ok(outcome));
    }

    fn start_alternatives(&mut self, route_id: Uuid, index: usize, count: usize, reply: Reply<Vec<Place>>) {
        let route = match self.find(route_id) {
            Ok(route) => route,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let planner = self.services.planner.clone();
        let editor = self.services.editor.clone();
        let token = self.token_for(route_id);

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => Err(AppError::Cancelled("Route was replaced".to_string())),
                result = planner.alternatives(&route, index, count) => result,
            };
            let ranked = result.map(|places| editor.rank_alternatives(route.id(), index, places));
            let _ = reply.send(ranked);
        });
    }
}

/// Single owner of the draft and active routes.
///
/// Commands are processed one at a time; long-running work is spawned and
/// its result folded back in as a message, so a stale result (newer request,
/// replaced route) is detected and discarded.
#[derive(Clone)]
pub struct Coordinator {
    tx: mpsc::Sender<Command>,
    monitor: ProximityMonitor,
}

impl Coordinator {
    pub fn spawn(services: Services, shutdown: CancellationToken) -> Self {
        let (tx, inbox) = mpsc::channel(COORDINATOR_MAILBOX_CAPACITY);
        let monitor = services.monitor.clone();
        let actor = Actor {
            services,
            inbox,
            outbox: tx.downgrade(),
            draft: None,
            active: None,
            active_session: 0,
            generation: None,
            next_ticket: 0,
        };
        tokio::spawn(actor.run(shutdown));
        Coordinator { tx, monitor }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| AppError::Internal("Coordinator is not running".to_string()))?;
        rx.await
            .map_err(|_| AppError::Internal("Coordinator dropped the request".to_string()))?
    }

    pub async fn generate(&self, request: PlanRequest) -> Result<PlannedTour> {
        self.request(|reply| Command::Generate { request, reply }).await
    }

    pub async fn validate(
        &self,
        route_id: Uuid,
        constraints: Option<RouteConstraints>,
    ) -> Result<ValidationReport> {
        self.request(|reply| Command::Validate {
            route_id,
            constraints,
            reply,
        })
        .await
    }

    pub async fn edit(&self, route_id: Uuid, op: EditOp) -> Result<EditOutcome> {
        self.request(|reply| Command::Edit {
            route_id,
            op,
            reply,
        })
        .await
    }

    pub async fn alternatives(&self, route_id: Uuid, index: usize, count: usize) -> Result<Vec<Place>> {
        self.request(|reply| Command::Alternatives {
            route_id,
            index,
            count,
            reply,
        })
        .await
    }

    pub async fn activate(&self, route_id: Uuid) -> Result<GeneratedRoute> {
        self.request(|reply| Command::Activate { route_id, reply })
            .await
    }

    pub async fn deactivate(&self) -> Result<Option<Uuid>> {
        self.request(|reply| Command::Deactivate { reply }).await
    }

    pub async fn session(&self) -> Result<SessionStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn submit_location(&self, sample: LocationSample) -> Result<SampleOutcome> {
        self.request(|reply| Command::Location { sample, reply })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProximityEvent> {
        self.monitor.subscribe()
    }

    /// Feed a push-style location stream into the monitor until it ends or
    /// `cancel` fires
    pub fn watch_locations<S>(&self, stream: S, cancel: CancellationToken) -> JoinHandle<()>
    where
        S: Stream<Item = LocationSample> + Send + 'static,
    {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            loop {
                let sample = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = stream.next() => match next {
                        Some(sample) => sample,
                        None => break,
                    },
                };
                if let Err(e) = coordinator.submit_location(sample).await {
                    tracing::warn!("Dropping location stream: {}", e);
                    break;
                }
            }
        })
    }
}
