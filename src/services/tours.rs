use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::backend::TourBackend;
use crate::cache::InMemoryCache;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{Hint, HintPosition, HintProgress, TourDefinition, TourState, TourStatus};
use crate::services::tooltip::{place_hint, Placement, Rect, Size};

/// Hint sequences shipped with the product, keyed by view. Authored here
/// rather than fetched: the tours change with the UI, not with user data.
static TOUR_CATALOG: Lazy<HashMap<&'static str, TourDefinition>> = Lazy::new(|| {
    let mut catalog = HashMap::new();
    catalog.insert(
        "dashboard",
        TourDefinition {
            id: "dashboard-intro".to_string(),
            view: "dashboard".to_string(),
            hints: vec![
                Hint {
                    target: crate::models::tour::CENTERED_TARGET.to_string(),
                    title: "Welcome to ExamHub".to_string(),
                    description: "Take a quick tour of your new study dashboard.".to_string(),
                    position: HintPosition::Center,
                    offset_x: 0.0,
                    offset_y: 0.0,
                },
                Hint {
                    target: "#subject-picker".to_string(),
                    title: "Your subjects".to_string(),
                    description: "Pick the subjects you are preparing and we tailor past papers to them."
                        .to_string(),
                    position: HintPosition::Bottom,
                    offset_x: 0.0,
                    offset_y: 4.0,
                },
                Hint {
                    target: "#past-papers".to_string(),
                    title: "Past papers".to_string(),
                    description: "Browse a decade of past papers with worked solutions.".to_string(),
                    position: HintPosition::Right,
                    offset_x: 12.0,
                    offset_y: 0.0,
                },
                Hint {
                    target: "#progress-card".to_string(),
                    title: "Track your progress".to_string(),
                    description: "Scores and streaks show up here after each practice session."
                        .to_string(),
                    position: HintPosition::Top,
                    offset_x: 0.0,
                    offset_y: 0.0,
                },
            ],
        },
    );
    catalog.insert(
        "mock-exams",
        TourDefinition {
            id: "mock-exams-intro".to_string(),
            view: "mock-exams".to_string(),
            hints: vec![
                Hint {
                    target: "#exam-list".to_string(),
                    title: "Mock exams".to_string(),
                    description: "Timed papers that mirror the real exam format.".to_string(),
                    position: HintPosition::Bottom,
                    offset_x: 0.0,
                    offset_y: 0.0,
                },
                Hint {
                    target: "#timer-toggle".to_string(),
                    title: "Exam timer".to_string(),
                    description: "Practice under real conditions or switch the timer off."
                        .to_string(),
                    position: HintPosition::Right,
                    offset_x: 8.0,
                    offset_y: 0.0,
                },
                Hint {
                    target: "#start-exam".to_string(),
                    title: "Ready when you are".to_string(),
                    description: "Start a mock exam and get a grade estimate at the end."
                        .to_string(),
                    position: HintPosition::Top,
                    offset_x: 0.0,
                    offset_y: -4.0,
                },
            ],
        },
    );
    catalog
});

pub fn tour_for_view(view: &str) -> Option<&'static TourDefinition> {
    TOUR_CATALOG.get(view)
}

/// Client-measured geometry for tooltip placement. Absent when the caller
/// only wants the hint content.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct TourGeometry {
    pub viewport: Size,
    pub tooltip: Size,
    #[serde(default)]
    pub target: Option<Rect>,
}

/// What the client renders after any tour operation.
#[derive(Clone, Debug, Serialize)]
pub struct TourSnapshot {
    pub tour_id: String,
    pub view: String,
    pub status: TourStatus,
    pub hint_index: usize,
    pub hint_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<Hint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_delay_ms: Option<u64>,
}

/// Walks new users through a view's hints. Live state sits in the cache per
/// user and view; only the completion flag is persisted through the backend.
pub struct TourService {
    backend: Arc<dyn TourBackend>,
    cache: Arc<InMemoryCache>,
    event_sender: Arc<EventSender>,
    freshness_window: chrono::Duration,
    start_delay_ms: u64,
    state_ttl: Duration,
}

impl TourService {
    pub fn new(
        backend: Arc<dyn TourBackend>,
        cache: Arc<InMemoryCache>,
        event_sender: Arc<EventSender>,
        freshness_window: chrono::Duration,
        start_delay_ms: u64,
        state_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            event_sender,
            freshness_window,
            start_delay_ms,
            state_ttl,
        }
    }

    /// Starts the view's tour if the user qualifies: signed in, tour not
    /// completed before, and an account younger than the freshness window.
    /// Returns `None` when any guard declines; declining is never an error.
    #[instrument(skip(self, geometry))]
    pub async fn start(
        &self,
        user_id: &str,
        view: &str,
        geometry: Option<&TourGeometry>,
    ) -> Result<Option<TourSnapshot>, ServiceError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Ok(None);
        }

        let definition = match tour_for_view(view) {
            Some(definition) => definition,
            None => return Ok(None),
        };

        let progress = match self.backend.fetch_hint_progress(user_id, view).await {
            Ok(progress) => progress,
            Err(err) => {
                warn!(error = %err, "Could not fetch hint progress; skipping tour");
                return Ok(None);
            }
        };
        if progress.tutorial_completed {
            return Ok(None);
        }

        let created_at = match self.backend.account_created_at(user_id).await {
            Ok(created_at) => created_at,
            Err(err) => {
                warn!(error = %err, "Could not fetch account age; skipping tour");
                return Ok(None);
            }
        };
        let age = Utc::now().signed_duration_since(created_at);
        if age > self.freshness_window {
            return Ok(None);
        }

        let state = TourState {
            user_id: user_id.to_string(),
            tour_id: definition.id.clone(),
            view: view.to_string(),
            status: TourStatus::Showing,
            current_hint_index: 0,
            started_at: Utc::now(),
        };
        // A leftover record from an abandoned run is simply overwritten.
        self.save_state(&state).await?;

        self.event_sender
            .send_or_log(Event::TourStarted {
                user_id: state.user_id.clone(),
                tour_id: state.tour_id.clone(),
            })
            .await;
        info!(tour_id = %state.tour_id, "Started tour");

        Ok(Some(self.snapshot(
            &state,
            definition,
            geometry,
            Some(self.start_delay_ms),
        )))
    }

    /// Advances to the next hint. Pressing next on the final hint completes
    /// the tour: the completion flag is persisted, then the live state is
    /// dropped.
    #[instrument(skip(self, geometry))]
    pub async fn next(
        &self,
        user_id: &str,
        view: &str,
        geometry: Option<&TourGeometry>,
    ) -> Result<TourSnapshot, ServiceError> {
        let (mut state, definition) = self.load_live(user_id, view).await?;

        let last_index = definition.hints.len().saturating_sub(1);
        if state.current_hint_index >= last_index {
            // Persistence failure keeps the live state so the client can
            // retry; the tour must not silently reappear on the next visit.
            self.backend
                .save_hint_progress(
                    user_id,
                    view,
                    &HintProgress {
                        tutorial_completed: true,
                    },
                )
                .await?;
            self.delete_state(user_id, view).await?;

            state.status = TourStatus::Completed;
            self.event_sender
                .send_or_log(Event::TourCompleted {
                    user_id: state.user_id.clone(),
                    tour_id: state.tour_id.clone(),
                })
                .await;
            info!(tour_id = %state.tour_id, "Tour completed");

            return Ok(self.completed_snapshot(&state, definition));
        }

        state.current_hint_index += 1;
        self.save_state(&state).await?;
        self.event_sender
            .send_or_log(Event::TourStepChanged {
                user_id: state.user_id.clone(),
                tour_id: state.tour_id.clone(),
                step_index: state.current_hint_index,
            })
            .await;

        Ok(self.snapshot(&state, definition, geometry, None))
    }

    /// Steps back one hint. At the first hint this is a no-op.
    #[instrument(skip(self, geometry))]
    pub async fn previous(
        &self,
        user_id: &str,
        view: &str,
        geometry: Option<&TourGeometry>,
    ) -> Result<TourSnapshot, ServiceError> {
        let (mut state, definition) = self.load_live(user_id, view).await?;

        if state.current_hint_index > 0 {
            state.current_hint_index -= 1;
            self.save_state(&state).await?;
            self.event_sender
                .send_or_log(Event::TourStepChanged {
                    user_id: state.user_id.clone(),
                    tour_id: state.tour_id.clone(),
                    step_index: state.current_hint_index,
                })
                .await;
        }

        Ok(self.snapshot(&state, definition, geometry, None))
    }

    /// Dismisses the tour for good: the completion flag is persisted from
    /// whatever hint the user was on.
    #[instrument(skip(self))]
    pub async fn skip(&self, user_id: &str, view: &str) -> Result<TourSnapshot, ServiceError> {
        let (mut state, definition) = self.load_live(user_id, view).await?;

        self.backend
            .save_hint_progress(
                user_id,
                view,
                &HintProgress {
                    tutorial_completed: true,
                },
            )
            .await?;
        self.delete_state(user_id, view).await?;

        let step_index = state.current_hint_index;
        state.status = TourStatus::Completed;
        self.event_sender
            .send_or_log(Event::TourSkipped {
                user_id: state.user_id.clone(),
                tour_id: state.tour_id.clone(),
                step_index,
            })
            .await;
        info!(tour_id = %state.tour_id, step_index, "Tour skipped");

        Ok(self.completed_snapshot(&state, definition))
    }

    /// Closes the overlay without recording completion, so the tour may
    /// still offer itself on a later visit. Closing with no live tour is a
    /// no-op.
    #[instrument(skip(self))]
    pub async fn close(&self, user_id: &str, view: &str) -> Result<(), ServiceError> {
        let state = match self.load_state(user_id, view).await? {
            Some(state) => state,
            None => return Ok(()),
        };

        self.delete_state(user_id, view).await?;
        self.event_sender
            .send_or_log(Event::TourClosed {
                user_id: state.user_id.clone(),
                tour_id: state.tour_id.clone(),
                step_index: state.current_hint_index,
            })
            .await;

        Ok(())
    }

    // Private helper methods

    async fn load_live(
        &self,
        user_id: &str,
        view: &str,
    ) -> Result<(TourState, &'static TourDefinition), ServiceError> {
        let state = self.load_state(user_id, view).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("No active tour for view {}", view))
        })?;
        let definition = match tour_for_view(view) {
            Some(definition) => definition,
            None => {
                // State for a view the catalog no longer knows is stale.
                self.delete_state(user_id, view).await?;
                return Err(ServiceError::NotFound(format!(
                    "No active tour for view {}",
                    view
                )));
            }
        };
        Ok((state, definition))
    }

    async fn load_state(
        &self,
        user_id: &str,
        view: &str,
    ) -> Result<Option<TourState>, ServiceError> {
        let cached = self
            .cache
            .get(&Self::state_cache_key(user_id, view))
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;
        match cached {
            Some(data) => {
                let state: TourState = serde_json::from_str(&data)
                    .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn save_state(&self, state: &TourState) -> Result<(), ServiceError> {
        let data = serde_json::to_string(state)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        self.cache
            .set(
                &Self::state_cache_key(&state.user_id, &state.view),
                &data,
                Some(self.state_ttl),
            )
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;
        Ok(())
    }

    async fn delete_state(&self, user_id: &str, view: &str) -> Result<(), ServiceError> {
        self.cache
            .delete(&Self::state_cache_key(user_id, view))
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))
    }

    fn state_cache_key(user_id: &str, view: &str) -> String {
        format!("tour_state:{}:{}", user_id, view)
    }

    fn snapshot(
        &self,
        state: &TourState,
        definition: &TourDefinition,
        geometry: Option<&TourGeometry>,
        start_delay_ms: Option<u64>,
    ) -> TourSnapshot {
        let hint = definition.hints.get(state.current_hint_index).cloned();
        let placement = match (geometry, &hint) {
            (Some(geometry), Some(hint)) => Some(place_hint(
                hint,
                geometry.viewport,
                geometry.tooltip,
                geometry.target,
            )),
            _ => None,
        };
        TourSnapshot {
            tour_id: state.tour_id.clone(),
            view: state.view.clone(),
            status: state.status,
            hint_index: state.current_hint_index,
            hint_count: definition.hints.len(),
            hint,
            placement,
            start_delay_ms,
        }
    }

    fn completed_snapshot(
        &self,
        state: &TourState,
        definition: &TourDefinition,
    ) -> TourSnapshot {
        TourSnapshot {
            tour_id: state.tour_id.clone(),
            view: state.view.clone(),
            status: TourStatus::Completed,
            hint_index: state.current_hint_index,
            hint_count: definition.hints.len(),
            hint: None,
            placement: None,
            start_delay_ms: None,
        }
    }
}
