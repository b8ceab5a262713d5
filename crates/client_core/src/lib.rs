use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use chrono::{Local, NaiveDate, Utc};
use shared::{
    domain::{AttendanceStatus, ScheduleRef, SessionCode, StudentId, LOGIN_ROUTE},
    protocol::{
        ActiveSessionRecord, GenerateSessionRequest, ManualAttendanceRequest, RosterQuery,
        UpdateAttendanceRequest,
    },
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

pub mod error;
pub mod geolocation;
pub mod transport;
pub mod types;

pub use error::{AttendanceError, AttendanceResult, LocationError};
pub use geolocation::{
    resolve_position, DeniedLocation, FixedLocation, GeolocationProvider,
    DEFAULT_GEOLOCATION_TIMEOUT,
};
pub use transport::{AttendanceApi, AuthEvent, ClientContext, LoginOutcome};
pub use types::{
    Notice, NoticeLevel, RosterEntry, RosterSnapshot, Session, SessionEvent, SessionPhase,
    StatusCounts,
};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub refresh_interval: Duration,
    pub geolocation_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            geolocation_timeout: DEFAULT_GEOLOCATION_TIMEOUT,
        }
    }
}

struct ControllerState {
    phase: SessionPhase,
    session: Option<Session>,
    roster: RosterSnapshot,
}

/// Drives one teacher's QR attendance session: start or adopt it, keep its
/// roster fresh while it is active, apply manual overrides, and let it go.
///
/// User-initiated operations are serialized; the periodic refresh shares the
/// same lock, so two calls for one session never overlap on the wire.
pub struct AttendanceSessionController {
    api: Arc<dyn AttendanceApi>,
    options: ControllerOptions,
    state: Mutex<ControllerState>,
    operations: Mutex<()>,
    refresh_task: StdMutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl AttendanceSessionController {
    pub fn new(api: Arc<dyn AttendanceApi>, options: ControllerOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            api,
            options,
            state: Mutex::new(ControllerState {
                phase: SessionPhase::Idle,
                session: None,
                roster: RosterSnapshot::default(),
            }),
            operations: Mutex::new(()),
            refresh_task: StdMutex::new(None),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.lock().await.phase
    }

    pub async fn session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    pub async fn roster(&self) -> RosterSnapshot {
        self.state.lock().await.roster.clone()
    }

    /// Client-side countdown; `None` unless a session is attached.
    pub async fn remaining(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        let session = state.session.as_ref()?;
        if state.phase == SessionPhase::Expired {
            return Some(Duration::ZERO);
        }
        Some(session.remaining_at(Utc::now()))
    }

    pub async fn start_session(
        self: &Arc<Self>,
        schedule: &ScheduleRef,
        geolocation: &dyn GeolocationProvider,
    ) -> AttendanceResult<Session> {
        let _operation = self.operations.lock().await;
        let result = self.start_locked(schedule, geolocation).await;
        self.surface(result).await
    }

    pub async fn resume_session(self: &Arc<Self>) -> AttendanceResult<Option<Session>> {
        let _operation = self.operations.lock().await;
        let result = self.resume_locked().await;
        self.surface(result).await
    }

    pub async fn refresh_roster(&self) -> AttendanceResult<RosterSnapshot> {
        let _operation = self.operations.lock().await;
        let result = self.refresh_locked().await;
        self.surface(result).await
    }

    pub async fn override_status(
        &self,
        student_id: &StudentId,
        new_status: AttendanceStatus,
    ) -> AttendanceResult<RosterSnapshot> {
        let _operation = self.operations.lock().await;
        let result = self.override_locked(student_id, new_status).await;
        self.surface(result).await
    }

    /// Forgets the local session. The backend copy lives on until it expires.
    pub async fn end_session(&self) -> Option<Session> {
        let _operation = self.operations.lock().await;
        self.stop_refresh_loop();

        let ended = self.release_session().await;
        if let Some(session) = &ended {
            info!("attendance: session ended code={}", session.code);
        }
        ended
    }

    /// Stops background polling without touching session state.
    pub fn shutdown(&self) {
        self.stop_refresh_loop();
    }

    async fn start_locked(
        self: &Arc<Self>,
        schedule: &ScheduleRef,
        geolocation: &dyn GeolocationProvider,
    ) -> AttendanceResult<Session> {
        validate_schedule(schedule)?;
        let location = resolve_position(geolocation, self.options.geolocation_timeout).await?;

        let request = GenerateSessionRequest {
            jadwal_id: schedule.schedule_id.clone(),
            latitude: location.latitude,
            longitude: location.longitude,
        };

        match self.api.generate_session(&request).await {
            Ok(response) => {
                let session = Session::from_generated(schedule, location, response, session_date())?;
                info!(
                    "attendance: session generated code={} schedule={} expires_at={}",
                    session.code, session.schedule_id, session.expires_at
                );
                if self.attach(session.clone()).await {
                    self.initial_refresh().await;
                }
                Ok(session)
            }
            Err(AttendanceError::Conflict { message }) => {
                info!(
                    "attendance: backend reports an active session, adopting it schedule={} reason={message}",
                    schedule.schedule_id
                );
                self.emit(SessionEvent::Notice(Notice::info(
                    "An attendance session is already running; continuing it.",
                )));
                self.resume_locked()
                    .await?
                    .ok_or(AttendanceError::Conflict { message })
            }
            Err(err) => Err(err),
        }
    }

    async fn resume_locked(self: &Arc<Self>) -> AttendanceResult<Option<Session>> {
        let records = self.api.active_sessions().await?;
        let current_code = {
            let state = self.state.lock().await;
            match state.phase {
                SessionPhase::Active => state.session.as_ref().map(|s| s.code.clone()),
                _ => None,
            }
        };

        let Some(record) = pick_active_record(records, current_code.as_ref()) else {
            debug!("attendance: no active session to resume");
            return Ok(None);
        };

        let session = Session::from_active_record(record, session_date())?;
        if self.attach(session.clone()).await {
            info!(
                "attendance: resumed session code={} schedule={}",
                session.code, session.schedule_id
            );
            self.initial_refresh().await;
            Ok(Some(session))
        } else {
            Ok(self.session().await)
        }
    }

    async fn refresh_locked(&self) -> AttendanceResult<RosterSnapshot> {
        let session = self.current_session().await?;
        let rows = self
            .api
            .session_roster(&RosterQuery {
                kelas_id: session.class_id.clone(),
                mata_pelajaran_id: session.subject_id.clone(),
                tanggal: session.date,
            })
            .await?;
        let snapshot = RosterSnapshot::from_rows(rows)?;

        {
            let mut state = self.state.lock().await;
            let still_attached = state
                .session
                .as_ref()
                .is_some_and(|current| current.code == session.code);
            if !still_attached {
                debug!(
                    "attendance: dropping roster for detached session code={}",
                    session.code
                );
                return Ok(snapshot);
            }
            state.roster = snapshot.clone();
        }

        debug!(
            "attendance: roster refreshed code={} students={} present={}",
            session.code,
            snapshot.entries.len(),
            snapshot.counts.present
        );
        self.emit(SessionEvent::RosterUpdated(snapshot.clone()));
        Ok(snapshot)
    }

    async fn override_locked(
        &self,
        student_id: &StudentId,
        new_status: AttendanceStatus,
    ) -> AttendanceResult<RosterSnapshot> {
        if student_id.as_str().trim().is_empty() {
            return Err(AttendanceError::validation("student id is required"));
        }
        let session = self.current_session().await?;
        let existing = {
            let state = self.state.lock().await;
            state
                .roster
                .entry_for(student_id)
                .map(|entry| entry.attendance_id.clone())
        };

        match existing {
            Some(attendance_id) => {
                self.api
                    .update_attendance(
                        &attendance_id,
                        &UpdateAttendanceRequest {
                            keterangan: new_status,
                        },
                    )
                    .await?;
                info!(
                    "attendance: status updated student={student_id} row={attendance_id} status={new_status}"
                );
            }
            None => {
                self.api
                    .create_manual_attendance(&ManualAttendanceRequest {
                        siswa_id: student_id.clone(),
                        jadwal_id: session.schedule_id.clone(),
                        keterangan: new_status,
                        tanggal: session.date,
                    })
                    .await?;
                info!(
                    "attendance: manual entry created student={student_id} schedule={} status={new_status}",
                    session.schedule_id
                );
            }
        }

        self.refresh_locked().await
    }

    /// Installs `session` as the active one. Returns `false` when it already was.
    async fn attach(self: &Arc<Self>, session: Session) -> bool {
        {
            let mut state = self.state.lock().await;
            let same_session = state.phase == SessionPhase::Active
                && state
                    .session
                    .as_ref()
                    .is_some_and(|current| current.code == session.code);
            if same_session {
                return false;
            }
            state.phase = SessionPhase::Active;
            state.session = Some(session.clone());
            state.roster = RosterSnapshot::default();
        }

        self.emit(SessionEvent::PhaseChanged {
            phase: SessionPhase::Active,
            code: Some(session.code.clone()),
        });
        self.spawn_refresh_loop(&session);
        true
    }

    async fn initial_refresh(&self) {
        if let Err(err) = self.refresh_locked().await {
            warn!("attendance: initial roster refresh failed: {err}");
            let _ = self.surface::<()>(Err(err)).await;
        }
    }

    async fn current_session(&self) -> AttendanceResult<Session> {
        let state = self.state.lock().await;
        match (state.phase, state.session.as_ref()) {
            (SessionPhase::Active | SessionPhase::Expired, Some(session)) => Ok(session.clone()),
            _ => Err(AttendanceError::validation("no attendance session is attached")),
        }
    }

    fn spawn_refresh_loop(self: &Arc<Self>, session: &Session) {
        let controller = Arc::downgrade(self);
        let period = self.options.refresh_interval;
        let code = session.code.clone();
        let deadline = Instant::now()
            + (session.expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let expiry = tokio::time::sleep_until(deadline);
            tokio::pin!(expiry);

            loop {
                tokio::select! {
                    _ = &mut expiry => {
                        if let Some(controller) = controller.upgrade() {
                            controller.expire(&code).await;
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        if let Err(err) = controller.refresh_roster().await {
                            debug!("attendance: scheduled refresh failed code={code}: {err}");
                        }
                    }
                }
            }
        });

        let previous = self.lock_refresh_task().replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_refresh_loop(&self) {
        if let Some(task) = self.lock_refresh_task().take() {
            task.abort();
        }
    }

    fn lock_refresh_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn expire(&self, code: &SessionCode) {
        {
            let mut state = self.state.lock().await;
            let matches = state.phase == SessionPhase::Active
                && state
                    .session
                    .as_ref()
                    .is_some_and(|session| &session.code == code);
            if !matches {
                return;
            }
            state.phase = SessionPhase::Expired;
        }
        info!("attendance: session expired code={code}");
        self.emit(SessionEvent::PhaseChanged {
            phase: SessionPhase::Expired,
            code: Some(code.clone()),
        });
    }

    async fn release_session(&self) -> Option<Session> {
        let released = {
            let mut state = self.state.lock().await;
            let released = state.session.take();
            state.roster = RosterSnapshot::default();
            if released.is_some() {
                state.phase = SessionPhase::Ended;
            }
            released
        };

        if let Some(session) = &released {
            self.emit(SessionEvent::PhaseChanged {
                phase: SessionPhase::Ended,
                code: Some(session.code.clone()),
            });
        }
        released
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Every failure becomes a transient notice. A 401 also drops the local
    /// session and its polling, since the user is sent back to the login page.
    async fn surface<T>(&self, result: AttendanceResult<T>) -> AttendanceResult<T> {
        let (message, unauthorized) = match &result {
            Ok(_) => return result,
            Err(err) => (err.to_string(), matches!(err, AttendanceError::Unauthorized)),
        };
        warn!("attendance: operation failed: {message}");

        if unauthorized {
            if let Some(session) = self.release_session().await {
                info!("attendance: signed out, released session code={}", session.code);
            }
            self.emit(SessionEvent::LoginRequired { route: LOGIN_ROUTE });
            self.emit(SessionEvent::Notice(Notice::error(message)));
            // May abort the task we are running on; nothing below may await.
            self.stop_refresh_loop();
        } else {
            self.emit(SessionEvent::Notice(Notice::error(message)));
        }
        result
    }
}

impl Drop for AttendanceSessionController {
    fn drop(&mut self) {
        self.stop_refresh_loop();
    }
}

fn validate_schedule(schedule: &ScheduleRef) -> AttendanceResult<()> {
    let fields = [
        ("schedule id", schedule.schedule_id.as_str()),
        ("class id", schedule.class_id.as_str()),
        ("subject id", schedule.subject_id.as_str()),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(AttendanceError::validation(format!("{name} is required")));
        }
    }
    Ok(())
}

/// Prefers the session we already hold; otherwise the first one still running.
fn pick_active_record(
    records: Vec<ActiveSessionRecord>,
    current_code: Option<&SessionCode>,
) -> Option<ActiveSessionRecord> {
    let now = Utc::now();
    let mut live: Vec<ActiveSessionRecord> = records
        .into_iter()
        .filter(|record| record.expired_at > now)
        .collect();
    let preferred = current_code
        .and_then(|code| live.iter().position(|record| &record.kode_unik == code))
        .unwrap_or(0);
    if live.is_empty() {
        None
    } else {
        Some(live.swap_remove(preferred))
    }
}

fn session_date() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
#[path = "tests/mock_backend.rs"]
mod mock_backend;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
