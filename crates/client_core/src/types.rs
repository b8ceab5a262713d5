use std::{collections::HashSet, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, NaiveDate, Utc};
use shared::{
    domain::{
        AttendanceId, AttendanceStatus, ClassId, Coordinates, ScheduleId, ScheduleRef,
        SessionCode, StudentId, SubjectId,
    },
    protocol::{ActiveSessionRecord, GenerateSessionResponse, RosterRow},
};

use crate::error::{AttendanceError, AttendanceResult};

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// One QR attendance window as the client knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub code: SessionCode,
    pub schedule_id: ScheduleId,
    pub class_id: ClassId,
    pub subject_id: SubjectId,
    pub expires_at: DateTime<Utc>,
    pub location: Coordinates,
    /// Calendar day the roster is read for.
    pub date: NaiveDate,
    /// `data:` URL of the QR image; only present for sessions generated here.
    pub qr_code: Option<String>,
}

impl Session {
    pub(crate) fn from_generated(
        schedule: &ScheduleRef,
        location: Coordinates,
        response: GenerateSessionResponse,
        date: NaiveDate,
    ) -> AttendanceResult<Self> {
        validate_session_code(&response.kode_unik)?;
        Ok(Self {
            code: response.kode_unik,
            schedule_id: schedule.schedule_id.clone(),
            class_id: schedule.class_id.clone(),
            subject_id: schedule.subject_id.clone(),
            expires_at: response.expired_at,
            location,
            date,
            qr_code: response.qr_code,
        })
    }

    pub(crate) fn from_active_record(
        record: ActiveSessionRecord,
        date: NaiveDate,
    ) -> AttendanceResult<Self> {
        validate_session_code(&record.kode_unik)?;
        let location = Coordinates::new(record.lokasi.latitude, record.lokasi.longitude)
            .map_err(|err| {
                AttendanceError::contract(format!(
                    "active session {} has invalid location: {err}",
                    record.kode_unik
                ))
            })?;
        Ok(Self {
            class_id: record.jadwal.class_id(),
            subject_id: record.jadwal.subject_id(),
            schedule_id: record.jadwal.id,
            code: record.kode_unik,
            expires_at: record.expired_at,
            location,
            date,
            qr_code: None,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Countdown until expiry, saturating at zero.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// The PNG bytes behind the QR `data:` URL, if the backend sent one.
    pub fn qr_png(&self) -> AttendanceResult<Option<Vec<u8>>> {
        let Some(data_url) = self.qr_code.as_deref() else {
            return Ok(None);
        };
        let encoded = data_url.strip_prefix(PNG_DATA_URL_PREFIX).ok_or_else(|| {
            AttendanceError::contract("qr code is not a base64 png data url")
        })?;
        STANDARD
            .decode(encoded.trim())
            .map(Some)
            .map_err(|err| AttendanceError::contract(format!("qr code payload: {err}")))
    }
}

fn validate_session_code(code: &SessionCode) -> AttendanceResult<()> {
    let raw = code.as_str();
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AttendanceError::contract(format!(
            "session code '{raw}' is not alphanumeric"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub attendance_id: AttendanceId,
    pub student_id: StudentId,
    pub student_name: Option<String>,
    pub status: AttendanceStatus,
    pub check_in_time: Option<DateTime<Utc>>,
}

impl TryFrom<RosterRow> for RosterEntry {
    type Error = AttendanceError;

    fn try_from(row: RosterRow) -> Result<Self, Self::Error> {
        let status = row.keterangan.parse::<AttendanceStatus>().map_err(|err| {
            AttendanceError::contract(format!("attendance row {}: {err}", row.id))
        })?;
        Ok(Self {
            student_id: StudentId::new(row.siswa.id()),
            student_name: row.siswa.name().map(str::to_string),
            attendance_id: row.id,
            status,
            check_in_time: row.waktu_masuk,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub present: usize,
    pub excused: usize,
    pub sick: usize,
    pub absent: usize,
}

impl StatusCounts {
    pub fn get(&self, status: AttendanceStatus) -> usize {
        match status {
            AttendanceStatus::Present => self.present,
            AttendanceStatus::Excused => self.excused,
            AttendanceStatus::Sick => self.sick,
            AttendanceStatus::Absent => self.absent,
        }
    }

    pub fn total(&self) -> usize {
        self.present + self.excused + self.sick + self.absent
    }

    fn record(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Excused => self.excused += 1,
            AttendanceStatus::Sick => self.sick += 1,
            AttendanceStatus::Absent => self.absent += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    pub entries: Vec<RosterEntry>,
    pub counts: StatusCounts,
}

impl RosterSnapshot {
    /// Validates every row; one bad row rejects the whole batch.
    pub fn from_rows(rows: Vec<RosterRow>) -> AttendanceResult<Self> {
        let mut seen = HashSet::with_capacity(rows.len());
        let mut counts = StatusCounts::default();
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = RosterEntry::try_from(row)?;
            if !seen.insert(entry.student_id.clone()) {
                return Err(AttendanceError::contract(format!(
                    "student {} appears twice in the roster",
                    entry.student_id
                )));
            }
            counts.record(entry.status);
            entries.push(entry);
        }
        Ok(Self { entries, counts })
    }

    pub fn entry_for(&self, student_id: &StudentId) -> Option<&RosterEntry> {
        self.entries
            .iter()
            .find(|entry| &entry.student_id == student_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Active,
    Expired,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A transient, user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    PhaseChanged {
        phase: SessionPhase,
        code: Option<SessionCode>,
    },
    RosterUpdated(RosterSnapshot),
    Notice(Notice),
    LoginRequired {
        route: &'static str,
    },
}
