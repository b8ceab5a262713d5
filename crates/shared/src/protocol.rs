use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AttendanceId, AttendanceStatus, ClassId, Role, ScheduleId, SessionCode, StudentId, SubjectId,
    UserId,
};

/// A reference the backend sends either as a bare id or as a populated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Id(String),
    Document(EntityDocument),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nama: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nis: Option<String>,
}

impl EntityRef {
    pub fn id(&self) -> &str {
        match self {
            EntityRef::Id(id) => id,
            EntityRef::Document(doc) => &doc.id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            EntityRef::Id(_) => None,
            EntityRef::Document(doc) => doc.nama.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub nama: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSessionRequest {
    pub jadwal_id: ScheduleId,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSessionResponse {
    pub kode_unik: SessionCode,
    #[serde(default)]
    pub qr_code: Option<String>,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    #[serde(rename = "_id")]
    pub id: ScheduleId,
    pub kelas: EntityRef,
    pub mata_pelajaran: EntityRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hari: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jam_mulai: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jam_selesai: Option<String>,
}

impl ScheduleRecord {
    pub fn class_id(&self) -> ClassId {
        ClassId::new(self.kelas.id())
    }

    pub fn subject_id(&self) -> SubjectId {
        SubjectId::new(self.mata_pelajaran.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionRecord {
    pub kode_unik: SessionCode,
    pub jadwal: ScheduleRecord,
    pub lokasi: LocationRecord,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterQuery {
    pub kelas_id: ClassId,
    pub mata_pelajaran_id: SubjectId,
    pub tanggal: NaiveDate,
}

/// One attendance row as returned by the roster endpoint.
///
/// `keterangan` stays raw here; the client validates it so a bad value can be
/// reported together with the row it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRow {
    #[serde(rename = "_id")]
    pub id: AttendanceId,
    pub siswa: EntityRef,
    pub keterangan: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waktu_masuk: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAttendanceRequest {
    pub keterangan: AttendanceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAttendanceRequest {
    pub siswa_id: StudentId,
    pub jadwal_id: ScheduleId,
    pub keterangan: AttendanceStatus,
    pub tanggal: NaiveDate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AttendanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keterangan: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_populated_and_bare_references() {
        let raw = r#"{
            "kodeUnik": "A1B2C3",
            "jadwal": {
                "_id": "jadwal-1",
                "kelas": {"_id": "kelas-7", "nama": "X IPA 1"},
                "mataPelajaran": "mapel-3"
            },
            "lokasi": {"latitude": -6.2, "longitude": 106.8},
            "expiredAt": "2026-10-19T08:15:00Z"
        }"#;
        let record: ActiveSessionRecord = serde_json::from_str(raw).expect("decode");
        assert_eq!(record.kode_unik, SessionCode::new("A1B2C3"));
        assert_eq!(record.jadwal.class_id(), ClassId::new("kelas-7"));
        assert_eq!(record.jadwal.kelas.name(), Some("X IPA 1"));
        assert_eq!(record.jadwal.subject_id(), SubjectId::new("mapel-3"));
        assert_eq!(
            record.lokasi,
            LocationRecord {
                latitude: -6.2,
                longitude: 106.8
            }
        );
    }

    #[test]
    fn encodes_manual_entry_in_backend_vocabulary() {
        let request = ManualAttendanceRequest {
            siswa_id: StudentId::new("siswa-1"),
            jadwal_id: ScheduleId::new("jadwal-1"),
            keterangan: AttendanceStatus::Sick,
            tanggal: NaiveDate::from_ymd_opt(2026, 10, 19).expect("date"),
        };
        let json = serde_json::to_value(&request).expect("encode");
        assert_eq!(
            json,
            serde_json::json!({
                "siswaId": "siswa-1",
                "jadwalId": "jadwal-1",
                "keterangan": "Sakit",
                "tanggal": "2026-10-19"
            })
        );
    }
}
