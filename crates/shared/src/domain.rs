use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ScheduleId);
id_newtype!(ClassId);
id_newtype!(SubjectId);
id_newtype!(StudentId);
id_newtype!(AttendanceId);
id_newtype!(SessionCode);

pub const LOGIN_ROUTE: &str = "/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[serde(rename = "guru")]
    Teacher,
    #[serde(rename = "siswa")]
    Student,
}

const ROLE_ROUTES: &[(Role, &str)] = &[
    (Role::Admin, "/admin/dashboard"),
    (Role::Teacher, "/guru/dashboard"),
    (Role::Student, "/siswa/dashboard"),
];

impl Role {
    /// Landing route for a freshly authenticated user of this role.
    pub fn home_route(self) -> &'static str {
        ROLE_ROUTES
            .iter()
            .find(|(role, _)| *role == self)
            .map(|(_, route)| *route)
            .unwrap_or(LOGIN_ROUTE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown attendance status '{0}'")]
pub struct UnknownStatus(pub String);

/// Attendance status of one student for one session-day.
///
/// The backend speaks Indonesian on the wire (`Hadir`, `Izin`, `Sakit`,
/// `Alpa`); anything else is a contract violation and fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttendanceStatus {
    Present,
    Excused,
    Sick,
    Absent,
}

impl AttendanceStatus {
    pub fn wire_name(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Hadir",
            AttendanceStatus::Excused => "Izin",
            AttendanceStatus::Sick => "Sakit",
            AttendanceStatus::Absent => "Alpa",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Excused => "excused",
            AttendanceStatus::Sick => "sick",
            AttendanceStatus::Absent => "absent",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    /// Accepts the wire vocabulary and the English labels, case-insensitively.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hadir" | "present" => Ok(AttendanceStatus::Present),
            "izin" | "excused" => Ok(AttendanceStatus::Excused),
            "sakit" | "sick" => Ok(AttendanceStatus::Sick),
            "alpa" | "alpha" | "absent" => Ok(AttendanceStatus::Absent),
            _ => Err(UnknownStatus(raw.to_string())),
        }
    }
}

impl Serialize for AttendanceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_name())
    }
}

impl<'de> Deserialize<'de> for AttendanceStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::Latitude(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::Longitude(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRef {
    pub schedule_id: ScheduleId,
    pub class_id: ClassId,
    pub subject_id: SubjectId,
}
