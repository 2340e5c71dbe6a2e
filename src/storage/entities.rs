use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// One recorded span of work. `elapsed_seconds` is tracked independently from the start and end
/// moments and is the value used when summing time.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WorkSession {
    /// 0 until the store assigns one.
    #[serde(default)]
    pub id: i64,
    pub start_day: NaiveDate,
    pub end_day: NaiveDate,
    #[serde(with = "time_of_day_ser")]
    pub start_time: NaiveTime,
    #[serde(with = "time_of_day_ser")]
    pub end_time: NaiveTime,
    pub elapsed_seconds: i64,
}

impl WorkSession {
    pub fn start(&self) -> NaiveDateTime {
        self.start_day.and_time(self.start_time)
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end_day.and_time(self.end_time)
    }

    /// Seconds between start and end. Negative when the end comes first.
    pub fn span_seconds(&self) -> i64 {
        (self.end() - self.start()).num_seconds()
    }

    pub fn with_id(self, id: i64) -> Self {
        Self { id, ..self }
    }
}

/// Notification sent by a store after a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    Inserted(i64),
    Updated(i64),
    Deleted(i64),
}

impl SessionChange {
    pub fn id(&self) -> i64 {
        match *self {
            SessionChange::Inserted(id) | SessionChange::Updated(id) | SessionChange::Deleted(id) => {
                id
            }
        }
    }
}

/// Times of day are stored as `HH:MM`.
mod time_of_day_ser {
    use chrono::NaiveTime;
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};

    use crate::utils::time::TIME_OF_DAY_FORMAT;

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(TIME_OF_DAY_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, TIME_OF_DAY_FORMAT).map_err(D::Error::custom)
    }
}
