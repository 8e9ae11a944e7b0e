use crate::utils::error::Result;
use crate::utils::validation::validate_hour_window;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// `start_hour <= hour < end_hour`，以當地時間的小時判斷
pub fn is_operating_now<T: TimeZone>(local: &DateTime<T>, start_hour: u32, end_hour: u32) -> bool {
    let hour = local.hour();
    start_hour <= hour && hour < end_hour
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingHours {
    pub timezone: Tz,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl OperatingHours {
    pub fn new(timezone: Tz, start_hour: u32, end_hour: u32) -> Result<Self> {
        validate_hour_window("schedule.start_hour", start_hour, "schedule.end_hour", end_hour)?;
        Ok(Self {
            timezone,
            start_hour,
            end_hour,
        })
    }

    /// 先轉換到設定的時區再取小時，夏令時間由 chrono-tz 處理
    pub fn local_time(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.timezone)
    }

    pub fn is_open_at(&self, instant: DateTime<Utc>) -> bool {
        is_operating_now(&self.local_time(instant), self.start_hour, self.end_hour)
    }

    /// 下一次開始營業的時間；營業中則回傳當下
    pub fn next_opening(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        let local = self.local_time(instant);
        if self.is_open_at(instant) {
            return local;
        }

        let date = if local.hour() < self.start_hour {
            local.date_naive()
        } else {
            local.date_naive() + Duration::days(1)
        };
        self.resolve_local(date, self.start_hour)
    }

    fn resolve_local(&self, date: NaiveDate, hour: u32) -> DateTime<Tz> {
        let naive = date.and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN));

        self.timezone
            .from_local_datetime(&naive)
            .earliest()
            // 夏令時間跳過的時刻，往後一小時
            .or_else(|| {
                self.timezone
                    .from_local_datetime(&(naive + Duration::hours(1)))
                    .earliest()
            })
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive).with_timezone(&self.timezone))
    }

    pub fn describe(&self) -> String {
        format!(
            "{:02}:00-{:02}:00 {}",
            self.start_hour, self.end_hour, self.timezone
        )
    }
}
