use crate::errors::{AppError, AppResult};
use crate::models::{ScheduleDay, ScheduleFrequency, SchedulePolicy, SetDashboardSchedulePayload};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;

const CRON_FIELD_COUNT: usize = 5;
const DAILY_PRESET_CRON: &str = "0 0 * * *";
const WEEKLY_PRESET_CRON: &str = "0 0 * * 0";

/// Next absolute instant at which the policy wants a refresh, strictly after `now`.
///
/// Returns `None` when caching is disabled or the frequency is `Never`. The policy
/// is validated in every case, so a disabled policy with a malformed cron is still
/// rejected and never reaches the store.
pub fn compute_next_run(policy: &SchedulePolicy, now: DateTime<Utc>) -> AppResult<Option<DateTime<Utc>>> {
    let next = next_occurrence(policy, now)?;
    if !policy.cache_enabled {
        return Ok(None);
    }
    Ok(next)
}

/// Next occurrence of the policy's schedule after `after`, ignoring the enable flag.
pub fn next_occurrence(policy: &SchedulePolicy, after: DateTime<Utc>) -> AppResult<Option<DateTime<Utc>>> {
    let timezone = resolve_timezone(policy.timezone.as_deref())?;
    let Some(expression) = resolve_cron(policy)? else {
        return Ok(None);
    };
    let cron = parse_cron(&expression)?;

    let local = after.with_timezone(&timezone);
    let next = cron.find_next_occurrence(&local, false).map_err(|error| {
        AppError::InvalidSchedule(format!("No next occurrence for '{}': {}", expression, error))
    })?;
    Ok(Some(next.with_timezone(&Utc)))
}

pub fn validate_policy(policy: &SchedulePolicy) -> AppResult<()> {
    resolve_timezone(policy.timezone.as_deref())?;
    if let Some(expression) = resolve_cron(policy)? {
        parse_cron(&expression)?;
    }
    Ok(())
}

/// Turns an API payload into a policy. Presets are stored as their generated cron so
/// the chosen day and time survive a round trip through the store.
pub fn policy_from_payload(payload: &SetDashboardSchedulePayload, default_timezone: &str) -> AppResult<SchedulePolicy> {
    let cron = match payload.frequency {
        ScheduleFrequency::Custom => {
            let expression = payload
                .cron
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    AppError::InvalidSchedule("Custom frequency requires a cron expression".to_string())
                })?;
            Some(expression.to_string())
        }
        ScheduleFrequency::Daily | ScheduleFrequency::Weekly => {
            preset_cron(payload.frequency, payload.day, payload.hour, payload.minute)?
        }
        ScheduleFrequency::Never => None,
    };

    let timezone = payload
        .timezone
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default_timezone)
        .to_string();

    let policy = SchedulePolicy {
        cache_enabled: payload.cache_enabled,
        frequency: payload.frequency,
        cron,
        timezone: Some(timezone),
    };
    validate_policy(&policy)?;
    Ok(policy)
}

pub fn preset_cron(
    frequency: ScheduleFrequency,
    day: Option<ScheduleDay>,
    hour: Option<u32>,
    minute: Option<u32>,
) -> AppResult<Option<String>> {
    let hour = hour.unwrap_or(0);
    let minute = minute.unwrap_or(0);
    if hour > 23 {
        return Err(AppError::InvalidSchedule(format!("Hour must be between 0 and 23, got {}", hour)));
    }
    if minute > 59 {
        return Err(AppError::InvalidSchedule(format!("Minute must be between 0 and 59, got {}", minute)));
    }

    match frequency {
        ScheduleFrequency::Daily => Ok(Some(format!("{} {} * * *", minute, hour))),
        ScheduleFrequency::Weekly => {
            let day = day.unwrap_or(ScheduleDay::Sun);
            Ok(Some(format!("{} {} * * {}", minute, hour, day.cron_index())))
        }
        ScheduleFrequency::Custom | ScheduleFrequency::Never => Ok(None),
    }
}

/// Reads the day/hour/minute back out of a stored preset cron. Custom and Never
/// schedules have no preset detail.
pub fn describe_preset(
    frequency: ScheduleFrequency,
    cron: Option<&str>,
) -> (Option<ScheduleDay>, Option<u32>, Option<u32>) {
    if !matches!(frequency, ScheduleFrequency::Daily | ScheduleFrequency::Weekly) {
        return (None, None, None);
    }
    let expression = cron.unwrap_or(match frequency {
        ScheduleFrequency::Weekly => WEEKLY_PRESET_CRON,
        _ => DAILY_PRESET_CRON,
    });
    let fields = expression.split_whitespace().collect::<Vec<_>>();
    if fields.len() != CRON_FIELD_COUNT {
        return (None, None, None);
    }

    let minute = fields[0].parse::<u32>().ok();
    let hour = fields[1].parse::<u32>().ok();
    let day = if frequency == ScheduleFrequency::Weekly {
        fields[4].parse::<u32>().ok().and_then(ScheduleDay::from_cron_index)
    } else {
        None
    };
    (day, hour, minute)
}

fn resolve_cron(policy: &SchedulePolicy) -> AppResult<Option<String>> {
    let stored = policy
        .cron
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match policy.frequency {
        ScheduleFrequency::Never => Ok(None),
        ScheduleFrequency::Custom => stored.map(|value| Some(value.to_string())).ok_or_else(|| {
            AppError::InvalidSchedule("Custom frequency requires a cron expression".to_string())
        }),
        ScheduleFrequency::Daily => Ok(Some(stored.unwrap_or(DAILY_PRESET_CRON).to_string())),
        ScheduleFrequency::Weekly => Ok(Some(stored.unwrap_or(WEEKLY_PRESET_CRON).to_string())),
    }
}

fn parse_cron(expression: &str) -> AppResult<Cron> {
    let fields = expression.split_whitespace().count();
    if fields != CRON_FIELD_COUNT {
        return Err(AppError::InvalidSchedule(format!(
            "Cron expression '{}' must have {} fields (minute hour day-of-month month day-of-week), found {}",
            expression, CRON_FIELD_COUNT, fields
        )));
    }
    expression
        .parse::<Cron>()
        .map_err(|error| AppError::InvalidSchedule(format!("Invalid cron expression '{}': {}", expression, error)))
}

fn resolve_timezone(name: Option<&str>) -> AppResult<Tz> {
    match name.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| AppError::InvalidSchedule(format!("Unknown timezone '{}'", name))),
    }
}
